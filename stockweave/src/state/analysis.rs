//! Question-analysis types: intent classification, complexity, data
//! requirements.
//!
//! Enum values serialize to the Korean labels the analyzer model emits, so
//! the structured-output wrapper parses model JSON directly into these types.

use serde::{Deserialize, Serialize};

/// Primary intent of the question.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrimaryIntent {
    #[serde(rename = "종목기본정보")]
    #[default]
    BasicInfo,
    #[serde(rename = "성과전망")]
    Outlook,
    #[serde(rename = "재무분석")]
    Financials,
    #[serde(rename = "산업동향")]
    Industry,
    #[serde(rename = "기타")]
    Other,
}

/// Question complexity; drives retrieval depth and score thresholds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Complexity {
    #[serde(rename = "단순")]
    Simple,
    #[serde(rename = "중간")]
    #[default]
    Medium,
    #[serde(rename = "복합")]
    Composite,
    #[serde(rename = "전문가급")]
    Expert,
}

impl Complexity {
    /// Message retrieval target count.
    pub fn message_count(&self) -> usize {
        match self {
            Complexity::Simple => 5,
            Complexity::Medium => 10,
            Complexity::Composite => 15,
            Complexity::Expert => 20,
        }
    }

    /// Report/confidential chunk retrieval target count.
    pub fn report_count(&self) -> usize {
        match self {
            Complexity::Simple => 6,
            Complexity::Medium => 12,
            Complexity::Composite => 18,
            Complexity::Expert => 25,
        }
    }

    /// Similarity floor: simple questions demand precision, expert questions
    /// cast a wide net.
    pub fn min_score(&self) -> f32 {
        match self {
            Complexity::Simple => 0.50,
            Complexity::Medium => 0.35,
            Complexity::Composite => 0.25,
            Complexity::Expert => 0.21,
        }
    }
}

/// Expected answer shape.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnswerType {
    #[serde(rename = "사실형")]
    Factual,
    #[serde(rename = "추론형")]
    Inferential,
    #[serde(rename = "비교형")]
    Comparative,
    #[serde(rename = "예측형")]
    Predictive,
    #[serde(rename = "설명형")]
    #[default]
    Explanatory,
    #[serde(rename = "종합형")]
    Comprehensive,
}

/// Entities the analyzer extracted from the question.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EntityMap {
    #[serde(default)]
    pub stock_code: Option<String>,
    #[serde(default)]
    pub stock_name: Option<String>,
    #[serde(default)]
    pub sector: Option<String>,
}

/// Intent classification block.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Classification {
    #[serde(default)]
    pub primary_intent: PrimaryIntent,
    #[serde(default)]
    pub complexity: Complexity,
    #[serde(default)]
    pub expected_answer_type: AnswerType,
}

/// Per-source boolean gates for the parallel retrievers.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DataRequirements {
    #[serde(default)]
    pub telegram_needed: bool,
    #[serde(default)]
    pub reports_needed: bool,
    #[serde(default)]
    pub confidential_needed: bool,
    #[serde(default)]
    pub financial_needed: bool,
    #[serde(default)]
    pub technical_analysis_needed: bool,
}

impl DataRequirements {
    /// All gates closed (follow-up questions skip retrieval).
    pub fn none() -> Self {
        Self::default()
    }

    /// All gates open.
    pub fn all() -> Self {
        Self {
            telegram_needed: true,
            reports_needed: true,
            confidential_needed: true,
            financial_needed: true,
            technical_analysis_needed: true,
        }
    }
}

/// Output of the question analyzer; read by every downstream agent.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct QuestionAnalysis {
    #[serde(default)]
    pub entities: EntityMap,
    #[serde(default)]
    pub classification: Classification,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub subgroup: Vec<String>,
    #[serde(default)]
    pub data_requirements: DataRequirements,
    #[serde(default)]
    pub detail_level: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: Korean labels round-trip through serde.
    #[test]
    fn korean_labels_roundtrip() {
        let json = r#"{
            "entities": {"stock_code": "005930", "stock_name": "삼성전자"},
            "classification": {
                "primary_intent": "성과전망",
                "complexity": "전문가급",
                "expected_answer_type": "예측형"
            },
            "keywords": ["실적", "HBM"],
            "subgroup": [],
            "data_requirements": {"reports_needed": true}
        }"#;
        let analysis: QuestionAnalysis = serde_json::from_str(json).unwrap();
        assert_eq!(analysis.classification.primary_intent, PrimaryIntent::Outlook);
        assert_eq!(analysis.classification.complexity, Complexity::Expert);
        assert!(analysis.data_requirements.reports_needed);
        assert!(!analysis.data_requirements.telegram_needed);

        let back = serde_json::to_value(&analysis).unwrap();
        assert_eq!(back["classification"]["complexity"], "전문가급");
    }

    /// **Scenario**: complexity tables: counts {5,10,15,20} and {6,12,18,25},
    /// thresholds {0.50,0.35,0.25,0.21}.
    #[test]
    fn complexity_tables() {
        let rows = [
            (Complexity::Simple, 5, 6, 0.50),
            (Complexity::Medium, 10, 12, 0.35),
            (Complexity::Composite, 15, 18, 0.25),
            (Complexity::Expert, 20, 25, 0.21),
        ];
        for (complexity, messages, reports, threshold) in rows {
            assert_eq!(complexity.message_count(), messages);
            assert_eq!(complexity.report_count(), reports);
            assert_eq!(complexity.min_score(), threshold);
        }
    }
}
