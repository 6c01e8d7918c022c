//! Evidence fragments retrieved from heterogeneous sources.
//!
//! Every hit carries a similarity-like score and enough provenance to
//! attribute a sentence in the final answer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One evidence fragment from any source.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceHit {
    /// Telegram/chat message hit.
    Message {
        content: String,
        message_created_at: DateTime<Utc>,
        final_score: f64,
        #[serde(default)]
        normalized_score: f64,
        #[serde(default)]
        metadata: Value,
    },
    /// Analyst-report or confidential-note chunk.
    Chunk {
        content: String,
        score: f64,
        source: String,
        #[serde(default)]
        publish_date: Option<String>,
        #[serde(default)]
        file_name: Option<String>,
        #[serde(default)]
        page: Option<u32>,
        #[serde(default)]
        stock_code: Option<String>,
        #[serde(default)]
        stock_name: Option<String>,
        #[serde(default)]
        sector_name: Option<String>,
        #[serde(default)]
        keyword_list: Vec<String>,
    },
    /// Structured financial-statement row.
    FinancialRow {
        company: String,
        item_code: String,
        item_name: String,
        year_month: String,
        value: f64,
        unit: String,
    },
}

impl SourceHit {
    /// The hit's similarity-like score (financial rows rank neutrally).
    pub fn score(&self) -> f64 {
        match self {
            SourceHit::Message { final_score, .. } => *final_score,
            SourceHit::Chunk { score, .. } => *score,
            SourceHit::FinancialRow { .. } => 1.0,
        }
    }

    /// The evidence text, where the hit carries free text.
    pub fn content(&self) -> Option<&str> {
        match self {
            SourceHit::Message { content, .. } | SourceHit::Chunk { content, .. } => Some(content),
            SourceHit::FinancialRow { .. } => None,
        }
    }
}
