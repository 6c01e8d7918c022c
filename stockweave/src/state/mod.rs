//! Per-request agent state: the sole channel of inter-agent communication.
//!
//! [`AgentState`] flows state-in/state-out through every agent. Each agent
//! owns its own keys: exactly one agent writes `agent_results[name]`,
//! `processing_status[name]` and `retrieved_data[source]` per request. The
//! [`StatusBoard`] mirrors status transitions into a process-scoped map so
//! the HTTP monitor can observe progress without racing the graph.

mod analysis;
mod source_hit;

pub use analysis::{
    AnswerType, Classification, Complexity, DataRequirements, EntityMap, PrimaryIntent,
    QuestionAnalysis,
};
pub use source_hit::SourceHit;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::components::Component;

/// Per-agent lifecycle status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    NotStarted,
    Processing,
    Completed,
    CompletedNoData,
    Error,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::NotStarted => "not_started",
            ProcessingStatus::Processing => "processing",
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::CompletedNoData => "completed_no_data",
            ProcessingStatus::Error => "error",
            ProcessingStatus::Failed => "failed",
        }
    }

    /// True once an agent can no longer transition.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProcessingStatus::NotStarted | ProcessingStatus::Processing)
    }
}

/// Result block one agent writes for itself.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentResult {
    pub agent_name: String,
    pub status: ProcessingStatus,
    pub data: Value,
    pub error: Option<String>,
    pub execution_time: f64,
    pub metadata: Value,
}

/// One recorded failure.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub agent: String,
    pub error: String,
    pub error_type: String,
    pub timestamp: DateTime<Utc>,
    pub context: Value,
}

/// Execution metric for one agent run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetricEntry {
    pub agent: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub model_name: String,
    pub provider: String,
}

/// Table of contents of the final report.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ReportToc {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub sections: Vec<TocSection>,
}

/// One TOC section.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TocSection {
    pub section_id: String,
    pub title: String,
    #[serde(default)]
    pub subsections: Vec<String>,
}

/// Process-scoped observable of per-session processing status.
///
/// The graph writes through [`AgentState::update_processing_status`]; the
/// status monitor snapshots per session every poll tick.
#[derive(Debug, Default)]
pub struct StatusBoard {
    sessions: DashMap<String, HashMap<String, ProcessingStatus>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, session_id: &str, agent: &str, status: ProcessingStatus) {
        self.sessions
            .entry(session_id.to_string())
            .or_default()
            .insert(agent.to_string(), status);
    }

    /// Current status map for one session.
    pub fn snapshot(&self, session_id: &str) -> HashMap<String, ProcessingStatus> {
        self.sessions
            .get(session_id)
            .map(|entry| entry.clone())
            .unwrap_or_default()
    }

    /// Drops the session entry when the stream ends.
    pub fn remove(&self, session_id: &str) {
        self.sessions.remove(session_id);
    }
}

/// Per-request state; created at request entry, destroyed when the stream
/// ends.
#[derive(Clone, Debug, Default)]
pub struct AgentState {
    pub session_id: String,
    pub user_id: Option<Uuid>,
    pub query: String,
    pub stock_code: Option<String>,
    pub stock_name: Option<String>,
    pub sector: Option<String>,
    pub is_follow_up: bool,
    pub question_analysis: Option<QuestionAnalysis>,
    /// Per-source evidence, keyed by source name; each entry is owned by
    /// exactly one retriever.
    pub retrieved_data: HashMap<String, Vec<SourceHit>>,
    pub agent_results: HashMap<String, AgentResult>,
    pub processing_status: HashMap<String, ProcessingStatus>,
    pub metrics: Vec<MetricEntry>,
    pub errors: Vec<ErrorEntry>,
    pub custom_prompt_template: Option<String>,
    pub final_report_toc: Option<ReportToc>,
    pub summary: Option<String>,
    pub summary_by_section: BTreeMap<String, String>,
    pub formatted_response: Option<String>,
    pub answer: Option<String>,
    pub components: Vec<Component>,
    /// Shared status mirror; None in unit tests that don't observe status.
    pub board: Option<Arc<StatusBoard>>,
}

impl AgentState {
    pub fn new(session_id: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn with_board(mut self, board: Arc<StatusBoard>) -> Self {
        self.board = Some(board);
        self
    }

    /// Publishes a status transition into this state and the shared board.
    pub fn update_processing_status(&mut self, agent: &str, status: ProcessingStatus) {
        self.processing_status.insert(agent.to_string(), status);
        if let Some(board) = &self.board {
            board.set(&self.session_id, agent, status);
        }
    }

    /// Appends an error entry.
    pub fn add_error(
        &mut self,
        agent: &str,
        error: impl Into<String>,
        error_type: &str,
        context: Value,
    ) {
        self.errors.push(ErrorEntry {
            agent: agent.to_string(),
            error: error.into(),
            error_type: error_type.to_string(),
            timestamp: Utc::now(),
            context,
        });
    }

    /// Records an execution metric for one agent run.
    pub fn record_metric(
        &mut self,
        agent: &str,
        started_at: DateTime<Utc>,
        model_name: &str,
        provider: &str,
    ) {
        let ended_at = Utc::now();
        self.metrics.push(MetricEntry {
            agent: agent.to_string(),
            started_at,
            ended_at,
            duration_secs: (ended_at - started_at).num_milliseconds() as f64 / 1000.0,
            model_name: model_name.to_string(),
            provider: provider.to_string(),
        });
    }

    /// Current analysis, or defaults when the analyzer produced nothing.
    pub fn analysis(&self) -> QuestionAnalysis {
        self.question_analysis.clone().unwrap_or_default()
    }

    /// Best-known stock code: analyzer entity first, request field second.
    pub fn effective_stock_code(&self) -> Option<String> {
        self.question_analysis
            .as_ref()
            .and_then(|a| a.entities.stock_code.clone())
            .or_else(|| self.stock_code.clone())
    }

    /// Best-known stock name.
    pub fn effective_stock_name(&self) -> Option<String> {
        self.question_analysis
            .as_ref()
            .and_then(|a| a.entities.stock_name.clone())
            .or_else(|| self.stock_name.clone())
    }

    /// True when any retriever produced at least one hit.
    pub fn has_any_retrieved_data(&self) -> bool {
        self.retrieved_data.values().any(|hits| !hits.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: status updates land in both the state map and the board.
    #[test]
    fn status_update_mirrors_to_board() {
        let board = Arc::new(StatusBoard::new());
        let mut state = AgentState::new("sess-1", "질문").with_board(Arc::clone(&board));
        state.update_processing_status("telegram_retriever", ProcessingStatus::Processing);
        assert_eq!(
            state.processing_status["telegram_retriever"],
            ProcessingStatus::Processing
        );
        assert_eq!(
            board.snapshot("sess-1")["telegram_retriever"],
            ProcessingStatus::Processing
        );
        board.remove("sess-1");
        assert!(board.snapshot("sess-1").is_empty());
    }

    /// **Scenario**: terminal statuses are exactly the four end states.
    #[test]
    fn terminal_statuses() {
        assert!(!ProcessingStatus::NotStarted.is_terminal());
        assert!(!ProcessingStatus::Processing.is_terminal());
        for status in [
            ProcessingStatus::Completed,
            ProcessingStatus::CompletedNoData,
            ProcessingStatus::Error,
            ProcessingStatus::Failed,
        ] {
            assert!(status.is_terminal());
        }
    }

    /// **Scenario**: analyzer entities win over request fields.
    #[test]
    fn effective_entities_prefer_analysis() {
        let mut state = AgentState::new("s", "q");
        state.stock_code = Some("000660".to_string());
        assert_eq!(state.effective_stock_code().unwrap(), "000660");

        state.question_analysis = Some(QuestionAnalysis {
            entities: EntityMap {
                stock_code: Some("005930".to_string()),
                ..Default::default()
            },
            ..Default::default()
        });
        assert_eq!(state.effective_stock_code().unwrap(), "005930");
    }
}
