//! Session manager: initializes per-request state before any other agent.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::debug;

use crate::error::AgentError;
use crate::state::{AgentState, ProcessingStatus};

use super::{finish, Agent};

/// Agents whose status starts as `not_started` on session init.
const TRACKED_AGENTS: &[&str] = &[
    "question_analyzer",
    "telegram_retriever",
    "report_analyzer",
    "confidential_analyzer",
    "financial_analyzer",
    "technical_analyzer",
    "knowledge_integrator",
    "context_response",
    "summarizer",
    "response_formatter",
];

/// Initializes the state: seeds the status map so the monitor sees every
/// agent from the first snapshot.
pub struct SessionManager;

#[async_trait]
impl Agent for SessionManager {
    fn name(&self) -> &str {
        "session_manager"
    }

    async fn process(&self, mut state: AgentState) -> Result<AgentState, AgentError> {
        let started_at = Utc::now();
        state.update_processing_status(self.name(), ProcessingStatus::Processing);
        debug!(session = %state.session_id, "session init");

        for agent in TRACKED_AGENTS {
            if !state.processing_status.contains_key(*agent) {
                state.update_processing_status(agent, ProcessingStatus::NotStarted);
            }
        }

        let session_id = state.session_id.clone();
        finish(
            &mut state,
            "session_manager",
            ProcessingStatus::Completed,
            json!({"session_id": session_id}),
            None,
            started_at,
            "",
            "",
        );
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: every tracked agent is seeded not_started and the
    /// session manager itself completes.
    #[tokio::test]
    async fn seeds_status_map() {
        let state = SessionManager
            .process(AgentState::new("sess", "질문"))
            .await
            .unwrap();
        assert_eq!(
            state.processing_status["telegram_retriever"],
            ProcessingStatus::NotStarted
        );
        assert_eq!(
            state.processing_status["session_manager"],
            ProcessingStatus::Completed
        );
    }
}
