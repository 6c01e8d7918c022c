//! Agents: one `process(state) → state` step each.
//!
//! Every agent reads the query and analysis off the state and writes only
//! its own keys: `agent_results[name]`, `processing_status[name]`,
//! `retrieved_data[key]`, plus appended errors and metrics. Hard failures
//! return `Err` and are recorded by the graph; soft failures (no data,
//! unparseable output) end in `completed_no_data` with the graph moving on.

mod chunk_analyzer;
mod context_response;
mod financial_analyzer;
mod knowledge_integrator;
mod question_analyzer;
mod response_formatter;
mod session_manager;
mod summarizer;
mod technical_analyzer;
mod telegram_retriever;

pub use chunk_analyzer::{ChunkAnalyzer, ChunkProfile};
pub use context_response::ContextResponseAgent;
pub use financial_analyzer::FinancialAnalyzer;
pub use knowledge_integrator::KnowledgeIntegrator;
pub use question_analyzer::QuestionAnalyzer;
pub use response_formatter::ResponseFormatter;
pub use session_manager::SessionManager;
pub use summarizer::Summarizer;
pub use technical_analyzer::TechnicalAnalyzer;
pub use telegram_retriever::TelegramRetriever;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::AgentError;
use crate::state::{AgentResult, AgentState, ProcessingStatus};
use crate::token_usage::{TokenUsageQueue, UsageContext};

/// Project tag stamped on every token-usage record from this service.
pub const PROJECT_TYPE: &str = "stockeasy";

/// A component with a single `process(state)` entry point.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Agent name; the key of every state entry this agent owns.
    fn name(&self) -> &str;

    /// One step: state in, state out.
    async fn process(&self, state: AgentState) -> Result<AgentState, AgentError>;
}

/// Token-tracking context for LLM/embedding calls made on behalf of this
/// request. Tracking is active only when the request carries a user.
pub(crate) fn usage_from_state(state: &AgentState) -> UsageContext {
    match (state.user_id, TokenUsageQueue::global()) {
        (Some(user_id), Some(queue)) => UsageContext::tracked(user_id, PROJECT_TYPE, queue),
        _ => UsageContext::none(),
    }
}

/// Writes the terminal result block + status for one agent run.
#[allow(clippy::too_many_arguments)]
pub(crate) fn finish(
    state: &mut AgentState,
    name: &str,
    status: ProcessingStatus,
    data: Value,
    error: Option<String>,
    started_at: DateTime<Utc>,
    model_name: &str,
    provider: &str,
) {
    let execution_time = (Utc::now() - started_at).num_milliseconds() as f64 / 1000.0;
    state.agent_results.insert(
        name.to_string(),
        AgentResult {
            agent_name: name.to_string(),
            status,
            data,
            error,
            execution_time,
            metadata: serde_json::json!({
                "model_name": model_name,
                "provider": provider,
            }),
        },
    );
    state.record_metric(name, started_at, model_name, provider);
    state.update_processing_status(name, status);
}


#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: finish writes the result, metric and terminal status in
    /// one step.
    #[test]
    fn finish_writes_all_owned_keys() {
        let mut state = AgentState::new("s", "q");
        finish(
            &mut state,
            "telegram_retriever",
            ProcessingStatus::Completed,
            serde_json::json!({"count": 3}),
            None,
            Utc::now(),
            "gpt-4o",
            "openai",
        );
        let result = &state.agent_results["telegram_retriever"];
        assert_eq!(result.status, ProcessingStatus::Completed);
        assert_eq!(result.metadata["model_name"], "gpt-4o");
        assert_eq!(
            state.processing_status["telegram_retriever"],
            ProcessingStatus::Completed
        );
        assert_eq!(state.metrics.len(), 1);
    }
}
