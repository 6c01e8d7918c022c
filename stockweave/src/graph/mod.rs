//! Orchestration graph: registry + dependency-ordered execution.
//!
//! Order: session_manager → question_analyzer → parallel retriever fan-out
//! → knowledge_integrator (or context_response on follow-ups) → summarizer
//! → response_formatter. Retrievers run concurrently on cloned states;
//! results are merged back key-by-key so each agent only ever lands its own
//! entries (one writer per key). A failing retriever is recorded and does
//! not abort its siblings.

pub mod status;

pub use status::{agent_message, MessagePhase};

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use serde_json::json;
use tracing::{error, info};

use crate::agents::Agent;
use crate::state::{AgentState, ProcessingStatus, StatusBoard};

/// Retriever agents eligible for the parallel fan-out, in dispatch order.
const PARALLEL_RETRIEVERS: &[&str] = &[
    "telegram_retriever",
    "report_analyzer",
    "confidential_analyzer",
    "financial_analyzer",
    "technical_analyzer",
];

/// Name → agent instance.
#[derive(Default)]
pub struct AgentRegistry {
    agents: HashMap<String, Arc<dyn Agent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an agent under its own name. Replaces on the same name.
    pub fn register(&mut self, agent: Arc<dyn Agent>) -> &mut Self {
        self.agents.insert(agent.name().to_string(), agent);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.agents.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.agents.keys().cloned().collect()
    }
}

/// Runs agents in dependency order with per-session observable status.
pub struct AgentGraph {
    registry: AgentRegistry,
    board: Arc<StatusBoard>,
}

impl AgentGraph {
    pub fn new(registry: AgentRegistry) -> Self {
        Self {
            registry,
            board: Arc::new(StatusBoard::new()),
        }
    }

    /// The status board the HTTP monitor polls.
    pub fn board(&self) -> Arc<StatusBoard> {
        Arc::clone(&self.board)
    }

    /// Runs one agent sequentially; an `Err` is recorded as a failed status
    /// plus an error entry and the previous state flows on.
    async fn run_sequential(&self, name: &str, state: AgentState) -> AgentState {
        let Some(agent) = self.registry.get(name) else {
            return state;
        };
        let backup = state.clone();
        match agent.process(state).await {
            Ok(next) => next,
            Err(e) => {
                error!(agent = name, error = %e, "agent failed");
                let mut state = backup;
                state.add_error(name, e.to_string(), "processing_error", json!({}));
                state.update_processing_status(name, ProcessingStatus::Failed);
                state
            }
        }
    }

    /// Merges one parallel agent's output back into the base state: the
    /// agent's own result/status keys, any retrieved_data entries it added,
    /// and appended errors/metrics.
    fn merge_parallel_result(
        base: &mut AgentState,
        name: &str,
        base_errors: usize,
        base_metrics: usize,
        result: AgentState,
    ) {
        if let Some(agent_result) = result.agent_results.get(name) {
            base.agent_results
                .insert(name.to_string(), agent_result.clone());
        }
        if let Some(status) = result.processing_status.get(name) {
            base.update_processing_status(name, *status);
        }
        for (key, hits) in result.retrieved_data {
            base.retrieved_data.entry(key).or_insert(hits);
        }
        base.errors
            .extend(result.errors.into_iter().skip(base_errors));
        base.metrics
            .extend(result.metrics.into_iter().skip(base_metrics));
    }

    /// Fan-out: every registered retriever runs concurrently on a cloned
    /// state (each self-guards on its data-requirement flag). Panics and
    /// errors are collected per agent; siblings always finish.
    async fn run_parallel_retrievers(&self, mut state: AgentState) -> AgentState {
        let dispatched: Vec<(String, Arc<dyn Agent>)> = PARALLEL_RETRIEVERS
            .iter()
            .filter_map(|name| self.registry.get(name).map(|a| (name.to_string(), a)))
            .collect();
        if dispatched.is_empty() {
            return state;
        }
        info!(count = dispatched.len(), "parallel retriever fan-out");

        let base_errors = state.errors.len();
        let base_metrics = state.metrics.len();
        let futures = dispatched.into_iter().map(|(name, agent)| {
            let cloned = state.clone();
            async move {
                let result = agent.process(cloned).await;
                (name, result)
            }
        });

        for (name, result) in join_all(futures).await {
            match result {
                Ok(next) => {
                    Self::merge_parallel_result(&mut state, &name, base_errors, base_metrics, next)
                }
                Err(e) => {
                    error!(agent = %name, error = %e, "retriever failed");
                    state.add_error(&name, e.to_string(), "processing_error", json!({}));
                    state.update_processing_status(&name, ProcessingStatus::Failed);
                }
            }
        }
        state
    }

    /// Executes the full graph for one request.
    pub async fn execute(&self, state: AgentState) -> AgentState {
        let mut state = state.with_board(Arc::clone(&self.board));

        state = self.run_sequential("session_manager", state).await;
        state = self.run_sequential("question_analyzer", state).await;

        if state.is_follow_up {
            state = self.run_sequential("context_response", state).await;
        } else {
            state = self.run_parallel_retrievers(state).await;
            state = self.run_sequential("knowledge_integrator", state).await;
        }

        state = self.run_sequential("summarizer", state).await;
        state = self.run_sequential("response_formatter", state).await;

        // No agent may be left in `processing` after graph termination.
        let stuck: Vec<String> = state
            .processing_status
            .iter()
            .filter(|(_, status)| **status == ProcessingStatus::Processing)
            .map(|(name, _)| name.clone())
            .collect();
        for name in stuck {
            state.update_processing_status(&name, ProcessingStatus::Error);
        }
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use crate::agents::finish;
    use crate::error::AgentError;

    /// Test agent: marks itself completed and tags the state.
    struct TagAgent {
        name: &'static str,
        fail: bool,
    }

    #[async_trait]
    impl Agent for TagAgent {
        fn name(&self) -> &str {
            self.name
        }

        async fn process(&self, mut state: AgentState) -> Result<AgentState, AgentError> {
            if self.fail {
                return Err(AgentError::ExecutionFailed("인위적 실패".to_string()));
            }
            state.update_processing_status(self.name, ProcessingStatus::Processing);
            state.retrieved_data.insert(
                format!("{}_data", self.name),
                Vec::new(),
            );
            finish(
                &mut state,
                self.name,
                ProcessingStatus::Completed,
                json!({"tag": self.name}),
                None,
                Utc::now(),
                "",
                "",
            );
            Ok(state)
        }
    }

    fn registry(agents: Vec<TagAgent>) -> AgentRegistry {
        let mut registry = AgentRegistry::new();
        for agent in agents {
            registry.register(Arc::new(agent));
        }
        registry
    }

    /// **Scenario**: parallel retrievers all land their own keys; one
    /// failing retriever is recorded without aborting siblings.
    #[tokio::test]
    async fn parallel_failure_does_not_abort_siblings() {
        let graph = AgentGraph::new(registry(vec![
            TagAgent { name: "telegram_retriever", fail: false },
            TagAgent { name: "report_analyzer", fail: true },
            TagAgent { name: "technical_analyzer", fail: false },
        ]));
        let state = graph.execute(AgentState::new("sess", "질문")).await;

        assert_eq!(
            state.processing_status["telegram_retriever"],
            ProcessingStatus::Completed
        );
        assert_eq!(
            state.processing_status["report_analyzer"],
            ProcessingStatus::Failed
        );
        assert_eq!(
            state.processing_status["technical_analyzer"],
            ProcessingStatus::Completed
        );
        assert!(state.retrieved_data.contains_key("telegram_retriever_data"));
        assert_eq!(state.errors.len(), 1);
    }

    /// **Scenario**: status completeness — after execution no agent remains
    /// `processing`, and every executed agent's status is terminal.
    #[tokio::test]
    async fn no_agent_left_processing() {
        let graph = AgentGraph::new(registry(vec![
            TagAgent { name: "telegram_retriever", fail: false },
            TagAgent { name: "summarizer", fail: false },
        ]));
        let state = graph.execute(AgentState::new("sess", "질문")).await;
        for (agent, status) in &state.processing_status {
            assert!(
                *status != ProcessingStatus::Processing,
                "{} left processing",
                agent
            );
        }
    }

    /// **Scenario**: the board mirrors terminal statuses for the monitor.
    #[tokio::test]
    async fn board_reflects_statuses() {
        let graph = AgentGraph::new(registry(vec![TagAgent {
            name: "telegram_retriever",
            fail: false,
        }]));
        let board = graph.board();
        let _ = graph.execute(AgentState::new("sess-b", "질문")).await;
        assert_eq!(
            board.snapshot("sess-b")["telegram_retriever"],
            ProcessingStatus::Completed
        );
    }

    /// **Scenario**: follow-up turns route to context_response and skip the
    /// retriever fan-out.
    #[tokio::test]
    async fn follow_up_routes_to_context_response() {
        let graph = AgentGraph::new(registry(vec![
            TagAgent { name: "context_response", fail: false },
            TagAgent { name: "telegram_retriever", fail: false },
        ]));
        let mut request = AgentState::new("sess", "후속 질문");
        request.is_follow_up = true;
        let state = graph.execute(request).await;
        assert!(state.agent_results.contains_key("context_response"));
        assert!(!state.agent_results.contains_key("telegram_retriever"));
    }
}
