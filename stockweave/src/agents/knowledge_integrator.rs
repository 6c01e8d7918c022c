//! Knowledge integrator: fuses the per-source analyses into one narrative.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::warn;

use crate::error::AgentError;
use crate::llm::AgentLlm;
use crate::message::Message;
use crate::prompts::{INTEGRATOR_SYSTEM, NO_DATA_MESSAGE};
use crate::state::{AgentState, ProcessingStatus};

use super::{finish, usage_from_state, Agent};

/// Retriever agents whose outputs feed the integration prompt.
const SOURCE_AGENTS: &[&str] = &[
    "telegram_retriever",
    "report_analyzer",
    "confidential_analyzer",
    "financial_analyzer",
    "technical_analyzer",
];

/// Fuses multi-source evidence into `integrated_knowledge`.
pub struct KnowledgeIntegrator {
    agent_llm: Arc<AgentLlm>,
}

impl KnowledgeIntegrator {
    pub fn new(agent_llm: Arc<AgentLlm>) -> Self {
        Self { agent_llm }
    }

    /// Collects each source's narrative block for the prompt.
    fn collect_source_blocks(state: &AgentState) -> Vec<String> {
        let mut blocks = Vec::new();
        for agent in SOURCE_AGENTS {
            let Some(result) = state.agent_results.get(*agent) else {
                continue;
            };
            if !matches!(result.status, ProcessingStatus::Completed) {
                continue;
            }
            let data = &result.data;
            let narrative = data
                .get("summary_text")
                .or_else(|| data.get("analysis"))
                .or_else(|| data.get("summary"))
                .and_then(|v| v.as_str())
                .unwrap_or("");
            if !narrative.is_empty() {
                blocks.push(format!("[{}]\n{}", agent, narrative));
            }
        }
        // Financial rows have no narrative; surface their presence.
        if let Some(hits) = state.retrieved_data.get("financial_data") {
            if !hits.is_empty() {
                blocks.push(format!("[financial_analyzer]\n재무 데이터 {}건 확보", hits.len()));
            }
        }
        blocks
    }
}

#[async_trait]
impl Agent for KnowledgeIntegrator {
    fn name(&self) -> &str {
        "knowledge_integrator"
    }

    async fn process(&self, mut state: AgentState) -> Result<AgentState, AgentError> {
        let started_at = Utc::now();
        state.update_processing_status(self.name(), ProcessingStatus::Processing);
        let model_name = self.agent_llm.model_name();
        let provider = self.agent_llm.provider();

        let blocks = Self::collect_source_blocks(&state);
        if blocks.is_empty() && !state.has_any_retrieved_data() {
            finish(
                &mut state,
                "knowledge_integrator",
                ProcessingStatus::CompletedNoData,
                json!({"integrated_knowledge": NO_DATA_MESSAGE}),
                None,
                started_at,
                &model_name,
                &provider,
            );
            return Ok(state);
        }

        let prompt = format!(
            "질문: {}\n\n소스별 분석 결과:\n\n{}",
            state.query,
            blocks.join("\n\n")
        );
        let usage = usage_from_state(&state);
        let integrated = match self
            .agent_llm
            .invoke_with_fallback(
                &[Message::system(INTEGRATOR_SYSTEM), Message::user(prompt)],
                &usage,
            )
            .await
        {
            Ok(response) => response.content,
            Err(e) => {
                warn!(error = %e, "integration failed, concatenating sources");
                state.add_error(
                    self.name(),
                    format!("정보 통합 오류: {}", e),
                    "processing_error",
                    json!({}),
                );
                blocks.join("\n\n")
            }
        };

        finish(
            &mut state,
            "knowledge_integrator",
            ProcessingStatus::Completed,
            json!({"integrated_knowledge": integrated, "source_count": blocks.len()}),
            None,
            started_at,
            &model_name,
            &provider,
        );
        Ok(state)
    }
}
