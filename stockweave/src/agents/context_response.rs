//! Context response agent: answers follow-up questions from the previous
//! turn's results, without new retrieval.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use crate::error::AgentError;
use crate::llm::AgentLlm;
use crate::message::Message;
use crate::prompts::CONTEXT_RESPONSE_SYSTEM;
use crate::state::{AgentState, ProcessingStatus};

use super::{finish, usage_from_state, Agent};

/// Answers follow-ups from the prior `agent_results` context.
pub struct ContextResponseAgent {
    agent_llm: Arc<AgentLlm>,
}

impl ContextResponseAgent {
    pub fn new(agent_llm: Arc<AgentLlm>) -> Self {
        Self { agent_llm }
    }

    /// Previous-turn context carried into this request: earlier summaries and
    /// per-agent narratives.
    fn prior_context(state: &AgentState) -> String {
        let mut parts = Vec::new();
        if let Some(summary) = &state.summary {
            parts.push(format!("이전 요약:\n{}", summary));
        }
        for (agent, result) in &state.agent_results {
            if agent == "context_response" {
                continue;
            }
            if let Some(text) = result
                .data
                .get("integrated_knowledge")
                .or_else(|| result.data.get("summary_text"))
                .or_else(|| result.data.get("analysis"))
                .and_then(|v| v.as_str())
            {
                if !text.is_empty() {
                    parts.push(format!("[{}]\n{}", agent, text));
                }
            }
        }
        parts.join("\n\n")
    }
}

#[async_trait]
impl Agent for ContextResponseAgent {
    fn name(&self) -> &str {
        "context_response"
    }

    async fn process(&self, mut state: AgentState) -> Result<AgentState, AgentError> {
        let started_at = Utc::now();
        state.update_processing_status(self.name(), ProcessingStatus::Processing);
        let model_name = self.agent_llm.model_name();
        let provider = self.agent_llm.provider();

        let context = Self::prior_context(&state);
        if context.is_empty() {
            state.add_error(
                self.name(),
                "이전 대화 컨텍스트가 없습니다.",
                "processing_error",
                json!({}),
            );
            finish(
                &mut state,
                "context_response",
                ProcessingStatus::CompletedNoData,
                json!({"response": ""}),
                None,
                started_at,
                &model_name,
                &provider,
            );
            return Ok(state);
        }

        let usage = usage_from_state(&state);
        let response = self
            .agent_llm
            .invoke_with_fallback(
                &[
                    Message::system(CONTEXT_RESPONSE_SYSTEM),
                    Message::user(format!("{}\n\n후속 질문: {}", context, state.query)),
                ],
                &usage,
            )
            .await?;

        finish(
            &mut state,
            "context_response",
            ProcessingStatus::Completed,
            json!({"response": response.content}),
            None,
            started_at,
            &model_name,
            &provider,
        );
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::finish as finish_result;
    use crate::agents::test_support::mock_agent_llm;

    /// **Scenario**: a follow-up with prior results produces a response from
    /// context alone.
    #[tokio::test]
    async fn answers_from_prior_results() {
        let mut state = AgentState::new("sess", "추가 매수 고려 시 체크포인트는?");
        state.is_follow_up = true;
        finish_result(
            &mut state,
            "knowledge_integrator",
            ProcessingStatus::Completed,
            json!({"integrated_knowledge": "직전 분석: 실적 개선, 목표가 95,000원"}),
            None,
            Utc::now(),
            "m",
            "mock",
        );

        let agent = ContextResponseAgent::new(mock_agent_llm(
            "context_response",
            "체크포인트는 실적 가이던스와 수급입니다.",
        ));
        let state = agent.process(state).await.unwrap();
        assert_eq!(
            state.agent_results["context_response"].data["response"],
            "체크포인트는 실적 가이던스와 수급입니다."
        );
        assert_eq!(
            state.processing_status["context_response"],
            ProcessingStatus::Completed
        );
    }

    /// **Scenario**: no prior context → completed_no_data with an error entry.
    #[tokio::test]
    async fn missing_context_is_no_data() {
        let agent = ContextResponseAgent::new(mock_agent_llm("context_response", "무시"));
        let state = agent
            .process(AgentState::new("sess", "후속 질문"))
            .await
            .unwrap();
        assert_eq!(
            state.processing_status["context_response"],
            ProcessingStatus::CompletedNoData
        );
        assert_eq!(state.errors.len(), 1);
    }
}
