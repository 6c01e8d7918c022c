//! Question analyzer: entities, intent classification, data requirements.
//!
//! First LLM call of every request. The structured-output wrapper parses
//! the model's JSON directly into [`QuestionAnalysis`]; a parse failure
//! degrades to a default analysis (all sources on) so retrieval still runs.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use crate::error::AgentError;
use crate::llm::{AgentLlm, StructuredResponse};
use crate::message::Message;
use crate::prompts::{QUESTION_ANALYSIS_SCHEMA, QUESTION_ANALYZER_SYSTEM};
use crate::state::{AgentState, DataRequirements, ProcessingStatus, QuestionAnalysis};

use super::{finish, usage_from_state, Agent};

/// Emits `question_analysis` from the user query.
pub struct QuestionAnalyzer {
    agent_llm: Arc<AgentLlm>,
}

impl QuestionAnalyzer {
    pub fn new(agent_llm: Arc<AgentLlm>) -> Self {
        Self { agent_llm }
    }
}

#[async_trait]
impl Agent for QuestionAnalyzer {
    fn name(&self) -> &str {
        "question_analyzer"
    }

    async fn process(&self, mut state: AgentState) -> Result<AgentState, AgentError> {
        let started_at = Utc::now();
        state.update_processing_status(self.name(), ProcessingStatus::Processing);
        let model_name = self.agent_llm.model_name();
        let provider = self.agent_llm.provider();

        if state.query.trim().is_empty() {
            state.add_error(self.name(), "검색 쿼리가 제공되지 않았습니다.", "processing_error", json!({}));
            finish(
                &mut state,
                "question_analyzer",
                ProcessingStatus::Failed,
                json!({}),
                Some("empty query".to_string()),
                started_at,
                &model_name,
                &provider,
            );
            return Ok(state);
        }

        // Follow-up turns reuse the prior analysis context; no retrieval.
        if state.is_follow_up {
            let mut analysis = state.analysis();
            analysis.data_requirements = DataRequirements::none();
            state.question_analysis = Some(analysis);
            finish(
                &mut state,
                "question_analyzer",
                ProcessingStatus::Completed,
                json!({"follow_up": true}),
                None,
                started_at,
                &model_name,
                &provider,
            );
            return Ok(state);
        }

        let mut user_prompt = format!("질문: {}", state.query);
        if let Some(code) = &state.stock_code {
            user_prompt.push_str(&format!("\n종목코드: {}", code));
        }
        if let Some(name) = &state.stock_name {
            user_prompt.push_str(&format!("\n종목명: {}", name));
        }

        let structured = self
            .agent_llm
            .structured::<QuestionAnalysis>(QUESTION_ANALYSIS_SCHEMA);
        let usage = usage_from_state(&state);
        let response = structured
            .invoke(
                vec![
                    Message::system(QUESTION_ANALYZER_SYSTEM),
                    Message::user(user_prompt),
                ],
                &usage,
            )
            .await?;

        let analysis = match response {
            StructuredResponse::Parsed { mut value, .. } => {
                // The request's own entity fields back-fill missing ones.
                if value.entities.stock_code.is_none() {
                    value.entities.stock_code = state.stock_code.clone();
                }
                if value.entities.stock_name.is_none() {
                    value.entities.stock_name = state.stock_name.clone();
                }
                info!(
                    intent = ?value.classification.primary_intent,
                    complexity = ?value.classification.complexity,
                    "question analyzed"
                );
                value
            }
            StructuredResponse::Raw(_) => {
                warn!("question analysis parse failed, defaulting to full retrieval");
                QuestionAnalysis {
                    data_requirements: DataRequirements::all(),
                    ..Default::default()
                }
            }
        };

        let data = serde_json::to_value(&analysis).unwrap_or_else(|_| json!({}));
        state.question_analysis = Some(analysis);
        finish(
            &mut state,
            "question_analyzer",
            ProcessingStatus::Completed,
            data,
            None,
            started_at,
            &model_name,
            &provider,
        );
        Ok(state)
    }
}
