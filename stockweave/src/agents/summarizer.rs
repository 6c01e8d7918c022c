//! Summarizer: produces the report summary and optional per-section texts.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use serde_json::json;
use tracing::warn;

use crate::error::AgentError;
use crate::llm::AgentLlm;
use crate::message::Message;
use crate::prompts::{NO_DATA_MESSAGE, SUMMARIZER_SYSTEM};
use crate::state::{AgentState, ProcessingStatus};

use super::{finish, usage_from_state, Agent};

/// Produces `summary` and `summary_by_section`.
pub struct Summarizer {
    agent_llm: Arc<AgentLlm>,
}

impl Summarizer {
    pub fn new(agent_llm: Arc<AgentLlm>) -> Self {
        Self { agent_llm }
    }

    /// The narrative this request produced so far: follow-up response or
    /// integrated knowledge.
    fn base_narrative(state: &AgentState) -> Option<String> {
        if state.is_follow_up {
            if let Some(result) = state.agent_results.get("context_response") {
                if let Some(text) = result.data.get("response").and_then(|v| v.as_str()) {
                    if !text.is_empty() {
                        return Some(text.to_string());
                    }
                }
            }
        }
        state
            .agent_results
            .get("knowledge_integrator")
            .and_then(|r| r.data.get("integrated_knowledge"))
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(String::from)
    }
}

#[async_trait]
impl Agent for Summarizer {
    fn name(&self) -> &str {
        "summarizer"
    }

    async fn process(&self, mut state: AgentState) -> Result<AgentState, AgentError> {
        let started_at = Utc::now();
        state.update_processing_status(self.name(), ProcessingStatus::Processing);
        let model_name = self.agent_llm.model_name();
        let provider = self.agent_llm.provider();

        let Some(narrative) = Self::base_narrative(&state) else {
            state.summary = Some(NO_DATA_MESSAGE.to_string());
            finish(
                &mut state,
                "summarizer",
                ProcessingStatus::CompletedNoData,
                json!({"summary": NO_DATA_MESSAGE}),
                None,
                started_at,
                &model_name,
                &provider,
            );
            return Ok(state);
        };

        // No-data narrative passes through untouched.
        if narrative == NO_DATA_MESSAGE {
            state.summary = Some(narrative.clone());
            finish(
                &mut state,
                "summarizer",
                ProcessingStatus::CompletedNoData,
                json!({"summary": narrative}),
                None,
                started_at,
                &model_name,
                &provider,
            );
            return Ok(state);
        }

        let usage = usage_from_state(&state);
        let summary = match self
            .agent_llm
            .invoke_with_fallback(
                &[
                    Message::system(SUMMARIZER_SYSTEM),
                    Message::user(format!("질문: {}\n\n분석 내용:\n{}", state.query, narrative)),
                ],
                &usage,
            )
            .await
        {
            Ok(response) if !response.content.is_empty() => response.content,
            Ok(_) => narrative.clone(),
            Err(e) => {
                warn!(error = %e, "summary generation failed, using narrative");
                narrative.clone()
            }
        };

        // Per-section summaries when a TOC is present, in parallel.
        let mut summary_by_section = BTreeMap::new();
        if let Some(toc) = state.final_report_toc.clone() {
            let section_futures = toc.sections.iter().map(|section| {
                let agent_llm = Arc::clone(&self.agent_llm);
                let usage = usage.clone();
                let title = section.title.clone();
                let narrative = narrative.clone();
                async move {
                    let result = agent_llm
                        .invoke_with_fallback(
                            &[
                                Message::system(SUMMARIZER_SYSTEM),
                                Message::user(format!(
                                    "다음 분석 내용 중 \"{}\" 섹션에 해당하는 내용만 요약하세요.\n\n{}",
                                    title, narrative
                                )),
                            ],
                            &usage,
                        )
                        .await;
                    (title, result)
                }
            });
            for (title, result) in join_all(section_futures).await {
                match result {
                    Ok(response) if !response.content.is_empty() => {
                        summary_by_section.insert(title, response.content);
                    }
                    Ok(_) => {}
                    Err(e) => warn!(section = %title, error = %e, "section summary failed"),
                }
            }
        }

        state.summary = Some(summary.clone());
        state.summary_by_section = summary_by_section.clone();
        finish(
            &mut state,
            "summarizer",
            ProcessingStatus::Completed,
            json!({"summary": summary, "section_count": summary_by_section.len()}),
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
    use crate::agents::test_support::{analyzed_state, mock_agent_llm};
    use crate::state::{ReportToc, TocSection};

    fn with_integrated(narrative: &str) -> AgentState {
        let mut state = analyzed_state("삼성전자 분석");
        finish_result(
            &mut state,
            "knowledge_integrator",
            ProcessingStatus::Completed,
            json!({"integrated_knowledge": narrative}),
            None,
            Utc::now(),
            "m",
            "mock",
        );
        state
    }

    /// **Scenario**: summary set from the LLM; per-section texts produced
    /// for each TOC section.
    #[tokio::test]
    async fn summary_and_sections() {
        let mut state = with_integrated("통합 분석 본문");
        state.final_report_toc = Some(ReportToc {
            title: "삼성전자 분석 보고서".to_string(),
            sections: vec![
                TocSection {
                    section_id: "s1".to_string(),
                    title: "1. 개요".to_string(),
                    subsections: vec![],
                },
                TocSection {
                    section_id: "s2".to_string(),
                    title: "2. 전망".to_string(),
                    subsections: vec![],
                },
            ],
        });

        let summarizer = Summarizer::new(mock_agent_llm("summarizer", "섹션 요약 텍스트"));
        let state = summarizer.process(state).await.unwrap();
        assert_eq!(state.summary.as_deref(), Some("섹션 요약 텍스트"));
        assert_eq!(state.summary_by_section.len(), 2);
        assert!(state.summary_by_section.contains_key("1. 개요"));
    }

    /// **Scenario**: no integrator output → the fixed no-data summary.
    #[tokio::test]
    async fn missing_narrative_yields_no_data_summary() {
        let summarizer = Summarizer::new(mock_agent_llm("summarizer", "무시"));
        let state = summarizer.process(analyzed_state("질문")).await.unwrap();
        assert_eq!(state.summary.as_deref(), Some(NO_DATA_MESSAGE));
        assert_eq!(
            state.processing_status["summarizer"],
            ProcessingStatus::CompletedNoData
        );
    }

    /// **Scenario**: follow-ups summarize the context response instead.
    #[tokio::test]
    async fn follow_up_uses_context_response() {
        let mut state = analyzed_state("추가 질문");
        state.is_follow_up = true;
        finish_result(
            &mut state,
            "context_response",
            ProcessingStatus::Completed,
            json!({"response": "직전 답변 기반 응답"}),
            None,
            Utc::now(),
            "m",
            "mock",
        );
        let summarizer = Summarizer::new(mock_agent_llm("summarizer", "후속 요약"));
        let state = summarizer.process(state).await.unwrap();
        assert_eq!(state.summary.as_deref(), Some("후속 요약"));
    }
}
