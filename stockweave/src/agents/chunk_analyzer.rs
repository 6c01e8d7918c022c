//! Report / confidential-note analyzer: retrieval + rerank + twin LLM pass.
//!
//! One implementation, two profiles: analyst reports (provider-filtered
//! corporate reports) and confidential notes. After retrieval the agent
//! runs two prompts in parallel — a narrative analysis and an opinion
//! extraction whose reply is scanned for 투자의견 / 목표가격 lines.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::error::AgentError;
use crate::llm::AgentLlm;
use crate::message::Message;
use crate::prompts::{
    CONFIDENTIAL_ANALYSIS_SYSTEM, OPINION_EXTRACTION_SYSTEM, REPORT_ANALYSIS_SYSTEM,
};
use crate::retriever::rerank::RerankModel;
use crate::retriever::scoring;
use crate::retriever::{SemanticRetriever, SemanticRetrieverConfig};
use crate::state::{AgentState, ProcessingStatus, SourceHit};
use crate::token_usage::UsageContext;
use crate::vector::{MetadataFilter, VectorStoreManager};

use super::{finish, usage_from_state, Agent};

static OPINION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(투자\s*의견|투자의견)\s*:\s*([^\n,]+)").expect("opinion regex"));
static TARGET_PRICE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(목표\s*가격|목표가|목표\s*주가)\s*:\s*([\d,]+)").expect("price regex"));

/// Source profile: what corpus this analyzer reads.
#[derive(Clone, Debug)]
pub struct ChunkProfile {
    /// Agent name ("report_analyzer" / "confidential_analyzer").
    pub agent_name: &'static str,
    /// Key owned under `retrieved_data`.
    pub source_key: &'static str,
    /// Label stamped on each hit's `source`.
    pub source_label: String,
    /// Fixed provider filters (report_type, report_provider, ...).
    pub base_filter: Vec<(String, Value)>,
    pub analysis_system: &'static str,
}

impl ChunkProfile {
    /// Corporate analyst reports from the 인텔리오 feed.
    pub fn report() -> Self {
        Self {
            agent_name: "report_analyzer",
            source_key: "report_chunks",
            source_label: "기업리포트".to_string(),
            base_filter: vec![
                ("report_type".to_string(), json!("기업리포트")),
                ("report_provider".to_string(), json!("인텔리오")),
            ],
            analysis_system: REPORT_ANALYSIS_SYSTEM,
        }
    }

    /// Confidential internal notes.
    pub fn confidential() -> Self {
        Self {
            agent_name: "confidential_analyzer",
            source_key: "confidential_chunks",
            source_label: "비공개자료".to_string(),
            base_filter: Vec::new(),
            analysis_system: CONFIDENTIAL_ANALYSIS_SYSTEM,
        }
    }
}

/// Extracted broker stance for one source document.
#[derive(Clone, Debug, serde::Serialize)]
pub struct ExtractedOpinion {
    pub investment_opinion: Option<String>,
    pub target_price: Option<String>,
}

/// Scans the opinion prompt's reply for 투자의견 / 목표가격 lines.
pub(crate) fn extract_opinion(text: &str) -> ExtractedOpinion {
    ExtractedOpinion {
        investment_opinion: OPINION
            .captures(text)
            .map(|caps| caps[2].trim().to_string()),
        target_price: TARGET_PRICE.captures(text).map(|caps| caps[2].to_string()),
    }
}

/// Retrieval + twin-prompt analysis over one chunk corpus.
pub struct ChunkAnalyzer {
    profile: ChunkProfile,
    agent_llm: Arc<AgentLlm>,
    manager: Arc<VectorStoreManager>,
    reranker: Arc<dyn RerankModel>,
}

impl ChunkAnalyzer {
    pub fn new(
        profile: ChunkProfile,
        agent_llm: Arc<AgentLlm>,
        manager: Arc<VectorStoreManager>,
        reranker: Arc<dyn RerankModel>,
    ) -> Self {
        Self {
            profile,
            agent_llm,
            manager,
            reranker,
        }
    }

    fn gate_open(&self, state: &AgentState) -> bool {
        let requirements = &state.analysis().data_requirements;
        match self.profile.agent_name {
            "report_analyzer" => requirements.reports_needed,
            _ => requirements.confidential_needed,
        }
    }

    fn build_filter(&self, state: &AgentState) -> MetadataFilter {
        let mut filter = MetadataFilter::new();
        for (field, value) in &self.profile.base_filter {
            filter = filter.eq(field.clone(), value.clone());
        }
        if let Some(code) = state.effective_stock_code() {
            filter = filter.eq("stock_code", code);
        } else if let Some(name) = state.effective_stock_name() {
            filter = filter.eq("stock_name", name);
        }
        let analysis = state.analysis();
        if let Some((start, end)) =
            scoring::time_range_from_keywords(&analysis.keywords, Utc::now().date_naive())
        {
            filter = filter.range("publish_date", Some(json!(start)), Some(json!(end)));
        }
        filter
    }

    async fn retrieve_chunks(
        &self,
        state: &AgentState,
        usage: &UsageContext,
    ) -> Result<Vec<SourceHit>, AgentError> {
        let analysis = state.analysis();
        let k = analysis.classification.complexity.report_count();
        let threshold = analysis.classification.complexity.min_score();
        let filter = self.build_filter(state);

        let retriever = SemanticRetriever::new(
            SemanticRetrieverConfig {
                min_score: threshold,
                user_id: state.user_id,
                project_type: Some(super::PROJECT_TYPE.to_string()),
            },
            Arc::clone(&self.manager),
            usage.clone(),
        );
        // Over-fetch 4× for dedup + rerank headroom.
        let result = retriever.retrieve(&state.query, k * 4, Some(&filter)).await?;

        let mut seen_hashes = HashSet::new();
        let deduplicated: Vec<_> = result
            .documents
            .into_iter()
            .filter(|doc| seen_hashes.insert(scoring::content_hash(&doc.content)))
            .collect();
        if deduplicated.is_empty() {
            return Ok(Vec::new());
        }

        let rerank_k = (k as f64 * 1.5) as usize;
        let reranked = self
            .reranker
            .rerank(&state.query, &deduplicated, rerank_k)
            .await?;
        info!(
            agent = self.profile.agent_name,
            before = deduplicated.len(),
            after = reranked.len(),
            "chunk rerank complete"
        );

        Ok(reranked
            .into_iter()
            .map(|doc| {
                let meta = &doc.metadata;
                let get = |key: &str| meta.get(key).and_then(|v| v.as_str()).map(String::from);
                SourceHit::Chunk {
                    content: doc.content,
                    score: doc.score as f64,
                    source: self.profile.source_label.clone(),
                    publish_date: get("publish_date"),
                    file_name: get("file_name"),
                    page: meta.get("page").and_then(|v| v.as_u64()).map(|p| p as u32),
                    stock_code: get("stock_code"),
                    stock_name: get("stock_name"),
                    sector_name: get("sector_name"),
                    keyword_list: meta
                        .get("keywords")
                        .and_then(|v| v.as_array())
                        .map(|arr| {
                            arr.iter()
                                .filter_map(|v| v.as_str().map(String::from))
                                .collect()
                        })
                        .unwrap_or_default(),
                }
            })
            .collect())
    }

    /// Twin prompts in parallel: narrative analysis + opinion extraction.
    async fn analyze(
        &self,
        state: &AgentState,
        hits: &[SourceHit],
        usage: &UsageContext,
    ) -> (String, ExtractedOpinion) {
        let evidence: Vec<String> = hits
            .iter()
            .filter_map(|h| h.content())
            .enumerate()
            .map(|(i, c)| format!("[발췌 {}] {}", i + 1, c))
            .collect();
        let evidence = evidence.join("\n\n");
        let analysis_prompt = format!("질문: {}\n\n{}", state.query, evidence);
        let opinion_prompt = format!("발췌:\n{}", evidence);

        let analysis_messages = [
            Message::system(self.profile.analysis_system),
            Message::user(analysis_prompt),
        ];
        let opinion_messages = [
            Message::system(OPINION_EXTRACTION_SYSTEM),
            Message::user(opinion_prompt),
        ];
        let (analysis, opinion) = tokio::join!(
            self.agent_llm.invoke_with_fallback(&analysis_messages, usage),
            self.agent_llm.invoke_with_fallback(&opinion_messages, usage)
        );

        let narrative = match analysis {
            Ok(response) => response.content,
            Err(e) => {
                warn!(agent = self.profile.agent_name, error = %e, "analysis prompt failed");
                String::new()
            }
        };
        let extracted = match opinion {
            Ok(response) => extract_opinion(&response.content),
            Err(e) => {
                warn!(agent = self.profile.agent_name, error = %e, "opinion prompt failed");
                ExtractedOpinion {
                    investment_opinion: None,
                    target_price: None,
                }
            }
        };
        (narrative, extracted)
    }
}

#[async_trait]
impl Agent for ChunkAnalyzer {
    fn name(&self) -> &str {
        self.profile.agent_name
    }

    async fn process(&self, mut state: AgentState) -> Result<AgentState, AgentError> {
        let started_at = Utc::now();
        let name = self.profile.agent_name;
        state.update_processing_status(name, ProcessingStatus::Processing);
        let model_name = self.agent_llm.model_name();
        let provider = self.agent_llm.provider();

        if !self.gate_open(&state) {
            state
                .retrieved_data
                .insert(self.profile.source_key.to_string(), Vec::new());
            finish(
                &mut state,
                name,
                ProcessingStatus::CompletedNoData,
                json!({"skipped": true}),
                None,
                started_at,
                &model_name,
                &provider,
            );
            return Ok(state);
        }

        let usage = usage_from_state(&state);
        let hits = match self.retrieve_chunks(&state, &usage).await {
            Ok(hits) => hits,
            Err(e) => {
                state.add_error(
                    name,
                    format!("{} 검색 오류: {}", self.profile.source_label, e),
                    "processing_error",
                    json!({}),
                );
                state
                    .retrieved_data
                    .insert(self.profile.source_key.to_string(), Vec::new());
                finish(
                    &mut state,
                    name,
                    ProcessingStatus::Error,
                    json!({}),
                    Some(e.to_string()),
                    started_at,
                    &model_name,
                    &provider,
                );
                return Ok(state);
            }
        };

        if hits.is_empty() {
            state
                .retrieved_data
                .insert(self.profile.source_key.to_string(), Vec::new());
            finish(
                &mut state,
                name,
                ProcessingStatus::CompletedNoData,
                json!({"chunk_count": 0}),
                None,
                started_at,
                &model_name,
                &provider,
            );
            return Ok(state);
        }

        let (narrative, opinion) = self.analyze(&state, &hits, &usage).await;
        let data = json!({
            "analysis": narrative,
            "investment_opinion": opinion.investment_opinion,
            "target_price": opinion.target_price,
            "chunk_count": hits.len(),
        });
        state
            .retrieved_data
            .insert(self.profile.source_key.to_string(), hits);
        finish(
            &mut state,
            name,
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
