//! Telegram message retriever: widened query, three-way parallel search,
//! dedup, rerank, time-decay scoring, summary.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::AgentError;
use crate::llm::AgentLlm;
use crate::message::Message;
use crate::prompts::TELEGRAM_SUMMARY_SYSTEM;
use crate::retriever::rerank::RerankModel;
use crate::retriever::scoring;
use crate::retriever::{SemanticRetriever, SemanticRetrieverConfig};
use crate::state::{AgentState, PrimaryIntent, ProcessingStatus, SourceHit};
use crate::token_usage::UsageContext;
use crate::vector::{DocumentWithScore, MetadataFilter, VectorStoreManager};

use super::{finish, usage_from_state, Agent};

/// Key this agent owns under `retrieved_data`.
pub const TELEGRAM_SOURCE_KEY: &str = "telegram_messages";

/// Search breadth cap for the initial semantic pass.
const MAX_INITIAL_K: usize = 40;
/// Messages shorter than this are noise.
const MIN_CONTENT_LEN: usize = 20;

/// Foreign-securities desks whose commentary gets its own filtered pass.
const FOREIGN_SECURITIES: &[&str] = &[
    "골드만삭스",
    "모건스탠리",
    "JP모건",
    "메릴린치",
    "UBS",
    "씨티그룹",
    "크레디트스위스",
    "노무라",
    "다이와",
    "맥쿼리",
    "CLSA",
    "도이치뱅크",
    "BNP파리바",
    "HSBC",
];

/// Retrieves and scores telegram messages for the question.
pub struct TelegramRetriever {
    agent_llm: Arc<AgentLlm>,
    manager: Arc<VectorStoreManager>,
    reranker: Arc<dyn RerankModel>,
}

impl TelegramRetriever {
    pub fn new(
        agent_llm: Arc<AgentLlm>,
        manager: Arc<VectorStoreManager>,
        reranker: Arc<dyn RerankModel>,
    ) -> Self {
        Self {
            agent_llm,
            manager,
            reranker,
        }
    }

    /// Widens the raw query with entity names and intent-specific terms.
    fn make_search_query(state: &AgentState) -> String {
        let analysis = state.analysis();
        let mut parts = vec![state.query.clone()];
        if let Some(name) = state.effective_stock_name() {
            parts.push(name);
        }
        if let Some(code) = state.effective_stock_code() {
            parts.push(code);
        }
        if let Some(sector) = &analysis.entities.sector {
            parts.push(sector.clone());
        }
        let intent_terms = match analysis.classification.primary_intent {
            PrimaryIntent::BasicInfo => "기업 개요 사업",
            PrimaryIntent::Outlook => "실적 전망 목표가",
            PrimaryIntent::Financials => "재무 매출 영업이익",
            PrimaryIntent::Industry => "산업 업황 경쟁사",
            PrimaryIntent::Other => "",
        };
        if !intent_terms.is_empty() {
            parts.push(intent_terms.to_string());
        }
        parts.join(" ")
    }

    /// Union of the three searches, deduplicated by (channel_id, message_id).
    fn combine_results(result_sets: Vec<Vec<DocumentWithScore>>) -> Vec<DocumentWithScore> {
        let mut combined = Vec::new();
        let mut seen_ids = HashSet::new();
        for documents in result_sets {
            for doc in documents {
                let doc_key = format!(
                    "{}_{}",
                    doc.metadata.get("channel_id").cloned().unwrap_or(Value::Null),
                    doc.metadata.get("message_id").cloned().unwrap_or(Value::Null),
                );
                if seen_ids.insert(doc_key) {
                    combined.push(doc);
                }
            }
        }
        combined
    }

    /// Length floor + normalized-content dedup.
    fn drop_noise_and_duplicates(documents: Vec<DocumentWithScore>) -> Vec<DocumentWithScore> {
        let mut seen_hashes = HashSet::new();
        documents
            .into_iter()
            .filter(|doc| doc.content.chars().count() >= MIN_CONTENT_LEN)
            .filter(|doc| seen_hashes.insert(scoring::content_hash(&doc.content)))
            .collect()
    }

    async fn search_messages(
        &self,
        state: &AgentState,
        search_query: &str,
        k: usize,
        threshold: f32,
        usage: &UsageContext,
    ) -> Result<Vec<SourceHit>, AgentError> {
        let analysis = state.analysis();
        let retriever = SemanticRetriever::new(
            SemanticRetrieverConfig {
                min_score: threshold,
                user_id: state.user_id,
                project_type: Some(super::PROJECT_TYPE.to_string()),
            },
            Arc::clone(&self.manager),
            usage.clone(),
        );
        let initial_k = (k * 3).min(MAX_INITIAL_K);

        let foreign_filter = MetadataFilter::new().any_of(
            "keywords",
            FOREIGN_SECURITIES.iter().map(|s| json!(s)).collect(),
        );

        let mut subgroup: Vec<String> = analysis.subgroup.clone();
        subgroup.extend(state.effective_stock_code());
        subgroup.extend(state.effective_stock_name());
        let subgroup_filter = (!subgroup.is_empty()).then(|| {
            MetadataFilter::new()
                .any_of("keywords", subgroup.iter().map(|s| json!(s)).collect())
        });

        // Three searches in parallel: unfiltered, foreign desks, subgroup.
        let (general, foreign, by_subgroup) = tokio::join!(
            retriever.retrieve(search_query, initial_k, None),
            retriever.retrieve(search_query, initial_k, Some(&foreign_filter)),
            async {
                match &subgroup_filter {
                    Some(filter) => retriever
                        .retrieve(search_query, initial_k, Some(filter))
                        .await
                        .map(Some),
                    None => Ok(None),
                }
            }
        );
        let general = general?;
        let foreign = foreign?;
        let by_subgroup = by_subgroup?;
        debug!(
            general = general.documents.len(),
            foreign = foreign.documents.len(),
            subgroup = by_subgroup.as_ref().map(|r| r.documents.len()).unwrap_or(0),
            "parallel telegram search complete"
        );

        let mut result_sets = vec![general.documents, foreign.documents];
        if let Some(result) = by_subgroup {
            result_sets.push(result.documents);
        }
        let combined = Self::combine_results(result_sets);
        if combined.is_empty() {
            return Ok(Vec::new());
        }

        let deduplicated = Self::drop_noise_and_duplicates(combined);
        let reranked = self
            .reranker
            .rerank(search_query, &deduplicated, k)
            .await?;
        info!(
            before = deduplicated.len(),
            after = reranked.len(),
            "telegram rerank complete"
        );

        let now = Utc::now();
        let mut hits: Vec<SourceHit> = reranked
            .into_iter()
            .map(|doc| {
                let created_at = scoring::parse_message_timestamp(
                    doc.metadata
                        .get("message_created_at")
                        .unwrap_or(&Value::Null),
                    now,
                );
                let weight = scoring::time_weight(created_at, now);
                let importance = scoring::message_importance(&doc.content);
                let mut metadata = doc.metadata.clone();
                if let Some(obj) = metadata.as_object_mut() {
                    obj.insert("importance".to_string(), json!(importance));
                }
                SourceHit::Message {
                    content: doc.content,
                    message_created_at: created_at,
                    final_score: scoring::final_score(doc.score as f64, weight),
                    normalized_score: 0.0,
                    metadata,
                }
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score()
                .partial_cmp(&a.score())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(k);

        let mut scores: Vec<f64> = hits.iter().map(|h| h.score()).collect();
        scoring::normalize_scores(&mut scores);
        for (hit, normalized) in hits.iter_mut().zip(scores) {
            if let SourceHit::Message {
                normalized_score, ..
            } = hit
            {
                *normalized_score = normalized;
            }
        }
        Ok(hits)
    }

    async fn summarize(
        &self,
        state: &AgentState,
        hits: &[SourceHit],
        usage: &UsageContext,
    ) -> String {
        let evidence: Vec<String> = hits
            .iter()
            .filter_map(|h| h.content())
            .enumerate()
            .map(|(i, content)| format!("[{}] {}", i + 1, content))
            .collect();
        let system = state
            .custom_prompt_template
            .clone()
            .unwrap_or_else(|| TELEGRAM_SUMMARY_SYSTEM.to_string());
        let prompt = format!("질문: {}\n\n검색된 메시지:\n{}", state.query, evidence.join("\n"));
        match self
            .agent_llm
            .invoke_with_fallback(&[Message::system(system), Message::user(prompt)], usage)
            .await
        {
            Ok(response) => response.content,
            Err(e) => {
                warn!(error = %e, "telegram summary failed, returning evidence only");
                String::new()
            }
        }
    }
}

#[async_trait]
impl Agent for TelegramRetriever {
    fn name(&self) -> &str {
        "telegram_retriever"
    }

    async fn process(&self, mut state: AgentState) -> Result<AgentState, AgentError> {
        let started_at = Utc::now();
        state.update_processing_status(self.name(), ProcessingStatus::Processing);
        let model_name = self.agent_llm.model_name();
        let provider = self.agent_llm.provider();
        let analysis = state.analysis();

        if !analysis.data_requirements.telegram_needed {
            state
                .retrieved_data
                .insert(TELEGRAM_SOURCE_KEY.to_string(), Vec::new());
            finish(
                &mut state,
                "telegram_retriever",
                ProcessingStatus::CompletedNoData,
                json!({"skipped": true}),
                None,
                started_at,
                &model_name,
                &provider,
            );
            return Ok(state);
        }

        if state.query.trim().is_empty() {
            state.add_error(self.name(), "검색 쿼리가 제공되지 않았습니다.", "processing_error", json!({}));
            state
                .retrieved_data
                .insert(TELEGRAM_SOURCE_KEY.to_string(), Vec::new());
            finish(
                &mut state,
                "telegram_retriever",
                ProcessingStatus::Failed,
                json!({"summary_text": "검색 쿼리 없음"}),
                Some("empty query".to_string()),
                started_at,
                &model_name,
                &provider,
            );
            return Ok(state);
        }

        let threshold = analysis.classification.complexity.min_score();
        let k = analysis.classification.complexity.message_count();
        let search_query = Self::make_search_query(&state);
        let usage = usage_from_state(&state);

        let outcome = self
            .search_messages(&state, &search_query, k, threshold, &usage)
            .await;
        let hits = match outcome {
            Ok(hits) => hits,
            Err(e) => {
                state.add_error(
                    self.name(),
                    format!("텔레그램 메시지 검색 에이전트 오류: {}", e),
                    "processing_error",
                    json!({"query": search_query}),
                );
                state
                    .retrieved_data
                    .insert(TELEGRAM_SOURCE_KEY.to_string(), Vec::new());
                finish(
                    &mut state,
                    "telegram_retriever",
                    ProcessingStatus::Error,
                    json!({"summary_text": ""}),
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
                .insert(TELEGRAM_SOURCE_KEY.to_string(), Vec::new());
            finish(
                &mut state,
                "telegram_retriever",
                ProcessingStatus::CompletedNoData,
                json!({"summary_text": "", "message_count": 0, "threshold": threshold}),
                None,
                started_at,
                &model_name,
                &provider,
            );
            return Ok(state);
        }

        let summary = self.summarize(&state, &hits, &usage).await;
        let data = json!({
            "summary_text": summary,
            "message_count": hits.len(),
            "threshold": threshold,
        });
        state
            .retrieved_data
            .insert(TELEGRAM_SOURCE_KEY.to_string(), hits);
        finish(
            &mut state,
            "telegram_retriever",
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::test_support::{analyzed_state, mock_agent_llm};
    use crate::embedding::test_support::FakeProvider;
    use crate::retriever::MockReranker;
    use crate::vector::{InMemoryVectorStore, VectorRecord, VectorStore};

    async fn manager_with_messages(messages: Vec<(&str, &str, Value)>) -> Arc<VectorStoreManager> {
        let store = Arc::new(InMemoryVectorStore::new());
        store
            .upsert(
                "telegram",
                messages
                    .into_iter()
                    .map(|(id, content, metadata)| VectorRecord {
                        id: id.to_string(),
                        content: content.to_string(),
                        vector: vec![1.0, 1.0, 0.0],
                        metadata,
                    })
                    .collect(),
            )
            .await
            .unwrap();
        Arc::new(VectorStoreManager::new(
            store,
            Arc::new(FakeProvider::new(1000)),
            "telegram",
        ))
    }

    fn retriever(manager: Arc<VectorStoreManager>) -> TelegramRetriever {
        TelegramRetriever::new(
            mock_agent_llm("telegram_retriever", "최근 실적 관련 메시지 요약"),
            manager,
            Arc::new(MockReranker::identity()),
        )
    }

    fn message_meta(channel: i64, message: i64, created: &str) -> Value {
        json!({
            "channel_id": channel,
            "message_id": message,
            "message_created_at": created,
        })
    }

    /// **Scenario**: happy path — hits retrieved, reranked, scored and the
    /// summary recorded; status completed.
    #[tokio::test]
    async fn retrieves_and_scores_messages() {
        let recent = Utc::now().to_rfc3339();
        let manager = manager_with_messages(vec![
            (
                "m1",
                "삼성전자 3분기 실적이 시장 기대치를 상회했다는 발표가 나왔습니다",
                message_meta(1, 1, &recent),
            ),
            (
                "m2",
                "외국계 증권사 목표가 상향 리포트가 공유되었습니다 참고하세요",
                message_meta(1, 2, &recent),
            ),
        ])
        .await;
        let state = retriever(manager)
            .process(analyzed_state("삼성전자 실적 어때?"))
            .await
            .unwrap();

        assert_eq!(
            state.processing_status["telegram_retriever"],
            ProcessingStatus::Completed
        );
        let hits = &state.retrieved_data[TELEGRAM_SOURCE_KEY];
        assert!(!hits.is_empty());
        for hit in hits {
            match hit {
                SourceHit::Message { final_score, metadata, .. } => {
                    assert!(*final_score > 0.0);
                    assert!(metadata.get("importance").is_some());
                }
                other => panic!("expected message hit, got {:?}", other),
            }
        }
        let data = &state.agent_results["telegram_retriever"].data;
        assert_eq!(data["summary_text"], "최근 실적 관련 메시지 요약");
    }

    /// **Scenario**: duplicate content (same 200-char normalized prefix) and
    /// sub-20-char noise are dropped.
    #[tokio::test]
    async fn dedup_and_noise_filter() {
        let recent = Utc::now().to_rfc3339();
        let long_body = "삼성전자 반도체 부문 영업이익이 큰 폭으로 개선되었다는 소식입니다 ".repeat(5);
        let manager = manager_with_messages(vec![
            ("m1", &long_body, message_meta(1, 1, &recent)),
            // Same normalized prefix, different message id.
            (
                "m2",
                &format!("{}  ", long_body.to_uppercase()),
                message_meta(1, 2, &recent),
            ),
            ("m3", "ㅎㅇ", message_meta(1, 3, &recent)),
        ])
        .await;
        let state = retriever(manager)
            .process(analyzed_state("삼성전자 실적"))
            .await
            .unwrap();
        assert_eq!(state.retrieved_data[TELEGRAM_SOURCE_KEY].len(), 1);
    }

    /// **Scenario**: flag off → completed_no_data without a search.
    #[tokio::test]
    async fn skips_when_flag_off() {
        let manager = manager_with_messages(vec![]).await;
        let mut state = analyzed_state("질문");
        state
            .question_analysis
            .as_mut()
            .unwrap()
            .data_requirements
            .telegram_needed = false;
        let state = retriever(manager).process(state).await.unwrap();
        assert_eq!(
            state.processing_status["telegram_retriever"],
            ProcessingStatus::CompletedNoData
        );
        assert!(state.retrieved_data[TELEGRAM_SOURCE_KEY].is_empty());
    }

    /// **Scenario**: zero hits → completed_no_data with an empty entry.
    #[tokio::test]
    async fn empty_retrieval_is_no_data() {
        let manager = manager_with_messages(vec![]).await;
        let state = retriever(manager)
            .process(analyzed_state("아무도 언급 안 한 종목"))
            .await
            .unwrap();
        assert_eq!(
            state.processing_status["telegram_retriever"],
            ProcessingStatus::CompletedNoData
        );
    }
}
