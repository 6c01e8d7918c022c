//! Second-stage reranking of candidate hits.
//!
//! [`RerankModel`] is the provider seam; [`PineconeReranker`] calls the
//! hosted Pinecone rerank endpoint, [`MockReranker`] scripts scores for
//! tests. [`Reranker`] is the owned wrapper agents use (construct, rerank,
//! `aclose`).

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::vector::DocumentWithScore;

use super::RetrievalError;

/// Default hosted rerank model.
const DEFAULT_RERANK_MODEL: &str = "bge-reranker-v2-m3";
const PINECONE_RERANK_URL: &str = "https://api.pinecone.io/rerank";

/// Cross-encoder-like re-scoring provider.
#[async_trait]
pub trait RerankModel: Send + Sync {
    /// Re-scores `documents` against `query`, returning the top `top_k` in
    /// rerank order with new scores.
    async fn rerank(
        &self,
        query: &str,
        documents: &[DocumentWithScore],
        top_k: usize,
    ) -> Result<Vec<DocumentWithScore>, RetrievalError>;
}

/// Reranker configuration: provider plus score floor.
#[derive(Clone, Debug)]
pub struct RerankerConfig {
    pub model: String,
    pub api_key: String,
    /// Hits below this rerank score are dropped.
    pub min_score: f32,
}

impl RerankerConfig {
    pub fn pinecone(api_key: impl Into<String>, min_score: f32) -> Self {
        Self {
            model: DEFAULT_RERANK_MODEL.to_string(),
            api_key: api_key.into(),
            min_score,
        }
    }
}

/// Hosted Pinecone rerank endpoint.
pub struct PineconeReranker {
    http: reqwest::Client,
    config: RerankerConfig,
}

impl PineconeReranker {
    pub fn new(config: RerankerConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl RerankModel for PineconeReranker {
    async fn rerank(
        &self,
        query: &str,
        documents: &[DocumentWithScore],
        top_k: usize,
    ) -> Result<Vec<DocumentWithScore>, RetrievalError> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }
        let body = json!({
            "model": self.config.model,
            "query": query,
            "top_n": top_k,
            "documents": documents
                .iter()
                .map(|d| json!({"id": d.id, "text": d.content}))
                .collect::<Vec<_>>(),
        });

        let response = self
            .http
            .post(PINECONE_RERANK_URL)
            .header("Api-Key", &self.config.api_key)
            .header("X-Pinecone-API-Version", "2024-10")
            .json(&body)
            .send()
            .await
            .map_err(|e| RetrievalError::Rerank(e.to_string()))?;

        let status = response.status();
        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| RetrievalError::Rerank(e.to_string()))?;
        if !status.is_success() {
            return Err(RetrievalError::Rerank(format!("{} {}", status, payload)));
        }

        let rows = payload["data"]
            .as_array()
            .ok_or_else(|| RetrievalError::Rerank("data missing in rerank response".to_string()))?;

        let mut reranked = Vec::new();
        for row in rows {
            let index = row["index"].as_u64().unwrap_or(u64::MAX) as usize;
            let score = row["score"].as_f64().unwrap_or(0.0) as f32;
            if score < self.config.min_score {
                continue;
            }
            if let Some(doc) = documents.get(index) {
                let mut doc = doc.clone();
                doc.score = score;
                reranked.push(doc);
            }
        }
        debug!(input = documents.len(), output = reranked.len(), "rerank complete");
        Ok(reranked)
    }
}

/// Scripted reranker for tests: reverses or keeps order, applies supplied
/// scores.
pub struct MockReranker {
    /// Scores applied positionally to the input (missing → keep original).
    pub scores: Vec<f32>,
    pub min_score: f32,
}

impl MockReranker {
    /// Identity reranker: keeps order and scores.
    pub fn identity() -> Self {
        Self {
            scores: Vec::new(),
            min_score: 0.0,
        }
    }

    pub fn with_scores(scores: Vec<f32>) -> Self {
        Self {
            scores,
            min_score: 0.0,
        }
    }
}

#[async_trait]
impl RerankModel for MockReranker {
    async fn rerank(
        &self,
        _query: &str,
        documents: &[DocumentWithScore],
        top_k: usize,
    ) -> Result<Vec<DocumentWithScore>, RetrievalError> {
        let mut scored: Vec<DocumentWithScore> = documents
            .iter()
            .enumerate()
            .map(|(i, d)| {
                let mut d = d.clone();
                if let Some(score) = self.scores.get(i) {
                    d.score = *score;
                }
                d
            })
            .filter(|d| d.score >= self.min_score)
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }
}

/// Owned reranker wrapper: construct per retrieval pass, then `aclose`.
pub struct Reranker {
    model: Box<dyn RerankModel>,
}

impl Reranker {
    pub fn new(model: Box<dyn RerankModel>) -> Self {
        Self { model }
    }

    pub fn pinecone(config: RerankerConfig) -> Self {
        Self::new(Box::new(PineconeReranker::new(config)))
    }

    pub async fn rerank(
        &self,
        query: &str,
        documents: &[DocumentWithScore],
        top_k: usize,
    ) -> Result<Vec<DocumentWithScore>, RetrievalError> {
        self.model.rerank(query, documents, top_k).await
    }

    /// Releases the provider handle.
    pub async fn aclose(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: &str, score: f32) -> DocumentWithScore {
        DocumentWithScore {
            id: id.to_string(),
            content: format!("{} 텍스트", id),
            score,
            metadata: json!({}),
        }
    }

    /// **Scenario**: scripted scores reorder and truncate to top_k.
    #[tokio::test]
    async fn mock_reranker_reorders_and_truncates() {
        let reranker = Reranker::new(Box::new(MockReranker::with_scores(vec![0.1, 0.9, 0.5])));
        let docs = vec![doc("a", 0.9), doc("b", 0.5), doc("c", 0.3)];
        let out = reranker.rerank("질문", &docs, 2).await.unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].id, "b");
        assert_eq!(out[1].id, "c");
        reranker.aclose().await;
    }

    /// **Scenario**: identity reranker keeps the input order.
    #[tokio::test]
    async fn identity_keeps_order() {
        let reranker = MockReranker::identity();
        let docs = vec![doc("a", 0.9), doc("b", 0.5)];
        let out = reranker.rerank("q", &docs, 10).await.unwrap();
        assert_eq!(out[0].id, "a");
        assert_eq!(out[1].id, "b");
    }
}
