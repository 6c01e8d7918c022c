//! Retrieval pipeline: semantic search, reranking, hybrid fusion, scoring.
//!
//! [`SemanticRetriever`] embeds the query and runs ANN search through a
//! [`VectorStoreManager`], filtering by minimum score. The reranker is a
//! second-stage cross-encoder pass; [`HybridRetriever`] fuses semantic and
//! lexical signals. Scoring helpers (time decay, dedup, importance) live in
//! [`scoring`].

pub mod rerank;
pub mod scoring;

mod hybrid;

pub use hybrid::HybridRetriever;
pub use rerank::{MockReranker, PineconeReranker, RerankModel, Reranker, RerankerConfig};

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::token_usage::UsageContext;
use crate::vector::{DocumentWithScore, MetadataFilter, VectorStoreManager};

/// Retrieval pipeline error.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// Vector store or embedding failure.
    #[error("search error: {0}")]
    Search(String),

    /// Reranker provider failure.
    #[error("rerank error: {0}")]
    Rerank(String),
}

/// Result of one retrieval pass.
#[derive(Clone, Debug, Default)]
pub struct RetrievalResult {
    pub documents: Vec<DocumentWithScore>,
}

/// Semantic retriever configuration.
#[derive(Clone, Debug)]
pub struct SemanticRetrieverConfig {
    /// Hits below this similarity are dropped.
    pub min_score: f32,
    pub user_id: Option<Uuid>,
    pub project_type: Option<String>,
}

impl Default for SemanticRetrieverConfig {
    fn default() -> Self {
        Self {
            min_score: 0.0,
            user_id: None,
            project_type: None,
        }
    }
}

/// Embeds the query, runs ANN search, filters by min score.
///
/// Async-closeable: `aclose` releases the underlying manager handle.
pub struct SemanticRetriever {
    config: SemanticRetrieverConfig,
    manager: Arc<VectorStoreManager>,
    usage: UsageContext,
}

impl SemanticRetriever {
    pub fn new(
        config: SemanticRetrieverConfig,
        manager: Arc<VectorStoreManager>,
        usage: UsageContext,
    ) -> Self {
        Self {
            config,
            manager,
            usage,
        }
    }

    /// Retrieves the `top_k` nearest documents matching `filters`, keeping
    /// only hits with `score >= min_score`.
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        filters: Option<&MetadataFilter>,
    ) -> Result<RetrievalResult, RetrievalError> {
        let hits = self
            .manager
            .search(query, top_k, filters, &self.usage)
            .await
            .map_err(|e| RetrievalError::Search(e.to_string()))?;
        let min_score = self.config.min_score;
        let documents: Vec<DocumentWithScore> =
            hits.into_iter().filter(|d| d.score >= min_score).collect();
        debug!(
            namespace = %self.manager.namespace(),
            top_k,
            kept = documents.len(),
            "semantic retrieval"
        );
        Ok(RetrievalResult { documents })
    }

    /// Releases the retriever. The manager itself is process-cached, so this
    /// only drops the local handle.
    pub async fn aclose(self) {}
}
