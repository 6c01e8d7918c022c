//! Provider-neutral embedding fabric.
//!
//! One [`EmbeddingProvider`] per backend (OpenAI-family, Upstage, Google
//! Vertex, local BGE-M3 / Kakao models). Every provider tokenizes with its
//! own tokenizer, honors a `max_tokens` budget per text and per batch, and
//! emits one token-usage record per request through the shared
//! [`UsageContext`]. The surface is async-first; local CPU-bound encoders
//! run under `spawn_blocking`.

pub mod batching;
mod local;
mod openai;
mod vertex;

pub use local::{LocalEncoder, LocalHfEmbeddingProvider};
pub use openai::OpenAiEmbeddingProvider;
pub use vertex::GoogleVertexEmbeddingProvider;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::token_usage::{TokenType, UsageContext};

/// Embedding fabric error.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Provider call failed.
    #[error("provider error: {0}")]
    Provider(String),

    /// Factory was handed an enum value it has no adapter for.
    #[error("unsupported provider type: {0}")]
    UnsupportedProvider(String),

    /// Tokenizer could not be loaded or used.
    #[error("tokenizer error: {0}")]
    Tokenizer(String),
}

/// Embedding task type passed to providers that distinguish query/document
/// embeddings (Vertex). Opaque to providers that do not.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    RetrievalQuery,
    RetrievalDocument,
    SemanticSimilarity,
    Classification,
    Clustering,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::RetrievalQuery => "RETRIEVAL_QUERY",
            TaskType::RetrievalDocument => "RETRIEVAL_DOCUMENT",
            TaskType::SemanticSimilarity => "SEMANTIC_SIMILARITY",
            TaskType::Classification => "CLASSIFICATION",
            TaskType::Clustering => "CLUSTERING",
        }
    }
}

/// Static description of one embedding model.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmbeddingModelConfig {
    pub name: String,
    pub dimension: usize,
    pub provider: EmbeddingProviderKind,
    pub max_tokens: usize,
    pub description: String,
}

/// Supported embedding backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProviderKind {
    OpenAi,
    Upstage,
    GoogleVertex,
    BgeM3,
    Kakao,
}

/// Provider-neutral embedding interface.
///
/// The provided `create_embeddings` handles batching, usage tracking and
/// `last_token_usage`; concrete providers implement `count_tokens` and
/// `embed_batch` (and may override `validate_and_split_texts` when their
/// budget rules differ, e.g. Vertex's per-text limit).
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn config(&self) -> &EmbeddingModelConfig;

    /// Counts tokens with the provider's own tokenizer.
    fn count_tokens(&self, text: &str) -> usize;

    /// Splits the input into batches that respect the provider's budgets.
    fn validate_and_split_texts(&self, texts: &[String]) -> Vec<Vec<String>> {
        batching::greedy_pack(texts, self.config().max_tokens, &|t| self.count_tokens(t))
    }

    /// Embeds one pre-validated batch.
    async fn embed_batch(
        &self,
        batch: &[String],
        task: TaskType,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Hook: records the token count of the last request for attribution.
    fn note_token_usage(&self, _tokens: usize) {}

    /// Token count of the most recent `create_embeddings` call.
    fn last_token_usage(&self) -> usize {
        0
    }

    /// Embeds texts: validates and splits into batches, embeds each batch in
    /// order, and emits one usage record per request when tracking is active.
    /// No record is written when any batch fails.
    async fn create_embeddings(
        &self,
        texts: &[String],
        task: TaskType,
        usage: &UsageContext,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let batches = self.validate_and_split_texts(texts);
        debug!(
            model = %self.config().name,
            batches = batches.len(),
            "embedding request"
        );

        let mut all = Vec::new();
        let mut total_tokens = 0usize;
        for batch in &batches {
            let embeddings = self.embed_batch(batch, task).await?;
            total_tokens += batch.iter().map(|t| self.count_tokens(t)).sum::<usize>();
            all.extend(embeddings);
        }
        self.note_token_usage(total_tokens);

        if let Some(mut tracker) = usage.tracker(TokenType::Embedding, &self.config().name) {
            tracker.add_tokens(total_tokens as u32, 0, Some(total_tokens as u32), 0.0);
            tracker
                .flush(usage.queue.as_ref().expect("tracking checked"))
                .await;
        }
        Ok(all)
    }

    /// Releases provider resources. Default: nothing to release.
    async fn aclose(&self) -> Result<(), EmbeddingError> {
        Ok(())
    }
}

/// Builds a provider for the given kind.
///
/// Local models (BGE-M3, Kakao) need an encoder and tokenizer file and are
/// constructed directly via [`LocalHfEmbeddingProvider`]; asking the factory
/// for them without one is an unsupported-provider error, as is any enum
/// value without an adapter.
pub fn create_provider(
    kind: EmbeddingProviderKind,
    config: EmbeddingModelConfig,
) -> Result<Arc<dyn EmbeddingProvider>, EmbeddingError> {
    match kind {
        EmbeddingProviderKind::OpenAi => Ok(Arc::new(OpenAiEmbeddingProvider::new(config)?)),
        EmbeddingProviderKind::Upstage => {
            Ok(Arc::new(OpenAiEmbeddingProvider::upstage(config)?))
        }
        EmbeddingProviderKind::GoogleVertex => {
            Ok(Arc::new(GoogleVertexEmbeddingProvider::new(config)))
        }
        EmbeddingProviderKind::BgeM3 | EmbeddingProviderKind::Kakao => Err(
            EmbeddingError::UnsupportedProvider(format!(
                "{:?} requires a local encoder; construct LocalHfEmbeddingProvider directly",
                kind
            )),
        ),
    }
}
