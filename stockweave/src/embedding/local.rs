//! Local HuggingFace-style embedding provider (BGE-M3, Kakao).
//!
//! Tokenization is real (HuggingFace `tokenizers` file); the model forward
//! pass is an injected [`LocalEncoder`] — the inference runtime is an
//! external collaborator. Synchronous `encode` runs under `spawn_blocking`
//! so the async path never blocks the runtime.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use super::{EmbeddingError, EmbeddingModelConfig, EmbeddingProvider, TaskType};


/// Synchronous local embedding model.
pub trait LocalEncoder: Send + Sync {
    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

enum Counting {
    Hf(Box<tokenizers::Tokenizer>),
    /// Word-count fallback (tests, tokenizer file unavailable).
    Words,
}

/// Local model provider: HF tokenizer + injected encoder.
pub struct LocalHfEmbeddingProvider {
    config: EmbeddingModelConfig,
    counting: Counting,
    encoder: Arc<dyn LocalEncoder>,
    last_usage: AtomicUsize,
}

impl LocalHfEmbeddingProvider {
    /// Loads the tokenizer from a file (tokenizer.json of the model repo).
    pub fn from_tokenizer_file(
        config: EmbeddingModelConfig,
        tokenizer_path: &str,
        encoder: Arc<dyn LocalEncoder>,
    ) -> Result<Self, EmbeddingError> {
        let tokenizer = tokenizers::Tokenizer::from_file(tokenizer_path)
            .map_err(|e| EmbeddingError::Tokenizer(e.to_string()))?;
        Ok(Self {
            config,
            counting: Counting::Hf(Box::new(tokenizer)),
            encoder,
            last_usage: AtomicUsize::new(0),
        })
    }

    /// Word-count approximation instead of a tokenizer file (tests).
    pub fn with_word_counting(
        config: EmbeddingModelConfig,
        encoder: Arc<dyn LocalEncoder>,
    ) -> Self {
        Self {
            config,
            counting: Counting::Words,
            encoder,
            last_usage: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for LocalHfEmbeddingProvider {
    fn config(&self) -> &EmbeddingModelConfig {
        &self.config
    }

    fn count_tokens(&self, text: &str) -> usize {
        match &self.counting {
            Counting::Hf(tokenizer) => match tokenizer.encode(text, false) {
                Ok(encoding) => encoding.get_ids().len(),
                Err(e) => {
                    warn!(error = %e, "local tokenizer encode failed, word fallback");
                    text.split_whitespace().count() * 2
                }
            },
            Counting::Words => text.split_whitespace().count(),
        }
    }

    async fn embed_batch(
        &self,
        batch: &[String],
        _task: TaskType,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let encoder = Arc::clone(&self.encoder);
        let batch = batch.to_vec();
        tokio::task::spawn_blocking(move || encoder.encode(&batch))
            .await
            .map_err(|e| EmbeddingError::Provider(format!("encode task failed: {}", e)))?
    }

    fn note_token_usage(&self, tokens: usize) {
        self.last_usage.store(tokens, Ordering::SeqCst);
    }

    fn last_token_usage(&self) -> usize {
        self.last_usage.load(Ordering::SeqCst)
    }
}
