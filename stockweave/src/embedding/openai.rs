//! OpenAI-family embedding provider (OpenAI, Upstage via base-url override).
//!
//! Token counting uses tiktoken (`cl100k_base`, cached); Upstage can point
//! at its own HuggingFace tokenizer file via `UPSTAGE_TOKENIZER_PATH`, and
//! falls back to the tiktoken approximation otherwise.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_openai::{
    config::OpenAIConfig,
    types::embeddings::{CreateEmbeddingRequest, EmbeddingInput},
    Client,
};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use tiktoken_rs::CoreBPE;
use tracing::warn;

use super::{EmbeddingError, EmbeddingModelConfig, EmbeddingProvider, TaskType};

static CL100K: Lazy<Option<CoreBPE>> = Lazy::new(|| match tiktoken_rs::cl100k_base() {
    Ok(bpe) => Some(bpe),
    Err(e) => {
        warn!(error = %e, "cl100k tokenizer load failed, falling back to word counting");
        None
    }
});

enum Counter {
    Tiktoken,
    HfFile(Box<tokenizers::Tokenizer>),
}

/// OpenAI-compatible embedding provider.
pub struct OpenAiEmbeddingProvider {
    client: Client<OpenAIConfig>,
    config: EmbeddingModelConfig,
    counter: Counter,
    last_usage: AtomicUsize,
}

impl OpenAiEmbeddingProvider {
    /// OpenAI endpoint; API key from `OPENAI_API_KEY`.
    pub fn new(config: EmbeddingModelConfig) -> Result<Self, EmbeddingError> {
        Ok(Self {
            client: Client::new(),
            config,
            counter: Counter::Tiktoken,
            last_usage: AtomicUsize::new(0),
        })
    }

    /// Upstage endpoint (OpenAI-compatible). API key from
    /// `UPSTAGE_API_KEY`; tokenizer from `UPSTAGE_TOKENIZER_PATH` when set.
    pub fn upstage(config: EmbeddingModelConfig) -> Result<Self, EmbeddingError> {
        let mut openai_config = OpenAIConfig::new().with_api_base("https://api.upstage.ai/v1");
        if let Ok(key) = std::env::var("UPSTAGE_API_KEY") {
            openai_config = openai_config.with_api_key(key);
        }
        let counter = match std::env::var("UPSTAGE_TOKENIZER_PATH") {
            Ok(path) => {
                let tokenizer = tokenizers::Tokenizer::from_file(&path)
                    .map_err(|e| EmbeddingError::Tokenizer(e.to_string()))?;
                Counter::HfFile(Box::new(tokenizer))
            }
            Err(_) => Counter::Tiktoken,
        };
        Ok(Self {
            client: Client::with_config(openai_config),
            config,
            counter,
            last_usage: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    fn config(&self) -> &EmbeddingModelConfig {
        &self.config
    }

    fn count_tokens(&self, text: &str) -> usize {
        match &self.counter {
            Counter::HfFile(tokenizer) => match tokenizer.encode(text, false) {
                Ok(encoding) => encoding.get_ids().len(),
                Err(e) => {
                    warn!(error = %e, "tokenizer encode failed, word fallback");
                    text.split_whitespace().count() * 2
                }
            },
            Counter::Tiktoken => match CL100K.as_ref() {
                Some(bpe) => bpe.encode_with_special_tokens(text).len(),
                None => text.split_whitespace().count() * 2,
            },
        }
    }

    async fn embed_batch(
        &self,
        batch: &[String],
        _task: TaskType,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let input = if batch.len() == 1 {
            EmbeddingInput::String(batch[0].clone())
        } else {
            EmbeddingInput::StringArray(batch.to_vec())
        };
        let request = CreateEmbeddingRequest {
            input,
            model: self.config.name.clone(),
            ..Default::default()
        };
        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(|e| EmbeddingError::Provider(e.to_string()))?;
        Ok(response.data.into_iter().map(|e| e.embedding).collect())
    }

    fn note_token_usage(&self, tokens: usize) {
        self.last_usage.store(tokens, Ordering::SeqCst);
    }

    fn last_token_usage(&self) -> usize {
        self.last_usage.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EmbeddingProviderKind;

    fn config() -> EmbeddingModelConfig {
        EmbeddingModelConfig {
            name: "text-embedding-3-small".to_string(),
            dimension: 1536,
            provider: EmbeddingProviderKind::OpenAi,
            max_tokens: 8191,
            description: "OpenAI small embedding".to_string(),
        }
    }

    /// **Scenario**: tiktoken counting is non-zero for real text and grows
    /// with input length.
    #[test]
    fn count_tokens_monotone() {
        let provider = OpenAiEmbeddingProvider::new(config()).unwrap();
        let short = provider.count_tokens("삼성전자 실적");
        let long = provider.count_tokens("삼성전자 실적 전망과 반도체 업황 분석 리포트");
        assert!(short > 0);
        assert!(long > short);
    }

    /// **Scenario**: embed_batch against no credentials / unreachable network
    /// surfaces a provider error rather than panicking.
    #[tokio::test]
    async fn embed_batch_error_path() {
        let mut cfg = config();
        cfg.name = "test-model".to_string();
        let provider = OpenAiEmbeddingProvider::new(cfg).unwrap();
        // No real key in the environment for this client; the call must fail
        // with a Provider error either way.
        let result = provider
            .embed_batch(&["텍스트".to_string()], TaskType::RetrievalQuery)
            .await;
        if let Err(e) = result {
            assert!(matches!(e, EmbeddingError::Provider(_)));
        }
    }
}
