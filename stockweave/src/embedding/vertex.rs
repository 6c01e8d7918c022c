//! Google Vertex AI embedding provider.
//!
//! Vertex enforces both a per-text token limit (2048) and a batch budget;
//! `validate_and_split_texts` is overridden accordingly. `429 Quota`
//! responses are treated as a recoverable signal: the model is rebound to
//! the `us-central1` region once and the batch retried exactly once before
//! the error is re-raised. Other Vertex errors are retried up to 3 attempts
//! with exponential backoff (multiplier 1, min 4 s, max 10 s).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{error, warn};

use super::{
    batching, EmbeddingError, EmbeddingModelConfig, EmbeddingProvider, TaskType,
};

/// Region used as the quota-relief fallback.
const FALLBACK_LOCATION: &str = "us-central1";
/// Vertex batch token budget (per-text limit comes from the model config).
const BATCH_TOKEN_BUDGET: usize = 20_000;
const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_MIN: Duration = Duration::from_secs(4);
const BACKOFF_MAX: Duration = Duration::from_secs(10);

static WORDISH: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\w+\b|[.,!?;]").expect("word regex"));

/// The raw predict call, separated so tests can script region behavior.
#[async_trait]
pub trait VertexApi: Send + Sync {
    async fn predict(
        &self,
        location: &str,
        model: &str,
        batch: &[String],
        task: TaskType,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// HTTP Vertex predict endpoint. Project from `GOOGLE_VERTEX_PROJECT`,
/// bearer token from `GOOGLE_VERTEX_ACCESS_TOKEN`.
pub struct HttpVertexApi {
    http: reqwest::Client,
}

impl HttpVertexApi {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }
}

impl Default for HttpVertexApi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VertexApi for HttpVertexApi {
    async fn predict(
        &self,
        location: &str,
        model: &str,
        batch: &[String],
        task: TaskType,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let project = std::env::var("GOOGLE_VERTEX_PROJECT")
            .map_err(|_| EmbeddingError::Provider("GOOGLE_VERTEX_PROJECT not set".to_string()))?;
        let token = std::env::var("GOOGLE_VERTEX_ACCESS_TOKEN")
            .map_err(|_| EmbeddingError::Provider("GOOGLE_VERTEX_ACCESS_TOKEN not set".to_string()))?;
        let url = format!(
            "https://{loc}-aiplatform.googleapis.com/v1/projects/{project}/locations/{loc}/publishers/google/models/{model}:predict",
            loc = location,
        );
        let instances: Vec<serde_json::Value> = batch
            .iter()
            .map(|content| {
                serde_json::json!({"content": content, "task_type": task.as_str()})
            })
            .collect();

        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(&serde_json::json!({"instances": instances}))
            .send()
            .await
            .map_err(|e| EmbeddingError::Provider(e.to_string()))?;

        let status = response.status();
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| EmbeddingError::Provider(e.to_string()))?;
        if !status.is_success() {
            return Err(EmbeddingError::Provider(format!("{} {}", status, body)));
        }

        body["predictions"]
            .as_array()
            .map(|predictions| {
                predictions
                    .iter()
                    .map(|p| {
                        p["embeddings"]["values"]
                            .as_array()
                            .map(|vals| {
                                vals.iter()
                                    .filter_map(|v| v.as_f64())
                                    .map(|v| v as f32)
                                    .collect::<Vec<f32>>()
                            })
                            .unwrap_or_default()
                    })
                    .collect()
            })
            .ok_or_else(|| EmbeddingError::Provider("predictions missing in response".to_string()))
    }
}

/// Google Vertex embedding provider.
pub struct GoogleVertexEmbeddingProvider {
    api: Arc<dyn VertexApi>,
    config: EmbeddingModelConfig,
    location: RwLock<String>,
    last_usage: AtomicUsize,
}

impl GoogleVertexEmbeddingProvider {
    pub fn new(config: EmbeddingModelConfig) -> Self {
        Self::with_api(config, Arc::new(HttpVertexApi::new()), "asia-northeast3")
    }

    /// Custom API handle and initial region (tests, non-default regions).
    pub fn with_api(
        config: EmbeddingModelConfig,
        api: Arc<dyn VertexApi>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            api,
            config,
            location: RwLock::new(location.into()),
            last_usage: AtomicUsize::new(0),
        }
    }

    /// The region currently bound.
    pub fn location(&self) -> String {
        self.location.read().expect("location lock").clone()
    }

    fn rebind_location(&self, location: &str) {
        *self.location.write().expect("location lock") = location.to_string();
    }

    async fn predict_current(&self, batch: &[String], task: TaskType) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let location = self.location();
        self.api
            .predict(&location, &self.config.name, batch, task)
            .await
    }
}

#[async_trait]
impl EmbeddingProvider for GoogleVertexEmbeddingProvider {
    fn config(&self) -> &EmbeddingModelConfig {
        &self.config
    }

    /// Word-based estimate (≈1.3 tokens per word) — Vertex exposes no local
    /// tokenizer.
    fn count_tokens(&self, text: &str) -> usize {
        let words = WORDISH.find_iter(text).count();
        (words as f64 * 1.3) as usize
    }

    /// Vertex budgets: per-text `max_tokens` (split when over), plus the
    /// batch token budget.
    fn validate_and_split_texts(&self, texts: &[String]) -> Vec<Vec<String>> {
        batching::pack_with_per_text_split(
            texts,
            self.config.max_tokens,
            BATCH_TOKEN_BUDGET,
            &|t| self.count_tokens(t),
        )
    }

    async fn embed_batch(
        &self,
        batch: &[String],
        task: TaskType,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut backoff = BACKOFF_MIN;
        let mut last_err: Option<EmbeddingError> = None;

        for attempt in 1..=MAX_ATTEMPTS {
            match self.predict_current(batch, task).await {
                Ok(embeddings) => return Ok(embeddings),
                Err(e) => {
                    let message = e.to_string();
                    if message.contains("429 Quota") {
                        // Quota relief: rebind once, retry exactly once.
                        error!(batch = batch.len(), "429 quota hit, rebinding to {}", FALLBACK_LOCATION);
                        self.rebind_location(FALLBACK_LOCATION);
                        return self.predict_current(batch, task).await;
                    }
                    warn!(attempt, error = %message, "vertex embed attempt failed");
                    last_err = Some(e);
                    if attempt < MAX_ATTEMPTS {
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(BACKOFF_MAX);
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| EmbeddingError::Provider("vertex embed failed".to_string())))
    }

    fn note_token_usage(&self, tokens: usize) {
        self.last_usage.store(tokens, Ordering::SeqCst);
    }

    fn last_token_usage(&self) -> usize {
        self.last_usage.load(Ordering::SeqCst)
    }
}
