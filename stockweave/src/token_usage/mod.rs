//! Token-usage accounting: records, tracking contexts, async write queue.
//!
//! LLM and embedding calls produce one [`TokenUsageRecord`] per request.
//! Records are created synchronously by a [`TokenUsageTracker`] and written
//! asynchronously by the bounded [`TokenUsageQueue`]: usage is never lost on
//! provider success, and write failures are logged and swallowed
//! (best-effort accounting must not fail the request).

mod queue;
mod sqlite_store;

pub use queue::TokenUsageQueue;
pub use sqlite_store::SqliteTokenUsageStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::store::StoreError;

/// What kind of model produced the usage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    Llm,
    Embedding,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Llm => "llm",
            TokenType::Embedding => "embedding",
        }
    }
}

/// One persisted row accounting the tokens of a single model invocation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenUsageRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub project_type: String,
    pub token_type: TokenType,
    pub model_name: String,
    pub prompt_tokens: u32,
    pub completion_tokens: Option<u32>,
    pub total_tokens: u32,
    pub cost: f64,
    pub created_at: DateTime<Utc>,
}

/// Write target for token usage records.
///
/// **Interaction**: The queue worker is the only caller of `insert`.
#[async_trait]
pub trait TokenUsageStore: Send + Sync {
    async fn insert(&self, record: &TokenUsageRecord) -> Result<(), StoreError>;
}

/// In-memory store for tests.
#[derive(Default)]
pub struct InMemoryTokenUsageStore {
    records: std::sync::Mutex<Vec<TokenUsageRecord>>,
}

impl InMemoryTokenUsageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<TokenUsageRecord> {
        self.records.lock().expect("usage store lock").clone()
    }
}

#[async_trait]
impl TokenUsageStore for InMemoryTokenUsageStore {
    async fn insert(&self, record: &TokenUsageRecord) -> Result<(), StoreError> {
        self.records
            .lock()
            .expect("usage store lock")
            .push(record.clone());
        Ok(())
    }
}

/// Token-tracking context for one model call. Tracking is active iff both
/// `user_id` and `project_type` are present along with a queue.
///
/// **Interaction**: The LLM fabric re-exports this as `InvokeOptions`; the
/// embedding fabric takes it on `create_embeddings`.
#[derive(Clone, Default)]
pub struct UsageContext {
    pub user_id: Option<Uuid>,
    pub project_type: Option<String>,
    pub queue: Option<std::sync::Arc<TokenUsageQueue>>,
}

impl UsageContext {
    /// No tracking.
    pub fn none() -> Self {
        Self::default()
    }

    /// Tracking context for a user + project.
    pub fn tracked(
        user_id: Uuid,
        project_type: impl Into<String>,
        queue: std::sync::Arc<TokenUsageQueue>,
    ) -> Self {
        Self {
            user_id: Some(user_id),
            project_type: Some(project_type.into()),
            queue: Some(queue),
        }
    }

    /// True when every tracking ingredient is present.
    pub fn tracking(&self) -> bool {
        self.user_id.is_some() && self.project_type.is_some() && self.queue.is_some()
    }

    /// Builds a tracker for this context, when tracking is active.
    pub fn tracker(&self, token_type: TokenType, model_name: &str) -> Option<TokenUsageTracker> {
        if !self.tracking() {
            return None;
        }
        Some(TokenUsageTracker::new(
            self.user_id.expect("tracking checked"),
            self.project_type.clone().expect("tracking checked"),
            token_type,
            model_name,
        ))
    }
}

/// Accumulates token deltas for one request and flushes a single record on
/// successful exit. Dropping without `flush` writes nothing, which is the
/// on-exception behavior of the tracking context.
pub struct TokenUsageTracker {
    user_id: Uuid,
    project_type: String,
    token_type: TokenType,
    model_name: String,
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
    cost: f64,
}

impl TokenUsageTracker {
    pub fn new(
        user_id: Uuid,
        project_type: impl Into<String>,
        token_type: TokenType,
        model_name: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            project_type: project_type.into(),
            token_type,
            model_name: model_name.into(),
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: 0,
            cost: 0.0,
        }
    }

    /// Adds token counts. `total` defaults to prompt + completion when None.
    pub fn add_tokens(&mut self, prompt: u32, completion: u32, total: Option<u32>, cost: f64) {
        self.prompt_tokens += prompt;
        self.completion_tokens += completion;
        self.total_tokens += total.unwrap_or(prompt + completion);
        self.cost += cost;
    }

    /// True when no tokens were recorded.
    pub fn is_empty(&self) -> bool {
        self.total_tokens == 0 && self.prompt_tokens == 0 && self.completion_tokens == 0
    }

    /// Converts the accumulated counts into a record.
    pub fn into_record(self) -> TokenUsageRecord {
        TokenUsageRecord {
            id: Uuid::new_v4(),
            user_id: self.user_id,
            project_type: self.project_type,
            token_type: self.token_type,
            completion_tokens: match self.token_type {
                TokenType::Llm => Some(self.completion_tokens),
                TokenType::Embedding => None,
            },
            model_name: self.model_name,
            prompt_tokens: self.prompt_tokens,
            total_tokens: self.total_tokens,
            cost: self.cost,
            created_at: Utc::now(),
        }
    }

    /// Flushes the record onto the queue. Empty trackers write nothing.
    /// Queue errors are logged and swallowed (best-effort).
    pub async fn flush(self, queue: &TokenUsageQueue) {
        if self.is_empty() {
            return;
        }
        let record = self.into_record();
        if let Err(e) = queue.add_usage(record).await {
            warn!(error = %e, "token usage enqueue failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: add_tokens with None total defaults to prompt + completion.
    #[test]
    fn tracker_total_defaults_to_sum() {
        let mut tracker =
            TokenUsageTracker::new(Uuid::new_v4(), "stockeasy", TokenType::Llm, "gpt-4o");
        tracker.add_tokens(10, 5, None, 0.0);
        let record = tracker.into_record();
        assert_eq!(record.prompt_tokens, 10);
        assert_eq!(record.completion_tokens, Some(5));
        assert_eq!(record.total_tokens, 15);
    }

    /// **Scenario**: embedding trackers leave completion_tokens empty.
    #[test]
    fn embedding_record_has_no_completion() {
        let mut tracker =
            TokenUsageTracker::new(Uuid::new_v4(), "stockeasy", TokenType::Embedding, "bge-m3");
        tracker.add_tokens(128, 0, Some(128), 0.0);
        let record = tracker.into_record();
        assert_eq!(record.completion_tokens, None);
        assert_eq!(record.total_tokens, 128);
    }

    /// **Scenario**: an empty tracker flushes nothing onto the queue.
    #[tokio::test]
    async fn empty_tracker_flush_writes_nothing() {
        let store = std::sync::Arc::new(InMemoryTokenUsageStore::new());
        let queue = TokenUsageQueue::start(store.clone(), 8);
        let tracker =
            TokenUsageTracker::new(Uuid::new_v4(), "stockeasy", TokenType::Llm, "gpt-4o");
        tracker.flush(&queue).await;
        queue.shutdown().await;
        assert!(store.records().is_empty());
    }
}
