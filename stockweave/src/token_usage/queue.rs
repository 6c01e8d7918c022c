//! Bounded async write queue for token usage records.
//!
//! One worker task drains the queue and writes records through the
//! [`TokenUsageStore`]. `add_usage` is safe from any task. On shutdown the
//! sender side closes and the worker drains remaining items before exiting.

use std::sync::Arc;

use once_cell::sync::OnceCell;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{TokenUsageRecord, TokenUsageStore};

static GLOBAL_QUEUE: OnceCell<Arc<TokenUsageQueue>> = OnceCell::new();
static INIT_LOCK: Mutex<()> = Mutex::const_new(());

/// Bounded queue + worker task writing token usage records.
///
/// Process singleton via [`TokenUsageQueue::global`]; tests construct their
/// own instances with [`TokenUsageQueue::start`].
pub struct TokenUsageQueue {
    tx: RwLock<Option<mpsc::Sender<TokenUsageRecord>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TokenUsageQueue {
    /// Starts a queue with the given store and capacity.
    pub fn start(store: Arc<dyn TokenUsageStore>, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<TokenUsageRecord>(capacity);
        let worker = tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                if let Err(e) = store.insert(&record).await {
                    // Best-effort accounting: failures must not surface.
                    warn!(error = %e, model = %record.model_name, "token usage write failed");
                }
            }
            debug!("token usage worker drained and stopped");
        });
        Self {
            tx: RwLock::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Initializes the process-wide queue once; later calls return the
    /// existing instance. Initialization races are serialized by an async
    /// lock so exactly one worker is spawned.
    pub async fn init_global(store: Arc<dyn TokenUsageStore>, capacity: usize) -> Arc<Self> {
        if let Some(queue) = GLOBAL_QUEUE.get() {
            return Arc::clone(queue);
        }
        let _guard = INIT_LOCK.lock().await;
        if GLOBAL_QUEUE.get().is_none() {
            let queue = Arc::new(Self::start(store, capacity));
            let _ = GLOBAL_QUEUE.set(queue);
        }
        Arc::clone(GLOBAL_QUEUE.get().expect("global queue initialized"))
    }

    /// The process-wide queue, when initialized.
    pub fn global() -> Option<Arc<Self>> {
        GLOBAL_QUEUE.get().cloned()
    }

    /// Enqueues one record. Errors only when the queue is shut down.
    pub async fn add_usage(&self, record: TokenUsageRecord) -> Result<(), String> {
        let tx = self.tx.read().await;
        match tx.as_ref() {
            Some(tx) => tx
                .send(record)
                .await
                .map_err(|e| format!("queue closed: {}", e)),
            None => Err("queue shut down".to_string()),
        }
    }

    /// Closes the queue and waits for the worker to drain pending items.
    pub async fn shutdown(&self) {
        {
            let mut tx = self.tx.write().await;
            tx.take();
        }
        let handle = { self.worker.lock().await.take() };
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "token usage worker join failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token_usage::{InMemoryTokenUsageStore, TokenType, TokenUsageTracker};
    use uuid::Uuid;

    fn record(model: &str) -> TokenUsageRecord {
        let mut tracker =
            TokenUsageTracker::new(Uuid::new_v4(), "stockeasy", TokenType::Llm, model);
        tracker.add_tokens(10, 2, None, 0.0);
        tracker.into_record()
    }

    /// **Scenario**: records enqueued before shutdown are all written (drain on shutdown).
    #[tokio::test]
    async fn shutdown_drains_pending_records() {
        let store = Arc::new(InMemoryTokenUsageStore::new());
        let queue = TokenUsageQueue::start(store.clone(), 64);
        for i in 0..10 {
            queue.add_usage(record(&format!("model-{}", i))).await.unwrap();
        }
        queue.shutdown().await;
        assert_eq!(store.records().len(), 10);
    }

    /// **Scenario**: add_usage after shutdown reports an error instead of panicking.
    #[tokio::test]
    async fn add_usage_after_shutdown_errors() {
        let store = Arc::new(InMemoryTokenUsageStore::new());
        let queue = TokenUsageQueue::start(store, 4);
        queue.shutdown().await;
        assert!(queue.add_usage(record("m")).await.is_err());
    }

    /// **Scenario**: add_usage is safe from several tasks at once.
    #[tokio::test]
    async fn concurrent_add_usage() {
        let store = Arc::new(InMemoryTokenUsageStore::new());
        let queue = Arc::new(TokenUsageQueue::start(store.clone(), 128));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let q = Arc::clone(&queue);
            handles.push(tokio::spawn(async move {
                for _ in 0..10 {
                    q.add_usage(record("gpt-4o")).await.unwrap();
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        queue.shutdown().await;
        assert_eq!(store.records().len(), 80);
    }
}
