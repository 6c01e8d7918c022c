//! Mock LLM for tests and dry runs.
//!
//! Returns a fixed response, or a scripted sequence of outcomes so fallback
//! and retry behavior can be exercised without a provider. Configurable
//! character-by-character streaming for stream tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::message::Message;

use super::{LlmClient, LlmError, LlmResponse, LlmUsage, MessageChunk};

/// Mock LLM: fixed assistant text or a scripted outcome sequence.
///
/// With `with_content` every call returns the same text. With
/// `with_responses` calls consume the script in order (an `Err` entry makes
/// that call fail), and the last entry repeats once the script is exhausted.
///
/// **Interaction**: Implements [`LlmClient`]; built by the default factory
/// for provider `mock`, and installed directly in tests.
pub struct MockLlm {
    script: Mutex<VecDeque<Result<LlmResponse, String>>>,
    fallback_content: String,
    usage: Option<LlmUsage>,
    calls: AtomicUsize,
    stream_by_char: AtomicBool,
}

impl MockLlm {
    /// Creates a mock that always returns `content`.
    pub fn with_content(content: impl Into<String>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback_content: content.into(),
            usage: None,
            calls: AtomicUsize::new(0),
            stream_by_char: AtomicBool::new(false),
        }
    }

    /// Creates a mock with a scripted outcome per call.
    pub fn with_responses(script: Vec<Result<LlmResponse, String>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback_content: String::new(),
            usage: None,
            calls: AtomicUsize::new(0),
            stream_by_char: AtomicBool::new(false),
        }
    }

    /// Attaches fixed usage to every non-scripted response.
    pub fn with_usage(mut self, usage: LlmUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Streams content one character per chunk instead of a single chunk.
    pub fn stream_by_char(self) -> Self {
        self.stream_by_char.store(true, Ordering::SeqCst);
        self
    }

    /// Number of invoke calls observed so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_response(&self) -> Result<LlmResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock().expect("mock script lock");
        if let Some(entry) = script.pop_front() {
            return entry.map_err(LlmError::Provider);
        }
        Ok(LlmResponse {
            content: self.fallback_content.clone(),
            usage: self.usage,
            ..Default::default()
        })
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn invoke(&self, _messages: &[Message]) -> Result<LlmResponse, LlmError> {
        self.next_response()
    }

    async fn invoke_stream(
        &self,
        messages: &[Message],
        chunk_tx: Option<mpsc::Sender<MessageChunk>>,
    ) -> Result<LlmResponse, LlmError> {
        let response = self.invoke(messages).await?;
        if let Some(tx) = chunk_tx {
            if self.stream_by_char.load(Ordering::SeqCst) {
                for ch in response.content.chars() {
                    let _ = tx
                        .send(MessageChunk {
                            content: ch.to_string(),
                        })
                        .await;
                }
            } else if !response.content.is_empty() {
                let _ = tx
                    .send(MessageChunk {
                        content: response.content.clone(),
                    })
                    .await;
            }
        }
        Ok(response)
    }
}
