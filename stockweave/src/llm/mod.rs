//! LLM client abstraction for the agent fabric.
//!
//! Agents depend on a callable that returns assistant text, optional tool
//! calls, and token usage; this module defines the trait plus the shared
//! response/usage types. [`AgentLlm`] layers per-agent configuration,
//! provider fallback and token accounting on top of a raw [`LlmClient`].
//!
//! # Streaming Support
//!
//! `LlmClient` supports streaming via `invoke_stream()`, which accepts an
//! optional `Sender<MessageChunk>` for emitting tokens as they arrive.
//! Implementations that lack streaming use the default implementation that
//! calls `invoke()` and sends the full content as one chunk, so callers
//! degrade gracefully.

mod agent_llm;
mod config;
mod mock;
mod openai;
mod structured;

pub use agent_llm::{AgentLlm, InvokeOptions};
pub use config::{
    refresh_agent_llm_cache, AgentLlmConfigFile, FallbackSettings, LlmConfig, LlmConfigRegistry,
    LlmFactory, OpenAiFactory,
};
pub use mock::MockLlm;
pub use openai::ChatOpenAi;
pub use structured::{strip_code_fences, StructuredOutput, StructuredResponse};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::message::Message;

/// LLM fabric error.
///
/// Provider errors are surfaced verbatim after the fallback chain is
/// exhausted; `AllAttemptsFailed` covers the degenerate case where no
/// attempt captured an error.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Provider call failed (last error after fallbacks, surfaced verbatim).
    #[error("provider error: {0}")]
    Provider(String),

    /// No provider configured for an agent and no usable default.
    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    /// Config file could not be read or parsed.
    #[error("config error: {0}")]
    Config(String),

    /// Every attempt failed without a captured provider error.
    #[error("all attempts failed")]
    AllAttemptsFailed,
}

/// One content chunk from a streaming LLM call.
#[derive(Clone, Debug)]
pub struct MessageChunk {
    pub content: String,
}

/// One tool call requested by the model (used by the response formatter's
/// component tools).
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct ToolCall {
    pub name: String,
    /// Raw JSON arguments string, parsed by the tool owner.
    pub arguments: String,
    pub id: Option<String>,
}

/// Declaration of one tool offered to the model.
#[derive(Clone, Debug)]
pub struct ToolSpec {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Value,
}

/// Token usage for one LLM call (prompt + completion).
///
/// **Interaction**: Optional part of `LlmResponse`; flushed into a
/// `TokenUsageRecord` by the tracking context in [`AgentLlm`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LlmUsage {
    /// Tokens in the prompt (input).
    pub prompt_tokens: u32,
    /// Tokens in the completion (output).
    pub completion_tokens: u32,
    /// Total tokens (prompt + completion).
    pub total_tokens: u32,
}

impl LlmUsage {
    /// Merges two usage reports by taking the per-field maximum.
    ///
    /// Streaming providers disagree on chunk-level usage: some repeat the
    /// running totals in every chunk, others send usage once at the end.
    /// Taking the maximum observed value per field is correct for both.
    pub fn merge_max(self, other: LlmUsage) -> LlmUsage {
        LlmUsage {
            prompt_tokens: self.prompt_tokens.max(other.prompt_tokens),
            completion_tokens: self.completion_tokens.max(other.completion_tokens),
            total_tokens: self.total_tokens.max(other.total_tokens),
        }
    }

    /// Reads usage from a raw provider JSON payload.
    ///
    /// Accepts both `{input_tokens, output_tokens, total_tokens}` and
    /// `{prompt_tokens, completion_tokens, total_tokens}` field spellings.
    fn from_json(value: &Value) -> Option<LlmUsage> {
        let obj = value.as_object()?;
        let read = |keys: &[&str]| -> Option<u32> {
            keys.iter()
                .find_map(|k| obj.get(*k).and_then(|v| v.as_u64()))
                .map(|v| v as u32)
        };
        let prompt = read(&["input_tokens", "prompt_tokens"]);
        let completion = read(&["output_tokens", "completion_tokens"]);
        let total = read(&["total_tokens"]);
        if prompt.is_none() && completion.is_none() && total.is_none() {
            return None;
        }
        let prompt = prompt.unwrap_or(0);
        let completion = completion.unwrap_or(0);
        Some(LlmUsage {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: total.unwrap_or(prompt + completion),
        })
    }
}

/// Response from an LLM completion.
///
/// `raw` keeps the provider payload when available so usage extraction can
/// fall back to provider-specific locations (see [`extract_usage`]).
#[derive(Clone, Debug, Default)]
pub struct LlmResponse {
    /// Assistant message content (plain text).
    pub content: String,
    /// Tool calls from this turn; empty for plain completions.
    pub tool_calls: Vec<ToolCall>,
    /// Token usage for this call, when the provider reports it directly.
    pub usage: Option<LlmUsage>,
    /// Raw provider payload, for usage-extraction fallbacks.
    pub raw: Option<Value>,
}

/// Locations scanned for token metadata inside a raw provider payload, in
/// order. SDKs differ on where they tuck usage; the list is pinned to the
/// shapes observed in the wild.
const USAGE_PATHS: &[&[&str]] = &[
    &["usage"],
    &["usage_metadata"],
    &["_message", "usage_metadata"],
    &["underlying_response", "usage_metadata"],
    &["_raw_response", "usage_metadata"],
    &["_original_message", "usage_metadata"],
];

/// Extracts token usage from a response: typed `usage` first, then the raw
/// payload fallback chain, finally any `_`-prefixed key holding a
/// `usage_metadata` object.
pub fn extract_usage(response: &LlmResponse) -> Option<LlmUsage> {
    if let Some(usage) = response.usage {
        return Some(usage);
    }
    let raw = response.raw.as_ref()?;
    for path in USAGE_PATHS {
        let mut cursor = raw;
        let mut found = true;
        for key in *path {
            match cursor.get(key) {
                Some(next) => cursor = next,
                None => {
                    found = false;
                    break;
                }
            }
        }
        if found {
            if let Some(usage) = LlmUsage::from_json(cursor) {
                return Some(usage);
            }
        }
    }
    // Last resort: private-prefixed attributes carrying usage_metadata.
    let obj = raw.as_object()?;
    for (key, value) in obj {
        if key.starts_with('_') {
            if let Some(meta) = value.get("usage_metadata") {
                if let Some(usage) = LlmUsage::from_json(meta) {
                    return Some(usage);
                }
            }
        }
    }
    None
}

/// LLM client: given messages, returns assistant text and optional tool_calls.
///
/// Implementations: [`MockLlm`] (scripted responses for tests),
/// [`ChatOpenAi`] (OpenAI-compatible Chat Completions API).
///
/// **Interaction**: Wrapped by [`AgentLlm`] which owns configuration,
/// fallback and token accounting.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Invoke one turn: read messages, return the assistant response.
    async fn invoke(&self, messages: &[Message]) -> Result<LlmResponse, LlmError>;

    /// Streaming variant: invoke with optional chunk sender for token streaming.
    ///
    /// When `chunk_tx` is `Some`, implementations should send `MessageChunk`
    /// tokens through the channel as they arrive. The method returns the
    /// complete `LlmResponse` after all tokens are collected.
    ///
    /// Default implementation calls `invoke()` and sends the full content as
    /// one chunk, so non-streaming providers degrade gracefully.
    async fn invoke_stream(
        &self,
        messages: &[Message],
        chunk_tx: Option<mpsc::Sender<MessageChunk>>,
    ) -> Result<LlmResponse, LlmError> {
        let response = self.invoke(messages).await?;
        if let Some(tx) = chunk_tx {
            if !response.content.is_empty() {
                let _ = tx
                    .send(MessageChunk {
                        content: response.content.clone(),
                    })
                    .await;
            }
        }
        Ok(response)
    }

    /// Tools offered to the model for this client, when any.
    fn tools(&self) -> Option<&[ToolSpec]> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct StubLlm {
        content: String,
    }

    #[async_trait]
    impl LlmClient for StubLlm {
        async fn invoke(&self, _messages: &[Message]) -> Result<LlmResponse, LlmError> {
            Ok(LlmResponse {
                content: self.content.clone(),
                ..Default::default()
            })
        }
    }

    /// **Scenario**: Default invoke_stream sends the whole content as one chunk.
    #[tokio::test]
    async fn default_invoke_stream_sends_single_chunk() {
        let llm = StubLlm {
            content: "hello".to_string(),
        };
        let (tx, mut rx) = mpsc::channel(2);
        let resp = llm.invoke_stream(&[], Some(tx)).await.unwrap();
        assert_eq!(resp.content, "hello");
        let chunk = rx.recv().await.expect("one chunk");
        assert_eq!(chunk.content, "hello");
    }

    /// **Scenario**: merge_max takes the per-field maximum across chunk reports.
    #[test]
    fn usage_merge_max_per_field() {
        let a = LlmUsage {
            prompt_tokens: 10,
            completion_tokens: 0,
            total_tokens: 10,
        };
        let b = LlmUsage {
            prompt_tokens: 10,
            completion_tokens: 7,
            total_tokens: 17,
        };
        let merged = a.merge_max(b);
        assert_eq!(merged.prompt_tokens, 10);
        assert_eq!(merged.completion_tokens, 7);
        assert_eq!(merged.total_tokens, 17);
    }

    /// **Scenario**: extract_usage prefers the typed usage field.
    #[test]
    fn extract_usage_prefers_typed_field() {
        let resp = LlmResponse {
            usage: Some(LlmUsage {
                prompt_tokens: 3,
                completion_tokens: 4,
                total_tokens: 7,
            }),
            raw: Some(json!({"usage": {"prompt_tokens": 99}})),
            ..Default::default()
        };
        assert_eq!(extract_usage(&resp).unwrap().total_tokens, 7);
    }

    /// **Scenario**: extract_usage walks the raw fallback chain, including
    /// nested `_raw_response.usage_metadata` and input/output spellings.
    #[test]
    fn extract_usage_walks_fallback_chain() {
        let resp = LlmResponse {
            raw: Some(json!({
                "_raw_response": {"usage_metadata": {"input_tokens": 5, "output_tokens": 6, "total_tokens": 11}}
            })),
            ..Default::default()
        };
        let usage = extract_usage(&resp).unwrap();
        assert_eq!(usage.prompt_tokens, 5);
        assert_eq!(usage.completion_tokens, 6);
        assert_eq!(usage.total_tokens, 11);
    }

    /// **Scenario**: a private-prefixed attribute holding usage_metadata is
    /// found when no known path matches.
    #[test]
    fn extract_usage_scans_private_attributes() {
        let resp = LlmResponse {
            raw: Some(json!({
                "_vendor_blob": {"usage_metadata": {"prompt_tokens": 2, "completion_tokens": 1}}
            })),
            ..Default::default()
        };
        let usage = extract_usage(&resp).unwrap();
        assert_eq!(usage.total_tokens, 3);
    }

    /// **Scenario**: no usage anywhere yields None.
    #[test]
    fn extract_usage_none_when_absent() {
        let resp = LlmResponse {
            raw: Some(json!({"choices": []})),
            ..Default::default()
        };
        assert!(extract_usage(&resp).is_none());
    }
}
