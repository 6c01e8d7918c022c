//! Per-agent LLM capability: configuration, provider fallback, token accounting.
//!
//! [`AgentLlm`] is the single entry point agents use for model calls. It
//! resolves the agent's config from the registry, caches the built client
//! until the config generation changes, runs the fallback chain on provider
//! failure, and flushes one token-usage record per successful call when a
//! user/project context is present.
//!
//! Fallback attempts build a temporary client from the fallback config
//! instead of mutating the cached primary; the primary config is therefore
//! "restored" by construction, including after a successful fallback call.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

use crate::message::Message;
use crate::token_usage::{TokenType, UsageContext};

use super::{
    extract_usage, LlmClient, LlmConfig, LlmConfigRegistry, LlmError, LlmResponse, MessageChunk,
    StructuredOutput,
};

/// Token-tracking context for one LLM call; alias of the shared
/// [`UsageContext`]. Tracking is active iff both `user_id` and
/// `project_type` are present.
pub type InvokeOptions = UsageContext;

struct CachedClient {
    client: Arc<dyn LlmClient>,
    generation: u64,
}

/// Per-agent LLM handle. Identity is stable across config refreshes; only
/// the internal model reference is rebuilt.
pub struct AgentLlm {
    agent_name: String,
    registry: Arc<LlmConfigRegistry>,
    cached: Mutex<Option<CachedClient>>,
}

impl AgentLlm {
    pub fn new(agent_name: impl Into<String>, registry: Arc<LlmConfigRegistry>) -> Self {
        Self {
            agent_name: agent_name.into(),
            registry,
            cached: Mutex::new(None),
        }
    }

    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    /// Model name from the agent's current config.
    pub fn model_name(&self) -> String {
        self.registry.config_for(&self.agent_name).model_name
    }

    /// Provider id from the agent's current config.
    pub fn provider(&self) -> String {
        self.registry.config_for(&self.agent_name).provider
    }

    /// Returns the chat model for this agent's current config.
    ///
    /// `refresh` forces a config reload before resolving. Otherwise the
    /// cached client is reused until the registry generation moves (mtime
    /// poll is piggybacked here, bounded by the registry's poll interval).
    pub async fn get_llm(&self, refresh: bool) -> Result<Arc<dyn LlmClient>, LlmError> {
        self.registry.maybe_refresh(refresh);
        let generation = self.registry.generation();
        let mut cached = self.cached.lock().await;
        if !refresh {
            if let Some(c) = cached.as_ref() {
                if c.generation == generation {
                    return Ok(Arc::clone(&c.client));
                }
            }
        }
        let config = self.registry.config_for(&self.agent_name);
        let client = self.registry.factory().build(&config)?;
        *cached = Some(CachedClient {
            client: Arc::clone(&client),
            generation,
        });
        Ok(client)
    }

    /// One attempt against either the primary (cached) client or a
    /// temporary client built from a fallback config.
    async fn attempt(
        &self,
        override_config: Option<&LlmConfig>,
        messages: &[Message],
        opts: &InvokeOptions,
    ) -> Result<LlmResponse, LlmError> {
        let (client, model_name) = match override_config {
            None => (self.get_llm(false).await?, self.model_name()),
            Some(cfg) => (
                self.registry.factory().build(cfg)?,
                cfg.model_name.clone(),
            ),
        };

        let response = client.invoke(messages).await?;
        self.record_usage(&response, model_name, opts).await;
        Ok(response)
    }

    async fn record_usage(&self, response: &LlmResponse, model_name: String, opts: &InvokeOptions) {
        let Some(mut tracker) = opts.tracker(TokenType::Llm, &model_name) else {
            return;
        };
        let Some(usage) = extract_usage(response) else {
            return;
        };
        tracker.add_tokens(
            usage.prompt_tokens,
            usage.completion_tokens,
            Some(usage.total_tokens),
            0.0,
        );
        tracker
            .flush(opts.queue.as_ref().expect("tracking checked"))
            .await;
    }

    /// Invokes the agent's model, falling back through the configured
    /// provider chain on failure.
    ///
    /// Attempts `[primary] + fallback.providers[..max_retries-1]` in order
    /// with a one-second pause between attempts; the last provider error is
    /// re-raised when every attempt fails. With fallback disabled the
    /// primary is tried exactly once.
    pub async fn invoke_with_fallback(
        &self,
        messages: &[Message],
        opts: &InvokeOptions,
    ) -> Result<LlmResponse, LlmError> {
        let fallback = self.registry.fallback();
        if !fallback.enabled {
            return self.attempt(None, messages, opts).await;
        }

        let extra = (fallback.max_retries as usize).saturating_sub(1);
        let mut providers: Vec<Option<LlmConfig>> = vec![None];
        providers.extend(fallback.providers.iter().take(extra).cloned().map(Some));
        let total = providers.len();

        let mut last_err: Option<LlmError> = None;
        for (idx, provider) in providers.into_iter().enumerate() {
            if idx > 0 {
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            match &provider {
                None => info!(agent = %self.agent_name, provider = %self.provider(), "llm call (primary)"),
                Some(cfg) => info!(agent = %self.agent_name, provider = %cfg.provider, attempt = idx, total, "llm call (fallback)"),
            }
            match self.attempt(provider.as_ref(), messages, opts).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    warn!(agent = %self.agent_name, attempt = idx, error = %e, "llm attempt failed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or(LlmError::AllAttemptsFailed))
    }

    /// Streams the model's answer, sending chunks as they arrive.
    ///
    /// Models without streaming degrade gracefully: the trait default sends
    /// the single non-streamed result as one chunk. Usage across chunks is
    /// merged by per-field maximum inside the client; any raw-payload usage
    /// is merged the same way here before accounting.
    pub async fn stream(
        &self,
        messages: &[Message],
        chunk_tx: mpsc::Sender<MessageChunk>,
        opts: &InvokeOptions,
    ) -> Result<LlmResponse, LlmError> {
        let client = self.get_llm(false).await?;
        let mut response = client.invoke_stream(messages, Some(chunk_tx)).await?;
        if let (Some(acc), Some(raw)) = (response.usage, extract_usage(&LlmResponse {
            usage: None,
            raw: response.raw.clone(),
            ..Default::default()
        })) {
            response.usage = Some(acc.merge_max(raw));
        }
        self.record_usage(&response, self.model_name(), opts).await;
        Ok(response)
    }

    /// Wraps this handle for schema-validated JSON output.
    pub fn structured<T: serde::de::DeserializeOwned>(
        self: &Arc<Self>,
        schema_json: impl Into<String>,
    ) -> StructuredOutput<T> {
        StructuredOutput::new(Arc::clone(self), schema_json.into())
    }
}
