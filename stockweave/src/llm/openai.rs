//! OpenAI-compatible Chat Completions client implementing [`LlmClient`].
//!
//! Covers OpenAI itself and OpenAI-compatible providers (Upstage) via a
//! `base_url` override in the agent config. Requires `OPENAI_API_KEY` (or
//! the env var named by `api_key_env`) unless an explicit config is given.
//!
//! # Streaming
//!
//! Implements `invoke_stream()` for token-by-token streaming. Content deltas
//! are sent through the channel as they arrive; usage is accumulated across
//! chunks with a per-field maximum, since some providers repeat running
//! totals per chunk and others report usage only on the final chunk.
//!
//! **Interaction**: Built by [`super::OpenAiFactory`]; wrapped by
//! [`super::AgentLlm`].

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tracing::{debug, trace};

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionMessageToolCalls, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage, ChatCompletionTool,
        ChatCompletionTools, CreateChatCompletionRequestArgs, FunctionObject,
    },
    Client,
};

use crate::message::Message;

use super::{LlmClient, LlmConfig, LlmError, LlmResponse, LlmUsage, MessageChunk, ToolCall, ToolSpec};

/// OpenAI-compatible Chat Completions client.
pub struct ChatOpenAi {
    client: Client<OpenAIConfig>,
    model: String,
    tools: Option<Vec<ToolSpec>>,
    temperature: Option<f32>,
}

impl ChatOpenAi {
    /// Build client with default config (API key from `OPENAI_API_KEY` env).
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            model: model.into(),
            tools: None,
            temperature: None,
        }
    }

    /// Build client with custom config (e.g. custom API key or base URL).
    pub fn with_config(config: OpenAIConfig, model: impl Into<String>) -> Self {
        Self {
            client: Client::with_config(config),
            model: model.into(),
            tools: None,
            temperature: None,
        }
    }

    /// Build from an agent [`LlmConfig`]: `base_url` and `api_key_env`
    /// extra params override the OpenAI defaults (Upstage and other
    /// OpenAI-compatible endpoints).
    pub fn from_config(config: &LlmConfig) -> Self {
        let mut openai_config = OpenAIConfig::new();
        if let Some(base) = config
            .extra_params
            .get("base_url")
            .and_then(|v| v.as_str())
        {
            openai_config = openai_config.with_api_base(base);
        }
        if let Some(env_name) = config
            .extra_params
            .get("api_key_env")
            .and_then(|v| v.as_str())
        {
            if let Ok(key) = std::env::var(env_name) {
                openai_config = openai_config.with_api_key(key);
            }
        }
        Self::with_config(openai_config, config.model_name.clone())
    }

    /// Set tools for this completion (enables tool_calls in the response).
    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Set temperature (0–2). Lower values are more deterministic.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Convert our `Message` list to OpenAI request messages.
    fn messages_to_request(messages: &[Message]) -> Vec<ChatCompletionRequestMessage> {
        messages
            .iter()
            .map(|m| match m {
                Message::System(s) => ChatCompletionRequestMessage::System(
                    ChatCompletionRequestSystemMessage::from(s.as_str()),
                ),
                Message::User(s) => ChatCompletionRequestMessage::User(
                    ChatCompletionRequestUserMessage::from(s.as_str()),
                ),
                Message::Assistant(s) => {
                    ChatCompletionRequestMessage::Assistant((s.as_str()).into())
                }
            })
            .collect()
    }

    fn tools_to_request(tools: &[ToolSpec]) -> Vec<ChatCompletionTools> {
        tools
            .iter()
            .map(|t| {
                ChatCompletionTools::Function(ChatCompletionTool {
                    function: FunctionObject {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        parameters: Some(t.input_schema.clone()),
                        ..Default::default()
                    },
                })
            })
            .collect()
    }
}

#[async_trait]
impl LlmClient for ChatOpenAi {
    async fn invoke(&self, messages: &[Message]) -> Result<LlmResponse, LlmError> {
        let openai_messages = Self::messages_to_request(messages);
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(self.model.clone());
        args.messages(openai_messages);
        if let Some(ref tools) = self.tools {
            args.tools(Self::tools_to_request(tools));
        }
        if let Some(t) = self.temperature {
            args.temperature(t);
        }

        let request = args
            .build()
            .map_err(|e| LlmError::Provider(format!("request build failed: {}", e)))?;

        debug!(
            model = %self.model,
            message_count = messages.len(),
            tools_count = self.tools.as_ref().map(|t| t.len()).unwrap_or(0),
            "chat completions create"
        );

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| LlmError::Provider(e.to_string()))?;

        let raw = serde_json::to_value(&response).ok();
        if let Ok(js) = serde_json::to_string(&response) {
            trace!(response = %js, "chat completions response body");
        }

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::Provider("no choices returned".to_string()))?;

        let msg = choice.message;
        let content = msg.content.unwrap_or_default();
        let tool_calls: Vec<ToolCall> = msg
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .filter_map(|tc| {
                if let ChatCompletionMessageToolCalls::Function(f) = tc {
                    Some(ToolCall {
                        name: f.function.name,
                        arguments: f.function.arguments,
                        id: Some(f.id),
                    })
                } else {
                    None
                }
            })
            .collect();

        let usage = response.usage.map(|u| LlmUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        Ok(LlmResponse {
            content,
            tool_calls,
            usage,
            raw,
        })
    }

    /// Streaming variant: sends message chunks as they arrive.
    ///
    /// Usage is accumulated with [`LlmUsage::merge_max`] over every chunk
    /// that reports it. Tool calls are accumulated by index across deltas.
    async fn invoke_stream(
        &self,
        messages: &[Message],
        chunk_tx: Option<mpsc::Sender<MessageChunk>>,
    ) -> Result<LlmResponse, LlmError> {
        let Some(chunk_tx) = chunk_tx else {
            return self.invoke(messages).await;
        };

        let openai_messages = Self::messages_to_request(messages);
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(self.model.clone());
        args.messages(openai_messages);
        args.stream(true);
        if let Some(ref tools) = self.tools {
            args.tools(Self::tools_to_request(tools));
        }
        if let Some(t) = self.temperature {
            args.temperature(t);
        }

        let request = args
            .build()
            .map_err(|e| LlmError::Provider(format!("request build failed: {}", e)))?;

        debug!(model = %self.model, message_count = messages.len(), "chat completions create_stream");

        let mut stream = self
            .client
            .chat()
            .create_stream(request)
            .await
            .map_err(|e| LlmError::Provider(e.to_string()))?;

        let mut full_content = String::new();
        let mut sent_any_content = false;
        // Tool calls accumulator: index -> (id, name, arguments)
        let mut tool_call_map: std::collections::HashMap<u32, (String, String, String)> =
            std::collections::HashMap::new();
        let mut stream_usage: Option<LlmUsage> = None;

        while let Some(result) = stream.next().await {
            let response = result.map_err(|e| LlmError::Provider(e.to_string()))?;

            if let Some(ref u) = response.usage {
                let chunk_usage = LlmUsage {
                    prompt_tokens: u.prompt_tokens,
                    completion_tokens: u.completion_tokens,
                    total_tokens: u.total_tokens,
                };
                stream_usage = Some(match stream_usage {
                    Some(acc) => acc.merge_max(chunk_usage),
                    None => chunk_usage,
                });
            }

            for choice in response.choices {
                let delta = &choice.delta;
                if let Some(ref content) = delta.content {
                    if !content.is_empty() {
                        full_content.push_str(content);
                        sent_any_content = true;
                        let _ = chunk_tx
                            .send(MessageChunk {
                                content: content.clone(),
                            })
                            .await;
                    }
                }
                if let Some(ref tool_calls) = delta.tool_calls {
                    for tc in tool_calls {
                        let entry = tool_call_map.entry(tc.index).or_insert_with(|| {
                            (tc.id.clone().unwrap_or_default(), String::new(), String::new())
                        });
                        if let Some(ref id) = tc.id {
                            if !id.is_empty() {
                                entry.0 = id.clone();
                            }
                        }
                        if let Some(ref func) = tc.function {
                            if let Some(ref name) = func.name {
                                entry.1.push_str(name);
                            }
                            if let Some(ref args) = func.arguments {
                                entry.2.push_str(args);
                            }
                        }
                    }
                }
            }
        }

        // Some proxies send content only in the final payload, not in deltas.
        if !sent_any_content && !full_content.is_empty() {
            let _ = chunk_tx
                .send(MessageChunk {
                    content: full_content.clone(),
                })
                .await;
        }

        let mut tool_calls: Vec<ToolCall> = tool_call_map
            .into_iter()
            .map(|(_, (id, name, arguments))| ToolCall {
                name,
                arguments,
                id: if id.is_empty() { None } else { Some(id) },
            })
            .collect();
        tool_calls.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(LlmResponse {
            content: full_content,
            tool_calls,
            usage: stream_usage,
            raw: None,
        })
    }

    fn tools(&self) -> Option<&[ToolSpec]> {
        self.tools.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// **Scenario**: from_config honors base_url extra param.
    #[test]
    fn from_config_builds_client() {
        let mut extra = HashMap::new();
        extra.insert(
            "base_url".to_string(),
            serde_json::json!("https://api.upstage.ai/v1"),
        );
        let config = LlmConfig {
            provider: "upstage".to_string(),
            model_name: "solar-pro".to_string(),
            temperature: Some(0.2),
            streaming: None,
            extra_params: extra,
        };
        let client = ChatOpenAi::from_config(&config);
        assert_eq!(client.model, "solar-pro");
    }

    /// **Scenario**: invoke() against an unreachable API base returns a
    /// provider error (no real API key needed).
    #[tokio::test]
    async fn invoke_with_unreachable_base_returns_error() {
        let config = OpenAIConfig::new()
            .with_api_key("test-key")
            .with_api_base("https://127.0.0.1:1");
        let client = ChatOpenAi::with_config(config, "gpt-4o-mini");
        let result = client.invoke(&[Message::user("안녕")]).await;
        assert!(matches!(result, Err(LlmError::Provider(_))));
    }

    /// **Scenario**: invoke_stream() with no channel delegates to invoke().
    #[tokio::test]
    async fn invoke_stream_with_none_channel_delegates_to_invoke() {
        let config = OpenAIConfig::new()
            .with_api_key("test-key")
            .with_api_base("https://127.0.0.1:1");
        let client = ChatOpenAi::with_config(config, "gpt-4o-mini");
        let res = client.invoke_stream(&[Message::user("hi")], None).await;
        assert!(res.is_err());
    }
}
