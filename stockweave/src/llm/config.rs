//! Per-agent LLM configuration: file format, registry, and cache refresh.
//!
//! The config file is YAML with one entry per agent plus a top-level
//! `fallback` block. The registry polls the file's mtime at most once per
//! poll interval; a change bumps a generation counter, which invalidates
//! every cached [`super::AgentLlm`] model while keeping the `AgentLlm`
//! identity stable (subsequent `get_llm` calls rebuild).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant, SystemTime};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::{ChatOpenAi, LlmClient, LlmError, MockLlm};

/// Default mtime poll interval for the config file.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Configuration of one chat model: provider id, model, sampling params.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LlmConfig {
    pub provider: String,
    pub model_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub streaming: Option<bool>,
    /// Provider-specific knobs (base_url, api_key_env, mock content, ...).
    #[serde(default, flatten)]
    pub extra_params: HashMap<String, Value>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model_name: "gpt-4o-mini".to_string(),
            temperature: None,
            streaming: None,
            extra_params: HashMap::new(),
        }
    }
}

/// Fallback chain settings: ordered alternative configs tried when the
/// primary provider fails.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FallbackSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub providers: Vec<LlmConfig>,
}

fn default_max_retries() -> u32 {
    3
}

impl Default for FallbackSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            max_retries: default_max_retries(),
            providers: Vec::new(),
        }
    }
}

/// On-disk shape of the agent LLM config file.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AgentLlmConfigFile {
    /// Per-agent configs keyed by agent name.
    #[serde(default)]
    pub agents: HashMap<String, LlmConfig>,
    /// Config used for agents without an entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<LlmConfig>,
    /// Process-wide fallback chain.
    #[serde(default)]
    pub fallback: FallbackSettings,
}

impl AgentLlmConfigFile {
    /// Parses the YAML config file content.
    pub fn parse(content: &str) -> Result<Self, LlmError> {
        serde_yaml::from_str(content).map_err(|e| LlmError::Config(e.to_string()))
    }
}

/// Builds concrete [`LlmClient`] instances from an [`LlmConfig`].
///
/// **Interaction**: Held by [`LlmConfigRegistry`]; `AgentLlm::get_llm`
/// calls it on cache miss. Tests install a scripted factory.
pub trait LlmFactory: Send + Sync {
    fn build(&self, config: &LlmConfig) -> Result<Arc<dyn LlmClient>, LlmError>;
}

/// Default factory: OpenAI-compatible chat providers plus a scripted mock.
///
/// Providers `openai`, `upstage` and `openai_compatible` all go through the
/// Chat Completions API; `base_url` / `api_key_env` in `extra_params` point
/// non-OpenAI endpoints at the same client. Provider `mock` returns a
/// [`MockLlm`] seeded from `extra_params.content` (tests, dry runs).
pub struct OpenAiFactory;

impl LlmFactory for OpenAiFactory {
    fn build(&self, config: &LlmConfig) -> Result<Arc<dyn LlmClient>, LlmError> {
        match config.provider.as_str() {
            "openai" | "upstage" | "openai_compatible" => {
                let mut client = ChatOpenAi::from_config(config);
                if let Some(t) = config.temperature {
                    client = client.with_temperature(t);
                }
                Ok(Arc::new(client))
            }
            "mock" => {
                let content = config
                    .extra_params
                    .get("content")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                Ok(Arc::new(MockLlm::with_content(content)))
            }
            other => Err(LlmError::UnknownProvider(other.to_string())),
        }
    }
}

struct RegistryInner {
    file: AgentLlmConfigFile,
    mtime: Option<SystemTime>,
    last_poll: Option<Instant>,
}

/// Process-scoped registry of per-agent LLM configs.
///
/// Holds the parsed config file, the factory, and a generation counter.
/// `AgentLlm` instances compare their cached generation against
/// [`LlmConfigRegistry::generation`] and rebuild their model when stale.
pub struct LlmConfigRegistry {
    path: Option<PathBuf>,
    poll_interval: Duration,
    factory: Arc<dyn LlmFactory>,
    inner: RwLock<RegistryInner>,
    generation: AtomicU64,
}

impl LlmConfigRegistry {
    /// Loads the registry from a YAML file with the default factory.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Arc<Self>, LlmError> {
        Self::from_file_with_factory(path, Arc::new(OpenAiFactory))
    }

    /// Loads the registry from a YAML file with a custom factory.
    pub fn from_file_with_factory(
        path: impl AsRef<Path>,
        factory: Arc<dyn LlmFactory>,
    ) -> Result<Arc<Self>, LlmError> {
        let path = path.as_ref().to_path_buf();
        let content =
            std::fs::read_to_string(&path).map_err(|e| LlmError::Config(e.to_string()))?;
        let file = AgentLlmConfigFile::parse(&content)?;
        let mtime = std::fs::metadata(&path)
            .and_then(|m| m.modified())
            .ok();
        Ok(Arc::new(Self {
            path: Some(path),
            poll_interval: DEFAULT_POLL_INTERVAL,
            factory,
            inner: RwLock::new(RegistryInner {
                file,
                mtime,
                last_poll: None,
            }),
            generation: AtomicU64::new(0),
        }))
    }

    /// Builds an in-memory registry (no file, no polling) — tests and
    /// embedded configuration.
    pub fn from_config(file: AgentLlmConfigFile) -> Arc<Self> {
        Self::from_config_with_factory(file, Arc::new(OpenAiFactory))
    }

    /// In-memory registry with a custom factory.
    pub fn from_config_with_factory(
        file: AgentLlmConfigFile,
        factory: Arc<dyn LlmFactory>,
    ) -> Arc<Self> {
        Arc::new(Self {
            path: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            factory,
            inner: RwLock::new(RegistryInner {
                file,
                mtime: None,
                last_poll: None,
            }),
            generation: AtomicU64::new(0),
        })
    }

    /// Returns the config for one agent: its entry, else the file default,
    /// else the process default.
    pub fn config_for(&self, agent_name: &str) -> LlmConfig {
        let inner = self.inner.read().expect("registry lock poisoned");
        inner
            .file
            .agents
            .get(agent_name)
            .cloned()
            .or_else(|| inner.file.default.clone())
            .unwrap_or_default()
    }

    /// Current fallback settings.
    pub fn fallback(&self) -> FallbackSettings {
        self.inner
            .read()
            .expect("registry lock poisoned")
            .file
            .fallback
            .clone()
    }

    /// Current config generation; bumped on every reload.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// The client factory for this registry.
    pub fn factory(&self) -> Arc<dyn LlmFactory> {
        Arc::clone(&self.factory)
    }

    /// Replaces the in-memory config and bumps the generation (used when the
    /// admin surface pushes a config without touching the file).
    pub fn update_config(&self, file: AgentLlmConfigFile) {
        {
            let mut inner = self.inner.write().expect("registry lock poisoned");
            inner.file = file;
        }
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Polls the config file mtime (at most once per poll interval unless
    /// `force`) and reloads on change. Returns true when the config changed.
    ///
    /// Concurrent refreshes are idempotent: the generation only advances
    /// when the parsed file actually replaced the previous one.
    pub fn maybe_refresh(&self, force: bool) -> bool {
        let Some(path) = self.path.as_ref() else {
            return false;
        };

        {
            let inner = self.inner.read().expect("registry lock poisoned");
            if !force {
                if let Some(last) = inner.last_poll {
                    if last.elapsed() < self.poll_interval {
                        return false;
                    }
                }
            }
        }

        let mtime = match std::fs::metadata(path).and_then(|m| m.modified()) {
            Ok(t) => Some(t),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "config file stat failed");
                None
            }
        };

        let mut inner = self.inner.write().expect("registry lock poisoned");
        inner.last_poll = Some(Instant::now());
        if !force && mtime == inner.mtime {
            return false;
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "config file read failed");
                return false;
            }
        };
        match AgentLlmConfigFile::parse(&content) {
            Ok(file) => {
                inner.file = file;
                inner.mtime = mtime;
                drop(inner);
                self.generation.fetch_add(1, Ordering::AcqRel);
                debug!(path = %path.display(), "agent llm config reloaded");
                true
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "config file parse failed, keeping previous config");
                false
            }
        }
    }
}

/// Process-wide cache refresh: polls the config file and invalidates cached
/// agent models on change. Safe to call from any task; concurrent calls are
/// idempotent.
pub fn refresh_agent_llm_cache(registry: &LlmConfigRegistry, force: bool) -> bool {
    registry.maybe_refresh(force)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    const SAMPLE: &str = r#"
agents:
  question_analyzer:
    provider: openai
    model_name: gpt-4o
    temperature: 0.1
  summarizer:
    provider: mock
    model_name: test-model
    content: "요약 결과"
default:
  provider: openai
  model_name: gpt-4o-mini
fallback:
  enabled: true
  max_retries: 3
  providers:
    - provider: upstage
      model_name: solar-pro
"#;

    /// **Scenario**: YAML parses into per-agent entries, default and fallback.
    #[test]
    fn parse_sample_config() {
        let file = AgentLlmConfigFile::parse(SAMPLE).unwrap();
        assert_eq!(file.agents["question_analyzer"].model_name, "gpt-4o");
        assert_eq!(file.agents["question_analyzer"].temperature, Some(0.1));
        assert!(file.fallback.enabled);
        assert_eq!(file.fallback.providers.len(), 1);
        assert_eq!(file.default.as_ref().unwrap().model_name, "gpt-4o-mini");
    }

    /// **Scenario**: config_for falls back agent entry → default → process default.
    #[test]
    fn config_for_fallback_order() {
        let registry = LlmConfigRegistry::from_config(AgentLlmConfigFile::parse(SAMPLE).unwrap());
        assert_eq!(registry.config_for("question_analyzer").model_name, "gpt-4o");
        assert_eq!(registry.config_for("unknown_agent").model_name, "gpt-4o-mini");

        let empty = LlmConfigRegistry::from_config(AgentLlmConfigFile::default());
        assert_eq!(empty.config_for("anything").provider, "openai");
    }

    /// **Scenario**: extra params flatten into the config (mock content).
    #[test]
    fn extra_params_flattened() {
        let file = AgentLlmConfigFile::parse(SAMPLE).unwrap();
        let summarizer = &file.agents["summarizer"];
        assert_eq!(
            summarizer.extra_params.get("content").and_then(|v| v.as_str()),
            Some("요약 결과")
        );
    }

    /// **Scenario**: editing the file and forcing a refresh bumps the generation;
    /// a second forced refresh with the same content also reloads (force wins).
    #[test]
    fn refresh_reloads_on_mtime_change() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(SAMPLE.as_bytes()).unwrap();
        tmp.flush().unwrap();

        let registry = LlmConfigRegistry::from_file(tmp.path()).unwrap();
        let gen0 = registry.generation();

        let updated = SAMPLE.replace("gpt-4o", "gpt-4.1");
        std::fs::write(tmp.path(), &updated).unwrap();

        assert!(refresh_agent_llm_cache(&registry, true));
        assert!(registry.generation() > gen0);
        assert_eq!(
            registry.config_for("question_analyzer").model_name,
            "gpt-4.1"
        );
    }

    /// **Scenario**: non-forced refresh within the poll interval is a no-op.
    #[test]
    fn refresh_respects_poll_interval() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(SAMPLE.as_bytes()).unwrap();
        tmp.flush().unwrap();

        let registry = LlmConfigRegistry::from_file(tmp.path()).unwrap();
        // First poll records last_poll; second non-forced call is throttled.
        registry.maybe_refresh(false);
        std::fs::write(tmp.path(), SAMPLE.replace("gpt-4o", "gpt-5")).unwrap();
        assert!(!registry.maybe_refresh(false));
    }

    /// **Scenario**: the default factory rejects unknown providers.
    #[test]
    fn factory_rejects_unknown_provider() {
        let config = LlmConfig {
            provider: "carrier-pigeon".to_string(),
            ..Default::default()
        };
        let err = match OpenAiFactory.build(&config) {
            Err(e) => e,
            Ok(_) => panic!("expected build to fail"),
        };
        assert!(matches!(err, LlmError::UnknownProvider(_)));
    }
}
