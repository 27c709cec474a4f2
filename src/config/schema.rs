use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const DEFAULT_API_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Hard ceiling for the process-wide context window.
pub const MAX_CONTEXT_WINDOW: usize = 500;

/// Top-level runtime configuration (`config.toml`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Workspace directory holding `state.db` - computed, not serialized
    #[serde(skip)]
    pub workspace_dir: PathBuf,
    /// Path to config.toml - computed, not serialized
    #[serde(skip)]
    pub config_path: PathBuf,
    /// API key for the generation service. Overridden by `CHATWIRE_API_KEY`.
    pub api_key: Option<String>,
    /// Base URL of an OpenAI-compatible chat completions API.
    pub api_url: String,
    /// Model routed through the generation service.
    pub default_model: String,
    /// Sampling temperature (0.0–2.0). Default: `0.7`.
    pub default_temperature: f64,

    /// Sliding-window history (`[context]`).
    pub context: ContextConfig,
    /// Streaming render policy (`[stream]`).
    pub stream: StreamConfig,
    /// Auto-reply rule evaluation (`[rules]`).
    pub rules: RulesConfig,
    /// Per-chat notes (`[memory]`).
    pub memory: MemoryConfig,
    /// When and how the agent answers (`[agent]`).
    pub agent: AgentConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace_dir: PathBuf::from("."),
            config_path: PathBuf::from("config.toml"),
            api_key: None,
            api_url: DEFAULT_API_URL.into(),
            default_model: DEFAULT_MODEL.into(),
            default_temperature: 0.7,
            context: ContextConfig::default(),
            stream: StreamConfig::default(),
            rules: RulesConfig::default(),
            memory: MemoryConfig::default(),
            agent: AgentConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Process-wide maximum number of cached messages per chat.
    pub max_window: usize,
    /// Per-chat window overrides keyed by chat id. Clamped to `max_window`.
    pub chat_windows: HashMap<String, usize>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_window: 30,
            chat_windows: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Minimum snapshot growth (chars) before a non-final edit.
    pub min_growth_chars: usize,
    /// Minimum interval (ms) between non-final edits.
    pub min_interval_ms: u64,
    /// Surface model reasoning as a quoted block above the answer.
    pub show_reasoning: bool,
    /// Text shown while nothing has been generated yet.
    pub placeholder: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            min_growth_chars: 50,
            min_interval_ms: 6000,
            show_reasoning: false,
            placeholder: "...".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    /// How long loaded rule rows are reused before re-reading storage.
    pub cache_ttl_secs: u64,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self { cache_ttl_secs: 30 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Maximum notes injected into the prompt, newest first.
    pub recall_limit: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self { recall_limit: 50 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Base system prompt.
    pub system_prompt: String,
    /// Bot username without `@`; a mention triggers generation.
    pub bot_handle: Option<String>,
    /// Message prefixes that trigger generation (e.g. `"!ai"`).
    pub trigger_prefixes: Vec<String>,
    /// Generate for every non-command message.
    pub respond_to_all: bool,
    /// A newer message from the same sender in the same chat aborts the
    /// in-flight response.
    pub interrupt_on_new_message: bool,
    /// Text sent when the generation service fails.
    pub apology: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: "You are a helpful member of a group chat. Keep answers short.".into(),
            bot_handle: None,
            trigger_prefixes: vec!["!ai".into()],
            respond_to_all: false,
            interrupt_on_new_message: false,
            apology: "Sorry, I couldn't produce a reply this time.".into(),
        }
    }
}

fn default_config_dir() -> Result<PathBuf> {
    let dirs = directories::UserDirs::new().context("Could not determine home directory")?;
    Ok(dirs.home_dir().join(".chatwire"))
}

impl Config {
    /// Load `config.toml` from `path` (or `~/.chatwire/config.toml`).
    /// A missing file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => default_config_dir()?.join("config.toml"),
        };

        let mut config = if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read config file {}", config_path.display()))?;
            toml::from_str::<Config>(&contents).context("Failed to parse config file")?
        } else {
            tracing::info!(path = %config_path.display(), "No config file found; using defaults");
            Config::default()
        };

        config.workspace_dir = config_path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        config.config_path = config_path;
        config.apply_env_overrides();
        config.validate();
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(key) = env_non_empty("CHATWIRE_API_KEY") {
            self.api_key = Some(key);
        }
        if let Some(url) = env_non_empty("CHATWIRE_API_URL") {
            self.api_url = url;
        }
        if let Some(model) = env_non_empty("CHATWIRE_MODEL") {
            self.default_model = model;
        }
        if let Some(workspace) = env_non_empty("CHATWIRE_WORKSPACE") {
            self.workspace_dir = PathBuf::from(workspace);
        }
    }

    /// Clamp out-of-range values instead of refusing to start.
    pub fn validate(&mut self) {
        if self.context.max_window == 0 || self.context.max_window > MAX_CONTEXT_WINDOW {
            let clamped = self.context.max_window.clamp(1, MAX_CONTEXT_WINDOW);
            tracing::warn!(
                configured = self.context.max_window,
                clamped,
                "context.max_window out of range"
            );
            self.context.max_window = clamped;
        }
        if !(0.0..=2.0).contains(&self.default_temperature) {
            tracing::warn!(
                configured = self.default_temperature,
                "default_temperature out of range; using 0.7"
            );
            self.default_temperature = 0.7;
        }
        if self.memory.recall_limit == 0 {
            self.memory.recall_limit = MemoryConfig::default().recall_limit;
        }
        if self.stream.placeholder.trim().is_empty() {
            self.stream.placeholder = StreamConfig::default().placeholder;
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.workspace_dir.join("state.db")
    }
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_match_stream_policy() {
        let config = Config::default();
        assert_eq!(config.stream.min_growth_chars, 50);
        assert_eq!(config.stream.min_interval_ms, 6000);
        assert_eq!(config.memory.recall_limit, 50);
        assert!(!config.stream.show_reasoning);
    }

    #[test]
    fn load_missing_file_uses_defaults_and_sets_workspace() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.context.max_window, 30);
        assert_eq!(config.config_path, path);
    }

    #[test]
    fn load_parses_partial_sections() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
default_model = "local-model"

[context]
max_window = 3

[context.chat_windows]
"chat-1" = 2

[stream]
show_reasoning = true

[agent]
bot_handle = "wirebot"
"#,
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.context.max_window, 3);
        assert_eq!(config.context.chat_windows.get("chat-1"), Some(&2));
        assert!(config.stream.show_reasoning);
        assert_eq!(config.stream.min_interval_ms, 6000);
        assert_eq!(config.agent.bot_handle.as_deref(), Some("wirebot"));
        assert_eq!(config.agent.trigger_prefixes, vec!["!ai".to_string()]);
    }

    #[test]
    fn validate_clamps_window_and_temperature() {
        let mut config = Config::default();
        config.context.max_window = 0;
        config.default_temperature = 9.0;
        config.validate();
        assert_eq!(config.context.max_window, 1);
        assert!((config.default_temperature - 0.7).abs() < f64::EPSILON);

        config.context.max_window = MAX_CONTEXT_WINDOW + 1;
        config.validate();
        assert_eq!(config.context.max_window, MAX_CONTEXT_WINDOW);
    }
}
