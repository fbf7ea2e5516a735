//! Configuration loading, validation, and management for cliz.
//!
//! Loads configuration from `~/.cliz/config.toml` (or an explicit path) with
//! environment variable overrides. Validates all settings at startup.

use cliz_core::tool::ToolDescriptor;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.cliz/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Run tools without confirmation (the `--auto` flag also enables this)
    #[serde(default)]
    pub auto: bool,

    /// Language the assistant answers in
    #[serde(default = "default_respond_language")]
    pub respond_language: String,

    /// Persist and replay conversation history across invocations
    #[serde(default)]
    pub chat_history: bool,

    /// Maximum reason/act cycles per user turn
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// LLM connection settings
    #[serde(default)]
    pub llm: LlmConfig,

    /// Tool execution limits
    #[serde(default)]
    pub executor: ExecutorConfig,

    /// History storage settings
    #[serde(default)]
    pub history: HistoryConfig,

    /// Preferred command-line tools, in prompt order
    #[serde(default)]
    pub tools: Vec<ToolDescriptor>,
}

fn default_respond_language() -> String {
    "English".into()
}
fn default_max_iterations() -> u32 {
    20
}

#[derive(Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Stream tokens from the provider while the answer is generated
    #[serde(default)]
    pub stream: bool,
}

fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_request_timeout() -> u64 {
    120
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            base_url: default_base_url(),
            api_key: None,
            temperature: default_temperature(),
            max_tokens: None,
            request_timeout_secs: default_request_timeout(),
            stream: false,
        }
    }
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &redact(&self.api_key))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("stream", &self.stream)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Wall-clock limit for one tool process
    #[serde(default = "default_tool_timeout")]
    pub timeout_secs: u64,

    /// Cap on captured bytes, applied to stdout and stderr separately
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
}

fn default_tool_timeout() -> u64 {
    60
}
fn default_max_output_bytes() -> usize {
    16 * 1024
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_tool_timeout(),
            max_output_bytes: default_max_output_bytes(),
        }
    }
}

/// Where persisted sessions live.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryBackend {
    #[default]
    Sqlite,
    Jsonl,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default)]
    pub backend: HistoryBackend,

    /// Database file (sqlite) or directory (jsonl); defaults under `~/.cliz`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// How many earlier runs are replayed to the model
    #[serde(default = "default_history_runs", skip_serializing_if = "Option::is_none")]
    pub history_runs: Option<usize>,
}

fn default_history_runs() -> Option<usize> {
    Some(3)
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            backend: HistoryBackend::default(),
            path: None,
            history_runs: default_history_runs(),
        }
    }
}

impl HistoryConfig {
    /// The resolved storage location for the configured backend.
    pub fn resolved_path(&self) -> PathBuf {
        if let Some(path) = &self.path {
            return match path.strip_prefix("~") {
                Ok(rest) => dirs_home().join(rest),
                Err(_) => path.clone(),
            };
        }
        match self.backend {
            HistoryBackend::Sqlite => AppConfig::config_dir().join("cliz.db"),
            HistoryBackend::Jsonl => AppConfig::config_dir().join("sessions"),
        }
    }
}

impl AppConfig {
    /// Load configuration.
    ///
    /// With `path`, the file must exist. Without it, `~/.cliz/config.toml` is
    /// used when present and defaults otherwise.
    ///
    /// Environment overrides:
    /// - `CLIZ_API_KEY`, then `OPENAI_API_KEY` (only when no key is configured)
    /// - `CLIZ_MODEL`
    /// - `CLIZ_BASE_URL`
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) if !path.exists() => {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
            Some(path) => Self::load_from(path)?,
            None => Self::load_from(&Self::config_dir().join("config.toml"))?,
        };

        if config.llm.api_key.is_none() {
            config.llm.api_key = std::env::var("CLIZ_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }

        if let Ok(model) = std::env::var("CLIZ_MODEL") {
            config.llm.model = model;
        }

        if let Ok(base_url) = std::env::var("CLIZ_BASE_URL") {
            config.llm.base_url = base_url;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".cliz")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(ConfigError::ValidationError(
                "llm.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.max_iterations == 0 {
            return Err(ConfigError::ValidationError("max_iterations must be > 0".into()));
        }

        if self.executor.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "executor.timeout_secs must be > 0".into(),
            ));
        }

        if self.executor.max_output_bytes == 0 {
            return Err(ConfigError::ValidationError(
                "executor.max_output_bytes must be > 0".into(),
            ));
        }

        if let Some(tool) = self.tools.iter().find(|t| t.name.trim().is_empty()) {
            return Err(ConfigError::ValidationError(format!(
                "tool names must not be empty (description: {:?})",
                tool.description
            )));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.llm.api_key.is_some()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            auto: false,
            respond_language: default_respond_language(),
            chat_history: false,
            max_iterations: default_max_iterations(),
            llm: LlmConfig::default(),
            executor: ExecutorConfig::default(),
            history: HistoryConfig::default(),
            tools: vec![],
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
