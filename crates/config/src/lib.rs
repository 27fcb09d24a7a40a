//! Configuration loading, validation, and endpoint resolution for Tauti.
//!
//! Loads configuration from `~/.tauti/config.toml` with environment
//! variable overrides. Validates all settings at startup. The loaded
//! [`AppConfig`] is a read-only value: each chat turn takes a snapshot and
//! changes only apply to the next turn.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tauti_core::request::{ProviderKind, ResolvedEndpoint};

/// The root configuration structure.
///
/// Maps directly to `~/.tauti/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global default provider
    #[serde(default)]
    pub provider: ProviderKind,

    /// Global default base endpoint
    #[serde(default = "default_base_url", alias = "baseUrl")]
    pub base_url: String,

    /// Global default credential
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "apiKey")]
    pub api_key: Option<String>,

    /// Model selected when none is given on the command line
    #[serde(default = "default_model")]
    pub model: String,

    /// Override for the `ollama` executable used to launch the backend
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "ollamaPath")]
    pub ollama_path: Option<String>,

    /// Per-model overrides of provider / endpoint / credential
    #[serde(default)]
    pub models: Vec<ModelConfig>,

    /// Use streaming transport (false = always one blocking call)
    #[serde(default = "default_true", alias = "streamingEnabled")]
    pub streaming_enabled: bool,

    /// Default for the per-turn "think" flag
    #[serde(default = "default_true", alias = "defaultThink")]
    pub default_think: bool,

    /// Context window: how many trailing messages are sent
    #[serde(default = "default_max_context_messages", alias = "maxContextMessages")]
    pub max_context_messages: usize,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// External tool servers, in fallback order
    #[serde(default, alias = "mcpServers")]
    pub tool_servers: Vec<ToolServerConfig>,

    /// ReAct loop policy
    #[serde(default)]
    pub react: ReactConfig,

    /// Backend probe / launch timing
    #[serde(default)]
    pub availability: AvailabilityConfig,
}

fn default_base_url() -> String {
    "http://localhost:11434".into()
}
fn default_model() -> String {
    "gpt-oss:20b".into()
}
fn default_max_context_messages() -> usize {
    20
}
fn default_temperature() -> f32 {
    0.6
}
fn default_true() -> bool {
    true
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

/// Treat empty strings the same as absent values.
fn non_empty(s: &Option<String>) -> Option<&str> {
    s.as_deref().filter(|v| !v.trim().is_empty())
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("ollama_path", &self.ollama_path)
            .field("models", &self.models)
            .field("streaming_enabled", &self.streaming_enabled)
            .field("default_think", &self.default_think)
            .field("max_context_messages", &self.max_context_messages)
            .field("temperature", &self.temperature)
            .field("tool_servers", &self.tool_servers)
            .field("react", &self.react)
            .field("availability", &self.availability)
            .finish()
    }
}

/// A per-model override entry. Absent fields fall back to the globals.
#[derive(Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderKind>,

    #[serde(default, skip_serializing_if = "Option::is_none", alias = "baseUrl")]
    pub base_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none", alias = "apiKey")]
    pub api_key: Option<String>,
}

impl std::fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelConfig")
            .field("name", &self.name)
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("api_key", &redact(&self.api_key))
            .finish()
    }
}

/// How a tool request envelope reaches the tool process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RequestTransport {
    /// `--tool <name> --args <json>` appended to the argument list
    #[default]
    Arguments,
    /// Newline-delimited envelopes on standard input
    Stdin,
    /// Envelopes written to a temporary file, passed as `--request <path>`
    TempFile,
}

/// An external tool server: one command spawned per tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolServerConfig {
    pub id: String,

    /// Display name shown to the model
    pub name: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub transport: RequestTransport,

    /// Send an `initialize` envelope before `tools/call`
    #[serde(default)]
    pub initialize: bool,

    #[serde(default = "default_tool_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_tool_timeout_secs() -> u64 {
    60
}

impl ToolServerConfig {
    /// Minimal enabled server running `command` with the default transport.
    pub fn new(id: impl Into<String>, command: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            enabled: true,
            command: command.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            description: String::new(),
            transport: RequestTransport::default(),
            initialize: false,
            timeout_secs: default_tool_timeout_secs(),
        }
    }
}

/// What the ReAct loop does when the model names a tool but its argument
/// payload is not valid JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MalformedActionPolicy {
    /// Emit a diagnostic and abort the loop
    #[default]
    Abort,
    /// Treat the response as the final answer without a diagnostic
    Conclude,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default)]
    pub on_malformed_action: MalformedActionPolicy,
}

fn default_max_attempts() -> u32 {
    5
}

impl Default for ReactConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            on_malformed_action: MalformedActionPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityConfig {
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,
}

fn default_probe_timeout_ms() -> u64 {
    3000
}
fn default_poll_interval_ms() -> u64 {
    900
}
fn default_deadline_secs() -> u64 {
    12
}

impl Default for AvailabilityConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: default_probe_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            deadline_secs: default_deadline_secs(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.tauti/config.toml),
    /// then apply environment variable overrides:
    /// - `TAUTI_PROVIDER`, `TAUTI_BASE_URL`, `TAUTI_MODEL`, `TAUTI_OLLAMA_PATH`
    /// - `TAUTI_API_KEY` (falls back to `OPENAI_API_KEY`)
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
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

    /// Apply overrides from an environment lookup.
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(provider) = lookup("TAUTI_PROVIDER") {
            self.provider = match provider.trim().to_ascii_lowercase().as_str() {
                "ollama" => ProviderKind::Ollama,
                "openai" => ProviderKind::OpenAi,
                other => {
                    return Err(ConfigError::ValidationError(format!(
                        "TAUTI_PROVIDER must be 'ollama' or 'openai', got '{other}'"
                    )));
                }
            };
        }

        if let Some(base_url) = lookup("TAUTI_BASE_URL") {
            self.base_url = base_url;
        }

        if let Some(model) = lookup("TAUTI_MODEL") {
            self.model = model;
        }

        if let Some(path) = lookup("TAUTI_OLLAMA_PATH") {
            self.ollama_path = Some(path);
        }

        if non_empty(&self.api_key).is_none() {
            self.api_key = lookup("TAUTI_API_KEY").or_else(|| lookup("OPENAI_API_KEY"));
        }

        Ok(())
    }

    /// Derive the effective (provider, base endpoint, credential) for `model`.
    ///
    /// A `[[models]]` entry named `model` shadows the globals field by field;
    /// absent or empty fields fall back. Pure and infallible.
    pub fn resolve(&self, model: &str) -> ResolvedEndpoint {
        let entry = self.models.iter().find(|m| m.name == model);

        let provider = entry.and_then(|m| m.provider).unwrap_or(self.provider);
        let base_url = entry
            .and_then(|m| non_empty(&m.base_url))
            .unwrap_or(&self.base_url)
            .to_string();
        let api_key = entry
            .and_then(|m| non_empty(&m.api_key))
            .or_else(|| non_empty(&self.api_key))
            .map(str::to_string);

        ResolvedEndpoint {
            provider,
            base_url,
            api_key,
        }
    }

    /// Enabled tool servers in configuration order.
    pub fn enabled_tool_servers(&self) -> Vec<ToolServerConfig> {
        self.tool_servers.iter().filter(|s| s.enabled).cloned().collect()
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".tauti")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.react.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "react.max_attempts must be at least 1".into(),
            ));
        }

        if self.max_context_messages == 0 {
            return Err(ConfigError::ValidationError(
                "max_context_messages must be at least 1".into(),
            ));
        }

        let mut seen = HashSet::new();
        for server in &self.tool_servers {
            if !seen.insert(server.id.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate tool server id '{}'",
                    server.id
                )));
            }
            if server.command.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "tool server '{}' has an empty command",
                    server.id
                )));
            }
        }

        Ok(())
    }

    /// Generate a default config TOML string (for a starter file).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Ollama,
            base_url: default_base_url(),
            api_key: None,
            model: default_model(),
            ollama_path: None,
            models: vec![ModelConfig {
                name: "qwen3:0.6b".into(),
                provider: Some(ProviderKind::Ollama),
                base_url: Some(default_base_url()),
                api_key: None,
            }],
            streaming_enabled: true,
            default_think: true,
            max_context_messages: default_max_context_messages(),
            temperature: default_temperature(),
            tool_servers: vec![],
            react: ReactConfig::default(),
            availability: AvailabilityConfig::default(),
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
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
