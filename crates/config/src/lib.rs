//! Configuration loading, validation, and management for local-llm.
//!
//! Loads configuration from `~/.local-llm/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.local-llm/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Backend connection settings
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Per-request chat options
    #[serde(default)]
    pub chat: ChatOptions,

    /// Reverse-proxy companion settings
    #[serde(default)]
    pub proxy: ProxyConfig,
}

/// Where the OpenAI-compatible backend lives and how to authenticate.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Transport timeout for a single request
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://localhost:11434/v1".into()
}
fn default_request_timeout() -> u64 {
    120
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Sampling and loop options applied to every conversation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatOptions {
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_top_p")]
    pub top_p: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Max number of back and forth with the LLM per run
    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: u32,
}

fn default_model() -> String {
    "llama3.1".into()
}
fn default_temperature() -> f32 {
    1.0
}
fn default_top_p() -> f32 {
    1.0
}
fn default_max_tokens() -> u32 {
    3000
}
fn default_max_tool_iterations() -> u32 {
    10
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            model: default_model(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            max_tokens: default_max_tokens(),
            max_tool_iterations: default_max_tool_iterations(),
        }
    }
}

/// Settings for the stateless forwarding proxy.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_target_url")]
    pub target_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_proxy_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_proxy_host")]
    pub host: String,

    #[serde(default = "default_proxy_port")]
    pub port: u16,
}

fn default_target_url() -> String {
    "http://localhost:11434".into()
}
fn default_proxy_timeout() -> u64 {
    120
}
fn default_proxy_host() -> String {
    "0.0.0.0".into()
}
fn default_proxy_port() -> u16 {
    8080
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            target_url: default_target_url(),
            api_key: None,
            timeout_secs: default_proxy_timeout(),
            host: default_proxy_host(),
            port: default_proxy_port(),
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

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &redact(&self.api_key))
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl std::fmt::Debug for ProxyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyConfig")
            .field("target_url", &self.target_url)
            .field("api_key", &redact(&self.api_key))
            .field("timeout_secs", &self.timeout_secs)
            .field("host", &self.host)
            .field("port", &self.port)
            .finish()
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.local-llm/config.toml),
    /// then apply environment overrides.
    ///
    /// Client side:
    /// - `LOCAL_LLM_API_KEY`, falling back to `OPENAI_API_KEY`
    /// - `LOCAL_LLM_BASE_URL`
    /// - `LOCAL_LLM_MODEL`
    ///
    /// Proxy side (same names the add-on startup script exports):
    /// - `LLM_SERVER_URL`, `API_KEY`, `TIMEOUT`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
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

    /// Apply overrides from a variable lookup (the process environment in
    /// production, a map in tests).
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(key) = var("LOCAL_LLM_API_KEY").or_else(|| {
            self.provider
                .api_key
                .is_none()
                .then(|| var("OPENAI_API_KEY"))
                .flatten()
        }) {
            self.provider.api_key = Some(key);
        }
        if let Some(url) = var("LOCAL_LLM_BASE_URL") {
            self.provider.base_url = url;
        }
        if let Some(model) = var("LOCAL_LLM_MODEL") {
            self.chat.model = model;
        }

        if let Some(url) = var("LLM_SERVER_URL") {
            self.proxy.target_url = url;
        }
        if let Some(key) = var("API_KEY").filter(|k| !k.is_empty()) {
            self.proxy.api_key = Some(key);
        }
        if let Some(timeout) = var("TIMEOUT") {
            self.proxy.timeout_secs = timeout.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!("TIMEOUT must be whole seconds, got `{timeout}`"))
            })?;
        }

        self.provider.base_url = self.provider.base_url.trim_end_matches('/').to_string();
        self.proxy.target_url = self.proxy.target_url.trim_end_matches('/').to_string();
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".local-llm")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.chat.temperature) {
            return Err(ConfigError::ValidationError(
                "chat.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if !(0.0..=1.0).contains(&self.chat.top_p) {
            return Err(ConfigError::ValidationError(
                "chat.top_p must be between 0.0 and 1.0".into(),
            ));
        }

        if self.chat.max_tool_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "chat.max_tool_iterations must be at least 1".into(),
            ));
        }

        if self.chat.model.trim().is_empty() {
            return Err(ConfigError::ValidationError("chat.model must not be empty".into()));
        }

        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
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
