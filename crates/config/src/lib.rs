//! Configuration loading, validation, and management for cairn.
//!
//! Loads configuration from `~/.cairn/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.cairn/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the completion provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Default model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per LLM response
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Completion API base URL
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Request loop settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// History compaction settings
    #[serde(default)]
    pub compaction: CompactionConfig,

    /// Tool provider circuit breaker settings
    #[serde(default)]
    pub health: HealthConfig,

    /// Tool discovery settings
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Verification rule settings
    #[serde(default)]
    pub verification: VerificationConfig,

    /// Telemetry configuration
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_api_url() -> String {
    "https://api.anthropic.com".into()
}
fn default_true() -> bool {
    true
}

const REDACTED: &str = "[REDACTED]";

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => REDACTED,
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("api_url", &self.api_url)
            .field("agent", &self.agent)
            .field("compaction", &self.compaction)
            .field("health", &self.health)
            .field("tools", &self.tools)
            .field("verification", &self.verification)
            .field("telemetry", &self.telemetry)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Base system prompt. Evidence and retry feedback are appended to it.
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Upper bound on tool round-trips within one attempt
    #[serde(default = "default_max_tool_loops")]
    pub max_tool_loops: u32,

    /// Idle timeout while waiting for the next stream event
    #[serde(default = "default_stream_timeout")]
    pub stream_timeout_secs: u64,

    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,

    #[serde(default = "default_lookup_timeout")]
    pub lookup_timeout_secs: u64,

    /// Hits requested from each knowledge source
    #[serde(default = "default_recall_limit")]
    pub recall_limit: usize,
}

fn default_system_prompt() -> String {
    "You are a helpful assistant. Answer the user's question directly and concisely. \
     When you rely on a numbered source, cite it inline as [n]. \
     Use *single asterisks* for emphasis and plain URLs for links."
        .into()
}
fn default_max_tool_loops() -> u32 {
    5
}
fn default_stream_timeout() -> u64 {
    60
}
fn default_tool_timeout() -> u64 {
    30
}
fn default_lookup_timeout() -> u64 {
    10
}
fn default_recall_limit() -> usize {
    5
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            max_tool_loops: default_max_tool_loops(),
            stream_timeout_secs: default_stream_timeout(),
            tool_timeout_secs: default_tool_timeout(),
            lookup_timeout_secs: default_lookup_timeout(),
            recall_limit: default_recall_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Context window budget in estimated tokens
    #[serde(default = "default_context_limit")]
    pub context_limit_tokens: usize,

    /// Fraction of the budget that triggers compaction (exclusive)
    #[serde(default = "default_trigger_ratio")]
    pub trigger_ratio: f64,

    /// Messages kept verbatim after the summary
    #[serde(default = "default_keep_last_n")]
    pub keep_last_n: usize,

    #[serde(default = "default_summarizer_timeout")]
    pub summarizer_timeout_secs: u64,
}

fn default_context_limit() -> usize {
    100_000
}
fn default_trigger_ratio() -> f64 {
    0.8
}
fn default_keep_last_n() -> usize {
    10
}
fn default_summarizer_timeout() -> u64 {
    60
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            context_limit_tokens: default_context_limit(),
            trigger_ratio: default_trigger_ratio(),
            keep_last_n: default_keep_last_n(),
            summarizer_timeout_secs: default_summarizer_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Consecutive failures before a provider is demoted
    #[serde(default = "default_degraded_threshold")]
    pub degraded_threshold: u32,

    /// Consecutive failures before a provider is excluded
    #[serde(default = "default_unhealthy_threshold")]
    pub unhealthy_threshold: u32,

    /// Seconds after the last failure before an unhealthy provider is
    /// offered again as a probe. 0 disables probing.
    #[serde(default = "default_probe_after")]
    pub probe_after_secs: u64,
}

fn default_degraded_threshold() -> u32 {
    2
}
fn default_unhealthy_threshold() -> u32 {
    3
}
fn default_probe_after() -> u64 {
    60
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            degraded_threshold: default_degraded_threshold(),
            unhealthy_threshold: default_unhealthy_threshold(),
            probe_after_secs: default_probe_after(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Seconds before the discovered tool list is considered stale
    #[serde(default = "default_catalog_ttl")]
    pub catalog_ttl_secs: u64,

    #[serde(default = "default_discovery_timeout")]
    pub discovery_timeout_secs: u64,
}

fn default_catalog_ttl() -> u64 {
    300
}
fn default_discovery_timeout() -> u64 {
    10
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            catalog_ttl_secs: default_catalog_ttl(),
            discovery_timeout_secs: default_discovery_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationConfig {
    /// Cap on the minimum-length rule's threshold
    #[serde(default = "default_min_length_cap")]
    pub min_length_cap: usize,
}

fn default_min_length_cap() -> usize {
    50
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            min_length_cap: default_min_length_cap(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Whether span recording is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.cairn/config.toml).
    ///
    /// Environment overrides:
    /// - `CAIRN_API_KEY` (highest priority), then `ANTHROPIC_API_KEY`
    /// - `CAIRN_MODEL`
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&Self::config_path())?;

        if let Ok(key) = std::env::var("CAIRN_API_KEY") {
            config.api_key = Some(key);
        } else if config.api_key.is_none() {
            config.api_key = std::env::var("ANTHROPIC_API_KEY").ok();
        }

        if let Ok(model) = std::env::var("CAIRN_MODEL") {
            config.default_model = model;
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
        dirs_home().join(".cairn")
    }

    /// Path of the main config file.
    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.default_temperature) {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        let ratio = self.compaction.trigger_ratio;
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(ConfigError::ValidationError(
                "compaction.trigger_ratio must be in (0.0, 1.0]".into(),
            ));
        }

        if self.health.degraded_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "health.degraded_threshold must be at least 1".into(),
            ));
        }

        if self.health.unhealthy_threshold < self.health.degraded_threshold {
            return Err(ConfigError::ValidationError(
                "health.unhealthy_threshold must be >= health.degraded_threshold".into(),
            ));
        }

        if self.agent.max_tool_loops == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_tool_loops must be at least 1".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Render the effective configuration as TOML with secrets masked.
    pub fn to_redacted_toml(&self) -> Result<String, ConfigError> {
        let mut shown = self.clone();
        if shown.api_key.is_some() {
            shown.api_key = Some(REDACTED.into());
        }
        toml::to_string_pretty(&shown).map_err(|e| ConfigError::SerializeError(e.to_string()))
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            api_url: default_api_url(),
            agent: AgentConfig::default(),
            compaction: CompactionConfig::default(),
            health: HealthConfig::default(),
            tools: ToolsConfig::default(),
            verification: VerificationConfig::default(),
            telemetry: TelemetryConfig::default(),
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

    #[error("Failed to render configuration: {0}")]
    SerializeError(String),

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
