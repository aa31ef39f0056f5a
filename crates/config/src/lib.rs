//! Configuration loading, validation, and management for Tiller.
//!
//! Loads configuration from `~/.tiller/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// The root configuration structure.
///
/// Maps directly to `~/.tiller/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Provider API key (env override: TILLER_API_KEY).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Provider base URL (OpenAI-compatible endpoint).
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Default model.
    #[serde(default = "default_model")]
    pub model: String,

    /// Default temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Default max tokens per model response.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Loop controller settings.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Tool retry settings.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Circuit breaker settings.
    #[serde(default)]
    pub breaker: BreakerConfig,

    /// Context budget settings.
    #[serde(default)]
    pub context: ContextConfig,

    /// Approval queue settings.
    #[serde(default)]
    pub approval: ApprovalConfig,

    /// Persistent store settings.
    #[serde(default)]
    pub store: StoreConfig,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("engine", &self.engine)
            .field("retry", &self.retry)
            .field("breaker", &self.breaker)
            .field("context", &self.context)
            .field("approval", &self.approval)
            .field("store", &self.store)
            .finish()
    }
}

/// Loop controller settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Hard cap on iterations per task.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Upper bound on any string folded into history from a tool result.
    #[serde(default = "default_max_result_chars")]
    pub max_result_chars: usize,

    /// Consecutive identical tool calls before corrective guidance is
    /// injected.
    #[serde(default = "default_repeat_threshold")]
    pub repeat_threshold: usize,
}

fn default_max_iterations() -> u32 {
    25
}
fn default_max_result_chars() -> usize {
    4000
}
fn default_repeat_threshold() -> usize {
    3
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_result_chars: default_max_result_chars(),
            repeat_threshold: default_repeat_threshold(),
        }
    }
}

/// Tool retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt (2 → up to 3 attempts total).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Backoff schedule in milliseconds, indexed by retry number.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: Vec<u64>,

    /// Rolling health window size per tool.
    #[serde(default = "default_health_window")]
    pub health_window: usize,

    /// Per-call timeout for backend execution, in seconds.
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

fn default_max_retries() -> u32 {
    2
}
fn default_backoff_ms() -> Vec<u64> {
    vec![100, 500, 1000]
}
fn default_health_window() -> usize {
    20
}
fn default_tool_timeout_secs() -> u64 {
    60
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_ms: default_backoff_ms(),
            health_window: default_health_window(),
            tool_timeout_secs: default_tool_timeout_secs(),
        }
    }
}

/// Circuit breaker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit opens.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Cooldown before the open circuit admits a trial call, in seconds.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    /// Track a separate circuit per tool in addition to the global one.
    /// Off by default; the engine only gates on the global circuit.
    #[serde(default)]
    pub per_tool: bool,
}

fn default_failure_threshold() -> u32 {
    5
}
fn default_cooldown_secs() -> u64 {
    30
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown_secs(),
            per_tool: false,
        }
    }
}

/// Context budget settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Estimated-token threshold above which history is compressed.
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,

    /// Most recent turns always kept verbatim.
    #[serde(default = "default_preserve_count")]
    pub preserve_count: usize,

    /// Working-memory tier capacity before eviction runs.
    #[serde(default = "default_working_capacity")]
    pub working_capacity: usize,

    /// Half-life for working-memory relevance decay, in seconds.
    #[serde(default = "default_half_life_secs")]
    pub half_life_secs: u64,

    /// Relevance floor below which working items are evicted.
    #[serde(default = "default_relevance_floor")]
    pub relevance_floor: f64,

    /// How many candidate items relevance selection returns.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

fn default_token_budget() -> usize {
    8192
}
fn default_preserve_count() -> usize {
    6
}
fn default_working_capacity() -> usize {
    50
}
fn default_half_life_secs() -> u64 {
    300
}
fn default_relevance_floor() -> f64 {
    0.15
}
fn default_top_k() -> usize {
    8
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            token_budget: default_token_budget(),
            preserve_count: default_preserve_count(),
            working_capacity: default_working_capacity(),
            half_life_secs: default_half_life_secs(),
            relevance_floor: default_relevance_floor(),
            top_k: default_top_k(),
        }
    }
}

/// Approval queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalConfig {
    /// Seconds a pending operation stays valid before expiring.
    #[serde(default = "default_pending_ttl_secs")]
    pub pending_ttl_secs: u64,
}

fn default_pending_ttl_secs() -> u64 {
    600
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            pending_ttl_secs: default_pending_ttl_secs(),
        }
    }
}

/// Persistent store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory for persisted documents. Empty = `~/.tiller/store`.
    #[serde(default)]
    pub data_dir: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: String::new(),
        }
    }
}

impl StoreConfig {
    /// Resolve the data directory, falling back to `~/.tiller/store`.
    pub fn resolved_dir(&self) -> PathBuf {
        if !self.data_dir.is_empty() {
            return PathBuf::from(&self.data_dir);
        }
        PathBuf::from(home_dir()).join(".tiller").join("store")
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            engine: EngineConfig::default(),
            retry: RetryConfig::default(),
            breaker: BreakerConfig::default(),
            context: ContextConfig::default(),
            approval: ApprovalConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from the default path with environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path();
        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            Self::default()
        };

        if let Ok(key) = std::env::var("TILLER_API_KEY") {
            config.api_key = Some(key);
        } else if config.api_key.is_none() {
            config.api_key = std::env::var("OPENAI_API_KEY").ok();
        }
        if let Ok(base_url) = std::env::var("TILLER_BASE_URL") {
            config.base_url = base_url;
        }
        if let Ok(model) = std::env::var("TILLER_MODEL") {
            config.model = model;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load from a specific file path (no env overrides).
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// The default config path: `~/.tiller/config.toml`.
    pub fn config_path() -> PathBuf {
        PathBuf::from(home_dir()).join(".tiller").join("config.toml")
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.max_iterations == 0 {
            return Err(ConfigError::Invalid(
                "engine.max_iterations must be at least 1".into(),
            ));
        }
        if self.breaker.failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "breaker.failure_threshold must be at least 1".into(),
            ));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::Invalid(format!(
                "temperature {} out of range [0.0, 2.0]",
                self.temperature
            )));
        }
        if self.context.preserve_count == 0 {
            return Err(ConfigError::Invalid(
                "context.preserve_count must be at least 1".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.context.relevance_floor) {
            return Err(ConfigError::Invalid(format!(
                "context.relevance_floor {} out of range [0.0, 1.0)",
                self.context.relevance_floor
            )));
        }
        if self.retry.backoff_ms.is_empty() {
            return Err(ConfigError::Invalid(
                "retry.backoff_ms must not be empty".into(),
            ));
        }
        Ok(())
    }
}

fn home_dir() -> String {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.engine.max_iterations, 25);
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.breaker.cooldown_secs, 30);
        assert!(!config.breaker.per_tool);
        assert_eq!(config.retry.backoff_ms, vec![100, 500, 1000]);
    }

    #[test]
    fn parse_partial_toml() {
        let toml_str = r#"
            model = "claude-sonnet-4"

            [engine]
            max_iterations = 10

            [breaker]
            failure_threshold = 3
        "#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.model, "claude-sonnet-4");
        assert_eq!(config.engine.max_iterations, 10);
        assert_eq!(config.breaker.failure_threshold, 3);
        // Untouched sections keep defaults
        assert_eq!(config.context.preserve_count, 6);
        assert_eq!(config.retry.max_retries, 2);
    }

    #[test]
    fn zero_iterations_rejected() {
        let mut config = AppConfig::default();
        config.engine.max_iterations = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn out_of_range_temperature_rejected() {
        let mut config = AppConfig::default();
        config.temperature = 3.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_backoff_rejected() {
        let mut config = AppConfig::default();
        config.retry.backoff_ms.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn api_key_redacted_in_debug() {
        let mut config = AppConfig::default();
        config.api_key = Some("sk-secret-value".into());
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret-value"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn store_dir_resolution() {
        let mut config = AppConfig::default();
        config.store.data_dir = "/tmp/tiller-data".into();
        assert_eq!(
            config.store.resolved_dir(),
            PathBuf::from("/tmp/tiller-data")
        );
    }
}
