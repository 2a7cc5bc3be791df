//! Configuration loading, validation, and management for Colloquy.
//!
//! Loads configuration from `~/.colloquy/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.colloquy/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Message batching (debounce) settings
    #[serde(default)]
    pub batching: BatchingConfig,

    /// Complexity routing settings
    #[serde(default)]
    pub routing: RoutingConfig,

    /// History window assembly settings
    #[serde(default)]
    pub context: ContextConfig,

    /// Tool-calling loop settings
    #[serde(default)]
    pub agent: AgentConfig,
}

/// Debounce windows for the message batcher.
///
/// Direct conversations flush quickly; group conversations wait longer so a
/// multi-party exchange settles before the agent speaks. Each scope has its
/// own hard ceiling, measured from the batch's first arrival, past which a
/// flush happens regardless of continued activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchingConfig {
    /// Quiet-period window for direct conversations, in seconds
    #[serde(default = "default_direct_window_secs")]
    pub direct_window_secs: u64,

    /// Quiet-period window for group conversations, in seconds
    #[serde(default = "default_group_window_secs")]
    pub group_window_secs: u64,

    /// Hard flush ceiling for direct conversations, in seconds
    #[serde(default = "default_direct_max_wait_secs")]
    pub direct_max_wait_secs: u64,

    /// Hard flush ceiling for group conversations, in seconds
    #[serde(default = "default_group_max_wait_secs")]
    pub group_max_wait_secs: u64,

    /// Whether group batches are keyed per (conversation, sender) rather
    /// than per conversation alone
    #[serde(default = "default_true")]
    pub per_sender_in_groups: bool,
}

fn default_direct_window_secs() -> u64 {
    5
}
fn default_group_window_secs() -> u64 {
    30
}
fn default_direct_max_wait_secs() -> u64 {
    30
}
fn default_group_max_wait_secs() -> u64 {
    120
}
fn default_true() -> bool {
    true
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            direct_window_secs: default_direct_window_secs(),
            group_window_secs: default_group_window_secs(),
            direct_max_wait_secs: default_direct_max_wait_secs(),
            group_max_wait_secs: default_group_max_wait_secs(),
            per_sender_in_groups: true,
        }
    }
}

/// Which (provider, model) pair handles each complexity tier, plus the
/// retry/fallback and classification knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Backend for `simple` queries
    #[serde(default = "default_simple_choice")]
    pub simple: ModelChoice,

    /// Backend for `complex` queries
    #[serde(default = "default_complex_choice")]
    pub complex: ModelChoice,

    /// Distinct provider used as the last fallback attempt
    #[serde(default = "default_fallback_provider")]
    pub fallback_provider: String,

    /// Delay before the same-provider retry, in milliseconds
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Timeout for the complexity classifier, in seconds
    #[serde(default = "default_classifier_timeout_secs")]
    pub classifier_timeout_secs: u64,

    /// Lifetime of a cached per-conversation complexity, in seconds
    #[serde(default = "default_complexity_cache_ttl_secs")]
    pub complexity_cache_ttl_secs: u64,
}

/// One configured (provider, model) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelChoice {
    /// Registered provider name
    pub provider: String,

    /// Model identifier passed to the provider
    pub model: String,

    /// Output-token ceiling. `None` means "use the per-model table".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

fn default_simple_choice() -> ModelChoice {
    ModelChoice {
        provider: "openrouter".into(),
        model: "anthropic/claude-haiku-4".into(),
        max_output_tokens: None,
    }
}
fn default_complex_choice() -> ModelChoice {
    ModelChoice {
        provider: "openrouter".into(),
        model: "anthropic/claude-sonnet-4".into(),
        max_output_tokens: None,
    }
}
fn default_fallback_provider() -> String {
    "openai".into()
}
fn default_retry_delay_ms() -> u64 {
    500
}
fn default_classifier_timeout_secs() -> u64 {
    2
}
fn default_complexity_cache_ttl_secs() -> u64 {
    300
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            simple: default_simple_choice(),
            complex: default_complex_choice(),
            fallback_provider: default_fallback_provider(),
            retry_delay_ms: default_retry_delay_ms(),
            classifier_timeout_secs: default_classifier_timeout_secs(),
            complexity_cache_ttl_secs: default_complexity_cache_ttl_secs(),
        }
    }
}

/// Output-token ceiling for a model when the config does not override it.
///
/// Models we know get a tuned ceiling; everything else gets a conservative
/// default.
pub fn default_max_output_tokens(model: &str) -> u32 {
    match model {
        m if m.contains("claude-haiku") => 2048,
        m if m.contains("claude-sonnet") => 8192,
        m if m.contains("claude-opus") => 8192,
        m if m.contains("gpt-4o-mini") => 2048,
        m if m.contains("gpt-4o") => 8192,
        m if m.contains("o3") => 16384,
        _ => 4096,
    }
}

/// History window assembly settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Token budget for the assembled history window
    #[serde(default = "default_budget_tokens")]
    pub budget_tokens: usize,

    /// Number of most-recent turns always included before relevance
    /// selection applies to older history
    #[serde(default = "default_recent_turns")]
    pub recent_turns: usize,
}

fn default_budget_tokens() -> usize {
    4096
}
fn default_recent_turns() -> usize {
    8
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            budget_tokens: default_budget_tokens(),
            recent_turns: default_recent_turns(),
        }
    }
}

/// Tool-calling loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum model calls per turn
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,

    /// Corrective retries allowed per turn for unfulfilled-promise replies
    #[serde(default = "default_promise_retry_budget")]
    pub promise_retry_budget: u32,

    /// Whole-turn timeout, in seconds
    #[serde(default = "default_turn_timeout_secs")]
    pub turn_timeout_secs: u64,

    /// Sampling temperature for model calls
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_max_rounds() -> u32 {
    24
}
fn default_promise_retry_budget() -> u32 {
    3
}
fn default_turn_timeout_secs() -> u64 {
    180
}
fn default_temperature() -> f32 {
    0.7
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            promise_retry_budget: default_promise_retry_budget(),
            turn_timeout_secs: default_turn_timeout_secs(),
            temperature: default_temperature(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.colloquy/config.toml).
    ///
    /// Environment overrides (highest priority):
    /// - `COLLOQUY_SIMPLE_MODEL` / `COLLOQUY_COMPLEX_MODEL`
    /// - `COLLOQUY_FALLBACK_PROVIDER`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        if let Ok(model) = std::env::var("COLLOQUY_SIMPLE_MODEL") {
            config.routing.simple.model = model;
        }
        if let Ok(model) = std::env::var("COLLOQUY_COMPLEX_MODEL") {
            config.routing.complex.model = model;
        }
        if let Ok(provider) = std::env::var("COLLOQUY_FALLBACK_PROVIDER") {
            config.routing.fallback_provider = provider;
        }

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
        dirs_home().join(".colloquy")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.temperature < 0.0 || self.agent.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "agent.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.agent.max_rounds == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_rounds must be at least 1".into(),
            ));
        }

        if self.batching.direct_window_secs > self.batching.direct_max_wait_secs {
            return Err(ConfigError::ValidationError(
                "batching.direct_window_secs must not exceed direct_max_wait_secs".into(),
            ));
        }

        if self.batching.group_window_secs > self.batching.group_max_wait_secs {
            return Err(ConfigError::ValidationError(
                "batching.group_window_secs must not exceed group_max_wait_secs".into(),
            ));
        }

        if self.context.budget_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "context.budget_tokens must be at least 1".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            batching: BatchingConfig::default(),
            routing: RoutingConfig::default(),
            context: ContextConfig::default(),
            agent: AgentConfig::default(),
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.batching.direct_window_secs, 5);
        assert_eq!(config.batching.group_window_secs, 30);
        assert_eq!(config.agent.max_rounds, 24);
        assert_eq!(config.agent.turn_timeout_secs, 180);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.routing.simple.model, config.routing.simple.model);
        assert_eq!(
            parsed.batching.direct_window_secs,
            config.batching.direct_window_secs
        );
    }

    #[test]
    fn invalid_temperature_rejected() {
        let config = AppConfig {
            agent: AgentConfig {
                temperature: 5.0,
                ..AgentConfig::default()
            },
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn window_beyond_ceiling_rejected() {
        let config = AppConfig {
            batching: BatchingConfig {
                direct_window_secs: 60,
                direct_max_wait_secs: 30,
                ..BatchingConfig::default()
            },
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = AppConfig::load_from(Path::new("/nonexistent/config.toml"));
        assert!(result.is_ok());
        let config = result.unwrap();
        assert_eq!(config.routing.fallback_provider, "openai");
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let toml_str = r#"
[batching]
direct_window_secs = 3

[routing.simple]
provider = "openrouter"
model = "some/cheap-model"
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.batching.direct_window_secs, 3);
        assert_eq!(config.batching.group_window_secs, 30);
        assert_eq!(config.routing.simple.model, "some/cheap-model");
        assert_eq!(config.routing.complex.model, "anthropic/claude-sonnet-4");
    }

    #[test]
    fn load_from_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[agent]
max_rounds = 12

[context]
budget_tokens = 2048
"#,
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.agent.max_rounds, 12);
        assert_eq!(config.context.budget_tokens, 2048);
        // Untouched sections keep their defaults
        assert_eq!(config.batching.direct_window_secs, 5);
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "not = [valid").unwrap();

        let err = AppConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn invalid_file_config_rejected_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[agent]\nmax_rounds = 0\n").unwrap();

        let err = AppConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn output_token_table() {
        assert_eq!(default_max_output_tokens("anthropic/claude-haiku-4"), 2048);
        assert_eq!(default_max_output_tokens("anthropic/claude-sonnet-4"), 8192);
        assert_eq!(default_max_output_tokens("unknown/model"), 4096);
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("direct_window_secs"));
        assert!(toml_str.contains("max_rounds"));
    }
}
