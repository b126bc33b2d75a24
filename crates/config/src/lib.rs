//! Configuration loading, validation, and management for SheetGate.
//!
//! Loads configuration from `~/.sheetgate/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.sheetgate/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Token bucket guarding the external quota
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Circuit breaker around the external client
    #[serde(default)]
    pub breaker: BreakerConfig,

    /// In-flight request collapsing
    #[serde(default)]
    pub dedupe: DedupeConfig,

    /// Background task lifecycle
    #[serde(default)]
    pub tasks: TaskConfig,

    /// What the external client can report
    #[serde(default)]
    pub client: ClientConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Bucket capacity
    #[serde(default = "default_max_tokens")]
    pub max_tokens: f64,

    #[serde(default = "default_refill_rate")]
    pub refill_rate_per_second: f64,

    #[serde(default)]
    pub cost_table: CostTableConfig,
}

fn default_max_tokens() -> f64 {
    60.0
}
fn default_refill_rate() -> f64 {
    1.0
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            refill_rate_per_second: default_refill_rate(),
            cost_table: CostTableConfig::default(),
        }
    }
}

/// Token cost per physical call class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostTableConfig {
    #[serde(default = "default_cost")]
    pub read: f64,

    #[serde(default = "default_cost")]
    pub write: f64,

    /// Cost of a call carrying more than one fragment
    #[serde(default = "default_cost")]
    pub batch: f64,
}

fn default_cost() -> f64 {
    1.0
}

impl Default for CostTableConfig {
    fn default() -> Self {
        Self {
            read: default_cost(),
            write: default_cost(),
            batch: default_cost(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,

    /// Sliding window in which failures are counted
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
}

fn default_failure_threshold() -> u32 {
    5
}
fn default_reset_timeout_ms() -> u64 {
    30_000
}
fn default_window_ms() -> u64 {
    60_000
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_timeout_ms: default_reset_timeout_ms(),
            window_ms: default_window_ms(),
        }
    }
}

impl BreakerConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupeConfig {
    #[serde(default = "default_dedupe_ttl_ms")]
    pub dedupe_ttl_ms: u64,
}

fn default_dedupe_ttl_ms() -> u64 {
    1_000
}

impl Default for DedupeConfig {
    fn default() -> Self {
        Self {
            dedupe_ttl_ms: default_dedupe_ttl_ms(),
        }
    }
}

impl DedupeConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.dedupe_ttl_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    #[serde(default = "default_task_ttl_ms")]
    pub default_task_ttl_ms: u64,

    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,

    /// Intents per physical submission in a background batch job
    #[serde(default = "default_chunk_size")]
    pub background_chunk_size: usize,
}

fn default_task_ttl_ms() -> u64 {
    3_600_000
}
fn default_sweep_interval_ms() -> u64 {
    60_000
}
fn default_chunk_size() -> usize {
    50
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            default_task_ttl_ms: default_task_ttl_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
            background_chunk_size: default_chunk_size(),
        }
    }
}

impl TaskConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_task_ttl_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Whether the external API reports outcomes per fragment
    #[serde(default = "default_true")]
    pub per_fragment_outcomes: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            per_fragment_outcomes: true,
        }
    }
}

impl EngineConfig {
    /// Load configuration from the default path (~/.sheetgate/config.toml).
    ///
    /// Also checks environment variables:
    /// - `SHEETGATE_MAX_TOKENS`
    /// - `SHEETGATE_REFILL_RATE`
    /// - `SHEETGATE_FAILURE_THRESHOLD`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides()?;
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

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(v) = env_parse::<f64>("SHEETGATE_MAX_TOKENS")? {
            self.rate_limit.max_tokens = v;
        }
        if let Some(v) = env_parse::<f64>("SHEETGATE_REFILL_RATE")? {
            self.rate_limit.refill_rate_per_second = v;
        }
        if let Some(v) = env_parse::<u32>("SHEETGATE_FAILURE_THRESHOLD")? {
            self.breaker.failure_threshold = v;
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".sheetgate")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let rl = &self.rate_limit;
        if !positive(rl.max_tokens) {
            return Err(ConfigError::ValidationError(
                "rate_limit.max_tokens must be > 0".into(),
            ));
        }
        if !positive(rl.refill_rate_per_second) {
            return Err(ConfigError::ValidationError(
                "rate_limit.refill_rate_per_second must be > 0".into(),
            ));
        }
        let costs = &rl.cost_table;
        if [costs.read, costs.write, costs.batch]
            .iter()
            .any(|c| !c.is_finite() || *c < 0.0)
        {
            return Err(ConfigError::ValidationError(
                "rate_limit.cost_table entries must be finite and >= 0".into(),
            ));
        }

        if self.breaker.failure_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "breaker.failure_threshold must be >= 1".into(),
            ));
        }
        if self.breaker.window_ms == 0 {
            return Err(ConfigError::ValidationError(
                "breaker.window_ms must be > 0".into(),
            ));
        }

        if self.tasks.sweep_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "tasks.sweep_interval_ms must be > 0".into(),
            ));
        }
        if self.tasks.background_chunk_size == 0 {
            return Err(ConfigError::ValidationError(
                "tasks.background_chunk_size must be >= 1".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string (for `config init`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

fn positive(v: f64) -> bool {
    v.is_finite() && v > 0.0
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::ValidationError(format!("{name}: cannot parse '{raw}'"))),
        Err(_) => Ok(None),
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
