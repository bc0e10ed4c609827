//! Upload client configuration with YAML support

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Upload client configuration
///
/// Can be loaded from YAML or JSON, or constructed programmatically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Timeout settings
    #[serde(default)]
    pub timeouts: TimeoutsConfig,

    /// Conflict and offset-resolution retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Default chunk size in bytes (absent = whole-file mode)
    #[serde(default)]
    pub chunk_size: Option<u64>,

    /// User-Agent sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeouts: TimeoutsConfig::default(),
            retry: RetryConfig::default(),
            chunk_size: None,
            user_agent: default_user_agent(),
        }
    }
}

fn default_user_agent() -> String {
    format!("tusup/{}", env!("CARGO_PKG_VERSION"))
}

/// Timeout configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    /// Longest a PATCH may go without sending body bytes or receiving its
    /// answer, in milliseconds (default: 5 minutes). Not a total deadline.
    #[serde(default = "default_upload_timeout")]
    pub upload_ms: u64,

    /// HEAD timeout in milliseconds (default: 30s)
    #[serde(default = "default_request_timeout")]
    pub request_ms: u64,

    /// Connect timeout in milliseconds (default: 10s)
    #[serde(default = "default_connect_timeout")]
    pub connect_ms: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            upload_ms: default_upload_timeout(),
            request_ms: default_request_timeout(),
            connect_ms: default_connect_timeout(),
        }
    }
}

fn default_upload_timeout() -> u64 {
    300_000 // 5 minutes
}

fn default_request_timeout() -> u64 {
    30_000 // 30 seconds
}

fn default_connect_timeout() -> u64 {
    10_000 // 10 seconds
}

/// Retry policy for conflict recovery and offset resolution
///
/// The first retry is immediate; later ones wait `initial_backoff_ms`,
/// doubling up to `max_backoff_ms`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Consecutive conflicts (or stalled PATCHes) tolerated before giving up
    #[serde(default = "default_max_conflicts")]
    pub max_conflicts: u32,

    /// HEAD attempts per offset resolution before giving up
    #[serde(default = "default_max_resolve_attempts")]
    pub max_resolve_attempts: u32,

    /// First non-zero backoff delay in milliseconds
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Backoff cap in milliseconds
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_conflicts: default_max_conflicts(),
            max_resolve_attempts: default_max_resolve_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_conflicts() -> u32 {
    16
}

fn default_max_resolve_attempts() -> u32 {
    32
}

fn default_initial_backoff() -> u64 {
    100
}

fn default_max_backoff() -> u64 {
    10_000
}

impl RetryConfig {
    /// Delay before retry number `retry` (0-based); retry 0 is immediate.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let exp = (retry - 1).min(32);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

impl ClientConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Parse configuration from JSON string
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Serialize configuration to YAML
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(self).map_err(|e| ConfigError::SerializeError(e.to_string()))
    }

    /// Serialize configuration to JSON
    pub fn to_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))
    }

    /// Create a builder for programmatic configuration
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.upload_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.request_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.connect_ms)
    }
}

/// Builder for ClientConfig
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Send bounded slices of `bytes` per request
    pub fn chunk_size(mut self, bytes: u64) -> Self {
        self.config.chunk_size = Some(bytes);
        self
    }

    /// Set PATCH timeout in milliseconds
    pub fn upload_timeout_ms(mut self, ms: u64) -> Self {
        self.config.timeouts.upload_ms = ms;
        self
    }

    /// Set HEAD timeout in milliseconds
    pub fn request_timeout_ms(mut self, ms: u64) -> Self {
        self.config.timeouts.request_ms = ms;
        self
    }

    /// Set connect timeout in milliseconds
    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.config.timeouts.connect_ms = ms;
        self
    }

    pub fn max_conflicts(mut self, attempts: u32) -> Self {
        self.config.retry.max_conflicts = attempts;
        self
    }

    pub fn max_resolve_attempts(mut self, attempts: u32) -> Self {
        self.config.retry.max_resolve_attempts = attempts;
        self
    }

    /// Set the backoff range in milliseconds
    pub fn backoff_ms(mut self, initial: u64, max: u64) -> Self {
        self.config.retry.initial_backoff_ms = initial;
        self.config.retry.max_backoff_ms = max;
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.config.user_agent = agent.into();
        self
    }

    /// Build the configuration
    pub fn build(self) -> ClientConfig {
        self.config
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),
}
