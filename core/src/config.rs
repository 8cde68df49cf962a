//! Engine configuration.
//!
//! Two layers with precedence: hardcoded defaults, then environment
//! overrides (`VISION_CONFIDENCE_THRESHOLD`, `T_EXACT_SECONDS`,
//! `T_HIGH_SECONDS`, `MAX_IMAGE_MB`, `MAX_IMAGE_DIM`, plus backend
//! credentials). `validate()` enforces the cross-field invariants.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Environment variable carrying the backend API key.
pub const ENV_API_KEY: &str = "ANTHROPIC_API_KEY";
/// Environment variable selecting the model short name.
pub const ENV_MODEL: &str = "PHOTOSORT_MODEL";

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for ${var}: '{value}' (expected: {expected})")]
    InvalidEnvValue {
        var: String,
        value: String,
        expected: &'static str,
    },

    #[error("{0}")]
    Invalid(String),

    #[error("missing required configuration: {0}")]
    Missing(&'static str),
}

/// Timestamp windows for clustering rules 1 and 2.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimestampWindows {
    /// Rule 1: capture instants this close are the same burst.
    #[serde(default = "default_t_exact")]
    pub exact_seconds: u32,
    /// Rule 2: capture instants this close get a similarity floor.
    #[serde(default = "default_t_high")]
    pub high_seconds: u32,
}

fn default_t_exact() -> u32 {
    10
}

fn default_t_high() -> u32 {
    30
}

impl Default for TimestampWindows {
    fn default() -> Self {
        Self {
            exact_seconds: default_t_exact(),
            high_seconds: default_t_high(),
        }
    }
}

/// Limits applied when preparing an image payload for the backend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ImageLimits {
    /// Longest edge after downscaling, in pixels.
    #[serde(default = "default_max_dimension")]
    pub max_dimension: u32,
    /// Encoded payload ceiling, in megabytes.
    #[serde(default = "default_max_payload_mb")]
    pub max_payload_mb: f64,
}

fn default_max_dimension() -> u32 {
    8000
}

fn default_max_payload_mb() -> f64 {
    5.0
}

impl ImageLimits {
    /// Payload ceiling in bytes.
    pub fn max_payload_bytes(&self) -> usize {
        (self.max_payload_mb * 1024.0 * 1024.0) as usize
    }
}

impl Default for ImageLimits {
    fn default() -> Self {
        Self {
            max_dimension: default_max_dimension(),
            max_payload_mb: default_max_payload_mb(),
        }
    }
}

/// Retry policy for transient vision errors: linear backoff,
/// `delay * attempt` between tries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    #[serde(default = "default_retry_attempts")]
    pub attempts: u32,
    /// Base delay in seconds.
    #[serde(default = "default_retry_delay_secs")]
    pub delay_secs: u64,
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay_secs() -> u64 {
    2
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_secs(self.delay_secs * u64::from(attempt))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: default_retry_attempts(),
            delay_secs: default_retry_delay_secs(),
        }
    }
}

/// Root engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Similarity acceptance threshold. `None` means mode-dependent
    /// default: 0.7 for database matching, 0.5 for auto-clustering.
    #[serde(default)]
    pub confidence_threshold: Option<f64>,

    #[serde(default)]
    pub windows: TimestampWindows,

    #[serde(default)]
    pub image_limits: ImageLimits,

    #[serde(default)]
    pub retry: RetryPolicy,

    /// Per-call timeout for vision RPCs, seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Model short name, resolved to a backend id at client construction.
    #[serde(default = "default_model")]
    pub model: String,

    /// Backend API key. Opaque to the engine; absent means the caller must
    /// supply a backend some other way (tests inject mocks).
    #[serde(skip_serializing)]
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_model() -> String {
    "sonnet".to_string()
}

/// Database-mode threshold when unset.
pub const DEFAULT_DATABASE_THRESHOLD: f64 = 0.7;
/// Auto-cluster threshold when unset; intentionally looser.
pub const DEFAULT_AUTO_CLUSTER_THRESHOLD: f64 = 0.5;

impl Default for Config {
    fn default() -> Self {
        Self {
            confidence_threshold: None,
            windows: TimestampWindows::default(),
            image_limits: ImageLimits::default(),
            retry: RetryPolicy::default(),
            request_timeout_secs: default_request_timeout_secs(),
            model: default_model(),
            api_key: None,
        }
    }
}

impl Config {
    /// Loads defaults, then applies environment overrides and validates.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(v) = parse_env::<f64>("VISION_CONFIDENCE_THRESHOLD", "float in [0,1]")? {
            config.confidence_threshold = Some(v);
        }
        if let Some(v) = parse_env::<u32>("T_EXACT_SECONDS", "non-negative integer")? {
            config.windows.exact_seconds = v;
        }
        if let Some(v) = parse_env::<u32>("T_HIGH_SECONDS", "non-negative integer")? {
            config.windows.high_seconds = v;
        }
        if let Some(v) = parse_env::<f64>("MAX_IMAGE_MB", "positive float")? {
            config.image_limits.max_payload_mb = v;
        }
        if let Some(v) = parse_env::<u32>("MAX_IMAGE_DIM", "positive integer")? {
            config.image_limits.max_dimension = v;
        }
        if let Ok(key) = env::var(ENV_API_KEY) {
            if !key.is_empty() {
                config.api_key = Some(key);
            }
        }
        if let Ok(model) = env::var(ENV_MODEL) {
            if !model.is_empty() {
                config.model = model;
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Enforces cross-field invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(t) = self.confidence_threshold {
            if !(0.0..=1.0).contains(&t) {
                return Err(ConfigError::Invalid(format!(
                    "confidence threshold must be within [0, 1], got {t}"
                )));
            }
        }
        // Windows above five minutes would sweep unrelated subjects into
        // one burst; same bound the capture workflows were tuned against.
        if self.windows.exact_seconds > 300 {
            return Err(ConfigError::Invalid(format!(
                "T_EXACT_SECONDS must be at most 300, got {}",
                self.windows.exact_seconds
            )));
        }
        if self.windows.high_seconds > 300 {
            return Err(ConfigError::Invalid(format!(
                "T_HIGH_SECONDS must be at most 300, got {}",
                self.windows.high_seconds
            )));
        }
        if self.windows.exact_seconds > self.windows.high_seconds {
            return Err(ConfigError::Invalid(format!(
                "T_EXACT_SECONDS ({}) cannot exceed T_HIGH_SECONDS ({})",
                self.windows.exact_seconds, self.windows.high_seconds
            )));
        }
        if self.image_limits.max_payload_mb <= 0.0 {
            return Err(ConfigError::Invalid(
                "MAX_IMAGE_MB must be positive".to_string(),
            ));
        }
        if self.image_limits.max_dimension == 0 {
            return Err(ConfigError::Invalid(
                "MAX_IMAGE_DIM must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Effective threshold for a run, honoring the mode-dependent default.
    pub fn threshold_for(&self, mode: crate::engine::RunMode) -> f64 {
        self.confidence_threshold.unwrap_or(match mode {
            crate::engine::RunMode::Database => DEFAULT_DATABASE_THRESHOLD,
            crate::engine::RunMode::AutoCluster => DEFAULT_AUTO_CLUSTER_THRESHOLD,
        })
    }

    /// Per-call vision RPC timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn parse_env<T: std::str::FromStr>(
    var: &str,
    expected: &'static str,
) -> Result<Option<T>, ConfigError> {
    match env::var(var) {
        Ok(raw) if !raw.is_empty() => {
            raw.parse::<T>()
                .map(Some)
                .map_err(|_| ConfigError::InvalidEnvValue {
                    var: var.to_string(),
                    value: raw,
                    expected,
                })
        }
        _ => Ok(None),
    }
}
