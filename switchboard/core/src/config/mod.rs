//! TOML Configuration File Support
//!
//! Centralized configuration loading for the middleware, from a TOML file at
//! `~/.config/switchboard/switchboard.toml`.
//!
//! # Configuration Priority
//!
//! Values are applied in this order (later wins):
//! 1. Default values
//! 2. TOML configuration file
//! 3. Environment variables (`SWITCHBOARD_*`)
//! 4. Explicit [`ConfigOverrides`]
//!
//! # XDG Base Directory Compliance
//!
//! - `$XDG_CONFIG_HOME/switchboard/switchboard.toml`
//!   (typically `~/.config/switchboard/switchboard.toml`)
//!
//! # Example Configuration
//!
//! ```toml
//! [circuit_breaker]
//! failure_threshold = 5
//! call_timeout_ms = 30000
//! reset_timeout_ms = 60000
//!
//! [retry]
//! max_retries = 2
//! initial_backoff_ms = 100
//! max_backoff_ms = 2000
//! backoff_multiplier = 2.0
//! use_jitter = true
//!
//! [routing]
//! preferred_providers = ["google", "kimi"]
//! fallback_enabled = true
//! max_fallbacks = 2
//!
//! [providers.google]
//! api_key = "..."
//! base_url = "https://generativelanguage.googleapis.com"
//! enabled = true
//!
//! [providers.cookies.settings]
//! psid = "..."
//! ```
//!
//! # Environment Variables
//!
//! | Variable | Field |
//! |----------|-------|
//! | `SWITCHBOARD_FAILURE_THRESHOLD` | `circuit_breaker.failure_threshold` |
//! | `SWITCHBOARD_CALL_TIMEOUT_MS` | `circuit_breaker.call_timeout_ms` |
//! | `SWITCHBOARD_RESET_TIMEOUT_MS` | `circuit_breaker.reset_timeout_ms` |
//! | `SWITCHBOARD_MAX_RETRIES` | `retry.max_retries` |
//! | `SWITCHBOARD_INITIAL_BACKOFF_MS` | `retry.initial_backoff_ms` |
//! | `SWITCHBOARD_MAX_BACKOFF_MS` | `retry.max_backoff_ms` |
//! | `SWITCHBOARD_RETRY_JITTER` | `retry.use_jitter` |
//! | `SWITCHBOARD_PREFERRED_PROVIDERS` | `routing.preferred_providers` (comma-separated) |
//! | `SWITCHBOARD_FALLBACK` | `routing.fallback_enabled` |
//! | `SWITCHBOARD_<PROVIDER>_API_KEY` | `providers.<provider>.api_key` |

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::provider::{ProviderConfig, ProviderKind};
use crate::resilience::CircuitBreakerConfig;
use crate::routing::RoutingConfig;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where configuration values came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Explicit overrides from the embedding application
    Override,
    /// Environment variable
    Env,
    /// TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Override => write!(f, "override"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// Retry Policy
// =============================================================================

/// Retry policy for dispatched requests
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt (0 = no retries)
    pub max_retries: u32,

    /// Delay before the first retry
    pub initial_backoff_ms: u64,

    /// Upper bound on any single delay
    pub max_backoff_ms: u64,

    /// Growth factor between consecutive delays
    pub backoff_multiplier: f64,

    /// Randomize each delay within `[delay/2, delay]`
    pub use_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff_ms: 100,
            max_backoff_ms: 2_000,
            backoff_multiplier: 2.0,
            use_jitter: true,
        }
    }
}

impl RetryConfig {
    /// A policy that never retries
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (1-based), before jitter
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let raw = self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(exponent);
        let capped = raw.min(self.max_backoff_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Circuit breaker section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerToml {
    /// Failures that trip a breaker
    pub failure_threshold: Option<u32>,

    /// Advisory per-call timeout in milliseconds
    pub call_timeout_ms: Option<u64>,

    /// Time a breaker stays open before trial calls, in milliseconds
    pub reset_timeout_ms: Option<u64>,
}

/// Retry section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryToml {
    /// Retries after the first attempt
    pub max_retries: Option<u32>,

    /// Initial backoff in milliseconds
    pub initial_backoff_ms: Option<u64>,

    /// Maximum backoff in milliseconds
    pub max_backoff_ms: Option<u64>,

    /// Backoff multiplier
    pub backoff_multiplier: Option<f64>,

    /// Whether to add jitter
    pub use_jitter: Option<bool>,
}

/// Routing section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingToml {
    /// Provider keys, most preferred first
    pub preferred_providers: Option<Vec<String>>,

    /// Whether failed requests move on to the next provider
    pub fallback_enabled: Option<bool>,

    /// Extra providers tried after the first
    pub max_fallbacks: Option<u32>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchboardToml {
    /// Circuit breaker section
    pub circuit_breaker: CircuitBreakerToml,

    /// Retry section
    pub retry: RetryToml,

    /// Routing section
    pub routing: RoutingToml,

    /// Per-provider sections, keyed by provider key (e.g. `google`, `deep_infra`)
    pub providers: HashMap<String, ProviderConfig>,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Resolved middleware configuration
#[derive(Clone, Debug)]
pub struct SwitchboardConfig {
    /// Default configuration for provider breakers
    pub circuit_breaker: CircuitBreakerConfig,

    /// Retry policy
    pub retry: RetryConfig,

    /// Provider preference and fallback policy
    pub routing: RoutingConfig,

    /// Per-provider connection settings
    pub providers: HashMap<ProviderKind, ProviderConfig>,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    source: ConfigSource,
}

impl Default for SwitchboardConfig {
    fn default() -> Self {
        Self {
            circuit_breaker: CircuitBreakerConfig::default(),
            retry: RetryConfig::default(),
            routing: RoutingConfig::default(),
            providers: HashMap::new(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl SwitchboardConfig {
    /// Create a configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the highest-priority source that contributed a value
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Settings for one provider (defaults if not configured)
    #[must_use]
    pub fn provider_config(&self, kind: ProviderKind) -> ProviderConfig {
        self.providers.get(&kind).cloned().unwrap_or_default()
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] describing the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "circuit_breaker.failure_threshold must be at least 1".into(),
            ));
        }
        if self.retry.max_backoff_ms < self.retry.initial_backoff_ms {
            return Err(ConfigError::ValidationError(format!(
                "retry.max_backoff_ms ({}) is below retry.initial_backoff_ms ({})",
                self.retry.max_backoff_ms, self.retry.initial_backoff_ms
            )));
        }
        let multiplier = self.retry.backoff_multiplier;
        if multiplier.is_nan() || multiplier < 1.0 {
            return Err(ConfigError::ValidationError(format!(
                "retry.backoff_multiplier must be at least 1.0, got {}",
                self.retry.backoff_multiplier
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/switchboard/switchboard.toml` or
/// `~/.config/switchboard/switchboard.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("switchboard").join("switchboard.toml"))
}

/// Load configuration from the default path, then the environment
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be read, parsed or
/// validated. A missing config file is not an error.
pub fn load_config() -> Result<SwitchboardConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path, then the environment
///
/// With `None`, only defaults and environment variables are used.
///
/// # Errors
///
/// Returns an error if the file cannot be read, parsed or validated.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<SwitchboardConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration from a path, reading the environment through `lookup`
///
/// # Errors
///
/// Returns an error if the file cannot be read, parsed or validated.
pub fn load_config_with_env<F>(path: Option<PathBuf>, lookup: F) -> Result<SwitchboardConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = SwitchboardConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: SwitchboardToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config)?;
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                providers = config.providers.len(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, lookup);

    config.validate()?;
    Ok(config)
}

/// Apply TOML configuration values to the config struct
///
/// # Errors
///
/// Returns [`ConfigError::ValidationError`] for an unknown provider key,
/// in `[providers]` or in `routing.preferred_providers`.
pub fn apply_toml_config(
    config: &mut SwitchboardConfig,
    toml: &SwitchboardToml,
) -> Result<(), ConfigError> {
    if let Some(threshold) = toml.circuit_breaker.failure_threshold {
        config.circuit_breaker.failure_threshold = threshold;
    }
    if let Some(ms) = toml.circuit_breaker.call_timeout_ms {
        config.circuit_breaker.call_timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = toml.circuit_breaker.reset_timeout_ms {
        config.circuit_breaker.reset_timeout = Duration::from_millis(ms);
    }

    if let Some(retries) = toml.retry.max_retries {
        config.retry.max_retries = retries;
    }
    if let Some(ms) = toml.retry.initial_backoff_ms {
        config.retry.initial_backoff_ms = ms;
    }
    if let Some(ms) = toml.retry.max_backoff_ms {
        config.retry.max_backoff_ms = ms;
    }
    if let Some(multiplier) = toml.retry.backoff_multiplier {
        config.retry.backoff_multiplier = multiplier;
    }
    if let Some(jitter) = toml.retry.use_jitter {
        config.retry.use_jitter = jitter;
    }

    if let Some(ref keys) = toml.routing.preferred_providers {
        config.routing.preferred_providers = keys
            .iter()
            .map(|key| {
                key.parse().map_err(|e| {
                    ConfigError::ValidationError(format!("routing.preferred_providers: {e}"))
                })
            })
            .collect::<Result<_, _>>()?;
    }
    if let Some(enabled) = toml.routing.fallback_enabled {
        config.routing.fallback_enabled = enabled;
    }
    if let Some(max) = toml.routing.max_fallbacks {
        config.routing.max_fallbacks = max;
    }

    for (key, provider) in &toml.providers {
        let kind: ProviderKind = key
            .parse()
            .map_err(|e| ConfigError::ValidationError(format!("[providers.{key}]: {e}")))?;
        config.providers.insert(kind, provider.clone());
    }

    Ok(())
}

/// Apply environment overrides using `lookup` to read variables
///
/// Unparseable values are ignored; unknown names in
/// `SWITCHBOARD_PREFERRED_PROVIDERS` are skipped with a warning.
pub fn apply_env_config<F>(config: &mut SwitchboardConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let parse_u64 = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());
    let parse_u32 = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u32>().ok());
    let mut touched = false;

    if let Some(threshold) = parse_u32("SWITCHBOARD_FAILURE_THRESHOLD") {
        config.circuit_breaker.failure_threshold = threshold;
        touched = true;
    }
    if let Some(ms) = parse_u64("SWITCHBOARD_CALL_TIMEOUT_MS") {
        config.circuit_breaker.call_timeout = Duration::from_millis(ms);
        touched = true;
    }
    if let Some(ms) = parse_u64("SWITCHBOARD_RESET_TIMEOUT_MS") {
        config.circuit_breaker.reset_timeout = Duration::from_millis(ms);
        touched = true;
    }
    if let Some(retries) = parse_u32("SWITCHBOARD_MAX_RETRIES") {
        config.retry.max_retries = retries;
        touched = true;
    }
    if let Some(ms) = parse_u64("SWITCHBOARD_INITIAL_BACKOFF_MS") {
        config.retry.initial_backoff_ms = ms;
        touched = true;
    }
    if let Some(ms) = parse_u64("SWITCHBOARD_MAX_BACKOFF_MS") {
        config.retry.max_backoff_ms = ms;
        touched = true;
    }
    if let Some(jitter) = lookup("SWITCHBOARD_RETRY_JITTER") {
        config.retry.use_jitter = jitter != "0" && !jitter.eq_ignore_ascii_case("false");
        touched = true;
    }
    if let Some(list) = lookup("SWITCHBOARD_PREFERRED_PROVIDERS") {
        config.routing.preferred_providers = list
            .split(',')
            .filter(|name| !name.trim().is_empty())
            .filter_map(|name| match name.parse::<ProviderKind>() {
                Ok(kind) => Some(kind),
                Err(e) => {
                    tracing::warn!(error = %e, "Ignoring SWITCHBOARD_PREFERRED_PROVIDERS entry");
                    None
                }
            })
            .collect();
        touched = true;
    }
    if let Some(fallback) = lookup("SWITCHBOARD_FALLBACK") {
        config.routing.fallback_enabled = fallback != "0" && !fallback.eq_ignore_ascii_case("false");
        touched = true;
    }

    for kind in ProviderKind::ALL {
        let var = format!("SWITCHBOARD_{}_API_KEY", kind.key().to_ascii_uppercase());
        if let Some(key) = lookup(&var).filter(|k| !k.trim().is_empty()) {
            config.providers.entry(kind).or_default().api_key = Some(key);
            touched = true;
        }
    }

    if touched {
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// Explicit Overrides
// =============================================================================

/// Overrides applied by the embedding application after loading
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Failure threshold override
    pub failure_threshold: Option<u32>,

    /// Reset timeout override
    pub reset_timeout: Option<Duration>,

    /// Max retries override
    pub max_retries: Option<u32>,

    /// Preferred provider order override
    pub preferred_providers: Option<Vec<ProviderKind>>,

    /// Provider settings that replace whatever was loaded
    pub providers: HashMap<ProviderKind, ProviderConfig>,
}

impl ConfigOverrides {
    /// Create an empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set failure threshold override
    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = Some(threshold);
        self
    }

    /// Set reset timeout override
    #[must_use]
    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = Some(timeout);
        self
    }

    /// Set max retries override
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Set the preferred provider order
    #[must_use]
    pub fn with_preferred_providers(
        mut self,
        providers: impl IntoIterator<Item = ProviderKind>,
    ) -> Self {
        self.preferred_providers = Some(providers.into_iter().collect());
        self
    }

    /// Replace one provider's settings
    #[must_use]
    pub fn with_provider(mut self, kind: ProviderKind, config: ProviderConfig) -> Self {
        self.providers.insert(kind, config);
        self
    }

    /// Whether any override is set
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.failure_threshold.is_none()
            && self.reset_timeout.is_none()
            && self.max_retries.is_none()
            && self.preferred_providers.is_none()
            && self.providers.is_empty()
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut SwitchboardConfig) {
        if self.is_empty() {
            return;
        }
        config.source = ConfigSource::Override;

        if let Some(threshold) = self.failure_threshold {
            config.circuit_breaker.failure_threshold = threshold;
        }
        if let Some(timeout) = self.reset_timeout {
            config.circuit_breaker.reset_timeout = timeout;
        }
        if let Some(retries) = self.max_retries {
            config.retry.max_retries = retries;
        }
        if let Some(ref preferred) = self.preferred_providers {
            config.routing.preferred_providers.clone_from(preferred);
        }
        for (kind, provider) in &self.providers {
            config.providers.insert(*kind, provider.clone());
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
