//! Configuration management for permcheck.
//!
//! This module provides configuration loading with multiple sources:
//! 1. Default values (hardcoded)
//! 2. Configuration file (YAML)
//! 3. Environment variables (override)
//!
//! Environment variables take precedence over config file values,
//! which take precedence over defaults.
//!
//! # Example
//!
//! ```ignore
//! use permcheck_server::config::ServerConfig;
//!
//! // Load from file with env overrides
//! let config = ServerConfig::load("permcheck.yaml")?;
//!
//! // Or load from environment only
//! let config = ServerConfig::from_env()?;
//! ```

use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File, FileFormat};
use permcheck_domain::{CheckCacheConfig, CheckConfig};
use serde::{Deserialize, Serialize};
use tracing::Level;

use crate::bulk::BulkCheckerConfig;
use crate::logging::LoggingConfig;

/// Prefix of environment variable overrides, e.g. `PERMCHECK_CHECK__MAX_DEPTH`.
const ENV_PREFIX: &str = "PERMCHECK";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default)]
    pub check: CheckSettings,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub bulk: BulkSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Check engine settings.
///
/// ```yaml
/// check:
///   concurrency_limit: 100
///   max_depth: 50
///   timeout_secs: 30
/// ```
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CheckSettings {
    /// Sub-checks running at once inside one union or intersection.
    #[serde(default = "default_check_concurrency")]
    pub concurrency_limit: usize,

    /// Upper bound on the recursion depth a request may ask for.
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,

    /// Deadline of one top-level check in seconds.
    #[serde(default = "default_check_timeout")]
    pub timeout_secs: u64,
}

impl Default for CheckSettings {
    fn default() -> Self {
        Self {
            concurrency_limit: default_check_concurrency(),
            max_depth: default_max_depth(),
            timeout_secs: default_check_timeout(),
        }
    }
}

fn default_check_concurrency() -> usize {
    100
}

fn default_max_depth() -> u32 {
    50
}

fn default_check_timeout() -> u64 {
    30
}

/// Result cache settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CacheSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_cache_capacity")]
    pub max_capacity: u64,

    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_capacity: default_cache_capacity(),
            ttl_secs: default_cache_ttl(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_cache_capacity() -> u64 {
    100_000
}

fn default_cache_ttl() -> u64 {
    60
}

/// Bulk checker settings.
///
/// Environment variables:
/// - `PERMCHECK_BULK__CONCURRENCY_LIMIT=20`
/// - `PERMCHECK_BULK__BUFFER_SIZE=5000`
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct BulkSettings {
    #[serde(default = "default_bulk_concurrency")]
    pub concurrency_limit: usize,

    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

impl Default for BulkSettings {
    fn default() -> Self {
        Self {
            concurrency_limit: default_bulk_concurrency(),
            buffer_size: default_buffer_size(),
        }
    }
}

fn default_bulk_concurrency() -> usize {
    10
}

fn default_buffer_size() -> usize {
    1000
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LoggingSettings {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Use JSON format (true for production, false for development)
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ConfigError),

    #[error("configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}

impl ServerConfig {
    /// Load configuration from a YAML file with environment variable overrides.
    ///
    /// Environment variables are prefixed with `PERMCHECK_` and use `__` as
    /// separator, e.g. `PERMCHECK_CACHE__ENABLED=false` overrides
    /// `cache.enabled`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigLoadError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigLoadError::FileNotFound {
                path: path.display().to_string(),
            });
        }

        let config = Config::builder()
            .add_source(Config::try_from(&ServerConfig::default())?)
            .add_source(File::from(path).format(FileFormat::Yaml))
            .add_source(environment())
            .build()?;

        let server_config: ServerConfig = config.try_deserialize()?;
        server_config.validate()?;
        Ok(server_config)
    }

    /// Load configuration from environment variables only.
    pub fn from_env() -> Result<Self, ConfigLoadError> {
        let config = Config::builder()
            .add_source(Config::try_from(&ServerConfig::default())?)
            .add_source(environment())
            .build()?;

        let server_config: ServerConfig = config.try_deserialize()?;
        server_config.validate()?;
        Ok(server_config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        let positive = [
            ("check.concurrency_limit", self.check.concurrency_limit as u64),
            ("check.max_depth", u64::from(self.check.max_depth)),
            ("check.timeout_secs", self.check.timeout_secs),
            ("bulk.concurrency_limit", self.bulk.concurrency_limit as u64),
            ("bulk.buffer_size", self.bulk.buffer_size as u64),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigLoadError::Invalid {
                message: format!("{name} must be greater than 0"),
            });
        }

        if self.cache.enabled && self.cache.max_capacity == 0 {
            return Err(ConfigLoadError::Invalid {
                message: "cache.max_capacity must be greater than 0 when the cache is enabled"
                    .to_string(),
            });
        }

        self.log_level()?;
        Ok(())
    }

    /// Settings for the check engine.
    pub fn check_config(&self) -> CheckConfig {
        CheckConfig::default()
            .with_concurrency_limit(self.check.concurrency_limit)
            .with_max_depth(self.check.max_depth)
            .with_timeout(Duration::from_secs(self.check.timeout_secs))
    }

    /// Settings for the result cache.
    pub fn cache_config(&self) -> CheckCacheConfig {
        CheckCacheConfig::default()
            .with_enabled(self.cache.enabled)
            .with_max_capacity(self.cache.max_capacity)
            .with_ttl(Duration::from_secs(self.cache.ttl_secs))
    }

    /// Settings for bulk checkers built by lookups.
    pub fn bulk_config(&self) -> BulkCheckerConfig {
        BulkCheckerConfig {
            concurrency_limit: self.bulk.concurrency_limit,
            buffer_size: self.bulk.buffer_size,
        }
    }

    /// Settings for [`crate::logging::init_logging`], as used by
    /// [`crate::logging::init_observability`].
    pub fn logging_config(&self) -> Result<LoggingConfig, ConfigLoadError> {
        let config = if self.logging.json {
            LoggingConfig::json()
        } else {
            LoggingConfig::text()
        };
        Ok(config.with_level(self.log_level()?))
    }

    fn log_level(&self) -> Result<Level, ConfigLoadError> {
        self.logging
            .level
            .parse::<Level>()
            .map_err(|_| ConfigLoadError::Invalid {
                message: format!(
                    "logging.level must be one of trace, debug, info, warn, error, got: {}",
                    self.logging.level
                ),
            })
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
}
