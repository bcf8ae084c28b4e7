//! Configuration consumed by the tracker.
//!
//! Values come from defaults, an optional JSON file and `JOBTRACK_*`
//! environment overrides, in that order.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::TrackerError;

pub const DEFAULT_TARGET: u64 = 100;
pub const DEFAULT_CACHE_THRESHOLD: u64 = 10;
/// One week.
pub const DEFAULT_CACHE_TTL_SECS: u64 = 7 * 24 * 60 * 60;
pub const DEFAULT_BACKTRACE_LIMIT: usize = 1000;
/// Upper bound for `cache_ttl_secs`: one year.
pub const MAX_CACHE_TTL_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid value for {key}: {value:?}")]
    InvalidEnv { key: &'static str, value: String },

    #[error("{0}")]
    Invalid(String),
}

impl From<ConfigError> for TrackerError {
    fn from(err: ConfigError) -> Self {
        TrackerError::Configuration(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrackerConfig {
    /// Target assigned to a record when its job is enqueued.
    pub default_target: u64,

    /// Cached increments accumulated before an automatic flush.
    pub cache_threshold: u64,

    /// Lifetime of an unflushed cache entry.
    pub cache_ttl_secs: u64,

    /// Notify the event sink after every durable update.
    pub auto_broadcast: bool,

    /// Maximum stored backtrace length, in characters.
    pub backtrace_limit: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            default_target: DEFAULT_TARGET,
            cache_threshold: DEFAULT_CACHE_THRESHOLD,
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            auto_broadcast: true,
            backtrace_limit: DEFAULT_BACKTRACE_LIMIT,
        }
    }
}

impl TrackerConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    /// Apply `JOBTRACK_*` variables from the process environment.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup (the environment, in production).
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("JOBTRACK_DEFAULT_TARGET") {
            self.default_target = parse_env("JOBTRACK_DEFAULT_TARGET", v)?;
        }
        if let Some(v) = lookup("JOBTRACK_CACHE_THRESHOLD") {
            self.cache_threshold = parse_env("JOBTRACK_CACHE_THRESHOLD", v)?;
        }
        if let Some(v) = lookup("JOBTRACK_CACHE_TTL_SECS") {
            self.cache_ttl_secs = parse_env("JOBTRACK_CACHE_TTL_SECS", v)?;
        }
        if let Some(v) = lookup("JOBTRACK_AUTO_BROADCAST") {
            self.auto_broadcast = parse_env("JOBTRACK_AUTO_BROADCAST", v)?;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_threshold == 0 {
            return Err(ConfigError::Invalid(
                "cache_threshold must be at least 1".to_string(),
            ));
        }
        if self.cache_ttl_secs == 0 {
            return Err(ConfigError::Invalid(
                "cache_ttl_secs must be at least 1".to_string(),
            ));
        }
        if self.cache_ttl_secs > MAX_CACHE_TTL_SECS {
            return Err(ConfigError::Invalid(format!(
                "cache_ttl_secs must be at most {MAX_CACHE_TTL_SECS}"
            )));
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

fn parse_env<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnv { key, value })
}
