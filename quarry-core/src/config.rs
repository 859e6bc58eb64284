//! Configuration types

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, QuarryError, QuarryResult};

/// Default number of buffered records before the store cache asks to flush.
pub const DEFAULT_STORE_CACHE_THRESHOLD: usize = 1_000;

/// Default number of buffered records at which the store cache reports full.
pub const DEFAULT_STORE_CACHE_UPPER_LIMIT: usize = 10_000;

/// Default interval between time-based flushes, in seconds.
pub const DEFAULT_STORE_FLUSH_INTERVAL_SECS: u64 = 5;

/// Default capacity of each monitor file, in bytes (1 GiB).
pub const DEFAULT_MONITOR_FILE_SIZE: u64 = 1024 * 1024 * 1024;

/// Process configuration shared by every cached model and the monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Buffered records across all models before a flush is due
    pub store_cache_threshold: usize,
    /// Buffered records at which the driver must stop and flush
    pub store_cache_upper_limit: usize,
    /// Seconds between time-based flushes
    pub store_flush_interval: u64,
    /// Directory for monitor files; `None` uses `./.monitor`
    pub monitor_out_dir: Option<PathBuf>,
    /// Capacity of each monitor file in bytes
    pub monitor_file_size: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            store_cache_threshold: DEFAULT_STORE_CACHE_THRESHOLD,
            store_cache_upper_limit: DEFAULT_STORE_CACHE_UPPER_LIMIT,
            store_flush_interval: DEFAULT_STORE_FLUSH_INTERVAL_SECS,
            monitor_out_dir: None,
            monitor_file_size: DEFAULT_MONITOR_FILE_SIZE,
        }
    }
}

impl NodeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_store_cache_threshold(mut self, threshold: usize) -> Self {
        self.store_cache_threshold = threshold;
        self
    }

    pub fn with_store_cache_upper_limit(mut self, limit: usize) -> Self {
        self.store_cache_upper_limit = limit;
        self
    }

    pub fn with_store_flush_interval(mut self, secs: u64) -> Self {
        self.store_flush_interval = secs;
        self
    }

    pub fn with_monitor_out_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.monitor_out_dir = Some(dir.into());
        self
    }

    pub fn with_monitor_file_size(mut self, bytes: u64) -> Self {
        self.monitor_file_size = bytes;
        self
    }

    /// Flush interval as a [`Duration`].
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.store_flush_interval)
    }

    /// Monitor output directory, defaulting to `./.monitor`.
    pub fn monitor_dir(&self) -> PathBuf {
        self.monitor_out_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(".monitor"))
    }

    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `QUARRY_STORE_CACHE_THRESHOLD` (default: 1000)
    /// - `QUARRY_STORE_CACHE_UPPER_LIMIT` (default: 10000)
    /// - `QUARRY_STORE_FLUSH_INTERVAL` seconds (default: 5)
    /// - `QUARRY_MONITOR_OUT_DIR` (default: unset)
    /// - `QUARRY_MONITOR_FILE_SIZE` bytes (default: 1 GiB)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            store_cache_threshold: env_or(
                "QUARRY_STORE_CACHE_THRESHOLD",
                defaults.store_cache_threshold,
            ),
            store_cache_upper_limit: env_or(
                "QUARRY_STORE_CACHE_UPPER_LIMIT",
                defaults.store_cache_upper_limit,
            ),
            store_flush_interval: env_or(
                "QUARRY_STORE_FLUSH_INTERVAL",
                defaults.store_flush_interval,
            ),
            monitor_out_dir: std::env::var("QUARRY_MONITOR_OUT_DIR")
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
            monitor_file_size: env_or("QUARRY_MONITOR_FILE_SIZE", defaults.monitor_file_size),
        }
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - store_cache_threshold > 0
    /// - store_cache_upper_limit >= store_cache_threshold
    /// - store_flush_interval > 0
    /// - monitor_file_size > 0
    pub fn validate(&self) -> QuarryResult<()> {
        if self.store_cache_threshold == 0 {
            return Err(QuarryError::Config(ConfigError::InvalidValue {
                field: "store_cache_threshold".to_string(),
                value: self.store_cache_threshold.to_string(),
                reason: "store_cache_threshold must be greater than 0".to_string(),
            }));
        }

        if self.store_cache_upper_limit < self.store_cache_threshold {
            return Err(QuarryError::Config(ConfigError::InvalidValue {
                field: "store_cache_upper_limit".to_string(),
                value: self.store_cache_upper_limit.to_string(),
                reason: "store_cache_upper_limit must not be below store_cache_threshold"
                    .to_string(),
            }));
        }

        if self.store_flush_interval == 0 {
            return Err(QuarryError::Config(ConfigError::InvalidValue {
                field: "store_flush_interval".to_string(),
                value: self.store_flush_interval.to_string(),
                reason: "store_flush_interval must be positive".to_string(),
            }));
        }

        if self.monitor_file_size == 0 {
            return Err(QuarryError::Config(ConfigError::InvalidValue {
                field: "monitor_file_size".to_string(),
                value: self.monitor_file_size.to_string(),
                reason: "monitor_file_size must be positive".to_string(),
            }));
        }

        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

/// Parse `key` from the environment, keeping `default` when it is unset or
/// does not parse.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(key, value = %raw, "Ignoring unparsable configuration value");
                default
            }
        },
        Err(_) => default,
    }
}
