//! Monitor configuration

use std::path::PathBuf;

use quarry_core::config::DEFAULT_MONITOR_FILE_SIZE;
use quarry_core::{ConfigError, NodeConfig, QuarryError, QuarryResult};

/// Where the monitor writes and how large each file may grow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    pub out_dir: PathBuf,
    /// Capacity of each of the two log files, in bytes
    pub file_size: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            out_dir: PathBuf::from(".monitor"),
            file_size: DEFAULT_MONITOR_FILE_SIZE,
        }
    }
}

impl MonitorConfig {
    pub fn new(out_dir: impl Into<PathBuf>, file_size: u64) -> Self {
        Self {
            out_dir: out_dir.into(),
            file_size,
        }
    }

    pub fn from_node_config(config: &NodeConfig) -> Self {
        Self {
            out_dir: config.monitor_dir(),
            file_size: config.monitor_file_size,
        }
    }

    pub fn validate(&self) -> QuarryResult<()> {
        if self.file_size == 0 {
            return Err(QuarryError::Config(ConfigError::InvalidValue {
                field: "monitor_file_size".to_string(),
                value: self.file_size.to_string(),
                reason: "monitor_file_size must be positive".to_string(),
            }));
        }
        Ok(())
    }
}

impl From<&NodeConfig> for MonitorConfig {
    fn from(config: &NodeConfig) -> Self {
        Self::from_node_config(config)
    }
}
