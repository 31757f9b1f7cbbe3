use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use dnr_core::ManagerConfig;

use crate::error::ConfigError;

/// Filtering service configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Master switch. When off, every request is allowed.
    pub enabled: bool,

    /// Capacity of the lifecycle and evaluation channels (default: 64)
    pub queue_capacity: usize,

    /// Rulesets read and verified at the same time (default: 4)
    pub max_concurrent_loads: usize,

    /// Log level (default: "info")
    /// Options: "trace", "debug", "info", "warn", "error"
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            queue_capacity: 64,
            max_concurrent_loads: 4,
            log_level: "info".to_string(),
        }
    }
}

impl ServiceConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid("queue_capacity must be at least 1"));
        }
        if self.max_concurrent_loads == 0 {
            return Err(ConfigError::Invalid("max_concurrent_loads must be at least 1"));
        }
        Ok(())
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            enabled: self.enabled,
        }
    }
}
