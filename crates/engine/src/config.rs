//! Service configuration via `txcoord.toml`
//!
//! On first open a commented default `txcoord.toml` is written to the data
//! directory. To change settings, edit the file and restart.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use txcoord_concurrency::CoordinatorConfig;
use txcoord_core::{TxError, TxResult};
use txcoord_durability::{DurabilityMode, LogConfig, DEFAULT_LOG_FILE};

/// Config file name placed in the data directory.
pub const CONFIG_FILE_NAME: &str = "txcoord.toml";

/// Service configuration loaded from `txcoord.toml`.
///
/// # Example
///
/// ```toml
/// durability = "always"
/// log_file = "txcoord.log"
/// default_timeout_secs = 30
/// max_active = 8192
/// reaper_interval_ms = 1000
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxcoordConfig {
    /// `"always"` (fsync every decision) or `"cache"` (in-memory log)
    #[serde(default)]
    pub durability: DurabilityMode,
    /// Log file name, relative to the data directory
    #[serde(default = "default_log_file")]
    pub log_file: String,
    /// Default transaction timeout in seconds; 0 disables timeouts
    #[serde(default)]
    pub default_timeout_secs: u64,
    /// Maximum number of in-flight transactions
    #[serde(default = "default_max_active")]
    pub max_active: usize,
    /// How often the reaper looks for expired transactions
    #[serde(default = "default_reaper_interval_ms")]
    pub reaper_interval_ms: u64,
}

fn default_log_file() -> String {
    DEFAULT_LOG_FILE.to_string()
}

fn default_max_active() -> usize {
    CoordinatorConfig::default().max_active
}

fn default_reaper_interval_ms() -> u64 {
    CoordinatorConfig::default().reaper_interval.as_millis() as u64
}

impl Default for TxcoordConfig {
    fn default() -> Self {
        Self {
            durability: DurabilityMode::default(),
            log_file: default_log_file(),
            default_timeout_secs: 0,
            max_active: default_max_active(),
            reaper_interval_ms: default_reaper_interval_ms(),
        }
    }
}

impl TxcoordConfig {
    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# txcoord transaction coordinator configuration
#
# Durability mode: "always" (default) or "cache"
#   "always" = every commit decision is fsynced before phase two
#   "cache"  = in-memory log, in-doubt transactions are lost on crash
durability = "always"

# Transaction log file, relative to this directory
log_file = "txcoord.log"

# Default transaction timeout in seconds (0 = no timeout)
default_timeout_secs = 0

# Maximum number of in-flight transactions
max_active = 8192

# How often the timeout reaper runs, in milliseconds
reaper_interval_ms = 1000
"#
    }

    /// Check every value; called eagerly by `from_file`.
    ///
    /// # Errors
    ///
    /// Returns `TxError::System` naming the bad setting.
    pub fn validate(&self) -> TxResult<()> {
        if self.durability.requires_log_file() && self.log_file.trim().is_empty() {
            return Err(TxError::system(format!(
                "Invalid {}: log_file must not be empty when durability is \"always\"",
                CONFIG_FILE_NAME
            )));
        }
        self.coordinator_config().validate().map_err(|e| {
            TxError::system(format!("Invalid {}: {}", CONFIG_FILE_NAME, e))
        })
    }

    /// Coordinator settings from this config.
    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig::new()
            .with_default_timeout(Duration::from_secs(self.default_timeout_secs))
            .with_max_active(self.max_active)
            .with_reaper_interval(Duration::from_millis(self.reaper_interval_ms))
    }

    /// Log settings for a service rooted at `data_dir`.
    pub fn log_config(&self, data_dir: &Path) -> LogConfig {
        match self.durability {
            DurabilityMode::Cache => LogConfig::in_memory(),
            DurabilityMode::Always => LogConfig::new(data_dir.join(&self.log_file)),
        }
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: &Path) -> TxResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TxError::system(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: TxcoordConfig = toml::from_str(&content).map_err(|e| {
            TxError::system(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    ///
    /// Returns `Ok(())` whether the file was created or already existed.
    pub fn write_default_if_missing(path: &Path) -> TxResult<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                TxError::system(format!(
                    "Failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> TxResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| TxError::system(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            TxError::system(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }
}
