//! Transaction log configuration.

use crate::log::{FileTransactionLog, MemoryTransactionLog, TransactionLog};
use crate::mode::DurabilityMode;
use std::path::PathBuf;
use std::sync::Arc;
use txcoord_core::error::Result;

/// Default log file name inside a data directory.
pub const DEFAULT_LOG_FILE: &str = "txcoord.log";

/// Transaction log configuration parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Path of the log file (ignored in `Cache` mode).
    pub path: PathBuf,

    /// Durability mode (default: `Always`).
    pub mode: DurabilityMode,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            path: PathBuf::from(DEFAULT_LOG_FILE),
            mode: DurabilityMode::Always,
        }
    }
}

impl LogConfig {
    /// Create a durable configuration writing to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        LogConfig {
            path: path.into(),
            mode: DurabilityMode::Always,
        }
    }

    /// Create an in-memory configuration.
    pub fn in_memory() -> Self {
        LogConfig {
            path: PathBuf::new(),
            mode: DurabilityMode::Cache,
        }
    }

    /// Set log path (builder pattern).
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    /// Set durability mode (builder pattern).
    pub fn with_mode(mut self, mode: DurabilityMode) -> Self {
        self.mode = mode;
        self
    }

    /// Validate configuration.
    pub fn validate(&self) -> std::result::Result<(), LogConfigError> {
        if self.mode.requires_log_file() {
            if self.path.as_os_str().is_empty() {
                return Err(LogConfigError::MissingPath);
            }
            if self.path.is_dir() {
                return Err(LogConfigError::PathIsDirectory(self.path.clone()));
            }
        }
        Ok(())
    }

    /// Open the log this configuration describes.
    pub fn open(&self) -> Result<Arc<dyn TransactionLog>> {
        self.validate()
            .map_err(|e| txcoord_core::Error::InvalidOperation(e.to_string()))?;

        match self.mode {
            DurabilityMode::Cache => Ok(Arc::new(MemoryTransactionLog::new())),
            DurabilityMode::Always => Ok(Arc::new(FileTransactionLog::open(&self.path)?)),
        }
    }
}

/// Log configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LogConfigError {
    /// Durable mode needs a file path.
    #[error("Log path must be set when durability mode is Always")]
    MissingPath,

    /// The configured path names a directory.
    #[error("Log path {0:?} is a directory")]
    PathIsDirectory(PathBuf),
}
