//! Coordinator configuration.

use std::time::Duration;

/// Default cap on concurrently active transactions.
pub const DEFAULT_MAX_ACTIVE: usize = 8192;

/// Default interval between timeout reaper passes.
pub const DEFAULT_REAPER_INTERVAL: Duration = Duration::from_secs(1);

/// Coordinator configuration parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Timeout applied to transactions begun without an explicit one.
    ///
    /// `Duration::ZERO` (the default) means no timeout.
    pub default_timeout: Duration,

    /// Maximum number of transactions active at once (default: 8192).
    pub max_active: usize,

    /// How often the timeout reaper scans for expired transactions
    /// (default: 1s).
    pub reaper_interval: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        CoordinatorConfig {
            default_timeout: Duration::ZERO,
            max_active: DEFAULT_MAX_ACTIVE,
            reaper_interval: DEFAULT_REAPER_INTERVAL,
        }
    }
}

impl CoordinatorConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set default timeout (builder pattern).
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Set active transaction limit (builder pattern).
    pub fn with_max_active(mut self, max_active: usize) -> Self {
        self.max_active = max_active;
        self
    }

    /// Set reaper interval (builder pattern).
    pub fn with_reaper_interval(mut self, interval: Duration) -> Self {
        self.reaper_interval = interval;
        self
    }

    /// Default timeout as an optional deadline offset.
    pub fn timeout(&self) -> Option<Duration> {
        if self.default_timeout.is_zero() {
            None
        } else {
            Some(self.default_timeout)
        }
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), CoordinatorConfigError> {
        if self.max_active == 0 {
            return Err(CoordinatorConfigError::ZeroMaxActive);
        }
        if self.reaper_interval.is_zero() {
            return Err(CoordinatorConfigError::ZeroReaperInterval);
        }
        Ok(())
    }

    /// Create a configuration suited to tests (small limit, fast reaper).
    pub fn for_testing() -> Self {
        CoordinatorConfig {
            default_timeout: Duration::ZERO,
            max_active: 64,
            reaper_interval: Duration::from_millis(10),
        }
    }
}

/// Coordinator configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoordinatorConfigError {
    /// No transaction could ever begin.
    #[error("max_active must be at least 1")]
    ZeroMaxActive,

    /// Reaper would spin.
    #[error("reaper_interval must be greater than zero")]
    ZeroReaperInterval,
}
