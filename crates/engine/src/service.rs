//! Transaction service: one coordinator per data directory
//!
//! `TransactionService::open` brings a coordinator up in this order:
//!
//! 1. Load (or create) `txcoord.toml`
//! 2. Take an exclusive lock on the data directory
//! 3. Open the transaction log
//! 4. Run recovery against the supplied resources
//! 5. Build the manager and start the timeout reaper
//!
//! Recovery runs before the manager exists, so it never races live
//! transactions for the log.

use crate::config::{TxcoordConfig, CONFIG_FILE_NAME};
use parking_lot::Mutex;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use txcoord_concurrency::{
    RecoveryCoordinator, RecoveryStats, TimeoutReaper, TransactionContext, TransactionManager,
};
use txcoord_core::{TransactionalResource, TxError, TxResult};
use txcoord_durability::DurabilityMode;

/// Lock file placed in the data directory while a service has it open.
pub const LOCK_FILE_NAME: &str = ".lock";

/// A running coordinator with its log, recovery result, and reaper
pub struct TransactionService {
    config: TxcoordConfig,
    data_dir: Option<PathBuf>,
    manager: Arc<TransactionManager>,
    recovery: RecoveryStats,
    reaper: Mutex<Option<TimeoutReaper>>,
    _lock_file: Option<File>,
}

impl TransactionService {
    /// Open the service rooted at `dir`
    ///
    /// Writes a default `txcoord.toml` if none exists. `recovery_resources`
    /// are the adapters that may hold in-doubt work from a previous run.
    ///
    /// # Errors
    /// - the config file is unreadable or invalid
    /// - another service holds the directory
    /// - the log cannot be opened (including mid-log corruption) or rewritten
    pub fn open<P, I>(dir: P, recovery_resources: I) -> TxResult<Self>
    where
        P: AsRef<Path>,
        I: IntoIterator<Item = Arc<dyn TransactionalResource>>,
    {
        let data_dir = dir.as_ref().to_path_buf();
        create_dir(&data_dir)?;

        let config_path = data_dir.join(CONFIG_FILE_NAME);
        TxcoordConfig::write_default_if_missing(&config_path)?;
        let config = TxcoordConfig::from_file(&config_path)?;

        Self::start(&data_dir, config, recovery_resources)
    }

    /// Open the service rooted at `dir` with an explicit config
    ///
    /// The config is written to `txcoord.toml` so later `open` calls pick it up.
    pub fn open_with_config<P, I>(
        dir: P,
        config: TxcoordConfig,
        recovery_resources: I,
    ) -> TxResult<Self>
    where
        P: AsRef<Path>,
        I: IntoIterator<Item = Arc<dyn TransactionalResource>>,
    {
        config.validate()?;
        let data_dir = dir.as_ref().to_path_buf();
        create_dir(&data_dir)?;
        config.write_to_file(&data_dir.join(CONFIG_FILE_NAME))?;

        Self::start(&data_dir, config, recovery_resources)
    }

    /// Create a service with an in-memory log and no files
    ///
    /// Nothing survives a crash; there is nothing to recover.
    pub fn ephemeral() -> TxResult<Self> {
        let config = TxcoordConfig {
            durability: DurabilityMode::Cache,
            ..TxcoordConfig::default()
        };
        let log = config.log_config(Path::new("")).open()?;
        let manager = Arc::new(TransactionManager::new(config.coordinator_config(), log));
        let reaper = start_reaper(&manager)?;

        Ok(TransactionService {
            config,
            data_dir: None,
            manager,
            recovery: RecoveryStats::default(),
            reaper: Mutex::new(Some(reaper)),
            _lock_file: None,
        })
    }

    fn start<I>(data_dir: &Path, config: TxcoordConfig, recovery_resources: I) -> TxResult<Self>
    where
        I: IntoIterator<Item = Arc<dyn TransactionalResource>>,
    {
        let canonical = data_dir.canonicalize().map_err(|e| {
            TxError::system(format!("failed to resolve '{}': {}", data_dir.display(), e))
        })?;
        let lock_file = lock_dir(&canonical)?;

        let log = config.log_config(&canonical).open()?;
        let recovery = RecoveryCoordinator::new(Arc::clone(&log))
            .with_resources(recovery_resources)
            .recover()?;

        let manager = Arc::new(TransactionManager::new(config.coordinator_config(), log));
        let reaper = start_reaper(&manager)?;

        info!(
            path = %canonical.display(),
            durability = config.durability.description(),
            in_doubt = recovery.in_doubt,
            "Transaction service started"
        );

        Ok(TransactionService {
            config,
            data_dir: Some(canonical),
            manager,
            recovery,
            reaper: Mutex::new(Some(reaper)),
            _lock_file: Some(lock_file),
        })
    }

    /// The coordinator
    pub fn manager(&self) -> &Arc<TransactionManager> {
        &self.manager
    }

    /// A fresh per-task context
    pub fn context(&self) -> TransactionContext {
        TransactionContext::new(Arc::clone(&self.manager))
    }

    /// Configuration in effect
    pub fn config(&self) -> &TxcoordConfig {
        &self.config
    }

    /// Data directory, `None` for an ephemeral service
    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    /// Result of the recovery pass run at open
    pub fn recovery_stats(&self) -> RecoveryStats {
        self.recovery
    }

    /// Check if the timeout reaper is running
    pub fn is_reaping(&self) -> bool {
        self.reaper
            .lock()
            .as_ref()
            .map_or(false, |r| r.is_running())
    }

    /// Stop the timeout reaper
    ///
    /// In-flight transactions are left alone; their timeouts are still
    /// checked lazily at commit. Idempotent.
    pub fn shutdown(&self) {
        if let Some(mut reaper) = self.reaper.lock().take() {
            reaper.stop();
            info!(active = self.manager.active_count(), "Transaction service stopped");
        }
    }
}

impl Drop for TransactionService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn create_dir(dir: &Path) -> TxResult<()> {
    std::fs::create_dir_all(dir).map_err(|e| {
        TxError::system(format!("failed to create '{}': {}", dir.display(), e))
    })
}

fn lock_dir(dir: &Path) -> TxResult<File> {
    let lock_path = dir.join(LOCK_FILE_NAME);
    let lock_file = std::fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(&lock_path)
        .map_err(|e| TxError::system(format!("failed to open lock file: {}", e)))?;
    fs2::FileExt::try_lock_exclusive(&lock_file).map_err(|_| {
        TxError::system(format!(
            "transaction log at '{}' is already in use",
            dir.display()
        ))
    })?;
    Ok(lock_file)
}

fn start_reaper(manager: &Arc<TransactionManager>) -> TxResult<TimeoutReaper> {
    TimeoutReaper::start(Arc::clone(manager))
        .map_err(|e| TxError::system(format!("failed to spawn timeout reaper: {}", e)))
}
