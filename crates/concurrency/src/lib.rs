//! Coordination layer for txcoord
//!
//! This crate implements the in-process transaction coordinator:
//! - Transaction: per-transaction state machine and enlistment bookkeeping
//! - TransactionManager: two-phase commit with the last-agent optimization
//! - TransactionContext: explicit per-task association (suspend/resume)
//! - TimeoutReaper: background expiry of `Active` transactions
//! - RecoveryCoordinator: log replay after a crash
//! - Stats and the active-transaction listing

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod context;
pub mod manager;
pub mod reaper;
pub mod recovery;
pub mod stats;
pub mod testing;
pub mod transaction;

pub use config::{CoordinatorConfig, CoordinatorConfigError};
pub use context::{TaskId, TransactionContext};
pub use manager::TransactionManager;
pub use reaper::TimeoutReaper;
pub use recovery::{RecoveryCoordinator, RecoveryStats};
pub use stats::{StatsSnapshot, TransactionInfo, TransactionStats};
pub use transaction::{DelistFlag, Transaction};
