//! txcoord - in-process two-phase-commit transaction coordinator
//!
//! Coordinates all-or-nothing outcomes across independently failing
//! resources (databases, queues, other transactional services). Application
//! code begins, commits, and rolls back through a [`TransactionContext`];
//! resources join a transaction by implementing [`TransactionalResource`].
//!
//! # Quick Start
//!
//! ```ignore
//! use txcoord::TransactionService;
//!
//! let service = TransactionService::open("/var/lib/myapp/tx", recovery_adapters)?;
//! let mut ctx = service.context();
//!
//! let tx = ctx.begin()?;
//! tx.enlist_resource(orders_db)?;
//! tx.enlist_resource(billing_queue)?;
//! ctx.commit()?;
//! ```
//!
//! # Architecture
//!
//! - `txcoord-core`: ids, statuses, the resource and synchronization traits, errors
//! - `txcoord-durability`: the decision log and its on-disk format
//! - `txcoord-concurrency`: transactions, two-phase commit, suspend/resume,
//!   timeouts, recovery
//! - `txcoord-engine`: `txcoord.toml` and the service that wires it together

pub use txcoord_concurrency::{
    CoordinatorConfig, DelistFlag, RecoveryCoordinator, RecoveryStats, StatsSnapshot, TaskId,
    TimeoutReaper, Transaction, TransactionContext, TransactionInfo, TransactionManager,
};
pub use txcoord_core::{
    Decision, HeuristicFailure, ResourceError, ResourceId, ResourceStatus, Status,
    Synchronization, TransactionalResource, TxError, TxId, TxResult, Vote,
};
pub use txcoord_durability::{
    DurabilityMode, FileTransactionLog, LogConfig, LogRecord, MemoryTransactionLog,
    TransactionLog,
};
pub use txcoord_engine::{TransactionService, TxcoordConfig};

/// Instrumented resources and logs for testing code built on txcoord
pub mod testing {
    pub use txcoord_concurrency::testing::*;
}
