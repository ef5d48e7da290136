//! Error types for txcoord
//!
//! Three layers:
//! - `Error`: storage-level failures (log file I/O, encoding, corruption)
//! - `ResourceError`: what a resource adapter reports from a protocol call
//! - `TxError`: the outcome taxonomy surfaced to callers of the coordinator
//!
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.

use crate::types::{ResourceId, TxId};
use std::io;
use thiserror::Error;

/// Result type alias for storage-level operations
pub type Result<T> = std::result::Result<T, Error>;

/// Result type alias for coordinator operations
pub type TxResult<T> = std::result::Result<T, TxError>;

/// Storage-level errors (transaction log, encoding)
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Data corruption detected
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// Buffer ends before the record does (torn write at the log tail)
    #[error("Incomplete entry at offset {offset}: have {have} bytes, need {needed}")]
    IncompleteEntry {
        /// File offset of the record
        offset: u64,
        /// Bytes available
        have: usize,
        /// Bytes required
        needed: usize,
    },

    /// Invalid operation or state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::SerializationError(e.to_string())
    }
}

/// Failure reported by a resource adapter
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceError {
    /// The call failed; the resource did not complete the requested action
    #[error("resource failed: {0}")]
    Failed(String),

    /// The resource could not be reached
    #[error("resource unavailable: {0}")]
    Unavailable(String),

    /// The resource unilaterally rolled back its work
    #[error("resource heuristically rolled back")]
    HeuristicRollback,

    /// The resource unilaterally committed its work
    #[error("resource heuristically committed")]
    HeuristicCommit,

    /// Part of the resource's work committed and part rolled back
    #[error("resource heuristically mixed")]
    HeuristicMixed,
}

/// One participant whose phase-two outcome diverged from the logged decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeuristicFailure {
    /// Participant that failed
    pub resource: ResourceId,
    /// What it reported
    pub error: ResourceError,
}

impl HeuristicFailure {
    /// Create a new heuristic failure record
    pub fn new(resource: ResourceId, error: ResourceError) -> Self {
        Self { resource, error }
    }
}

/// Outcome errors surfaced by the coordinator
#[derive(Debug, Error)]
pub enum TxError {
    /// The transaction was rolled back, by request, vote, timeout, or failure
    #[error("transaction {tx_id} rolled back: {reason}")]
    Rollback {
        /// Transaction that rolled back
        tx_id: TxId,
        /// Why
        reason: String,
        /// Participant failure that caused the rollback, if any
        #[source]
        cause: Option<ResourceError>,
    },

    /// Some participants committed and some rolled back against the decision
    #[error("transaction {tx_id} completed with mixed heuristic outcome: {} participant(s) diverged", .failures.len())]
    HeuristicMixed {
        /// Transaction
        tx_id: TxId,
        /// Participants that diverged
        failures: Vec<HeuristicFailure>,
    },

    /// Every participant rolled back even though the decision was commit
    #[error("transaction {tx_id} heuristically rolled back: {} participant(s) failed to commit", .failures.len())]
    HeuristicRollback {
        /// Transaction
        tx_id: TxId,
        /// Participants that failed to commit
        failures: Vec<HeuristicFailure>,
    },

    /// Coordinator-internal failure
    #[error("system error: {message}")]
    System {
        /// Description
        message: String,
        /// Underlying storage failure
        #[source]
        source: Option<Box<Error>>,
    },

    /// API misuse (commit without begin, commit from a non-owning task, ...)
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// Resume of a terminal transaction or one owned by another task
    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),

    /// A second non-two-phase-capable resource tried to enlist
    #[error("transaction {tx_id} already has last agent {existing}; cannot enlist {rejected}")]
    MultipleLastAgents {
        /// Transaction
        tx_id: TxId,
        /// Last agent already enlisted
        existing: ResourceId,
        /// Resource that was refused
        rejected: ResourceId,
    },

    /// Too many concurrent transactions
    #[error("too many active transactions (limit {limit})")]
    ResourceExhausted {
        /// Configured limit
        limit: usize,
    },

    /// Unsupported request, such as a nested begin
    #[error("not supported: {0}")]
    NotSupported(String),
}

impl TxError {
    /// Create a rollback error without a participant cause
    pub fn rollback(tx_id: TxId, reason: impl Into<String>) -> Self {
        TxError::Rollback {
            tx_id,
            reason: reason.into(),
            cause: None,
        }
    }

    /// Create a system error without an underlying source
    pub fn system(message: impl Into<String>) -> Self {
        TxError::System {
            message: message.into(),
            source: None,
        }
    }

    /// Create an illegal-state error
    pub fn illegal_state(message: impl Into<String>) -> Self {
        TxError::IllegalState(message.into())
    }

    /// Check if the transaction ended rolled back
    pub fn is_rollback(&self) -> bool {
        matches!(self, TxError::Rollback { .. })
    }

    /// Check if this is a heuristic outcome
    pub fn is_heuristic(&self) -> bool {
        matches!(
            self,
            TxError::HeuristicMixed { .. } | TxError::HeuristicRollback { .. }
        )
    }

    /// Transaction the error refers to, if any
    pub fn tx_id(&self) -> Option<TxId> {
        match self {
            TxError::Rollback { tx_id, .. }
            | TxError::HeuristicMixed { tx_id, .. }
            | TxError::HeuristicRollback { tx_id, .. }
            | TxError::MultipleLastAgents { tx_id, .. } => Some(*tx_id),
            _ => None,
        }
    }
}

impl From<Error> for TxError {
    fn from(e: Error) -> Self {
        TxError::System {
            message: e.to_string(),
            source: Some(Box::new(e)),
        }
    }
}
