//! Participant traits
//!
//! `TransactionalResource` is the seam between the coordinator and anything
//! that holds transactional work: a database connection, a message queue
//! session, a file store. `Synchronization` lets application code observe
//! the completion boundary.

use crate::error::ResourceError;
use crate::status::{Status, Vote};
use crate::types::{ResourceId, TxId};

/// A participant in a distributed transaction
///
/// Every call carries the transaction id so an adapter can treat repeated
/// phase-two calls for an already-resolved transaction as a no-op. Recovery
/// relies on that: it re-delivers the logged decision without knowing how far
/// the original attempt got.
pub trait TransactionalResource: Send + Sync {
    /// Stable identity recorded in the transaction log
    fn resource_id(&self) -> ResourceId;

    /// Phase one: vote on the outcome
    ///
    /// Returning `Vote::Rollback` means the resource has already discarded its
    /// work and will not be called again for this transaction.
    fn prepare(&self, tx_id: TxId) -> Result<Vote, ResourceError>;

    /// Phase two: make the work durable
    ///
    /// `one_phase` is true when the coordinator skipped prepare (single
    /// participant, or last agent); the resource decides the outcome itself and
    /// an error means it did not commit.
    fn commit(&self, tx_id: TxId, one_phase: bool) -> Result<(), ResourceError>;

    /// Discard the work
    fn rollback(&self, tx_id: TxId) -> Result<(), ResourceError>;

    /// Transactions this resource has prepared and not yet been told the outcome of
    ///
    /// Asked once per recovery pass. Work prepared just before a crash may
    /// have no decision record; recovery rolls those back. Defaults to
    /// reporting nothing.
    fn recover(&self) -> Result<Vec<TxId>, ResourceError> {
        Ok(Vec::new())
    }

    /// Whether `other` is another handle to the same underlying resource
    ///
    /// Used to suppress duplicate enlistment. Defaults to comparing ids.
    fn is_same_resource(&self, other: &dyn TransactionalResource) -> bool {
        self.resource_id() == other.resource_id()
    }

    /// Whether the resource supports `prepare`
    ///
    /// At most one resource per transaction may return false; it becomes the
    /// last agent.
    fn is_two_phase_capable(&self) -> bool {
        true
    }
}

/// Callback registered with a transaction to observe completion
pub trait Synchronization: Send + Sync {
    /// Called once before prepare starts, while the outcome can still change
    ///
    /// An error marks the transaction rollback-only.
    fn before_completion(&self) -> Result<(), ResourceError>;

    /// Called once after the outcome is known, with the final status
    ///
    /// Errors are logged and otherwise ignored; the outcome is already final.
    fn after_completion(&self, status: Status) -> Result<(), ResourceError>;
}
