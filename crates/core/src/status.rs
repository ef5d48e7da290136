//! Transaction and participant status types
//!
//! State transitions for a transaction:
//! - `Active` → `MarkedRollback` (set_rollback_only, timeout, failed before_completion)
//! - `Active` → `Preparing` (commit with two or more participants, or a last agent)
//! - `Active` → `Committing` (one-phase commit of a single participant)
//! - `Preparing` → `MarkedRollback` (set_rollback_only while votes are collected)
//! - `Preparing` → `Prepared` → `Committing` → `Committed`
//! - any non-terminal state → `RollingBack` → `RolledBack`
//!
//! Terminal states: `Committed`, `RolledBack`, `NoTransaction`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a transaction in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    /// Transaction is executing; resources may enlist
    Active,
    /// Transaction will be rolled back whatever the caller does next
    MarkedRollback,
    /// Prepare votes are being collected
    Preparing,
    /// Every participant voted to commit
    Prepared,
    /// Commit decision is being delivered
    Committing,
    /// Transaction committed
    Committed,
    /// Rollback is being delivered
    RollingBack,
    /// Transaction rolled back
    RolledBack,
    /// No transaction is associated with the caller
    NoTransaction,
}

impl Status {
    /// Check if no further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Status::Committed | Status::RolledBack | Status::NoTransaction
        )
    }

    /// Check if commit or rollback has not started yet
    ///
    /// These are the states from which `MarkedRollback` is reachable by
    /// application request.
    pub fn is_pre_commit(&self) -> bool {
        matches!(
            self,
            Status::Active | Status::MarkedRollback | Status::Preparing
        )
    }

    /// Stable display name used in logs and the active-transaction listing
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Active => "Active",
            Status::MarkedRollback => "MarkedRollback",
            Status::Preparing => "Preparing",
            Status::Prepared => "Prepared",
            Status::Committing => "Committing",
            Status::Committed => "Committed",
            Status::RollingBack => "RollingBack",
            Status::RolledBack => "RolledBack",
            Status::NoTransaction => "NoTransaction",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-participant status tracked by the transaction for each enlisted resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceStatus {
    /// Enlisted; no protocol call made yet
    Enlisted,
    /// Voted to commit and awaits the decision
    Prepared,
    /// Committed (or voted read-only, which needs no phase two)
    Committed,
    /// Rolled back
    RolledBack,
    /// A protocol call failed; the outcome at the resource is unknown
    Failed,
}

/// Prepare vote returned by a two-phase-capable resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Vote {
    /// Ready to commit; the resource holds its work until told the outcome
    Commit,
    /// The resource cannot commit and has already discarded its work
    Rollback,
    /// The resource made no changes and needs no phase-two call
    ReadOnly,
}

/// Outcome decision recorded in the transaction log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Decision {
    /// Every participant must commit
    Committed,
    /// Every participant must roll back
    RolledBack,
}

impl Decision {
    /// Terminal transaction status matching this decision
    pub fn status(&self) -> Status {
        match self {
            Decision::Committed => Status::Committed,
            Decision::RolledBack => Status::RolledBack,
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Committed => f.write_str("Committed"),
            Decision::RolledBack => f.write_str("RolledBack"),
        }
    }
}
