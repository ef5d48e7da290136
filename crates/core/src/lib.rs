//! Core types and traits for txcoord
//!
//! This crate defines the foundational types used throughout the system:
//! - TxId / ResourceId: transaction and participant identity
//! - Status / ResourceStatus / Vote / Decision: protocol state
//! - Error / TxError / ResourceError: error hierarchy
//! - Traits: participant contracts (TransactionalResource, Synchronization)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod status;
pub mod traits;
pub mod types;

pub use error::{Error, HeuristicFailure, ResourceError, Result, TxError, TxResult};
pub use status::{Decision, ResourceStatus, Status, Vote};
pub use traits::{Synchronization, TransactionalResource};
pub use types::{ResourceId, TxId};
