//! Identifier types
//!
//! - TxId: globally unique transaction identifier
//! - ResourceId: stable name of a transactional resource, recorded in the
//!   transaction log so recovery can find the adapter again after a restart

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Globally unique transaction identifier
///
/// Assigned once when the transaction begins and never changed. The same id
/// is handed to every resource adapter call so adapters can recognise repeated
/// phase-two calls for a transaction they already resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxId(Uuid);

impl TxId {
    /// Create a new random transaction id
    pub fn new() -> Self {
        TxId(Uuid::new_v4())
    }

    /// Nil id, used where no transaction is associated
    pub fn nil() -> Self {
        TxId(Uuid::nil())
    }

    /// Check if this is the nil id
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    /// Convert to bytes (16 bytes)
    pub fn to_bytes(&self) -> [u8; 16] {
        *self.0.as_bytes()
    }

    /// Create from bytes
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        TxId(Uuid::from_bytes(bytes))
    }

    /// Parse from the hyphenated string form
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(TxId)
    }

    /// Get the inner UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TxId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable name of a transactional resource
///
/// Two adapters over the same physical resource (for example two connections
/// from the same pool to the same database) report the same `ResourceId`.
/// It is what the transaction log records for pending participants.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId(String);

impl ResourceId {
    /// Create a resource id from a name
    pub fn new(name: impl Into<String>) -> Self {
        ResourceId(name.into())
    }

    /// Get the name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(s: &str) -> Self {
        ResourceId::new(s)
    }
}

impl From<String> for ResourceId {
    fn from(s: String) -> Self {
        ResourceId(s)
    }
}
