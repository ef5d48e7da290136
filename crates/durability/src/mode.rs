//! Durability mode configuration
//!
//! Controls whether the transaction log touches disk at all.

use serde::{Deserialize, Serialize};

/// Durability mode for the transaction log
///
/// There is no batched mode: a decision record must be on disk before any
/// participant hears phase two, so every append in `Always` is fsynced before
/// it returns.
///
/// | Mode | fsync | Survives crash |
/// |------|-------|----------------|
/// | Cache | Never | No |
/// | Always | Every append | Yes |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DurabilityMode {
    /// In-memory log; every decision is lost on crash
    ///
    /// Use case: tests, ephemeral coordinators whose resources are not
    /// recoverable anyway.
    Cache,

    /// fsync after every append (the default)
    #[default]
    Always,
}

impl DurabilityMode {
    /// Check if this mode needs a log file
    pub fn requires_log_file(&self) -> bool {
        !matches!(self, DurabilityMode::Cache)
    }

    /// Human-readable description of the mode
    pub fn description(&self) -> &'static str {
        match self {
            DurabilityMode::Cache => "Cache (in-memory, decisions lost on crash)",
            DurabilityMode::Always => "Always sync (every decision durable before phase two)",
        }
    }
}
