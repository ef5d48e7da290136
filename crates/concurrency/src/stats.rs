//! Coordinator counters and the active-transaction listing

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use txcoord_core::{Status, TxId};

/// Lifetime counters for a coordinator
#[derive(Debug, Default)]
pub struct TransactionStats {
    begun: AtomicU64,
    committed: AtomicU64,
    rolled_back: AtomicU64,
    timed_out: AtomicU64,
    heuristic: AtomicU64,
    active: AtomicU64,
}

/// Point-in-time copy of `TransactionStats`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StatsSnapshot {
    /// Transactions begun
    pub begun: u64,
    /// Transactions that reached `Committed`
    pub committed: u64,
    /// Transactions that reached `RolledBack`
    pub rolled_back: u64,
    /// Transactions marked rollback-only by the timeout reaper
    pub timed_out: u64,
    /// Completions that surfaced a heuristic outcome
    pub heuristic: u64,
    /// Transactions currently registered
    pub active: u64,
}

impl TransactionStats {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_begin(&self) {
        self.begun.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_end(&self, status: Status) {
        match status {
            Status::Committed => self.committed.fetch_add(1, Ordering::Relaxed),
            _ => self.rolled_back.fetch_add(1, Ordering::Relaxed),
        };
        self.active.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn record_timeout(&self) {
        self.timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_heuristic(&self) {
        self.heuristic.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the counters
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            begun: self.begun.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            rolled_back: self.rolled_back.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            heuristic: self.heuristic.load(Ordering::Relaxed),
            active: self.active.load(Ordering::Relaxed),
        }
    }
}

/// Monitoring view of one in-flight transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionInfo {
    /// Transaction id
    pub tx_id: TxId,
    /// Status at the time of the listing
    pub status: Status,
    /// Wall-clock begin time
    pub started_at: DateTime<Utc>,
    /// Time since begin
    pub elapsed: Duration,
    /// Enlisted resources, in enlistment order
    pub resource_names: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let stats = TransactionStats::new();
        stats.record_begin();
        stats.record_begin();
        stats.record_begin();
        stats.record_end(Status::Committed);
        stats.record_end(Status::RolledBack);
        stats.record_timeout();
        stats.record_heuristic();

        let snap = stats.snapshot();
        assert_eq!(snap.begun, 3);
        assert_eq!(snap.committed, 1);
        assert_eq!(snap.rolled_back, 1);
        assert_eq!(snap.timed_out, 1);
        assert_eq!(snap.heuristic, 1);
        assert_eq!(snap.active, 1);
    }
}
