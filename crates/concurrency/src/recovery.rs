//! Recovery coordinator
//!
//! Completes transactions interrupted by a crash.
//!
//! ## Recovery Procedure
//!
//! 1. Scan the transaction log
//! 2. Fold records: latest record per tx id wins
//! 3. For each entry with pending resources, re-deliver the logged decision
//!    (`commit(one_phase = false)` or `rollback`) to every pending resource
//!    that is registered here
//! 4. Rewrite the log with only the entries that still have pending resources
//! 5. Ask every registered resource for the transactions it holds prepared.
//!    Ids the log pass did not already handle get the folded decision when it
//!    is `Committed`, and `rollback` otherwise (presumed abort: a crash
//!    before the decision append leaves prepared work with no record)
//!
//! Re-delivery is at-least-once. Adapters see the same tx id they saw before
//! the crash and must treat a repeated phase-two call as a no-op. Pending
//! resource ids with no registered adapter stay in doubt and stay in the log.
//!
//! Presumed abort is only safe while no transaction is in flight, so a pass
//! must finish before the manager over the same log begins any work.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};
use txcoord_core::error::Result;
use txcoord_core::{Decision, ResourceError, ResourceId, TransactionalResource, TxId};
use txcoord_durability::{fold_entries, LogRecord, TransactionLog};

/// Counters from one recovery pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Raw records read from the log
    pub records_scanned: usize,
    /// Transactions after folding
    pub transactions: usize,
    /// Phase-two calls re-delivered successfully
    pub redriven: usize,
    /// Transactions whose pending list is now empty
    pub resolved: usize,
    /// Transactions still waiting on at least one resource
    pub in_doubt: usize,
    /// Pending resource ids with no registered adapter
    pub unknown_resources: usize,
    /// Records dropped by the log rewrite
    pub purged: usize,
    /// Prepared transactions reported by resources outside the log's pending lists
    pub reported_in_doubt: usize,
    /// Reported transactions rolled back for lack of a commit record
    pub presumed_aborted: usize,
    /// Reported transactions the resource failed to resolve
    pub reported_unresolved: usize,
}

/// Replays the transaction log against registered resources
pub struct RecoveryCoordinator {
    log: Arc<dyn TransactionLog>,
    resources: HashMap<ResourceId, Arc<dyn TransactionalResource>>,
}

impl RecoveryCoordinator {
    /// Create a coordinator over `log` with no registered resources
    pub fn new(log: Arc<dyn TransactionLog>) -> Self {
        RecoveryCoordinator {
            log,
            resources: HashMap::new(),
        }
    }

    /// Register an adapter that may hold in-doubt work
    ///
    /// A later registration with the same resource id replaces the earlier one.
    pub fn register_resource(&mut self, adapter: Arc<dyn TransactionalResource>) {
        self.resources.insert(adapter.resource_id(), adapter);
    }

    /// Register several adapters (builder pattern)
    pub fn with_resources<I>(mut self, adapters: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn TransactionalResource>>,
    {
        for adapter in adapters {
            self.register_resource(adapter);
        }
        self
    }

    /// Ids of registered resources
    pub fn registered(&self) -> Vec<ResourceId> {
        let mut ids: Vec<ResourceId> = self.resources.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Run one recovery pass
    ///
    /// # Errors
    /// Fails only if the log cannot be read or rewritten. Resource failures
    /// leave the entry in doubt and are reported through the stats.
    pub fn recover(&self) -> Result<RecoveryStats> {
        let records = self.log.read_all()?;
        let mut stats = RecoveryStats {
            records_scanned: records.len(),
            ..RecoveryStats::default()
        };

        let folded = fold_entries(&records);
        stats.transactions = folded.len();

        let mut handled: HashSet<(TxId, ResourceId)> = HashSet::new();
        if records.is_empty() {
            info!("Recovery: transaction log is empty");
        } else {
            let mut kept: Vec<LogRecord> = Vec::new();
            for record in &folded {
                if record.is_resolved() {
                    continue;
                }
                handled.extend(record.pending.iter().map(|id| (record.tx_id, id.clone())));

                let remaining = self.redrive(record, &mut stats);
                if remaining.is_empty() {
                    debug!(tx_id = %record.tx_id, decision = %record.decision, "Recovery resolved transaction");
                    stats.resolved += 1;
                } else {
                    warn!(
                        tx_id = %record.tx_id,
                        decision = %record.decision,
                        pending = remaining.len(),
                        "Transaction remains in doubt after recovery"
                    );
                    stats.in_doubt += 1;
                    if remaining == record.pending {
                        kept.push(record.clone());
                    } else {
                        kept.push(record.with_pending(remaining));
                    }
                }
            }

            stats.purged = records.len() - kept.len();
            if stats.purged > 0 || kept != records {
                self.log.rewrite(&kept)?;
            }
        }

        let decisions: HashMap<TxId, Decision> =
            folded.iter().map(|r| (r.tx_id, r.decision)).collect();
        self.resolve_reported(&decisions, &handled, &mut stats);

        info!(
            records = stats.records_scanned,
            transactions = stats.transactions,
            redriven = stats.redriven,
            resolved = stats.resolved,
            in_doubt = stats.in_doubt,
            unknown_resources = stats.unknown_resources,
            purged = stats.purged,
            reported_in_doubt = stats.reported_in_doubt,
            presumed_aborted = stats.presumed_aborted,
            "Recovery complete"
        );
        Ok(stats)
    }

    /// Settle prepared work that resources report and the log pass did not cover
    fn resolve_reported(
        &self,
        decisions: &HashMap<TxId, Decision>,
        handled: &HashSet<(TxId, ResourceId)>,
        stats: &mut RecoveryStats,
    ) {
        let mut ids: Vec<&ResourceId> = self.resources.keys().collect();
        ids.sort();

        for id in ids {
            let Some(adapter) = self.resources.get(id) else {
                continue;
            };
            let reported = match adapter.recover() {
                Ok(reported) => reported,
                Err(e) => {
                    warn!(resource = %id, error = %e, "Resource could not list in-doubt transactions");
                    continue;
                }
            };

            for tx_id in reported {
                if handled.contains(&(tx_id, id.clone())) {
                    continue;
                }
                stats.reported_in_doubt += 1;

                let decision = match decisions.get(&tx_id) {
                    Some(Decision::Committed) => Decision::Committed,
                    _ => Decision::RolledBack,
                };
                match deliver(adapter.as_ref(), tx_id, decision) {
                    Ok(()) if decision == Decision::Committed => {
                        debug!(tx_id = %tx_id, resource = %id, "Committed reported transaction");
                        stats.redriven += 1;
                    }
                    Ok(()) => {
                        debug!(tx_id = %tx_id, resource = %id, "Presumed abort of reported transaction");
                        stats.presumed_aborted += 1;
                    }
                    Err(e) => {
                        warn!(tx_id = %tx_id, resource = %id, decision = %decision, error = %e, "Could not resolve reported transaction");
                        stats.reported_unresolved += 1;
                    }
                }
            }
        }
    }

    /// Re-deliver `record`'s decision; returns the resources still pending
    fn redrive(&self, record: &LogRecord, stats: &mut RecoveryStats) -> Vec<ResourceId> {
        let mut remaining = Vec::new();

        for id in &record.pending {
            let Some(adapter) = self.resources.get(id) else {
                warn!(tx_id = %record.tx_id, resource = %id, "No adapter registered for pending resource");
                stats.unknown_resources += 1;
                remaining.push(id.clone());
                continue;
            };

            match deliver(adapter.as_ref(), record.tx_id, record.decision) {
                Ok(()) => {
                    debug!(tx_id = %record.tx_id, resource = %id, decision = %record.decision, "Re-delivered decision");
                    stats.redriven += 1;
                }
                Err(e) => {
                    warn!(tx_id = %record.tx_id, resource = %id, error = %e, "Re-delivery failed");
                    remaining.push(id.clone());
                }
            }
        }

        remaining
    }
}

/// Phase-two call for `decision`; a heuristic that matches it counts as delivered
fn deliver(
    adapter: &dyn TransactionalResource,
    tx_id: TxId,
    decision: Decision,
) -> std::result::Result<(), ResourceError> {
    match decision {
        Decision::Committed => match adapter.commit(tx_id, false) {
            Err(ResourceError::HeuristicCommit) => Ok(()),
            other => other,
        },
        Decision::RolledBack => match adapter.rollback(tx_id) {
            Err(ResourceError::HeuristicRollback) => Ok(()),
            other => other,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Call, CallJournal, RecordingResource};
    use txcoord_core::Vote;
    use txcoord_durability::MemoryTransactionLog;

    #[test]
    fn test_empty_log() {
        let log: Arc<dyn TransactionLog> = Arc::new(MemoryTransactionLog::new());
        let stats = RecoveryCoordinator::new(log).recover().unwrap();
        assert_eq!(stats, RecoveryStats::default());
    }

    #[test]
    fn test_resolved_entries_are_purged() {
        let log: Arc<dyn TransactionLog> = Arc::new(MemoryTransactionLog::new());
        log.append(&LogRecord::resolved(TxId::new(), Decision::Committed)).unwrap();
        log.append(&LogRecord::resolved(TxId::new(), Decision::RolledBack)).unwrap();

        let stats = RecoveryCoordinator::new(Arc::clone(&log)).recover().unwrap();
        assert_eq!(stats.purged, 2);
        assert!(log.read_all().unwrap().is_empty());
    }

    #[test]
    fn test_redrives_commit_and_rollback() {
        let journal = CallJournal::new();
        let orders = Arc::new(RecordingResource::new("orders", &journal));
        let billing = Arc::new(RecordingResource::new("billing", &journal));
        let log: Arc<dyn TransactionLog> = Arc::new(MemoryTransactionLog::new());

        let committed = TxId::new();
        let rolled_back = TxId::new();
        log.append(&LogRecord::new(committed, Decision::Committed, vec!["orders".into()]))
            .unwrap();
        log.append(&LogRecord::new(rolled_back, Decision::RolledBack, vec!["billing".into()]))
            .unwrap();

        let coordinator = RecoveryCoordinator::new(Arc::clone(&log))
            .with_resources([orders.clone() as Arc<dyn TransactionalResource>, billing.clone()]);
        let stats = coordinator.recover().unwrap();

        assert_eq!(stats.redriven, 2);
        assert_eq!(stats.resolved, 2);
        assert_eq!(stats.in_doubt, 0);
        assert!(orders.is_committed(committed));
        assert!(billing.is_rolled_back(rolled_back));
        assert_eq!(journal.calls_for("orders"), vec![Call::Commit { one_phase: false }]);
        assert!(log.read_all().unwrap().is_empty());
    }

    #[test]
    fn test_unknown_resource_stays_in_doubt() {
        let log: Arc<dyn TransactionLog> = Arc::new(MemoryTransactionLog::new());
        let tx = TxId::new();
        log.append(&LogRecord::new(tx, Decision::Committed, vec!["gone".into()]))
            .unwrap();

        let stats = RecoveryCoordinator::new(Arc::clone(&log)).recover().unwrap();
        assert_eq!(stats.unknown_resources, 1);
        assert_eq!(stats.in_doubt, 1);

        let remaining = log.read_all().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].tx_id, tx);
        assert_eq!(remaining[0].pending, vec![ResourceId::from("gone")]);
    }

    #[test]
    fn test_latest_record_wins() {
        let journal = CallJournal::new();
        let r1 = Arc::new(RecordingResource::new("r1", &journal));
        let r2 = Arc::new(RecordingResource::new("r2", &journal));
        let log: Arc<dyn TransactionLog> = Arc::new(MemoryTransactionLog::new());

        let tx = TxId::new();
        let decision = LogRecord::new(tx, Decision::Committed, vec!["r1".into(), "r2".into()]);
        log.append(&decision).unwrap();
        log.append(&decision.with_pending(vec!["r2".into()])).unwrap();

        let coordinator = RecoveryCoordinator::new(Arc::clone(&log))
            .with_resources([r1.clone() as Arc<dyn TransactionalResource>, r2.clone()]);
        coordinator.recover().unwrap();

        assert!(journal.calls_for("r1").is_empty());
        assert_eq!(journal.calls_for("r2"), vec![Call::Commit { one_phase: false }]);
    }

    #[test]
    fn test_failed_redrive_keeps_entry() {
        let journal = CallJournal::new();
        let r1 = Arc::new(
            RecordingResource::new("r1", &journal)
                .fail_commit(ResourceError::Unavailable("connection refused".into())),
        );
        let log: Arc<dyn TransactionLog> = Arc::new(MemoryTransactionLog::new());
        let tx = TxId::new();
        log.append(&LogRecord::new(tx, Decision::Committed, vec!["r1".into()]))
            .unwrap();

        let mut coordinator = RecoveryCoordinator::new(Arc::clone(&log));
        coordinator.register_resource(r1.clone());
        assert_eq!(coordinator.registered(), vec![ResourceId::from("r1")]);

        let stats = coordinator.recover().unwrap();
        assert_eq!(stats.in_doubt, 1);
        assert_eq!(log.read_all().unwrap().len(), 1);

        r1.set_commit_failure(None);
        let stats = coordinator.recover().unwrap();
        assert_eq!(stats.resolved, 1);
        assert!(r1.is_committed(tx));
        assert!(log.read_all().unwrap().is_empty());
    }

    #[test]
    fn test_prepared_without_record_is_rolled_back() {
        let journal = CallJournal::new();
        let r1 = Arc::new(RecordingResource::new("r1", &journal));
        let log: Arc<dyn TransactionLog> = Arc::new(MemoryTransactionLog::new());
        let tx = TxId::new();
        assert_eq!(r1.prepare(tx), Ok(Vote::Commit));

        let stats = RecoveryCoordinator::new(log)
            .with_resources([r1.clone() as Arc<dyn TransactionalResource>])
            .recover()
            .unwrap();

        assert_eq!(stats.reported_in_doubt, 1);
        assert_eq!(stats.presumed_aborted, 1);
        assert!(r1.is_rolled_back(tx));
        assert!(!r1.is_in_doubt(tx));
    }

    #[test]
    fn test_reported_transaction_with_commit_record_is_committed() {
        let journal = CallJournal::new();
        let r1 = Arc::new(RecordingResource::new("r1", &journal));
        let log: Arc<dyn TransactionLog> = Arc::new(MemoryTransactionLog::new());
        let tx = TxId::new();
        r1.prepare(tx).unwrap();
        log.append(&LogRecord::resolved(tx, Decision::Committed)).unwrap();

        let stats = RecoveryCoordinator::new(log)
            .with_resources([r1.clone() as Arc<dyn TransactionalResource>])
            .recover()
            .unwrap();

        assert_eq!(stats.reported_in_doubt, 1);
        assert_eq!(stats.presumed_aborted, 0);
        assert!(r1.is_committed(tx));
    }

    #[test]
    fn test_logged_pending_resource_is_not_called_twice() {
        let journal = CallJournal::new();
        let r1 = Arc::new(
            RecordingResource::new("r1", &journal)
                .fail_commit(ResourceError::Unavailable("still down".into())),
        );
        let log: Arc<dyn TransactionLog> = Arc::new(MemoryTransactionLog::new());
        let tx = TxId::new();
        r1.prepare(tx).unwrap();
        log.append(&LogRecord::new(tx, Decision::Committed, vec!["r1".into()]))
            .unwrap();
        journal.clear();

        let stats = RecoveryCoordinator::new(Arc::clone(&log))
            .with_resources([r1.clone() as Arc<dyn TransactionalResource>])
            .recover()
            .unwrap();

        assert_eq!(journal.calls_for("r1"), vec![Call::Commit { one_phase: false }]);
        assert_eq!(stats.in_doubt, 1);
        assert_eq!(stats.reported_in_doubt, 0);
        assert!(!r1.is_rolled_back(tx));
    }
}
