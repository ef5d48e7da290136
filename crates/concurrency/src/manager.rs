//! Transaction manager: two-phase commit with the last-agent optimization
//!
//! Owns the registry of in-flight transactions and drives completion over
//! their enlisted resources.
//!
//! ## Commit Sequence
//!
//! ```text
//! 1. Lazy timeout check; MarkedRollback → roll back, return Rollback
//! 2. before_completion() on every synchronization (failure → rollback)
//! 3. Snapshot participants and pick a path:
//!    - 0 resources: Committed, outcome record, done
//!    - 1 two-phase resource: commit(one_phase = true), no prepare
//!    - otherwise: full 2PC
//! 4. 2PC: prepare() each two-phase resource in enlistment order
//!    - Rollback vote or error → roll back everyone else, return Rollback
//!    - ReadOnly → excluded from phase two
//! 5. Last agent (if any): commit(one_phase = true)
//!    - failure → roll back the prepared resources, return Rollback
//!    - HeuristicMixed → roll back the prepared resources, return HeuristicMixed
//! 6. Append Committed record listing prepared resources (DECISION POINT)
//! 7. commit(one_phase = false) each prepared resource
//!    - failures stay pending in the log for recovery; surfaced as heuristics
//! 8. Append follow-up record with the resources still pending
//! 9. after_completion() on every synchronization
//! ```
//!
//! The transaction lock is never held across a resource call or a log append.

use crate::config::CoordinatorConfig;
use crate::stats::{StatsSnapshot, TransactionInfo, TransactionStats};
use crate::transaction::{Participant, Transaction};
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};
use txcoord_core::{
    Decision, HeuristicFailure, ResourceError, ResourceId, ResourceStatus, Status, TxError, TxId,
    TxResult, Vote,
};
use txcoord_durability::{LogRecord, MemoryTransactionLog, TransactionLog};

/// Coordinates transactions over enlisted resources
pub struct TransactionManager {
    config: CoordinatorConfig,
    log: Arc<dyn TransactionLog>,
    transactions: DashMap<TxId, Transaction>,
    active: AtomicUsize,
    stats: TransactionStats,
}

impl TransactionManager {
    /// Create a manager that records decisions in `log`
    pub fn new(config: CoordinatorConfig, log: Arc<dyn TransactionLog>) -> Self {
        TransactionManager {
            config,
            log,
            transactions: DashMap::new(),
            active: AtomicUsize::new(0),
            stats: TransactionStats::new(),
        }
    }

    /// Create a manager backed by an in-memory log
    pub fn in_memory(config: CoordinatorConfig) -> Self {
        Self::new(config, Arc::new(MemoryTransactionLog::new()))
    }

    /// Configuration in effect
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Decision log
    pub fn log(&self) -> &Arc<dyn TransactionLog> {
        &self.log
    }

    /// Begin a transaction with the default timeout
    pub fn begin(&self) -> TxResult<Transaction> {
        self.begin_with_timeout(None)
    }

    /// Begin a transaction
    ///
    /// `None` uses the configured default; `Some(Duration::ZERO)` means no timeout.
    ///
    /// # Errors
    /// `TxError::ResourceExhausted` if `max_active` transactions are in flight.
    pub fn begin_with_timeout(&self, timeout: Option<Duration>) -> TxResult<Transaction> {
        let limit = self.config.max_active;
        self.active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                if n < limit {
                    Some(n + 1)
                } else {
                    None
                }
            })
            .map_err(|_| TxError::ResourceExhausted { limit })?;

        let timeout = match timeout {
            Some(t) if t.is_zero() => None,
            Some(t) => Some(t),
            None => self.config.timeout(),
        };

        let tx = Transaction::new(timeout);
        self.transactions.insert(tx.id(), tx.clone());
        self.stats.record_begin();

        debug!(tx_id = %tx.id(), ?timeout, "Began transaction");
        Ok(tx)
    }

    /// Look up an in-flight transaction
    pub fn get_transaction(&self, tx_id: TxId) -> Option<Transaction> {
        self.transactions.get(&tx_id).map(|e| e.value().clone())
    }

    /// Number of in-flight transactions
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Counter snapshot
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Monitoring view of every in-flight transaction
    pub fn active_transactions(&self) -> Vec<TransactionInfo> {
        let mut infos: Vec<TransactionInfo> = self
            .snapshot_transactions()
            .into_iter()
            .map(|tx| TransactionInfo {
                tx_id: tx.id(),
                status: tx.status(),
                started_at: tx.started_at(),
                elapsed: tx.elapsed(),
                resource_names: tx
                    .resource_ids()
                    .into_iter()
                    .map(|id| id.as_str().to_string())
                    .collect(),
            })
            .collect();
        infos.sort_by_key(|i| i.started_at);
        infos
    }

    /// Administratively mark a transaction rollback-only
    ///
    /// # Errors
    /// `TxError::IllegalState` if `tx_id` is unknown or already past prepare.
    pub fn force_rollback(&self, tx_id: TxId) -> TxResult<()> {
        let tx = self.get_transaction(tx_id).ok_or_else(|| {
            TxError::illegal_state(format!("no active transaction with id {}", tx_id))
        })?;
        warn!(tx_id = %tx_id, "Forcing rollback");
        tx.mark_rollback_only("rollback forced by administrator".to_string())
    }

    /// Mark every expired `Active` transaction rollback-only
    ///
    /// Returns the number of transactions expired by this pass.
    pub fn reap_expired(&self) -> usize {
        let now = Instant::now();
        let mut reaped = 0;
        for tx in self.snapshot_transactions() {
            if tx.expire_if_due(now) {
                warn!(tx_id = %tx.id(), elapsed = ?tx.elapsed(), "Transaction timed out; marked rollback-only");
                self.stats.record_timeout();
                reaped += 1;
            }
        }
        reaped
    }

    fn snapshot_transactions(&self) -> Vec<Transaction> {
        self.transactions.iter().map(|e| e.value().clone()).collect()
    }

    // === Completion ===

    /// Commit a transaction
    ///
    /// # Errors
    /// - `TxError::Rollback` if the transaction rolled back instead
    /// - `TxError::HeuristicMixed` / `TxError::HeuristicRollback` if phase two
    ///   diverged from the commit decision
    /// - `TxError::IllegalState` if the transaction is not `Active` or
    ///   `MarkedRollback`, or another completion is already running
    pub fn commit(&self, tx: &Transaction) -> TxResult<()> {
        let tx_id = tx.id();

        if tx.expire_if_due(Instant::now()) {
            warn!(tx_id = %tx_id, "Transaction timed out before commit");
            self.stats.record_timeout();
        }

        let synchronizations = {
            let mut state = tx.lock();
            if state.completing {
                return Err(TxError::illegal_state(format!(
                    "transaction {} is already completing",
                    tx_id
                )));
            }
            let status = state.status;
            match status {
                Status::Active => {}
                Status::MarkedRollback => {
                    state.completing = true;
                    drop(state);
                    return Err(self.rollback_marked(tx));
                }
                other => {
                    return Err(TxError::illegal_state(format!(
                        "cannot commit transaction {} with status {}",
                        tx_id, other
                    )))
                }
            }
            state.completing = true;
            state.before_completion_order()
        };

        for sync in &synchronizations {
            if let Err(e) = sync.before_completion() {
                warn!(tx_id = %tx_id, error = %e, "before_completion failed; rolling back");
                let _ = tx.mark_rollback_only(format!("before_completion failed: {}", e));
                break;
            }
        }

        let participants = {
            let mut state = tx.lock();
            if state.status == Status::MarkedRollback {
                drop(state);
                return Err(self.rollback_marked(tx));
            }
            let participants = state.participants();
            state.status = match participants.as_slice() {
                [] => Status::Committing,
                [only] if only.two_phase => Status::Committing,
                _ => Status::Preparing,
            };
            participants
        };

        match participants.as_slice() {
            [] => {
                self.record_outcome(tx_id, Decision::Committed, Vec::new());
                self.finish(tx, Status::Committed);
                Ok(())
            }
            [only] if only.two_phase => self.commit_one_phase(tx, only),
            _ => self.commit_two_phase(tx, &participants),
        }
    }

    fn commit_one_phase(&self, tx: &Transaction, p: &Participant) -> TxResult<()> {
        let tx_id = tx.id();
        debug!(tx_id = %tx_id, resource = %p.id, "One-phase commit");

        match p.adapter.commit(tx_id, true) {
            Ok(()) | Err(ResourceError::HeuristicCommit) => {
                self.set_resource_status(tx, p, ResourceStatus::Committed);
                self.record_outcome(tx_id, Decision::Committed, Vec::new());
                self.finish(tx, Status::Committed);
                Ok(())
            }
            Err(ResourceError::HeuristicMixed) => {
                warn!(tx_id = %tx_id, resource = %p.id, "One-phase commit ended heuristic mixed");
                self.set_resource_status(tx, p, ResourceStatus::Failed);
                self.record_outcome(tx_id, Decision::Committed, Vec::new());
                self.stats.record_heuristic();
                self.finish(tx, Status::Committed);
                Err(TxError::HeuristicMixed {
                    tx_id,
                    failures: vec![HeuristicFailure::new(
                        p.id.clone(),
                        ResourceError::HeuristicMixed,
                    )],
                })
            }
            Err(e) => {
                debug!(tx_id = %tx_id, resource = %p.id, error = %e, "One-phase commit failed");
                self.set_resource_status(tx, p, ResourceStatus::Failed);
                self.record_outcome(tx_id, Decision::RolledBack, Vec::new());
                self.finish(tx, Status::RolledBack);
                Err(TxError::Rollback {
                    tx_id,
                    reason: format!("one-phase commit of {} failed", p.id),
                    cause: Some(e),
                })
            }
        }
    }

    fn commit_two_phase(&self, tx: &Transaction, participants: &[Participant]) -> TxResult<()> {
        let tx_id = tx.id();
        let last_agent = participants.iter().find(|p| !p.two_phase).cloned();
        let voters: Vec<&Participant> = participants.iter().filter(|p| p.two_phase).collect();
        let mut prepared: Vec<Participant> = Vec::new();

        // Phase one
        for (i, p) in voters.iter().enumerate() {
            if let Some(reason) = self.marked_reason(tx) {
                let targets = rollback_targets(&prepared, &voters[i..], last_agent.as_ref());
                return Err(self.abort(tx, &targets, reason, None));
            }

            debug!(tx_id = %tx_id, resource = %p.id, "Preparing");
            match p.adapter.prepare(tx_id) {
                Ok(Vote::Commit) => {
                    self.set_resource_status(tx, p, ResourceStatus::Prepared);
                    prepared.push((*p).clone());
                }
                Ok(Vote::ReadOnly) => {
                    debug!(tx_id = %tx_id, resource = %p.id, "Read-only vote");
                    self.set_resource_status(tx, p, ResourceStatus::Committed);
                }
                Ok(Vote::Rollback) => {
                    self.set_resource_status(tx, p, ResourceStatus::RolledBack);
                    let targets = rollback_targets(&prepared, &voters[i + 1..], last_agent.as_ref());
                    return Err(self.abort(
                        tx,
                        &targets,
                        format!("resource {} voted rollback", p.id),
                        None,
                    ));
                }
                Err(e) => {
                    self.set_resource_status(tx, p, ResourceStatus::Failed);
                    let targets = rollback_targets(&prepared, &voters[i..], last_agent.as_ref());
                    return Err(self.abort(
                        tx,
                        &targets,
                        format!("prepare of {} failed", p.id),
                        Some(e),
                    ));
                }
            }
        }

        // Check and advance under one lock so a late mark cannot be overwritten
        let marked = {
            let mut state = tx.lock();
            let reason = state.marked_reason();
            if reason.is_none() {
                state.status = Status::Prepared;
            }
            reason
        };
        if let Some(reason) = marked {
            let targets = rollback_targets(&prepared, &[], last_agent.as_ref());
            return Err(self.abort(tx, &targets, reason, None));
        }

        // Last agent completes after every vote and before the decision is logged
        let mut last_agent_committed = false;
        if let Some(la) = &last_agent {
            debug!(tx_id = %tx_id, resource = %la.id, "Committing last agent");
            match la.adapter.commit(tx_id, true) {
                Ok(()) | Err(ResourceError::HeuristicCommit) => {
                    self.set_resource_status(tx, la, ResourceStatus::Committed);
                    last_agent_committed = true;
                }
                Err(ResourceError::HeuristicMixed) => {
                    // Part of the last agent's work may be durable; never report a clean rollback
                    warn!(tx_id = %tx_id, resource = %la.id, "Last agent ended heuristic mixed; rolling back prepared resources");
                    self.set_resource_status(tx, la, ResourceStatus::Failed);
                    let mut failures = vec![HeuristicFailure::new(
                        la.id.clone(),
                        ResourceError::HeuristicMixed,
                    )];
                    failures.extend(self.roll_back_targets(tx, &prepared));
                    self.stats.record_heuristic();
                    return Err(TxError::HeuristicMixed { tx_id, failures });
                }
                Err(e) => {
                    self.set_resource_status(tx, la, ResourceStatus::Failed);
                    return Err(self.abort(
                        tx,
                        &prepared,
                        format!("last agent {} failed to commit", la.id),
                        Some(e),
                    ));
                }
            }
        }

        // Decision point
        let decision = LogRecord::new(
            tx_id,
            Decision::Committed,
            prepared.iter().map(|p| p.id.clone()).collect(),
        );
        if let Err(e) = self.log.append(&decision) {
            error!(tx_id = %tx_id, error = %e, "Failed to write commit decision; rolling back");
            return Err(self.abort_after_log_failure(tx, &prepared, last_agent.as_ref(), e));
        }

        if prepared.is_empty() {
            self.finish(tx, Status::Committed);
            return Ok(());
        }

        // Phase two
        tx.lock().status = Status::Committing;
        let mut failures = Vec::new();
        for p in &prepared {
            match p.adapter.commit(tx_id, false) {
                Ok(()) | Err(ResourceError::HeuristicCommit) => {
                    self.set_resource_status(tx, p, ResourceStatus::Committed);
                }
                Err(e) => {
                    warn!(tx_id = %tx_id, resource = %p.id, error = %e, "Phase-two commit failed; left for recovery");
                    self.set_resource_status(tx, p, ResourceStatus::Failed);
                    failures.push(HeuristicFailure::new(p.id.clone(), e));
                }
            }
        }

        let pending: Vec<ResourceId> = failures.iter().map(|f| f.resource.clone()).collect();
        if let Err(e) = self.log.append(&decision.with_pending(pending)) {
            // The decision record still lists every prepared resource; recovery re-drives them
            warn!(tx_id = %tx_id, error = %e, "Failed to record phase-two progress");
        }

        self.finish(tx, Status::Committed);

        if failures.is_empty() {
            return Ok(());
        }

        self.stats.record_heuristic();
        let any_committed = last_agent_committed || failures.len() < prepared.len();
        let any_mixed = failures
            .iter()
            .any(|f| f.error == ResourceError::HeuristicMixed);
        warn!(
            tx_id = %tx_id,
            failed = failures.len(),
            prepared = prepared.len(),
            "Commit completed with heuristic outcome"
        );
        if any_committed || any_mixed {
            Err(TxError::HeuristicMixed { tx_id, failures })
        } else {
            Err(TxError::HeuristicRollback { tx_id, failures })
        }
    }

    /// Roll back a transaction
    ///
    /// Every enlisted resource is told to roll back; individual failures are
    /// logged, left pending in the log, and do not change the outcome.
    ///
    /// # Errors
    /// `TxError::IllegalState` unless the transaction is `Active` or
    /// `MarkedRollback` and no other completion is running.
    pub fn rollback(&self, tx: &Transaction) -> TxResult<()> {
        {
            let mut state = tx.lock();
            if state.completing || !matches!(state.status, Status::Active | Status::MarkedRollback)
            {
                return Err(TxError::illegal_state(format!(
                    "cannot roll back transaction {} with status {}",
                    tx.id(),
                    state.status
                )));
            }
            state.completing = true;
        }
        self.rollback_all(tx);
        Ok(())
    }

    fn rollback_marked(&self, tx: &Transaction) -> TxError {
        let reason = tx
            .rollback_reason()
            .unwrap_or_else(|| "transaction marked rollback-only".to_string());
        self.rollback_all(tx);
        TxError::rollback(tx.id(), reason)
    }

    fn rollback_all(&self, tx: &Transaction) {
        let participants = {
            let mut state = tx.lock();
            state.status = Status::RollingBack;
            state.participants()
        };
        let failures = self.rollback_each(tx, &participants);
        self.record_outcome(
            tx.id(),
            Decision::RolledBack,
            failures.into_iter().map(|f| f.resource).collect(),
        );
        self.finish(tx, Status::RolledBack);
    }

    /// Abort during phase one: roll back `targets`, log, finish
    fn abort(
        &self,
        tx: &Transaction,
        targets: &[Participant],
        reason: String,
        cause: Option<ResourceError>,
    ) -> TxError {
        let tx_id = tx.id();
        debug!(tx_id = %tx_id, reason = %reason, "Aborting commit");
        self.roll_back_targets(tx, targets);

        TxError::Rollback {
            tx_id,
            reason,
            cause,
        }
    }

    fn abort_after_log_failure(
        &self,
        tx: &Transaction,
        prepared: &[Participant],
        last_agent: Option<&Participant>,
        log_error: txcoord_core::Error,
    ) -> TxError {
        let tx_id = tx.id();
        self.roll_back_targets(tx, prepared);

        match last_agent {
            Some(la) => {
                self.stats.record_heuristic();
                TxError::HeuristicMixed {
                    tx_id,
                    failures: vec![HeuristicFailure::new(
                        la.id.clone(),
                        ResourceError::HeuristicCommit,
                    )],
                }
            }
            None => TxError::Rollback {
                tx_id,
                reason: format!("failed to write commit decision: {}", log_error),
                cause: None,
            },
        }
    }

    /// Roll back `targets`, log the outcome, finish as `RolledBack`
    ///
    /// Returns the rollbacks that failed; they stay pending in the log.
    fn roll_back_targets(&self, tx: &Transaction, targets: &[Participant]) -> Vec<HeuristicFailure> {
        tx.lock().status = Status::RollingBack;
        let failures = self.rollback_each(tx, targets);
        self.record_outcome(
            tx.id(),
            Decision::RolledBack,
            failures.iter().map(|f| f.resource.clone()).collect(),
        );
        self.finish(tx, Status::RolledBack);
        failures
    }

    fn rollback_each(&self, tx: &Transaction, targets: &[Participant]) -> Vec<HeuristicFailure> {
        let tx_id = tx.id();
        let mut failures = Vec::new();
        for p in targets {
            match p.adapter.rollback(tx_id) {
                Ok(()) | Err(ResourceError::HeuristicRollback) => {
                    self.set_resource_status(tx, p, ResourceStatus::RolledBack);
                }
                Err(e) => {
                    warn!(tx_id = %tx_id, resource = %p.id, error = %e, "Rollback failed");
                    self.set_resource_status(tx, p, ResourceStatus::Failed);
                    failures.push(HeuristicFailure::new(p.id.clone(), e));
                }
            }
        }
        failures
    }

    fn marked_reason(&self, tx: &Transaction) -> Option<String> {
        tx.lock().marked_reason()
    }

    fn set_resource_status(&self, tx: &Transaction, p: &Participant, status: ResourceStatus) {
        tx.lock().set_resource_status(p.index, status);
    }

    /// Append an outcome record where losing it only costs recovery work
    fn record_outcome(&self, tx_id: TxId, decision: Decision, pending: Vec<ResourceId>) {
        if let Err(e) = self.log.append(&LogRecord::new(tx_id, decision, pending)) {
            error!(tx_id = %tx_id, decision = %decision, error = %e, "Failed to record outcome");
        }
    }

    /// Reach a terminal status, unregister, and notify synchronizations
    fn finish(&self, tx: &Transaction, status: Status) {
        let synchronizations = {
            let mut state = tx.lock();
            state.status = status;
            state.completing = false;
            state.take_after_completion_order()
        };

        if self.transactions.remove(&tx.id()).is_some() {
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.stats.record_end(status);
        }

        debug!(tx_id = %tx.id(), status = %status, "Transaction completed");

        for sync in synchronizations {
            if let Err(e) = sync.after_completion(status) {
                warn!(tx_id = %tx.id(), error = %e, "after_completion failed");
            }
        }
    }
}

fn rollback_targets(
    prepared: &[Participant],
    unvoted: &[&Participant],
    last_agent: Option<&Participant>,
) -> Vec<Participant> {
    prepared
        .iter()
        .cloned()
        .chain(unvoted.iter().map(|p| (*p).clone()))
        .chain(last_agent.cloned())
        .collect()
}
