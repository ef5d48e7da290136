//! Transaction object and enlistment bookkeeping
//!
//! A `Transaction` is a cheap, cloneable handle. All mutable state sits behind
//! one lock scoped to that transaction; there is no lock shared across
//! transactions. The coordinator releases the lock before calling into any
//! resource adapter, so a slow participant never blocks `status()`,
//! `set_rollback_only()` or the timeout reaper.
//!
//! Status transitions out of `Active` are made by the coordinator (commit,
//! rollback) or by `set_rollback_only` / the timeout reaper (to
//! `MarkedRollback`). No I/O happens in this module.

use crate::context::TaskId;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;
use txcoord_core::{
    ResourceId, ResourceStatus, Status, Synchronization, TransactionalResource, TxError, TxId,
    TxResult,
};

/// How a resource ends its association with the transaction
///
/// A delisted resource is still a participant: it is told the outcome at
/// completion like any other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelistFlag {
    /// The resource's work is done and waits for the outcome
    Success,
    /// The resource's work is abandoned; the transaction must roll back
    Fail,
}

/// One enlisted resource and its per-participant status
pub(crate) struct Enlisted {
    pub(crate) adapter: Arc<dyn TransactionalResource>,
    pub(crate) id: ResourceId,
    pub(crate) two_phase: bool,
    pub(crate) status: ResourceStatus,
    pub(crate) delisted: Option<DelistFlag>,
}

/// Snapshot of a participant taken when completion starts
#[derive(Clone)]
pub(crate) struct Participant {
    pub(crate) index: usize,
    pub(crate) adapter: Arc<dyn TransactionalResource>,
    pub(crate) id: ResourceId,
    pub(crate) two_phase: bool,
}

pub(crate) struct TransactionState {
    pub(crate) status: Status,
    pub(crate) resources: Vec<Enlisted>,
    pub(crate) synchronizations: Vec<Arc<dyn Synchronization>>,
    pub(crate) interposed: Vec<Arc<dyn Synchronization>>,
    pub(crate) timed_out: bool,
    pub(crate) rollback_reason: Option<String>,
    pub(crate) owner: Option<TaskId>,
    /// Set while commit or rollback is running; rejects a second completion
    pub(crate) completing: bool,
}

impl TransactionState {
    pub(crate) fn set_resource_status(&mut self, index: usize, status: ResourceStatus) {
        if let Some(r) = self.resources.get_mut(index) {
            r.status = status;
        }
    }

    pub(crate) fn participants(&self) -> Vec<Participant> {
        self.resources
            .iter()
            .enumerate()
            .map(|(index, r)| Participant {
                index,
                adapter: Arc::clone(&r.adapter),
                id: r.id.clone(),
                two_phase: r.two_phase,
            })
            .collect()
    }

    /// Callbacks in `before_completion` order: regular, then interposed
    pub(crate) fn before_completion_order(&self) -> Vec<Arc<dyn Synchronization>> {
        self.synchronizations
            .iter()
            .chain(self.interposed.iter())
            .cloned()
            .collect()
    }

    /// Drain callbacks in `after_completion` order: interposed, then regular
    pub(crate) fn take_after_completion_order(&mut self) -> Vec<Arc<dyn Synchronization>> {
        let mut order = std::mem::take(&mut self.interposed);
        order.append(&mut self.synchronizations);
        order
    }

    /// Reason to roll back, if the transaction is marked
    pub(crate) fn marked_reason(&self) -> Option<String> {
        if self.status != Status::MarkedRollback {
            return None;
        }
        Some(
            self.rollback_reason
                .clone()
                .unwrap_or_else(|| "transaction marked rollback-only".to_string()),
        )
    }

    fn mark_rollback(&mut self, reason: String) {
        self.status = Status::MarkedRollback;
        if self.rollback_reason.is_none() {
            self.rollback_reason = Some(reason);
        }
    }
}

struct TransactionInner {
    tx_id: TxId,
    started_at: DateTime<Utc>,
    start: Instant,
    timeout: Option<Duration>,
    state: Mutex<TransactionState>,
}

/// Handle to one transaction
///
/// Clones refer to the same transaction.
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<TransactionInner>,
}

fn same_adapter(a: &Arc<dyn TransactionalResource>, b: &Arc<dyn TransactionalResource>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const u8, Arc::as_ptr(b) as *const u8)
}

impl Transaction {
    pub(crate) fn new(timeout: Option<Duration>) -> Self {
        Transaction {
            inner: Arc::new(TransactionInner {
                tx_id: TxId::new(),
                started_at: Utc::now(),
                start: Instant::now(),
                timeout,
                state: Mutex::new(TransactionState {
                    status: Status::Active,
                    resources: Vec::new(),
                    synchronizations: Vec::new(),
                    interposed: Vec::new(),
                    timed_out: false,
                    rollback_reason: None,
                    owner: None,
                    completing: false,
                }),
            }),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, TransactionState> {
        self.inner.state.lock()
    }

    /// Transaction id
    pub fn id(&self) -> TxId {
        self.inner.tx_id
    }

    /// Current status
    pub fn status(&self) -> Status {
        self.lock().status
    }

    /// Wall-clock begin time
    pub fn started_at(&self) -> DateTime<Utc> {
        self.inner.started_at
    }

    /// Time since begin
    pub fn elapsed(&self) -> Duration {
        self.inner.start.elapsed()
    }

    /// Timeout this transaction was begun with, if any
    pub fn timeout(&self) -> Option<Duration> {
        self.inner.timeout
    }

    /// Time left before the timeout fires, if the transaction has one
    pub fn remaining(&self) -> Option<Duration> {
        self.inner
            .timeout
            .map(|t| t.saturating_sub(self.inner.start.elapsed()))
    }

    /// Check if the timeout reaper (or a lazy check at commit) expired this transaction
    pub fn is_timed_out(&self) -> bool {
        self.lock().timed_out
    }

    /// Why the transaction is or was headed for rollback
    pub fn rollback_reason(&self) -> Option<String> {
        self.lock().rollback_reason.clone()
    }

    /// Task the transaction is currently associated with
    pub fn owner(&self) -> Option<TaskId> {
        self.lock().owner
    }

    /// Check if two handles refer to the same transaction
    pub fn same_transaction(&self, other: &Transaction) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Ids of enlisted resources, in enlistment order
    pub fn resource_ids(&self) -> Vec<ResourceId> {
        self.lock().resources.iter().map(|r| r.id.clone()).collect()
    }

    /// Per-participant status of an enlisted resource
    pub fn resource_status(&self, id: &ResourceId) -> Option<ResourceStatus> {
        self.lock()
            .resources
            .iter()
            .find(|r| &r.id == id)
            .map(|r| r.status)
    }

    /// Number of enlisted resources, delisted ones included
    pub fn resource_count(&self) -> usize {
        self.lock().resources.len()
    }

    /// How `id` was delisted, if it was
    pub fn delist_flag(&self, id: &ResourceId) -> Option<DelistFlag> {
        self.lock()
            .resources
            .iter()
            .find(|r| &r.id == id)
            .and_then(|r| r.delisted)
    }

    /// Enlist a resource adapter
    ///
    /// Returns `Ok(false)` if the same adapter, or another adapter over the
    /// same resource, is already enlisted. Enlisting a resource delisted with
    /// `DelistFlag::Success` associates it again.
    ///
    /// # Errors
    /// - `TxError::IllegalState` if the transaction is not `Active`
    /// - `TxError::MultipleLastAgents` if `adapter` cannot prepare and a
    ///   last agent is already enlisted; the resource set is left unchanged
    pub fn enlist_resource(&self, adapter: Arc<dyn TransactionalResource>) -> TxResult<bool> {
        let id = adapter.resource_id();
        let two_phase = adapter.is_two_phase_capable();
        let mut state = self.lock();

        if state.status != Status::Active {
            return Err(TxError::IllegalState(format!(
                "cannot enlist {} in transaction {} with status {}",
                id, self.inner.tx_id, state.status
            )));
        }

        if let Some(existing) = state
            .resources
            .iter_mut()
            .find(|r| same_adapter(&r.adapter, &adapter) || r.adapter.is_same_resource(adapter.as_ref()))
        {
            if existing.delisted.take().is_some() {
                debug!(tx_id = %self.inner.tx_id, resource = %id, "Rejoined delisted resource");
            } else {
                debug!(tx_id = %self.inner.tx_id, resource = %id, "Resource already enlisted");
            }
            return Ok(false);
        }

        if !two_phase {
            if let Some(existing) = state.resources.iter().find(|r| !r.two_phase) {
                return Err(TxError::MultipleLastAgents {
                    tx_id: self.inner.tx_id,
                    existing: existing.id.clone(),
                    rejected: id,
                });
            }
        }

        debug!(tx_id = %self.inner.tx_id, resource = %id, two_phase, "Enlisted resource");
        state.resources.push(Enlisted {
            adapter,
            id,
            two_phase,
            status: ResourceStatus::Enlisted,
            delisted: None,
        });
        Ok(true)
    }

    /// End a resource's association before completion
    ///
    /// The resource stays a participant and receives the outcome. Returns
    /// `Ok(false)` if it is not enlisted or already delisted. `DelistFlag::Fail`
    /// also marks the transaction rollback-only.
    ///
    /// # Errors
    /// `TxError::IllegalState` unless the status is `Active` or `MarkedRollback`.
    pub fn delist_resource(
        &self,
        adapter: &Arc<dyn TransactionalResource>,
        flag: DelistFlag,
    ) -> TxResult<bool> {
        let mut state = self.lock();

        if !matches!(state.status, Status::Active | Status::MarkedRollback) || state.completing {
            return Err(TxError::IllegalState(format!(
                "cannot delist from transaction {} with status {}",
                self.inner.tx_id, state.status
            )));
        }

        let Some(entry) = state
            .resources
            .iter_mut()
            .find(|r| same_adapter(&r.adapter, adapter) || r.adapter.is_same_resource(adapter.as_ref()))
        else {
            return Ok(false);
        };
        if entry.delisted.is_some() {
            return Ok(false);
        }

        entry.delisted = Some(flag);
        let id = entry.id.clone();
        debug!(tx_id = %self.inner.tx_id, resource = %id, ?flag, "Delisted resource");

        if flag == DelistFlag::Fail {
            state.mark_rollback(format!("resource {} delisted with failure", id));
        }
        Ok(true)
    }

    /// Mark the transaction so that its only possible outcome is rollback
    ///
    /// Idempotent.
    ///
    /// # Errors
    /// `TxError::IllegalState` once the votes are in (`Prepared` or later).
    pub fn set_rollback_only(&self) -> TxResult<()> {
        self.mark_rollback_only("transaction marked rollback-only".to_string())
    }

    pub(crate) fn mark_rollback_only(&self, reason: String) -> TxResult<()> {
        let mut state = self.lock();
        match state.status {
            Status::Active | Status::Preparing => {
                debug!(tx_id = %self.inner.tx_id, reason = %reason, "Marked rollback-only");
                state.mark_rollback(reason);
                Ok(())
            }
            Status::MarkedRollback => Ok(()),
            other => Err(TxError::IllegalState(format!(
                "cannot mark transaction {} rollback-only with status {}",
                self.inner.tx_id, other
            ))),
        }
    }

    /// Register a completion callback
    ///
    /// # Errors
    /// `TxError::IllegalState` unless the transaction is `Active` and not completing.
    pub fn register_synchronization(&self, sync: Arc<dyn Synchronization>) -> TxResult<()> {
        self.lock_for_registration()?.synchronizations.push(sync);
        Ok(())
    }

    /// Register a callback that runs inside the regular ones
    ///
    /// Its `before_completion` runs after every regular synchronization's and
    /// its `after_completion` before any of theirs. Meant for infrastructure
    /// (caches, connection pools) that must see the application's last writes
    /// and settle before the application is told the outcome.
    ///
    /// # Errors
    /// `TxError::IllegalState` unless the transaction is `Active` and not completing.
    pub fn register_interposed_synchronization(
        &self,
        sync: Arc<dyn Synchronization>,
    ) -> TxResult<()> {
        self.lock_for_registration()?.interposed.push(sync);
        Ok(())
    }

    fn lock_for_registration(&self) -> TxResult<MutexGuard<'_, TransactionState>> {
        let state = self.lock();
        if state.status != Status::Active || state.completing {
            return Err(TxError::IllegalState(format!(
                "cannot register synchronization with transaction {} in status {}",
                self.inner.tx_id, state.status
            )));
        }
        Ok(state)
    }

    /// Mark an `Active` transaction rollback-only if its deadline has passed
    ///
    /// Returns true if this call expired it. Transactions past `Active` are
    /// never cancelled by timeout.
    pub(crate) fn expire_if_due(&self, now: Instant) -> bool {
        let Some(timeout) = self.inner.timeout else {
            return false;
        };
        if now.saturating_duration_since(self.inner.start) < timeout {
            return false;
        }

        let mut state = self.lock();
        if state.status != Status::Active || state.timed_out {
            return false;
        }
        state.timed_out = true;
        state.mark_rollback(format!("transaction timed out after {:?}", timeout));
        true
    }

    /// Associate with `task`; fails with the current owner if another task holds it
    pub(crate) fn claim(&self, task: TaskId) -> Result<(), TaskId> {
        let mut state = self.lock();
        match state.owner {
            Some(owner) if owner != task => Err(owner),
            _ => {
                state.owner = Some(task);
                Ok(())
            }
        }
    }

    /// Drop the association with `task`, if it holds one
    pub(crate) fn release(&self, task: TaskId) {
        let mut state = self.lock();
        if state.owner == Some(task) {
            state.owner = None;
        }
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("Transaction")
            .field("tx_id", &self.inner.tx_id)
            .field("status", &state.status)
            .field("resources", &state.resources.len())
            .field("owner", &state.owner)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use txcoord_core::{ResourceError, Vote};

    struct Stub {
        id: &'static str,
        two_phase: bool,
    }

    impl TransactionalResource for Stub {
        fn resource_id(&self) -> ResourceId {
            ResourceId::from(self.id)
        }
        fn prepare(&self, _tx_id: TxId) -> Result<Vote, ResourceError> {
            Ok(Vote::Commit)
        }
        fn commit(&self, _tx_id: TxId, _one_phase: bool) -> Result<(), ResourceError> {
            Ok(())
        }
        fn rollback(&self, _tx_id: TxId) -> Result<(), ResourceError> {
            Ok(())
        }
        fn is_two_phase_capable(&self) -> bool {
            self.two_phase
        }
    }

    fn stub(id: &'static str, two_phase: bool) -> Arc<dyn TransactionalResource> {
        Arc::new(Stub { id, two_phase })
    }

    #[test]
    fn test_new_transaction_is_active() {
        let tx = Transaction::new(None);
        assert_eq!(tx.status(), Status::Active);
        assert_eq!(tx.resource_count(), 0);
        assert!(!tx.is_timed_out());
        assert_eq!(tx.remaining(), None);
        assert!(!tx.id().is_nil());
    }

    #[test]
    fn test_enlist_same_adapter_twice_returns_false() {
        let tx = Transaction::new(None);
        let r = stub("db", true);
        assert!(tx.enlist_resource(Arc::clone(&r)).unwrap());
        assert!(!tx.enlist_resource(Arc::clone(&r)).unwrap());
        assert_eq!(tx.resource_count(), 1);
    }

    #[test]
    fn test_enlist_same_resource_different_adapter_returns_false() {
        let tx = Transaction::new(None);
        assert!(tx.enlist_resource(stub("db", true)).unwrap());
        assert!(!tx.enlist_resource(stub("db", true)).unwrap());
        assert!(tx.enlist_resource(stub("queue", true)).unwrap());
        assert_eq!(
            tx.resource_ids(),
            vec![ResourceId::from("db"), ResourceId::from("queue")]
        );
    }

    #[test]
    fn test_second_last_agent_rejected_without_mutation() {
        let tx = Transaction::new(None);
        tx.enlist_resource(stub("a", true)).unwrap();
        tx.enlist_resource(stub("legacy", false)).unwrap();

        let err = tx.enlist_resource(stub("other-legacy", false)).unwrap_err();
        match err {
            TxError::MultipleLastAgents { existing, rejected, .. } => {
                assert_eq!(existing, ResourceId::from("legacy"));
                assert_eq!(rejected, ResourceId::from("other-legacy"));
            }
            other => panic!("expected MultipleLastAgents, got {:?}", other),
        }
        assert_eq!(tx.resource_count(), 2);
    }

    #[test]
    fn test_enlist_requires_active() {
        let tx = Transaction::new(None);
        tx.set_rollback_only().unwrap();
        assert!(matches!(
            tx.enlist_resource(stub("a", true)),
            Err(TxError::IllegalState(_))
        ));
    }

    #[test]
    fn test_set_rollback_only_is_idempotent() {
        let tx = Transaction::new(None);
        tx.set_rollback_only().unwrap();
        tx.set_rollback_only().unwrap();
        assert_eq!(tx.status(), Status::MarkedRollback);
        assert!(tx.rollback_reason().unwrap().contains("rollback-only"));
    }

    #[test]
    fn test_set_rollback_only_rejected_after_prepare() {
        let tx = Transaction::new(None);
        tx.lock().status = Status::Prepared;
        assert!(matches!(
            tx.set_rollback_only(),
            Err(TxError::IllegalState(_))
        ));
        tx.lock().status = Status::Preparing;
        assert!(tx.set_rollback_only().is_ok());
    }

    #[test]
    fn test_delist_success_and_fail() {
        let tx = Transaction::new(None);
        let a = stub("a", true);
        let b = stub("b", true);
        tx.enlist_resource(Arc::clone(&a)).unwrap();
        tx.enlist_resource(Arc::clone(&b)).unwrap();

        assert!(tx.delist_resource(&a, DelistFlag::Success).unwrap());
        assert_eq!(tx.status(), Status::Active);
        assert!(!tx.delist_resource(&a, DelistFlag::Success).unwrap());
        assert_eq!(tx.delist_flag(&ResourceId::from("a")), Some(DelistFlag::Success));

        assert!(tx.delist_resource(&b, DelistFlag::Fail).unwrap());
        assert_eq!(tx.status(), Status::MarkedRollback);
        assert_eq!(tx.delist_flag(&ResourceId::from("b")), Some(DelistFlag::Fail));

        // Both stay participants so completion reaches them
        assert_eq!(tx.resource_count(), 2);
        assert_eq!(tx.lock().participants().len(), 2);
    }

    #[test]
    fn test_enlist_after_delist_rejoins() {
        let tx = Transaction::new(None);
        let a = stub("a", true);
        tx.enlist_resource(Arc::clone(&a)).unwrap();
        tx.delist_resource(&a, DelistFlag::Success).unwrap();

        assert!(!tx.enlist_resource(Arc::clone(&a)).unwrap());
        assert_eq!(tx.delist_flag(&ResourceId::from("a")), None);
        assert_eq!(tx.resource_count(), 1);
    }

    #[test]
    fn test_expire_if_due() {
        let tx = Transaction::new(Some(Duration::from_millis(5)));
        assert!(!tx.expire_if_due(tx.inner.start));
        let later = Instant::now() + Duration::from_millis(50);
        assert!(tx.expire_if_due(later));
        assert!(!tx.expire_if_due(later));
        assert!(tx.is_timed_out());
        assert_eq!(tx.status(), Status::MarkedRollback);
        assert!(tx.rollback_reason().unwrap().contains("timed out"));
    }

    #[test]
    fn test_timeout_ignored_once_preparing() {
        let tx = Transaction::new(Some(Duration::from_millis(1)));
        tx.lock().status = Status::Preparing;
        assert!(!tx.expire_if_due(Instant::now() + Duration::from_secs(1)));
        assert_eq!(tx.status(), Status::Preparing);
    }

    #[test]
    fn test_claim_and_release() {
        let tx = Transaction::new(None);
        let t1 = TaskId::next();
        let t2 = TaskId::next();
        assert!(tx.claim(t1).is_ok());
        assert!(tx.claim(t1).is_ok());
        assert_eq!(tx.claim(t2), Err(t1));
        tx.release(t2);
        assert_eq!(tx.owner(), Some(t1));
        tx.release(t1);
        assert_eq!(tx.owner(), None);
        assert!(tx.claim(t2).is_ok());
    }

    #[test]
    fn test_clones_share_state() {
        let tx = Transaction::new(None);
        let other = tx.clone();
        other.set_rollback_only().unwrap();
        assert_eq!(tx.status(), Status::MarkedRollback);
        assert!(tx.same_transaction(&other));
        assert!(!tx.same_transaction(&Transaction::new(None)));
    }
}
