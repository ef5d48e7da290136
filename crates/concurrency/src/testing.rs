//! Instrumented participants for protocol tests
//!
//! Every instrumented resource, log, and synchronization writes to a shared
//! `CallJournal`. Entries carry a global sequence number, so ordering
//! properties ("the decision record is written before any commit") are
//! assertions over sequence numbers.
//!
//! # Example
//!
//! ```ignore
//! let journal = CallJournal::new();
//! let r1 = Arc::new(RecordingResource::new("r1", &journal));
//! let log = Arc::new(RecordingLog::new(&journal));
//! // ... run a commit ...
//! let logged = journal.first_seq("log", |c| matches!(c, Call::LogAppend { .. })).unwrap();
//! let committed = journal.first_seq("r1", |c| matches!(c, Call::Commit { .. })).unwrap();
//! assert!(logged < committed);
//! ```

use parking_lot::Mutex;
use std::collections::HashSet;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use txcoord_core::error::{Error, Result};
use txcoord_core::{
    Decision, ResourceError, ResourceId, Status, Synchronization, TransactionalResource, TxId,
    Vote,
};
use txcoord_durability::{LogRecord, MemoryTransactionLog, TransactionLog};

/// Journal source name used by `RecordingLog`
pub const LOG_SOURCE: &str = "log";

/// One observed call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    /// `TransactionalResource::prepare`
    Prepare,
    /// `TransactionalResource::commit`
    Commit {
        /// Whether prepare was skipped
        one_phase: bool,
    },
    /// `TransactionalResource::rollback`
    Rollback,
    /// Successful `TransactionLog::append`
    LogAppend {
        /// Logged decision
        decision: Decision,
        /// Logged pending list
        pending: Vec<ResourceId>,
    },
    /// `Synchronization::before_completion`
    BeforeCompletion,
    /// `Synchronization::after_completion`
    AfterCompletion(Status),
}

/// One journal line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    /// Global order of the call
    pub seq: u64,
    /// Who was called (resource id, `"log"`, or synchronization name)
    pub source: String,
    /// Transaction the call was for, when the callee is told
    pub tx_id: Option<TxId>,
    /// What was called
    pub call: Call,
}

/// Shared, ordered record of calls
#[derive(Debug, Clone, Default)]
pub struct CallJournal {
    entries: Arc<Mutex<Vec<JournalEntry>>>,
}

impl CallJournal {
    /// Create an empty journal
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a call and return its sequence number
    pub fn record(&self, source: &str, tx_id: Option<TxId>, call: Call) -> u64 {
        let mut entries = self.entries.lock();
        let seq = entries.len() as u64;
        entries.push(JournalEntry {
            seq,
            source: source.to_string(),
            tx_id,
            call,
        });
        seq
    }

    /// Every entry, in order
    pub fn entries(&self) -> Vec<JournalEntry> {
        self.entries.lock().clone()
    }

    /// Calls made to `source`, in order
    pub fn calls_for(&self, source: &str) -> Vec<Call> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.source == source)
            .map(|e| e.call.clone())
            .collect()
    }

    /// Sequence number of the first call to `source` matching `pred`
    pub fn first_seq(&self, source: &str, pred: impl Fn(&Call) -> bool) -> Option<u64> {
        self.entries
            .lock()
            .iter()
            .find(|e| e.source == source && pred(&e.call))
            .map(|e| e.seq)
    }

    /// Sequence number of the last call to `source` matching `pred`
    pub fn last_seq(&self, source: &str, pred: impl Fn(&Call) -> bool) -> Option<u64> {
        self.entries
            .lock()
            .iter()
            .rev()
            .find(|e| e.source == source && pred(&e.call))
            .map(|e| e.seq)
    }

    /// Number of calls to `source` matching `pred`
    pub fn count(&self, source: &str, pred: impl Fn(&Call) -> bool) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.source == source && pred(&e.call))
            .count()
    }

    /// Forget every entry
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

/// Scriptable resource that journals every call
///
/// Phase-two calls are idempotent per transaction: repeating `commit` for a
/// transaction it already committed is journaled but has no further effect,
/// which `commit_effects()` makes observable. A `Commit` vote keeps the
/// transaction in doubt until a phase-two call succeeds; `recover()` lists
/// those transactions and is not journaled.
pub struct RecordingResource {
    id: ResourceId,
    journal: CallJournal,
    two_phase: bool,
    vote: Mutex<std::result::Result<Vote, ResourceError>>,
    commit_failure: Mutex<Option<ResourceError>>,
    rollback_failure: Mutex<Option<ResourceError>>,
    committed: Mutex<HashSet<TxId>>,
    rolled_back: Mutex<HashSet<TxId>>,
    in_doubt: Mutex<HashSet<TxId>>,
    commit_effects: AtomicUsize,
    rollback_effects: AtomicUsize,
}

impl RecordingResource {
    /// A two-phase-capable resource that votes `Commit` and never fails
    pub fn new(id: &str, journal: &CallJournal) -> Self {
        RecordingResource {
            id: ResourceId::from(id),
            journal: journal.clone(),
            two_phase: true,
            vote: Mutex::new(Ok(Vote::Commit)),
            commit_failure: Mutex::new(None),
            rollback_failure: Mutex::new(None),
            committed: Mutex::new(HashSet::new()),
            rolled_back: Mutex::new(HashSet::new()),
            in_doubt: Mutex::new(HashSet::new()),
            commit_effects: AtomicUsize::new(0),
            rollback_effects: AtomicUsize::new(0),
        }
    }

    /// Make this resource unable to prepare (a last agent)
    pub fn last_agent(mut self) -> Self {
        self.two_phase = false;
        self
    }

    /// Vote `vote` on prepare
    pub fn vote(self, vote: Vote) -> Self {
        *self.vote.lock() = Ok(vote);
        self
    }

    /// Fail prepare with `error`
    pub fn fail_prepare(self, error: ResourceError) -> Self {
        *self.vote.lock() = Err(error);
        self
    }

    /// Fail commit with `error`
    pub fn fail_commit(self, error: ResourceError) -> Self {
        *self.commit_failure.lock() = Some(error);
        self
    }

    /// Fail rollback with `error`
    pub fn fail_rollback(self, error: ResourceError) -> Self {
        *self.rollback_failure.lock() = Some(error);
        self
    }

    /// Change commit behavior after construction
    pub fn set_commit_failure(&self, error: Option<ResourceError>) {
        *self.commit_failure.lock() = error;
    }

    /// Change rollback behavior after construction
    pub fn set_rollback_failure(&self, error: Option<ResourceError>) {
        *self.rollback_failure.lock() = error;
    }

    /// Number of distinct transactions this resource committed
    pub fn commit_effects(&self) -> usize {
        self.commit_effects.load(Ordering::SeqCst)
    }

    /// Number of distinct transactions this resource rolled back
    pub fn rollback_effects(&self) -> usize {
        self.rollback_effects.load(Ordering::SeqCst)
    }

    /// Check if `tx_id` was committed here
    pub fn is_committed(&self, tx_id: TxId) -> bool {
        self.committed.lock().contains(&tx_id)
    }

    /// Check if `tx_id` was rolled back here
    pub fn is_rolled_back(&self, tx_id: TxId) -> bool {
        self.rolled_back.lock().contains(&tx_id)
    }

    /// Check if `tx_id` is prepared here and waiting for the outcome
    pub fn is_in_doubt(&self, tx_id: TxId) -> bool {
        self.in_doubt.lock().contains(&tx_id)
    }

    fn source(&self) -> &str {
        self.id.as_str()
    }
}

impl TransactionalResource for RecordingResource {
    fn resource_id(&self) -> ResourceId {
        self.id.clone()
    }

    fn prepare(&self, tx_id: TxId) -> std::result::Result<Vote, ResourceError> {
        self.journal.record(self.source(), Some(tx_id), Call::Prepare);
        let vote = self.vote.lock().clone();
        if vote == Ok(Vote::Commit) {
            self.in_doubt.lock().insert(tx_id);
        }
        vote
    }

    fn commit(&self, tx_id: TxId, one_phase: bool) -> std::result::Result<(), ResourceError> {
        self.journal
            .record(self.source(), Some(tx_id), Call::Commit { one_phase });
        if let Some(error) = self.commit_failure.lock().clone() {
            return Err(error);
        }
        self.in_doubt.lock().remove(&tx_id);
        if self.committed.lock().insert(tx_id) {
            self.commit_effects.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn rollback(&self, tx_id: TxId) -> std::result::Result<(), ResourceError> {
        self.journal.record(self.source(), Some(tx_id), Call::Rollback);
        if let Some(error) = self.rollback_failure.lock().clone() {
            return Err(error);
        }
        self.in_doubt.lock().remove(&tx_id);
        if self.rolled_back.lock().insert(tx_id) {
            self.rollback_effects.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn recover(&self) -> std::result::Result<Vec<TxId>, ResourceError> {
        Ok(self.in_doubt.lock().iter().copied().collect())
    }

    fn is_two_phase_capable(&self) -> bool {
        self.two_phase
    }
}

/// In-memory log that journals successful appends and can be made to fail
pub struct RecordingLog {
    inner: MemoryTransactionLog,
    journal: CallJournal,
    fail_appends: AtomicBool,
}

impl RecordingLog {
    /// Create an empty log writing to `journal`
    pub fn new(journal: &CallJournal) -> Self {
        RecordingLog {
            inner: MemoryTransactionLog::new(),
            journal: journal.clone(),
            fail_appends: AtomicBool::new(false),
        }
    }

    /// Make every following append fail (or succeed again)
    pub fn set_fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }
}

impl TransactionLog for RecordingLog {
    fn append(&self, record: &LogRecord) -> Result<()> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(Error::IoError(io::Error::new(
                io::ErrorKind::Other,
                "injected append failure",
            )));
        }
        self.inner.append(record)?;
        self.journal.record(
            LOG_SOURCE,
            Some(record.tx_id),
            Call::LogAppend {
                decision: record.decision,
                pending: record.pending.clone(),
            },
        );
        Ok(())
    }

    fn read_all(&self) -> Result<Vec<LogRecord>> {
        self.inner.read_all()
    }

    fn rewrite(&self, records: &[LogRecord]) -> Result<()> {
        self.inner.rewrite(records)
    }

    fn is_durable(&self) -> bool {
        false
    }
}

/// Synchronization that journals both callbacks
pub struct RecordingSynchronization {
    name: String,
    journal: CallJournal,
    fail_before: Option<ResourceError>,
    completed: Mutex<Vec<Status>>,
}

impl RecordingSynchronization {
    /// Create a synchronization that always succeeds
    pub fn new(name: &str, journal: &CallJournal) -> Self {
        RecordingSynchronization {
            name: name.to_string(),
            journal: journal.clone(),
            fail_before: None,
            completed: Mutex::new(Vec::new()),
        }
    }

    /// Fail `before_completion` with `error`
    pub fn fail_before(mut self, error: ResourceError) -> Self {
        self.fail_before = Some(error);
        self
    }

    /// Statuses passed to `after_completion`, in order
    pub fn completed_with(&self) -> Vec<Status> {
        self.completed.lock().clone()
    }
}

impl Synchronization for RecordingSynchronization {
    fn before_completion(&self) -> std::result::Result<(), ResourceError> {
        self.journal.record(&self.name, None, Call::BeforeCompletion);
        match &self.fail_before {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn after_completion(&self, status: Status) -> std::result::Result<(), ResourceError> {
        self.journal
            .record(&self.name, None, Call::AfterCompletion(status));
        self.completed.lock().push(status);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_journal_sequence_numbers() {
        let journal = CallJournal::new();
        assert_eq!(journal.record("a", None, Call::Prepare), 0);
        assert_eq!(journal.record("b", None, Call::Rollback), 1);
        assert_eq!(journal.record("a", None, Call::Commit { one_phase: false }), 2);

        assert_eq!(
            journal.calls_for("a"),
            vec![Call::Prepare, Call::Commit { one_phase: false }]
        );
        assert_eq!(journal.first_seq("a", |c| matches!(c, Call::Commit { .. })), Some(2));
        assert_eq!(journal.last_seq("b", |_| true), Some(1));
        assert_eq!(journal.count("a", |_| true), 2);

        journal.clear();
        assert!(journal.entries().is_empty());
    }

    #[test]
    fn test_recording_resource_commit_is_idempotent() {
        let journal = CallJournal::new();
        let r = RecordingResource::new("r", &journal);
        let tx = TxId::new();

        r.commit(tx, false).unwrap();
        r.commit(tx, false).unwrap();
        assert_eq!(r.commit_effects(), 1);
        assert!(r.is_committed(tx));
        assert_eq!(journal.count("r", |c| matches!(c, Call::Commit { .. })), 2);
    }

    #[test]
    fn test_recording_log_failure_injection() {
        let journal = CallJournal::new();
        let log = RecordingLog::new(&journal);
        let record = LogRecord::resolved(TxId::new(), Decision::Committed);

        log.set_fail_appends(true);
        assert!(log.append(&record).is_err());
        assert!(journal.entries().is_empty());

        log.set_fail_appends(false);
        log.append(&record).unwrap();
        assert_eq!(log.read_all().unwrap(), vec![record]);
        assert_eq!(journal.count(LOG_SOURCE, |_| true), 1);
    }
}
