//! Per-task transaction context
//!
//! Replaces a thread-local "current transaction" with an explicit value that
//! the caller owns and passes around. Each context has its own `TaskId`; a
//! transaction is associated with at most one task at a time, which is what
//! `resume` enforces.

use crate::manager::TransactionManager;
use crate::transaction::Transaction;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use txcoord_core::{Status, TxError, TxId, TxResult};

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a logical unit of work that can own a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    /// Allocate a fresh task id
    pub fn next() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Numeric value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// The transaction-context interface handed to application code
///
/// # Example
///
/// ```ignore
/// let mut ctx = TransactionContext::new(Arc::clone(&manager));
/// let tx = ctx.begin()?;
/// tx.enlist_resource(orders_db)?;
/// tx.enlist_resource(billing_queue)?;
/// ctx.commit()?;
/// ```
pub struct TransactionContext {
    manager: Arc<TransactionManager>,
    task: TaskId,
    current: Option<Transaction>,
    timeout: Option<Duration>,
}

impl TransactionContext {
    /// Create a context for a new task
    pub fn new(manager: Arc<TransactionManager>) -> Self {
        TransactionContext {
            manager,
            task: TaskId::next(),
            current: None,
            timeout: None,
        }
    }

    /// This context's task id
    pub fn task_id(&self) -> TaskId {
        self.task
    }

    /// Coordinator this context talks to
    pub fn manager(&self) -> &Arc<TransactionManager> {
        &self.manager
    }

    /// Begin a transaction and associate it with this task
    ///
    /// # Errors
    /// - `TxError::NotSupported` if this task already holds an unfinished
    ///   transaction (no nesting)
    /// - `TxError::ResourceExhausted` if the coordinator is at its limit
    pub fn begin(&mut self) -> TxResult<Transaction> {
        if let Some(current) = &self.current {
            if !current.status().is_terminal() {
                return Err(TxError::NotSupported(format!(
                    "nested transactions are not supported; task {:?} already holds {}",
                    self.task,
                    current.id()
                )));
            }
        }

        let tx = match self.timeout {
            Some(timeout) => self.manager.begin_with_timeout(Some(timeout))?,
            None => self.manager.begin()?,
        };
        tx.claim(self.task).map_err(|owner| {
            TxError::system(format!("fresh transaction {} already owned by {:?}", tx.id(), owner))
        })?;
        self.current = Some(tx.clone());
        Ok(tx)
    }

    fn take_owned(&mut self, action: &str) -> TxResult<Transaction> {
        let tx = self.current.take().ok_or_else(|| {
            TxError::illegal_state(format!("{} called with no transaction associated", action))
        })?;

        if tx.owner() != Some(self.task) {
            let id = tx.id();
            self.current = Some(tx);
            return Err(TxError::illegal_state(format!(
                "{} of transaction {} from a task that does not own it",
                action, id
            )));
        }

        tx.release(self.task);
        Ok(tx)
    }

    /// Commit the associated transaction
    ///
    /// The association ends whatever the outcome.
    pub fn commit(&mut self) -> TxResult<()> {
        let tx = self.take_owned("commit")?;
        self.manager.commit(&tx)
    }

    /// Roll back the associated transaction
    ///
    /// The association ends whatever the outcome.
    pub fn rollback(&mut self) -> TxResult<()> {
        let tx = self.take_owned("rollback")?;
        self.manager.rollback(&tx)
    }

    /// Mark the associated transaction rollback-only
    pub fn set_rollback_only(&self) -> TxResult<()> {
        match &self.current {
            Some(tx) => tx.set_rollback_only(),
            None => Err(TxError::illegal_state(
                "set_rollback_only called with no transaction associated",
            )),
        }
    }

    /// Status of the associated transaction, `NoTransaction` if none
    pub fn status(&self) -> Status {
        self.current
            .as_ref()
            .map(|tx| tx.status())
            .unwrap_or(Status::NoTransaction)
    }

    /// The associated transaction, if any
    pub fn transaction(&self) -> Option<&Transaction> {
        self.current.as_ref()
    }

    /// Id of the associated transaction, if any
    pub fn transaction_id(&self) -> Option<TxId> {
        self.current.as_ref().map(|tx| tx.id())
    }

    /// Detach the associated transaction and hand it back
    pub fn suspend(&mut self) -> Option<Transaction> {
        let tx = self.current.take()?;
        tx.release(self.task);
        debug!(tx_id = %tx.id(), task = self.task.as_u64(), "Suspended transaction");
        Some(tx)
    }

    /// Associate a previously suspended transaction with this task
    ///
    /// # Errors
    /// - `TxError::IllegalState` if this task already holds an unfinished transaction
    /// - `TxError::InvalidTransaction` if `tx` is terminal or owned by another task
    pub fn resume(&mut self, tx: Transaction) -> TxResult<()> {
        if let Some(current) = &self.current {
            if !current.status().is_terminal() {
                return Err(TxError::illegal_state(format!(
                    "task {:?} already holds transaction {}",
                    self.task,
                    current.id()
                )));
            }
        }

        let status = tx.status();
        if status.is_terminal() {
            return Err(TxError::InvalidTransaction(format!(
                "transaction {} is {}",
                tx.id(),
                status
            )));
        }

        tx.claim(self.task).map_err(|owner| {
            TxError::InvalidTransaction(format!(
                "transaction {} is associated with task {:?}",
                tx.id(),
                owner
            ))
        })?;

        debug!(tx_id = %tx.id(), task = self.task.as_u64(), "Resumed transaction");
        self.current = Some(tx);
        Ok(())
    }

    /// Use `timeout` for transactions this task begins from now on
    ///
    /// `Duration::ZERO` means no timeout.
    pub fn set_transaction_timeout(&mut self, timeout: Duration) {
        self.timeout = Some(timeout);
    }

    /// Go back to the coordinator's default timeout
    pub fn clear_transaction_timeout(&mut self) {
        self.timeout = None;
    }
}

impl Drop for TransactionContext {
    fn drop(&mut self) {
        if let Some(tx) = self.current.take() {
            tx.release(self.task);
        }
    }
}
