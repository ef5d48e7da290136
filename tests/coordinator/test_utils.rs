//! Test utilities for the coordinator suite

pub use std::sync::Arc;
pub use txcoord::testing::{Call, CallJournal, RecordingResource};
pub use txcoord::{
    CoordinatorConfig, ResourceError, Status, TransactionContext, TransactionManager,
    TransactionService, TransactionalResource, TxError, Vote,
};

/// Manager over an in-memory log with test timings
pub fn create_manager() -> Arc<TransactionManager> {
    Arc::new(TransactionManager::in_memory(CoordinatorConfig::for_testing()))
}

/// Recording resource on `journal`
pub fn resource(id: &str, journal: &CallJournal) -> Arc<RecordingResource> {
    Arc::new(RecordingResource::new(id, journal))
}

/// Upcast for recovery registration
pub fn adapters(resources: &[&Arc<RecordingResource>]) -> Vec<Arc<dyn TransactionalResource>> {
    resources
        .iter()
        .map(|r| Arc::clone(*r) as Arc<dyn TransactionalResource>)
        .collect()
}

/// True if `id` saw only commits (at least one)
pub fn only_committed(journal: &CallJournal, id: &str) -> bool {
    let calls = journal.calls_for(id);
    calls.iter().any(|c| matches!(c, Call::Commit { .. }))
        && !calls.iter().any(|c| matches!(c, Call::Rollback))
}

/// True if `id` never saw a commit
pub fn never_committed(journal: &CallJournal, id: &str) -> bool {
    !journal
        .calls_for(id)
        .iter()
        .any(|c| matches!(c, Call::Commit { .. }))
}
