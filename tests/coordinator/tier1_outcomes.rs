//! Tier 1: all-or-nothing outcomes across resources

use crate::test_utils::*;

#[test]
fn transfer_commits_everywhere() {
    let mgr = create_manager();
    let journal = CallJournal::new();
    let debit = resource("debit", &journal);
    let credit = resource("credit", &journal);
    let audit = resource("audit", &journal);

    let mut ctx = TransactionContext::new(Arc::clone(&mgr));
    let tx = ctx.begin().unwrap();
    for r in [&debit, &credit, &audit] {
        tx.enlist_resource(r.clone()).unwrap();
    }
    ctx.commit().unwrap();

    for id in ["debit", "credit", "audit"] {
        assert!(only_committed(&journal, id), "{} not committed", id);
    }
}

#[test]
fn one_refusal_aborts_everywhere() {
    let mgr = create_manager();
    let journal = CallJournal::new();
    let debit = resource("debit", &journal);
    let credit = Arc::new(RecordingResource::new("credit", &journal).vote(Vote::Rollback));
    let audit = resource("audit", &journal);

    let mut ctx = TransactionContext::new(Arc::clone(&mgr));
    let tx = ctx.begin().unwrap();
    for r in [&debit, &credit, &audit] {
        tx.enlist_resource(r.clone()).unwrap();
    }
    let err = ctx.commit().unwrap_err();

    assert!(err.is_rollback());
    assert_eq!(err.tx_id(), Some(tx.id()));
    for id in ["debit", "credit", "audit"] {
        assert!(never_committed(&journal, id), "{} committed", id);
    }
}

#[test]
fn legacy_resource_joins_as_last_agent() {
    let mgr = create_manager();
    let journal = CallJournal::new();
    let xa = resource("xa", &journal);
    let legacy = Arc::new(RecordingResource::new("legacy", &journal).last_agent());

    let mut ctx = TransactionContext::new(Arc::clone(&mgr));
    let tx = ctx.begin().unwrap();
    tx.enlist_resource(xa.clone()).unwrap();
    tx.enlist_resource(legacy.clone()).unwrap();
    ctx.commit().unwrap();

    assert_eq!(journal.calls_for("legacy"), vec![Call::Commit { one_phase: true }]);
    assert!(only_committed(&journal, "xa"));
}

#[test]
fn same_resource_enlisted_twice_takes_part_once() {
    let mgr = create_manager();
    let journal = CallJournal::new();
    let db = resource("db", &journal);
    let other = resource("other", &journal);

    let tx = mgr.begin().unwrap();
    assert!(tx.enlist_resource(db.clone()).unwrap());
    assert!(!tx.enlist_resource(db.clone()).unwrap());
    // A second adapter over the same resource id is the same resource
    assert!(!tx.enlist_resource(resource("db", &journal)).unwrap());
    tx.enlist_resource(other.clone()).unwrap();
    assert_eq!(tx.resource_count(), 2);

    mgr.commit(&tx).unwrap();
    assert_eq!(journal.count("db", |c| matches!(c, Call::Prepare)), 1);
}

#[test]
fn commit_without_transaction_is_illegal() {
    let mgr = create_manager();
    let mut ctx = TransactionContext::new(mgr);

    assert!(matches!(ctx.commit(), Err(TxError::IllegalState(_))));
    assert!(matches!(ctx.rollback(), Err(TxError::IllegalState(_))));
    assert_eq!(ctx.status(), Status::NoTransaction);
}

#[test]
fn enlist_after_completion_is_illegal() {
    let mgr = create_manager();
    let journal = CallJournal::new();

    let tx = mgr.begin().unwrap();
    mgr.rollback(&tx).unwrap();
    assert!(matches!(
        tx.enlist_resource(resource("late", &journal)),
        Err(TxError::IllegalState(_))
    ));
}

#[test]
fn heuristic_outcome_is_reported_not_hidden() {
    let mgr = create_manager();
    let journal = CallJournal::new();
    let ok = resource("ok", &journal);
    let flaky = Arc::new(
        RecordingResource::new("flaky", &journal)
            .fail_commit(ResourceError::HeuristicRollback),
    );

    let tx = mgr.begin().unwrap();
    tx.enlist_resource(ok.clone()).unwrap();
    tx.enlist_resource(flaky.clone()).unwrap();
    let err = mgr.commit(&tx).unwrap_err();

    assert!(err.is_heuristic());
    assert!(ok.is_committed(tx.id()));
    assert_eq!(mgr.stats().heuristic, 1);
}
