//! Tier 2: task association, suspend and resume

use crate::test_utils::*;
use std::time::Duration;

#[test]
fn suspend_then_begin_new_work() {
    let mgr = create_manager();
    let journal = CallJournal::new();
    let outer_db = resource("outer", &journal);
    let inner_db = resource("inner", &journal);

    let mut ctx = TransactionContext::new(Arc::clone(&mgr));
    let outer = ctx.begin().unwrap();
    outer.enlist_resource(outer_db.clone()).unwrap();

    // Run independent work while the outer transaction is parked
    let parked = ctx.suspend().unwrap();
    assert_eq!(ctx.status(), Status::NoTransaction);
    let inner = ctx.begin().unwrap();
    inner.enlist_resource(inner_db.clone()).unwrap();
    ctx.commit().unwrap();

    ctx.resume(parked).unwrap();
    assert_eq!(ctx.transaction_id(), Some(outer.id()));
    ctx.rollback().unwrap();

    assert!(inner_db.is_committed(inner.id()));
    assert!(outer_db.is_rolled_back(outer.id()));
}

#[test]
fn nested_begin_is_not_supported() {
    let mgr = create_manager();
    let mut ctx = TransactionContext::new(mgr);
    ctx.begin().unwrap();

    assert!(matches!(ctx.begin(), Err(TxError::NotSupported(_))));
}

#[test]
fn resume_of_owned_transaction_is_rejected() {
    let mgr = create_manager();
    let mut owner = TransactionContext::new(Arc::clone(&mgr));
    let mut thief = TransactionContext::new(Arc::clone(&mgr));

    let tx = owner.begin().unwrap();
    assert!(matches!(
        thief.resume(tx.clone()),
        Err(TxError::InvalidTransaction(_))
    ));

    owner.commit().unwrap();
    assert!(matches!(thief.resume(tx), Err(TxError::InvalidTransaction(_))));
}

#[test]
fn resume_while_holding_is_illegal() {
    let mgr = create_manager();
    let mut a = TransactionContext::new(Arc::clone(&mgr));
    let mut b = TransactionContext::new(Arc::clone(&mgr));

    a.begin().unwrap();
    let parked = a.suspend().unwrap();
    b.begin().unwrap();

    assert!(matches!(b.resume(parked), Err(TxError::IllegalState(_))));
}

#[test]
fn dropped_context_releases_its_transaction() {
    let mgr = create_manager();
    let tx = {
        let mut ctx = TransactionContext::new(Arc::clone(&mgr));
        ctx.begin().unwrap()
    };
    assert_eq!(tx.owner(), None);

    let mut rescuer = TransactionContext::new(Arc::clone(&mgr));
    rescuer.resume(tx).unwrap();
    rescuer.rollback().unwrap();
    assert_eq!(mgr.active_count(), 0);
}

#[test]
fn per_task_timeout_applies_to_new_transactions() {
    let mgr = create_manager();
    let mut ctx = TransactionContext::new(Arc::clone(&mgr));

    ctx.set_transaction_timeout(Duration::from_secs(30));
    let timed = ctx.begin().unwrap();
    assert_eq!(timed.timeout(), Some(Duration::from_secs(30)));
    ctx.rollback().unwrap();

    ctx.clear_transaction_timeout();
    let untimed = ctx.begin().unwrap();
    assert_eq!(untimed.timeout(), None);
    ctx.rollback().unwrap();
}
