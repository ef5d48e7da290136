//! Tier 3: restart over the same data directory

use crate::test_utils::*;
use tempfile::TempDir;

#[test]
fn restart_completes_commit_left_in_doubt() {
    let dir = TempDir::new().unwrap();
    let journal = CallJournal::new();
    let orders = resource("orders", &journal);
    let shipping = Arc::new(
        RecordingResource::new("shipping", &journal)
            .fail_commit(ResourceError::Unavailable("service restarting".into())),
    );

    let tx_id = {
        let service = TransactionService::open(dir.path(), adapters(&[&orders, &shipping])).unwrap();
        let mut ctx = service.context();
        let tx = ctx.begin().unwrap();
        tx.enlist_resource(orders.clone()).unwrap();
        tx.enlist_resource(shipping.clone()).unwrap();
        assert!(ctx.commit().unwrap_err().is_heuristic());
        tx.id()
    };

    shipping.set_commit_failure(None);

    let service = TransactionService::open(dir.path(), adapters(&[&orders, &shipping])).unwrap();
    assert_eq!(service.recovery_stats().resolved, 1);
    assert!(orders.is_committed(tx_id));
    assert!(shipping.is_committed(tx_id));
    assert_eq!(orders.commit_effects(), 1);
}

#[test]
fn restart_after_clean_run_redrives_nothing() {
    let dir = TempDir::new().unwrap();
    let journal = CallJournal::new();
    let a = resource("a", &journal);
    let b = resource("b", &journal);

    {
        let service = TransactionService::open(dir.path(), adapters(&[&a, &b])).unwrap();
        for _ in 0..3 {
            let mut ctx = service.context();
            let tx = ctx.begin().unwrap();
            tx.enlist_resource(a.clone()).unwrap();
            tx.enlist_resource(b.clone()).unwrap();
            ctx.commit().unwrap();
        }
        let mut ctx = service.context();
        let tx = ctx.begin().unwrap();
        tx.enlist_resource(a.clone()).unwrap();
        ctx.rollback().unwrap();
    }
    journal.clear();

    let service = TransactionService::open(dir.path(), adapters(&[&a, &b])).unwrap();
    let stats = service.recovery_stats();
    assert_eq!(stats.transactions, 4);
    assert_eq!(stats.redriven, 0);
    assert!(journal.entries().is_empty());
}
