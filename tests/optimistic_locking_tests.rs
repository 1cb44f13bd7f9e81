use aggregate_ledger::aggregate::{CONCURRENT_MODIFICATION, translate_conflict};
use aggregate_ledger::{
    AggregateRoot, AggregateStore, AuditContext, AuditOperation, ConcurrencyGuard, LedgerError,
};
use chrono::Utc;
use std::sync::Arc;

async fn store_at_version(version: i64) -> AggregateStore {
    let store = AggregateStore::in_memory().await.unwrap();
    store
        .save(&AggregateRoot::new("a1", "Test").with_version(version))
        .await
        .unwrap();
    store
}

#[tokio::test]
async fn test_second_reader_gets_version_mismatch() {
    let store = store_at_version(3).await;
    let observed_by_a = store.find("a1").await.unwrap().unwrap();
    let observed_by_b = store.find("a1").await.unwrap().unwrap();
    assert_eq!(observed_by_a.version, 3);
    assert_eq!(observed_by_b.version, 3);

    let mut edit_a = observed_by_a.clone();
    edit_a.name = "Edited by A".into();
    let saved = store
        .save_with_optimistic_locking(&edit_a, 3)
        .await
        .unwrap();
    assert_eq!(saved.version, 4);

    let mut edit_b = observed_by_b.clone();
    edit_b.name = "Edited by B".into();
    let err = store
        .save_with_optimistic_locking(&edit_b, 3)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        LedgerError::Conflict("Version mismatch: expected 3, found 4".into())
    );

    let stored = store.find("a1").await.unwrap().unwrap();
    assert_eq!(stored.version, 4);
    assert_eq!(stored.name, "Edited by A");
}

#[tokio::test]
async fn test_versions_climb_one_step_per_write() {
    let store = store_at_version(0).await;
    let mut aggregate = store.find("a1").await.unwrap().unwrap();
    for expected in 0..3 {
        aggregate = store
            .save_with_optimistic_locking(&aggregate, expected)
            .await
            .unwrap();
        assert_eq!(aggregate.version, expected + 1);
    }
}

#[tokio::test]
async fn test_locked_save_replaces_children_atomically() {
    let store = store_at_version(1).await;
    let updated = AggregateRoot::new("a1", "Test").with_child("c1").with_child("c2");
    store
        .save_with_optimistic_locking(&updated, 1)
        .await
        .unwrap();
    assert_eq!(store.find("a1").await.unwrap().unwrap().children.len(), 2);

    let stale = AggregateRoot::new("a1", "Test").with_child("c9");
    assert!(store.save_with_optimistic_locking(&stale, 1).await.is_err());
    let children = store.find("a1").await.unwrap().unwrap().children;
    let ids: Vec<&str> = children.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["c1", "c2"]);
}

#[tokio::test]
async fn test_missing_aggregate_is_not_found() {
    let store = AggregateStore::in_memory().await.unwrap();
    let err = store
        .save_with_optimistic_locking(&AggregateRoot::new("ghost", "Ghost"), 0)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_interleaved_transactions_lose_at_commit() {
    let store = store_at_version(3).await;
    let session = store.session().clone();
    let engine = session.engine();
    let guard = ConcurrencyGuard::new("aggregates", Arc::new(aggregate_ledger::SystemClock));

    let tx_a = session.with_transaction_id(engine.begin().await.unwrap());
    let tx_b = session.with_transaction_id(engine.begin().await.unwrap());
    let agg = AggregateRoot::new("a1", "Test");

    // both pass the read and the conditional write against their own view
    for tx in [&tx_a, &tx_b] {
        guard.check_version("a1", 3, tx).await.unwrap();
        guard.compare_and_swap(&agg, 3, tx).await.unwrap();
    }

    engine.commit(tx_a.transaction_id().unwrap()).await.unwrap();
    let err = engine
        .commit(tx_b.transaction_id().unwrap())
        .await
        .unwrap_err();
    assert!(err.is_write_conflict());
    assert_eq!(translate_conflict(err).message(), CONCURRENT_MODIFICATION);

    assert_eq!(store.find("a1").await.unwrap().unwrap().version, 4);
}

#[tokio::test]
async fn test_concurrent_writers_exactly_one_wins() {
    let store = store_at_version(3).await;
    let first = AggregateRoot::new("a1", "First");
    let second = AggregateRoot::new("a1", "Second");

    let (a, b) = tokio::join!(
        store.save_with_optimistic_locking(&first, 3),
        store.save_with_optimistic_locking(&second, 3)
    );

    let outcomes = [a, b];
    let winners = outcomes.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    for err in outcomes.iter().filter_map(|r| r.as_ref().err()) {
        assert!(err.is_conflict(), "unexpected error: {err}");
    }
    assert_eq!(store.find("a1").await.unwrap().unwrap().version, 4);
}

#[tokio::test]
async fn test_audited_locked_save_records_update() {
    let store = store_at_version(2).await;
    let ctx = AuditContext::new("u-7", "editor", "s-7", "10.1.1.1", "tests", Utc::now());

    let renamed = AggregateRoot::new("a1", "Renamed");
    store
        .save_with_optimistic_locking_audited(&renamed, 2, &ctx)
        .await
        .unwrap();
    let err = store
        .save_with_optimistic_locking_audited(&renamed, 2, &ctx)
        .await
        .unwrap_err();
    assert!(err.is_conflict());

    let trail = store
        .ledger()
        .trail(store.session(), "a1", None)
        .await
        .unwrap();
    assert_eq!(trail.len(), 1);
    assert_eq!(trail[0].operation, AuditOperation::Update);
    assert_eq!(trail[0].changed_fields, vec!["name"]);
}
