use aggregate_ledger::{
    AggregateCriteria, AggregateRoot, AggregateStore, AuditContext, AuditOperation, ChildCollection,
    ChildEntity, LedgerConfig, LedgerError, ManualClock, StoreSession,
};
use chrono::{Duration, TimeZone, Utc};
use std::sync::Arc;

fn context() -> AuditContext {
    AuditContext::new("u-1", "editor", "sess-1", "192.168.1.10", "tests/1.0", Utc::now())
}

async fn two_collection_store() -> AggregateStore {
    let config = LedgerConfig::new().child_collections(vec![
        ChildCollection::new("line", "order_lines"),
        ChildCollection::new("shipment", "order_shipments"),
    ]);
    AggregateStore::open(StoreSession::in_memory(), config)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_save_then_find_round_trip() {
    let store = AggregateStore::in_memory().await.unwrap();

    store
        .save(&AggregateRoot::new("a1", "Test").with_version(0))
        .await
        .unwrap();

    let found = store.find("a1").await.unwrap().unwrap();
    assert_eq!(found.id, "a1");
    assert_eq!(found.name, "Test");
    assert!(found.children.is_empty());
    assert!(found.created_at.is_some());
}

#[tokio::test]
async fn test_too_many_children_leaves_store_untouched() {
    let store = AggregateStore::in_memory().await.unwrap();
    let aggregate = (1..=6).fold(AggregateRoot::new("a1", "Test"), |agg, i| {
        agg.with_child(format!("c{}", i))
    });

    let err = store.save(&aggregate).await.unwrap_err();
    assert_eq!(
        err,
        LedgerError::Validation("too many children (maximum 5 allowed)".into())
    );
    assert!(store.find("a1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_children_round_trip_across_collections() {
    let store = two_collection_store().await;
    let mut aggregate = AggregateRoot::new("ord-1", "Order").with_status("open");
    aggregate.push_child(
        ChildEntity::new("l1", "ord-1")
            .with_kind("line")
            .with_attribute("sku", "A-1"),
    );
    aggregate.push_child(ChildEntity::new("s1", "ord-1").with_kind("shipment"));
    aggregate.push_child(
        ChildEntity::new("l2", "ord-1")
            .with_kind("line")
            .with_attribute("sku", "B-2"),
    );

    store.save(&aggregate).await.unwrap();
    let found = store.find("ord-1").await.unwrap().unwrap();

    let ids: Vec<&str> = found.children.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["l1", "s1", "l2"]);
    assert_eq!(found.children[2].attributes["sku"], "B-2");
    assert!(found.children.iter().all(|c| c.parent_id == "ord-1"));
}

#[tokio::test]
async fn test_same_child_id_under_two_aggregates() {
    let store = AggregateStore::in_memory().await.unwrap();
    store
        .save(&AggregateRoot::new("a1", "First").with_child("c1"))
        .await
        .unwrap();
    store
        .save(&AggregateRoot::new("a2", "Second").with_child("c1"))
        .await
        .unwrap();

    store.delete("a1").await.unwrap();

    let survivor = store.find("a2").await.unwrap().unwrap();
    assert_eq!(survivor.children.len(), 1);
    assert_eq!(survivor.children[0].parent_id, "a2");
}

#[tokio::test]
async fn test_plain_save_is_last_writer_wins() {
    let store = AggregateStore::in_memory().await.unwrap();
    store
        .save(&AggregateRoot::new("a1", "Original").with_child("c1").with_child("c2"))
        .await
        .unwrap();
    store
        .save(&AggregateRoot::new("a1", "Overwritten").with_child("c3"))
        .await
        .unwrap();

    let found = store.find("a1").await.unwrap().unwrap();
    assert_eq!(found.name, "Overwritten");
    let ids: Vec<&str> = found.children.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["c3"]);
}

#[tokio::test]
async fn test_delete_removes_children_and_root() {
    let store = AggregateStore::in_memory().await.unwrap();
    store
        .save(&AggregateRoot::new("a1", "Test").with_child("c1"))
        .await
        .unwrap();

    assert!(store.delete("a1").await.unwrap());
    assert!(!store.exists("a1").await.unwrap());
    assert!(!store.delete("a1").await.unwrap());
}

#[tokio::test]
async fn test_find_many_filters_and_limits() {
    let store = AggregateStore::in_memory().await.unwrap();
    for (id, status) in [("a1", "open"), ("a2", "closed"), ("a3", "open"), ("a4", "open")] {
        store
            .save(&AggregateRoot::new(id, "Order").with_status(status).with_child("c1"))
            .await
            .unwrap();
    }

    let open = store
        .find_many(&AggregateCriteria::new().status("open"))
        .await
        .unwrap();
    assert_eq!(open.len(), 3);
    assert!(open.iter().all(|agg| agg.children.is_empty()));

    let picked = store
        .find_many(
            &AggregateCriteria::new()
                .ids(["a2", "a4"])
                .include_children(true),
        )
        .await
        .unwrap();
    let mut ids: Vec<&str> = picked.iter().map(|agg| agg.id.as_str()).collect();
    ids.sort();
    assert_eq!(ids, vec!["a2", "a4"]);
    assert!(picked.iter().all(|agg| agg.children.len() == 1));

    let limited = store
        .find_many(&AggregateCriteria::new().limit(2))
        .await
        .unwrap();
    assert_eq!(limited.len(), 2);
}

#[tokio::test]
async fn test_audited_save_and_delete_leave_a_trail() {
    let store = AggregateStore::in_memory().await.unwrap();
    let ctx = context();

    store
        .save_audited(&AggregateRoot::new("a1", "Draft"), &ctx)
        .await
        .unwrap();
    store
        .save_audited(&AggregateRoot::new("a1", "Final").with_child("c1"), &ctx)
        .await
        .unwrap();
    store.delete_audited("a1", &ctx).await.unwrap();

    let trail = store
        .ledger()
        .trail(store.session(), "a1", None)
        .await
        .unwrap();
    let ops: Vec<AuditOperation> = trail.iter().map(|e| e.operation).collect();
    assert_eq!(
        ops,
        vec![
            AuditOperation::Delete,
            AuditOperation::Update,
            AuditOperation::Create
        ]
    );
    assert_eq!(trail[1].changed_fields, vec!["children", "name"]);
    assert!(trail[0].new_values.is_none());
}

#[tokio::test]
async fn test_audited_save_with_incomplete_context_writes_nothing() {
    let store = AggregateStore::in_memory().await.unwrap();
    let mut ctx = context();
    ctx.user_agent = None;

    let err = store
        .save_audited(&AggregateRoot::new("a1", "Draft"), &ctx)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)));
    assert!(store.find("a1").await.unwrap().is_none());
    assert!(
        store
            .ledger()
            .trail(store.session(), "a1", None)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_unchanged_children_are_not_reported_as_changed() {
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 5, 4, 12, 0, 0).unwrap());
    let store = AggregateStore::open_with_clock(
        StoreSession::in_memory(),
        LedgerConfig::default(),
        Arc::new(clock.clone()),
    )
    .await
    .unwrap();
    let ctx = context();

    store
        .save_audited(&AggregateRoot::new("a1", "One").with_child("c1"), &ctx)
        .await
        .unwrap();
    clock.advance(Duration::seconds(1));
    store
        .save_audited(&AggregateRoot::new("a1", "Two").with_child("c1"), &ctx)
        .await
        .unwrap();

    let trail = store
        .ledger()
        .trail(store.session(), "a1", Some(1))
        .await
        .unwrap();
    assert_eq!(trail[0].operation, AuditOperation::Update);
    assert_eq!(trail[0].changed_fields, vec!["name"]);
}
