use aggregate_ledger::core::system_clock;
use aggregate_ledger::storage::CollectionSchema;
use aggregate_ledger::{
    AuditContext, AuditLedger, AuditOperation, AuditableRecord, AuditedStore, Clock, EntityCriteria,
    LedgerConfig, LedgerError, LifecycleManager, ManualClock, Predicate, RetentionPolicy,
    StoreSession,
};
use chrono::{Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct MedicalRecord {
    id: String,
    patient: String,
    diagnosis: String,
}

impl AuditableRecord for MedicalRecord {
    const ENTITY_TYPE: &'static str = "medical_record";
    const COLLECTION: &'static str = "medical_records";

    fn record_id(&self) -> String {
        self.id.clone()
    }
}

fn record(id: &str) -> MedicalRecord {
    MedicalRecord {
        id: id.to_string(),
        patient: "Jane Roe".to_string(),
        diagnosis: "sprain".to_string(),
    }
}

fn context() -> AuditContext {
    AuditContext::new("dr-1", "physician", "sess-9", "10.0.0.5", "ward-app/2.1", Utc::now())
}

async fn store() -> (AuditedStore<MedicalRecord>, ManualClock) {
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 10, 8, 0, 0).unwrap());
    let store = AuditedStore::open_with_clock(
        StoreSession::in_memory(),
        LedgerConfig::default(),
        Arc::new(clock.clone()),
    )
    .await
    .unwrap();
    (store, clock)
}

#[tokio::test]
async fn test_hard_delete_waits_out_retention() {
    let (store, clock) = store().await;
    let ctx = context();
    store.create(&record("e1"), &ctx).await.unwrap();

    let deleted = store
        .soft_delete("e1", &ctx, Some("cleanup".into()))
        .await
        .unwrap();
    assert!(deleted.is_deleted());
    assert_eq!(deleted.deletion.deletion_reason.as_deref(), Some("cleanup"));

    let err = store.hard_delete("e1", &ctx).await.unwrap_err();
    assert!(matches!(err, LedgerError::RetentionPolicy(_)));
    assert!(err.to_string().contains("blocked by data retention policy"));
    assert_eq!(
        store
            .find_all(&EntityCriteria::new().include_deleted(true))
            .await
            .unwrap()
            .len(),
        1
    );

    clock.advance(Duration::days(31));
    store.hard_delete("e1", &ctx).await.unwrap();

    assert!(
        store
            .find_all(&EntityCriteria::new().include_deleted(true))
            .await
            .unwrap()
            .is_empty()
    );
    let trail = store.audit_trail("e1", None).await.unwrap();
    let deletes: Vec<_> = trail
        .iter()
        .filter(|e| e.operation == AuditOperation::Delete)
        .collect();
    assert_eq!(deletes.len(), 2);
    assert!(deletes[0].new_values.is_none());
    assert_eq!(deletes[0].old_values.as_ref().unwrap()["diagnosis"], "sprain");
}

#[tokio::test]
async fn test_soft_delete_then_restore() {
    let (store, _clock) = store().await;
    let ctx = context();
    store.create(&record("e1"), &ctx).await.unwrap();

    store.soft_delete("e1", &ctx, None).await.unwrap();
    assert!(store.find_by_id("e1", &ctx).await.unwrap().is_none());

    let restored = store.restore("e1", &ctx).await.unwrap();
    assert!(!restored.is_deleted());
    assert_eq!(restored.deletion.deleted_at, None);
    assert_eq!(restored.deletion.deleted_by, None);
    assert_eq!(restored.entity, record("e1"));

    let summary = store.audit_summary("e1").await.unwrap();
    assert_eq!(summary.count(AuditOperation::Delete), 1);
    assert_eq!(summary.count(AuditOperation::Restore), 1);

    let trail = store.audit_trail("e1", Some(2)).await.unwrap();
    assert_eq!(trail[0].operation, AuditOperation::Restore);
    assert_eq!(trail[1].operation, AuditOperation::Delete);
}

#[tokio::test]
async fn test_restore_of_live_entity_is_rejected() {
    let (store, _clock) = store().await;
    let ctx = context();
    store.create(&record("e1"), &ctx).await.unwrap();

    let err = store.restore("e1", &ctx).await.unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)));
    assert!(err.message().contains("does not need restoration"));

    assert!(store.restore("missing", &ctx).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_retention_check() {
    let (store, clock) = store().await;
    let ctx = context();
    store.create(&record("e1"), &ctx).await.unwrap();

    assert!(store.validate_data_retention("absent").await.unwrap());
    assert!(!store.validate_data_retention("e1").await.unwrap());

    store.soft_delete("e1", &ctx, None).await.unwrap();
    clock.advance(Duration::days(29));
    assert!(!store.validate_data_retention("e1").await.unwrap());
    clock.advance(Duration::days(2));
    assert!(store.validate_data_retention("e1").await.unwrap());
}

#[tokio::test]
async fn test_hard_delete_of_absent_entity_is_not_found() {
    let (store, _clock) = store().await;
    let err = store.hard_delete("ghost", &context()).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_scheduled_purge_is_listed_once_due() {
    let (store, clock) = store().await;
    let ctx = context();
    store.create(&record("e1"), &ctx).await.unwrap();
    store.create(&record("e2"), &ctx).await.unwrap();
    store.soft_delete("e1", &ctx, None).await.unwrap();

    let purge_at = store.schedule_data_purge("e1", 40, &ctx).await.unwrap();
    assert_eq!(purge_at, clock.now() + Duration::days(40));
    assert!(store.purge_candidates(clock.now()).await.unwrap().is_empty());

    clock.advance(Duration::days(41));
    assert_eq!(
        store.purge_candidates(clock.now()).await.unwrap(),
        vec!["e1".to_string()]
    );
    // scheduling alone never deletes
    assert_eq!(
        store
            .find_all(&EntityCriteria::new().include_deleted(true))
            .await
            .unwrap()
            .len(),
        2
    );
}

#[tokio::test]
async fn test_incomplete_context_blocks_lifecycle_changes() {
    let (store, _clock) = store().await;
    store.create(&record("e1"), &context()).await.unwrap();

    let mut ctx = context();
    ctx.user_role = Some("".into());
    let err = store.soft_delete("e1", &ctx, None).await.unwrap_err();
    assert!(err.message().contains("user_role"));

    let live = store.find_all(&EntityCriteria::new()).await.unwrap();
    assert_eq!(live.len(), 1);
    assert_eq!(store.audit_trail("e1", None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_out_of_range_purge_delay_is_rejected() {
    let (store, _clock) = store().await;
    let ctx = context();
    store.create(&record("e1"), &ctx).await.unwrap();
    store.soft_delete("e1", &ctx, None).await.unwrap();

    let err = store
        .schedule_data_purge("e1", 1_000_000_000, &ctx)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)));
    assert!(err.message().contains("out of range"));

    let err = store.schedule_data_purge("e1", i64::MAX, &ctx).await.unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)));

    // nothing was stamped and no UPDATE entry was written
    let summary = store.audit_summary("e1").await.unwrap();
    assert_eq!(summary.count(AuditOperation::Update), 0);
}

#[tokio::test]
async fn test_failed_audit_write_aborts_the_lifecycle_change() {
    let session = StoreSession::in_memory();
    session
        .ensure_collection(CollectionSchema::new("medical_records", "id"))
        .await
        .unwrap();
    let original = json!({"id": "e1", "patient": "Jane Roe", "diagnosis": "sprain", "version": 1})
        .as_object()
        .cloned()
        .unwrap();
    session.upsert("medical_records", original.clone()).await.unwrap();

    // the audit collection is never created, so every audit insert fails
    let ledger = AuditLedger::new(LedgerConfig::default(), system_clock());
    let manager = LifecycleManager::new(
        "medical_record",
        "medical_records",
        "id",
        ledger,
        RetentionPolicy::default(),
        system_clock(),
    );

    let err = manager
        .soft_delete(&session, "e1", &context(), Some("cleanup".into()))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::AuditFailure(_)));
    assert!(err.message().contains("audit_log"));

    let err = manager
        .schedule_data_purge(&session, "e1", 10, &context())
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::AuditFailure(_)));

    let stored = session
        .select_one("medical_records", &Predicate::eq("id", "e1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored, original);
}
