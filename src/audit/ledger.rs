use super::context::AuditContext;
use super::diff::changed_fields;
use super::entry::{AuditEntry, AuditOperation};
use super::query::{AuditQuery, AuditSummary, SuspiciousActivity};
use crate::config::{LedgerConfig, ReadAuditMode};
use crate::core::{LedgerError, Result, Row, SharedClock, stored_precision};
use crate::storage::{CollectionSchema, OrderBy, Predicate, SelectOptions, StoreSession};
use log::{debug, error};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use uuid::Uuid;

static NEXT_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_sequence() -> u64 {
    NEXT_SEQUENCE.fetch_add(1, AtomicOrdering::Relaxed)
}

/// Moves the counter past sequences already stored by an earlier process.
fn advance_sequence_past(stored: u64) {
    NEXT_SEQUENCE.fetch_max(stored.saturating_add(1), AtomicOrdering::Relaxed);
}

/// The operation being recorded and the entity snapshots around it.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditChange {
    pub operation: AuditOperation,
    pub old_values: Option<Row>,
    pub new_values: Option<Row>,
}

impl AuditChange {
    pub fn new(operation: AuditOperation, old_values: Option<Row>, new_values: Option<Row>) -> Self {
        Self {
            operation,
            old_values,
            new_values,
        }
    }

    pub fn create(new_values: Row) -> Self {
        Self::new(AuditOperation::Create, None, Some(new_values))
    }

    pub fn update(old_values: Row, new_values: Row) -> Self {
        Self::new(AuditOperation::Update, Some(old_values), Some(new_values))
    }

    pub fn delete(old_values: Row, new_values: Option<Row>) -> Self {
        Self::new(AuditOperation::Delete, Some(old_values), new_values)
    }

    pub fn restore(old_values: Row, new_values: Row) -> Self {
        Self::new(AuditOperation::Restore, Some(old_values), Some(new_values))
    }

    pub fn read() -> Self {
        Self::new(AuditOperation::Read, None, None)
    }
}

/// Append-only audit trail.
///
/// Entries are written through the caller's session, so an entry commits or
/// rolls back together with the change it describes. Nothing here updates or
/// deletes an audit row.
#[derive(Debug, Clone)]
pub struct AuditLedger {
    config: LedgerConfig,
    clock: SharedClock,
}

impl AuditLedger {
    pub fn new(config: LedgerConfig, clock: SharedClock) -> Self {
        Self { config, clock }
    }

    pub fn should_audit_reads(&self) -> bool {
        self.config.read_audit == ReadAuditMode::Always
    }

    pub fn collection_for(&self, entity_type: &str) -> &str {
        self.config.audit_collection_for(entity_type)
    }

    /// Creates missing audit collections and resumes the tie-break sequence
    /// after the highest one already stored.
    pub async fn ensure_schema(&self, session: &StoreSession) -> Result<()> {
        let latest = SelectOptions::new().order_by(OrderBy::desc("sequence")).limit(1);
        for name in self.config.audit_collection_names() {
            session
                .ensure_collection(CollectionSchema::new(name.as_str(), "audit_id"))
                .await?;
            let stored = session.select(&name, &Predicate::All, &latest).await?;
            if let Some(sequence) = stored
                .first()
                .and_then(|row| row.get("sequence"))
                .and_then(|value| value.as_u64()) {
                advance_sequence_past(sequence);
            }
        }
        Ok(())
    }

    /// Validates the context and appends one entry.
    pub async fn record(
        &self,
        session: &StoreSession,
        entity_type: &str,
        entity_id: &str,
        context: &AuditContext,
        change: AuditChange,
    ) -> Result<AuditEntry> {
        context.validate()?;

        let entry = AuditEntry {
            audit_id: Uuid::new_v4().to_string(),
            entity_id: entity_id.to_string(),
            entity_type: entity_type.to_string(),
            operation: change.operation,
            changed_fields: changed_fields(change.old_values.as_ref(), change.new_values.as_ref()),
            old_values: change.old_values,
            new_values: change.new_values,
            context: context.clone(),
            created_at: stored_precision(self.clock.now()),
            is_system_operation: context.is_system(),
            sequence: next_sequence(),
        };

        let collection = self.collection_for(entity_type);
        session
            .insert(collection, entry.to_row())
            .await
            .map_err(|err| {
                error!(
                    "audit write for {} '{}' failed: {}",
                    entity_type, entity_id, err
                );
                LedgerError::AuditFailure(format!(
                    "could not record {} of {} '{}': {}",
                    entry.operation,
                    entity_type,
                    entity_id,
                    err.message()
                ))
            })?;

        debug!(
            "audit {} {} '{}' by {}",
            entry.operation,
            entity_type,
            entity_id,
            context.user()
        );
        Ok(entry)
    }

    /// Entries for one entity across every audit collection, newest first.
    pub async fn trail(
        &self,
        session: &StoreSession,
        entity_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<AuditEntry>> {
        let query = AuditQuery {
            entity_id: Some(entity_id.to_string()),
            limit,
            ..AuditQuery::default()
        };
        self.query(session, &query).await
    }

    pub async fn summary(&self, session: &StoreSession, entity_id: &str) -> Result<AuditSummary> {
        let entries = self.trail(session, entity_id, None).await?;
        Ok(AuditSummary::from_entries(&entries))
    }

    /// Filtered entries, newest first.
    pub async fn query(&self, session: &StoreSession, query: &AuditQuery) -> Result<Vec<AuditEntry>> {
        let predicate = query.predicate(self.clock.now(), self.config.rapid_window());
        let options = SelectOptions::new()
            .order_by(OrderBy::desc("created_at"))
            .order_by(OrderBy::desc("sequence"))
            .maybe_limit(query.limit);

        let collections = match &query.entity_type {
            Some(entity_type) => vec![self.collection_for(entity_type).to_string()],
            None => self.config.audit_collection_names(),
        };

        let mut entries = Vec::new();
        for collection in &collections {
            for row in session.select(collection, &predicate, &options).await? {
                entries.push(AuditEntry::from_row(&row, collection)?);
            }
        }
        entries.sort_by(newest_first);
        if let Some(limit) = query.limit {
            entries.truncate(limit);
        }
        Ok(entries)
    }

    /// Reports `user_id` when it has at least `threshold` entries inside the
    /// rapid-operations window.
    pub async fn suspicious_activity(
        &self,
        session: &StoreSession,
        user_id: &str,
        threshold: usize,
    ) -> Result<Option<SuspiciousActivity>> {
        let query = AuditQuery::new().user_id(user_id).rapid_operations();
        let entries = self.query(session, &query).await?;
        if threshold == 0 || entries.len() < threshold {
            return Ok(None);
        }

        let entity_ids: BTreeSet<String> = entries.iter().map(|e| e.entity_id.clone()).collect();
        let (Some(first_seen), Some(last_seen)) = (
            entries.iter().map(|e| e.created_at).min(),
            entries.iter().map(|e| e.created_at).max(),
        ) else {
            return Ok(None);
        };
        Ok(Some(SuspiciousActivity {
            user_id: user_id.to_string(),
            operation_count: entries.len(),
            window: self.config.rapid_window(),
            first_seen,
            last_seen,
            entity_ids: entity_ids.into_iter().collect(),
        }))
    }
}

fn newest_first(left: &AuditEntry, right: &AuditEntry) -> Ordering {
    right
        .created_at
        .cmp(&left.created_at)
        .then_with(|| right.sequence.cmp(&left.sequence))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ManualClock;
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;
    use std::sync::Arc;

    fn row(value: serde_json::Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    async fn ledger() -> (AuditLedger, StoreSession, ManualClock) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 2, 1, 9, 0, 0).unwrap());
        let ledger = AuditLedger::new(LedgerConfig::default(), Arc::new(clock.clone()));
        let session = StoreSession::in_memory();
        ledger.ensure_schema(&session).await.unwrap();
        (ledger, session, clock)
    }

    fn context(user: &str) -> AuditContext {
        AuditContext::new(user, "clerk", "s-1", "10.0.0.1", "agent", Utc::now())
    }

    #[tokio::test]
    async fn trail_is_newest_first_even_within_one_instant() {
        let (ledger, session, _clock) = ledger().await;
        let ctx = context("u-1");
        ledger
            .record(&session, "doc", "d-1", &ctx, AuditChange::create(row(json!({"t": 1}))))
            .await
            .unwrap();
        ledger
            .record(
                &session,
                "doc",
                "d-1",
                &ctx,
                AuditChange::update(row(json!({"t": 1})), row(json!({"t": 2}))),
            )
            .await
            .unwrap();

        let trail = ledger.trail(&session, "d-1", None).await.unwrap();
        let ops: Vec<AuditOperation> = trail.iter().map(|e| e.operation).collect();
        assert_eq!(ops, vec![AuditOperation::Update, AuditOperation::Create]);
        assert_eq!(trail[0].changed_fields, vec!["t"]);
    }

    #[tokio::test]
    async fn invalid_context_writes_nothing() {
        let (ledger, session, _clock) = ledger().await;
        let mut ctx = context("u-1");
        ctx.session_id = None;
        let err = ledger
            .record(&session, "doc", "d-1", &ctx, AuditChange::read())
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
        assert!(ledger.trail(&session, "d-1", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn summary_counts_operations_and_users() {
        let (ledger, session, _clock) = ledger().await;
        for user in ["u-1", "u-2", "u-1"] {
            ledger
                .record(&session, "doc", "d-1", &context(user), AuditChange::read())
                .await
                .unwrap();
        }
        let summary = ledger.summary(&session, "d-1").await.unwrap();
        assert_eq!(summary.total_operations, 3);
        assert_eq!(summary.count(AuditOperation::Read), 3);
        assert_eq!(summary.unique_users, 2);
    }

    #[tokio::test]
    async fn suspicious_activity_only_counts_the_trailing_window() {
        let (ledger, session, clock) = ledger().await;
        let ctx = context("u-9");
        ledger
            .record(&session, "doc", "old", &ctx, AuditChange::read())
            .await
            .unwrap();
        clock.advance(Duration::minutes(10));
        for id in ["a", "b"] {
            ledger
                .record(&session, "doc", id, &ctx, AuditChange::read())
                .await
                .unwrap();
        }

        assert!(ledger.suspicious_activity(&session, "u-9", 3).await.unwrap().is_none());
        let report = ledger
            .suspicious_activity(&session, "u-9", 2)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.operation_count, 2);
        assert_eq!(report.entity_ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn reopened_ledger_orders_after_stored_entries() {
        let (ledger, session, _clock) = ledger().await;
        let stored = ledger
            .record(&session, "doc", "d-1", &context("u-1"), AuditChange::read())
            .await
            .unwrap();
        let mut row = stored.to_row();
        row.insert("audit_id".into(), "from-earlier-run".into());
        row.insert("sequence".into(), 1_000_000_000u64.into());
        session.insert("audit_log", row).await.unwrap();

        ledger.ensure_schema(&session).await.unwrap();
        let next = ledger
            .record(&session, "doc", "d-1", &context("u-1"), AuditChange::read())
            .await
            .unwrap();
        assert!(next.sequence > 1_000_000_000);

        let trail = ledger.trail(&session, "d-1", Some(1)).await.unwrap();
        assert_eq!(trail[0].audit_id, next.audit_id);
    }
}
