use super::retention::RetentionPolicy;
use super::state::SoftDeleteState;
use crate::audit::{AuditChange, AuditContext, AuditLedger, AuditOperation};
use crate::core::{
    JsonValue, LedgerError, Result, Row, SharedClock, row_i64, row_string, stored_precision,
    timestamp_value,
};
use crate::storage::{Predicate, SelectOptions, StoreSession};
use chrono::{DateTime, Duration, Utc};
use log::info;

/// Soft delete, restore and retention-gated permanent removal for one
/// collection of auditable rows.
///
/// Every operation validates the audit context first, then performs its
/// read-modify-write and the audit entry in a single transaction.
#[derive(Debug, Clone)]
pub struct LifecycleManager {
    entity_type: String,
    collection: String,
    key_field: String,
    ledger: AuditLedger,
    retention: RetentionPolicy,
    clock: SharedClock,
}

impl LifecycleManager {
    pub fn new(
        entity_type: impl Into<String>,
        collection: impl Into<String>,
        key_field: impl Into<String>,
        ledger: AuditLedger,
        retention: RetentionPolicy,
        clock: SharedClock,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            collection: collection.into(),
            key_field: key_field.into(),
            ledger,
            retention,
            clock,
        }
    }

    pub fn retention(&self) -> &RetentionPolicy {
        &self.retention
    }

    fn now(&self) -> DateTime<Utc> {
        stored_precision(self.clock.now())
    }

    fn by_id(&self, id: &str) -> Predicate {
        Predicate::eq(self.key_field.as_str(), id)
    }

    async fn load(&self, session: &StoreSession, id: &str) -> Result<Option<Row>> {
        session.select_one(&self.collection, &self.by_id(id)).await
    }

    fn not_found(&self, id: &str) -> LedgerError {
        LedgerError::NotFound(format!("{} '{}' does not exist", self.entity_type, id))
    }

    fn touch(&self, row: &mut Row, context: &AuditContext, now: DateTime<Utc>) {
        let version = row_i64(row, "version").unwrap_or(0);
        row.insert("version".into(), (version + 1).into());
        row.insert("updated_at".into(), timestamp_value(now));
        row.insert("updated_by".into(), context.user().into());
    }

    /// Marks a live entity deleted and records a DELETE entry.
    pub async fn soft_delete(
        &self,
        session: &StoreSession,
        id: &str,
        context: &AuditContext,
        reason: Option<String>,
    ) -> Result<Row> {
        context.validate()?;
        session
            .run_transaction(|tx| async move {
                let mut row = self
                    .load(&tx, id)
                    .await?
                    .filter(|row| !SoftDeleteState::from_row(row).is_ok_and(|s| s.is_deleted))
                    .ok_or_else(|| self.not_found(id))?;
                let before = SoftDeleteState::from_row(&row)?;

                let now = self.now();
                let after = SoftDeleteState::deleted(now, context.user(), reason);
                after.write_to(&mut row);
                self.touch(&mut row, context, now);
                tx.upsert(&self.collection, row.clone()).await?;

                self.ledger
                    .record(
                        &tx,
                        &self.entity_type,
                        id,
                        context,
                        AuditChange::delete(before.to_row(), Some(after.to_row())),
                    )
                    .await?;
                info!("{} '{}' soft-deleted by {}", self.entity_type, id, context.user());
                Ok(row)
            })
            .await
    }

    /// Clears the deletion fields and any purge schedule; records RESTORE.
    pub async fn restore(&self, session: &StoreSession, id: &str, context: &AuditContext) -> Result<Row> {
        context.validate()?;
        session
            .run_transaction(|tx| async move {
                let mut row = self.load(&tx, id).await?.ok_or_else(|| self.not_found(id))?;
                let before = SoftDeleteState::from_row(&row)?;
                if !before.is_deleted {
                    return Err(LedgerError::Validation(format!(
                        "{} '{}' is not deleted and does not need restoration",
                        self.entity_type, id
                    )));
                }

                let after = SoftDeleteState::active();
                after.write_to(&mut row);
                self.touch(&mut row, context, self.now());
                tx.upsert(&self.collection, row.clone()).await?;

                self.ledger
                    .record(
                        &tx,
                        &self.entity_type,
                        id,
                        context,
                        AuditChange::restore(before.to_row(), after.to_row()),
                    )
                    .await?;
                info!("{} '{}' restored by {}", self.entity_type, id, context.user());
                Ok(row)
            })
            .await
    }

    /// True if the entity is absent, or soft-deleted for longer than the
    /// retention period.
    pub async fn validate_data_retention(&self, session: &StoreSession, id: &str) -> Result<bool> {
        match self.load(session, id).await? {
            None => Ok(true),
            Some(row) => self.retention_allows(&row),
        }
    }

    fn retention_allows(&self, row: &Row) -> Result<bool> {
        let state = SoftDeleteState::from_row(row)?;
        Ok(self.retention.allows_hard_delete(&state, self.clock.now()))
    }

    /// Permanently removes the row once retention allows it, recording a
    /// DELETE entry with no new values.
    pub async fn hard_delete(&self, session: &StoreSession, id: &str, context: &AuditContext) -> Result<()> {
        context.validate()?;
        session
            .run_transaction(|tx| async move {
                let row = self.load(&tx, id).await?.ok_or_else(|| self.not_found(id))?;
                if !self.retention_allows(&row)? {
                    let state = SoftDeleteState::from_row(&row)?;
                    let detail = match self.retention.eligible_after(&state) {
                        Some(after) => format!(
                            "{} '{}' is retained until {}",
                            self.entity_type,
                            id,
                            timestamp_value(after)
                        ),
                        None => format!(
                            "{} '{}' must be soft-deleted before permanent removal",
                            self.entity_type, id
                        ),
                    };
                    return Err(LedgerError::RetentionPolicy(detail));
                }

                tx.delete(&self.collection, &self.by_id(id)).await?;
                self.ledger
                    .record(&tx, &self.entity_type, id, context, AuditChange::delete(row, None))
                    .await?;
                info!("{} '{}' permanently deleted by {}", self.entity_type, id, context.user());
                Ok(())
            })
            .await
    }

    /// Stamps `scheduled_purge_at = now + days` and records an UPDATE entry.
    /// Nothing is deleted here.
    pub async fn schedule_data_purge(
        &self,
        session: &StoreSession,
        id: &str,
        purge_after_days: i64,
        context: &AuditContext,
    ) -> Result<DateTime<Utc>> {
        context.validate()?;
        if purge_after_days < 0 {
            return Err(LedgerError::Validation(
                "purge_after_days must not be negative".into(),
            ));
        }
        let now = self.now();
        let purge_at = Duration::try_days(purge_after_days)
            .and_then(|delay| now.checked_add_signed(delay))
            .ok_or_else(|| {
                LedgerError::Validation(format!(
                    "purge_after_days {} is out of range",
                    purge_after_days
                ))
            })?;
        session
            .run_transaction(|tx| async move {
                let mut row = self.load(&tx, id).await?.ok_or_else(|| self.not_found(id))?;

                let before = scheduled_snapshot(&row);
                row.insert("scheduled_purge_at".into(), timestamp_value(purge_at));
                let after = scheduled_snapshot(&row);
                self.touch(&mut row, context, now);
                tx.upsert(&self.collection, row).await?;

                self.ledger
                    .record(
                        &tx,
                        &self.entity_type,
                        id,
                        context,
                        AuditChange::new(AuditOperation::Update, Some(before), Some(after)),
                    )
                    .await?;
                Ok(purge_at)
            })
            .await
    }

    /// Ids whose purge date has passed and whose retention window is over.
    pub async fn purge_candidates(&self, session: &StoreSession, now: DateTime<Utc>) -> Result<Vec<String>> {
        let due = Predicate::not_null("scheduled_purge_at")
            .and(Predicate::lte("scheduled_purge_at", timestamp_value(now)));
        let rows = session
            .select(&self.collection, &due, &SelectOptions::new())
            .await?;

        let mut ids = Vec::new();
        for row in &rows {
            let state = SoftDeleteState::from_row(row)?;
            if self.retention.allows_hard_delete(&state, now) {
                if let Some(id) = row_string(row, &self.key_field) {
                    ids.push(id);
                }
            }
        }
        Ok(ids)
    }
}

fn scheduled_snapshot(row: &Row) -> Row {
    let mut snapshot = Row::new();
    snapshot.insert(
        "scheduled_purge_at".into(),
        row.get("scheduled_purge_at").cloned().unwrap_or(JsonValue::Null),
    );
    snapshot
}
