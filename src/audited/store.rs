use super::record::{
    AuditableRecord, AuditedRecord, EntityCriteria, RECORD_KEY_FIELD, data_fields, entity_row,
    record_from_row,
};
use crate::audit::{
    AuditChange, AuditContext, AuditEntry, AuditLedger, AuditQuery, AuditSummary,
    SuspiciousActivity,
};
use crate::config::LedgerConfig;
use crate::core::{
    LedgerError, Result, Row, SharedClock, row_i64, stored_precision, system_clock,
    timestamp_value,
};
use crate::lifecycle::{LifecycleManager, RetentionPolicy, SoftDeleteState};
use crate::storage::{CollectionSchema, OrderBy, Predicate, SelectOptions, StoreSession};
use chrono::{DateTime, Utc};
use std::marker::PhantomData;
use tracing::{Instrument, Level, event, info_span};

/// Typed store for one kind of auditable entity.
///
/// Every mutation, and every successful `find_by_id` unless read auditing is
/// disabled, commits together with its audit entry. Deletion is soft first;
/// permanent removal waits for the retention period.
#[derive(Debug, Clone)]
pub struct AuditedStore<T> {
    session: StoreSession,
    config: LedgerConfig,
    ledger: AuditLedger,
    lifecycle: LifecycleManager,
    clock: SharedClock,
    _entity: PhantomData<fn() -> T>,
}

impl<T: AuditableRecord> AuditedStore<T> {
    pub async fn open(session: StoreSession, config: LedgerConfig) -> Result<Self> {
        Self::open_with_clock(session, config, system_clock()).await
    }

    pub async fn open_with_clock(
        session: StoreSession,
        config: LedgerConfig,
        clock: SharedClock,
    ) -> Result<Self> {
        config.validate()?;
        let ledger = AuditLedger::new(config.clone(), clock.clone());
        let lifecycle = LifecycleManager::new(
            T::ENTITY_TYPE,
            T::COLLECTION,
            RECORD_KEY_FIELD,
            ledger.clone(),
            RetentionPolicy::new(config.retention_period()),
            clock.clone(),
        );

        session
            .ensure_collection(CollectionSchema::new(T::COLLECTION, RECORD_KEY_FIELD))
            .await?;
        ledger.ensure_schema(&session).await?;

        Ok(Self {
            session,
            config,
            ledger,
            lifecycle,
            clock,
            _entity: PhantomData,
        })
    }

    pub fn session(&self) -> &StoreSession {
        &self.session
    }

    pub fn ledger(&self) -> &AuditLedger {
        &self.ledger
    }

    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    fn by_id(id: &str) -> Predicate {
        Predicate::eq(RECORD_KEY_FIELD, id)
    }

    fn not_found(id: &str) -> LedgerError {
        LedgerError::NotFound(format!("{} '{}' does not exist", T::ENTITY_TYPE, id))
    }

    async fn live_row(&self, session: &StoreSession, id: &str) -> Result<Option<Row>> {
        let live = Self::by_id(id).and(Predicate::ne("is_deleted", true));
        session.select_one(T::COLLECTION, &live).await
    }

    /// Inserts a new entity at version 1 and records CREATE.
    pub async fn create(&self, entity: &T, context: &AuditContext) -> Result<AuditedRecord<T>> {
        context.validate()?;
        let data = entity_row(entity)?;
        let id = entity.record_id();
        let span = info_span!("audited.create", entity_type = T::ENTITY_TYPE, entity_id = %id);

        self.session
            .run_transaction(|tx| async move {
                if tx.select_one(T::COLLECTION, &Self::by_id(&id)).await?.is_some() {
                    return Err(LedgerError::Conflict(format!(
                        "{} '{}' already exists",
                        T::ENTITY_TYPE,
                        id
                    )));
                }

                let now = timestamp_value(stored_precision(self.clock.now()));
                let mut row = data.clone();
                row.insert("version".into(), 1.into());
                row.insert("created_at".into(), now.clone());
                row.insert("created_by".into(), context.user().into());
                row.insert("updated_at".into(), now);
                row.insert("updated_by".into(), context.user().into());
                SoftDeleteState::active().write_to(&mut row);
                tx.insert(T::COLLECTION, row.clone()).await?;

                self.ledger
                    .record(&tx, T::ENTITY_TYPE, &id, context, AuditChange::create(data))
                    .await?;
                event!(Level::DEBUG, "auditable entity created");
                record_from_row(&row)
            })
            .instrument(span)
            .await
    }

    /// Rewrites a live entity, bumping its version, and records UPDATE.
    pub async fn update(&self, entity: &T, context: &AuditContext) -> Result<AuditedRecord<T>> {
        context.validate()?;
        let data = entity_row(entity)?;
        let id = entity.record_id();
        let span = info_span!("audited.update", entity_type = T::ENTITY_TYPE, entity_id = %id);

        self.session
            .run_transaction(|tx| async move {
                let current = self
                    .live_row(&tx, &id)
                    .await?
                    .ok_or_else(|| Self::not_found(&id))?;
                let version = row_i64(&current, "version").unwrap_or(0);

                let mut patch = data.clone();
                patch.remove(RECORD_KEY_FIELD);
                patch.insert("version".into(), (version + 1).into());
                patch.insert(
                    "updated_at".into(),
                    timestamp_value(stored_precision(self.clock.now())),
                );
                patch.insert("updated_by".into(), context.user().into());

                let guard = Self::by_id(&id).and(Predicate::eq("version", version));
                if tx.update_where(T::COLLECTION, &guard, patch).await? == 0 {
                    return Err(LedgerError::Conflict(format!(
                        "{} '{}' was modified by another user",
                        T::ENTITY_TYPE,
                        id
                    )));
                }

                self.ledger
                    .record(
                        &tx,
                        T::ENTITY_TYPE,
                        &id,
                        context,
                        AuditChange::update(data_fields(&current), data),
                    )
                    .await?;

                let stored = tx
                    .select_one(T::COLLECTION, &Self::by_id(&id))
                    .await?
                    .ok_or_else(|| Self::not_found(&id))?;
                record_from_row(&stored)
            })
            .instrument(span)
            .await
    }

    /// Loads a live entity; records READ when read auditing is on.
    pub async fn find_by_id(
        &self,
        id: &str,
        context: &AuditContext,
    ) -> Result<Option<AuditedRecord<T>>> {
        context.validate()?;
        if !self.ledger.should_audit_reads() {
            return self
                .live_row(&self.session, id)
                .await?
                .map(|row| record_from_row(&row))
                .transpose();
        }

        self.session
            .run_transaction(|tx| async move {
                let Some(row) = self.live_row(&tx, id).await? else {
                    return Ok(None);
                };
                let record = record_from_row(&row)?;
                self.ledger
                    .record(&tx, T::ENTITY_TYPE, id, context, AuditChange::read())
                    .await?;
                Ok(Some(record))
            })
            .await
    }

    /// Entities matching the criteria, newest first. Not audited.
    pub async fn find_all(&self, criteria: &EntityCriteria) -> Result<Vec<AuditedRecord<T>>> {
        let mut predicate = Predicate::All;
        if let Some(ids) = &criteria.ids {
            predicate = predicate.and(Predicate::is_in(
                RECORD_KEY_FIELD,
                ids.iter().map(String::as_str),
            ));
        }
        if !criteria.include_deleted {
            predicate = predicate.and(Predicate::ne("is_deleted", true));
        }
        let options = SelectOptions::new()
            .order_by(OrderBy::desc("created_at"))
            .order_by(OrderBy::asc(RECORD_KEY_FIELD))
            .limit(criteria.effective_limit(
                self.config.entity_default_limit,
                self.config.entity_max_limit,
            ));

        self.session
            .select(T::COLLECTION, &predicate, &options)
            .await?
            .iter()
            .map(record_from_row::<T>)
            .collect()
    }

    pub async fn soft_delete(
        &self,
        id: &str,
        context: &AuditContext,
        reason: Option<String>,
    ) -> Result<AuditedRecord<T>> {
        let row = self
            .lifecycle
            .soft_delete(&self.session, id, context, reason)
            .instrument(info_span!("audited.soft_delete", entity_type = T::ENTITY_TYPE, entity_id = %id))
            .await?;
        record_from_row(&row)
    }

    pub async fn restore(&self, id: &str, context: &AuditContext) -> Result<AuditedRecord<T>> {
        let row = self
            .lifecycle
            .restore(&self.session, id, context)
            .instrument(info_span!("audited.restore", entity_type = T::ENTITY_TYPE, entity_id = %id))
            .await?;
        record_from_row(&row)
    }

    pub async fn hard_delete(&self, id: &str, context: &AuditContext) -> Result<()> {
        self.lifecycle
            .hard_delete(&self.session, id, context)
            .instrument(info_span!("audited.hard_delete", entity_type = T::ENTITY_TYPE, entity_id = %id))
            .await
            .inspect_err(|err| event!(Level::WARN, error = %err, "hard delete refused"))
    }

    pub async fn schedule_data_purge(
        &self,
        id: &str,
        purge_after_days: i64,
        context: &AuditContext,
    ) -> Result<DateTime<Utc>> {
        self.lifecycle
            .schedule_data_purge(&self.session, id, purge_after_days, context)
            .await
    }

    pub async fn validate_data_retention(&self, id: &str) -> Result<bool> {
        self.lifecycle.validate_data_retention(&self.session, id).await
    }

    pub async fn purge_candidates(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        self.lifecycle.purge_candidates(&self.session, now).await
    }

    pub async fn audit_trail(&self, id: &str, limit: Option<usize>) -> Result<Vec<AuditEntry>> {
        let query = AuditQuery {
            entity_id: Some(id.to_string()),
            entity_type: Some(T::ENTITY_TYPE.to_string()),
            limit,
            ..AuditQuery::default()
        };
        self.ledger.query(&self.session, &query).await
    }

    pub async fn audit_summary(&self, id: &str) -> Result<AuditSummary> {
        let entries = self.audit_trail(id, None).await?;
        Ok(AuditSummary::from_entries(&entries))
    }

    /// Runs `query` restricted to this entity type.
    pub async fn query_audit(&self, query: AuditQuery) -> Result<Vec<AuditEntry>> {
        let query = query.entity_type(T::ENTITY_TYPE);
        self.ledger.query(&self.session, &query).await
    }

    pub async fn suspicious_activity(
        &self,
        user_id: &str,
        threshold: usize,
    ) -> Result<Option<SuspiciousActivity>> {
        self.ledger
            .suspicious_activity(&self.session, user_id, threshold)
            .await
    }
}
