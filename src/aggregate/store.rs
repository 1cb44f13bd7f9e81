use super::children::ChildSetCoordinator;
use super::concurrency::{ConcurrencyGuard, translate_conflict};
use super::model::{AggregateCriteria, AggregateRoot, CHILD_ROW_KEY};
use super::validator::ConsistencyValidator;
use crate::audit::{AuditChange, AuditContext, AuditLedger};
use crate::config::LedgerConfig;
use crate::core::{
    JsonValue, LedgerError, Result, Row, SharedClock, stored_precision, system_clock,
};
use crate::storage::{CollectionSchema, OrderBy, Predicate, SelectOptions, StoreSession};
use tracing::{Instrument, Level, event, info_span};

/// Entity type under which aggregate audit entries are filed.
pub const AGGREGATE_ENTITY_TYPE: &str = "aggregate";

/// Persists aggregates as consistency units.
///
/// A root and its children are always written in one transaction, after the
/// aggregate has passed validation. Plain [`AggregateStore::save`] is
/// last-writer-wins; [`AggregateStore::save_with_optimistic_locking`] is not.
#[derive(Debug, Clone)]
pub struct AggregateStore {
    session: StoreSession,
    config: LedgerConfig,
    validator: ConsistencyValidator,
    children: ChildSetCoordinator,
    guard: ConcurrencyGuard,
    ledger: AuditLedger,
    clock: SharedClock,
}

impl AggregateStore {
    pub async fn open(session: StoreSession, config: LedgerConfig) -> Result<Self> {
        Self::open_with_clock(session, config, system_clock()).await
    }

    /// Opens the store and creates any missing collections.
    pub async fn open_with_clock(
        session: StoreSession,
        config: LedgerConfig,
        clock: SharedClock,
    ) -> Result<Self> {
        config.validate()?;
        let children = ChildSetCoordinator::new(config.child_collections.clone(), clock.clone());
        let guard = ConcurrencyGuard::new(config.aggregate_collection.clone(), clock.clone());
        let ledger = AuditLedger::new(config.clone(), clock.clone());

        session
            .ensure_collection(CollectionSchema::new(&config.aggregate_collection, "id"))
            .await?;
        children.ensure_schema(&session).await?;
        ledger.ensure_schema(&session).await?;

        Ok(Self {
            session,
            validator: ConsistencyValidator::new(config.max_children),
            config,
            children,
            guard,
            ledger,
            clock,
        })
    }

    pub async fn in_memory() -> Result<Self> {
        Self::open(StoreSession::in_memory(), LedgerConfig::default()).await
    }

    pub fn session(&self) -> &StoreSession {
        &self.session
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn ledger(&self) -> &AuditLedger {
        &self.ledger
    }

    fn collection(&self) -> &str {
        &self.config.aggregate_collection
    }

    fn by_id(id: &str) -> Predicate {
        Predicate::eq("id", id)
    }

    /// Upserts the root and replaces its children. The stored `created_at`
    /// wins over the caller's.
    async fn write(&self, tx: &StoreSession, aggregate: &AggregateRoot) -> Result<AggregateRoot> {
        let now = stored_precision(self.clock.now());
        let existing = tx.select_one(self.collection(), &Self::by_id(&aggregate.id)).await?;

        let mut saved = aggregate.clone();
        saved.created_at = match existing {
            Some(row) => AggregateRoot::from_row(&row, self.collection())?.created_at,
            None => None,
        }
        .or(aggregate.created_at)
        .or(Some(now));
        saved.updated_at = Some(now);

        tx.upsert(self.collection(), saved.to_row()).await?;
        saved.children = self.children.replace(&saved, tx).await?;
        Ok(saved)
    }

    async fn load(&self, session: &StoreSession, id: &str) -> Result<Option<AggregateRoot>> {
        let Some(row) = session.select_one(self.collection(), &Self::by_id(id)).await? else {
            return Ok(None);
        };
        let mut aggregate = AggregateRoot::from_row(&row, self.collection())?;
        aggregate.children = self.children.load(id, session).await?;
        Ok(Some(aggregate))
    }

    /// Validates, then writes root and children atomically.
    pub async fn save(&self, aggregate: &AggregateRoot) -> Result<AggregateRoot> {
        let span = info_span!("aggregate.save", aggregate_id = %aggregate.id);
        async {
            self.validator.validate(aggregate)?;
            let saved = self
                .session
                .run_transaction(|tx| async move { self.write(&tx, aggregate).await })
                .await
                .inspect_err(|err| event!(Level::ERROR, error = %err, "aggregate save failed"))?;
            event!(Level::DEBUG, children = saved.children.len(), "aggregate saved");
            Ok(saved)
        }
        .instrument(span)
        .await
    }

    pub async fn find(&self, id: &str) -> Result<Option<AggregateRoot>> {
        self.load(&self.session, id)
            .instrument(info_span!("aggregate.find", aggregate_id = %id))
            .await
    }

    pub async fn exists(&self, id: &str) -> Result<bool> {
        Ok(self
            .session
            .select_one(self.collection(), &Self::by_id(id))
            .await?
            .is_some())
    }

    /// Roots matching the criteria, newest first. Children are loaded only
    /// when `include_children` is set.
    pub async fn find_many(&self, criteria: &AggregateCriteria) -> Result<Vec<AggregateRoot>> {
        let mut predicate = Predicate::All;
        if let Some(status) = &criteria.status {
            predicate = predicate.and(Predicate::eq("status", status.as_str()));
        }
        if let Some(ids) = &criteria.ids {
            predicate = predicate.and(Predicate::is_in("id", ids.iter().map(String::as_str)));
        }
        let limit = criteria.effective_limit(
            self.config.aggregate_default_limit,
            self.config.aggregate_max_limit,
        );
        let options = SelectOptions::new()
            .order_by(OrderBy::desc("created_at"))
            .order_by(OrderBy::asc("id"))
            .limit(limit);

        let rows = self
            .session
            .select(self.collection(), &predicate, &options)
            .await?;
        let mut aggregates = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut aggregate = AggregateRoot::from_row(row, self.collection())?;
            if criteria.include_children {
                aggregate.children = self.children.load(&aggregate.id, &self.session).await?;
            }
            aggregates.push(aggregate);
        }
        Ok(aggregates)
    }

    /// Removes children, then the root. Returns false if nothing was stored.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let span = info_span!("aggregate.delete", aggregate_id = %id);
        self.session
            .run_transaction(|tx| async move {
                self.children.remove_all(id, &tx).await?;
                let removed = tx.delete(self.collection(), &Self::by_id(id)).await?;
                event!(Level::DEBUG, removed, "aggregate deleted");
                Ok(removed > 0)
            })
            .instrument(span)
            .await
    }

    /// Writes only if the stored version equals `expected_version`; the
    /// stored version becomes `expected_version + 1`.
    pub async fn save_with_optimistic_locking(
        &self,
        aggregate: &AggregateRoot,
        expected_version: i64,
    ) -> Result<AggregateRoot> {
        self.validator.validate(aggregate)?;
        self.locked_write(aggregate, expected_version, None).await
    }

    async fn locked_write(
        &self,
        aggregate: &AggregateRoot,
        expected_version: i64,
        context: Option<&AuditContext>,
    ) -> Result<AggregateRoot> {
        let span = info_span!(
            "aggregate.save_locked",
            aggregate_id = %aggregate.id,
            expected_version
        );
        async {
            let result = self
                .session
                .run_transaction(|tx| async move {
                    let before = match context {
                        Some(_) => self.load(&tx, &aggregate.id).await?,
                        None => None,
                    };
                    self.guard
                        .check_version(&aggregate.id, expected_version, &tx)
                        .await?;
                    let mut saved = self
                        .guard
                        .compare_and_swap(aggregate, expected_version, &tx)
                        .await?;
                    saved.children = self.children.replace(&saved, &tx).await?;

                    if let (Some(context), Some(before)) = (context, before) {
                        self.ledger
                            .record(
                                &tx,
                                AGGREGATE_ENTITY_TYPE,
                                &saved.id,
                                context,
                                AuditChange::update(snapshot(&before), snapshot(&saved)),
                            )
                            .await?;
                    }
                    Ok(saved)
                })
                .await
                .map_err(translate_conflict);

            match &result {
                Ok(saved) => event!(Level::DEBUG, version = saved.version, "aggregate saved"),
                Err(err) if err.is_conflict() => {
                    event!(Level::WARN, error = %err, "optimistic lock rejected write")
                }
                Err(err) => event!(Level::ERROR, error = %err, "aggregate save failed"),
            }
            result
        }
        .instrument(span)
        .await
    }

    /// [`AggregateStore::save`] plus a CREATE or UPDATE audit entry in the
    /// same transaction.
    pub async fn save_audited(
        &self,
        aggregate: &AggregateRoot,
        context: &AuditContext,
    ) -> Result<AggregateRoot> {
        context.validate()?;
        self.validator.validate(aggregate)?;
        self.session
            .run_transaction(|tx| async move {
                let before = self.load(&tx, &aggregate.id).await?;
                let saved = self.write(&tx, aggregate).await?;
                let change = match before {
                    Some(before) => AuditChange::update(snapshot(&before), snapshot(&saved)),
                    None => AuditChange::create(snapshot(&saved)),
                };
                self.ledger
                    .record(&tx, AGGREGATE_ENTITY_TYPE, &saved.id, context, change)
                    .await?;
                Ok(saved)
            })
            .instrument(info_span!("aggregate.save_audited", aggregate_id = %aggregate.id))
            .await
    }

    pub async fn save_with_optimistic_locking_audited(
        &self,
        aggregate: &AggregateRoot,
        expected_version: i64,
        context: &AuditContext,
    ) -> Result<AggregateRoot> {
        context.validate()?;
        self.validator.validate(aggregate)?;
        self.locked_write(aggregate, expected_version, Some(context))
            .await
    }

    /// [`AggregateStore::delete`] plus a DELETE audit entry. Missing
    /// aggregates are reported as not found.
    pub async fn delete_audited(&self, id: &str, context: &AuditContext) -> Result<()> {
        context.validate()?;
        self.session
            .run_transaction(|tx| async move {
                let before = self
                    .load(&tx, id)
                    .await?
                    .ok_or_else(|| LedgerError::NotFound(format!("aggregate '{}' does not exist", id)))?;
                self.children.remove_all(id, &tx).await?;
                tx.delete(self.collection(), &Self::by_id(id)).await?;
                self.ledger
                    .record(
                        &tx,
                        AGGREGATE_ENTITY_TYPE,
                        id,
                        context,
                        AuditChange::delete(snapshot(&before), None),
                    )
                    .await?;
                Ok(())
            })
            .instrument(info_span!("aggregate.delete_audited", aggregate_id = %id))
            .await
    }
}

/// Child fields restamped on every replace; left out of audit snapshots.
const CHILD_SNAPSHOT_SKIPPED: [&str; 3] = [CHILD_ROW_KEY, "created_at", "updated_at"];

/// Root fields plus the child rows, as recorded in audit entries.
fn snapshot(aggregate: &AggregateRoot) -> Row {
    let mut row = aggregate.to_row();
    let children = aggregate
        .children
        .iter()
        .map(|child| {
            let mut child_row = child.to_row();
            for field in CHILD_SNAPSHOT_SKIPPED {
                child_row.remove(field);
            }
            JsonValue::Object(child_row)
        })
        .collect();
    row.insert("children".into(), JsonValue::Array(children));
    row
}
