use super::model::AggregateRoot;
use crate::core::{
    JsonValue, LedgerError, Result, Row, SharedClock, row_i64, stored_precision, timestamp_value,
};
use crate::storage::{Predicate, StoreSession};
use log::warn;

/// Message of the conflict raised when a concurrent writer won the race.
pub const CONCURRENT_MODIFICATION: &str = "aggregate was modified by another user";

/// Optimistic concurrency for aggregate roots.
///
/// The version read in [`ConcurrencyGuard::check_version`] only fails fast;
/// the conditional write in [`ConcurrencyGuard::compare_and_swap`] is what
/// actually enforces the lock.
#[derive(Debug, Clone)]
pub struct ConcurrencyGuard {
    collection: String,
    clock: SharedClock,
}

impl ConcurrencyGuard {
    pub fn new(collection: impl Into<String>, clock: SharedClock) -> Self {
        Self {
            collection: collection.into(),
            clock,
        }
    }

    pub async fn current_version(&self, id: &str, session: &StoreSession) -> Result<Option<i64>> {
        let row = session
            .select_one(&self.collection, &Predicate::eq("id", id))
            .await?;
        Ok(row.map(|row| row_i64(&row, "version").unwrap_or(0)))
    }

    /// Fails unless the stored version equals `expected`.
    pub async fn check_version(&self, id: &str, expected: i64, session: &StoreSession) -> Result<i64> {
        match self.current_version(id, session).await? {
            None => Err(LedgerError::NotFound(format!("aggregate '{}' does not exist", id))),
            Some(actual) if actual != expected => Err(LedgerError::Conflict(format!(
                "Version mismatch: expected {}, found {}",
                expected, actual
            ))),
            Some(actual) => Ok(actual),
        }
    }

    /// Writes the root with `version = expected + 1`, but only while the
    /// stored version is still `expected`. Children are left alone.
    pub async fn compare_and_swap(
        &self,
        aggregate: &AggregateRoot,
        expected: i64,
        session: &StoreSession,
    ) -> Result<AggregateRoot> {
        let now = stored_precision(self.clock.now());
        let next = expected + 1;

        let mut patch = Row::new();
        patch.insert("version".into(), next.into());
        patch.insert("name".into(), aggregate.name.clone().into());
        patch.insert(
            "status".into(),
            aggregate.status.clone().map(JsonValue::String).unwrap_or(JsonValue::Null),
        );
        patch.insert(
            "attributes".into(),
            JsonValue::Object(aggregate.attributes.clone()),
        );
        patch.insert("updated_at".into(), timestamp_value(now));

        let guard = Predicate::eq("id", aggregate.id.as_str()).and(Predicate::eq("version", expected));
        let updated = session.update_where(&self.collection, &guard, patch).await?;
        if updated == 0 {
            warn!(
                "optimistic lock lost on '{}' at version {}",
                aggregate.id, expected
            );
            return Err(LedgerError::Conflict(CONCURRENT_MODIFICATION.into()));
        }

        let stored = session
            .select_one(&self.collection, &Predicate::eq("id", aggregate.id.as_str()))
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("aggregate '{}' does not exist", aggregate.id)))?;
        let mut saved = AggregateRoot::from_row(&stored, &self.collection)?;
        saved.children = aggregate.children.clone();
        Ok(saved)
    }

    /// Version check and conditional write of the root in one transaction.
    pub async fn save_with_optimistic_locking(
        &self,
        aggregate: &AggregateRoot,
        expected_version: i64,
        session: &StoreSession,
    ) -> Result<AggregateRoot> {
        session
            .run_transaction(|tx| async move {
                self.check_version(&aggregate.id, expected_version, &tx).await?;
                self.compare_and_swap(aggregate, expected_version, &tx).await
            })
            .await
            .map_err(translate_conflict)
    }
}

/// Reports a lost commit race the same way as a failed conditional write.
pub fn translate_conflict(err: LedgerError) -> LedgerError {
    if err.is_write_conflict() {
        LedgerError::Conflict(CONCURRENT_MODIFICATION.into())
    } else {
        err
    }
}
