use super::catalog::CollectionSchema;
use super::engine::StorageEngine;
use super::memory::InMemoryStore;
use super::predicate::{Predicate, SelectOptions};
use crate::core::{Result, Row};
use crate::transaction::TransactionId;
use log::{debug, warn};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Handle;

/// Handle to a storage engine, optionally bound to one transaction.
///
/// Sessions are cheap to clone. Every data call goes through the bound
/// transaction when there is one, and autocommits otherwise.
#[derive(Clone)]
pub struct StoreSession {
    engine: Arc<dyn StorageEngine>,
    transaction_id: Option<TransactionId>,
}

impl fmt::Debug for StoreSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreSession")
            .field("transaction_id", &self.transaction_id)
            .finish()
    }
}

impl StoreSession {
    pub fn new(engine: Arc<dyn StorageEngine>) -> Self {
        Self {
            engine,
            transaction_id: None,
        }
    }

    /// A session over a fresh [`InMemoryStore`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryStore::new()))
    }

    pub fn engine(&self) -> Arc<dyn StorageEngine> {
        self.engine.clone()
    }

    /// Creates a clone of this session bound to `transaction_id`.
    pub fn with_transaction_id(&self, transaction_id: TransactionId) -> Self {
        Self {
            engine: self.engine.clone(),
            transaction_id: Some(transaction_id),
        }
    }

    pub fn transaction_id(&self) -> Option<TransactionId> {
        self.transaction_id
    }

    pub fn is_transactional(&self) -> bool {
        self.transaction_id.is_some()
    }

    pub async fn ensure_collection(&self, schema: CollectionSchema) -> Result<()> {
        self.engine.ensure_collection(schema).await
    }

    pub async fn upsert(&self, collection: &str, row: Row) -> Result<()> {
        self.engine.upsert(self.transaction_id, collection, row).await
    }

    pub async fn insert(&self, collection: &str, row: Row) -> Result<()> {
        self.engine.insert(self.transaction_id, collection, row).await
    }

    pub async fn select(
        &self,
        collection: &str,
        predicate: &Predicate,
        options: &SelectOptions,
    ) -> Result<Vec<Row>> {
        self.engine
            .select(self.transaction_id, collection, predicate, options)
            .await
    }

    /// First row matching `predicate`, if any.
    pub async fn select_one(&self, collection: &str, predicate: &Predicate) -> Result<Option<Row>> {
        let rows = self
            .select(collection, predicate, &SelectOptions::new().limit(1))
            .await?;
        Ok(rows.into_iter().next())
    }

    pub async fn delete(&self, collection: &str, predicate: &Predicate) -> Result<u64> {
        self.engine
            .delete(self.transaction_id, collection, predicate)
            .await
    }

    pub async fn update_where(
        &self,
        collection: &str,
        predicate: &Predicate,
        patch: Row,
    ) -> Result<u64> {
        self.engine
            .update_where(self.transaction_id, collection, predicate, patch)
            .await
    }

    /// Executes a closure within a transaction scope.
    ///
    /// If the closure returns `Ok`, the transaction is committed; if it
    /// returns `Err` it is rolled back. Dropping the returned future before
    /// it finishes rolls the transaction back on the current runtime. A session that
    /// is already inside a transaction joins it instead of opening a new one,
    /// leaving commit to the outer scope.
    pub async fn run_transaction<F, Fut, T>(&self, op: F) -> Result<T>
    where
        F: FnOnce(StoreSession) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if self.is_transactional() {
            return op(self.clone()).await;
        }

        let transaction_id = self.engine.begin().await?;
        let mut guard = RollbackOnDrop::new(self.engine.clone(), transaction_id);
        let tx_session = self.with_transaction_id(transaction_id);

        let outcome = match op(tx_session).await {
            // a failed commit has already discarded the transaction
            Ok(value) => self.engine.commit(transaction_id).await.map(|()| value),
            Err(err) => {
                if let Err(rollback_err) = self.engine.rollback(transaction_id).await {
                    warn!("rollback of {} failed: {}", transaction_id, rollback_err);
                }
                Err(err)
            }
        };
        guard.disarm();
        outcome
    }
}

/// Rolls back a transaction whose `run_transaction` future was dropped
/// before reaching commit or rollback.
struct RollbackOnDrop {
    engine: Arc<dyn StorageEngine>,
    transaction_id: TransactionId,
    armed: bool,
}

impl RollbackOnDrop {
    fn new(engine: Arc<dyn StorageEngine>, transaction_id: TransactionId) -> Self {
        Self {
            engine,
            transaction_id,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for RollbackOnDrop {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let engine = self.engine.clone();
        let transaction_id = self.transaction_id;
        match Handle::try_current() {
            Ok(handle) => {
                debug!("rolling back abandoned {}", transaction_id);
                handle.spawn(async move {
                    if let Err(err) = engine.rollback(transaction_id).await {
                        warn!("rollback of abandoned {} failed: {}", transaction_id, err);
                    }
                });
            }
            Err(_) => warn!(
                "{} abandoned outside a runtime; it stays open",
                transaction_id
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{JsonValue, LedgerError};
    use serde_json::json;

    fn row(value: JsonValue) -> Row {
        value.as_object().cloned().unwrap()
    }

    async fn session() -> StoreSession {
        let session = StoreSession::in_memory();
        session
            .ensure_collection(CollectionSchema::new("items", "id"))
            .await
            .unwrap();
        session
    }

    #[tokio::test]
    async fn failed_closure_rolls_back() {
        let session = session().await;
        let result: Result<()> = session
            .run_transaction(|tx| async move {
                tx.upsert("items", row(json!({"id": "a"}))).await?;
                Err(LedgerError::Validation("stop".into()))
            })
            .await;

        assert!(result.is_err());
        assert!(
            session
                .select_one("items", &Predicate::eq("id", "a"))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn nested_scope_joins_outer_transaction() {
        let session = session().await;
        session
            .run_transaction(|outer| async move {
                let outer_id = outer.transaction_id();
                let inner_id = outer
                    .run_transaction(|inner| async move { Ok(inner.transaction_id()) })
                    .await?;
                assert_eq!(outer_id, inner_id);
                outer.upsert("items", row(json!({"id": "a"}))).await
            })
            .await
            .unwrap();

        let found = session
            .select_one("items", &Predicate::eq("id", "a"))
            .await
            .unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn dropped_scope_is_rolled_back() {
        let store = Arc::new(InMemoryStore::new());
        let session = StoreSession::new(store.clone());
        session
            .ensure_collection(CollectionSchema::new("items", "id"))
            .await
            .unwrap();

        let pending = session.run_transaction(|tx| async move {
            tx.upsert("items", row(json!({"id": "a"}))).await?;
            std::future::pending::<Result<()>>().await
        });
        let timed_out =
            tokio::time::timeout(std::time::Duration::from_millis(10), pending).await;
        assert!(timed_out.is_err());

        for _ in 0..50 {
            if store.transaction_stats().await.active == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        let stats = store.transaction_stats().await;
        assert_eq!(stats.active, 0);
        assert_eq!(stats.aborted, 1);
        assert_eq!(store.row_count("items").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn closure_error_survives_a_failed_rollback() {
        let session = session().await;
        let result: Result<()> = session
            .run_transaction(|tx| async move {
                let id = tx.transaction_id().ok_or_else(|| LedgerError::Validation("no tx".into()))?;
                tx.engine().rollback(id).await?;
                Err(LedgerError::Validation("stop".into()))
            })
            .await;

        // the second rollback finds nothing; the closure's error is reported
        assert_eq!(result.unwrap_err(), LedgerError::Validation("stop".into()));
    }
}
