use super::catalog::CollectionSchema;
use super::predicate::{Predicate, SelectOptions};
use crate::core::{Result, Row};
use crate::transaction::TransactionId;
use async_trait::async_trait;

/// Storage engine trait - the transactional table store the core runs on.
///
/// Every data operation takes an optional transaction. `None` runs the
/// operation on its own and makes it visible immediately; `Some` stages it in
/// that transaction until [`StorageEngine::commit`].
///
/// Engines must guarantee that a commit applies all staged changes or none,
/// and that `update_where` is a conditional write: the predicate is evaluated
/// and the patch applied atomically, and a concurrent commit that invalidates
/// the predicate makes the later commit fail with a write conflict.
#[async_trait]
pub trait StorageEngine: Send + Sync {
    /// Create the collection if it does not exist yet
    async fn ensure_collection(&self, schema: CollectionSchema) -> Result<()>;

    async fn begin(&self) -> Result<TransactionId>;

    /// Apply the staged changes. A failed commit discards the transaction.
    async fn commit(&self, tx: TransactionId) -> Result<()>;

    async fn rollback(&self, tx: TransactionId) -> Result<()>;

    /// Insert the row, replacing any row with the same key
    async fn upsert(&self, tx: Option<TransactionId>, collection: &str, row: Row) -> Result<()>;

    /// Insert the row, failing if its key is already present
    async fn insert(&self, tx: Option<TransactionId>, collection: &str, row: Row) -> Result<()>;

    async fn select(
        &self,
        tx: Option<TransactionId>,
        collection: &str,
        predicate: &Predicate,
        options: &SelectOptions,
    ) -> Result<Vec<Row>>;

    /// Delete matching rows, returning how many were removed
    async fn delete(
        &self,
        tx: Option<TransactionId>,
        collection: &str,
        predicate: &Predicate,
    ) -> Result<u64>;

    /// Merge `patch` into every matching row, returning how many matched
    async fn update_where(
        &self,
        tx: Option<TransactionId>,
        collection: &str,
        predicate: &Predicate,
        patch: Row,
    ) -> Result<u64>;
}
