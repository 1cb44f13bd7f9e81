use super::catalog::{Catalog, CollectionSchema};
use super::engine::StorageEngine;
use super::predicate::{Predicate, SelectOptions};
use crate::core::{JsonValue, LedgerError, Result, Row};
use crate::transaction::{Change, TransactionId, TransactionManager, TransactionStats};
use async_trait::async_trait;
use log::{debug, warn};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

/// A committed row plus the commit sequence number that last wrote it.
#[derive(Debug, Clone)]
struct StoredRow {
    row: Row,
    version: u64,
}

#[derive(Debug)]
struct Collection {
    schema: CollectionSchema,
    rows: BTreeMap<String, StoredRow>,
}

#[derive(Debug, Default)]
struct StoreState {
    catalog: Catalog,
    collections: HashMap<String, Collection>,
    transactions: TransactionManager,
    commit_seq: u64,
}

impl StoreState {
    fn collection(&self, name: &str) -> Result<&Collection> {
        self.collections
            .get(name)
            .ok_or_else(|| LedgerError::BackingStore(format!("Collection '{}' not found", name)))
    }

    fn key_for(&self, collection: &str, row: &Row) -> Result<String> {
        let schema = self.catalog.get(collection)?;
        match row.get(schema.key_field()) {
            Some(JsonValue::String(key)) if !key.is_empty() => Ok(key.clone()),
            Some(JsonValue::Number(key)) => Ok(key.to_string()),
            _ => Err(LedgerError::BackingStore(format!(
                "Row for '{}' is missing key field '{}'",
                collection,
                schema.key_field()
            ))),
        }
    }

    fn committed_version(&self, collection: &str, key: &str) -> Option<u64> {
        self.collections
            .get(collection)
            .and_then(|coll| coll.rows.get(key))
            .map(|stored| stored.version)
    }

    /// Committed rows overlaid with the transaction's own staged writes.
    fn visible_rows(
        &self,
        tx: Option<TransactionId>,
        collection: &str,
    ) -> Result<BTreeMap<String, Row>> {
        let coll = self.collection(collection)?;
        let mut rows: BTreeMap<String, Row> = coll
            .rows
            .iter()
            .map(|(key, stored)| (key.clone(), stored.row.clone()))
            .collect();

        if let Some(tx) = tx {
            let txn = self.transactions.get(tx)?;
            for change in txn.staged_in(collection) {
                match change {
                    Change::Put { key, row, .. } => {
                        rows.insert(key.clone(), row.clone());
                    }
                    Change::Remove { key, .. } => {
                        rows.remove(key);
                    }
                }
            }
        }
        Ok(rows)
    }

    fn matching(
        &self,
        tx: Option<TransactionId>,
        collection: &str,
        predicate: &Predicate,
    ) -> Result<Vec<(String, Row)>> {
        Ok(self
            .visible_rows(tx, collection)?
            .into_iter()
            .filter(|(_, row)| predicate.matches(row))
            .collect())
    }

    /// Stages the changes in `tx`, or applies them at once when `tx` is `None`.
    fn write(&mut self, tx: Option<TransactionId>, changes: Vec<Change>) -> Result<()> {
        match tx {
            Some(tx) => {
                let observed: Vec<Option<u64>> = changes
                    .iter()
                    .map(|change| self.committed_version(change.collection(), change.key()))
                    .collect();
                let txn = self.transactions.get_mut(tx)?;
                for (change, version) in changes.into_iter().zip(observed) {
                    txn.observe(change.collection(), change.key(), version);
                    txn.stage(change)?;
                }
                Ok(())
            }
            None => self.apply(changes),
        }
    }

    fn apply(&mut self, changes: Vec<Change>) -> Result<()> {
        if changes.is_empty() {
            return Ok(());
        }
        for change in &changes {
            self.collection(change.collection())?;
        }

        self.commit_seq += 1;
        let version = self.commit_seq;
        for change in changes {
            let Some(coll) = self.collections.get_mut(change.collection()) else {
                continue;
            };
            match change {
                Change::Put { key, row, .. } => {
                    coll.rows.insert(key, StoredRow { row, version });
                }
                Change::Remove { key, .. } => {
                    coll.rows.remove(&key);
                }
            }
        }
        Ok(())
    }
}

/// Reference engine keeping every collection in memory.
///
/// Transactions stage writes privately and see their own writes on read.
/// Commit is first-committer-wins: if any row the transaction wrote was
/// committed by someone else after this transaction first touched it, the
/// commit fails with a write conflict and nothing is applied.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<StoreState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed rows in a collection.
    pub async fn row_count(&self, collection: &str) -> Result<usize> {
        let state = self.state.read().await;
        Ok(state.collection(collection)?.rows.len())
    }

    pub async fn collection_names(&self) -> Vec<String> {
        self.state.read().await.catalog.names()
    }

    pub async fn transaction_stats(&self) -> TransactionStats {
        self.state.read().await.transactions.stats()
    }
}

#[async_trait]
impl StorageEngine for InMemoryStore {
    async fn ensure_collection(&self, schema: CollectionSchema) -> Result<()> {
        let mut state = self.state.write().await;
        state.catalog = state.catalog.clone().with_collection(schema.clone())?;
        state
            .collections
            .entry(schema.name().to_string())
            .or_insert_with(|| Collection {
                schema,
                rows: BTreeMap::new(),
            });
        Ok(())
    }

    async fn begin(&self) -> Result<TransactionId> {
        let mut state = self.state.write().await;
        let tx = state.transactions.begin();
        debug!("begin {}", tx);
        Ok(tx)
    }

    async fn commit(&self, tx: TransactionId) -> Result<()> {
        let mut state = self.state.write().await;
        let mut txn = state.transactions.take(tx)?;

        let conflict = txn.observed().find_map(|((collection, key), seen)| {
            let current = state.committed_version(collection, key);
            (current != *seen).then(|| LedgerError::write_conflict(collection, key))
        });
        if let Some(err) = conflict {
            txn.rollback()?;
            state.transactions.record_abort();
            warn!("commit of {} rejected: {}", txn.id(), err);
            return Err(err);
        }

        let changes = txn.commit()?;
        let change_count = changes.len();
        state.apply(changes)?;
        state.transactions.record_commit();
        debug!(
            "commit {} applied {} change(s) in {:?}",
            txn.id(),
            change_count,
            txn.duration()
        );
        Ok(())
    }

    async fn rollback(&self, tx: TransactionId) -> Result<()> {
        let mut state = self.state.write().await;
        let mut txn = state.transactions.take(tx)?;
        txn.rollback()?;
        state.transactions.record_abort();
        debug!("rollback {}", tx);
        Ok(())
    }

    async fn upsert(&self, tx: Option<TransactionId>, collection: &str, row: Row) -> Result<()> {
        let mut state = self.state.write().await;
        let key = state.key_for(collection, &row)?;
        state.write(
            tx,
            vec![Change::Put {
                collection: collection.to_string(),
                key,
                row,
            }],
        )
    }

    async fn insert(&self, tx: Option<TransactionId>, collection: &str, row: Row) -> Result<()> {
        let mut state = self.state.write().await;
        let key = state.key_for(collection, &row)?;
        if state.visible_rows(tx, collection)?.contains_key(&key) {
            return Err(LedgerError::BackingStore(format!(
                "Duplicate key '{}' in collection '{}'",
                key, collection
            )));
        }
        state.write(
            tx,
            vec![Change::Put {
                collection: collection.to_string(),
                key,
                row,
            }],
        )
    }

    async fn select(
        &self,
        tx: Option<TransactionId>,
        collection: &str,
        predicate: &Predicate,
        options: &SelectOptions,
    ) -> Result<Vec<Row>> {
        let state = self.state.read().await;
        let rows = state
            .matching(tx, collection, predicate)?
            .into_iter()
            .map(|(_, row)| row)
            .collect();
        Ok(options.apply(rows))
    }

    async fn delete(
        &self,
        tx: Option<TransactionId>,
        collection: &str,
        predicate: &Predicate,
    ) -> Result<u64> {
        let mut state = self.state.write().await;
        let changes: Vec<Change> = state
            .matching(tx, collection, predicate)?
            .into_iter()
            .map(|(key, _)| Change::Remove {
                collection: collection.to_string(),
                key,
            })
            .collect();
        let removed = changes.len() as u64;
        state.write(tx, changes)?;
        Ok(removed)
    }

    async fn update_where(
        &self,
        tx: Option<TransactionId>,
        collection: &str,
        predicate: &Predicate,
        patch: Row,
    ) -> Result<u64> {
        let mut state = self.state.write().await;
        let key_field = state.collection(collection)?.schema.key_field().to_string();
        if patch.contains_key(&key_field) {
            return Err(LedgerError::BackingStore(format!(
                "update_where on '{}' cannot change key field '{}'",
                collection, key_field
            )));
        }

        let changes: Vec<Change> = state
            .matching(tx, collection, predicate)?
            .into_iter()
            .map(|(key, mut row)| {
                for (field, value) in &patch {
                    row.insert(field.clone(), value.clone());
                }
                Change::Put {
                    collection: collection.to_string(),
                    key,
                    row,
                }
            })
            .collect();
        let updated = changes.len() as u64;
        state.write(tx, changes)?;
        Ok(updated)
    }
}
