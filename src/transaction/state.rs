// ============================================================================
// Transaction State Management
// ============================================================================
//
// Each transaction moves through Active -> Committed/Aborted and carries a
// private write set. Writes stay invisible to other sessions until commit.
//
// For every row a transaction writes, the committed row version observed at
// first touch is remembered. Commit compares those against the current
// committed versions (first committer wins).
//
// ============================================================================

use super::Change;
use crate::core::{LedgerError, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

/// Global transaction ID counter
static NEXT_TXN_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Generate a new unique transaction ID
    pub fn new() -> Self {
        TransactionId(NEXT_TXN_ID.fetch_add(1, Ordering::SeqCst))
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "txn_{}", self.0)
    }
}

/// Transaction state
///
/// ```text
/// Active ──commit──> Committed
///   │
///   └──rollback──> Aborted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    Aborted,
}

impl TransactionState {
    pub fn is_active(&self) -> bool {
        matches!(self, TransactionState::Active)
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionState::Active => write!(f, "ACTIVE"),
            TransactionState::Committed => write!(f, "COMMITTED"),
            TransactionState::Aborted => write!(f, "ABORTED"),
        }
    }
}

/// (collection, row key)
pub type RowRef = (String, String);

#[derive(Debug)]
pub struct Transaction {
    id: TransactionId,
    state: TransactionState,

    /// Latest staged change per row. Later writes to the same row replace
    /// earlier ones, so commit applies exactly one change per row.
    write_set: BTreeMap<RowRef, Change>,

    /// Committed version of each written row when this transaction first
    /// touched it (`None` = row did not exist).
    observed: HashMap<RowRef, Option<u64>>,

    start_time: std::time::Instant,
}

impl Transaction {
    pub fn new(id: TransactionId) -> Self {
        Self {
            id,
            state: TransactionState::Active,
            write_set: BTreeMap::new(),
            observed: HashMap::new(),
            start_time: std::time::Instant::now(),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Records the committed version of a row the first time it is touched.
    pub fn observe(&mut self, collection: &str, key: &str, committed_version: Option<u64>) {
        self.observed
            .entry((collection.to_string(), key.to_string()))
            .or_insert(committed_version);
    }

    pub fn stage(&mut self, change: Change) -> Result<()> {
        self.ensure_active()?;
        let row_ref = (change.collection().to_string(), change.key().to_string());
        self.write_set.insert(row_ref, change);
        Ok(())
    }

    /// Staged changes for one collection, in key order.
    pub fn staged_in<'a>(&'a self, collection: &'a str) -> impl Iterator<Item = &'a Change> + 'a {
        self.write_set
            .iter()
            .filter(move |((coll, _), _)| coll == collection)
            .map(|(_, change)| change)
    }

    pub fn observed(&self) -> impl Iterator<Item = (&RowRef, &Option<u64>)> {
        self.observed.iter()
    }

    pub fn duration(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    /// Marks the transaction committed and hands back its write set.
    pub fn commit(&mut self) -> Result<Vec<Change>> {
        self.ensure_active()?;
        self.state = TransactionState::Committed;
        Ok(std::mem::take(&mut self.write_set).into_values().collect())
    }

    pub fn rollback(&mut self) -> Result<()> {
        self.ensure_active()?;
        self.state = TransactionState::Aborted;
        self.write_set.clear();
        self.observed.clear();
        Ok(())
    }

    fn ensure_active(&self) -> Result<()> {
        if self.state.is_active() {
            Ok(())
        } else {
            Err(LedgerError::BackingStore(format!(
                "Transaction {} is not active ({})",
                self.id, self.state
            )))
        }
    }
}
