// ============================================================================
// Transaction Manager
// ============================================================================

use super::{Transaction, TransactionId, TransactionState};
use crate::core::{LedgerError, Result};
use std::collections::HashMap;

/// Registry of in-flight transactions for one storage engine.
///
/// The manager is owned by the engine state and mutated under the engine's
/// lock, so it needs no synchronization of its own.
#[derive(Debug, Default)]
pub struct TransactionManager {
    transactions: HashMap<TransactionId, Transaction>,
    committed: u64,
    aborted: u64,
}

impl TransactionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&mut self) -> TransactionId {
        let id = TransactionId::new();
        self.transactions.insert(id, Transaction::new(id));
        id
    }

    pub fn get(&self, id: TransactionId) -> Result<&Transaction> {
        self.transactions
            .get(&id)
            .ok_or_else(|| LedgerError::BackingStore(format!("Transaction {} not found", id)))
    }

    pub fn get_mut(&mut self, id: TransactionId) -> Result<&mut Transaction> {
        let transaction = self
            .transactions
            .get_mut(&id)
            .ok_or_else(|| LedgerError::BackingStore(format!("Transaction {} not found", id)))?;

        if transaction.state() != TransactionState::Active {
            return Err(LedgerError::BackingStore(format!(
                "Transaction {} is not active",
                id
            )));
        }
        Ok(transaction)
    }

    /// Removes a transaction so its outcome can be applied; the caller
    /// must finish it with [`Self::record_commit`] or [`Self::record_abort`].
    pub fn take(&mut self, id: TransactionId) -> Result<Transaction> {
        self.transactions
            .remove(&id)
            .ok_or_else(|| LedgerError::BackingStore(format!("Transaction {} not found", id)))
    }

    pub fn record_commit(&mut self) {
        self.committed += 1;
    }

    pub fn record_abort(&mut self) {
        self.aborted += 1;
    }

    pub fn active_count(&self) -> usize {
        self.transactions.len()
    }

    pub fn stats(&self) -> TransactionStats {
        TransactionStats {
            active: self.transactions.len(),
            committed: self.committed,
            aborted: self.aborted,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionStats {
    pub active: usize,
    pub committed: u64,
    pub aborted: u64,
}
