// ============================================================================
// Transaction Management Module
// ============================================================================
//
// Staged-write transactions with first-committer-wins conflict detection.
//
// - State: Active -> Committed / Aborted
// - Change: staged row mutations applied on commit
// - Manager: registry of in-flight transactions for one engine
//
// ============================================================================

pub mod change;
pub mod manager;
pub mod state;

pub use change::Change;
pub use manager::{TransactionManager, TransactionStats};
pub use state::{RowRef, Transaction, TransactionId, TransactionState};
