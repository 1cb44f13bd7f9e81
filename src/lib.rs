// ============================================================================
// Aggregate Ledger Library
// ============================================================================
//
// Consistency and audit core for aggregate persistence:
//
// - aggregate roots and bounded child sets saved as one unit
// - optimistic concurrency with a conditional write
// - append-only audit trail written in the same transaction as the change
// - soft delete with retention-gated permanent removal
//
// The storage layer is a trait; `InMemoryStore` is the bundled engine.
//
// ============================================================================

pub mod aggregate;
pub mod audit;
pub mod audited;
pub mod config;
pub mod core;
pub mod lifecycle;
pub mod prelude;
pub mod storage;
pub mod transaction;

// Re-export main types for convenience
pub use aggregate::{
    AggregateCriteria, AggregateRoot, AggregateStore, ChildEntity, ChildSetCoordinator,
    ConcurrencyGuard, ConsistencyValidator,
};
pub use audit::{
    AuditChange, AuditContext, AuditEntry, AuditLedger, AuditOperation, AuditQuery, AuditSummary,
    SuspiciousActivity, changed_fields,
};
pub use audited::{AuditableRecord, AuditedRecord, AuditedStore, EntityCriteria};
pub use config::{ChildCollection, LedgerConfig, ReadAuditMode};
pub use crate::core::{
    Clock, ErrorKind, JsonValue, LedgerError, ManualClock, Result, Row, SharedClock, SystemClock,
};
pub use lifecycle::{LifecycleManager, RetentionPolicy, SoftDeleteState};
pub use storage::{InMemoryStore, Predicate, StorageEngine, StoreSession};
