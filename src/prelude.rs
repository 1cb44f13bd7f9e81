//! Recommended imports grouped by abstraction level.
//!
//! `facade` covers application code that saves aggregates and auditable
//! entities. `components` exposes the building blocks the facades compose,
//! for callers wiring their own storage engine or store.

pub mod facade {
    //! Everything needed to open a store and run audited operations.
    pub use crate::{
        AggregateCriteria, AggregateRoot, AggregateStore, AuditContext, AuditOperation,
        AuditQuery, AuditableRecord, AuditedRecord, AuditedStore, ChildEntity, EntityCriteria,
        LedgerConfig, LedgerError, ReadAuditMode, Result,
    };
}

pub mod components {
    //! Lower-level pieces: storage, transactions, and the individual
    //! consistency and audit components.
    pub use crate::aggregate::{ChildSetCoordinator, ConcurrencyGuard, ConsistencyValidator};
    pub use crate::audit::{AuditChange, AuditLedger};
    pub use crate::core::{Clock, ManualClock, SharedClock, SystemClock};
    pub use crate::lifecycle::{LifecycleManager, RetentionPolicy};
    pub use crate::storage::{
        CollectionSchema, InMemoryStore, OrderBy, Predicate, SelectOptions, StorageEngine,
        StoreSession,
    };
}
