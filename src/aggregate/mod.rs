// ============================================================================
// Aggregate Module
// ============================================================================
//
// Aggregate roots and their bounded child sets, persisted as one unit.
//
// - Validator: invariants checked before any write
// - Children: full-replace persistence across child collections
// - Concurrency: version check plus conditional write
// - Store: the facade composing the above in one transaction
//
// ============================================================================

pub mod children;
pub mod concurrency;
pub mod model;
pub mod store;
pub mod validator;

pub use children::ChildSetCoordinator;
pub use concurrency::{CONCURRENT_MODIFICATION, ConcurrencyGuard, translate_conflict};
pub use model::{AggregateCriteria, AggregateRoot, ChildEntity, DEFAULT_CHILD_KIND};
pub use store::{AGGREGATE_ENTITY_TYPE, AggregateStore};
pub use validator::{ConsistencyValidator, DEFAULT_MAX_CHILDREN, validate, validate_with_limit};
