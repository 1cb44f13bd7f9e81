pub mod manager;
pub mod retention;
pub mod state;

pub use manager::LifecycleManager;
pub use retention::{DEFAULT_RETENTION_DAYS, RetentionPolicy};
pub use state::{SOFT_DELETE_FIELDS, SoftDeleteState};
