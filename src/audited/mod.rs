pub mod record;
pub mod store;

pub use record::{
    AuditableRecord, AuditedRecord, BOOKKEEPING_FIELDS, EntityCriteria, RECORD_KEY_FIELD,
};
pub use store::AuditedStore;
