pub mod catalog;
pub mod engine;
pub mod memory;
pub mod predicate;
pub mod session;

pub use catalog::{Catalog, CollectionSchema};
pub use engine::StorageEngine;
pub use memory::InMemoryStore;
pub use predicate::{OrderBy, Predicate, SelectOptions, SortDirection};
pub use session::StoreSession;
