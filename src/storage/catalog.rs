use crate::core::{LedgerError, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Declares a collection and the field that uniquely keys its rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSchema {
    name: String,
    key_field: String,
}

impl CollectionSchema {
    pub fn new(name: impl Into<String>, key_field: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_field: key_field.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key_field(&self) -> &str {
        &self.key_field
    }
}

/// Collection metadata. Copy-on-write so readers can hold a cheap clone.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    collections: Arc<HashMap<String, CollectionSchema>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a collection. Re-registering the same schema is a no-op;
    /// registering a different key field for an existing name is an error.
    pub fn with_collection(self, schema: CollectionSchema) -> Result<Self> {
        if let Some(existing) = self.collections.get(schema.name()) {
            if existing == &schema {
                return Ok(self);
            }
            return Err(LedgerError::BackingStore(format!(
                "Collection '{}' already keyed by '{}', cannot re-key by '{}'",
                schema.name(),
                existing.key_field(),
                schema.key_field()
            )));
        }

        let mut collections = (*self.collections).clone();
        collections.insert(schema.name().to_string(), schema);
        Ok(Self {
            collections: Arc::new(collections),
        })
    }

    pub fn get(&self, name: &str) -> Result<&CollectionSchema> {
        self.collections
            .get(name)
            .ok_or_else(|| LedgerError::BackingStore(format!("Collection '{}' not found", name)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.collections.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.keys().cloned().collect();
        names.sort();
        names
    }
}
