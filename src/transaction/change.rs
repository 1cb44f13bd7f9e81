// ============================================================================
// Transaction Change Tracking
// ============================================================================
//
// A Change is a staged row mutation. It is recorded while the transaction
// runs, applied on COMMIT and discarded on ROLLBACK.
//
// ============================================================================

use crate::core::Row;

#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// Insert or replace the row stored under `key`
    Put {
        collection: String,
        key: String,
        row: Row,
    },

    /// Remove the row stored under `key`
    Remove { collection: String, key: String },
}

impl Change {
    pub fn collection(&self) -> &str {
        match self {
            Change::Put { collection, .. } | Change::Remove { collection, .. } => collection,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Change::Put { key, .. } | Change::Remove { key, .. } => key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_accessors() {
        let put = Change::Put {
            collection: "audit_log".to_string(),
            key: "x".to_string(),
            row: Row::new(),
        };
        assert_eq!(put.collection(), "audit_log");
        assert_eq!(put.key(), "x");

        let remove = Change::Remove {
            collection: "aggregates".to_string(),
            key: "a1".to_string(),
        };
        assert_eq!(remove.collection(), "aggregates");
        assert_eq!(remove.key(), "a1");
    }
}
