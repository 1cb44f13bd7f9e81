use super::model::AggregateRoot;
use crate::core::{LedgerError, Result};
use std::collections::HashSet;

pub const DEFAULT_MAX_CHILDREN: usize = 5;

/// Checks aggregate invariants before anything touches the store.
#[derive(Debug, Clone, Copy)]
pub struct ConsistencyValidator {
    max_children: usize,
}

impl Default for ConsistencyValidator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CHILDREN)
    }
}

impl ConsistencyValidator {
    pub fn new(max_children: usize) -> Self {
        Self { max_children }
    }

    pub fn max_children(&self) -> usize {
        self.max_children
    }

    pub fn validate(&self, aggregate: &AggregateRoot) -> Result<()> {
        validate_with_limit(aggregate, self.max_children)
    }
}

/// Validates against the default child limit.
pub fn validate(aggregate: &AggregateRoot) -> Result<()> {
    validate_with_limit(aggregate, DEFAULT_MAX_CHILDREN)
}

pub fn validate_with_limit(aggregate: &AggregateRoot, max_children: usize) -> Result<()> {
    if aggregate.id.is_empty() {
        return Err(LedgerError::Validation("aggregate id is required".into()));
    }
    if aggregate.name.is_empty() {
        return Err(LedgerError::Validation("aggregate name is required".into()));
    }
    if aggregate.version < 0 {
        return Err(LedgerError::Validation(format!(
            "aggregate version must not be negative, got {}",
            aggregate.version
        )));
    }
    if aggregate.children.len() > max_children {
        return Err(LedgerError::Validation(format!(
            "too many children (maximum {} allowed)",
            max_children
        )));
    }

    let mut seen = HashSet::with_capacity(aggregate.children.len());
    for child in &aggregate.children {
        if child.id.is_empty() {
            return Err(LedgerError::Validation("child id is required".into()));
        }
        if child.parent_id != aggregate.id {
            return Err(LedgerError::Validation(format!(
                "child '{}' belongs to '{}', not to aggregate '{}'",
                child.id, child.parent_id, aggregate.id
            )));
        }
        if !seen.insert(child.id.as_str()) {
            return Err(LedgerError::Validation(format!(
                "duplicate child id '{}'",
                child.id
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::model::ChildEntity;

    fn with_children(count: usize) -> AggregateRoot {
        (0..count).fold(AggregateRoot::new("agg-1", "Order"), |agg, i| {
            agg.with_child(format!("c{}", i))
        })
    }

    #[test]
    fn accepts_up_to_the_limit() {
        assert!(validate(&with_children(0)).is_ok());
        assert!(validate(&with_children(5)).is_ok());
    }

    #[test]
    fn rejects_too_many_children() {
        let err = validate(&with_children(6)).unwrap_err();
        assert_eq!(
            err,
            LedgerError::Validation("too many children (maximum 5 allowed)".into())
        );
    }

    #[test]
    fn rejects_empty_identity() {
        let err = validate(&AggregateRoot::new("", "Order")).unwrap_err();
        assert_eq!(err.message(), "aggregate id is required");
        let err = validate(&AggregateRoot::new("agg-1", "")).unwrap_err();
        assert_eq!(err.message(), "aggregate name is required");
        assert!(validate(&AggregateRoot::new("agg-1", "Order").with_version(-1)).is_err());
        // only the empty string is rejected
        assert!(validate(&AggregateRoot::new("agg-1", " ")).is_ok());
    }

    #[test]
    fn rejects_foreign_and_duplicate_children() {
        let mut agg = AggregateRoot::new("agg-1", "Order");
        agg.push_child(ChildEntity::new("c1", "agg-2"));
        assert!(validate(&agg).unwrap_err().message().contains("belongs to"));

        let agg = AggregateRoot::new("agg-1", "Order")
            .with_child("c1")
            .with_child("c1");
        assert!(validate(&agg).unwrap_err().message().contains("duplicate child"));
    }

    #[test]
    fn custom_limit() {
        let validator = ConsistencyValidator::new(2);
        assert!(validator.validate(&with_children(3)).is_err());
    }
}
