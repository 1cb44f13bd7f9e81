use super::model::{AggregateRoot, CHILD_ROW_KEY, ChildEntity};
use crate::config::ChildCollection;
use crate::core::{LedgerError, Result, SharedClock, stored_precision};
use crate::storage::{CollectionSchema, OrderBy, Predicate, SelectOptions, StoreSession};
use log::debug;

/// Keeps an aggregate's child rows in step with its in-memory child set.
///
/// Replacement is always total: every stored child of the aggregate is
/// removed from every child collection, then the current set is inserted.
#[derive(Debug, Clone)]
pub struct ChildSetCoordinator {
    collections: Vec<ChildCollection>,
    clock: SharedClock,
}

impl ChildSetCoordinator {
    pub fn new(collections: Vec<ChildCollection>, clock: SharedClock) -> Self {
        Self { collections, clock }
    }

    pub fn collections(&self) -> &[ChildCollection] {
        &self.collections
    }

    pub async fn ensure_schema(&self, session: &StoreSession) -> Result<()> {
        for child in &self.collections {
            session
                .ensure_collection(CollectionSchema::new(&child.collection, CHILD_ROW_KEY))
                .await?;
        }
        Ok(())
    }

    fn collection_for(&self, kind: &str) -> Result<&str> {
        self.collections
            .iter()
            .find(|child| child.kind == kind)
            .map(|child| child.collection.as_str())
            .ok_or_else(|| {
                LedgerError::Validation(format!("no child collection configured for kind '{}'", kind))
            })
    }

    /// Rewrites the stored children of `aggregate`, returning them as stored.
    pub async fn replace(
        &self,
        aggregate: &AggregateRoot,
        session: &StoreSession,
    ) -> Result<Vec<ChildEntity>> {
        let targets = aggregate
            .children
            .iter()
            .map(|child| self.collection_for(&child.kind))
            .collect::<Result<Vec<_>>>()?;
        let now = stored_precision(self.clock.now());

        session
            .run_transaction(|tx| async move {
                self.remove_all(&aggregate.id, &tx).await?;

                let mut stored = Vec::with_capacity(aggregate.children.len());
                for (position, (child, collection)) in
                    aggregate.children.iter().zip(targets).enumerate()
                {
                    let mut child = child.clone();
                    child.position = position as i64;
                    child.created_at = Some(child.created_at.unwrap_or(now));
                    child.updated_at = Some(now);
                    tx.insert(collection, child.to_row()).await?;
                    stored.push(child);
                }
                debug!(
                    "replaced children of '{}' with {} row(s)",
                    aggregate.id,
                    stored.len()
                );
                Ok(stored)
            })
            .await
    }

    /// Reads children from every collection in configuration order, then
    /// restores the aggregate's ordering by position.
    pub async fn load(&self, aggregate_id: &str, session: &StoreSession) -> Result<Vec<ChildEntity>> {
        let by_parent = Predicate::eq("parent_id", aggregate_id);
        let options = SelectOptions::new().order_by(OrderBy::asc("position"));

        let mut children = Vec::new();
        for child in &self.collections {
            let rows = session.select(&child.collection, &by_parent, &options).await?;
            for row in &rows {
                children.push(ChildEntity::from_row(row, &child.collection)?);
            }
        }
        children.sort_by_key(|child| child.position);
        Ok(children)
    }

    /// Deletes every child row of the aggregate, returning how many went.
    pub async fn remove_all(&self, aggregate_id: &str, session: &StoreSession) -> Result<u64> {
        let by_parent = Predicate::eq("parent_id", aggregate_id);
        let mut removed = 0;
        for child in &self.collections {
            removed += session.delete(&child.collection, &by_parent).await?;
        }
        Ok(removed)
    }
}
