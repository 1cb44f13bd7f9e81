use super::entry::{AuditEntry, AuditOperation};
use crate::core::timestamp_value;
use crate::storage::Predicate;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, BTreeSet};

/// Filters for [`super::AuditLedger::query`]. Unset filters match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditQuery {
    pub entity_id: Option<String>,
    pub entity_type: Option<String>,
    pub operation: Option<AuditOperation>,
    pub user_id: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    /// Restrict to the configured trailing window
    pub rapid_operations: bool,
}

impl AuditQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entity_id(mut self, id: impl Into<String>) -> Self {
        self.entity_id = Some(id.into());
        self
    }

    pub fn entity_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self
    }

    pub fn operation(mut self, operation: AuditOperation) -> Self {
        self.operation = Some(operation);
        self
    }

    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn between(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    pub fn since(mut self, from: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self
    }

    pub fn until(mut self, to: DateTime<Utc>) -> Self {
        self.to = Some(to);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn rapid_operations(mut self) -> Self {
        self.rapid_operations = true;
        self
    }

    /// Row filter for this query. `now - rapid_window` tightens the lower
    /// bound when rapid operations are requested.
    pub(crate) fn predicate(&self, now: DateTime<Utc>, rapid_window: Duration) -> Predicate {
        let mut predicate = Predicate::All;
        if let Some(id) = &self.entity_id {
            predicate = predicate.and(Predicate::eq("entity_id", id.as_str()));
        }
        if let Some(entity_type) = &self.entity_type {
            predicate = predicate.and(Predicate::eq("entity_type", entity_type.as_str()));
        }
        if let Some(operation) = self.operation {
            predicate = predicate.and(Predicate::eq("operation", operation.as_str()));
        }
        if let Some(user_id) = &self.user_id {
            predicate = predicate.and(Predicate::eq("user_id", user_id.as_str()));
        }

        let window_start = self
            .rapid_operations
            .then(|| now.checked_sub_signed(rapid_window))
            .flatten();
        let from = match (self.from, window_start) {
            (Some(from), Some(start)) => Some(from.max(start)),
            (from, start) => from.or(start),
        };
        if let Some(from) = from {
            predicate = predicate.and(Predicate::gte("created_at", timestamp_value(from)));
        }
        if let Some(to) = self.to {
            predicate = predicate.and(Predicate::lte("created_at", timestamp_value(to)));
        }
        predicate
    }
}

/// Aggregate view over an entity's audit trail.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditSummary {
    pub total_operations: usize,
    pub operation_counts: BTreeMap<AuditOperation, usize>,
    pub first_operation: Option<DateTime<Utc>>,
    pub last_operation: Option<DateTime<Utc>>,
    pub unique_users: usize,
}

impl AuditSummary {
    pub fn from_entries(entries: &[AuditEntry]) -> Self {
        let mut operation_counts = BTreeMap::new();
        let mut users = BTreeSet::new();
        for entry in entries {
            *operation_counts.entry(entry.operation).or_insert(0) += 1;
            if let Some(user) = entry.context.user_id.as_deref() {
                users.insert(user);
            }
        }
        Self {
            total_operations: entries.len(),
            operation_counts,
            first_operation: entries.iter().map(|e| e.created_at).min(),
            last_operation: entries.iter().map(|e| e.created_at).max(),
            unique_users: users.len(),
        }
    }

    pub fn count(&self, operation: AuditOperation) -> usize {
        self.operation_counts.get(&operation).copied().unwrap_or(0)
    }
}

/// A user whose operation count inside the rapid window reached a threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct SuspiciousActivity {
    pub user_id: String,
    pub operation_count: usize,
    pub window: Duration,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub entity_ids: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Row;
    use chrono::TimeZone;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 10, minute, 0).unwrap()
    }

    fn row_at(ts: DateTime<Utc>) -> Row {
        let mut row = Row::new();
        row.insert("created_at".into(), timestamp_value(ts));
        row.insert("user_id".into(), "u-1".into());
        row
    }

    #[test]
    fn rapid_window_tightens_the_lower_bound() {
        let predicate = AuditQuery::new()
            .user_id("u-1")
            .since(at(0))
            .rapid_operations()
            .predicate(at(30), Duration::minutes(5));
        assert!(predicate.matches(&row_at(at(26))));
        assert!(!predicate.matches(&row_at(at(20))));
    }

    #[test]
    fn date_range_is_inclusive() {
        let predicate = AuditQuery::new()
            .between(at(10), at(20))
            .predicate(at(59), Duration::minutes(5));
        assert!(predicate.matches(&row_at(at(10))));
        assert!(predicate.matches(&row_at(at(20))));
        assert!(!predicate.matches(&row_at(at(21))));
    }
}
