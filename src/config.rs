use crate::core::{LedgerError, Result};
use chrono::Duration;
use serde::Deserialize;
use std::collections::HashMap;

/// Longest retention period accepted, about a century
pub const MAX_RETENTION_DAYS: i64 = 36_500;

/// Longest rapid-operations window accepted, one year
pub const MAX_RAPID_WINDOW_SECS: i64 = 365 * 24 * 60 * 60;

/// Whether successful single-entity reads produce READ audit entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadAuditMode {
    #[default]
    Always,
    Disabled,
}

impl std::str::FromStr for ReadAuditMode {
    type Err = LedgerError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "always" | "on" | "true" => Ok(Self::Always),
            "disabled" | "off" | "false" => Ok(Self::Disabled),
            other => Err(LedgerError::Validation(format!(
                "unknown read audit mode '{}'",
                other
            ))),
        }
    }
}

/// Maps a child `kind` to the collection its rows live in.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChildCollection {
    pub kind: String,
    pub collection: String,
}

impl ChildCollection {
    pub fn new(kind: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            collection: collection.into(),
        }
    }
}

/// Ledger configuration
///
/// Built with chained setters, deserialized from JSON, or read from
/// `LEDGER_*` environment variables. Every field has a default.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Upper bound on children per aggregate
    pub max_children: usize,

    /// Days a soft-deleted entity must wait before hard delete
    pub retention_days: i64,

    pub read_audit: ReadAuditMode,

    /// Trailing window used for rapid-operation queries, in seconds
    pub rapid_operations_window_secs: i64,

    pub aggregate_default_limit: usize,
    pub aggregate_max_limit: usize,
    pub entity_default_limit: usize,
    pub entity_max_limit: usize,

    pub aggregate_collection: String,

    /// Child collections, read in this order when reconstituting
    pub child_collections: Vec<ChildCollection>,

    /// Default audit collection
    pub audit_collection: String,

    /// Per entity-type audit collection overrides
    pub audit_collections: HashMap<String, String>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_children: 5,
            retention_days: 30,
            read_audit: ReadAuditMode::Always,
            rapid_operations_window_secs: 5 * 60,
            aggregate_default_limit: 20,
            aggregate_max_limit: 100,
            entity_default_limit: 100,
            entity_max_limit: 1000,
            aggregate_collection: "aggregates".to_string(),
            child_collections: vec![ChildCollection::new("child", "aggregate_children")],
            audit_collection: "audit_log".to_string(),
            audit_collections: HashMap::new(),
        }
    }
}

impl LedgerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_children(mut self, max: usize) -> Self {
        self.max_children = max;
        self
    }

    pub fn retention_days(mut self, days: i64) -> Self {
        self.retention_days = days;
        self
    }

    pub fn read_audit(mut self, mode: ReadAuditMode) -> Self {
        self.read_audit = mode;
        self
    }

    pub fn rapid_operations_window(mut self, window: Duration) -> Self {
        self.rapid_operations_window_secs = window.num_seconds();
        self
    }

    pub fn aggregate_limits(mut self, default_limit: usize, max_limit: usize) -> Self {
        self.aggregate_default_limit = default_limit;
        self.aggregate_max_limit = max_limit;
        self
    }

    pub fn entity_limits(mut self, default_limit: usize, max_limit: usize) -> Self {
        self.entity_default_limit = default_limit;
        self.entity_max_limit = max_limit;
        self
    }

    pub fn aggregate_collection(mut self, name: impl Into<String>) -> Self {
        self.aggregate_collection = name.into();
        self
    }

    /// Replace the child collection list
    pub fn child_collections(mut self, collections: Vec<ChildCollection>) -> Self {
        self.child_collections = collections;
        self
    }

    pub fn audit_collection(mut self, name: impl Into<String>) -> Self {
        self.audit_collection = name.into();
        self
    }

    /// Route audit entries for one entity type to a dedicated collection
    pub fn audit_collection_override(
        mut self,
        entity_type: impl Into<String>,
        collection: impl Into<String>,
    ) -> Self {
        self.audit_collections
            .insert(entity_type.into(), collection.into());
        self
    }

    /// Saturates at [`MAX_RETENTION_DAYS`] for values `validate` would reject.
    pub fn retention_period(&self) -> Duration {
        bounded_days(self.retention_days.clamp(0, MAX_RETENTION_DAYS))
    }

    /// Saturates at [`MAX_RAPID_WINDOW_SECS`] for values `validate` would reject.
    pub fn rapid_window(&self) -> Duration {
        bounded_seconds(self.rapid_operations_window_secs.clamp(0, MAX_RAPID_WINDOW_SECS))
    }

    pub fn audit_collection_for(&self, entity_type: &str) -> &str {
        self.audit_collections
            .get(entity_type)
            .map(String::as_str)
            .unwrap_or(&self.audit_collection)
    }

    /// Every audit collection this configuration can write to, deduplicated
    pub fn audit_collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = std::iter::once(self.audit_collection.clone())
            .chain(self.audit_collections.values().cloned())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Parse from a JSON document; absent fields keep their defaults
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|e| LedgerError::Validation(format!("invalid ledger config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read overrides from `LEDGER_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup("LEDGER_MAX_CHILDREN") {
            config.max_children = parse_var("LEDGER_MAX_CHILDREN", &raw)?;
        }
        if let Some(raw) = lookup("LEDGER_RETENTION_DAYS") {
            config.retention_days = parse_var("LEDGER_RETENTION_DAYS", &raw)?;
        }
        if let Some(raw) = lookup("LEDGER_READ_AUDIT") {
            config.read_audit = raw.parse()?;
        }
        if let Some(raw) = lookup("LEDGER_RAPID_WINDOW_SECS") {
            config.rapid_operations_window_secs = parse_var("LEDGER_RAPID_WINDOW_SECS", &raw)?;
        }
        if let Some(raw) = lookup("LEDGER_AGGREGATE_COLLECTION") {
            config.aggregate_collection = raw;
        }
        if let Some(raw) = lookup("LEDGER_AUDIT_COLLECTION") {
            config.audit_collection = raw;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0..=MAX_RETENTION_DAYS).contains(&self.retention_days) {
            return Err(LedgerError::Validation(format!(
                "retention_days must be between 0 and {}",
                MAX_RETENTION_DAYS
            )));
        }
        if !(1..=MAX_RAPID_WINDOW_SECS).contains(&self.rapid_operations_window_secs) {
            return Err(LedgerError::Validation(format!(
                "rapid_operations_window_secs must be between 1 and {}",
                MAX_RAPID_WINDOW_SECS
            )));
        }
        if self.aggregate_default_limit > self.aggregate_max_limit
            || self.entity_default_limit > self.entity_max_limit
        {
            return Err(LedgerError::Validation(
                "default limit exceeds max limit".into(),
            ));
        }
        if self.aggregate_collection.trim().is_empty() || self.audit_collection.trim().is_empty()
        {
            return Err(LedgerError::Validation(
                "collection names must not be empty".into(),
            ));
        }
        let mut kinds: Vec<&str> = self.child_collections.iter().map(|c| c.kind.as_str()).collect();
        kinds.sort();
        if kinds.windows(2).any(|pair| pair[0] == pair[1]) {
            return Err(LedgerError::Validation(
                "child kinds must be unique".into(),
            ));
        }
        Ok(())
    }
}

fn bounded_days(days: i64) -> Duration {
    Duration::try_days(days).unwrap_or(Duration::MAX)
}

fn bounded_seconds(secs: i64) -> Duration {
    Duration::try_seconds(secs).unwrap_or(Duration::MAX)
}

fn parse_var<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| LedgerError::Validation(format!("{} has an invalid value '{}'", name, raw)))
}
