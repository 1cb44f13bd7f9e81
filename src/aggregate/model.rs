use crate::core::{
    JsonValue, Result, Row, optional_timestamp_value, row_i64, row_string, row_timestamp,
    types::require_str,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Child kind used when none is given.
pub const DEFAULT_CHILD_KIND: &str = "child";

/// Field that keys child rows. Children of different aggregates may reuse an
/// id, so the stored key is scoped by parent.
pub(crate) const CHILD_ROW_KEY: &str = "row_key";

fn default_kind() -> String {
    DEFAULT_CHILD_KIND.to_string()
}

/// An entity owned by exactly one aggregate root. It has no lifecycle of its
/// own and is always rewritten together with its parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildEntity {
    pub id: String,
    pub parent_id: String,
    /// Selects the child collection the row is stored in
    #[serde(default = "default_kind")]
    pub kind: String,
    /// Index within the parent, stamped on save
    #[serde(default)]
    pub position: i64,
    #[serde(default)]
    pub attributes: Row,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ChildEntity {
    pub fn new(id: impl Into<String>, parent_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            parent_id: parent_id.into(),
            kind: default_kind(),
            position: 0,
            attributes: Row::new(),
            created_at: None,
            updated_at: None,
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub(crate) fn row_key(parent_id: &str, id: &str) -> String {
        format!("{}/{}", parent_id, id)
    }

    pub(crate) fn to_row(&self) -> Row {
        let mut row = Row::new();
        row.insert(
            CHILD_ROW_KEY.into(),
            Self::row_key(&self.parent_id, &self.id).into(),
        );
        row.insert("id".into(), self.id.clone().into());
        row.insert("parent_id".into(), self.parent_id.clone().into());
        row.insert("kind".into(), self.kind.clone().into());
        row.insert("position".into(), self.position.into());
        row.insert(
            "attributes".into(),
            JsonValue::Object(self.attributes.clone()),
        );
        row.insert("created_at".into(), optional_timestamp_value(self.created_at));
        row.insert("updated_at".into(), optional_timestamp_value(self.updated_at));
        row
    }

    pub(crate) fn from_row(row: &Row, collection: &str) -> Result<Self> {
        Ok(Self {
            id: require_str(row, "id", collection)?.to_string(),
            parent_id: require_str(row, "parent_id", collection)?.to_string(),
            kind: row_string(row, "kind").unwrap_or_else(default_kind),
            position: row_i64(row, "position").unwrap_or(0),
            attributes: object_field(row, "attributes"),
            created_at: row_timestamp(row, "created_at")?,
            updated_at: row_timestamp(row, "updated_at")?,
        })
    }
}

/// The consistency boundary: a root record and its bounded set of children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRoot {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub attributes: Row,
    #[serde(default)]
    pub children: Vec<ChildEntity>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl AggregateRoot {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: 0,
            status: None,
            attributes: Row::new(),
            children: Vec::new(),
            created_at: None,
            updated_at: None,
        }
    }

    pub fn with_version(mut self, version: i64) -> Self {
        self.version = version;
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Adds a child of the default kind parented to this aggregate.
    pub fn with_child(mut self, child_id: impl Into<String>) -> Self {
        let child = ChildEntity::new(child_id, self.id.clone());
        self.children.push(child);
        self
    }

    pub fn push_child(&mut self, child: ChildEntity) {
        self.children.push(child);
    }

    pub(crate) fn to_row(&self) -> Row {
        let mut row = Row::new();
        row.insert("id".into(), self.id.clone().into());
        row.insert("name".into(), self.name.clone().into());
        row.insert("version".into(), self.version.into());
        row.insert(
            "status".into(),
            self.status.clone().map(JsonValue::String).unwrap_or(JsonValue::Null),
        );
        row.insert(
            "attributes".into(),
            JsonValue::Object(self.attributes.clone()),
        );
        row.insert("created_at".into(), optional_timestamp_value(self.created_at));
        row.insert("updated_at".into(), optional_timestamp_value(self.updated_at));
        row
    }

    /// Rebuilds the root from its row; children are loaded separately.
    pub(crate) fn from_row(row: &Row, collection: &str) -> Result<Self> {
        Ok(Self {
            id: require_str(row, "id", collection)?.to_string(),
            name: require_str(row, "name", collection)?.to_string(),
            version: row_i64(row, "version").unwrap_or(0),
            status: row_string(row, "status"),
            attributes: object_field(row, "attributes"),
            children: Vec::new(),
            created_at: row_timestamp(row, "created_at")?,
            updated_at: row_timestamp(row, "updated_at")?,
        })
    }
}

fn object_field(row: &Row, field: &str) -> Row {
    row.get(field)
        .and_then(JsonValue::as_object)
        .cloned()
        .unwrap_or_default()
}

/// Filter for `find_many`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregateCriteria {
    pub status: Option<String>,
    pub ids: Option<Vec<String>>,
    pub limit: Option<usize>,
    /// Load children for every match; off by default
    pub include_children: bool,
}

impl AggregateCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn include_children(mut self, include: bool) -> Self {
        self.include_children = include;
        self
    }

    /// Requested limit, defaulted and clamped to `[1, max_limit]`.
    pub fn effective_limit(&self, default_limit: usize, max_limit: usize) -> usize {
        self.limit.unwrap_or(default_limit).clamp(1, max_limit.max(1))
    }
}
