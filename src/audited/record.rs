use crate::core::{
    JsonValue, LedgerError, Result, Row, row_i64, row_string, row_timestamp, to_row,
};
use crate::lifecycle::{SOFT_DELETE_FIELDS, SoftDeleteState};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Key field of every auditable collection.
pub const RECORD_KEY_FIELD: &str = "id";

/// Bookkeeping columns the store owns on every auditable row.
pub const BOOKKEEPING_FIELDS: [&str; 5] =
    ["version", "created_at", "created_by", "updated_at", "updated_by"];

/// An entity whose every mutation must leave an audit entry.
pub trait AuditableRecord: Serialize + DeserializeOwned + Clone + Send + Sync {
    /// Name the audit trail files entries under
    const ENTITY_TYPE: &'static str;

    /// Collection holding the entity rows
    const COLLECTION: &'static str;

    fn record_id(&self) -> String;
}

/// A loaded entity together with the bookkeeping the store keeps for it.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditedRecord<T> {
    pub id: String,
    pub entity: T,
    pub version: i64,
    pub created_at: Option<DateTime<Utc>>,
    pub created_by: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
    pub updated_by: Option<String>,
    pub deletion: SoftDeleteState,
}

impl<T> AuditedRecord<T> {
    pub fn is_deleted(&self) -> bool {
        self.deletion.is_deleted
    }
}

fn is_reserved(field: &str) -> bool {
    BOOKKEEPING_FIELDS.contains(&field) || SOFT_DELETE_FIELDS.contains(&field)
}

/// The entity's own fields as a row, keyed by its record id.
pub(crate) fn entity_row<T: AuditableRecord>(entity: &T) -> Result<Row> {
    let id = entity.record_id();
    if id.trim().is_empty() {
        return Err(LedgerError::Validation(format!(
            "{} id is required",
            T::ENTITY_TYPE
        )));
    }

    let mut row = to_row(entity, T::ENTITY_TYPE)?;
    if let Some(field) = row.keys().find(|field| is_reserved(field)) {
        return Err(LedgerError::Validation(format!(
            "{} uses reserved field '{}'",
            T::ENTITY_TYPE,
            field
        )));
    }
    match row.get(RECORD_KEY_FIELD) {
        Some(JsonValue::String(own)) if own != &id => {
            return Err(LedgerError::Validation(format!(
                "{} field '{}' is '{}' but record id is '{}'",
                T::ENTITY_TYPE,
                RECORD_KEY_FIELD,
                own,
                id
            )));
        }
        _ => {}
    }
    row.insert(RECORD_KEY_FIELD.into(), id.into());
    Ok(row)
}

/// The entity fields of a stored row, bookkeeping removed.
pub(crate) fn data_fields(row: &Row) -> Row {
    row.iter()
        .filter(|(field, _)| !is_reserved(field))
        .map(|(field, value)| (field.clone(), value.clone()))
        .collect()
}

pub(crate) fn record_from_row<T: AuditableRecord>(row: &Row) -> Result<AuditedRecord<T>> {
    let entity: T = serde_json::from_value(JsonValue::Object(data_fields(row))).map_err(|err| {
        LedgerError::BackingStore(format!(
            "stored {} row does not decode: {}",
            T::ENTITY_TYPE,
            err
        ))
    })?;
    Ok(AuditedRecord {
        id: row_string(row, RECORD_KEY_FIELD).unwrap_or_else(|| entity.record_id()),
        entity,
        version: row_i64(row, "version").unwrap_or(0),
        created_at: row_timestamp(row, "created_at")?,
        created_by: row_string(row, "created_by"),
        updated_at: row_timestamp(row, "updated_at")?,
        updated_by: row_string(row, "updated_by"),
        deletion: SoftDeleteState::from_row(row)?,
    })
}

/// Filter for `find_all`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityCriteria {
    pub ids: Option<Vec<String>>,
    pub include_deleted: bool,
    pub limit: Option<usize>,
}

impl EntityCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn include_deleted(mut self, include: bool) -> Self {
        self.include_deleted = include;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn effective_limit(&self, default_limit: usize, max_limit: usize) -> usize {
        self.limit.unwrap_or(default_limit).clamp(1, max_limit.max(1))
    }
}
