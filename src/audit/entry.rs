use super::context::AuditContext;
use crate::core::{
    JsonValue, LedgerError, Result, Row, optional_timestamp_value, row_bool, row_string,
    row_timestamp, timestamp_value, types::require_str,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditOperation {
    Create,
    Update,
    Delete,
    Restore,
    Read,
}

impl AuditOperation {
    pub const ALL: [AuditOperation; 5] = [
        Self::Create,
        Self::Update,
        Self::Delete,
        Self::Restore,
        Self::Read,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Restore => "RESTORE",
            Self::Read => "READ",
        }
    }
}

impl fmt::Display for AuditOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditOperation {
    type Err = LedgerError;

    fn from_str(raw: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|op| op.as_str().eq_ignore_ascii_case(raw))
            .ok_or_else(|| LedgerError::BackingStore(format!("unknown audit operation '{}'", raw)))
    }
}

/// One immutable audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub audit_id: String,
    pub entity_id: String,
    pub entity_type: String,
    pub operation: AuditOperation,
    pub old_values: Option<Row>,
    pub new_values: Option<Row>,
    pub changed_fields: Vec<String>,
    pub context: AuditContext,
    pub created_at: DateTime<Utc>,
    pub is_system_operation: bool,
    /// Tie-breaker for entries written within the same microsecond
    pub sequence: u64,
}

impl AuditEntry {
    pub(crate) fn to_row(&self) -> Row {
        let mut row = Row::new();
        row.insert("audit_id".into(), self.audit_id.clone().into());
        row.insert("entity_id".into(), self.entity_id.clone().into());
        row.insert("entity_type".into(), self.entity_type.clone().into());
        row.insert("operation".into(), self.operation.as_str().into());
        row.insert("old_values".into(), snapshot_value(&self.old_values));
        row.insert("new_values".into(), snapshot_value(&self.new_values));
        row.insert(
            "changed_fields".into(),
            JsonValue::Array(self.changed_fields.iter().cloned().map(JsonValue::String).collect()),
        );

        let ctx = &self.context;
        row.insert("user_id".into(), text_value(&ctx.user_id));
        row.insert("user_role".into(), text_value(&ctx.user_role));
        row.insert("session_id".into(), text_value(&ctx.session_id));
        row.insert("ip_address".into(), text_value(&ctx.ip_address));
        row.insert("user_agent".into(), text_value(&ctx.user_agent));
        row.insert("operation_timestamp".into(), optional_timestamp_value(ctx.timestamp));
        row.insert("operation_label".into(), text_value(&ctx.operation));
        row.insert("operation_reason".into(), text_value(&ctx.reason));
        row.insert(
            "operation_metadata".into(),
            ctx.metadata.clone().unwrap_or(JsonValue::Null),
        );

        row.insert("is_system_operation".into(), self.is_system_operation.into());
        row.insert("created_at".into(), timestamp_value(self.created_at));
        row.insert("sequence".into(), self.sequence.into());
        row
    }

    pub(crate) fn from_row(row: &Row, collection: &str) -> Result<Self> {
        let created_at = row_timestamp(row, "created_at")?.ok_or_else(|| {
            LedgerError::BackingStore(format!("audit row in '{}' has no created_at", collection))
        })?;
        let changed_fields = row
            .get("changed_fields")
            .and_then(JsonValue::as_array)
            .map(|fields| {
                fields
                    .iter()
                    .filter_map(JsonValue::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let metadata = match row.get("operation_metadata") {
            None | Some(JsonValue::Null) => None,
            Some(value) => Some(value.clone()),
        };

        Ok(Self {
            audit_id: require_str(row, "audit_id", collection)?.to_string(),
            entity_id: require_str(row, "entity_id", collection)?.to_string(),
            entity_type: require_str(row, "entity_type", collection)?.to_string(),
            operation: require_str(row, "operation", collection)?.parse()?,
            old_values: snapshot_field(row, "old_values"),
            new_values: snapshot_field(row, "new_values"),
            changed_fields,
            context: AuditContext {
                user_id: row_string(row, "user_id"),
                user_role: row_string(row, "user_role"),
                session_id: row_string(row, "session_id"),
                ip_address: row_string(row, "ip_address"),
                user_agent: row_string(row, "user_agent"),
                timestamp: row_timestamp(row, "operation_timestamp")?,
                operation: row_string(row, "operation_label"),
                reason: row_string(row, "operation_reason"),
                metadata,
            },
            created_at,
            is_system_operation: row_bool(row, "is_system_operation"),
            sequence: row.get("sequence").and_then(JsonValue::as_u64).unwrap_or(0),
        })
    }

    pub fn user_id(&self) -> &str {
        self.context.user()
    }
}

fn snapshot_value(values: &Option<Row>) -> JsonValue {
    values
        .as_ref()
        .map(|row| JsonValue::Object(row.clone()))
        .unwrap_or(JsonValue::Null)
}

fn snapshot_field(row: &Row, field: &str) -> Option<Row> {
    row.get(field).and_then(JsonValue::as_object).cloned()
}

fn text_value(value: &Option<String>) -> JsonValue {
    value.clone().map(JsonValue::String).unwrap_or(JsonValue::Null)
}
