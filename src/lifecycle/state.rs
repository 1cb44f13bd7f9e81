use crate::core::{
    JsonValue, Result, Row, optional_timestamp_value, row_bool, row_string, row_timestamp,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const SOFT_DELETE_FIELDS: [&str; 5] = [
    "is_deleted",
    "deleted_at",
    "deleted_by",
    "deletion_reason",
    "scheduled_purge_at",
];

/// Soft-delete bookkeeping carried as plain fields on every auditable row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoftDeleteState {
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<String>,
    pub deletion_reason: Option<String>,
    pub scheduled_purge_at: Option<DateTime<Utc>>,
}

impl SoftDeleteState {
    pub fn active() -> Self {
        Self::default()
    }

    pub fn deleted(at: DateTime<Utc>, by: impl Into<String>, reason: Option<String>) -> Self {
        Self {
            is_deleted: true,
            deleted_at: Some(at),
            deleted_by: Some(by.into()),
            deletion_reason: reason,
            scheduled_purge_at: None,
        }
    }

    pub fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            is_deleted: row_bool(row, "is_deleted"),
            deleted_at: row_timestamp(row, "deleted_at")?,
            deleted_by: row_string(row, "deleted_by"),
            deletion_reason: row_string(row, "deletion_reason"),
            scheduled_purge_at: row_timestamp(row, "scheduled_purge_at")?,
        })
    }

    /// Only the soft-delete fields, as stored.
    pub fn to_row(&self) -> Row {
        let mut row = Row::new();
        self.write_to(&mut row);
        row
    }

    pub fn write_to(&self, row: &mut Row) {
        row.insert("is_deleted".into(), self.is_deleted.into());
        row.insert("deleted_at".into(), optional_timestamp_value(self.deleted_at));
        row.insert("deleted_by".into(), text(&self.deleted_by));
        row.insert("deletion_reason".into(), text(&self.deletion_reason));
        row.insert(
            "scheduled_purge_at".into(),
            optional_timestamp_value(self.scheduled_purge_at),
        );
    }
}

fn text(value: &Option<String>) -> JsonValue {
    value.clone().map(JsonValue::String).unwrap_or(JsonValue::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn deletion_fields_survive_the_row_form() {
        let at = Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap();
        let active = SoftDeleteState::active();
        assert_eq!(SoftDeleteState::from_row(&active.to_row()).unwrap(), active);
        assert_eq!(active.to_row()["deleted_at"], JsonValue::Null);

        let mut state = SoftDeleteState::deleted(at, "u-1", Some("dup".into()));
        state.scheduled_purge_at = Some(at);
        assert_eq!(state.to_row().len(), SOFT_DELETE_FIELDS.len());

        assert_eq!(SoftDeleteState::from_row(&state.to_row()).unwrap(), state);
    }
}
