use super::{LedgerError, Result};
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};

pub type JsonValue = serde_json::Value;

/// A stored record: a flat JSON object keyed by field name.
pub type Row = serde_json::Map<String, JsonValue>;

/// Encodes a timestamp the way every row stores it.
///
/// Fixed microsecond precision with a `Z` suffix keeps lexical order equal to
/// chronological order, so range predicates can compare the strings directly.
pub fn timestamp_value(ts: DateTime<Utc>) -> JsonValue {
    JsonValue::String(ts.to_rfc3339_opts(SecondsFormat::Micros, true))
}

/// Truncates to the precision rows keep, so a value survives a store round trip unchanged.
pub fn stored_precision(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.trunc_subsecs(6)
}

pub fn optional_timestamp_value(ts: Option<DateTime<Utc>>) -> JsonValue {
    ts.map(timestamp_value).unwrap_or(JsonValue::Null)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|err| LedgerError::BackingStore(format!("invalid timestamp '{raw}': {err}")))
}

pub fn row_str<'a>(row: &'a Row, field: &str) -> Option<&'a str> {
    row.get(field).and_then(JsonValue::as_str)
}

pub fn row_string(row: &Row, field: &str) -> Option<String> {
    row_str(row, field).map(str::to_string)
}

pub fn row_i64(row: &Row, field: &str) -> Option<i64> {
    row.get(field).and_then(JsonValue::as_i64)
}

pub fn row_bool(row: &Row, field: &str) -> bool {
    row.get(field).and_then(JsonValue::as_bool).unwrap_or(false)
}

pub fn row_timestamp(row: &Row, field: &str) -> Result<Option<DateTime<Utc>>> {
    match row.get(field) {
        None | Some(JsonValue::Null) => Ok(None),
        Some(JsonValue::String(raw)) => parse_timestamp(raw).map(Some),
        Some(other) => Err(LedgerError::BackingStore(format!(
            "field '{field}' holds {other}, expected a timestamp"
        ))),
    }
}

/// Reads a mandatory string field, failing with a store error naming the collection.
pub fn require_str<'a>(row: &'a Row, field: &str, collection: &str) -> Result<&'a str> {
    row_str(row, field).ok_or_else(|| {
        LedgerError::BackingStore(format!(
            "row in '{collection}' is missing required field '{field}'"
        ))
    })
}

/// Converts a serializable value into a row, rejecting non-object payloads.
pub fn to_row<T: serde::Serialize>(value: &T, what: &str) -> Result<Row> {
    match serde_json::to_value(value)? {
        JsonValue::Object(map) => Ok(map),
        other => Err(LedgerError::Validation(format!(
            "{what} must serialize to a JSON object, got {}",
            json_type_name(&other)
        ))),
    }
}

pub fn json_type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn timestamps_sort_lexically() {
        let earlier = Utc.with_ymd_and_hms(2026, 1, 9, 23, 59, 59).unwrap();
        let later = Utc.with_ymd_and_hms(2026, 1, 10, 0, 0, 0).unwrap();
        let a = timestamp_value(earlier);
        let b = timestamp_value(later);
        assert!(a.as_str().unwrap() < b.as_str().unwrap());
        assert_eq!(parse_timestamp(b.as_str().unwrap()).unwrap(), later);
    }

    #[test]
    fn row_accessors_tolerate_missing_fields() {
        let row = json!({"name": "x", "version": 3, "is_deleted": true})
            .as_object()
            .cloned()
            .unwrap();
        assert_eq!(row_str(&row, "name"), Some("x"));
        assert_eq!(row_i64(&row, "version"), Some(3));
        assert!(row_bool(&row, "is_deleted"));
        assert!(!row_bool(&row, "missing"));
        assert_eq!(row_timestamp(&row, "deleted_at").unwrap(), None);
        assert!(require_str(&row, "id", "aggregates").is_err());
    }

    #[test]
    fn to_row_rejects_scalars() {
        let err = to_row(&42, "entity").unwrap_err();
        assert!(err.to_string().contains("JSON object"));
    }
}
