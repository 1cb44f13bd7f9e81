use crate::core::JsonValue;
use std::cmp::Ordering;

/// Total order over JSON scalars used by predicates and `ORDER BY`.
///
/// NULL (or a missing field) sorts after every other value. Values of different
/// kinds are ordered by kind so sorting never fails.
pub fn compare_values(left: &JsonValue, right: &JsonValue) -> Ordering {
    match (left, right) {
        (JsonValue::Null, JsonValue::Null) => Ordering::Equal,
        (JsonValue::Null, _) => Ordering::Greater,
        (_, JsonValue::Null) => Ordering::Less,

        (JsonValue::Number(a), JsonValue::Number(b)) => {
            match (a.as_i64(), b.as_i64()) {
                (Some(a), Some(b)) => a.cmp(&b),
                _ => {
                    let a = a.as_f64().unwrap_or(f64::NAN);
                    let b = b.as_f64().unwrap_or(f64::NAN);
                    // NaN sorts last, like NULL
                    match (a.is_nan(), b.is_nan()) {
                        (true, true) => Ordering::Equal,
                        (true, false) => Ordering::Greater,
                        (false, true) => Ordering::Less,
                        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
                    }
                }
            }
        }
        (JsonValue::String(a), JsonValue::String(b)) => a.cmp(b),
        (JsonValue::Bool(a), JsonValue::Bool(b)) => a.cmp(b),

        _ => kind_rank(left).cmp(&kind_rank(right)),
    }
}

/// Equality with numeric coercion (`1` equals `1.0`).
pub fn values_equal(left: &JsonValue, right: &JsonValue) -> bool {
    match (left, right) {
        (JsonValue::Number(_), JsonValue::Number(_)) => {
            compare_values(left, right) == Ordering::Equal
        }
        _ => left == right,
    }
}

/// Ordering for range predicates: `None` when either side is NULL or the
/// kinds differ, so `deleted_at < x` never matches a row without `deleted_at`.
pub fn comparable(left: &JsonValue, right: &JsonValue) -> Option<Ordering> {
    match (left, right) {
        (JsonValue::Number(_), JsonValue::Number(_))
        | (JsonValue::String(_), JsonValue::String(_))
        | (JsonValue::Bool(_), JsonValue::Bool(_)) => Some(compare_values(left, right)),
        _ => None,
    }
}

fn kind_rank(value: &JsonValue) -> u8 {
    match value {
        JsonValue::Bool(_) => 0,
        JsonValue::Number(_) => 1,
        JsonValue::String(_) => 2,
        JsonValue::Array(_) => 3,
        JsonValue::Object(_) => 4,
        JsonValue::Null => 5,
    }
}
