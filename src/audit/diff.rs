use crate::core::{Row, values_equal};
use std::collections::BTreeSet;

/// Bookkeeping fields that never count as a change.
pub const IGNORED_FIELDS: [&str; 3] = ["updated_at", "updated_by", "version"];

/// Fields whose values differ between two snapshots, sorted.
///
/// A field present on one side only counts as changed. Either side may be
/// absent, which makes every field of the other side changed.
pub fn changed_fields(old: Option<&Row>, new: Option<&Row>) -> Vec<String> {
    let empty = Row::new();
    let old = old.unwrap_or(&empty);
    let new = new.unwrap_or(&empty);

    let keys: BTreeSet<&String> = old.keys().chain(new.keys()).collect();
    keys.into_iter()
        .filter(|key| !IGNORED_FIELDS.contains(&key.as_str()))
        .filter(|key| match (old.get(*key), new.get(*key)) {
            (Some(before), Some(after)) => !values_equal(before, after),
            _ => true,
        })
        .cloned()
        .collect()
}
