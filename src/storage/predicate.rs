//! Row filters and ordering understood by every storage engine.
//!
//! Engines evaluate predicates against JSON rows; a missing field behaves as
//! NULL. Range comparisons never match NULL or values of a different kind.

use crate::core::value::{comparable, compare_values, values_equal};
use crate::core::{JsonValue, Row};
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Matches every row.
    All,
    Eq(String, JsonValue),
    Ne(String, JsonValue),
    In(String, Vec<JsonValue>),
    Gte(String, JsonValue),
    Lte(String, JsonValue),
    NotNull(String),
    And(Vec<Predicate>),
}

impl Predicate {
    pub fn eq(field: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Self::Eq(field.into(), value.into())
    }

    pub fn ne(field: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Self::Ne(field.into(), value.into())
    }

    pub fn is_in<I, V>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<JsonValue>,
    {
        Self::In(field.into(), values.into_iter().map(Into::into).collect())
    }

    pub fn gte(field: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Self::Gte(field.into(), value.into())
    }

    pub fn lte(field: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Self::Lte(field.into(), value.into())
    }

    pub fn not_null(field: impl Into<String>) -> Self {
        Self::NotNull(field.into())
    }

    /// Conjunction that flattens nested `And`s and drops `All`.
    pub fn and(self, other: Predicate) -> Self {
        let mut terms = Vec::new();
        for term in [self, other] {
            match term {
                Predicate::All => {}
                Predicate::And(inner) => terms.extend(inner),
                other => terms.push(other),
            }
        }
        match terms.len() {
            0 => Predicate::All,
            1 => terms.remove(0),
            _ => Predicate::And(terms),
        }
    }

    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Predicate::All => true,
            Predicate::Eq(field, value) => values_equal(field_value(row, field), value),
            Predicate::Ne(field, value) => !values_equal(field_value(row, field), value),
            Predicate::In(field, values) => {
                let actual = field_value(row, field);
                values.iter().any(|candidate| values_equal(actual, candidate))
            }
            Predicate::Gte(field, value) => matches!(
                comparable(field_value(row, field), value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Predicate::Lte(field, value) => matches!(
                comparable(field_value(row, field), value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Predicate::NotNull(field) => !field_value(row, field).is_null(),
            Predicate::And(terms) => terms.iter().all(|term| term.matches(row)),
        }
    }
}

fn field_value<'a>(row: &'a Row, field: &str) -> &'a JsonValue {
    static NULL: JsonValue = JsonValue::Null;
    row.get(field).unwrap_or(&NULL)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub direction: SortDirection,
}

impl OrderBy {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// Limit and ordering for `select`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectOptions {
    pub limit: Option<usize>,
    pub order: Vec<OrderBy>,
}

impl SelectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn maybe_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order.push(order);
        self
    }

    /// Sorts (stable, multi-key, NULLs last in ascending order) and truncates.
    pub fn apply(&self, mut rows: Vec<Row>) -> Vec<Row> {
        if !self.order.is_empty() {
            rows.sort_by(|left, right| {
                for order in &self.order {
                    let ordering = compare_values(
                        field_value(left, &order.field),
                        field_value(right, &order.field),
                    );
                    let ordering = match order.direction {
                        SortDirection::Asc => ordering,
                        SortDirection::Desc => ordering.reverse(),
                    };
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                Ordering::Equal
            });
        }
        if let Some(limit) = self.limit {
            rows.truncate(limit);
        }
        rows
    }
}
