use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::record::Record;

/// Comparison operators understood by the query builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    /// Substring match; `%` markers are stripped, not interpreted as globs.
    Like,
    /// Case-insensitive [`FilterOp::Like`].
    Ilike,
    /// Membership in an array value.
    In,
}

/// One `column <op> value` predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    pub fn new(column: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    /// Returns true if `row` satisfies this predicate. Missing columns read as `null`.
    pub fn matches(&self, row: &Record) -> bool {
        let field = row.get(&self.column).unwrap_or(&Value::Null);
        match self.op {
            FilterOp::Eq => values_equal(field, &self.value),
            FilterOp::Neq => !values_equal(field, &self.value),
            FilterOp::Gt => compare_same_kind(field, &self.value) == Some(Ordering::Greater),
            FilterOp::Gte => matches!(
                compare_same_kind(field, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            FilterOp::Lt => compare_same_kind(field, &self.value) == Some(Ordering::Less),
            FilterOp::Lte => matches!(
                compare_same_kind(field, &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            FilterOp::Like => contains(field, &self.value, false),
            FilterOp::Ilike => contains(field, &self.value, true),
            FilterOp::In => match &self.value {
                Value::Array(items) => items.iter().any(|item| values_equal(field, item)),
                _ => false,
            },
        }
    }
}

/// Keeps rows that satisfy every filter.
pub fn apply_filters(rows: &[Record], filters: &[Filter]) -> Vec<Record> {
    rows.iter()
        .filter(|row| filters.iter().all(|f| f.matches(row)))
        .cloned()
        .collect()
}

/// Equality with numeric normalization, so `1` equals `1.0`.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}

/// Ordering between two values of the same JSON kind; `None` across kinds.
fn compare_same_kind(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn kind_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order used by `order()`: null < bool < number < string < array < object.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    compare_same_kind(a, b).unwrap_or_else(|| {
        let by_kind = kind_rank(a).cmp(&kind_rank(b));
        if by_kind == Ordering::Equal {
            a.to_string().cmp(&b.to_string())
        } else {
            by_kind
        }
    })
}

fn contains(field: &Value, pattern: &Value, case_insensitive: bool) -> bool {
    let haystack = match field {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return false,
    };
    let needle = match pattern {
        Value::String(s) => s.replace('%', ""),
        other => other.to_string().replace('%', ""),
    };
    if case_insensitive {
        haystack.to_lowercase().contains(&needle.to_lowercase())
    } else {
        haystack.contains(&needle)
    }
}
