//! Conjunctive equality / range filters over named row fields.

use std::cmp::Ordering;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(String, JsonValue),
    Gte(String, JsonValue),
    Lte(String, JsonValue),
}

/// All conditions must hold. An empty filter matches every row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<Condition>,
}

fn to_json(value: impl Serialize) -> JsonValue {
    serde_json::to_value(value).unwrap_or(JsonValue::Null)
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Serialize) -> Self {
        self.conditions.push(Condition::Eq(field.into(), to_json(value)));
        self
    }

    pub fn gte(mut self, field: impl Into<String>, value: impl Serialize) -> Self {
        self.conditions.push(Condition::Gte(field.into(), to_json(value)));
        self
    }

    pub fn lte(mut self, field: impl Into<String>, value: impl Serialize) -> Self {
        self.conditions.push(Condition::Lte(field.into(), to_json(value)));
        self
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn matches(&self, row: &JsonValue) -> bool {
        self.conditions.iter().all(|c| match c {
            Condition::Eq(field, want) => compare(row.get(field), want) == Some(Ordering::Equal),
            Condition::Gte(field, bound) => matches!(
                compare(row.get(field), bound),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Condition::Lte(field, bound) => matches!(
                compare(row.get(field), bound),
                Some(Ordering::Less | Ordering::Equal)
            ),
        })
    }
}

fn as_decimal(value: &JsonValue) -> Option<Decimal> {
    match value {
        JsonValue::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        JsonValue::String(s) => Decimal::from_str(s).ok(),
        _ => None,
    }
}

/// Decimals compare numerically (they serialize as strings), other strings
/// lexically, which orders ISO-8601 dates correctly.
fn compare(field: Option<&JsonValue>, other: &JsonValue) -> Option<Ordering> {
    let field = field?;
    if let (Some(a), Some(b)) = (as_decimal(field), as_decimal(other)) {
        return Some(a.cmp(&b));
    }
    match (field, other) {
        (JsonValue::String(a), JsonValue::String(b)) => Some(a.cmp(b)),
        (JsonValue::Bool(a), JsonValue::Bool(b)) => Some(a.cmp(b)),
        (a, b) if a == b => Some(Ordering::Equal),
        _ => None,
    }
}
