//! Predicate evaluation over records and index rows.
//!
//! Missing values are `Null`: `=` and ordering comparisons are false, `!=` is
//! true. Tag sets compare by membership.

use crate::index::DimProjection;
use crate::query::{CompareOp, FieldRef, Predicate};
use crate::record::Record;
use crate::schema::DomainSchema;
use crate::value::Value;
use std::cmp::Ordering;

/// Anything a predicate can read field values from.
pub trait FieldSource {
    fn value(&self, field: &FieldRef) -> Value;
}

/// Record view through the domain's extraction rules.
pub struct RecordFields<'a> {
    pub schema: &'a DomainSchema,
    pub record: &'a Record,
}

impl FieldSource for RecordFields<'_> {
    fn value(&self, field: &FieldRef) -> Value {
        match field {
            FieldRef::Time => Value::Int(self.record.timestamp),
            FieldRef::Dimension(name) => self
                .schema
                .dimension(name)
                .map(|d| self.schema.dimension_value(d, self.record))
                .unwrap_or(Value::Null),
            FieldRef::Measure(name) => self
                .schema
                .measure(name)
                .and_then(|m| {
                    self.schema
                        .measure_value(m, self.record)
                        .map(|v| Value::from_decimal(v, m.is_integral()))
                })
                .unwrap_or(Value::Null),
        }
    }
}

/// Index row view; `columns` maps filter dimensions onto the stored key.
pub struct RowFields<'a> {
    pub key: &'a [Value],
    pub columns: &'a [(String, DimProjection)],
}

impl FieldSource for RowFields<'_> {
    fn value(&self, field: &FieldRef) -> Value {
        let FieldRef::Dimension(name) = field else {
            return Value::Null;
        };
        self.columns
            .iter()
            .find(|(dim, _)| dim == name)
            .map(|(_, projection)| projection.apply(self.key))
            .unwrap_or(Value::Null)
    }
}

/// Evaluates `predicate`, short-circuiting `and`/`or`.
pub fn evaluate(predicate: &Predicate, source: &dyn FieldSource) -> bool {
    match predicate {
        Predicate::And(l, r) => evaluate(l, source) && evaluate(r, source),
        Predicate::Or(l, r) => evaluate(l, source) || evaluate(r, source),
        Predicate::Not(inner) => !evaluate(inner, source),
        Predicate::Compare { field, op, value } => compare(&source.value(field), *op, value),
        Predicate::In { field, values } => {
            let actual = source.value(field);
            values.iter().any(|v| compare(&actual, CompareOp::Eq, v))
        }
        Predicate::Contains { field, value } => match (source.value(field), value.as_str()) {
            (Value::Tags(tags), Some(needle)) => tags.contains(needle),
            (Value::Str(s), Some(needle)) => s.contains(needle),
            _ => false,
        },
        Predicate::Matches { field, pattern } => match source.value(field) {
            Value::Str(s) => pattern.is_match(&s),
            Value::Tags(tags) => tags.iter().any(|t| pattern.is_match(t)),
            _ => false,
        },
        Predicate::Between { field, low, high } => {
            let actual = source.value(field);
            compare(&actual, CompareOp::Ge, low) && compare(&actual, CompareOp::Le, high)
        }
    }
}

fn compare(actual: &Value, op: CompareOp, literal: &Value) -> bool {
    if let Value::Tags(tags) = actual {
        let member = literal.as_str().is_some_and(|s| tags.contains(s));
        return match op {
            CompareOp::Eq => member,
            CompareOp::Ne => !member,
            _ => false,
        };
    }
    match (order(actual, literal), op) {
        (None, CompareOp::Ne) => true,
        (None, _) => false,
        (Some(ord), CompareOp::Eq) => ord == Ordering::Equal,
        (Some(ord), CompareOp::Ne) => ord != Ordering::Equal,
        (Some(ord), CompareOp::Gt) => ord == Ordering::Greater,
        (Some(ord), CompareOp::Lt) => ord == Ordering::Less,
        (Some(ord), CompareOp::Ge) => ord != Ordering::Less,
        (Some(ord), CompareOp::Le) => ord != Ordering::Greater,
    }
}

/// `None` when the values are not comparable (nulls, mixed kinds).
fn order(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, _) | (_, Value::Null) => None,
        (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
        (Value::Int(_) | Value::Decimal(_), Value::Int(_) | Value::Decimal(_)) => {
            a.as_f64()?.partial_cmp(&b.as_f64()?)
        }
        (Value::Str(x), Value::Str(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}
