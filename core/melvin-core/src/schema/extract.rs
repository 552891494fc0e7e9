//! Extraction rules — raw record fields → typed measure and dimension values.

use super::{DimensionDef, DomainSchema, Extraction, FieldType, MeasureDef};
use crate::error::{MelvinError, MelvinResult};
use crate::record::Record;
use crate::time::parse_absolute_time;
use crate::value::{GroupKey, Value};
use rust_decimal::Decimal;
use smallvec::{SmallVec, smallvec};
use std::collections::BTreeMap;

impl DomainSchema {
    /// Numeric contribution of `measure` for one record (`None` if absent).
    pub fn measure_value(&self, measure: &MeasureDef, record: &Record) -> Option<Decimal> {
        match &measure.source {
            None => Some(Decimal::ONE),
            Some(Extraction::Field(field)) => match record.get(field) {
                Some(v) => v.as_decimal(),
                // a count measure over an absent field still counts the record
                None if measure.field_type == FieldType::Count => Some(Decimal::ONE),
                None => None,
            },
            Some(Extraction::RecordTime) => None,
        }
    }

    /// Grouping values of `dimension` for one record.
    ///
    /// Multi-categorical dimensions yield one value per tag; a missing field
    /// yields a single `Null`.
    pub fn dimension_values(&self, dimension: &DimensionDef, record: &Record) -> SmallVec<[Value; 1]> {
        match self.dimension_value(dimension, record) {
            Value::Tags(tags) if !tags.is_empty() => tags.into_iter().map(Value::Str).collect(),
            Value::Tags(_) => smallvec![Value::Null],
            other => smallvec![other],
        }
    }

    /// Every group key a record contributes to under `dimensions`.
    ///
    /// The cross product of each dimension's values: a record tagged `[a, b]`
    /// lands in both the `a` and the `b` group.
    pub fn group_keys(&self, dimensions: &[&DimensionDef], record: &Record) -> Vec<GroupKey> {
        let mut keys: Vec<GroupKey> = vec![GroupKey::new()];
        for dimension in dimensions {
            let values = self.dimension_values(dimension, record);
            if values.len() == 1 {
                for key in &mut keys {
                    key.push(values[0].clone());
                }
                continue;
            }
            keys = keys
                .iter()
                .flat_map(|key| {
                    values.iter().map(move |v| {
                        let mut next = key.clone();
                        next.push(v.clone());
                        next
                    })
                })
                .collect();
        }
        keys
    }

    /// Filter view of `dimension` for one record; tag sets stay whole.
    pub fn dimension_value(&self, dimension: &DimensionDef, record: &Record) -> Value {
        let raw = match &dimension.source {
            Extraction::RecordTime => Value::Int(record.timestamp),
            Extraction::Field(field) => match record.get(field) {
                Some(v) => v.clone(),
                None => return Value::Null,
            },
        };

        match dimension.field_type {
            FieldType::Categorical => match raw {
                Value::Str(_) | Value::Null => raw,
                Value::Tags(_) => Value::Str(raw.to_string()),
                other => Value::Str(other.to_string()),
            },
            FieldType::MultiCategorical => match raw {
                Value::Str(s) => Value::Tags(std::iter::once(s).collect()),
                Value::Tags(_) | Value::Null => raw,
                other => Value::Tags(std::iter::once(other.to_string()).collect()),
            },
            FieldType::Boolean => match raw {
                Value::Bool(_) => raw,
                Value::Str(s) => match s.as_str() {
                    "true" | "yes" | "1" => Value::Bool(true),
                    "false" | "no" | "0" => Value::Bool(false),
                    _ => Value::Null,
                },
                Value::Int(i) => Value::Bool(i != 0),
                _ => Value::Null,
            },
            FieldType::Date | FieldType::Datetime => {
                let granularity = dimension
                    .granularity
                    .unwrap_or(crate::time::Granularity::Day);
                match temporal_millis(&raw) {
                    Some(ts) => Value::Str(granularity.period_key(ts)),
                    None => Value::Null,
                }
            }
            _ => Value::Null,
        }
    }

    /// Checks declared source fields of an incoming record against their types.
    pub fn check_fields(&self, fields: &BTreeMap<String, Value>) -> MelvinResult<()> {
        for m in self.measures.values() {
            if let Some(Extraction::Field(field)) = &m.source
                && let Some(v) = fields.get(field)
                && !matches!(v, Value::Int(_) | Value::Decimal(_) | Value::Null)
            {
                return Err(mismatch(field, m.field_type.as_str(), v));
            }
        }
        for d in self.dimensions.values() {
            let Extraction::Field(field) = &d.source else {
                continue;
            };
            let Some(v) = fields.get(field) else {
                continue;
            };
            let ok = match d.field_type {
                FieldType::Categorical => !matches!(v, Value::Tags(_)),
                FieldType::MultiCategorical => matches!(v, Value::Tags(_) | Value::Str(_) | Value::Null),
                FieldType::Boolean => matches!(v, Value::Bool(_) | Value::Null),
                FieldType::Date | FieldType::Datetime => {
                    v.is_null() || temporal_millis(v).is_some()
                }
                _ => true,
            };
            if !ok {
                return Err(mismatch(field, d.field_type.as_str(), v));
            }
        }
        Ok(())
    }
}

/// Epoch milliseconds of a temporal raw value (integer millis or a time string).
fn temporal_millis(raw: &Value) -> Option<i64> {
    match raw {
        Value::Int(ms) => Some(*ms),
        Value::Decimal(ms) => Some(*ms as i64),
        Value::Str(s) => parse_absolute_time(s),
        _ => None,
    }
}

fn mismatch(field: &str, expected: &str, actual: &Value) -> MelvinError {
    MelvinError::TypeMismatch {
        field: field.to_string(),
        expected: expected.to_string(),
        actual: actual.type_name().to_string(),
    }
}
