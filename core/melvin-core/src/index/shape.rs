//! Index shapes and roll-up projection.

use crate::error::{FieldKind, MelvinError, MelvinResult};
use crate::schema::{DomainSchema, FieldType};
use crate::time::Granularity;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// The set of dimensions an index groups by.
///
/// Identity ignores order (`{engine, day}` == `{day, engine}`); the declared
/// order is kept for display and for the layout of stored group keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexShape {
    dims: Vec<String>,
}

impl IndexShape {
    /// Builds a shape; duplicate names are dropped, first occurrence wins.
    pub fn new<I, S>(dims: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut unique: Vec<String> = Vec::new();
        for dim in dims {
            let dim = dim.into();
            if !unique.contains(&dim) {
                unique.push(dim);
            }
        }
        Self { dims: unique }
    }

    /// Parses `engine,day` (whitespace tolerant).
    pub fn parse(text: &str) -> Self {
        Self::new(text.split(',').map(str::trim).filter(|s| !s.is_empty()))
    }

    pub fn dims(&self) -> &[String] {
        &self.dims
    }

    pub fn len(&self) -> usize {
        self.dims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dims.is_empty()
    }

    pub fn contains(&self, dim: &str) -> bool {
        self.dims.iter().any(|d| d == dim)
    }

    pub fn position(&self, dim: &str) -> Option<usize> {
        self.dims.iter().position(|d| d == dim)
    }

    /// Order-insensitive identity, `day,engine` for `{engine, day}`.
    pub fn key(&self) -> String {
        let mut sorted: Vec<&str> = self.dims.iter().map(String::as_str).collect();
        sorted.sort_unstable();
        sorted.join(",")
    }

    /// Checks every dimension is declared in `schema`.
    pub fn validate(&self, schema: &DomainSchema) -> MelvinResult<()> {
        if self.dims.is_empty() {
            return Err(MelvinError::InvalidArgument(
                "an index needs at least one dimension".into(),
            ));
        }
        for dim in &self.dims {
            if schema.dimension(dim).is_none() {
                return Err(MelvinError::UnknownField {
                    kind: FieldKind::Dimension,
                    name: dim.clone(),
                    domain: schema.domain.clone(),
                    suggestion: crate::suggest::closest_match(
                        dim,
                        schema.dimensions.keys().map(String::as_str),
                        crate::suggest::DEFAULT_SIMILARITY_THRESHOLD,
                    ),
                });
            }
        }
        Ok(())
    }
}

impl PartialEq for IndexShape {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for IndexShape {}

impl Hash for IndexShape {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl fmt::Display for IndexShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.dims.join(", "))
    }
}

/// Where a requested dimension's value comes from in an index row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DimProjection {
    /// Position in the stored group key
    pub position: usize,
    /// Period-key coarsening `(from, to)` for hierarchy ancestors
    pub coarsen: Option<(Granularity, Granularity)>,
}

impl DimProjection {
    pub fn apply(&self, key: &[Value]) -> Value {
        let Some(raw) = key.get(self.position) else {
            return Value::Null;
        };
        match (self.coarsen, raw) {
            (Some((from, to)), Value::Str(period)) => to
                .coarsen(from, period)
                .map(Value::Str)
                .unwrap_or(Value::Null),
            _ => raw.clone(),
        }
    }
}

/// Maps each requested dimension onto a shape column, directly or through a
/// temporal hierarchy. `None` if some dimension cannot be derived.
pub fn project(requested: &[String], shape: &IndexShape, schema: &DomainSchema) -> Option<Vec<DimProjection>> {
    requested
        .iter()
        .map(|dim| project_one(dim, shape, schema))
        .collect()
}

fn project_one(dim: &str, shape: &IndexShape, schema: &DomainSchema) -> Option<DimProjection> {
    if let Some(position) = shape.position(dim) {
        return Some(DimProjection {
            position,
            coarsen: None,
        });
    }
    let target = schema.dimension(dim)?;
    let to = target.granularity?;
    shape.dims().iter().enumerate().find_map(|(position, name)| {
        let source = schema.dimension(name)?;
        if !source.is_temporal() || !source.hierarchy.iter().any(|h| h == dim) {
            return None;
        }
        Some(DimProjection {
            position,
            coarsen: Some((source.granularity?, to)),
        })
    })
}

/// True iff an index of `shape` can answer a grouping by `requested`.
///
/// Each requested dimension must be in the shape or be a hierarchy ancestor
/// of a temporal dimension in it. Shape dimensions that get collapsed must not
/// be multi-categorical: a record with several tags sits in several rows and
/// would be counted more than once.
pub fn can_roll_up(requested: &[String], shape: &IndexShape, schema: &DomainSchema) -> bool {
    if project(requested, shape, schema).is_none() {
        return false;
    }
    shape.dims().iter().all(|dim| {
        requested.contains(dim)
            || schema
                .dimension(dim)
                .is_some_and(|d| d.field_type != FieldType::MultiCategorical)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DimensionDef, MeasureDef};

    fn schema() -> DomainSchema {
        DomainSchema::new("qa")
            .with_measure(MeasureDef::integer("tokens"))
            .with_dimension(DimensionDef::categorical("engine"))
            .with_dimension(DimensionDef::multi_categorical("tags"))
            .with_dimension(DimensionDef::date("day", Granularity::Day).with_hierarchy(&["month"]))
            .with_dimension(DimensionDef::date("month", Granularity::Month))
    }

    fn dims(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_shape_identity_ignores_order() {
        let a = IndexShape::new(["engine", "day"]);
        let b = IndexShape::parse("day, engine");
        assert_eq!(a, b);
        assert_eq!(a.key(), "day,engine");
        assert_eq!(a.to_string(), "{engine, day}");
    }

    #[test]
    fn test_roll_up_rules() {
        let s = schema();
        let shape = IndexShape::new(["engine", "day"]);
        assert!(can_roll_up(&dims(&["engine"]), &shape, &s));
        assert!(can_roll_up(&dims(&["engine", "month"]), &shape, &s));
        assert!(can_roll_up(&dims(&["day", "engine"]), &shape, &s));
        assert!(can_roll_up(&[], &shape, &s));

        let coarse = IndexShape::new(["engine"]);
        assert!(!can_roll_up(&dims(&["engine", "day"]), &coarse, &s));
        // month cannot refine back to day
        let monthly = IndexShape::new(["engine", "month"]);
        assert!(!can_roll_up(&dims(&["day"]), &monthly, &s));
    }

    #[test]
    fn test_collapsing_tags_is_refused() {
        let s = schema();
        let shape = IndexShape::new(["engine", "tags"]);
        assert!(can_roll_up(&dims(&["tags"]), &shape, &s));
        assert!(!can_roll_up(&dims(&["engine"]), &shape, &s));
    }

    #[test]
    fn test_projection_coarsens() {
        let s = schema();
        let shape = IndexShape::new(["engine", "day"]);
        let projection = project(&dims(&["month"]), &shape, &s).unwrap();
        let key = [Value::from("gpt-4"), Value::from("2024-02-17")];
        assert_eq!(projection[0].apply(&key), Value::from("2024-02"));
        // Null buckets stay Null
        assert_eq!(projection[0].apply(&[Value::Null, Value::Null]), Value::Null);
    }

    #[test]
    fn test_validate_unknown_dimension() {
        let s = schema();
        assert!(matches!(
            IndexShape::new(["engnie"]).validate(&s),
            Err(MelvinError::UnknownField { suggestion: Some(_), .. })
        ));
        assert!(IndexShape::new(Vec::<String>::new()).validate(&s).is_err());
    }
}
