//! Schema definitions — measures, dimensions and their extraction rules.
//!
//! A [`DomainSchema`] is the single source of truth for field types: records
//! store raw values, and every typed read (grouping, filtering, aggregation)
//! goes through the schema's extraction rules.

mod extract;
mod registry;

pub use registry::{ResolvedField, SchemaRegistry};

use crate::error::{MelvinError, MelvinResult};
use crate::time::Granularity;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// Words the query grammar reserves; no field may be named after them.
pub const RESERVED_WORDS: &[&str] = &[
    "by", "where", "and", "or", "not", "in", "contains", "matches", "between", "time", "now",
    "true", "false",
];

/// Pseudo-field naming the record timestamp in filters.
pub const TIME_FIELD: &str = "time";

/// The recognized field types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Integer,
    Decimal,
    Count,
    Categorical,
    MultiCategorical,
    Datetime,
    Date,
    Boolean,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Integer => "integer",
            FieldType::Decimal => "decimal",
            FieldType::Count => "count",
            FieldType::Categorical => "categorical",
            FieldType::MultiCategorical => "multi_categorical",
            FieldType::Datetime => "datetime",
            FieldType::Date => "date",
            FieldType::Boolean => "boolean",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "integer" => Some(FieldType::Integer),
            "decimal" => Some(FieldType::Decimal),
            "count" => Some(FieldType::Count),
            "categorical" => Some(FieldType::Categorical),
            "multi_categorical" => Some(FieldType::MultiCategorical),
            "datetime" => Some(FieldType::Datetime),
            "date" => Some(FieldType::Date),
            "boolean" => Some(FieldType::Boolean),
            _ => None,
        }
    }

    pub fn is_measure_type(&self) -> bool {
        matches!(self, FieldType::Integer | FieldType::Decimal | FieldType::Count)
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, FieldType::Datetime | FieldType::Date)
    }

    /// Operators a measure of this type may be aggregated with.
    pub fn permitted_aggregations(&self) -> &'static [AggregateFunction] {
        use AggregateFunction::*;
        match self {
            FieldType::Integer | FieldType::Decimal => &[Sum, Avg, Min, Max, Count],
            FieldType::Count => &[Count, Sum],
            _ => &[],
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregation operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateFunction {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFunction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateFunction::Count => "count",
            AggregateFunction::Sum => "sum",
            AggregateFunction::Avg => "avg",
            AggregateFunction::Min => "min",
            AggregateFunction::Max => "max",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "count" => Some(AggregateFunction::Count),
            "sum" => Some(AggregateFunction::Sum),
            "avg" => Some(AggregateFunction::Avg),
            "min" => Some(AggregateFunction::Min),
            "max" => Some(AggregateFunction::Max),
            _ => None,
        }
    }
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a field's value comes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Extraction {
    /// Raw record field of the given name
    Field(String),
    /// The record timestamp (temporal dimensions only)
    RecordTime,
}

/// A declared measure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasureDef {
    pub name: String,
    pub field_type: FieldType,
    pub aggregations: Vec<AggregateFunction>,
    pub default_aggregation: AggregateFunction,
    /// `None` only for `count` measures: every record contributes 1
    pub source: Option<Extraction>,
}

impl MeasureDef {
    fn numeric(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            aggregations: field_type.permitted_aggregations().to_vec(),
            default_aggregation: AggregateFunction::Sum,
            source: Some(Extraction::Field(name.to_string())),
        }
    }

    /// Integer measure read from the raw field of the same name.
    pub fn integer(name: &str) -> Self {
        Self::numeric(name, FieldType::Integer)
    }

    /// Decimal measure read from the raw field of the same name.
    pub fn decimal(name: &str) -> Self {
        Self::numeric(name, FieldType::Decimal)
    }

    /// Count measure; each record contributes 1.
    pub fn count(name: &str) -> Self {
        Self {
            name: name.to_string(),
            field_type: FieldType::Count,
            aggregations: FieldType::Count.permitted_aggregations().to_vec(),
            default_aggregation: AggregateFunction::Count,
            source: None,
        }
    }

    pub fn with_source(mut self, field: &str) -> Self {
        self.source = Some(Extraction::Field(field.to_string()));
        self
    }

    pub fn with_aggregations(mut self, aggregations: &[AggregateFunction]) -> Self {
        self.aggregations = aggregations.to_vec();
        if let Some(first) = aggregations.first()
            && !aggregations.contains(&self.default_aggregation)
        {
            self.default_aggregation = *first;
        }
        self
    }

    pub fn with_default(mut self, aggregation: AggregateFunction) -> Self {
        self.default_aggregation = aggregation;
        self
    }

    pub fn permits(&self, aggregation: AggregateFunction) -> bool {
        self.aggregations.contains(&aggregation)
    }

    /// Whether finalized sums/counts/extremes stay integral.
    pub fn is_integral(&self) -> bool {
        matches!(self.field_type, FieldType::Integer | FieldType::Count)
    }
}

/// A declared dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionDef {
    pub name: String,
    pub field_type: FieldType,
    /// Bucket size; temporal dimensions only
    pub granularity: Option<Granularity>,
    /// Coarser dimensions this one rolls up into, finest first
    pub hierarchy: Vec<String>,
    pub cardinality_hint: Option<u64>,
    pub source: Extraction,
}

impl DimensionDef {
    fn plain(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            granularity: None,
            hierarchy: Vec::new(),
            cardinality_hint: None,
            source: Extraction::Field(name.to_string()),
        }
    }

    pub fn categorical(name: &str) -> Self {
        Self::plain(name, FieldType::Categorical)
    }

    pub fn multi_categorical(name: &str) -> Self {
        Self::plain(name, FieldType::MultiCategorical)
    }

    pub fn boolean(name: &str) -> Self {
        Self::plain(name, FieldType::Boolean)
    }

    /// Date dimension bucketed at `granularity`, derived from the record time.
    pub fn date(name: &str, granularity: Granularity) -> Self {
        Self {
            granularity: Some(granularity),
            source: Extraction::RecordTime,
            ..Self::plain(name, FieldType::Date)
        }
    }

    /// Datetime dimension bucketed at `granularity`, derived from the record time.
    pub fn datetime(name: &str, granularity: Granularity) -> Self {
        Self {
            granularity: Some(granularity),
            source: Extraction::RecordTime,
            ..Self::plain(name, FieldType::Datetime)
        }
    }

    pub fn with_source(mut self, field: &str) -> Self {
        self.source = Extraction::Field(field.to_string());
        self
    }

    pub fn with_hierarchy(mut self, coarser: &[&str]) -> Self {
        self.hierarchy = coarser.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_cardinality(mut self, hint: u64) -> Self {
        self.cardinality_hint = Some(hint);
        self
    }

    pub fn is_temporal(&self) -> bool {
        self.field_type.is_temporal()
    }
}

/// Measures and dimensions of one domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainSchema {
    pub domain: String,
    /// Assigned by the registry
    pub version: u64,
    pub measures: BTreeMap<String, MeasureDef>,
    pub dimensions: BTreeMap<String, DimensionDef>,
}

impl DomainSchema {
    pub fn new(domain: &str) -> Self {
        Self {
            domain: domain.to_string(),
            version: 0,
            measures: BTreeMap::new(),
            dimensions: BTreeMap::new(),
        }
    }

    pub fn with_measure(mut self, measure: MeasureDef) -> Self {
        self.measures.insert(measure.name.clone(), measure);
        self
    }

    pub fn with_dimension(mut self, dimension: DimensionDef) -> Self {
        self.dimensions.insert(dimension.name.clone(), dimension);
        self
    }

    pub fn measure(&self, name: &str) -> Option<&MeasureDef> {
        self.measures.get(name)
    }

    pub fn dimension(&self, name: &str) -> Option<&DimensionDef> {
        self.dimensions.get(name)
    }

    /// All declared names, measures first.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.measures
            .keys()
            .chain(self.dimensions.keys())
            .map(String::as_str)
    }

    fn invalid(&self, reason: String) -> MelvinError {
        MelvinError::InvalidSchema {
            domain: self.domain.clone(),
            reason,
        }
    }

    /// Structural validation; run by the registry before accepting a schema.
    pub fn validate(&self) -> MelvinResult<()> {
        if !is_identifier(&self.domain) {
            return Err(self.invalid(format!("'{}' is not a valid domain name", self.domain)));
        }

        let mut seen = HashSet::new();
        for name in self.field_names() {
            if !is_identifier(name) {
                return Err(self.invalid(format!("'{name}' is not a valid field name")));
            }
            if RESERVED_WORDS.contains(&name) {
                return Err(self.invalid(format!("'{name}' is a reserved word")));
            }
            if !seen.insert(name) {
                return Err(self.invalid(format!(
                    "'{name}' is declared as both a measure and a dimension"
                )));
            }
        }

        for (key, m) in &self.measures {
            if key != &m.name {
                return Err(self.invalid(format!("measure key '{key}' does not match '{}'", m.name)));
            }
            if !m.field_type.is_measure_type() {
                return Err(self.invalid(format!(
                    "measure '{}' has non-measure type {}",
                    m.name, m.field_type
                )));
            }
            if m.aggregations.is_empty() {
                return Err(self.invalid(format!("measure '{}' permits no aggregation", m.name)));
            }
            let permitted = m.field_type.permitted_aggregations();
            if let Some(op) = m.aggregations.iter().find(|op| !permitted.contains(op)) {
                return Err(self.invalid(format!(
                    "aggregation '{op}' is not permitted for {} measure '{}'",
                    m.field_type, m.name
                )));
            }
            if !m.permits(m.default_aggregation) {
                return Err(self.invalid(format!(
                    "default aggregation '{}' of measure '{}' is not in its permitted list",
                    m.default_aggregation, m.name
                )));
            }
            match (&m.source, m.field_type) {
                (None, FieldType::Count) | (Some(Extraction::Field(_)), _) => {}
                _ => {
                    return Err(self.invalid(format!(
                        "measure '{}' needs a source field",
                        m.name
                    )));
                }
            }
        }

        for (key, d) in &self.dimensions {
            if key != &d.name {
                return Err(self.invalid(format!("dimension key '{key}' does not match '{}'", d.name)));
            }
            if d.field_type.is_measure_type() {
                return Err(self.invalid(format!(
                    "dimension '{}' has measure type {}",
                    d.name, d.field_type
                )));
            }
            if d.is_temporal() {
                self.validate_temporal(d)?;
            } else {
                if d.granularity.is_some() || !d.hierarchy.is_empty() {
                    return Err(self.invalid(format!(
                        "only temporal dimensions may declare a granularity or hierarchy ('{}')",
                        d.name
                    )));
                }
                if d.source == Extraction::RecordTime {
                    return Err(self.invalid(format!(
                        "dimension '{}' cannot be derived from the record time",
                        d.name
                    )));
                }
            }
        }
        Ok(())
    }

    fn validate_temporal(&self, d: &DimensionDef) -> MelvinResult<()> {
        let Some(mut finer) = d.granularity else {
            return Err(self.invalid(format!("temporal dimension '{}' needs a granularity", d.name)));
        };
        for parent_name in &d.hierarchy {
            let parent = self.dimension(parent_name).ok_or_else(|| {
                self.invalid(format!(
                    "hierarchy of '{}' names undeclared dimension '{parent_name}'",
                    d.name
                ))
            })?;
            let coarser = match parent.granularity {
                Some(g) if parent.is_temporal() => g,
                _ => {
                    return Err(self.invalid(format!(
                        "hierarchy entry '{parent_name}' of '{}' is not temporal",
                        d.name
                    )));
                }
            };
            if parent.source != d.source {
                return Err(self.invalid(format!(
                    "hierarchy entry '{parent_name}' of '{}' is derived from a different source",
                    d.name
                )));
            }
            if !finer.nests_in(coarser) {
                return Err(self.invalid(format!(
                    "{finer} buckets of '{}' do not nest in {coarser} buckets of '{parent_name}'",
                    d.name
                )));
            }
            finer = coarser;
        }
        Ok(())
    }

    /// Checks that `self` only adds entries to `previous`.
    pub fn additive_over(&self, previous: &DomainSchema) -> Result<(), String> {
        for (name, m) in &previous.measures {
            match self.measures.get(name) {
                None => return Err(format!("measure '{name}' was removed")),
                Some(new) if new != m => return Err(format!("measure '{name}' was redefined")),
                _ => {}
            }
        }
        for (name, d) in &previous.dimensions {
            match self.dimensions.get(name) {
                None => return Err(format!("dimension '{name}' was removed")),
                Some(new) if new != d => return Err(format!("dimension '{name}' was redefined")),
                _ => {}
            }
        }
        Ok(())
    }

    /// Same entries, ignoring the version number.
    pub fn same_definition(&self, other: &DomainSchema) -> bool {
        self.measures == other.measures && self.dimensions == other.dimensions
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
