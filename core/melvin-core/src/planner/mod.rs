//! Query Planner — Query → 단계별 ExecutionPlan
//!
//! Planning is a pure function of the query, the schema and the descriptors
//! of the available indexes. Source choice, in order:
//!
//! 1. an index whose shape is exactly the grouping set,
//! 2. an index that rolls up to it (fewest dimensions, ties by shape key),
//! 3. a raw scan, with top-level `time` bounds pushed into the scan range.
//!
//! An index is eligible only if it is current (schema version and watermark)
//! and the filter reads nothing an index row lacks: no measures, no `time`,
//! no tag-set dimensions, and only dimensions the shape can derive.

use crate::index::{IndexDescriptor, IndexShape, can_roll_up, project};
use crate::query::{CompareOp, FieldRef, Predicate, Query, Transform};
use crate::record::RecordId;
use crate::schema::{AggregateFunction, DomainSchema, FieldType};
use crate::time::TimeRange;
use crate::value::Value;
use std::fmt::Write;
use tracing::debug;

/// Where the executor reads from.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanSource {
    /// Index over exactly the grouping dimensions
    ExactIndex { shape: IndexShape },
    /// Finer index collapsed onto the grouping dimensions
    RollUp { shape: IndexShape },
    /// Record Store scan over `time_range`
    RawScan { time_range: TimeRange },
}

impl PlanSource {
    pub fn index_shape(&self) -> Option<&IndexShape> {
        match self {
            PlanSource::ExactIndex { shape } | PlanSource::RollUp { shape } => Some(shape),
            PlanSource::RawScan { .. } => None,
        }
    }

    pub fn is_raw_scan(&self) -> bool {
        matches!(self, PlanSource::RawScan { .. })
    }
}

/// One step of the pipeline, in execution order.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanStage {
    Source(PlanSource),
    Filter(Predicate),
    Group(Vec<String>),
    Aggregate {
        measure: String,
        function: AggregateFunction,
    },
    Transform(Transform),
    Format { columns: Vec<String> },
}

/// Declarative plan the executor interprets directly.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionPlan {
    pub query: Query,
    pub source: PlanSource,
    pub stages: Vec<PlanStage>,
}

impl ExecutionPlan {
    /// Human-readable plan, one stage per line.
    pub fn explain(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "plan: {}", self.query);
        for stage in &self.stages {
            let line = match stage {
                PlanStage::Source(PlanSource::ExactIndex { shape }) => format!("source: index {shape}"),
                PlanStage::Source(PlanSource::RollUp { shape }) => {
                    format!("source: index {shape} rolled up")
                }
                PlanStage::Source(PlanSource::RawScan { time_range }) => {
                    format!("source: raw scan of '{}'{}", self.query.domain, describe_range(time_range))
                }
                PlanStage::Filter(predicate) => format!("filter: {predicate}"),
                PlanStage::Group(dims) if dims.is_empty() => "group: (all records)".to_string(),
                PlanStage::Group(dims) => format!("group: {}", dims.join(", ")),
                PlanStage::Aggregate { measure, function } => format!("aggregate: {function}({measure})"),
                PlanStage::Transform(t) => format!("transform: {t}"),
                PlanStage::Format { columns } => format!("format: {}", columns.join(" | ")),
            };
            let _ = writeln!(out, "  {line}");
        }
        out
    }
}

fn describe_range(range: &TimeRange) -> String {
    match (range.start, range.end) {
        (None, None) => String::new(),
        (Some(s), None) => format!(" from {s}"),
        (None, Some(e)) => format!(" before {e}"),
        (Some(s), Some(e)) => format!(" within [{s}, {e})"),
    }
}

/// What the planner may read from.
#[derive(Debug, Clone, Copy)]
pub struct PlanContext<'a> {
    pub indexes: &'a [IndexDescriptor],
    /// Last record id of the domain; indexes behind it are stale
    pub last_id: Option<RecordId>,
}

pub struct QueryPlanner;

impl QueryPlanner {
    pub fn plan(query: &Query, schema: &DomainSchema, context: PlanContext<'_>) -> ExecutionPlan {
        let source = Self::choose_source(query, schema, context);
        debug!(query = %query, source = ?source, "planned query");

        let mut stages = vec![PlanStage::Source(source.clone())];
        if let Some(filter) = &query.filter {
            stages.push(PlanStage::Filter(filter.clone()));
        }
        stages.push(PlanStage::Group(query.dimensions.clone()));
        stages.push(PlanStage::Aggregate {
            measure: query.measure.clone(),
            function: query.aggregate,
        });
        stages.extend(query.transforms.iter().copied().map(PlanStage::Transform));
        let mut columns = query.dimensions.clone();
        columns.push(query.measure.clone());
        stages.push(PlanStage::Format { columns });

        ExecutionPlan {
            query: query.clone(),
            source,
            stages,
        }
    }

    fn choose_source(query: &Query, schema: &DomainSchema, context: PlanContext<'_>) -> PlanSource {
        let usable: Vec<&IndexDescriptor> = context
            .indexes
            .iter()
            .filter(|d| index_eligible(query, schema, d, context.last_id))
            .collect();

        let requested = IndexShape::new(query.dimensions.iter().cloned());
        if let Some(exact) = usable.iter().find(|d| d.shape == requested) {
            return PlanSource::ExactIndex {
                shape: exact.shape.clone(),
            };
        }
        if let Some(best) = usable
            .iter()
            .min_by_key(|d| (d.shape.len(), d.shape.key()))
        {
            return PlanSource::RollUp {
                shape: best.shape.clone(),
            };
        }
        PlanSource::RawScan {
            time_range: query
                .filter
                .as_ref()
                .map(pushed_time_range)
                .unwrap_or_default(),
        }
    }
}

fn index_eligible(
    query: &Query,
    schema: &DomainSchema,
    index: &IndexDescriptor,
    last_id: Option<RecordId>,
) -> bool {
    if index.domain != query.domain || index.schema_version != schema.version {
        return false;
    }
    if index.watermark < last_id {
        return false;
    }
    if !can_roll_up(&query.dimensions, &index.shape, schema) {
        return false;
    }
    query.filter_fields().into_iter().all(|field| match field {
        FieldRef::Measure(_) | FieldRef::Time => false,
        FieldRef::Dimension(name) => {
            schema
                .dimension(name)
                .is_some_and(|d| d.field_type != FieldType::MultiCategorical)
                && project(std::slice::from_ref(name), &index.shape, schema).is_some()
        }
    })
}

/// Scan range implied by top-level `time` conjuncts.
pub fn pushed_time_range(filter: &Predicate) -> TimeRange {
    filter
        .conjuncts()
        .into_iter()
        .filter_map(time_bound)
        .fold(TimeRange::all(), |acc, r| acc.intersect(&r))
}

fn time_bound(predicate: &Predicate) -> Option<TimeRange> {
    match predicate {
        Predicate::Compare {
            field: FieldRef::Time,
            op,
            value: Value::Int(ts),
        } => {
            let ts = *ts;
            match op {
                CompareOp::Ge => Some(TimeRange::since(ts)),
                CompareOp::Gt => Some(TimeRange::since(ts.saturating_add(1))),
                CompareOp::Lt => Some(TimeRange::before(ts)),
                CompareOp::Le => Some(TimeRange::before(ts.saturating_add(1))),
                CompareOp::Eq => Some(TimeRange::new(Some(ts), Some(ts.saturating_add(1)))),
                CompareOp::Ne => None,
            }
        }
        Predicate::Between {
            field: FieldRef::Time,
            low: Value::Int(low),
            high: Value::Int(high),
        } => Some(TimeRange::new(Some(*low), Some(high.saturating_add(1)))),
        _ => None,
    }
}
