//! Executor — ExecutionPlan을 실행하여 ResultSet을 생성합니다.
//!
//! Reads the chosen source once, folds partial aggregates per group,
//! finalizes them and runs the transform pipeline. Never writes to the
//! Record Store or the Index Set.

pub mod aggregate;
pub mod filter;
pub mod result;
pub mod transform;

pub use filter::{FieldSource, RecordFields, RowFields, evaluate};
pub use result::{ResultRow, ResultSet};
pub use transform::{Bucket, TimeAxis};

use crate::error::{MelvinError, MelvinResult};
use crate::index::{IndexSet, IndexShape, PartialAggregate};
use crate::planner::{ExecutionPlan, PlanSource, pushed_time_range};
use crate::query::{Query, Transform};
use crate::schema::{AggregateFunction, DomainSchema};
use crate::storage::RecordStore;
use crate::time::TimeRange;
use crate::value::{GroupKey, Value};
use aggregate::Groups;
use tracing::debug;

/// Plan interpreter over read-only stores.
pub struct Executor<'a> {
    schema: &'a DomainSchema,
    store: &'a RecordStore,
    indexes: &'a IndexSet,
}

impl<'a> Executor<'a> {
    pub fn new(schema: &'a DomainSchema, store: &'a RecordStore, indexes: &'a IndexSet) -> Self {
        Self {
            schema,
            store,
            indexes,
        }
    }

    pub fn run(&self, plan: &ExecutionPlan) -> MelvinResult<ResultSet> {
        let query = &plan.query;
        let mut groups = match &plan.source {
            PlanSource::ExactIndex { shape } | PlanSource::RollUp { shape } => self.read_index(query, shape)?,
            PlanSource::RawScan { time_range } => self.read_records(query, *time_range)?,
        };
        if query.dimensions.is_empty() && groups.is_empty() {
            groups.insert(GroupKey::new(), PartialAggregate::empty());
        }

        let mut buckets: Vec<Bucket> = groups
            .into_iter()
            .map(|(key, agg)| Bucket {
                key,
                value: agg.finalize(query.aggregate),
                exact: agg.exact(query.aggregate),
                span_ms: agg.span_ms(),
            })
            .collect();
        buckets.sort_by(|a, b| a.key.cmp(&b.key));

        let axis = TimeAxis::of(self.schema, &query.dimensions);
        let buckets = transform::apply(buckets, &query.transforms, axis)?;

        let integral = self.integral_output(query);
        Ok(ResultSet {
            dimensions: query.dimensions.clone(),
            measure: query.measure.clone(),
            rows: buckets
                .into_iter()
                .map(|b| ResultRow {
                    dimensions: b.key.into_vec(),
                    value: match (integral, b.exact, b.value) {
                        (true, Some(exact), _) => Value::from_decimal(exact, true),
                        (_, _, Some(v)) => Value::Decimal(v),
                        _ => Value::Null,
                    },
                })
                .collect(),
        })
    }

    fn read_records(&self, query: &Query, range: TimeRange) -> MelvinResult<Groups> {
        let scan = self.store.scan(&query.domain, range)?;
        aggregate::fold_records(self.schema, query, scan)
    }

    fn read_index(&self, query: &Query, shape: &IndexShape) -> MelvinResult<Groups> {
        match self.indexes.lookup(&query.domain, shape) {
            Ok(snapshot) if snapshot.schema_version == self.schema.version => {
                aggregate::fold_index(self.schema, query, &snapshot)
            }
            Ok(_) | Err(MelvinError::NotFound(_)) => {
                // dropped or rebuilt since planning
                debug!(domain = %query.domain, shape = %shape, "index unavailable, scanning records");
                let range = query.filter.as_ref().map(pushed_time_range).unwrap_or_default();
                self.read_records(query, range)
            }
            Err(e) => Err(e),
        }
    }

    /// Whether results stay whole numbers.
    fn integral_output(&self, query: &Query) -> bool {
        let aggregate_integral = match query.aggregate {
            AggregateFunction::Count => true,
            AggregateFunction::Avg => false,
            AggregateFunction::Sum | AggregateFunction::Min | AggregateFunction::Max => self
                .schema
                .measure(&query.measure)
                .is_some_and(|m| m.is_integral()),
        };
        aggregate_integral
            && query
                .transforms
                .iter()
                .all(|t| matches!(t, Transform::Sort(_) | Transform::Top(_) | Transform::Bottom(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DurabilityLevel;
    use crate::planner::{PlanContext, QueryPlanner};
    use crate::query::QueryParser;
    use crate::record::IngestRecord;
    use crate::schema::{DimensionDef, MeasureDef, SchemaRegistry};
    use crate::storage::InMemoryBackend;
    use crate::time::Granularity;
    use std::sync::Arc;

    struct Fixture {
        registry: SchemaRegistry,
        store: RecordStore,
        indexes: IndexSet,
    }

    impl Fixture {
        fn new() -> Self {
            let registry = SchemaRegistry::new();
            registry
                .register(
                    DomainSchema::new("qa")
                        .with_measure(MeasureDef::integer("tokens"))
                        .with_measure(MeasureDef::decimal("cost"))
                        .with_measure(MeasureDef::count("queries"))
                        .with_dimension(DimensionDef::categorical("engine"))
                        .with_dimension(DimensionDef::date("day", Granularity::Day)),
                )
                .unwrap();
            let store = RecordStore::new(Arc::new(InMemoryBackend::new()), DurabilityLevel::None);
            Self {
                registry,
                store,
                indexes: IndexSet::new(),
            }
        }

        fn ingest(&self, engine: &str, tokens: i64, cost: f64) {
            self.store
                .append(
                    "qa",
                    IngestRecord::new()
                        .field("engine", engine)
                        .field("tokens", tokens)
                        .field("cost", cost),
                )
                .unwrap();
        }

        fn query(&self, text: &str) -> MelvinResult<ResultSet> {
            let query = QueryParser::new(&self.registry).parse(text)?;
            let schema = self.registry.get("qa")?;
            let descriptors = self.indexes.descriptors("qa");
            let plan = QueryPlanner::plan(
                &query,
                &schema,
                PlanContext {
                    indexes: &descriptors,
                    last_id: self.store.last_id("qa")?,
                },
            );
            Executor::new(&schema, &self.store, &self.indexes).run(&plan)
        }
    }

    #[test]
    fn test_sum_by_engine() {
        let fx = Fixture::new();
        fx.ingest("gpt-4", 100, 0.5);
        fx.ingest("gpt-4", 50, 0.25);
        let rs = fx.query("tokens by engine").unwrap();
        assert_eq!(rs.rows.len(), 1);
        assert_eq!(rs.get(0, "engine"), Some(&Value::from("gpt-4")));
        assert_eq!(rs.get(0, "tokens"), Some(&Value::Int(150)));
    }

    #[test]
    fn test_avg_is_sum_over_count() {
        let fx = Fixture::new();
        fx.ingest("a", 1, 0.1);
        fx.ingest("a", 2, 0.2);
        fx.ingest("a", 4, 0.3);
        let rs = fx.query("avg(tokens)").unwrap();
        assert_eq!(rs.scalar(), Some(&Value::Decimal(7.0 / 3.0)));
        let max = fx.query("max(cost)").unwrap();
        assert_eq!(max.scalar(), Some(&Value::Decimal(0.3)));
    }

    #[test]
    fn test_empty_scalar() {
        let fx = Fixture::new();
        assert_eq!(fx.query("tokens").unwrap().scalar(), Some(&Value::Int(0)));
        assert_eq!(fx.query("min(tokens)").unwrap().scalar(), Some(&Value::Null));
        assert!(fx.query("tokens by engine").unwrap().is_empty());
    }

    #[test]
    fn test_index_and_scan_agree() {
        let fx = Fixture::new();
        for (engine, tokens) in [("a", 3), ("b", 5), ("a", 7), ("c", 1)] {
            fx.ingest(engine, tokens, 1.0);
        }
        let raw = fx.query("queries by engine | sort desc").unwrap();
        let schema = fx.registry.get("qa").unwrap();
        fx.indexes
            .build_or_refresh(&schema, &fx.store, &IndexShape::new(["engine", "day"]))
            .unwrap();
        let indexed = fx.query("queries by engine | sort desc").unwrap();
        assert_eq!(raw, indexed);
        assert_eq!(indexed.get(0, "engine"), Some(&Value::from("a")));
        assert_eq!(indexed.get(0, "queries"), Some(&Value::Int(2)));
    }

    #[test]
    fn test_decimal_sum_same_from_index_and_scan() {
        let fx = Fixture::new();
        for (engine, cost) in [("a", 0.1), ("b", 0.2), ("b", 0.3)] {
            fx.ingest(engine, 1, cost);
        }
        let raw = fx.query("cost").unwrap();
        let schema = fx.registry.get("qa").unwrap();
        fx.indexes
            .build_or_refresh(&schema, &fx.store, &IndexShape::new(["engine"]))
            .unwrap();
        let indexed = fx.query("cost").unwrap();
        assert_eq!(raw, indexed);
        assert_eq!(indexed.scalar(), Some(&Value::Decimal(0.6)));
    }

    #[test]
    fn test_integer_sum_beyond_f64_precision() {
        let fx = Fixture::new();
        fx.ingest("a", 1 << 53, 0.0);
        fx.ingest("a", 1, 0.0);
        let rs = fx.query("tokens").unwrap();
        assert_eq!(rs.scalar(), Some(&Value::Int((1 << 53) + 1)));
    }

    #[test]
    fn test_dropped_index_falls_back() {
        let fx = Fixture::new();
        fx.ingest("a", 3, 1.0);
        let schema = fx.registry.get("qa").unwrap();
        let shape = IndexShape::new(["engine"]);
        fx.indexes.build_or_refresh(&schema, &fx.store, &shape).unwrap();

        let query = QueryParser::new(&fx.registry).parse("tokens by engine").unwrap();
        let descriptors = fx.indexes.descriptors("qa");
        let plan = QueryPlanner::plan(
            &query,
            &schema,
            PlanContext {
                indexes: &descriptors,
                last_id: fx.store.last_id("qa").unwrap(),
            },
        );
        assert_eq!(plan.source, PlanSource::ExactIndex { shape: shape.clone() });
        fx.indexes.drop_index("qa", &shape).unwrap();
        let rs = Executor::new(&schema, &fx.store, &fx.indexes).run(&plan).unwrap();
        assert_eq!(rs.get(0, "tokens"), Some(&Value::Int(3)));
    }
}
