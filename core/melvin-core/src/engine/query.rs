//! Query interface — 쿼리 텍스트 → 파싱 → 계획 → 실행

use super::Engine;
use crate::error::MelvinResult;
use crate::executor::{Executor, ResultSet};
use crate::planner::{ExecutionPlan, PlanContext, QueryPlanner};
use crate::query::{Query, QueryParser};
use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

impl Engine {
    /// Parses query text, resolving relative times against the wall clock.
    pub fn parse(&self, text: &str) -> MelvinResult<Query> {
        self.parse_at(text, Utc::now())
    }

    pub fn parse_at(&self, text: &str, now: DateTime<Utc>) -> MelvinResult<Query> {
        QueryParser::new(&self.registry)
            .with_default_domain(self.config.default_domain.as_deref())
            .with_now(now)
            .parse(text)
    }

    /// Plans against the indexes published right now.
    pub fn plan(&self, query: &Query) -> MelvinResult<ExecutionPlan> {
        let schema = self.registry.get(&query.domain)?;
        let descriptors = self.indexes.descriptors(&query.domain);
        let last_id = self.store.last_id(&query.domain)?;
        Ok(QueryPlanner::plan(
            query,
            &schema,
            PlanContext {
                indexes: &descriptors,
                last_id,
            },
        ))
    }

    /// Runs a plan. Reads only; never refreshes an index.
    pub fn execute(&self, plan: &ExecutionPlan) -> MelvinResult<ResultSet> {
        let schema = self.registry.get(&plan.query.domain)?;
        Executor::new(&schema, &self.store, &self.indexes).run(plan)
    }

    /// Parses, plans and runs `text`.
    pub fn query(&self, text: &str) -> MelvinResult<ResultSet> {
        self.query_at(text, Utc::now())
    }

    #[instrument(skip(self, now))]
    pub fn query_at(&self, text: &str, now: DateTime<Utc>) -> MelvinResult<ResultSet> {
        let query = self.parse_at(text, now)?;
        let plan = self.plan(&query)?;
        let result = self.execute(&plan)?;
        debug!(rows = result.len(), "query finished");
        Ok(result)
    }

    /// Plan text for `text` without running it.
    pub fn explain(&self, text: &str) -> MelvinResult<String> {
        let query = self.parse(text)?;
        Ok(self.plan(&query)?.explain())
    }
}

#[cfg(test)]
mod tests {
    use crate::config::EngineConfig;
    use crate::engine::Engine;
    use crate::error::MelvinError;
    use crate::index::IndexShape;
    use crate::record::IngestRecord;
    use crate::schema::{DimensionDef, DomainSchema, MeasureDef};
    use crate::time::Granularity;
    use crate::value::Value;
    use chrono::{TimeZone, Utc};

    fn engine() -> Engine {
        let engine = Engine::open_with_config(EngineConfig::new().with_default_domain("qa")).unwrap();
        engine
            .register_schema(
                DomainSchema::new("qa")
                    .with_measure(MeasureDef::integer("tokens"))
                    .with_dimension(DimensionDef::categorical("engine"))
                    .with_dimension(DimensionDef::date("day", Granularity::Day)),
            )
            .unwrap();
        engine
            .register_schema(DomainSchema::new("git").with_measure(MeasureDef::integer("tokens")))
            .unwrap();
        engine
    }

    #[test]
    fn test_default_domain_resolves_shared_measure() {
        let engine = engine();
        engine
            .append("qa", IngestRecord::new().field("engine", "a").field("tokens", 2))
            .unwrap();
        engine.append("git", IngestRecord::new().field("tokens", 40)).unwrap();
        assert_eq!(engine.query("tokens").unwrap().scalar(), Some(&Value::Int(2)));
        assert_eq!(engine.query("git.tokens").unwrap().scalar(), Some(&Value::Int(40)));
    }

    #[test]
    fn test_relative_time_filter() {
        let engine = engine();
        let day = 86_400_000;
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
        for offset in [1, 3, 10] {
            engine
                .append(
                    "qa",
                    IngestRecord::new()
                        .at(now.timestamp_millis() - offset * day)
                        .field("engine", "a")
                        .field("tokens", offset),
                )
                .unwrap();
        }
        let rs = engine.query_at("tokens where time >= -7d", now).unwrap();
        assert_eq!(rs.scalar(), Some(&Value::Int(4)));
    }

    #[test]
    fn test_explain_reports_source() {
        let engine = engine();
        engine
            .append("qa", IngestRecord::new().field("engine", "a").field("tokens", 1))
            .unwrap();
        assert!(engine.explain("tokens by engine").unwrap().contains("raw scan"));
        engine
            .build_or_refresh_index("qa", &IndexShape::new(["engine", "day"]))
            .unwrap();
        let text = engine.explain("tokens by engine").unwrap();
        assert!(text.contains("rolled up"), "{text}");

        // an append leaves the index behind until refreshed
        engine
            .append("qa", IngestRecord::new().field("engine", "b").field("tokens", 1))
            .unwrap();
        assert!(engine.explain("tokens by engine").unwrap().contains("raw scan"));
    }

    #[test]
    fn test_parse_errors_surface() {
        let engine = engine();
        assert!(matches!(
            engine.query("tokens by foo"),
            Err(MelvinError::UnknownField { ref name, .. }) if name == "foo"
        ));
        assert!(matches!(
            engine.query("tokens by engine | top 0"),
            Err(MelvinError::InvalidArgument(_))
        ));
    }
}
