//! Schema Registry — 도메인별 스키마 버전 관리
//!
//! Additive revisions bump the version; the full history is kept so records
//! written under an older version stay interpretable.
//!
//! DashMap + 현재 스키마 캐싱으로 get O(1)

use super::{AggregateFunction, DimensionDef, DomainSchema, FieldType, MeasureDef, TIME_FIELD};
use crate::error::{FieldKind, MelvinError, MelvinResult};
use crate::suggest::{DEFAULT_SIMILARITY_THRESHOLD, closest_match};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use tracing::info;

/// A name resolved against a domain schema.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedField {
    Measure(MeasureDef),
    Dimension(DimensionDef),
    /// The record timestamp pseudo-field
    Time,
}

impl ResolvedField {
    pub fn field_type(&self) -> FieldType {
        match self {
            ResolvedField::Measure(m) => m.field_type,
            ResolvedField::Dimension(d) => d.field_type,
            ResolvedField::Time => FieldType::Datetime,
        }
    }

    /// Aggregation capability; empty for dimensions.
    pub fn aggregations(&self) -> &[AggregateFunction] {
        match self {
            ResolvedField::Measure(m) => &m.aggregations,
            _ => &[],
        }
    }
}

/// 스키마 레지스트리
///
/// 도메인별 스키마 히스토리를 관리하고, 현재 스키마를 캐시합니다.
pub struct SchemaRegistry {
    /// 도메인별 스키마 버전 히스토리
    versions: DashMap<String, Vec<Arc<DomainSchema>>>,
    /// 현재 스키마 캐시
    current_cache: DashMap<String, Arc<DomainSchema>>,
    suggestion_threshold: f64,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::with_suggestion_threshold(DEFAULT_SIMILARITY_THRESHOLD)
    }

    pub fn with_suggestion_threshold(threshold: f64) -> Self {
        Self {
            versions: DashMap::new(),
            current_cache: DashMap::new(),
            suggestion_threshold: threshold,
        }
    }

    /// Registers or revises a domain schema and returns its current version.
    ///
    /// Re-registering an identical schema is a no-op. An additive revision
    /// bumps the version; any other change fails with `SchemaConflict`.
    pub fn register(&self, schema: DomainSchema) -> MelvinResult<u64> {
        schema.validate()?;
        let domain = schema.domain.clone();

        // entry() holds the shard lock, so concurrent registrations of one domain serialize
        match self.versions.entry(domain.clone()) {
            Entry::Vacant(slot) => {
                let schema = Arc::new(DomainSchema { version: 1, ..schema });
                slot.insert(vec![Arc::clone(&schema)]);
                self.current_cache.insert(domain.clone(), schema);
                info!(domain = %domain, version = 1, "registered domain schema");
                Ok(1)
            }
            Entry::Occupied(mut slot) => {
                let history = slot.get_mut();
                let Some(current) = history.last().cloned() else {
                    return Err(MelvinError::Storage(format!(
                        "empty schema history for domain '{domain}'"
                    )));
                };
                if schema.same_definition(&current) {
                    return Ok(current.version);
                }
                schema
                    .additive_over(&current)
                    .map_err(|reason| MelvinError::SchemaConflict {
                        domain: domain.clone(),
                        reason,
                    })?;

                let version = current.version + 1;
                let schema = Arc::new(DomainSchema { version, ..schema });
                history.push(Arc::clone(&schema));
                self.current_cache.insert(domain.clone(), schema);
                info!(domain = %domain, version, "revised domain schema");
                Ok(version)
            }
        }
    }

    /// Reinstates a persisted history (oldest first) without re-validation of
    /// additivity; used when reopening a store.
    pub(crate) fn restore(&self, history: Vec<DomainSchema>) -> MelvinResult<()> {
        let Some(current) = history.last() else {
            return Ok(());
        };
        current.validate()?;
        let domain = current.domain.clone();
        let history: Vec<Arc<DomainSchema>> = history.into_iter().map(Arc::new).collect();
        if let Some(last) = history.last() {
            self.current_cache.insert(domain.clone(), Arc::clone(last));
        }
        self.versions.insert(domain, history);
        Ok(())
    }

    /// 현재 스키마 조회 — O(1) DashMap 캐시 히트
    pub fn get(&self, domain: &str) -> MelvinResult<Arc<DomainSchema>> {
        self.current_cache
            .get(domain)
            .map(|r| Arc::clone(r.value()))
            .ok_or_else(|| MelvinError::UnknownDomain(domain.to_string()))
    }

    /// 특정 버전의 스키마 조회
    pub fn get_at_version(&self, domain: &str, version: u64) -> MelvinResult<Arc<DomainSchema>> {
        let history = self
            .versions
            .get(domain)
            .ok_or_else(|| MelvinError::UnknownDomain(domain.to_string()))?;

        history
            .iter()
            .find(|s| s.version == version)
            .cloned()
            .ok_or_else(|| {
                MelvinError::InvalidArgument(format!("version {version} not found for {domain}"))
            })
    }

    /// 스키마 버전 히스토리 조회
    pub fn version_history(&self, domain: &str) -> MelvinResult<Vec<Arc<DomainSchema>>> {
        self.versions
            .get(domain)
            .map(|r| r.value().clone())
            .ok_or_else(|| MelvinError::UnknownDomain(domain.to_string()))
    }

    pub fn current_version(&self, domain: &str) -> MelvinResult<u64> {
        self.get(domain).map(|s| s.version)
    }

    pub fn contains(&self, domain: &str) -> bool {
        self.current_cache.contains_key(domain)
    }

    /// Registered domain names, sorted.
    pub fn domains(&self) -> Vec<String> {
        let mut names: Vec<String> = self.current_cache.iter().map(|r| r.key().clone()).collect();
        names.sort();
        names
    }

    /// Resolves a measure, dimension or the `time` pseudo-field.
    pub fn resolve(&self, domain: &str, name: &str) -> MelvinResult<ResolvedField> {
        let schema = self.get(domain)?;
        if let Some(m) = schema.measure(name) {
            return Ok(ResolvedField::Measure(m.clone()));
        }
        if let Some(d) = schema.dimension(name) {
            return Ok(ResolvedField::Dimension(d.clone()));
        }
        if name == TIME_FIELD {
            return Ok(ResolvedField::Time);
        }
        Err(self.unknown_field(&schema, FieldKind::Field, name))
    }

    /// Ordered coarsening chain of a dimension, empty if none was declared.
    pub fn hierarchy_of(&self, domain: &str, dimension: &str) -> MelvinResult<Vec<String>> {
        let schema = self.get(domain)?;
        schema
            .dimension(dimension)
            .map(|d| d.hierarchy.clone())
            .ok_or_else(|| self.unknown_field(&schema, FieldKind::Dimension, dimension))
    }

    /// Builds an `UnknownField` error with a did-you-mean suggestion drawn from
    /// the namespace `kind` selects.
    pub fn unknown_field(&self, schema: &DomainSchema, kind: FieldKind, name: &str) -> MelvinError {
        let suggestion = match kind {
            FieldKind::Measure => closest_match(
                name,
                schema.measures.keys().map(String::as_str),
                self.suggestion_threshold,
            ),
            FieldKind::Dimension => closest_match(
                name,
                schema.dimensions.keys().map(String::as_str),
                self.suggestion_threshold,
            ),
            FieldKind::Field => closest_match(name, schema.field_names(), self.suggestion_threshold),
        };
        MelvinError::UnknownField {
            kind,
            name: name.to_string(),
            domain: schema.domain.clone(),
            suggestion,
        }
    }

    pub fn suggestion_threshold(&self) -> f64 {
        self.suggestion_threshold
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DimensionDef, MeasureDef};
    use crate::time::Granularity;

    fn qa_v1() -> DomainSchema {
        DomainSchema::new("qa")
            .with_measure(MeasureDef::integer("tokens"))
            .with_dimension(DimensionDef::categorical("engine"))
            .with_dimension(DimensionDef::date("day", Granularity::Day).with_hierarchy(&["month"]))
            .with_dimension(DimensionDef::date("month", Granularity::Month))
    }

    #[test]
    fn test_register_and_get() {
        let registry = SchemaRegistry::new();
        assert_eq!(registry.register(qa_v1()).unwrap(), 1);

        let current = registry.get("qa").unwrap();
        assert_eq!(current.version, 1);
        assert_eq!(current.dimensions.len(), 3);
    }

    #[test]
    fn test_identical_reregistration_is_noop() {
        let registry = SchemaRegistry::new();
        registry.register(qa_v1()).unwrap();
        assert_eq!(registry.register(qa_v1()).unwrap(), 1);
        assert_eq!(registry.version_history("qa").unwrap().len(), 1);
    }

    #[test]
    fn test_additive_revision_bumps_version() {
        let registry = SchemaRegistry::new();
        registry.register(qa_v1()).unwrap();
        let v2 = qa_v1().with_measure(MeasureDef::decimal("cost"));
        assert_eq!(registry.register(v2).unwrap(), 2);

        let history = registry.version_history("qa").unwrap();
        assert_eq!(history.len(), 2);
        assert!(registry.get_at_version("qa", 1).unwrap().measure("cost").is_none());
        assert!(registry.get("qa").unwrap().measure("cost").is_some());
    }

    #[test]
    fn test_incompatible_revision_conflicts() {
        let registry = SchemaRegistry::new();
        registry.register(qa_v1()).unwrap();
        let broken = DomainSchema::new("qa").with_measure(MeasureDef::integer("tokens"));
        assert!(matches!(
            registry.register(broken),
            Err(MelvinError::SchemaConflict { .. })
        ));
        assert_eq!(registry.current_version("qa").unwrap(), 1);
    }

    #[test]
    fn test_resolve() {
        let registry = SchemaRegistry::new();
        registry.register(qa_v1()).unwrap();
        assert!(matches!(
            registry.resolve("qa", "tokens").unwrap(),
            ResolvedField::Measure(_)
        ));
        assert_eq!(
            registry.resolve("qa", "engine").unwrap().field_type(),
            FieldType::Categorical
        );
        assert_eq!(registry.resolve("qa", "time").unwrap(), ResolvedField::Time);
    }

    #[test]
    fn test_resolve_unknown_suggests() {
        let registry = SchemaRegistry::new();
        registry.register(qa_v1()).unwrap();
        match registry.resolve("qa", "tokns") {
            Err(MelvinError::UnknownField {
                name, suggestion, ..
            }) => {
                assert_eq!(name, "tokns");
                assert_eq!(suggestion.as_deref(), Some("tokens"));
            }
            other => panic!("expected UnknownField, got {other:?}"),
        }
    }

    #[test]
    fn test_hierarchy_of() {
        let registry = SchemaRegistry::new();
        registry.register(qa_v1()).unwrap();
        assert_eq!(registry.hierarchy_of("qa", "day").unwrap(), vec!["month"]);
        assert!(registry.hierarchy_of("qa", "engine").unwrap().is_empty());
        assert!(registry.hierarchy_of("qa", "foo").is_err());
    }

    #[test]
    fn test_unknown_domain() {
        let registry = SchemaRegistry::new();
        assert!(matches!(
            registry.get("git"),
            Err(MelvinError::UnknownDomain(_))
        ));
    }
}
