//! Engine index operations — 인덱스 생성, 갱신, 삭제

use super::Engine;
use crate::error::MelvinResult;
use crate::index::{IndexDescriptor, IndexShape, IndexSnapshot, RefreshOutcome};
use rayon::prelude::*;
use std::sync::Arc;
use tracing::{info, instrument};

impl Engine {
    /// Builds the index over `shape`, or folds in records past its watermark.
    #[instrument(skip(self), fields(domain = %domain, shape = %shape))]
    pub fn build_or_refresh_index(&self, domain: &str, shape: &IndexShape) -> MelvinResult<RefreshOutcome> {
        let schema = self.registry.get(domain)?;
        let lock = self.domain_lock(domain);
        let _guard = lock.lock();
        self.indexes.build_or_refresh(&schema, &self.store, shape)
    }

    pub fn drop_index(&self, domain: &str, shape: &IndexShape) -> MelvinResult<bool> {
        let lock = self.domain_lock(domain);
        let _guard = lock.lock();
        self.indexes.drop_index(domain, shape)
    }

    /// Published snapshot of one index, or `NotFound`.
    pub fn lookup_index(&self, domain: &str, shape: &IndexShape) -> MelvinResult<Arc<IndexSnapshot>> {
        self.indexes.lookup(domain, shape)
    }

    pub fn index_descriptors(&self, domain: &str) -> Vec<IndexDescriptor> {
        self.indexes.descriptors(domain)
    }

    /// Refreshes every index of one domain.
    pub fn refresh_domain(&self, domain: &str) -> MelvinResult<Vec<RefreshOutcome>> {
        let schema = self.registry.get(domain)?;
        let lock = self.domain_lock(domain);
        let _guard = lock.lock();
        self.indexes.refresh_domain(&schema, &self.store)
    }

    /// Refreshes all indexes, domains in parallel; returns records incorporated.
    #[instrument(skip(self))]
    pub fn refresh_all(&self) -> MelvinResult<usize> {
        let domains: Vec<String> = self
            .indexes
            .domains()
            .into_iter()
            .filter(|d| self.registry.contains(d))
            .collect();
        let per_domain: Vec<usize> = domains
            .par_iter()
            .map(|domain| {
                self.refresh_domain(domain)
                    .map(|outcomes| outcomes.iter().map(|o| o.incorporated).sum())
            })
            .collect::<MelvinResult<_>>()?;
        let incorporated = per_domain.iter().sum();
        info!(domains = domains.len(), incorporated, "refreshed all indexes");
        Ok(incorporated)
    }
}

#[cfg(test)]
mod tests {
    use crate::engine::Engine;
    use crate::error::MelvinError;
    use crate::index::IndexShape;
    use crate::record::IngestRecord;
    use crate::schema::{DimensionDef, DomainSchema, MeasureDef};

    fn engine() -> Engine {
        let engine = Engine::open_in_memory().unwrap();
        for domain in ["qa", "git"] {
            engine
                .register_schema(
                    DomainSchema::new(domain)
                        .with_measure(MeasureDef::count("events"))
                        .with_dimension(DimensionDef::categorical("kind")),
                )
                .unwrap();
        }
        engine
    }

    #[test]
    fn test_build_refresh_and_drop() {
        let engine = engine();
        let shape = IndexShape::new(["kind"]);
        engine.append("qa", IngestRecord::new().field("kind", "a")).unwrap();
        let built = engine.build_or_refresh_index("qa", &shape).unwrap();
        assert!(built.rebuilt);
        assert_eq!(built.incorporated, 1);

        let again = engine.build_or_refresh_index("qa", &shape).unwrap();
        assert_eq!(again.incorporated, 0);
        assert_eq!(engine.index_descriptors("qa").len(), 1);

        assert!(engine.drop_index("qa", &shape).unwrap());
        assert!(matches!(
            engine.lookup_index("qa", &shape),
            Err(MelvinError::NotFound(_))
        ));
    }

    #[test]
    fn test_refresh_all_across_domains() {
        let engine = engine();
        let shape = IndexShape::new(["kind"]);
        engine.build_or_refresh_index("qa", &shape).unwrap();
        engine.build_or_refresh_index("git", &shape).unwrap();
        for domain in ["qa", "git", "git"] {
            engine.append(domain, IngestRecord::new().field("kind", "x")).unwrap();
        }
        assert_eq!(engine.refresh_all().unwrap(), 3);
        assert_eq!(engine.refresh_all().unwrap(), 0);
    }

    #[test]
    fn test_unknown_dimension_rejected() {
        let engine = engine();
        assert!(matches!(
            engine.build_or_refresh_index("qa", &IndexShape::new(["knd"])),
            Err(MelvinError::UnknownField { .. })
        ));
    }
}
