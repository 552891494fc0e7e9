//! Index Set — 차원 shape별 사전 집계 인덱스
//!
//! Each index holds `group key → partial aggregate per measure` plus the
//! watermark (highest incorporated record id). Refresh folds only records
//! past the watermark into a copy of the current snapshot and publishes it
//! with one atomic swap, so readers holding the old `Arc` never see a
//! half-applied refresh.

pub mod aggregate;
pub mod persist;
pub mod shape;

pub use aggregate::PartialAggregate;
pub use shape::{DimProjection, IndexShape, can_roll_up, project};

use crate::error::{MelvinError, MelvinResult};
use crate::record::{Record, RecordId};
use crate::schema::{DimensionDef, DomainSchema, MeasureDef};
use crate::storage::{INDEX_TREE, RecordStore, StorageBackend};
use crate::time::TimeRange;
use crate::value::GroupKey;
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// An immutable, published index state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSnapshot {
    pub domain: String,
    pub shape: IndexShape,
    /// Measure names, aligned with each row's aggregates
    pub measures: Vec<String>,
    /// Schema version the rows were computed under
    pub schema_version: u64,
    /// Highest record id incorporated
    pub watermark: Option<RecordId>,
    /// Records incorporated
    pub records: u64,
    pub rows: BTreeMap<GroupKey, Vec<PartialAggregate>>,
}

impl IndexSnapshot {
    fn empty(schema: &DomainSchema, shape: &IndexShape) -> Self {
        Self {
            domain: schema.domain.clone(),
            shape: shape.clone(),
            measures: schema.measures.keys().cloned().collect(),
            schema_version: schema.version,
            watermark: None,
            records: 0,
            rows: BTreeMap::new(),
        }
    }

    pub fn measure_index(&self, measure: &str) -> Option<usize> {
        self.measures.iter().position(|m| m == measure)
    }

    fn fold(&mut self, schema: &DomainSchema, dims: &[&DimensionDef], measures: &[&MeasureDef], record: &Record) {
        let values: Vec<Option<Decimal>> = measures
            .iter()
            .map(|m| schema.measure_value(m, record))
            .collect();
        for key in schema.group_keys(dims, record) {
            let row = self
                .rows
                .entry(key)
                .or_insert_with(|| vec![PartialAggregate::empty(); measures.len()]);
            for (agg, value) in row.iter_mut().zip(&values) {
                if let Some(v) = value {
                    agg.observe(*v, record.timestamp);
                }
            }
        }
        self.records += 1;
    }

    pub fn descriptor(&self) -> IndexDescriptor {
        IndexDescriptor {
            domain: self.domain.clone(),
            shape: self.shape.clone(),
            schema_version: self.schema_version,
            watermark: self.watermark,
            rows: self.rows.len(),
        }
    }
}

/// What the planner needs to know about an available index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDescriptor {
    pub domain: String,
    pub shape: IndexShape,
    pub schema_version: u64,
    pub watermark: Option<RecordId>,
    pub rows: usize,
}

/// Result of one `build_or_refresh` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshOutcome {
    /// Records folded in by this call
    pub incorporated: usize,
    pub watermark: Option<RecordId>,
    /// Built from scratch (new index or schema version change)
    pub rebuilt: bool,
}

/// 인덱스 집합
///
/// `domain/shape` 키별 스냅샷을 `Arc`로 보관하며, 선택적으로 백엔드에 영속화합니다.
pub struct IndexSet {
    snapshots: DashMap<String, Arc<IndexSnapshot>>,
    backend: Option<Arc<dyn StorageBackend>>,
}

impl IndexSet {
    /// Index set without persistence.
    pub fn new() -> Self {
        Self {
            snapshots: DashMap::new(),
            backend: None,
        }
    }

    /// Index set persisting every published snapshot to `backend`.
    pub fn with_backend(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            snapshots: DashMap::new(),
            backend: Some(backend),
        }
    }

    /// Loads persisted snapshots.
    ///
    /// Snapshots that fail to decode are discarded; their `(domain, shape)`
    /// pairs are returned so the caller can rebuild them from the record log.
    pub fn load(&self) -> MelvinResult<Vec<(String, IndexShape)>> {
        let Some(backend) = &self.backend else {
            return Ok(Vec::new());
        };
        let mut corrupt = Vec::new();
        for (key, bytes) in backend.scan_meta(INDEX_TREE, "")? {
            match persist::decode(&bytes) {
                Ok(snapshot) => {
                    self.snapshots.insert(key, Arc::new(snapshot));
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "discarding unreadable index snapshot");
                    backend.delete_meta(INDEX_TREE, &key)?;
                    if let Some((domain, shape)) = persist::split_key(&key) {
                        corrupt.push((domain.to_string(), IndexShape::parse(shape)));
                    }
                }
            }
        }
        info!(loaded = self.snapshots.len(), corrupt = corrupt.len(), "loaded index snapshots");
        Ok(corrupt)
    }

    /// Builds the index or folds in records past its watermark.
    ///
    /// Refreshing with nothing new is a no-op. A snapshot computed under an
    /// older schema version is rebuilt from scratch.
    pub fn build_or_refresh(
        &self,
        schema: &DomainSchema,
        store: &RecordStore,
        shape: &IndexShape,
    ) -> MelvinResult<RefreshOutcome> {
        shape.validate(schema)?;
        let key = persist::snapshot_key(&schema.domain, &shape.key());
        let previous = self.snapshots.get(&key).map(|r| Arc::clone(r.value()));

        let (mut next, rebuilt) = match previous.as_deref() {
            Some(prev) if prev.schema_version == schema.version => (prev.clone(), false),
            Some(prev) => {
                warn!(
                    index = %key,
                    built = prev.schema_version,
                    current = schema.version,
                    "schema changed, rebuilding index"
                );
                (IndexSnapshot::empty(schema, &prev.shape), true)
            }
            None => (IndexSnapshot::empty(schema, shape), true),
        };

        let dims: Vec<&DimensionDef> = next
            .shape
            .dims()
            .iter()
            .filter_map(|d| schema.dimension(d))
            .collect();
        let measures: Vec<&MeasureDef> = next
            .measures
            .iter()
            .filter_map(|m| schema.measure(m))
            .collect();

        let mut scan = store.scan_after(&schema.domain, next.watermark, TimeRange::all())?;
        let mut incorporated = 0;
        for record in &mut scan {
            next.fold(schema, &dims, &measures, &record?);
            incorporated += 1;
        }
        let watermark = next.watermark.max(scan.upper_bound());

        if !rebuilt && incorporated == 0 && watermark == next.watermark {
            debug!(index = %key, "index already current");
            return Ok(RefreshOutcome {
                incorporated,
                watermark,
                rebuilt,
            });
        }
        next.watermark = watermark;

        if let Some(backend) = &self.backend {
            backend.put_meta(INDEX_TREE, &key, &persist::encode(&next)?)?;
        }
        debug!(
            index = %key,
            incorporated,
            rows = next.rows.len(),
            watermark = ?watermark,
            "published index snapshot"
        );
        self.snapshots.insert(key, Arc::new(next));

        Ok(RefreshOutcome {
            incorporated,
            watermark,
            rebuilt,
        })
    }

    /// Refreshes every index of the domain.
    pub fn refresh_domain(&self, schema: &DomainSchema, store: &RecordStore) -> MelvinResult<Vec<RefreshOutcome>> {
        self.shapes(&schema.domain)
            .iter()
            .map(|shape| self.build_or_refresh(schema, store, shape))
            .collect()
    }

    /// 현재 스냅샷 조회
    pub fn lookup(&self, domain: &str, shape: &IndexShape) -> MelvinResult<Arc<IndexSnapshot>> {
        self.snapshots
            .get(&persist::snapshot_key(domain, &shape.key()))
            .map(|r| Arc::clone(r.value()))
            .ok_or_else(|| MelvinError::NotFound(format!("index {shape} in domain '{domain}'")))
    }

    pub fn drop_index(&self, domain: &str, shape: &IndexShape) -> MelvinResult<bool> {
        let key = persist::snapshot_key(domain, &shape.key());
        let existed = self.snapshots.remove(&key).is_some();
        if let Some(backend) = &self.backend {
            backend.delete_meta(INDEX_TREE, &key)?;
        }
        Ok(existed)
    }

    /// Drops every index of the domain; returns how many were dropped.
    pub fn drop_domain(&self, domain: &str) -> MelvinResult<usize> {
        let shapes = self.shapes(domain);
        for shape in &shapes {
            self.drop_index(domain, shape)?;
        }
        if !shapes.is_empty() {
            info!(domain = %domain, dropped = shapes.len(), "dropped domain indexes");
        }
        Ok(shapes.len())
    }

    /// Shapes indexed for the domain, ordered by shape key.
    pub fn shapes(&self, domain: &str) -> Vec<IndexShape> {
        let mut shapes: Vec<IndexShape> = self
            .snapshots
            .iter()
            .filter(|r| r.value().domain == domain)
            .map(|r| r.value().shape.clone())
            .collect();
        shapes.sort_by_key(IndexShape::key);
        shapes
    }

    /// Descriptors of the domain's indexes for planning.
    pub fn descriptors(&self, domain: &str) -> Vec<IndexDescriptor> {
        let mut descriptors: Vec<IndexDescriptor> = self
            .snapshots
            .iter()
            .filter(|r| r.value().domain == domain)
            .map(|r| r.value().descriptor())
            .collect();
        descriptors.sort_by_key(|d| d.shape.key());
        descriptors
    }

    /// Domains with at least one index.
    pub fn domains(&self) -> Vec<String> {
        let mut domains: Vec<String> = self.snapshots.iter().map(|r| r.value().domain.clone()).collect();
        domains.sort();
        domains.dedup();
        domains
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

impl Default for IndexSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DurabilityLevel;
    use crate::record::IngestRecord;
    use crate::schema::{AggregateFunction, DimensionDef, MeasureDef};
    use crate::storage::InMemoryBackend;
    use crate::time::Granularity;
    use crate::value::Value;

    fn schema() -> DomainSchema {
        DomainSchema::new("qa")
            .with_measure(MeasureDef::integer("tokens"))
            .with_measure(MeasureDef::count("queries"))
            .with_dimension(DimensionDef::categorical("engine"))
            .with_dimension(DimensionDef::date("day", Granularity::Day))
    }

    fn setup() -> (DomainSchema, RecordStore, Arc<dyn StorageBackend>) {
        let backend: Arc<dyn StorageBackend> = Arc::new(InMemoryBackend::new());
        let store = RecordStore::new(Arc::clone(&backend), DurabilityLevel::Lazy);
        let mut schema = schema();
        schema.version = 1;
        (schema, store, backend)
    }

    fn append(store: &RecordStore, ts: i64, engine: &str, tokens: i64) {
        store
            .append(
                "qa",
                IngestRecord::new().at(ts).field("engine", engine).field("tokens", tokens),
            )
            .unwrap();
    }

    fn tokens_for(snapshot: &IndexSnapshot, engine: &str) -> f64 {
        let m = snapshot.measure_index("tokens").unwrap();
        let key = GroupKey::from_vec(vec![Value::from(engine)]);
        snapshot.rows[&key][m].finalize(AggregateFunction::Sum).unwrap()
    }

    #[test]
    fn test_build_then_incremental_refresh() {
        let (schema, store, _) = setup();
        let index = IndexSet::new();
        let shape = IndexShape::new(["engine"]);

        append(&store, 1_000, "gpt-4", 100);
        append(&store, 2_000, "gpt-4", 50);
        let first = index.build_or_refresh(&schema, &store, &shape).unwrap();
        assert!(first.rebuilt);
        assert_eq!(first.incorporated, 2);

        append(&store, 3_000, "claude-3", 10);
        let second = index.build_or_refresh(&schema, &store, &shape).unwrap();
        assert!(!second.rebuilt);
        assert_eq!(second.incorporated, 1);

        let snapshot = index.lookup("qa", &shape).unwrap();
        assert_eq!(tokens_for(&snapshot, "gpt-4"), 150.0);
        assert_eq!(tokens_for(&snapshot, "claude-3"), 10.0);
        assert_eq!(snapshot.watermark, store.last_id("qa").unwrap());
    }

    #[test]
    fn test_refresh_twice_is_noop() {
        let (schema, store, _) = setup();
        let index = IndexSet::new();
        let shape = IndexShape::new(["engine"]);
        append(&store, 1_000, "gpt-4", 100);

        index.build_or_refresh(&schema, &store, &shape).unwrap();
        let before = index.lookup("qa", &shape).unwrap();
        let again = index.build_or_refresh(&schema, &store, &shape).unwrap();
        assert_eq!(again.incorporated, 0);
        let after = index.lookup("qa", &shape).unwrap();
        assert!(Arc::ptr_eq(&before, &after));
    }

    #[test]
    fn test_readers_keep_old_snapshot() {
        let (schema, store, _) = setup();
        let index = IndexSet::new();
        let shape = IndexShape::new(["engine"]);
        append(&store, 1_000, "gpt-4", 100);
        index.build_or_refresh(&schema, &store, &shape).unwrap();

        let held = index.lookup("qa", &shape).unwrap();
        append(&store, 2_000, "gpt-4", 1);
        index.build_or_refresh(&schema, &store, &shape).unwrap();
        assert_eq!(tokens_for(&held, "gpt-4"), 100.0);
        assert_eq!(tokens_for(&index.lookup("qa", &shape).unwrap(), "gpt-4"), 101.0);
    }

    #[test]
    fn test_schema_version_change_rebuilds() {
        let (schema, store, _) = setup();
        let index = IndexSet::new();
        let shape = IndexShape::new(["engine"]);
        append(&store, 1_000, "gpt-4", 100);
        index.build_or_refresh(&schema, &store, &shape).unwrap();

        let mut revised = schema.clone().with_measure(MeasureDef::decimal("cost"));
        revised.version = 2;
        let outcome = index.build_or_refresh(&revised, &store, &shape).unwrap();
        assert!(outcome.rebuilt);
        assert_eq!(outcome.incorporated, 1);
        let snapshot = index.lookup("qa", &shape).unwrap();
        assert_eq!(snapshot.schema_version, 2);
        assert!(snapshot.measure_index("cost").is_some());
    }

    #[test]
    fn test_lookup_missing_and_drop() {
        let (schema, store, _) = setup();
        let index = IndexSet::new();
        let shape = IndexShape::new(["engine", "day"]);
        assert!(matches!(index.lookup("qa", &shape), Err(MelvinError::NotFound(_))));

        append(&store, 1_000, "gpt-4", 100);
        index.build_or_refresh(&schema, &store, &shape).unwrap();
        assert!(index.lookup("qa", &IndexShape::new(["day", "engine"])).is_ok());
        assert_eq!(index.descriptors("qa").len(), 1);
        assert_eq!(index.drop_domain("qa").unwrap(), 1);
        assert!(index.is_empty());
    }

    #[test]
    fn test_persisted_snapshots_reload() {
        let (schema, store, backend) = setup();
        let index = IndexSet::with_backend(Arc::clone(&backend));
        let shape = IndexShape::new(["engine"]);
        append(&store, 1_000, "gpt-4", 100);
        index.build_or_refresh(&schema, &store, &shape).unwrap();

        backend.put_meta(INDEX_TREE, "qa/day", b"garbage").unwrap();

        let reloaded = IndexSet::with_backend(Arc::clone(&backend));
        let corrupt = reloaded.load().unwrap();
        assert_eq!(corrupt, vec![("qa".to_string(), IndexShape::new(["day"]))]);
        assert_eq!(tokens_for(&reloaded.lookup("qa", &shape).unwrap(), "gpt-4"), 100.0);
        assert_eq!(backend.get_meta(INDEX_TREE, "qa/day").unwrap(), None);
    }
}
