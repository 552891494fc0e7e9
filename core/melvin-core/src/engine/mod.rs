//! Engine — 스키마, 레코드 저장소, 인덱스, 쿼리 파이프라인을 묶는 진입점
//!
//! Writers (`append`, index refresh, `prune`) serialize per domain through a
//! domain lock and run concurrently across domains. Queries take no lock:
//! they read `Arc` snapshots of schemas and indexes and scan records bounded
//! by the last id present when the scan began.

pub mod constructors;
pub mod index;
pub mod ingest;
pub mod metadata;
pub mod query;

use crate::config::EngineConfig;
use crate::error::MelvinResult;
use crate::index::IndexSet;
use crate::schema::{DomainSchema, SchemaRegistry};
use crate::storage::{RecordStore, StorageBackend};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;

/// MELVIN 엔진
///
/// `Send + Sync`; share it behind an `Arc` for concurrent queries.
pub struct Engine {
    pub(crate) config: EngineConfig,
    pub(crate) backend: Arc<dyn StorageBackend>,
    pub(crate) registry: Arc<SchemaRegistry>,
    pub(crate) store: RecordStore,
    pub(crate) indexes: IndexSet,
    /// 도메인별 단일 writer 락
    pub(crate) domain_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl Engine {
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn indexes(&self) -> &IndexSet {
        &self.indexes
    }

    /// Current schema of `domain`.
    pub fn schema(&self, domain: &str) -> MelvinResult<Arc<DomainSchema>> {
        self.registry.get(domain)
    }

    /// Registered domain names.
    pub fn domains(&self) -> Vec<String> {
        self.registry.domains()
    }

    /// Forces buffered writes to disk.
    pub fn flush(&self) -> MelvinResult<()> {
        self.backend.flush()
    }

    pub(crate) fn domain_lock(&self, domain: &str) -> Arc<Mutex<()>> {
        Arc::clone(self.domain_locks.entry(domain.to_string()).or_default().value())
    }
}
