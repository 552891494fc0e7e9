//! Engine Constructors — Engine 인스턴스 생성 팩토리 메서드

use super::{Engine, metadata};
use crate::config::{DurabilityLevel, EngineConfig};
use crate::error::MelvinResult;
use crate::index::IndexSet;
use crate::schema::SchemaRegistry;
use crate::storage::{InMemoryBackend, RecordStore, SledBackend, StorageBackend};
use dashmap::DashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, instrument, warn};

impl Engine {
    /// 엔진을 열거나 생성합니다.
    ///
    /// 지정된 디렉토리에 sled 데이터베이스를 생성하거나 기존 데이터를 엽니다.
    ///
    /// ```rust
    /// use melvin_core::Engine;
    ///
    /// # fn main() -> melvin_core::MelvinResult<()> {
    /// let dir = tempfile::tempdir()?;
    /// let engine = Engine::open(dir.path())?;
    /// assert!(engine.domains().is_empty());
    /// # Ok(())
    /// # }
    /// ```
    pub fn open(path: &Path) -> MelvinResult<Self> {
        Self::open_with_config(EngineConfig::new().with_data_dir(path))
    }

    /// 메모리 전용 엔진 (테스트, 임시 분석용)
    pub fn open_in_memory() -> MelvinResult<Self> {
        Self::open_with_config(EngineConfig::new())
    }

    /// `MELVIN_*` 환경 변수로 구성된 엔진
    pub fn from_env() -> MelvinResult<Self> {
        Self::open_with_config(EngineConfig::from_env()?)
    }

    #[instrument(skip(config), fields(data_dir = ?config.data_dir))]
    pub fn open_with_config(config: EngineConfig) -> MelvinResult<Self> {
        config.validate()?;

        let backend: Arc<dyn StorageBackend> = match &config.data_dir {
            Some(dir) => {
                info!("Opening engine at {:?}", dir);
                std::fs::create_dir_all(dir)?;
                let flush_every = match config.durability {
                    DurabilityLevel::Lazy => Some(config.flush_every_ms),
                    DurabilityLevel::Full | DurabilityLevel::None => None,
                };
                Arc::new(SledBackend::open_with_flush_interval(dir, flush_every)?)
            }
            None => {
                info!("Opening in-memory engine");
                Arc::new(InMemoryBackend::new())
            }
        };

        let registry = Arc::new(SchemaRegistry::with_suggestion_threshold(config.suggestion_threshold));
        let domains = metadata::restore_registry(backend.as_ref(), &registry)?;

        let store = RecordStore::new(Arc::clone(&backend), config.durability);
        let indexes = IndexSet::with_backend(Arc::clone(&backend));
        let corrupt = indexes.load()?;

        let engine = Self {
            config,
            backend,
            registry,
            store,
            indexes,
            domain_locks: DashMap::new(),
        };

        // unreadable snapshots are rebuilt from the record log
        for (domain, shape) in corrupt {
            let Ok(schema) = engine.registry.get(&domain) else {
                warn!(domain = %domain, shape = %shape, "dropping index of unregistered domain");
                continue;
            };
            warn!(domain = %domain, shape = %shape, "rebuilding corrupt index");
            engine.indexes.build_or_refresh(&schema, &engine.store, &shape)?;
        }

        info!(domains, indexes = engine.indexes.len(), "engine ready");
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory() {
        let engine = Engine::open_in_memory().unwrap();
        assert!(engine.domains().is_empty());
        assert!(engine.indexes().is_empty());
        assert!(engine.config().data_dir.is_none());
    }

    #[test]
    fn test_open_rejects_bad_config() {
        let config = EngineConfig::new().with_suggestion_threshold(1.5);
        assert!(Engine::open_with_config(config).is_err());
    }

    #[test]
    fn test_open_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("melvin");
        let engine = Engine::open(&path).unwrap();
        assert!(path.exists());
        engine.flush().unwrap();
    }
}
