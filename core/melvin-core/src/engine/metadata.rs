//! Schema persistence — 도메인별 스키마 버전 히스토리를 JSON으로 저장합니다.

use crate::error::MelvinResult;
use crate::schema::{DomainSchema, SchemaRegistry};
use crate::storage::{SCHEMA_TREE, StorageBackend};
use std::sync::Arc;

/// Writes the full version history of `domain` (oldest first).
pub fn save_schema_history(
    backend: &dyn StorageBackend,
    registry: &SchemaRegistry,
    domain: &str,
) -> MelvinResult<()> {
    let history: Vec<Arc<DomainSchema>> = registry.version_history(domain)?;
    let plain: Vec<&DomainSchema> = history.iter().map(Arc::as_ref).collect();
    backend.put_meta(SCHEMA_TREE, domain, &serde_json::to_vec(&plain)?)
}

/// Reads every persisted history.
pub fn load_schema_histories(backend: &dyn StorageBackend) -> MelvinResult<Vec<Vec<DomainSchema>>> {
    backend
        .scan_meta(SCHEMA_TREE, "")?
        .into_iter()
        .map(|(_, bytes)| Ok(serde_json::from_slice(&bytes)?))
        .collect()
}

/// Restores every persisted history into `registry`; returns the domain count.
pub fn restore_registry(backend: &dyn StorageBackend, registry: &SchemaRegistry) -> MelvinResult<usize> {
    let histories = load_schema_histories(backend)?;
    let count = histories.len();
    for history in histories {
        registry.restore(history)?;
    }
    Ok(count)
}
