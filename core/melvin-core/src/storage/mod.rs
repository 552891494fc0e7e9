//! Storage module — record logs and metadata behind one backend trait.
//!
//! The record store, schema persistence and index persistence depend only on
//! [`StorageBackend`]; sled and in-memory implementations are provided.
//!
//! # Contract
//!
//! - `insert_record`: insert-if-absent; returns `false` when the id exists.
//! - `scan_records`: ids strictly after `after`, up to and including `upto`,
//!   ascending, at most `limit` records.
//! - `last_record_id`: highest id currently present in the domain.
//! - Metadata trees are flat `key → bytes` maps, scanned in key order.

pub mod jsonl;
pub mod memory;
pub mod sled_backend;
pub mod store;

pub use jsonl::{ImportSummary, export_jsonl, import_jsonl};
pub use memory::InMemoryBackend;
pub use sled_backend::SledBackend;
pub use store::{RecordScan, RecordStore};

use crate::error::MelvinResult;
use crate::record::{Record, RecordId};

/// Metadata tree holding the schema history of each domain.
pub const SCHEMA_TREE: &str = "schemas";
/// Metadata tree holding serialized index snapshots.
pub const INDEX_TREE: &str = "indexes";
/// Metadata tree holding the highest id ever issued per domain.
pub const SEQUENCE_TREE: &str = "sequences";

/// Core storage interface.
pub trait StorageBackend: Send + Sync {
    /// Insert a record unless its id already exists in the domain.
    fn insert_record(&self, record: &Record) -> MelvinResult<bool>;

    /// Get a record by id.
    fn get_record(&self, domain: &str, id: RecordId) -> MelvinResult<Option<Record>>;

    /// Next batch of records in id order.
    fn scan_records(
        &self,
        domain: &str,
        after: Option<RecordId>,
        upto: RecordId,
        limit: usize,
    ) -> MelvinResult<Vec<Record>>;

    /// Highest id present in the domain.
    fn last_record_id(&self, domain: &str) -> MelvinResult<Option<RecordId>>;

    /// Remove records by id; returns how many existed.
    fn remove_records(&self, domain: &str, ids: &[RecordId]) -> MelvinResult<usize>;

    /// Number of records in the domain.
    fn record_count(&self, domain: &str) -> MelvinResult<usize>;

    /// Domains with a record log.
    fn record_domains(&self) -> MelvinResult<Vec<String>>;

    fn put_meta(&self, tree: &str, key: &str, value: &[u8]) -> MelvinResult<()>;

    fn get_meta(&self, tree: &str, key: &str) -> MelvinResult<Option<Vec<u8>>>;

    fn delete_meta(&self, tree: &str, key: &str) -> MelvinResult<bool>;

    /// All entries of a metadata tree whose key starts with `prefix`.
    fn scan_meta(&self, tree: &str, prefix: &str) -> MelvinResult<Vec<(String, Vec<u8>)>>;

    /// Flush any buffered data to durable storage.
    fn flush(&self) -> MelvinResult<()>;
}
