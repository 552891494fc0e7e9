//! sled-backed persistent storage.
//!
//! Each domain's record log is a separate sled `Tree` named `records/<domain>`
//! keyed by the big-endian record id, so tree order is id order. Metadata
//! trees live alongside under their own names.

use crate::error::{MelvinError, MelvinResult};
use crate::record::{Record, RecordId};
use crate::storage::StorageBackend;
use std::path::Path;

const RECORD_TREE_PREFIX: &str = "records/";
const META_TREE_PREFIX: &str = "meta/";

/// sled-backed persistent storage.
pub struct SledBackend {
    db: sled::Db,
}

impl SledBackend {
    /// Open the store at the given directory path.
    pub fn open(path: &Path) -> MelvinResult<Self> {
        Self::open_with_flush_interval(path, Some(500))
    }

    /// Open with sled's background flush interval (`None` disables it).
    pub fn open_with_flush_interval(path: &Path, flush_every_ms: Option<u64>) -> MelvinResult<Self> {
        let db = sled::Config::new()
            .path(path)
            .flush_every_ms(flush_every_ms)
            .open()?;
        Ok(Self { db })
    }

    /// Open a temporary store (for testing). Data is deleted on drop.
    pub fn open_temporary() -> MelvinResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    fn records(&self, domain: &str) -> MelvinResult<sled::Tree> {
        Ok(self.db.open_tree(format!("{RECORD_TREE_PREFIX}{domain}"))?)
    }

    fn meta(&self, tree: &str) -> MelvinResult<sled::Tree> {
        Ok(self.db.open_tree(format!("{META_TREE_PREFIX}{tree}"))?)
    }

    fn has_records_tree(&self, domain: &str) -> bool {
        let name = format!("{RECORD_TREE_PREFIX}{domain}");
        self.db.tree_names().iter().any(|n| n.as_ref() == name.as_bytes())
    }
}

fn decode(bytes: &[u8]) -> MelvinResult<Record> {
    Ok(bincode::deserialize(bytes)?)
}

fn decode_key(key: &[u8]) -> MelvinResult<RecordId> {
    RecordId::from_key(key)
        .ok_or_else(|| MelvinError::Storage(format!("malformed record key of {} bytes", key.len())))
}

impl StorageBackend for SledBackend {
    fn insert_record(&self, record: &Record) -> MelvinResult<bool> {
        let tree = self.records(&record.domain)?;
        let encoded = bincode::serialize(record)?;
        let outcome = tree.compare_and_swap(record.id.to_key(), None::<&[u8]>, Some(encoded))?;
        Ok(outcome.is_ok())
    }

    fn get_record(&self, domain: &str, id: RecordId) -> MelvinResult<Option<Record>> {
        if !self.has_records_tree(domain) {
            return Ok(None);
        }
        let tree = self.records(domain)?;
        tree.get(id.to_key())?.map(|ivec| decode(&ivec)).transpose()
    }

    fn scan_records(
        &self,
        domain: &str,
        after: Option<RecordId>,
        upto: RecordId,
        limit: usize,
    ) -> MelvinResult<Vec<Record>> {
        let start = match after {
            Some(id) if id.0 == u64::MAX => return Ok(Vec::new()),
            Some(id) => RecordId(id.0 + 1),
            None => RecordId(0),
        };
        if start > upto || !self.has_records_tree(domain) {
            return Ok(Vec::new());
        }
        let tree = self.records(domain)?;

        let mut batch = Vec::with_capacity(limit.min(1024));
        for item in tree.range(start.to_key()..=upto.to_key()).take(limit) {
            let (_, v) = item?;
            batch.push(decode(&v)?);
        }
        Ok(batch)
    }

    fn last_record_id(&self, domain: &str) -> MelvinResult<Option<RecordId>> {
        if !self.has_records_tree(domain) {
            return Ok(None);
        }
        let tree = self.records(domain)?;
        tree.last()?.map(|(k, _)| decode_key(&k)).transpose()
    }

    fn remove_records(&self, domain: &str, ids: &[RecordId]) -> MelvinResult<usize> {
        if !self.has_records_tree(domain) {
            return Ok(0);
        }
        let tree = self.records(domain)?;
        let mut removed = 0;
        for id in ids {
            if tree.remove(id.to_key())?.is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn record_count(&self, domain: &str) -> MelvinResult<usize> {
        if !self.has_records_tree(domain) {
            return Ok(0);
        }
        Ok(self.records(domain)?.len())
    }

    fn record_domains(&self) -> MelvinResult<Vec<String>> {
        let mut domains: Vec<String> = self
            .db
            .tree_names()
            .iter()
            .filter_map(|name| {
                std::str::from_utf8(name)
                    .ok()
                    .and_then(|n| n.strip_prefix(RECORD_TREE_PREFIX))
                    .map(str::to_string)
            })
            .collect();
        domains.sort();
        Ok(domains)
    }

    fn put_meta(&self, tree: &str, key: &str, value: &[u8]) -> MelvinResult<()> {
        self.meta(tree)?.insert(key.as_bytes(), value)?;
        Ok(())
    }

    fn get_meta(&self, tree: &str, key: &str) -> MelvinResult<Option<Vec<u8>>> {
        Ok(self.meta(tree)?.get(key.as_bytes())?.map(|v| v.to_vec()))
    }

    fn delete_meta(&self, tree: &str, key: &str) -> MelvinResult<bool> {
        Ok(self.meta(tree)?.remove(key.as_bytes())?.is_some())
    }

    fn scan_meta(&self, tree: &str, prefix: &str) -> MelvinResult<Vec<(String, Vec<u8>)>> {
        let mut entries = Vec::new();
        for item in self.meta(tree)?.scan_prefix(prefix.as_bytes()) {
            let (k, v) = item?;
            let key = String::from_utf8(k.to_vec())
                .map_err(|e| MelvinError::Storage(format!("non-utf8 metadata key: {e}")))?;
            entries.push((key, v.to_vec()));
        }
        Ok(entries)
    }

    fn flush(&self) -> MelvinResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn record(domain: &str, id: u64) -> Record {
        Record {
            id: RecordId(id),
            domain: domain.to_string(),
            timestamp: 0,
            fields: [("n".to_string(), Value::Int(id as i64))].into_iter().collect(),
        }
    }

    #[test]
    fn test_insert_if_absent() {
        let backend = SledBackend::open_temporary().unwrap();
        assert!(backend.insert_record(&record("qa", 1)).unwrap());
        assert!(!backend.insert_record(&record("qa", 1)).unwrap());
        assert_eq!(backend.record_count("qa").unwrap(), 1);
    }

    #[test]
    fn test_scan_orders_by_id() {
        let backend = SledBackend::open_temporary().unwrap();
        for id in [300, 2, 256, 40] {
            backend.insert_record(&record("qa", id)).unwrap();
        }
        let batch = backend.scan_records("qa", None, RecordId(u64::MAX), 10).unwrap();
        let ids: Vec<u64> = batch.iter().map(|r| r.id.0).collect();
        assert_eq!(ids, vec![2, 40, 256, 300]);

        let resumed = backend
            .scan_records("qa", Some(RecordId(40)), RecordId(256), 10)
            .unwrap();
        assert_eq!(resumed.len(), 1);
        assert_eq!(resumed[0].id, RecordId(256));
    }

    #[test]
    fn test_unknown_domain_is_empty() {
        let backend = SledBackend::open_temporary().unwrap();
        assert_eq!(backend.last_record_id("nope").unwrap(), None);
        assert_eq!(backend.remove_records("nope", &[RecordId(1)]).unwrap(), 0);
        assert!(backend.record_domains().unwrap().is_empty());
    }

    #[test]
    fn test_meta_round_trip() {
        let backend = SledBackend::open_temporary().unwrap();
        backend.put_meta("indexes", "qa/engine", b"abc").unwrap();
        backend.put_meta("indexes", "git/author", b"def").unwrap();
        let qa = backend.scan_meta("indexes", "qa/").unwrap();
        assert_eq!(qa, vec![("qa/engine".to_string(), b"abc".to_vec())]);
        assert!(backend.delete_meta("indexes", "qa/engine").unwrap());
        assert_eq!(backend.get_meta("indexes", "qa/engine").unwrap(), None);
    }
}
