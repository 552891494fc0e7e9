//! In-memory storage backend.
//!
//! BTreeMap per domain keeps records in id order; every call takes the lock
//! for one short step only, so scans never block appends for long.

use crate::error::MelvinResult;
use crate::record::{Record, RecordId};
use crate::storage::StorageBackend;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Arc;

type RecordLog = BTreeMap<u64, Arc<Record>>;

/// In-memory storage backend.
#[derive(Default)]
pub struct InMemoryBackend {
    records: RwLock<HashMap<String, RecordLog>>,
    meta: RwLock<HashMap<String, BTreeMap<String, Vec<u8>>>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for InMemoryBackend {
    fn insert_record(&self, record: &Record) -> MelvinResult<bool> {
        let mut records = self.records.write();
        let log = records.entry(record.domain.clone()).or_default();
        if log.contains_key(&record.id.0) {
            return Ok(false);
        }
        log.insert(record.id.0, Arc::new(record.clone()));
        Ok(true)
    }

    fn get_record(&self, domain: &str, id: RecordId) -> MelvinResult<Option<Record>> {
        Ok(self
            .records
            .read()
            .get(domain)
            .and_then(|log| log.get(&id.0))
            .map(|r| Record::clone(r)))
    }

    fn scan_records(
        &self,
        domain: &str,
        after: Option<RecordId>,
        upto: RecordId,
        limit: usize,
    ) -> MelvinResult<Vec<Record>> {
        let lower = match after {
            Some(id) => Bound::Excluded(id.0),
            None => Bound::Unbounded,
        };
        if after.is_some_and(|a| a >= upto) {
            return Ok(Vec::new());
        }
        let records = self.records.read();
        let Some(log) = records.get(domain) else {
            return Ok(Vec::new());
        };
        Ok(log
            .range((lower, Bound::Included(upto.0)))
            .take(limit)
            .map(|(_, r)| Record::clone(r))
            .collect())
    }

    fn last_record_id(&self, domain: &str) -> MelvinResult<Option<RecordId>> {
        Ok(self
            .records
            .read()
            .get(domain)
            .and_then(|log| log.keys().next_back())
            .map(|id| RecordId(*id)))
    }

    fn remove_records(&self, domain: &str, ids: &[RecordId]) -> MelvinResult<usize> {
        let mut records = self.records.write();
        let Some(log) = records.get_mut(domain) else {
            return Ok(0);
        };
        Ok(ids.iter().filter(|id| log.remove(&id.0).is_some()).count())
    }

    fn record_count(&self, domain: &str) -> MelvinResult<usize> {
        Ok(self.records.read().get(domain).map_or(0, BTreeMap::len))
    }

    fn record_domains(&self) -> MelvinResult<Vec<String>> {
        let mut domains: Vec<String> = self.records.read().keys().cloned().collect();
        domains.sort();
        Ok(domains)
    }

    fn put_meta(&self, tree: &str, key: &str, value: &[u8]) -> MelvinResult<()> {
        self.meta
            .write()
            .entry(tree.to_string())
            .or_default()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn get_meta(&self, tree: &str, key: &str) -> MelvinResult<Option<Vec<u8>>> {
        Ok(self.meta.read().get(tree).and_then(|t| t.get(key)).cloned())
    }

    fn delete_meta(&self, tree: &str, key: &str) -> MelvinResult<bool> {
        Ok(self
            .meta
            .write()
            .get_mut(tree)
            .is_some_and(|t| t.remove(key).is_some()))
    }

    fn scan_meta(&self, tree: &str, prefix: &str) -> MelvinResult<Vec<(String, Vec<u8>)>> {
        Ok(self
            .meta
            .read()
            .get(tree)
            .map(|t| {
                t.range(prefix.to_string()..)
                    .take_while(|(k, _)| k.starts_with(prefix))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn flush(&self) -> MelvinResult<()> {
        Ok(())
    }
}
