//! Record Store — append-only per-domain record log.
//!
//! Ids are unique and strictly increasing within a domain. Generated ids are
//! derived from the record time (`millis * 1000 + sequence`) and never reuse a
//! value once issued, even after the newest records are pruned.

use crate::config::DurabilityLevel;
use crate::error::{MelvinError, MelvinResult};
use crate::record::{IngestRecord, Record, RecordId};
use crate::storage::{SEQUENCE_TREE, StorageBackend};
use crate::time::{TimeRange, now_millis};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info};

/// Records fetched from the backend per scan step.
const SCAN_BATCH: usize = 512;

pub struct RecordStore {
    backend: Arc<dyn StorageBackend>,
    durability: DurabilityLevel,
    /// Highest id ever issued per domain (loaded lazily)
    sequences: DashMap<String, u64>,
}

impl RecordStore {
    pub fn new(backend: Arc<dyn StorageBackend>, durability: DurabilityLevel) -> Self {
        Self {
            backend,
            durability,
            sequences: DashMap::new(),
        }
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// Appends a record, assigning or validating its id.
    ///
    /// Callers must serialize appends per domain; the engine does so with its
    /// domain locks.
    pub fn append(&self, domain: &str, ingest: IngestRecord) -> MelvinResult<RecordId> {
        let last = self.issued_high_water(domain)?;

        let id = match ingest.id {
            Some(explicit) => {
                let id = RecordId(explicit);
                if self.backend.get_record(domain, id)?.is_some() {
                    return Err(MelvinError::DuplicateId {
                        domain: domain.to_string(),
                        id: explicit,
                    });
                }
                if let Some(l) = last
                    && explicit <= l
                {
                    return Err(MelvinError::InvalidArgument(format!(
                        "record id {explicit} is not greater than the last id {l} of domain '{domain}'"
                    )));
                }
                id
            }
            None => {
                let derived = RecordId::from_millis(ingest.timestamp.unwrap_or_else(now_millis));
                match last {
                    Some(l) if derived.0 <= l => RecordId(l.checked_add(1).ok_or_else(|| {
                        MelvinError::Storage(format!("id space exhausted for domain '{domain}'"))
                    })?),
                    _ => derived,
                }
            }
        };

        let record = Record {
            id,
            domain: domain.to_string(),
            timestamp: ingest.timestamp.unwrap_or_else(|| id.millis()),
            fields: ingest.fields,
        };
        if !self.backend.insert_record(&record)? {
            return Err(MelvinError::DuplicateId {
                domain: domain.to_string(),
                id: id.0,
            });
        }
        if self.durability == DurabilityLevel::Full {
            self.backend.flush()?;
        }
        self.sequences.insert(domain.to_string(), id.0);
        Ok(id)
    }

    /// Lazy scan in id order, bounded by the last id present right now.
    pub fn scan(&self, domain: &str, range: TimeRange) -> MelvinResult<RecordScan> {
        self.scan_after(domain, None, range)
    }

    /// Resumes a scan after `last_seen`.
    pub fn scan_after(
        &self,
        domain: &str,
        last_seen: Option<RecordId>,
        range: TimeRange,
    ) -> MelvinResult<RecordScan> {
        let upto = self.backend.last_record_id(domain)?;
        Ok(RecordScan {
            backend: Arc::clone(&self.backend),
            domain: domain.to_string(),
            cursor: last_seen,
            upto,
            range,
            buffer: VecDeque::new(),
            exhausted: upto.is_none(),
        })
    }

    /// Removes records with `timestamp < before`; returns how many were removed.
    pub fn prune(&self, domain: &str, before: i64) -> MelvinResult<usize> {
        let Some(last) = self.backend.last_record_id(domain)? else {
            return Ok(0);
        };
        // keep the sequence past anything issued, whatever gets removed
        let high_water = self.issued_high_water(domain)?.unwrap_or(last.0).max(last.0);
        self.backend
            .put_meta(SEQUENCE_TREE, domain, &high_water.to_be_bytes())?;

        let mut doomed = Vec::new();
        for record in self.scan(domain, TimeRange::before(before))? {
            doomed.push(record?.id);
        }
        let removed = self.backend.remove_records(domain, &doomed)?;
        if self.durability != DurabilityLevel::None {
            self.backend.flush()?;
        }
        info!(domain = %domain, removed, before, "pruned records");
        Ok(removed)
    }

    pub fn get(&self, domain: &str, id: RecordId) -> MelvinResult<Option<Record>> {
        self.backend.get_record(domain, id)
    }

    pub fn len(&self, domain: &str) -> MelvinResult<usize> {
        self.backend.record_count(domain)
    }

    pub fn is_empty(&self, domain: &str) -> MelvinResult<bool> {
        Ok(self.len(domain)? == 0)
    }

    /// Highest id currently present.
    pub fn last_id(&self, domain: &str) -> MelvinResult<Option<RecordId>> {
        self.backend.last_record_id(domain)
    }

    pub fn domains(&self) -> MelvinResult<Vec<String>> {
        self.backend.record_domains()
    }

    pub fn flush(&self) -> MelvinResult<()> {
        self.backend.flush()
    }

    fn issued_high_water(&self, domain: &str) -> MelvinResult<Option<u64>> {
        if let Some(v) = self.sequences.get(domain) {
            return Ok(Some(*v));
        }
        let present = self.backend.last_record_id(domain)?.map(|id| id.0);
        let persisted = self
            .backend
            .get_meta(SEQUENCE_TREE, domain)?
            .and_then(|bytes| bytes.as_slice().try_into().ok().map(u64::from_be_bytes));
        let high_water = present.max(persisted);
        if let Some(v) = high_water
            && let Entry::Vacant(slot) = self.sequences.entry(domain.to_string())
        {
            debug!(domain = %domain, high_water = v, "loaded id sequence");
            slot.insert(v);
        }
        Ok(high_water)
    }
}

/// Lazy, finite record iterator.
///
/// Pulls fixed-size batches from the backend; records appended after the scan
/// began are not visited. Dropping the iterator early costs nothing.
pub struct RecordScan {
    backend: Arc<dyn StorageBackend>,
    domain: String,
    cursor: Option<RecordId>,
    upto: Option<RecordId>,
    range: TimeRange,
    buffer: VecDeque<Record>,
    exhausted: bool,
}

impl RecordScan {
    /// Last id handed out (or skipped by the time filter); resume with
    /// [`RecordStore::scan_after`].
    pub fn last_seen(&self) -> Option<RecordId> {
        self.cursor
    }

    /// The id bound fixed when the scan began.
    pub fn upper_bound(&self) -> Option<RecordId> {
        self.upto
    }

    fn fill(&mut self) -> MelvinResult<()> {
        let Some(upto) = self.upto else {
            self.exhausted = true;
            return Ok(());
        };
        let batch = self
            .backend
            .scan_records(&self.domain, self.cursor, upto, SCAN_BATCH)?;
        if batch.len() < SCAN_BATCH {
            self.exhausted = true;
        }
        self.buffer.extend(batch);
        Ok(())
    }
}

impl Iterator for RecordScan {
    type Item = MelvinResult<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.buffer.pop_front() {
                self.cursor = Some(record.id);
                if self.range.contains(record.timestamp) {
                    return Some(Ok(record));
                }
                continue;
            }
            if self.exhausted {
                return None;
            }
            if let Err(e) = self.fill() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryBackend;
    use crate::value::Value;

    fn store() -> RecordStore {
        RecordStore::new(Arc::new(InMemoryBackend::new()), DurabilityLevel::Lazy)
    }

    fn ids(scan: RecordScan) -> Vec<u64> {
        scan.map(|r| r.unwrap().id.0).collect()
    }

    #[test]
    fn test_generated_ids_increase() {
        let store = store();
        let a = store.append("qa", IngestRecord::new().at(5_000)).unwrap();
        // same millisecond, earlier timestamp: still strictly greater
        let b = store.append("qa", IngestRecord::new().at(5_000)).unwrap();
        let c = store.append("qa", IngestRecord::new().at(1_000)).unwrap();
        assert_eq!(a, RecordId(5_000_000));
        assert!(a < b && b < c);
        assert_eq!(store.get("qa", c).unwrap().unwrap().timestamp, 1_000);
    }

    #[test]
    fn test_timestamp_derived_from_id() {
        let store = store();
        let id = store.append("qa", IngestRecord::new().with_id(7_000_003)).unwrap();
        assert_eq!(store.get("qa", id).unwrap().unwrap().timestamp, 7_000);
    }

    #[test]
    fn test_duplicate_id() {
        let store = store();
        store.append("qa", IngestRecord::new().with_id(10)).unwrap();
        assert!(matches!(
            store.append("qa", IngestRecord::new().with_id(10)),
            Err(MelvinError::DuplicateId { id: 10, .. })
        ));
        assert!(matches!(
            store.append("qa", IngestRecord::new().with_id(9)),
            Err(MelvinError::InvalidArgument(_))
        ));
        // other domains have their own id space
        assert!(store.append("git", IngestRecord::new().with_id(10)).is_ok());
    }

    #[test]
    fn test_scan_time_range_and_resume() {
        let store = store();
        for ts in [1_000, 2_000, 3_000, 4_000] {
            store.append("qa", IngestRecord::new().at(ts).field("n", ts)).unwrap();
        }
        let all = ids(store.scan("qa", TimeRange::all()).unwrap());
        assert_eq!(all.len(), 4);

        let mid = ids(store.scan("qa", TimeRange::new(Some(2_000), Some(4_000))).unwrap());
        assert_eq!(mid, vec![2_000_000, 3_000_000]);

        let resumed = ids(store
            .scan_after("qa", Some(RecordId(2_000_000)), TimeRange::all())
            .unwrap());
        assert_eq!(resumed, vec![3_000_000, 4_000_000]);
    }

    #[test]
    fn test_scan_bounded_at_start() {
        let store = store();
        store.append("qa", IngestRecord::new().at(1_000)).unwrap();
        let mut scan = store.scan("qa", TimeRange::all()).unwrap();
        store.append("qa", IngestRecord::new().at(2_000)).unwrap();
        assert!(scan.next().is_some());
        assert!(scan.next().is_none());
    }

    #[test]
    fn test_scan_across_batches() {
        let store = store();
        for i in 0..(SCAN_BATCH as i64 * 2 + 7) {
            store.append("qa", IngestRecord::new().at(i + 1)).unwrap();
        }
        assert_eq!(store.scan("qa", TimeRange::all()).unwrap().count(), SCAN_BATCH * 2 + 7);
    }

    #[test]
    fn test_prune() {
        let store = store();
        for ts in [1_000, 2_000, 3_000] {
            store
                .append("qa", IngestRecord::new().at(ts).field("engine", Value::from("x")))
                .unwrap();
        }
        assert_eq!(store.prune("qa", 2_500).unwrap(), 2);
        assert_eq!(store.len("qa").unwrap(), 1);
        assert_eq!(store.prune("unknown", 2_500).unwrap(), 0);
    }

    #[test]
    fn test_prune_keeps_sequence_monotonic() {
        let backend: Arc<dyn StorageBackend> = Arc::new(InMemoryBackend::new());
        let store = RecordStore::new(Arc::clone(&backend), DurabilityLevel::Lazy);
        let last = store.append("qa", IngestRecord::new().at(9_000)).unwrap();
        store.prune("qa", 10_000).unwrap();
        assert!(store.is_empty("qa").unwrap());

        // a fresh store over the same backend must not reissue the pruned id
        let reopened = RecordStore::new(backend, DurabilityLevel::Lazy);
        let next = reopened.append("qa", IngestRecord::new().at(9_000)).unwrap();
        assert!(next > last);
    }
}
