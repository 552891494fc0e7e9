//! Records — one immutable fact per event.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Record identifier, unique and strictly increasing within a domain.
///
/// Generated ids are time-derived: `millis * 1000 + sequence`, so the record
/// time can be recovered from the id when no explicit timestamp is given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId(pub u64);

impl RecordId {
    /// Sequence slots available per millisecond.
    pub const SEQUENCE_SPACE: u64 = 1_000;

    pub fn from_millis(ts_ms: i64) -> Self {
        RecordId((ts_ms.max(0) as u64).saturating_mul(Self::SEQUENCE_SPACE))
    }

    /// Time the id was derived from, in epoch milliseconds.
    pub fn millis(&self) -> i64 {
        (self.0 / Self::SEQUENCE_SPACE) as i64
    }

    /// Big-endian key bytes; preserves numeric order under byte comparison.
    pub fn to_key(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    pub fn from_key(key: &[u8]) -> Option<Self> {
        let bytes: [u8; 8] = key.try_into().ok()?;
        Some(RecordId(u64::from_be_bytes(bytes)))
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A stored record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub domain: String,
    /// Epoch milliseconds
    pub timestamp: i64,
    pub fields: BTreeMap<String, Value>,
}

impl Record {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }
}

/// What an ingestion collaborator hands to `append`.
///
/// `id` and `timestamp` are optional; missing ids are allocated by the store,
/// a missing timestamp is derived from the id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestRecord {
    pub id: Option<u64>,
    pub timestamp: Option<i64>,
    pub fields: BTreeMap<String, Value>,
}

impl IngestRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }

    pub fn at(mut self, ts_ms: i64) -> Self {
        self.timestamp = Some(ts_ms);
        self
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for IngestRecord {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        IngestRecord {
            fields: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
            ..Default::default()
        }
    }
}
