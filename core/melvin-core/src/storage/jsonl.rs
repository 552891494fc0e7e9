//! JSON Lines import/export of a domain's record log.
//!
//! One object per line: `{"id": 1704067200000000, "timestamp": 1704067200000,
//! "fields": {"engine": "gpt-4", "tokens": 100}}`. `id` and `timestamp` are
//! optional on import; arrays become tag sets.

use crate::error::{MelvinError, MelvinResult};
use crate::record::{IngestRecord, Record};
use crate::storage::RecordStore;
use crate::time::TimeRange;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{BufRead, Write};

#[derive(Debug, Serialize, Deserialize)]
struct JsonRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamp: Option<i64>,
    #[serde(default)]
    fields: BTreeMap<String, serde_json::Value>,
}

impl From<&Record> for JsonRecord {
    fn from(record: &Record) -> Self {
        JsonRecord {
            id: Some(record.id.0),
            timestamp: Some(record.timestamp),
            fields: record
                .fields
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::from(v)))
                .collect(),
        }
    }
}

impl From<JsonRecord> for IngestRecord {
    fn from(json: JsonRecord) -> Self {
        IngestRecord {
            id: json.id,
            timestamp: json.timestamp,
            fields: json
                .fields
                .into_iter()
                .map(|(k, v)| (k, Value::from(v)))
                .collect(),
        }
    }
}

/// Outcome of a JSONL import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub imported: usize,
    /// Lines skipped because their id already exists
    pub duplicates: usize,
}

/// Writes every record of `domain` in id order; returns the record count.
pub fn export_jsonl<W: Write>(store: &RecordStore, domain: &str, mut writer: W) -> MelvinResult<usize> {
    let mut written = 0;
    for record in store.scan(domain, TimeRange::all())? {
        let line = serde_json::to_string(&JsonRecord::from(&record?))?;
        writeln!(writer, "{line}")?;
        written += 1;
    }
    writer.flush()?;
    Ok(written)
}

/// Parses JSONL lines into ingest records without storing them.
pub fn parse_jsonl<R: BufRead>(reader: R) -> MelvinResult<Vec<IngestRecord>> {
    let mut records = Vec::new();
    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let json: JsonRecord = serde_json::from_str(&line)
            .map_err(|e| MelvinError::Serialization(format!("line {}: {e}", n + 1)))?;
        records.push(json.into());
    }
    Ok(records)
}

/// Appends each line through `append`, skipping duplicate ids.
///
/// `append` is the caller's validated ingestion path (type checks, index
/// refresh); any other error aborts the import.
pub fn import_jsonl<R, F>(reader: R, mut append: F) -> MelvinResult<ImportSummary>
where
    R: BufRead,
    F: FnMut(IngestRecord) -> MelvinResult<()>,
{
    let mut summary = ImportSummary::default();
    for record in parse_jsonl(reader)? {
        match append(record) {
            Ok(()) => summary.imported += 1,
            Err(MelvinError::DuplicateId { .. }) => summary.duplicates += 1,
            Err(e) => return Err(e),
        }
    }
    Ok(summary)
}
