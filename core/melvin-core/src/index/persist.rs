//! Index snapshot persistence — bincode, zstd-compressed.

use super::IndexSnapshot;
use crate::error::{MelvinError, MelvinResult};

const ZSTD_LEVEL: i32 = 3;

/// Metadata key of a snapshot: `<domain>/<shape key>`.
pub fn snapshot_key(domain: &str, shape_key: &str) -> String {
    format!("{domain}/{shape_key}")
}

/// Splits a snapshot key back into domain and shape key.
pub fn split_key(key: &str) -> Option<(&str, &str)> {
    key.split_once('/')
}

pub fn encode(snapshot: &IndexSnapshot) -> MelvinResult<Vec<u8>> {
    let raw = bincode::serialize(snapshot)?;
    zstd::encode_all(raw.as_slice(), ZSTD_LEVEL)
        .map_err(|e| MelvinError::Serialization(format!("zstd compression failed: {e}")))
}

pub fn decode(bytes: &[u8]) -> MelvinResult<IndexSnapshot> {
    let raw = zstd::decode_all(bytes)
        .map_err(|e| MelvinError::Serialization(format!("zstd decompression failed: {e}")))?;
    Ok(bincode::deserialize(&raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{IndexShape, PartialAggregate};
    use crate::record::RecordId;
    use crate::value::{GroupKey, Value};
    use std::collections::BTreeMap;

    #[test]
    fn test_encode_decode() {
        let mut agg = PartialAggregate::empty();
        agg.observe(rust_decimal::Decimal::from(150), 1_000);
        let mut rows = BTreeMap::new();
        rows.insert(GroupKey::from_vec(vec![Value::from("gpt-4")]), vec![agg]);

        let snapshot = IndexSnapshot {
            domain: "qa".into(),
            shape: IndexShape::new(["engine"]),
            measures: vec!["tokens".into()],
            schema_version: 2,
            watermark: Some(RecordId(42)),
            records: 1,
            rows,
        };
        let bytes = encode(&snapshot).unwrap();
        assert_eq!(decode(&bytes).unwrap(), snapshot);
    }

    #[test]
    fn test_garbage_fails_to_decode() {
        assert!(decode(b"definitely not zstd").is_err());
    }

    #[test]
    fn test_key_split() {
        let key = snapshot_key("qa", "day,engine");
        assert_eq!(split_key(&key), Some(("qa", "day,engine")));
    }
}
