//! Exact chunk-hash store.

use super::{FingerprintNamespace, FingerprintStore, RecordIndex};
use crate::Result;
use crate::models::{FingerprintType, FingerprintValue};

fn key_of(value: &FingerprintValue) -> Option<String> {
    match value {
        FingerprintValue::ChunkHash { hash } => Some(hash.clone()),
        _ => None,
    }
}

/// Store keyed by the hex digest of a normalised chunk. Exact match only.
pub struct ChunkHashStore {
    index: RecordIndex<String>,
}

impl ChunkHashStore {
    /// Creates a store that is never persisted.
    #[must_use]
    pub fn in_memory(fingerprint_version: &str) -> Self {
        Self {
            index: RecordIndex::in_memory(FingerprintType::ChunkHash, fingerprint_version, key_of),
        }
    }

    /// Opens the store in a version namespace.
    pub fn open(namespace: &FingerprintNamespace) -> Result<Self> {
        Ok(Self {
            index: RecordIndex::open(namespace, FingerprintType::ChunkHash, key_of)?,
        })
    }
}

impl FingerprintStore for ChunkHashStore {
    type Key = String;

    fn index(&self) -> &RecordIndex<String> {
        &self.index
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::models::{DocId, FingerprintRecord, HashParams};

    #[test]
    fn test_exact_lookup_only() {
        let store = ChunkHashStore::in_memory("v1");
        let record = FingerprintRecord::new(
            FingerprintValue::ChunkHash {
                hash: "abc123".into(),
            },
            DocId::new("d1"),
            "s",
            "t",
            &HashParams::default(),
        )
        .with_chunk_id(4);
        store.add(record).unwrap();

        let hits = store.query(&"abc123".to_string()).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, Some(4));
        assert!(store.query(&"abc124".to_string()).unwrap().is_empty());
        assert_eq!(store.fingerprint_type(), FingerprintType::ChunkHash);
    }
}
