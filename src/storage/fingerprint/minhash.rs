//! MinHash/LSH band store.

use super::{FingerprintNamespace, FingerprintStore, RecordIndex};
use crate::Result;
use crate::models::{DocId, FingerprintRecord, FingerprintType, FingerprintValue};
use std::collections::HashSet;

/// One LSH band of a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LshBandKey {
    /// Band index.
    pub band: u32,
    /// Hash of the band's rows.
    pub hash: u64,
}

fn key_of(value: &FingerprintValue) -> Option<LshBandKey> {
    match value {
        FingerprintValue::LshBand { band, band_hash } => Some(LshBandKey {
            band: *band,
            hash: *band_hash,
        }),
        _ => None,
    }
}

/// Store keyed by `(band, band_hash)`, one record per band per document.
///
/// Full signatures are kept per document so callers can re-score LSH
/// candidates, which are a superset of the true matches.
pub struct MinHashStore {
    index: RecordIndex<LshBandKey>,
}

impl MinHashStore {
    /// Creates a store that is never persisted.
    #[must_use]
    pub fn in_memory(fingerprint_version: &str) -> Self {
        Self {
            index: RecordIndex::in_memory(FingerprintType::MinHash, fingerprint_version, key_of),
        }
    }

    /// Opens the store in a version namespace.
    pub fn open(namespace: &FingerprintNamespace) -> Result<Self> {
        Ok(Self {
            index: RecordIndex::open(namespace, FingerprintType::MinHash, key_of)?,
        })
    }

    /// Stores the full signature of a document.
    pub fn add_signature(&self, doc_id: &DocId, signature: Vec<u64>) -> Result<()> {
        self.index.set_signature(doc_id, Some(signature))
    }

    /// Returns the stored signature of a document.
    pub fn signature(&self, doc_id: &DocId) -> Result<Option<Vec<u64>>> {
        self.index.signature(doc_id)
    }

    /// Union of the records matching any of `bands`, one per document.
    ///
    /// Candidates come back in first-seen band order.
    pub fn candidates(&self, bands: &[(u32, u64)]) -> Result<Vec<FingerprintRecord>> {
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        for &(band, hash) in bands {
            for record in self.index.query(&LshBandKey { band, hash })? {
                if seen.insert(record.doc_id.clone()) {
                    candidates.push(record);
                }
            }
        }
        Ok(candidates)
    }
}

impl FingerprintStore for MinHashStore {
    type Key = LshBandKey;

    fn index(&self) -> &RecordIndex<LshBandKey> {
        &self.index
    }

    fn remove_doc(&self, doc_id: &DocId) -> Result<usize> {
        let mut removed = 0;
        for record in self.index.records_for_doc(doc_id)? {
            if self.index.remove(&record.fingerprint_id)? {
                removed += 1;
            }
        }
        if self.index.signature(doc_id)?.is_some() {
            self.index.set_signature(doc_id, None)?;
        }
        Ok(removed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::models::HashParams;

    fn add_bands(store: &MinHashStore, doc: &str, bands: &[(u32, u64)]) {
        for &(band, band_hash) in bands {
            store
                .add(FingerprintRecord::new(
                    FingerprintValue::LshBand { band, band_hash },
                    DocId::new(doc),
                    "s",
                    "t",
                    &HashParams::default(),
                ))
                .unwrap();
        }
        store.add_signature(&DocId::new(doc), vec![1, 2, 3]).unwrap();
    }

    #[test]
    fn test_candidates_union_across_bands() {
        let store = MinHashStore::in_memory("v1");
        add_bands(&store, "a", &[(0, 10), (1, 11)]);
        add_bands(&store, "b", &[(0, 99), (1, 11)]);
        add_bands(&store, "c", &[(0, 50), (1, 51)]);

        let found = store.candidates(&[(0, 10), (1, 11)]).unwrap();
        let docs: Vec<_> = found.iter().map(|r| r.doc_id.as_str()).collect();
        assert_eq!(docs, vec!["a", "b"]);
    }

    #[test]
    fn test_same_hash_in_other_band_does_not_match() {
        let store = MinHashStore::in_memory("v1");
        add_bands(&store, "a", &[(0, 10)]);
        assert!(store.candidates(&[(1, 10)]).unwrap().is_empty());
    }

    #[test]
    fn test_remove_doc_clears_signature() {
        let store = MinHashStore::in_memory("v1");
        add_bands(&store, "a", &[(0, 10), (1, 11)]);
        assert_eq!(store.remove_doc(&DocId::new("a")).unwrap(), 2);
        assert!(store.signature(&DocId::new("a")).unwrap().is_none());
        assert!(store.is_empty().unwrap());
    }
}
