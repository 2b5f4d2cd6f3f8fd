//! SimHash store with Hamming-distance lookup.

use super::{FingerprintNamespace, FingerprintStore, RecordIndex};
use crate::Result;
use crate::fingerprints::simhash::{for_each_within, hamming_distance, neighbourhood_size};
use crate::models::{FingerprintRecord, FingerprintType, FingerprintValue};

fn key_of(value: &FingerprintValue) -> Option<u64> {
    match value {
        FingerprintValue::SimHash { value } => Some(*value),
        _ => None,
    }
}

/// Store keyed by 64-bit SimHash signatures.
pub struct SimHashStore {
    index: RecordIndex<u64>,
}

impl SimHashStore {
    /// Creates a store that is never persisted.
    #[must_use]
    pub fn in_memory(fingerprint_version: &str) -> Self {
        Self {
            index: RecordIndex::in_memory(FingerprintType::SimHash, fingerprint_version, key_of),
        }
    }

    /// Opens the store in a version namespace.
    pub fn open(namespace: &FingerprintNamespace) -> Result<Self> {
        Ok(Self {
            index: RecordIndex::open(namespace, FingerprintType::SimHash, key_of)?,
        })
    }

    /// Records within Hamming distance `max_distance` of `value`, paired with
    /// their distance and sorted nearest first.
    ///
    /// `max_distance == 0` is an exact-key lookup. Otherwise the cheaper of
    /// expanding the bit neighbourhood of `value` and scanning the stored keys
    /// is used; both return the same set.
    pub fn query_within(
        &self,
        value: u64,
        max_distance: u32,
    ) -> Result<Vec<(u32, FingerprintRecord)>> {
        let mut matches: Vec<(u32, FingerprintRecord)> = if max_distance == 0 {
            self.index.query(&value)?.into_iter().map(|r| (0, r)).collect()
        } else if neighbourhood_size(max_distance) <= self.index.key_count()? as u128 {
            let mut found = Vec::new();
            let mut failure = None;
            for_each_within(value, max_distance, &mut |candidate| {
                match self.index.query(&candidate) {
                    Ok(records) => {
                        let distance = hamming_distance(value, candidate);
                        found.extend(records.into_iter().map(|r| (distance, r)));
                        true
                    },
                    Err(e) => {
                        failure = Some(e);
                        false
                    },
                }
            });
            if let Some(e) = failure {
                return Err(e);
            }
            found
        } else {
            self.index
                .scan(|stored| hamming_distance(value, *stored) <= max_distance)?
                .into_iter()
                .filter_map(|r| key_of(&r.value).map(|stored| (hamming_distance(value, stored), r)))
                .collect()
        };
        matches.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.created_at.cmp(&b.1.created_at)));
        Ok(matches)
    }
}

impl FingerprintStore for SimHashStore {
    type Key = u64;

    fn index(&self) -> &RecordIndex<u64> {
        &self.index
    }
}
