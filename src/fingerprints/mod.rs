//! Content fingerprinting.
//!
//! Computes the three fingerprints the global stores are keyed by:
//!
//! | Fingerprint | Detects | Lookup |
//! |-------------|---------|--------|
//! | SimHash (64-bit) | near-duplicate documents | Hamming distance ≤ k |
//! | MinHash + LSH bands | near-duplicate documents | band candidates, re-scored |
//! | Chunk hash (SHA-256) | shared passages | exact |
//!
//! All hashes are derived from SHA-256 so they are stable across processes
//! and releases; only a `fingerprint_version` change may alter them.

pub mod chunking;
pub mod minhash;
pub mod simhash;

use crate::models::{Document, HashParams};
use tracing::instrument;

pub use chunking::{chunk_hash, chunk_spans};
pub use minhash::{MinHasher, band_hashes, jaccard_estimate};
pub use simhash::{hamming_distance, simhash64};

/// Hash of one chunk together with its position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFingerprint {
    /// Chunk position in the document.
    pub chunk_index: usize,
    /// Hex SHA-256 of the normalised chunk.
    pub hash: String,
}

/// Every fingerprint of one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprints {
    /// SimHash signature.
    pub simhash: u64,
    /// MinHash signature; `None` when the text has no shingles.
    pub minhash: Option<Vec<u64>>,
    /// Non-blank chunk hashes in document order.
    pub chunks: Vec<ChunkFingerprint>,
}

impl Fingerprints {
    /// LSH band keys of the MinHash signature.
    #[must_use]
    pub fn bands(&self, bands: usize) -> Vec<(u32, u64)> {
        self.minhash
            .as_deref()
            .map(|signature| band_hashes(signature, bands))
            .unwrap_or_default()
    }
}

/// Computes fingerprints with frozen [`HashParams`].
#[derive(Debug, Clone)]
pub struct Fingerprinter {
    params: HashParams,
    minhasher: MinHasher,
}

impl Fingerprinter {
    /// Creates a fingerprinter for the given parameters.
    #[must_use]
    pub fn new(params: HashParams) -> Self {
        let minhasher = MinHasher::new(params.num_perm, params.shingle_size);
        Self { params, minhasher }
    }

    /// Returns the parameters.
    #[must_use]
    pub const fn params(&self) -> &HashParams {
        &self.params
    }

    /// Computes all fingerprints of a document.
    #[must_use]
    #[instrument(skip_all, fields(doc_id = %document.doc_id))]
    pub fn compute(&self, document: &Document) -> Fingerprints {
        let text = document.text();
        let chunks = document
            .chunks(self.params.chunk_size, self.params.chunk_overlap)
            .iter()
            .filter_map(|span| {
                chunk_hash(document.chunk_text(span)).map(|hash| ChunkFingerprint {
                    chunk_index: span.index,
                    hash,
                })
            })
            .collect();
        Fingerprints {
            simhash: simhash64(text, self.params.max_tokens),
            minhash: self.minhasher.signature(text),
            chunks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_all_fingerprints() {
        let params = HashParams {
            chunk_size: 16,
            ..HashParams::default()
        };
        let fingerprinter = Fingerprinter::new(params);
        let doc = Document::new("wiki", "wiki", "A reasonably long paragraph about fingerprints.");
        let fp = fingerprinter.compute(&doc);
        assert_ne!(fp.simhash, 0);
        assert_eq!(fp.minhash.as_ref().map(Vec::len), Some(128));
        assert_eq!(fp.chunks.len(), 3);
        assert_eq!(fp.bands(32).len(), 32);
    }

    #[test]
    fn test_blank_document_has_no_minhash_or_chunks() {
        let fingerprinter = Fingerprinter::new(HashParams::default());
        let fp = fingerprinter.compute(&Document::new("s", "t", "   "));
        assert!(fp.minhash.is_none());
        assert!(fp.chunks.is_empty());
        assert!(fp.bands(32).is_empty());
    }
}
