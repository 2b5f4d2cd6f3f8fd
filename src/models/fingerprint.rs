//! Fingerprint records held by the global stores.

use super::DocId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a fingerprint record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FingerprintId(String);

impl FingerprintId {
    /// Generates a new time-ordered identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::now_v7().to_string())
    }

    /// Wraps an existing identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FingerprintId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of fingerprint, one per store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FingerprintType {
    /// 64-bit SimHash of the document tokens.
    #[serde(rename = "simhash")]
    SimHash,
    /// One LSH band of a MinHash signature.
    #[serde(rename = "minhash")]
    MinHash,
    /// Exact hash of one normalized chunk.
    ChunkHash,
}

impl FingerprintType {
    /// Returns the storage/metrics label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SimHash => "simhash",
            Self::MinHash => "minhash",
            Self::ChunkHash => "chunk_hash",
        }
    }
}

impl fmt::Display for FingerprintType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type-specific fingerprint value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum FingerprintValue {
    /// SimHash signature.
    SimHash {
        /// The 64-bit signature.
        value: u64,
    },
    /// One band of a MinHash signature.
    LshBand {
        /// Band index within the signature.
        band: u32,
        /// Hash of the rows in this band.
        band_hash: u64,
    },
    /// Hex SHA-256 of a normalized chunk.
    ChunkHash {
        /// The hex digest.
        hash: String,
    },
}

impl FingerprintValue {
    /// Returns the fingerprint type this value belongs to.
    #[must_use]
    pub const fn fingerprint_type(&self) -> FingerprintType {
        match self {
            Self::SimHash { .. } => FingerprintType::SimHash,
            Self::LshBand { .. } => FingerprintType::MinHash,
            Self::ChunkHash { .. } => FingerprintType::ChunkHash,
        }
    }
}

/// Hash parameters, frozen per `fingerprint_version`.
///
/// Records from different versions are never compared with each other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashParams {
    /// Version label for the store namespace.
    pub fingerprint_version: String,
    /// MinHash character shingle size.
    pub shingle_size: usize,
    /// MinHash permutation count.
    pub num_perm: usize,
    /// LSH band count; must divide `num_perm`.
    pub bands: usize,
    /// Maximum number of tokens fed into SimHash.
    pub max_tokens: usize,
    /// Chunk size in characters.
    pub chunk_size: usize,
    /// Chunk overlap in characters.
    pub chunk_overlap: usize,
}

impl Default for HashParams {
    fn default() -> Self {
        Self {
            fingerprint_version: "v1".to_string(),
            shingle_size: 5,
            num_perm: 128,
            bands: 32,
            max_tokens: 2000,
            chunk_size: 512,
            chunk_overlap: 0,
        }
    }
}

impl HashParams {
    /// Rows per LSH band.
    #[must_use]
    pub const fn rows_per_band(&self) -> usize {
        if self.bands == 0 {
            self.num_perm
        } else {
            self.num_perm / self.bands
        }
    }
}

/// Single global fingerprint entry.
///
/// Holds only the fingerprint and provenance, never document text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintRecord {
    /// Unique identifier.
    pub fingerprint_id: FingerprintId,
    /// Store this record belongs to.
    pub fingerprint_type: FingerprintType,
    /// Type-specific value.
    pub value: FingerprintValue,
    /// Document the fingerprint was computed from.
    pub doc_id: DocId,
    /// Chunk position; present only for chunk hashes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_id: Option<usize>,
    /// Source that produced the document.
    pub source_name: String,
    /// Document family of the source.
    pub document_type: String,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// Version namespace of the record.
    pub fingerprint_version: String,
    /// Parameters the value was computed with.
    pub hash_params: HashParams,
}

impl FingerprintRecord {
    /// Creates a record with a fresh id and the current timestamp.
    #[must_use]
    pub fn new(
        value: FingerprintValue,
        doc_id: DocId,
        source_name: impl Into<String>,
        document_type: impl Into<String>,
        hash_params: &HashParams,
    ) -> Self {
        Self {
            fingerprint_id: FingerprintId::generate(),
            fingerprint_type: value.fingerprint_type(),
            value,
            doc_id,
            chunk_id: None,
            source_name: source_name.into(),
            document_type: document_type.into(),
            created_at: Utc::now(),
            fingerprint_version: hash_params.fingerprint_version.clone(),
            hash_params: hash_params.clone(),
        }
    }

    /// Sets the chunk position.
    #[must_use]
    pub const fn with_chunk_id(mut self, chunk_id: usize) -> Self {
        self.chunk_id = Some(chunk_id);
        self
    }
}
