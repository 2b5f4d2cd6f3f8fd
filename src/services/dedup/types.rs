//! Dedup verdict types.

use crate::models::DocId;
use serde::Serialize;
use std::fmt;

/// Which fingerprint produced a full-document match.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum MatchedVia {
    /// SimHash within the configured Hamming distance.
    SimHash {
        /// Bits that differ from the matched signature.
        distance: u32,
    },
    /// Re-scored MinHash similarity at or above the threshold.
    MinHash {
        /// Estimated Jaccard similarity.
        similarity: f64,
    },
}

impl MatchedVia {
    /// Metrics label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::SimHash { .. } => "simhash",
            Self::MinHash { .. } => "minhash",
        }
    }
}

impl fmt::Display for MatchedVia {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SimHash { distance } => write!(f, "simhash (distance {distance})"),
            Self::MinHash { similarity } => write!(f, "minhash (similarity {similarity:.3})"),
        }
    }
}

/// A chunk of the incoming document already present in the chunk store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkMatch {
    /// Chunk position in the incoming document.
    pub chunk_index: usize,
    /// Document that owns the stored chunk.
    pub doc_id: DocId,
    /// Chunk position in that document.
    pub chunk_id: Option<usize>,
}

/// Outcome of evaluating one document against the global stores.
///
/// Only `DuplicateOf` drops the document. A chunk-only match is always
/// `PartialOverlap`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "verdict")]
pub enum Verdict {
    /// No match; the document's fingerprints were committed.
    Unique,
    /// A kept document of equal or higher priority matched; the incoming one is dropped.
    DuplicateOf {
        /// The kept document.
        doc_id: DocId,
        /// Source of the kept document.
        source_name: String,
        /// How the match was found.
        matched_via: MatchedVia,
    },
    /// Some chunks were seen before; the document is kept and linked.
    PartialOverlap {
        /// Document owning most of the matched chunks.
        doc_id: DocId,
        /// Every matched chunk.
        matched_chunks: Vec<ChunkMatch>,
    },
    /// The incoming document outranks previously kept near-duplicates, whose
    /// fingerprints were evicted. Already written shards are not touched.
    Supersedes {
        /// Evicted documents.
        doc_ids: Vec<DocId>,
        /// How the match was found.
        matched_via: MatchedVia,
    },
}

impl Verdict {
    /// Returns true when the incoming document is kept.
    #[must_use]
    pub const fn is_kept(&self) -> bool {
        !matches!(self, Self::DuplicateOf { .. })
    }

    /// Metrics label.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Unique => "unique",
            Self::DuplicateOf { .. } => "duplicate",
            Self::PartialOverlap { .. } => "partial_overlap",
            Self::Supersedes { .. } => "supersedes",
        }
    }

    /// Label of the matching fingerprint.
    #[must_use]
    pub const fn via_label(&self) -> &'static str {
        match self {
            Self::Unique => "none",
            Self::PartialOverlap { .. } => "chunk_hash",
            Self::DuplicateOf { matched_via, .. } | Self::Supersedes { matched_via, .. } => {
                matched_via.as_str()
            },
        }
    }
}
