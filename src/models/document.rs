//! Document types and identifiers.

use crate::fingerprints::chunking::chunk_spans;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

/// Number of leading characters of the text that feed into a [`DocId`].
const DOC_ID_PREFIX_CHARS: usize = 512;

/// Stable document identifier.
///
/// Derived deterministically from the source name and a content prefix so the
/// same record read twice from the same source gets the same id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocId(String);

impl DocId {
    /// Wraps an existing identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derives the identifier for `text` read from `source_name`.
    ///
    /// # Example
    ///
    /// ```rust
    /// use corpusgate::DocId;
    ///
    /// let a = DocId::derive("wiki", "Rust is a systems language.");
    /// let b = DocId::derive("wiki", "Rust is a systems language.");
    /// assert_eq!(a, b);
    /// assert_ne!(a, DocId::derive("books", "Rust is a systems language."));
    /// assert_eq!(a.as_str().len(), 64);
    /// ```
    #[must_use]
    pub fn derive(source_name: &str, text: &str) -> Self {
        let prefix_end = text
            .char_indices()
            .nth(DOC_ID_PREFIX_CHARS)
            .map_or(text.len(), |(idx, _)| idx);
        let mut hasher = Sha256::new();
        hasher.update(source_name.as_bytes());
        hasher.update([0u8]);
        hasher.update(&text.as_bytes()[..prefix_end]);
        Self(hex::encode(hasher.finalize()))
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DocId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Acceptance status of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    /// Still moving through stages.
    #[default]
    Pending,
    /// Passed every stage.
    Accepted,
    /// Rejected by a stage.
    Rejected,
}

/// Position of a document in the canonical stage order.
///
/// Transitions are strictly forward; `Rejected` is reachable from any
/// non-terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum PipelineState {
    /// Freshly read from a source.
    #[default]
    Raw,
    /// Normalization stages have run.
    Normalized,
    /// PII stages have run.
    PiiChecked,
    /// The dedup stage has run.
    DedupChecked,
    /// Quality stages have run.
    QualityChecked,
    /// Metadata enrichment has run.
    MetadataEnriched,
    /// All stages passed; handed to the shard writer.
    Frozen,
    /// Rejected by a stage.
    Rejected {
        /// Reason code reported by the stage.
        reason: String,
        /// Name of the rejecting stage.
        at_stage: String,
    },
}

impl PipelineState {
    /// Ordinal used to check forward-only transitions. Terminal states sort last.
    #[must_use]
    pub const fn ordinal(&self) -> u8 {
        match self {
            Self::Raw => 0,
            Self::Normalized => 1,
            Self::PiiChecked => 2,
            Self::DedupChecked => 3,
            Self::QualityChecked => 4,
            Self::MetadataEnriched => 5,
            Self::Frozen | Self::Rejected { .. } => 6,
        }
    }

    /// Returns true for `Frozen` and `Rejected`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Frozen | Self::Rejected { .. })
    }
}

/// Byte range of one chunk within [`Document::text`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkSpan {
    /// Position of the chunk in the document (0-based).
    pub index: usize,
    /// Start byte offset (inclusive).
    pub start: usize,
    /// End byte offset (exclusive).
    pub end: usize,
}

#[derive(Debug, Clone)]
struct ChunkCache {
    chunk_size: usize,
    overlap: usize,
    spans: Vec<ChunkSpan>,
}

/// A document in flight through the pipeline.
///
/// Owned by the orchestrator while in flight; ownership moves to the shard
/// writer once accepted.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    /// Stable identifier.
    pub doc_id: DocId,
    /// Configured name of the source that produced this document.
    pub source_name: String,
    /// Document family, e.g. `books`, `wiki`, `commoncrawl`.
    pub document_type: String,
    text: String,
    /// Two-letter language code.
    pub language: String,
    /// Originating file for multi-file sources.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,
    /// Originating URL, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Acceptance status.
    pub status: DocumentStatus,
    /// Position in the stage order.
    pub state: PipelineState,
    /// Ordered identifiers of the transforms applied to this document.
    pub transform_chain: Vec<String>,
    /// Free-form metadata added by stages.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    #[serde(skip)]
    chunks: OnceLock<ChunkCache>,
}

impl Document {
    /// Creates a pending document and derives its id.
    #[must_use]
    pub fn new(
        source_name: impl Into<String>,
        document_type: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        let source_name = source_name.into();
        let text = text.into();
        Self {
            doc_id: DocId::derive(&source_name, &text),
            source_name,
            document_type: document_type.into(),
            text,
            language: "en".to_string(),
            source_file: None,
            url: None,
            status: DocumentStatus::Pending,
            state: PipelineState::Raw,
            transform_chain: Vec::new(),
            metadata: BTreeMap::new(),
            chunks: OnceLock::new(),
        }
    }

    /// Sets the language, keeping only the two-letter prefix.
    #[must_use]
    pub fn with_language(mut self, language: &str) -> Self {
        let code: String = language.trim().chars().take(2).collect();
        if code.chars().count() == 2 {
            self.language = code.to_lowercase();
        }
        self
    }

    /// Sets the originating file.
    #[must_use]
    pub fn with_source_file(mut self, source_file: impl Into<String>) -> Self {
        self.source_file = Some(source_file.into());
        self
    }

    /// Sets the originating URL.
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Returns the document text.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Replaces the text. Cached chunks are invalidated; the id is kept.
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
        self.chunks = OnceLock::new();
    }

    /// Returns the chunk spans for the given chunking parameters.
    ///
    /// The first call computes and caches the spans; later calls with the same
    /// parameters borrow the cache.
    #[must_use]
    pub fn chunks(&self, chunk_size: usize, overlap: usize) -> Cow<'_, [ChunkSpan]> {
        let cache = self.chunks.get_or_init(|| ChunkCache {
            chunk_size,
            overlap,
            spans: chunk_spans(&self.text, chunk_size, overlap),
        });
        if cache.chunk_size == chunk_size && cache.overlap == overlap {
            Cow::Borrowed(&cache.spans)
        } else {
            Cow::Owned(chunk_spans(&self.text, chunk_size, overlap))
        }
    }

    /// Returns the text of one chunk.
    #[must_use]
    pub fn chunk_text(&self, span: &ChunkSpan) -> &str {
        self.text.get(span.start..span.end).unwrap_or_default()
    }
}
