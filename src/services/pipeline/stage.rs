//! Stage plugin interface.

use crate::Result;
use crate::models::{DocId, Document, PipelineState};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ordering class of a stage. Declared stages must be non-decreasing in class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageClass {
    /// Ingest-time cleanup before PII handling.
    Normalize,
    /// PII detection and redaction.
    Pii,
    /// Global deduplication.
    Dedup,
    /// Quality filters; never before dedup.
    Quality,
    /// Metadata enrichment.
    Metadata,
}

impl StageClass {
    /// State a document reaches after passing a stage of this class.
    #[must_use]
    pub const fn target_state(self) -> PipelineState {
        match self {
            Self::Normalize => PipelineState::Normalized,
            Self::Pii => PipelineState::PiiChecked,
            Self::Dedup => PipelineState::DedupChecked,
            Self::Quality => PipelineState::QualityChecked,
            Self::Metadata => PipelineState::MetadataEnriched,
        }
    }

    /// Returns the configuration label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Normalize => "normalize",
            Self::Pii => "pii",
            Self::Dedup => "dedup",
            Self::Quality => "quality",
            Self::Metadata => "metadata",
        }
    }
}

impl fmt::Display for StageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a stage rejected a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// Stable machine-readable code, e.g. `DUPLICATE`.
    pub reason_code: String,
    /// Human-readable detail.
    pub reason_detail: String,
}

impl Rejection {
    /// Creates a rejection.
    #[must_use]
    pub fn new(reason_code: impl Into<String>, reason_detail: impl Into<String>) -> Self {
        Self {
            reason_code: reason_code.into(),
            reason_detail: reason_detail.into(),
        }
    }
}

/// Outcome of one stage. Rejection is a normal outcome, not an error.
#[derive(Debug)]
pub enum Decision {
    /// Continue with the (possibly transformed) document.
    Accept(Document),
    /// Stop here and route the document to the rejection sink.
    Reject(Rejection),
}

/// A pipeline stage.
///
/// Stages are opaque to the orchestrator apart from their name and class.
/// An `Err` that is not fatal (see [`crate::Error::is_fatal`]) rejects the
/// document with `RUNTIME_ERROR`; a fatal one aborts the source.
pub trait Stage: Send + Sync {
    /// Unique stage name.
    fn name(&self) -> &str;

    /// Ordering class.
    fn class(&self) -> StageClass;

    /// Processes one document.
    fn apply(&self, document: Document) -> Result<Decision>;
}

/// A rejected document as written to the rejection sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedDocument {
    /// Document id.
    pub doc_id: DocId,
    /// Source name.
    pub source: String,
    /// Originating file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,
    /// Stage that rejected the document.
    pub stage: String,
    /// Reason code.
    pub reason_code: String,
    /// Reason detail.
    pub reason_detail: String,
    /// Rejection time, Unix milliseconds.
    pub ts_ms: u64,
}

impl RejectedDocument {
    /// Builds a record for a document rejected at `stage`.
    #[must_use]
    pub fn new(
        doc_id: DocId,
        source: impl Into<String>,
        source_file: Option<String>,
        stage: impl Into<String>,
        rejection: Rejection,
    ) -> Self {
        Self {
            doc_id,
            source: source.into(),
            source_file,
            stage: stage.into(),
            reason_code: rejection.reason_code,
            reason_detail: rejection.reason_detail,
            ts_ms: crate::current_timestamp_ms(),
        }
    }
}
