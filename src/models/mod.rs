//! Data models for corpusgate.
//!
//! Documents flowing through the pipeline, fingerprint records held by the
//! global stores, priority configuration and checkpoint records.

mod checkpoint;
mod document;
mod fingerprint;
mod priority;

pub use checkpoint::{CheckpointRecord, FileStats, ResumeMode, SourceProgress};
pub use document::{ChunkSpan, DocId, Document, DocumentStatus, PipelineState};
pub use fingerprint::{
    FingerprintId, FingerprintRecord, FingerprintType, FingerprintValue, HashParams,
};
pub use priority::{LOWEST_RANK, PriorityConfig, PriorityKey};
