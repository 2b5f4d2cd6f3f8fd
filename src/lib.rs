//! # Corpusgate
//!
//! Priority-ordered document pipeline with global fingerprint deduplication.
//!
//! Corpusgate pulls documents from heterogeneous sources, threads them through
//! an ordered sequence of governance stages and writes deduplicated shards.
//! Deduplication is *global*: fingerprints persist across sources and across
//! runs, and conflicts between near-duplicates are resolved by a configured
//! priority (document family first, then source rank).
//!
//! ## Features
//!
//! - Three fingerprint stores (SimHash, MinHash/LSH, chunk hash) behind one manager
//! - Deterministic priority resolution with explicit tie-break rules
//! - Source scheduling that guarantees higher-priority content is committed first
//! - Stage-order validation at startup (PII before dedup before quality)
//! - Atomic, resumable checkpoints with named snapshots
//!
//! ## Example
//!
//! ```rust,ignore
//! use corpusgate::services::dedup::GlobalFingerprintManager;
//! use corpusgate::{Document, FingerprintConfig, PriorityConfig};
//!
//! let manager = GlobalFingerprintManager::in_memory(&FingerprintConfig::default())?;
//! let priority = PriorityConfig::new(vec!["books".into(), "commoncrawl".into()]);
//! let doc = Document::new("gutenberg", "books", "It was the best of times...");
//! let verdict = manager.evaluate(&doc, &priority)?;
//! assert!(verdict.is_kept());
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

// Module declarations
pub mod config;
pub mod fingerprints;
pub mod models;
pub mod observability;
pub mod services;
pub mod sources;
pub mod storage;
pub mod writers;

// Re-exports for convenience
pub use config::{CorpusConfig, FingerprintConfig, RunConfig, SourceSpec};
pub use models::{
    CheckpointRecord, DocId, Document, DocumentStatus, FingerprintRecord, FingerprintType,
    HashParams, PriorityConfig, ResumeMode, SourceProgress,
};
pub use services::checkpoint::CheckpointManager;
pub use services::dedup::{GlobalFingerprintManager, MatchedVia, Verdict};
pub use services::pipeline::{Decision, PipelineOrchestrator, Stage, StageClass};
pub use services::runner::{CancellationToken, PipelineRunner, RunReport, RunSettings};
pub use services::scheduler::SourceScheduler;
pub use storage::{LocalStorage, MemoryStorage, StorageBackend};
pub use writers::{JsonlRejectionSink, JsonlShardWriter, RejectionSink, ShardWriter};

/// Error type for corpusgate operations.
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `Config` | Invalid stage ordering, priority lists or fingerprint parameters |
/// | `FingerprintStore` | A fingerprint store cannot read, write or lock its state |
/// | `CheckpointCorruption` | A checkpoint file is unreadable or inconsistent |
/// | `Source` | A source connector cannot be opened or fails mid-stream |
/// | `InvalidInput` | API misuse such as committing before loading a checkpoint |
/// | `OperationFailed` | Storage, writer or sink I/O outside the fingerprint stores |
/// | `Cancelled` | The run was cancelled cooperatively |
///
/// Stage rejections are not errors; see [`Decision::Reject`].
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid configuration, detected at startup and never silently corrected.
    #[error("config error: {0}")]
    Config(String),

    /// I/O or lock failure on a fingerprint store.
    ///
    /// Fatal for the affected source: treating it as "no duplicate" would
    /// under-deduplicate.
    #[error("fingerprint store '{operation}' failed: {cause}")]
    FingerprintStore {
        /// The store operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// A checkpoint could not be parsed or does not belong to this run.
    ///
    /// Automatic resume refuses to continue; use `beginning` or `ignore`.
    #[error("checkpoint for run '{run_id}' is corrupt: {cause}")]
    CheckpointCorruption {
        /// The run whose checkpoint is corrupt.
        run_id: String,
        /// The underlying cause.
        cause: String,
    },

    /// A source connector failed in a way that aborts the source.
    #[error("source '{source_name}' failed: {cause}")]
    Source {
        /// The configured source name.
        source_name: String,
        /// The underlying cause.
        cause: String,
    },

    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An operation failed.
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// The run was cancelled before the current unit of work was committed.
    #[error("run cancelled")]
    Cancelled,
}

impl Error {
    /// Returns true if the error must abort the current source or run.
    ///
    /// Everything else is a document-level failure: the document is rejected,
    /// counted and the run continues.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::FingerprintStore { .. }
                | Self::CheckpointCorruption { .. }
                | Self::Source { .. }
                | Self::Cancelled
        )
    }

    /// Shorthand for a fingerprint store failure.
    pub(crate) fn store(operation: &str, cause: impl std::fmt::Display) -> Self {
        Self::FingerprintStore {
            operation: operation.to_string(),
            cause: cause.to_string(),
        }
    }

    /// Shorthand for a generic operation failure.
    pub(crate) fn operation(operation: &str, cause: impl std::fmt::Display) -> Self {
        Self::OperationFailed {
            operation: operation.to_string(),
            cause: cause.to_string(),
        }
    }
}

/// Result type alias for corpusgate operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Returns the current Unix timestamp in milliseconds.
///
/// Falls back to 0 if the system clock is before the Unix epoch.
#[must_use]
pub fn current_timestamp_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Config("quality before dedup".to_string());
        assert_eq!(err.to_string(), "config error: quality before dedup");

        let err = Error::FingerprintStore {
            operation: "flush".to_string(),
            cause: "disk full".to_string(),
        };
        assert_eq!(err.to_string(), "fingerprint store 'flush' failed: disk full");

        let err = Error::CheckpointCorruption {
            run_id: "run-1".to_string(),
            cause: "eof".to_string(),
        };
        assert_eq!(err.to_string(), "checkpoint for run 'run-1' is corrupt: eof");
    }

    #[test]
    fn test_fatal_classification() {
        assert!(Error::store("add", "io").is_fatal());
        assert!(Error::Config("x".into()).is_fatal());
        assert!(Error::Cancelled.is_fatal());
        assert!(!Error::InvalidInput("x".into()).is_fatal());
        assert!(!Error::operation("write_shard", "io").is_fatal());
    }
}
