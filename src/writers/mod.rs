//! Output collaborators: shard writers and rejection sinks.
//!
//! Writers are called only with documents that reached `Frozen`; rejected
//! documents go to a [`RejectionSink`] tagged with stage and reason. Both
//! write through a [`crate::StorageBackend`], so output lands on the same
//! backend as the fingerprint stores and checkpoints.

mod jsonl;

pub use jsonl::{JsonlRejectionSink, JsonlShardWriter};

use crate::Result;
use crate::models::{DocId, Document};
use crate::services::pipeline::RejectedDocument;

/// Writes accepted documents as numbered shards.
///
/// # Lifecycle
///
/// 1. The runner buffers accepted documents for one source
/// 2. `write_shard()` persists the buffer as shard `shard_idx`
/// 3. The fingerprint stores are flushed and the checkpoint is committed
///
/// A crash between steps 2 and 3 leaves a shard the checkpoint does not
/// cover. On resume the runner evicts its fingerprints, deletes it and writes
/// the same `shard_idx` again, so implementations must overwrite, not append.
/// Shards the checkpoint does cover are never overwritten: numbering resumes
/// after the highest existing shard.
pub trait ShardWriter: Send + Sync {
    /// Persists `documents` as shard `shard_idx` of `source` and returns its location.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OperationFailed`] if serialization or I/O fails.
    fn write_shard(&self, source: &str, shard_idx: u64, documents: Vec<Document>) -> Result<String>;

    /// Document ids stored in shard `shard_idx` of `source`, `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns the storage error, or [`crate::Error::OperationFailed`] if the
    /// shard cannot be parsed.
    fn shard_doc_ids(&self, source: &str, shard_idx: u64) -> Result<Option<Vec<DocId>>>;

    /// Indices of the existing shards of `source`, ascending.
    ///
    /// # Errors
    ///
    /// Returns the storage error if listing fails.
    fn shard_indices(&self, source: &str) -> Result<Vec<u64>>;

    /// First index after every existing shard of `source`.
    ///
    /// # Errors
    ///
    /// Returns the storage error if listing fails.
    fn next_shard_idx(&self, source: &str) -> Result<u64> {
        Ok(self
            .shard_indices(source)?
            .into_iter()
            .max()
            .map_or(0, |idx| idx + 1))
    }

    /// Deletes shard `shard_idx` of `source`. Returns false if it did not exist.
    ///
    /// # Errors
    ///
    /// Returns the storage error if deleting fails.
    fn delete_shard(&self, source: &str, shard_idx: u64) -> Result<bool>;

    /// Deletes every shard of `source`. Returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns the storage error if listing or deleting fails.
    fn clear_source(&self, source: &str) -> Result<usize>;
}

/// Receives rejected documents.
pub trait RejectionSink: Send + Sync {
    /// Appends `rejected` to the log of `source`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OperationFailed`] if serialization or I/O fails.
    fn record(&self, source: &str, rejected: &[RejectedDocument]) -> Result<()>;

    /// Deletes the rejection log of `source`. Returns the number of parts removed.
    ///
    /// # Errors
    ///
    /// Returns the storage error if listing or deleting fails.
    fn clear_source(&self, source: &str) -> Result<usize>;
}

/// Maps a source name onto a single safe storage key segment.
pub(crate) fn path_segment(name: &str) -> String {
    let segment: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .collect();
    let segment = segment.trim_start_matches('.');
    if segment.is_empty() { "_".to_string() } else { segment.to_string() }
}
