//! Checkpoint/resume manager.
//!
//! One record per run lives at `checkpoints/{run_id}.json`; every commit also
//! leaves a named snapshot at
//! `checkpoints/{run_id}/snapshots/{source}-{processed_docs}.json`. All writes
//! go through [`StorageBackend::write`], which is atomic, so a torn checkpoint
//! is never observable.

use crate::models::{CheckpointRecord, ResumeMode, SourceProgress};
use crate::storage::{StorageBackend, read_json, write_json};
use crate::{Error, Result};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Loads, commits and inspects the checkpoint of one run.
///
/// # Example
///
/// ```rust
/// use corpusgate::{CheckpointManager, MemoryStorage, ResumeMode, SourceProgress};
/// use std::sync::Arc;
///
/// let storage = Arc::new(MemoryStorage::new());
/// let mut manager = CheckpointManager::new(storage.clone(), "run-1");
/// manager.load(ResumeMode::Auto, None)?;
/// manager.commit("wiki", SourceProgress { processed_docs: 100, shard_idx: 2, ..Default::default() })?;
///
/// let mut resumed = CheckpointManager::new(storage, "run-1");
/// let record = resumed.load(ResumeMode::Auto, None)?;
/// assert_eq!(record.progress("wiki").processed_docs, 100);
/// assert_eq!(record.progress("wiki").shard_idx, 2);
/// # Ok::<(), corpusgate::Error>(())
/// ```
pub struct CheckpointManager {
    storage: Arc<dyn StorageBackend>,
    run_id: String,
    record: Option<CheckpointRecord>,
    discarded: Option<CheckpointRecord>,
}

impl CheckpointManager {
    /// Creates a manager for `run_id`. Nothing is read until [`Self::load`].
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>, run_id: impl Into<String>) -> Self {
        Self {
            storage,
            run_id: run_id.into(),
            record: None,
            discarded: None,
        }
    }

    /// Returns the run id.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Storage key of the run's checkpoint.
    #[must_use]
    pub fn checkpoint_key(run_id: &str) -> String {
        format!("checkpoints/{run_id}.json")
    }

    fn snapshot_prefix(&self) -> String {
        format!("checkpoints/{}/snapshots/", self.run_id)
    }

    /// Loads the record according to `mode`.
    ///
    /// # Errors
    ///
    /// - [`Error::CheckpointCorruption`] if `auto` or `checkpoint` finds an
    ///   unreadable record or one belonging to another run
    /// - [`Error::Config`] if `checkpoint` is given no id or an unknown id
    #[instrument(skip(self), fields(run_id = %self.run_id))]
    pub fn load(
        &mut self,
        mode: ResumeMode,
        checkpoint_id: Option<&str>,
    ) -> Result<CheckpointRecord> {
        self.discarded = None;
        let record = match mode {
            ResumeMode::Auto => self
                .read_record(&Self::checkpoint_key(&self.run_id))?
                .unwrap_or_else(|| CheckpointRecord::empty(&self.run_id)),
            ResumeMode::Beginning => CheckpointRecord::empty(&self.run_id),
            ResumeMode::Checkpoint => {
                let id = checkpoint_id
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .ok_or_else(|| {
                        Error::Config(
                            "resume = \"checkpoint\" requires a checkpoint_id".to_string(),
                        )
                    })?;
                let key = format!("{}{}.json", self.snapshot_prefix(), snapshot_id_segment(id));
                self.read_record(&key)?.ok_or_else(|| {
                    Error::Config(format!("checkpoint '{id}' not found for run '{}'", self.run_id))
                })?
            },
            ResumeMode::Ignore => {
                let key = Self::checkpoint_key(&self.run_id);
                self.discarded = self.read_record(&key).unwrap_or_else(|e| {
                    warn!(error = %e, "Discarding unreadable checkpoint");
                    None
                });
                self.storage
                    .delete(&key)
                    .map_err(|e| Error::operation("discard_checkpoint", e))?;
                CheckpointRecord::empty(&self.run_id)
            },
        };
        info!(
            mode = %mode,
            sources = record.sources.len(),
            completed = record.sources.values().filter(|p| p.completed).count(),
            "Loaded checkpoint"
        );
        self.record = Some(record.clone());
        Ok(record)
    }

    fn read_record(&self, key: &str) -> Result<Option<CheckpointRecord>> {
        let corrupt = |cause: String| Error::CheckpointCorruption {
            run_id: self.run_id.clone(),
            cause,
        };
        let Some(bytes) = self.storage.read(key).map_err(|e| corrupt(e.to_string()))? else {
            return Ok(None);
        };
        let record: CheckpointRecord =
            serde_json::from_slice(&bytes).map_err(|e| corrupt(format!("{key}: {e}")))?;
        if record.run_id != self.run_id {
            return Err(corrupt(format!(
                "{key} belongs to run '{}'",
                record.run_id
            )));
        }
        Ok(Some(record))
    }

    /// The record discarded by the last `ignore` load, if it was readable.
    ///
    /// The runner uses it to clear partial output of incomplete sources.
    #[must_use]
    pub const fn discarded(&self) -> Option<&CheckpointRecord> {
        self.discarded.as_ref()
    }

    /// Returns the loaded record.
    #[must_use]
    pub const fn current(&self) -> Option<&CheckpointRecord> {
        self.record.as_ref()
    }

    /// Persists `progress` for `source` and writes a snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if nothing was loaded or the progress
    /// goes backwards, or the storage error if the write fails. On failure the
    /// previously committed record stays valid.
    #[instrument(
        skip(self, progress),
        fields(run_id = %self.run_id, processed = progress.processed_docs)
    )]
    pub fn commit(&mut self, source: &str, progress: SourceProgress) -> Result<()> {
        let record = self
            .record
            .as_ref()
            .ok_or_else(|| Error::InvalidInput("commit before checkpoint load".to_string()))?;
        let previous = record.progress(source);
        if progress.processed_docs < previous.processed_docs
            || progress.shard_idx < previous.shard_idx
        {
            return Err(Error::InvalidInput(format!(
                "checkpoint for '{source}' would move backwards ({} -> {} docs)",
                previous.processed_docs, progress.processed_docs
            )));
        }

        let mut next = record.clone();
        next.updated_at = Utc::now();
        next.sources.insert(source.to_string(), progress.clone());
        write_json(
            self.storage.as_ref(),
            &Self::checkpoint_key(&self.run_id),
            &next,
        )?;
        let snapshot_key = format!(
            "{}{}.json",
            self.snapshot_prefix(),
            snapshot_id(source, progress.processed_docs, progress.completed)
        );
        if let Err(e) = write_json(self.storage.as_ref(), &snapshot_key, &next) {
            warn!(error = %e, "Failed to write checkpoint snapshot");
        }
        self.record = Some(next);

        metrics::counter!("corpusgate_checkpoint_commits_total").increment(1);
        tracing::debug!(
            source,
            shard_idx = progress.shard_idx,
            completed = progress.completed,
            "Committed checkpoint"
        );
        Ok(())
    }

    /// Marks `source` complete, keeping its counters.
    pub fn mark_complete(&mut self, source: &str) -> Result<()> {
        let mut progress = self
            .record
            .as_ref()
            .map(|record| record.progress(source))
            .unwrap_or_default();
        progress.completed = true;
        self.commit(source, progress)
    }

    /// Returns true if `source` reached end-of-stream and was committed.
    #[must_use]
    pub fn is_complete(&self, source: &str) -> bool {
        self.record
            .as_ref()
            .is_some_and(|record| record.is_complete(source))
    }

    /// Lists snapshot ids of this run, oldest first by name.
    pub fn list_snapshots(&self) -> Result<Vec<String>> {
        let prefix = self.snapshot_prefix();
        Ok(self
            .storage
            .list(&prefix)?
            .into_iter()
            .filter_map(|key| {
                key.strip_prefix(&prefix)
                    .and_then(|name| name.strip_suffix(".json"))
                    .map(String::from)
            })
            .collect())
    }

    /// Read-only view of a run's checkpoint, for monitoring.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CheckpointCorruption`] if the record cannot be parsed.
    pub fn read(storage: &dyn StorageBackend, run_id: &str) -> Result<Option<CheckpointRecord>> {
        read_json(storage, &Self::checkpoint_key(run_id)).map_err(|e| Error::CheckpointCorruption {
            run_id: run_id.to_string(),
            cause: e.to_string(),
        })
    }

    /// Lists run ids that have a checkpoint.
    pub fn list_runs(storage: &dyn StorageBackend) -> Result<Vec<String>> {
        Ok(storage
            .list("checkpoints/")?
            .into_iter()
            .filter_map(|key| {
                let name = key.strip_prefix("checkpoints/")?.strip_suffix(".json")?;
                (!name.contains('/')).then(|| name.to_string())
            })
            .collect())
    }
}

fn snapshot_id(source: &str, processed_docs: u64, completed: bool) -> String {
    let suffix = if completed { "-final" } else { "" };
    snapshot_id_segment(&format!("{source}-{processed_docs}{suffix}"))
}

fn snapshot_id_segment(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .collect::<String>()
        .trim_start_matches('.')
        .to_string()
}
