//! Checkpoint records and resume modes.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Per-file counters inside a source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStats {
    /// Records read from the file, including failed ones.
    pub processed: u64,
    /// Documents written to shards.
    pub written: u64,
    /// Documents rejected by a stage or failed by the connector.
    pub rejected: u64,
}

/// Progress of one source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceProgress {
    /// Records consumed from the source and durably accounted for.
    pub processed_docs: u64,
    /// Next shard number to write.
    pub shard_idx: u64,
    /// Per-file counters, keyed by file path (`unknown` when not reported).
    #[serde(default)]
    pub file_stats: BTreeMap<String, FileStats>,
    /// True once the source reached end-of-stream and its final shard was committed.
    #[serde(default)]
    pub completed: bool,
}

/// Persisted run progress; the sole source of truth for where to resume.
///
/// References sources by name only, so its size does not grow with the corpus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// Run identifier.
    pub run_id: String,
    /// When the record was first created.
    pub created_at: DateTime<Utc>,
    /// When the record was last committed.
    pub updated_at: DateTime<Utc>,
    /// Per-source progress.
    #[serde(default)]
    pub sources: BTreeMap<String, SourceProgress>,
}

impl CheckpointRecord {
    /// Creates an empty record for a run.
    #[must_use]
    pub fn empty(run_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.into(),
            created_at: now,
            updated_at: now,
            sources: BTreeMap::new(),
        }
    }

    /// Returns progress for a source, default when never committed.
    #[must_use]
    pub fn progress(&self, source_name: &str) -> SourceProgress {
        self.sources.get(source_name).cloned().unwrap_or_default()
    }

    /// Returns true if the source has been fully committed.
    #[must_use]
    pub fn is_complete(&self, source_name: &str) -> bool {
        self.sources
            .get(source_name)
            .is_some_and(|progress| progress.completed)
    }
}

/// How a run treats an existing checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResumeMode {
    /// Use the existing checkpoint if present, otherwise start empty.
    #[default]
    Auto,
    /// Ignore any existing checkpoint and start from the first record.
    Beginning,
    /// Load a specific named snapshot.
    Checkpoint,
    /// Discard the checkpoint and clear partial output of incomplete sources.
    Ignore,
}

impl ResumeMode {
    /// Returns the configuration label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Beginning => "beginning",
            Self::Checkpoint => "checkpoint",
            Self::Ignore => "ignore",
        }
    }
}

impl fmt::Display for ResumeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResumeMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "beginning" => Ok(Self::Beginning),
            "checkpoint" => Ok(Self::Checkpoint),
            "ignore" => Ok(Self::Ignore),
            other => Err(Error::Config(format!(
                "unknown resume mode '{other}' (expected auto, beginning, checkpoint or ignore)"
            ))),
        }
    }
}
