//! Line-delimited JSON writers.

use super::{RejectionSink, ShardWriter, path_segment};
use crate::models::{DocId, Document};
use crate::services::pipeline::RejectedDocument;
use crate::storage::StorageBackend;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, instrument};

fn to_jsonl<T: Serialize>(items: &[T]) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    for item in items {
        serde_json::to_writer(&mut bytes, item).map_err(|e| Error::operation("serialize", e))?;
        bytes.push(b'\n');
    }
    Ok(bytes)
}

fn delete_prefix(storage: &dyn StorageBackend, prefix: &str) -> Result<usize> {
    let mut removed = 0;
    for key in storage.list(prefix)? {
        if storage.delete(&key)? {
            removed += 1;
        }
    }
    Ok(removed)
}

#[derive(Deserialize)]
struct ShardLine {
    doc_id: DocId,
}

/// Writes shards to `docs/{source}/shard_{idx:05}.jsonl`, one document per line.
pub struct JsonlShardWriter {
    storage: Arc<dyn StorageBackend>,
}

impl JsonlShardWriter {
    /// Creates a writer over `storage`.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    /// Storage key of a shard.
    #[must_use]
    pub fn shard_key(source: &str, shard_idx: u64) -> String {
        format!("{}shard_{shard_idx:05}.jsonl", Self::prefix(source))
    }

    fn prefix(source: &str) -> String {
        format!("docs/{}/", path_segment(source))
    }
}

impl ShardWriter for JsonlShardWriter {
    #[instrument(skip(self, documents), fields(docs = documents.len()))]
    fn write_shard(
        &self,
        source: &str,
        shard_idx: u64,
        documents: Vec<Document>,
    ) -> Result<String> {
        let key = Self::shard_key(source, shard_idx);
        let bytes = to_jsonl(&documents)?;
        self.storage
            .write(&key, &bytes)
            .map_err(|e| Error::operation("write_shard", e))?;
        metrics::counter!("corpusgate_shards_written_total", "source" => source.to_string())
            .increment(1);
        debug!(key = %key, bytes = bytes.len(), "Wrote shard");
        Ok(key)
    }

    fn shard_doc_ids(&self, source: &str, shard_idx: u64) -> Result<Option<Vec<DocId>>> {
        let key = Self::shard_key(source, shard_idx);
        let Some(bytes) = self.storage.read(&key)? else {
            return Ok(None);
        };
        bytes
            .split(|b| *b == b'\n')
            .filter(|line| !line.is_empty())
            .map(|line| {
                serde_json::from_slice::<ShardLine>(line)
                    .map(|parsed| parsed.doc_id)
                    .map_err(|e| Error::operation("read_shard", format!("{key}: {e}")))
            })
            .collect::<Result<Vec<_>>>()
            .map(Some)
    }

    fn shard_indices(&self, source: &str) -> Result<Vec<u64>> {
        let prefix = Self::prefix(source);
        let mut indices: Vec<u64> = self
            .storage
            .list(&prefix)?
            .iter()
            .filter_map(|key| {
                key.strip_prefix(&prefix)?
                    .strip_prefix("shard_")?
                    .strip_suffix(".jsonl")?
                    .parse()
                    .ok()
            })
            .collect();
        indices.sort_unstable();
        Ok(indices)
    }

    fn delete_shard(&self, source: &str, shard_idx: u64) -> Result<bool> {
        self.storage
            .delete(&Self::shard_key(source, shard_idx))
            .map_err(|e| Error::operation("delete_shard", e))
    }

    fn clear_source(&self, source: &str) -> Result<usize> {
        delete_prefix(self.storage.as_ref(), &Self::prefix(source))
    }
}

/// Writes rejections to `rejections/{source}/part_{n:05}.jsonl`.
///
/// Each call to [`RejectionSink::record`] writes one new part; numbering
/// continues after the parts already present, so resumed runs append.
pub struct JsonlRejectionSink {
    storage: Arc<dyn StorageBackend>,
    next_part: Mutex<HashMap<String, usize>>,
}

impl JsonlRejectionSink {
    /// Creates a sink over `storage`.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            storage,
            next_part: Mutex::new(HashMap::new()),
        }
    }

    fn prefix(source: &str) -> String {
        format!("rejections/{}/", path_segment(source))
    }

    /// Reads every rejection recorded for `source`, in write order.
    ///
    /// # Errors
    ///
    /// Returns the storage error, or [`Error::OperationFailed`] for a malformed line.
    pub fn read_all(&self, source: &str) -> Result<Vec<RejectedDocument>> {
        let mut out = Vec::new();
        for key in self.storage.list(&Self::prefix(source))? {
            let Some(bytes) = self.storage.read(&key)? else {
                continue;
            };
            for line in bytes.split(|b| *b == b'\n').filter(|l| !l.is_empty()) {
                out.push(
                    serde_json::from_slice(line)
                        .map_err(|e| Error::operation("read_rejections", format!("{key}: {e}")))?,
                );
            }
        }
        Ok(out)
    }
}

impl RejectionSink for JsonlRejectionSink {
    fn record(&self, source: &str, rejected: &[RejectedDocument]) -> Result<()> {
        if rejected.is_empty() {
            return Ok(());
        }
        let prefix = Self::prefix(source);
        let part = {
            let mut next = self
                .next_part
                .lock()
                .map_err(|e| Error::operation("lock_rejections", e))?;
            if !next.contains_key(source) {
                let existing = self.storage.list(&prefix)?.len();
                next.insert(source.to_string(), existing);
            }
            let slot = next.entry(source.to_string()).or_default();
            let part = *slot;
            *slot += 1;
            part
        };
        let key = format!("{prefix}part_{part:05}.jsonl");
        self.storage
            .write(&key, &to_jsonl(rejected)?)
            .map_err(|e| Error::operation("write_rejections", e))?;
        debug!(source, key = %key, count = rejected.len(), "Recorded rejections");
        Ok(())
    }

    fn clear_source(&self, source: &str) -> Result<usize> {
        if let Ok(mut next) = self.next_part.lock() {
            next.remove(source);
        }
        delete_prefix(self.storage.as_ref(), &Self::prefix(source))
    }
}
