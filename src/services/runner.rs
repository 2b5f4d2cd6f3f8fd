//! Run driver: sources in priority order, stages per batch, shards and checkpoints.
//!
//! Each source is drained to end-of-stream before the next one starts. Within
//! a source, progress becomes durable only at a commit point, which always
//! happens in this order:
//!
//! 1. every accepted document read so far is written as a shard
//! 2. the fingerprint stores are flushed
//! 3. buffered rejections are recorded
//! 4. the checkpoint is committed with the stream position
//!
//! A crash between any two steps resumes from the previous checkpoint. Shards
//! the resumed checkpoint does not cover are rolled back before reading
//! resumes: their documents' fingerprints are evicted and the shard files
//! deleted, so those documents are accepted again instead of being lost to
//! self-matches. Under `auto` that is the single shard at the checkpointed
//! index; under `checkpoint` it is every shard from that index on. Shards a
//! checkpoint covers are never rewritten, so numbering continues after the
//! highest shard still present, which is what `beginning` relies on.
//!
//! `ignore` rolls back every shard of each source it clears the same way, so
//! the fresh pass does not reject its own earlier output as duplicates.

use crate::config::CorpusConfig;
use crate::models::{
    CheckpointRecord, DocId, Document, FileStats, HashParams, ResumeMode, SourceProgress,
};
use crate::services::checkpoint::CheckpointManager;
use crate::services::dedup::{DedupSummary, GlobalFingerprintManager};
use crate::services::pipeline::{
    PipelineOrchestrator, RejectedDocument, Rejection, StageCounts, StageRegistry,
};
use crate::services::scheduler::SourceScheduler;
use crate::sources::{SourceConnector, SourceMode, SourceRecord};
use crate::storage::{LocalStorage, StorageBackend, write_json};
use crate::writers::{JsonlRejectionSink, JsonlShardWriter, RejectionSink, ShardWriter};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, info_span, instrument, warn};

/// Stage name recorded for records the connector could not parse.
pub const SOURCE_STAGE: &str = "source";

/// File key used when a record does not report its file.
const UNKNOWN_FILE: &str = "unknown";

/// Cooperative cancellation flag shared between the runner and a signal handler.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// Creates an untriggered token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns true once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Batching and resume settings of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSettings {
    /// Documents per shard.
    pub shard_docs: usize,
    /// Commit at least every this many records.
    pub checkpoint_every_docs: usize,
    /// Documents handed to the orchestrator at once.
    pub batch_size: usize,
    /// Checkpoint handling.
    pub resume: ResumeMode,
    /// Snapshot for [`ResumeMode::Checkpoint`].
    pub checkpoint_id: Option<String>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            shard_docs: 5000,
            checkpoint_every_docs: 10_000,
            batch_size: 1000,
            resume: ResumeMode::Auto,
            checkpoint_id: None,
        }
    }
}

impl From<&crate::config::RunConfig> for RunSettings {
    fn from(run: &crate::config::RunConfig) -> Self {
        Self {
            shard_docs: run.shard_docs.max(1),
            checkpoint_every_docs: run.checkpoint_every_docs.max(1),
            batch_size: run.batch_size.max(1),
            resume: run.resume,
            checkpoint_id: run.checkpoint_id.clone(),
        }
    }
}

/// Outcome of one source within a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceReport {
    /// Source name.
    pub source: String,
    /// Document family.
    pub document_type: String,
    /// Records already committed when this run started.
    pub resumed_from: u64,
    /// Records read by this run.
    pub processed: u64,
    /// Documents written by this run.
    pub written: u64,
    /// Documents rejected by this run, including connector failures.
    pub rejected: u64,
    /// Shards written by this run.
    pub shards: u64,
    /// True if the source was already complete and not read again.
    pub skipped: bool,
    /// True once the source reached end-of-stream.
    pub completed: bool,
    /// Stage counters for this run.
    pub stages: BTreeMap<String, StageCounts>,
}

/// Result of [`PipelineRunner::run`]; also persisted as the run manifest.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Run identifier.
    pub run_id: String,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
    /// Stage names in execution order.
    pub stages: Vec<String>,
    /// Fingerprint parameters the run deduplicated with.
    pub fingerprint_params: HashParams,
    /// Per-source outcomes in processing order.
    pub sources: Vec<SourceReport>,
    /// Dedup metrics of this run.
    pub dedup: DedupSummary,
}

impl RunReport {
    /// Documents written across sources.
    #[must_use]
    pub fn total_written(&self) -> u64 {
        self.sources.iter().map(|s| s.written).sum()
    }

    /// Documents rejected across sources.
    #[must_use]
    pub fn total_rejected(&self) -> u64 {
        self.sources.iter().map(|s| s.rejected).sum()
    }

    /// Storage key of a run's manifest.
    #[must_use]
    pub fn manifest_key(run_id: &str) -> String {
        format!("manifests/{run_id}.json")
    }
}

/// Drives sources through the pipeline with checkpointing.
///
/// # Example
///
/// ```rust
/// use corpusgate::services::runner::RunSettings;
/// use corpusgate::services::pipeline::StageRegistry;
/// use corpusgate::sources::{SourceConnector, VecSource};
/// use corpusgate::{
///     FingerprintConfig, GlobalFingerprintManager, MemoryStorage, PipelineOrchestrator,
///     PipelineRunner, PriorityConfig,
/// };
/// use std::sync::Arc;
///
/// let priority = PriorityConfig::new(vec!["books".into(), "commoncrawl".into()]);
/// let manager = Arc::new(GlobalFingerprintManager::in_memory(&FingerprintConfig::default())?);
/// let stages = StageRegistry::with_builtins(manager.clone(), priority.clone())
///     .build(&["unicode_normalize".into(), "global_dedup".into()])?;
/// let orchestrator = PipelineOrchestrator::new(stages)?;
///
/// let text = "It was the best of times, it was the worst of times.";
/// let sources: Vec<Box<dyn SourceConnector>> = vec![
///     Box::new(VecSource::from_texts("cc", "commoncrawl", [text])),
///     Box::new(VecSource::from_texts("gutenberg", "books", [text])),
/// ];
///
/// let runner = PipelineRunner::new(
///     "run-1",
///     Arc::new(MemoryStorage::new()),
///     manager,
///     orchestrator,
///     priority,
///     RunSettings::default(),
/// );
/// let report = runner.run(sources)?;
/// assert_eq!(report.sources[0].source, "gutenberg");
/// assert_eq!(report.sources[0].written, 1);
/// assert_eq!(report.sources[1].rejected, 1);
/// # Ok::<(), corpusgate::Error>(())
/// ```
pub struct PipelineRunner {
    run_id: String,
    storage: Arc<dyn StorageBackend>,
    manager: Arc<GlobalFingerprintManager>,
    orchestrator: PipelineOrchestrator,
    scheduler: SourceScheduler,
    writer: Box<dyn ShardWriter>,
    rejections: Box<dyn RejectionSink>,
    settings: RunSettings,
    cancel: CancellationToken,
}

/// Mutable state of the source being drained.
struct SourceRun<'a> {
    name: &'a str,
    progress: SourceProgress,
    batch: Vec<Document>,
    accepted: Vec<Document>,
    rejected: Vec<RejectedDocument>,
    since_commit: usize,
    report: SourceReport,
}

impl SourceRun<'_> {
    fn stats(&mut self, source_file: Option<&str>) -> &mut FileStats {
        self.progress
            .file_stats
            .entry(source_file.unwrap_or(UNKNOWN_FILE).to_string())
            .or_default()
    }
}

impl PipelineRunner {
    /// Creates a runner writing JSON-lines shards and rejections to `storage`.
    #[must_use]
    pub fn new(
        run_id: impl Into<String>,
        storage: Arc<dyn StorageBackend>,
        manager: Arc<GlobalFingerprintManager>,
        orchestrator: PipelineOrchestrator,
        priority: crate::models::PriorityConfig,
        settings: RunSettings,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            writer: Box::new(JsonlShardWriter::new(storage.clone())),
            rejections: Box::new(JsonlRejectionSink::new(storage.clone())),
            storage,
            manager,
            orchestrator,
            scheduler: SourceScheduler::new(priority),
            settings,
            cancel: CancellationToken::new(),
        }
    }

    /// Builds a runner from a loaded configuration with the built-in stages.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for unknown stages or a bad stage order, and
    /// storage or fingerprint store errors if opening fails.
    pub fn from_config(config: &CorpusConfig) -> Result<Self> {
        Self::from_config_with(config, |_| {})
    }

    /// Like [`Self::from_config`], letting `register` add plugin stages.
    ///
    /// # Errors
    ///
    /// See [`Self::from_config`].
    pub fn from_config_with(
        config: &CorpusConfig,
        register: impl FnOnce(&mut StageRegistry),
    ) -> Result<Self> {
        let priority = config.effective_priority();
        let state: Arc<dyn StorageBackend> = Arc::new(LocalStorage::new(&config.run.state_dir)?);
        let output: Arc<dyn StorageBackend> = Arc::new(LocalStorage::new(&config.run.out_dir)?);
        let manager = Arc::new(GlobalFingerprintManager::open(state, &config.fingerprints)?);

        let mut registry = StageRegistry::with_builtins(manager.clone(), priority.clone());
        register(&mut registry);
        let orchestrator = PipelineOrchestrator::new(registry.build(&config.stages)?)?;

        Ok(Self::new(
            config.run.run_id.clone(),
            output,
            manager,
            orchestrator,
            priority,
            RunSettings::from(&config.run),
        ))
    }

    /// Builder method to replace the shard writer.
    #[must_use]
    pub fn with_writer(mut self, writer: Box<dyn ShardWriter>) -> Self {
        self.writer = writer;
        self
    }

    /// Builder method to replace the rejection sink.
    #[must_use]
    pub fn with_rejection_sink(mut self, sink: Box<dyn RejectionSink>) -> Self {
        self.rejections = sink;
        self
    }

    /// Builder method to share a cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Returns the run id.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Returns the fingerprint manager.
    #[must_use]
    pub const fn manager(&self) -> &Arc<GlobalFingerprintManager> {
        &self.manager
    }

    /// Returns the cancellation token.
    #[must_use]
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs every source to completion in priority order.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error. Fingerprint changes since the last
    /// commit point are rolled back and the last committed checkpoint stays
    /// valid; [`Error::Cancelled`] is returned if the token fired.
    #[instrument(skip(self, sources), fields(run_id = %self.run_id))]
    pub fn run(&self, sources: Vec<Box<dyn SourceConnector>>) -> Result<RunReport> {
        let started_at = Utc::now();
        let mut checkpoints = CheckpointManager::new(self.storage.clone(), self.run_id.clone());
        let record = checkpoints.load(
            self.settings.resume,
            self.settings.checkpoint_id.as_deref(),
        )?;
        if self.settings.resume == ResumeMode::Ignore {
            self.clear_incomplete_output(&sources, checkpoints.discarded())?;
        }

        let ordered = self.scheduler.order(sources);
        let plan: Vec<&str> = ordered.iter().map(|s| s.name()).collect();
        info!(sources = ?plan, stages = ?self.orchestrator.stage_names(), "Starting run");

        let mut reports = Vec::with_capacity(ordered.len());
        for source in &ordered {
            if record.is_complete(source.name()) {
                info!(source = source.name(), "Source already complete; skipping");
                reports.push(SourceReport {
                    source: source.name().to_string(),
                    document_type: source.document_type().to_string(),
                    resumed_from: record.progress(source.name()).processed_docs,
                    skipped: true,
                    completed: true,
                    ..SourceReport::default()
                });
                continue;
            }
            match self.run_source(source.as_ref(), &mut checkpoints) {
                Ok(report) => reports.push(report),
                Err(e) => {
                    if let Err(rollback) = self.manager.rollback() {
                        error!(error = %rollback, "Failed to roll back fingerprint stores");
                    }
                    if matches!(e, Error::Cancelled) {
                        warn!(source = source.name(), "Run cancelled; last checkpoint kept");
                    } else {
                        error!(source = source.name(), error = %e, "Source failed; run aborted");
                    }
                    return Err(e);
                },
            }
        }

        let report = RunReport {
            run_id: self.run_id.clone(),
            started_at,
            finished_at: Utc::now(),
            stages: self.orchestrator.stage_names(),
            fingerprint_params: self.manager.params().clone(),
            sources: reports,
            dedup: self.manager.summary(),
        };
        write_json(
            self.storage.as_ref(),
            &RunReport::manifest_key(&self.run_id),
            &report,
        )?;
        info!(
            written = report.total_written(),
            rejected = report.total_rejected(),
            duplicate_rate = report.dedup.duplicate_rate,
            "Run finished"
        );
        Ok(report)
    }

    fn clear_incomplete_output(
        &self,
        sources: &[Box<dyn SourceConnector>],
        discarded: Option<&CheckpointRecord>,
    ) -> Result<()> {
        for source in sources {
            let name = source.name();
            if discarded.is_some_and(|record| record.is_complete(name)) {
                continue;
            }
            self.roll_back_shards(name, &self.writer.shard_indices(name)?)?;
            let shards = self.writer.clear_source(name)?;
            let parts = self.rejections.clear_source(name)?;
            if shards + parts > 0 {
                info!(source = name, shards, parts, "Cleared partial output");
            }
        }
        Ok(())
    }

    fn run_source(
        &self,
        source: &dyn SourceConnector,
        checkpoints: &mut CheckpointManager,
    ) -> Result<SourceReport> {
        let name = source.name();
        let span = info_span!("source", source = name);
        let _enter = span.enter();

        let mut progress = checkpoints
            .current()
            .map(|record| record.progress(name))
            .unwrap_or_default();
        let resumed_from = progress.processed_docs;
        if resumed_from > 0 {
            if source.mode() == SourceMode::Streaming {
                warn!(
                    skip = resumed_from,
                    "Streaming source has no stable offsets; skipped records may be re-delivered"
                );
            }
            info!(resumed_from, shard_idx = progress.shard_idx, "Resuming source");
        } else {
            info!(document_type = source.document_type(), "Starting source");
        }
        self.orchestrator.analytics().reset();
        let uncovered: Vec<u64> = match self.settings.resume {
            ResumeMode::Auto => vec![progress.shard_idx],
            ResumeMode::Checkpoint => self
                .writer
                .shard_indices(name)?
                .into_iter()
                .filter(|idx| *idx >= progress.shard_idx)
                .collect(),
            ResumeMode::Beginning | ResumeMode::Ignore => Vec::new(),
        };
        self.roll_back_shards(name, &uncovered)?;
        let next_free = self.writer.next_shard_idx(name)?;
        if next_free > progress.shard_idx {
            info!(shard_idx = next_free, "Existing shards kept; numbering continues after them");
            progress.shard_idx = next_free;
        }

        let mut stream = source.open(resumed_from)?;
        let mut state = SourceRun {
            name,
            progress,
            batch: Vec::with_capacity(self.settings.batch_size),
            accepted: Vec::new(),
            rejected: Vec::new(),
            since_commit: 0,
            report: SourceReport {
                source: name.to_string(),
                document_type: source.document_type().to_string(),
                resumed_from,
                ..SourceReport::default()
            },
        };

        while let Some(item) = stream.next() {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            match item? {
                SourceRecord::Document(raw) => {
                    let doc = raw.into_document(name, source.document_type());
                    state.stats(doc.source_file.as_deref()).processed += 1;
                    state.batch.push(doc);
                },
                SourceRecord::Failed { source_file, cause } => {
                    let stats = state.stats(source_file.as_deref());
                    stats.processed += 1;
                    stats.rejected += 1;
                    warn!(
                        file = source_file.as_deref().unwrap_or(UNKNOWN_FILE),
                        %cause,
                        "Unreadable record"
                    );
                    state.report.rejected += 1;
                    state.rejected.push(RejectedDocument::new(
                        DocId::derive(name, &format!("{}:{}", stream.position(), cause)),
                        name,
                        source_file,
                        SOURCE_STAGE,
                        Rejection::new("SOURCE_ERROR", cause),
                    ));
                },
            }
            state.report.processed += 1;
            state.since_commit += 1;

            let checkpoint_due = state.since_commit >= self.settings.checkpoint_every_docs;
            if state.batch.len() >= self.settings.batch_size
                || state.batch.len() + state.accepted.len() >= self.settings.shard_docs
                || checkpoint_due
            {
                self.process_batch(&mut state)?;
            }
            if state.accepted.len() >= self.settings.shard_docs || checkpoint_due {
                self.commit_point(&mut state, stream.position(), checkpoints)?;
            }
        }

        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.process_batch(&mut state)?;
        state.progress.completed = true;
        self.commit_point(&mut state, stream.position(), checkpoints)?;
        state.report.completed = true;
        state.report.stages = self.orchestrator.analytics().snapshot();
        info!(
            processed = state.report.processed,
            written = state.report.written,
            rejected = state.report.rejected,
            shards = state.report.shards,
            "Source complete"
        );
        Ok(state.report)
    }

    /// Evicts the fingerprints of the given shards, then deletes them.
    ///
    /// Fingerprint removals are flushed before any file is deleted.
    fn roll_back_shards(&self, source: &str, shard_idxs: &[u64]) -> Result<()> {
        let mut found = Vec::new();
        let mut docs = 0;
        let mut evicted = 0;
        for &shard_idx in shard_idxs {
            let Some(doc_ids) = self.writer.shard_doc_ids(source, shard_idx)? else {
                continue;
            };
            for doc_id in &doc_ids {
                evicted += self.manager.remove_document(doc_id)?;
            }
            docs += doc_ids.len();
            found.push(shard_idx);
        }
        if found.is_empty() {
            return Ok(());
        }
        self.manager.flush()?;
        for &shard_idx in &found {
            self.writer.delete_shard(source, shard_idx)?;
        }
        warn!(
            shards = ?found,
            docs,
            evicted,
            "Rolled back shards the checkpoint does not cover; reprocessing their records"
        );
        Ok(())
    }

    fn process_batch(&self, state: &mut SourceRun<'_>) -> Result<()> {
        if state.batch.is_empty() {
            return Ok(());
        }
        let outcome = self
            .orchestrator
            .process_batch(std::mem::take(&mut state.batch))?;
        for doc in outcome.accepted {
            state.stats(doc.source_file.as_deref()).written += 1;
            state.report.written += 1;
            state.accepted.push(doc);
        }
        for rejected in outcome.rejected {
            state.stats(rejected.source_file.as_deref()).rejected += 1;
            state.report.rejected += 1;
            state.rejected.push(rejected);
        }
        Ok(())
    }

    fn commit_point(
        &self,
        state: &mut SourceRun<'_>,
        position: u64,
        checkpoints: &mut CheckpointManager,
    ) -> Result<()> {
        if !state.accepted.is_empty() {
            let docs = std::mem::take(&mut state.accepted);
            let count = docs.len();
            let location = self
                .writer
                .write_shard(state.name, state.progress.shard_idx, docs)?;
            info!(shard_idx = state.progress.shard_idx, docs = count, %location, "Flushed shard");
            state.progress.shard_idx += 1;
            state.report.shards += 1;
        }
        self.manager.flush()?;
        if !state.rejected.is_empty() {
            self.rejections.record(state.name, &state.rejected)?;
            state.rejected.clear();
        }
        state.progress.processed_docs = position;
        checkpoints.commit(state.name, state.progress.clone())?;
        state.since_commit = 0;
        self.orchestrator.analytics().log(state.name);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::FingerprintConfig;
    use crate::models::PriorityConfig;
    use crate::services::pipeline::{GLOBAL_DEDUP, UNICODE_NORMALIZE};
    use crate::sources::{RawDocument, SourceStream, VecSource};
    use crate::storage::MemoryStorage;

    /// Distinct documents: every word is unique to its document.
    fn texts(prefix: &str, n: usize) -> Vec<String> {
        (0..n as u64)
            .map(|i| {
                (0..40u64)
                    .map(|j| {
                        let x = (i + 1)
                            .wrapping_mul(0x9E37_79B9_7F4A_7C15)
                            .wrapping_add((j + 1).wrapping_mul(0xBF58_476D_1CE4_E5B9));
                        format!("{prefix}{:x}", x >> 36)
                    })
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect()
    }

    fn runner(
        storage: &Arc<MemoryStorage>,
        manager: &Arc<GlobalFingerprintManager>,
        settings: RunSettings,
    ) -> PipelineRunner {
        let priority = PriorityConfig::new(vec!["books".into(), "commoncrawl".into()]);
        let stages = StageRegistry::with_builtins(manager.clone(), priority.clone())
            .build(&[UNICODE_NORMALIZE.to_string(), GLOBAL_DEDUP.to_string()])
            .unwrap();
        PipelineRunner::new(
            "run-1",
            storage.clone(),
            manager.clone(),
            PipelineOrchestrator::new(stages).unwrap(),
            priority,
            settings,
        )
    }

    fn persisted_manager(storage: &Arc<MemoryStorage>) -> Arc<GlobalFingerprintManager> {
        Arc::new(
            GlobalFingerprintManager::open(storage.clone(), &FingerprintConfig::default()).unwrap(),
        )
    }

    fn settings(shard_docs: usize) -> RunSettings {
        RunSettings {
            shard_docs,
            checkpoint_every_docs: 100,
            batch_size: 3,
            ..RunSettings::default()
        }
    }

    /// `(shard_idx, documents)` for every shard of `source`.
    fn doc_counts(storage: &Arc<MemoryStorage>, source: &str) -> Vec<(u64, usize)> {
        let writer = JsonlShardWriter::new(storage.clone());
        writer
            .shard_indices(source)
            .unwrap()
            .into_iter()
            .map(|idx| (idx, writer.shard_doc_ids(source, idx).unwrap().unwrap().len()))
            .collect()
    }

    #[test]
    fn test_shards_and_checkpoint_follow_stream() {
        let storage = Arc::new(MemoryStorage::new());
        let manager = persisted_manager(&storage);
        let source = VecSource::from_texts("gutenberg", "books", texts("book", 7));
        let report = runner(&storage, &manager, settings(3))
            .run(vec![Box::new(source)])
            .unwrap();

        assert_eq!(report.sources[0].written, 7);
        assert_eq!(report.sources[0].shards, 3);
        assert_eq!(storage.list("docs/gutenberg/").unwrap().len(), 3);
        let record = CheckpointManager::read(storage.as_ref(), "run-1").unwrap().unwrap();
        let progress = record.progress("gutenberg");
        assert_eq!(progress.processed_docs, 7);
        assert_eq!(progress.shard_idx, 3);
        assert!(progress.completed);
        assert!(storage.exists("manifests/run-1.json").unwrap());
    }

    #[test]
    fn test_failed_records_are_counted_and_rejected() {
        let storage = Arc::new(MemoryStorage::new());
        let manager = persisted_manager(&storage);
        let records = vec![
            SourceRecord::Document(
                RawDocument::new("a readable record").with_source_file("a.jsonl"),
            ),
            SourceRecord::Failed {
                source_file: Some("a.jsonl".into()),
                cause: "invalid JSON".into(),
            },
            SourceRecord::Document(RawDocument::new("   ").with_source_file("a.jsonl")),
        ];
        let report = runner(&storage, &manager, settings(10))
            .run(vec![Box::new(VecSource::new("web", "commoncrawl", records))])
            .unwrap();

        assert_eq!(report.sources[0].processed, 3);
        assert_eq!(report.sources[0].written, 1);
        assert_eq!(report.sources[0].rejected, 2);
        let record = CheckpointManager::read(storage.as_ref(), "run-1").unwrap().unwrap();
        let stats = record.progress("web").file_stats["a.jsonl"];
        assert_eq!(stats, FileStats { processed: 3, written: 1, rejected: 2 });

        let rejected = JsonlRejectionSink::new(storage.clone()).read_all("web").unwrap();
        let codes: Vec<&str> = rejected.iter().map(|r| r.reason_code.as_str()).collect();
        assert!(codes.contains(&"SOURCE_ERROR"));
        assert!(codes.contains(&"EMPTY_TEXT"));
    }

    #[test]
    fn test_rerun_is_idempotent() {
        let storage = Arc::new(MemoryStorage::new());
        let docs = texts("web", 5);
        let first = runner(&storage, &persisted_manager(&storage), settings(10))
            .run(vec![Box::new(VecSource::from_texts("web", "commoncrawl", docs.clone()))])
            .unwrap();
        assert_eq!(first.total_written(), 5);

        let settings = RunSettings {
            resume: ResumeMode::Beginning,
            ..settings(10)
        };
        let second = runner(&storage, &persisted_manager(&storage), settings)
            .run(vec![Box::new(VecSource::from_texts("web", "commoncrawl", docs))])
            .unwrap();
        assert_eq!(second.total_written(), 0);
        assert_eq!(second.total_rejected(), 5);
    }

    #[test]
    fn test_completed_sources_are_skipped_on_auto_resume() {
        let storage = Arc::new(MemoryStorage::new());
        let manager = persisted_manager(&storage);
        runner(&storage, &manager, settings(10))
            .run(vec![Box::new(VecSource::from_texts("web", "commoncrawl", texts("w", 2)))])
            .unwrap();
        let report = runner(&storage, &manager, settings(10))
            .run(vec![Box::new(VecSource::from_texts("web", "commoncrawl", texts("w", 2)))])
            .unwrap();
        assert!(report.sources[0].skipped);
        assert_eq!(report.sources[0].processed, 0);
    }

    struct FailingSource {
        texts: Vec<String>,
        fail_after: usize,
    }

    impl SourceConnector for FailingSource {
        fn name(&self) -> &str {
            "flaky"
        }

        fn document_type(&self) -> &str {
            "commoncrawl"
        }

        fn open(&self, offset: u64) -> Result<SourceStream> {
            let fail_after = self.fail_after;
            let items: Vec<Result<SourceRecord>> = self
                .texts
                .iter()
                .enumerate()
                .skip(usize::try_from(offset).unwrap())
                .map(|(i, text)| {
                    if i == fail_after {
                        Err(Error::Source {
                            source_name: "flaky".into(),
                            cause: "connection reset".into(),
                        })
                    } else {
                        Ok(SourceRecord::Document(RawDocument::new(text.clone())))
                    }
                })
                .collect();
            Ok(SourceStream::new(offset, items.into_iter()))
        }
    }

    #[test]
    fn test_fatal_source_error_keeps_last_checkpoint_and_resumes() {
        let storage = Arc::new(MemoryStorage::new());
        let docs = texts("flaky", 6);
        let manager = persisted_manager(&storage);
        let result = runner(&storage, &manager, settings(2)).run(vec![Box::new(FailingSource {
            texts: docs.clone(),
            fail_after: 3,
        })]);
        assert!(matches!(result, Err(Error::Source { .. })));

        let record = CheckpointManager::read(storage.as_ref(), "run-1").unwrap().unwrap();
        assert_eq!(record.progress("flaky").processed_docs, 2);
        assert_eq!(record.progress("flaky").shard_idx, 1);
        assert!(!record.progress("flaky").completed);

        let report = runner(&storage, &persisted_manager(&storage), settings(2))
            .run(vec![Box::new(FailingSource {
                texts: docs,
                fail_after: usize::MAX,
            })])
            .unwrap();
        assert_eq!(report.sources[0].resumed_from, 2);
        assert_eq!(report.sources[0].written, 4);
        assert_eq!(storage.list("docs/flaky/").unwrap().len(), 3);
    }

    #[test]
    fn test_store_failure_aborts_source() {
        let storage = Arc::new(MemoryStorage::new());
        let manager = persisted_manager(&storage);
        storage.fail_writes_under("fingerprints/");
        let result = runner(&storage, &manager, settings(2))
            .run(vec![Box::new(VecSource::from_texts("web", "commoncrawl", texts("w", 3)))]);
        assert!(matches!(result, Err(Error::FingerprintStore { .. })));
        assert!(CheckpointManager::read(storage.as_ref(), "run-1").unwrap().is_none());
        assert_eq!(manager.store_sizes().unwrap(), (0, 0, 0));
    }

    #[test]
    fn test_cancellation_returns_cancelled() {
        let storage = Arc::new(MemoryStorage::new());
        let manager = persisted_manager(&storage);
        let token = CancellationToken::new();
        token.cancel();
        let result = runner(&storage, &manager, settings(2))
            .with_cancellation(token)
            .run(vec![Box::new(VecSource::from_texts("web", "commoncrawl", texts("w", 3)))]);
        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(storage.list("docs/").unwrap().is_empty());
    }

    #[test]
    fn test_ignore_clears_incomplete_output() {
        let storage = Arc::new(MemoryStorage::new());
        let manager = persisted_manager(&storage);
        let _ = runner(&storage, &manager, settings(2)).run(vec![Box::new(FailingSource {
            texts: texts("flaky", 6),
            fail_after: 3,
        })]);
        assert_eq!(storage.list("docs/flaky/").unwrap().len(), 1);

        let settings = RunSettings {
            resume: ResumeMode::Ignore,
            ..settings(2)
        };
        let report = runner(&storage, &persisted_manager(&storage), settings)
            .run(vec![Box::new(FailingSource {
                texts: texts("flaky", 6),
                fail_after: usize::MAX,
            })])
            .unwrap();
        assert_eq!(report.sources[0].resumed_from, 0);
        assert_eq!(report.sources[0].written, 6);
        assert_eq!(report.sources[0].rejected, 0);
        assert_eq!(storage.list("docs/flaky/").unwrap().len(), 3);
    }

    #[test]
    fn test_ignore_after_corrupt_checkpoint_rewrites_everything() {
        let storage = Arc::new(MemoryStorage::new());
        let docs = texts("web", 3);
        runner(&storage, &persisted_manager(&storage), settings(2))
            .run(vec![Box::new(VecSource::from_texts("web", "commoncrawl", docs.clone()))])
            .unwrap();
        assert_eq!(storage.list("docs/web/").unwrap().len(), 2);
        storage.write("checkpoints/run-1.json", b"{ torn").unwrap();

        let settings = RunSettings {
            resume: ResumeMode::Ignore,
            ..settings(2)
        };
        let manager = persisted_manager(&storage);
        let report = runner(&storage, &manager, settings)
            .run(vec![Box::new(VecSource::from_texts("web", "commoncrawl", docs))])
            .unwrap();
        assert_eq!(report.sources[0].written, 3);
        assert_eq!(report.sources[0].rejected, 0);
        assert_eq!(doc_counts(&storage, "web"), vec![(0, 2), (1, 1)]);
        assert_eq!(manager.store_sizes().unwrap().0, 3);
    }

    #[test]
    fn test_beginning_keeps_committed_shards() {
        let storage = Arc::new(MemoryStorage::new());
        runner(&storage, &persisted_manager(&storage), settings(10))
            .run(vec![Box::new(VecSource::from_texts("web", "commoncrawl", texts("web", 2)))])
            .unwrap();
        assert_eq!(doc_counts(&storage, "web"), vec![(0, 2)]);

        let settings = RunSettings {
            resume: ResumeMode::Beginning,
            ..settings(10)
        };
        let report = runner(&storage, &persisted_manager(&storage), settings)
            .run(vec![Box::new(VecSource::from_texts("web", "commoncrawl", texts("web", 3)))])
            .unwrap();
        assert_eq!(report.sources[0].written, 1);
        assert_eq!(report.sources[0].rejected, 2);
        assert_eq!(doc_counts(&storage, "web"), vec![(0, 2), (1, 1)]);

        let record = CheckpointManager::read(storage.as_ref(), "run-1").unwrap().unwrap();
        assert_eq!(record.progress("web").shard_idx, 2);
    }

    #[test]
    fn test_checkpoint_resume_rolls_back_later_shards() {
        let storage = Arc::new(MemoryStorage::new());
        runner(&storage, &persisted_manager(&storage), settings(2))
            .run(vec![Box::new(VecSource::from_texts("web", "commoncrawl", texts("web", 6)))])
            .unwrap();
        assert_eq!(doc_counts(&storage, "web"), vec![(0, 2), (1, 2), (2, 2)]);

        let settings = RunSettings {
            resume: ResumeMode::Checkpoint,
            checkpoint_id: Some("web-2".into()),
            ..settings(2)
        };
        let manager = persisted_manager(&storage);
        let report = runner(&storage, &manager, settings)
            .run(vec![Box::new(VecSource::from_texts("web", "commoncrawl", texts("web", 7)))])
            .unwrap();
        assert_eq!(report.sources[0].resumed_from, 2);
        assert_eq!(report.sources[0].written, 5);
        assert_eq!(report.sources[0].rejected, 0);
        assert_eq!(doc_counts(&storage, "web"), vec![(0, 2), (1, 2), (2, 2), (3, 1)]);
        assert_eq!(manager.store_sizes().unwrap().0, 7);
    }

    /// Streaming connector whose resume lands `replay` records early.
    struct ReplayingSource {
        inner: VecSource,
        replay: u64,
    }

    impl SourceConnector for ReplayingSource {
        fn name(&self) -> &str {
            self.inner.name()
        }

        fn document_type(&self) -> &str {
            self.inner.document_type()
        }

        fn mode(&self) -> SourceMode {
            self.inner.mode()
        }

        fn open(&self, offset: u64) -> Result<SourceStream> {
            self.inner.open(offset.saturating_sub(self.replay))
        }
    }

    #[test]
    fn test_streaming_redelivery_is_absorbed_by_dedup() {
        let storage = Arc::new(MemoryStorage::new());
        let docs = texts("flaky", 6);
        let result = runner(&storage, &persisted_manager(&storage), settings(2)).run(vec![
            Box::new(FailingSource {
                texts: docs.clone(),
                fail_after: 3,
            }),
        ]);
        assert!(result.is_err());

        let source = ReplayingSource {
            inner: VecSource::from_texts("flaky", "commoncrawl", docs)
                .with_mode(SourceMode::Streaming),
            replay: 2,
        };
        let report = runner(&storage, &persisted_manager(&storage), settings(2))
            .run(vec![Box::new(source)])
            .unwrap();
        assert_eq!(report.sources[0].resumed_from, 2);
        assert_eq!(report.sources[0].processed, 6);
        assert_eq!(report.sources[0].written, 4);
        assert_eq!(report.sources[0].rejected, 2);
        assert_eq!(doc_counts(&storage, "flaky"), vec![(0, 2), (1, 2), (2, 2)]);

        let rejected = JsonlRejectionSink::new(storage.clone()).read_all("flaky").unwrap();
        assert!(rejected.iter().all(|r| r.reason_code == "DUPLICATE"));
    }

    #[test]
    fn test_shard_written_before_failed_commit_is_rewritten() {
        let storage = Arc::new(MemoryStorage::new());
        let docs = texts("orphan", 4);
        storage.fail_writes_under("checkpoints/");
        let result = runner(&storage, &persisted_manager(&storage), settings(2))
            .run(vec![Box::new(VecSource::from_texts("web", "commoncrawl", docs.clone()))]);
        assert!(result.is_err());
        assert_eq!(storage.list("docs/web/").unwrap().len(), 1);

        storage.clear_failures();
        let report = runner(&storage, &persisted_manager(&storage), settings(2))
            .run(vec![Box::new(VecSource::from_texts("web", "commoncrawl", docs))])
            .unwrap();
        assert_eq!(report.sources[0].written, 4);
        assert_eq!(report.sources[0].rejected, 0);
        assert_eq!(storage.list("docs/web/").unwrap().len(), 2);
    }
}
