//! Global fingerprint manager.
//!
//! Evaluates documents against the three global stores in a fixed order:
//!
//! 1. **SimHash**: any kept document within `simhash_max_hamming` bits
//! 2. **MinHash/LSH**: band candidates re-scored against their stored signature
//! 3. **Chunk hash**: exact chunk matches, which only ever link, never drop
//!
//! A full-document match from step 1 or 2 is settled by [`resolve`]. The whole
//! query, decide and commit sequence runs under one commit lock, so two
//! near-duplicates can never both win.

use super::config::FingerprintConfig;
use super::metrics::{DedupMetrics, DedupSummary};
use super::priority::{Resolution, resolve};
use super::types::{ChunkMatch, MatchedVia, Verdict};
use crate::fingerprints::{Fingerprinter, Fingerprints, jaccard_estimate};
use crate::models::{
    DocId, Document, FingerprintRecord, FingerprintValue, HashParams, PriorityConfig, PriorityKey,
};
use crate::storage::{
    ChunkHashStore, FingerprintNamespace, FingerprintStore, MinHashStore, SimHashStore,
    StorageBackend,
};
use crate::{Error, Result};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, instrument, warn};

/// A kept document matched as a whole.
#[derive(Debug, Clone)]
struct FullMatch {
    doc_id: DocId,
    source_name: String,
    document_type: String,
    matched_via: MatchedVia,
}

/// Audit view of everything stored for one query.
#[derive(Debug, Clone, Default)]
pub struct FingerprintMatches {
    /// SimHash records within the distance, with their distance.
    pub simhash: Vec<(u32, FingerprintRecord)>,
    /// MinHash candidates with their re-scored similarity.
    pub minhash: Vec<(f64, FingerprintRecord)>,
    /// Stored chunk records, by chunk index of the query text.
    pub chunks: Vec<(usize, FingerprintRecord)>,
}

/// Wraps the three fingerprint stores behind one evaluate/commit API.
///
/// One instance is shared by every source of a run and, through the storage
/// backend, by every run using the same root.
///
/// # Example
///
/// ```rust
/// use corpusgate::{Document, FingerprintConfig, GlobalFingerprintManager, PriorityConfig, Verdict};
///
/// let manager = GlobalFingerprintManager::in_memory(&FingerprintConfig::default())?;
/// let priority = PriorityConfig::new(vec!["books".into(), "commoncrawl".into()]);
///
/// let text = "It was the best of times, it was the worst of times, it was the age of wisdom.";
/// let book = Document::new("gutenberg", "books", text);
/// let scraped = Document::new("cc-2024", "commoncrawl", text);
///
/// assert_eq!(manager.evaluate(&book, &priority)?, Verdict::Unique);
/// assert!(!manager.evaluate(&scraped, &priority)?.is_kept());
/// # Ok::<(), corpusgate::Error>(())
/// ```
pub struct GlobalFingerprintManager {
    config: FingerprintConfig,
    fingerprinter: Fingerprinter,
    simhash: SimHashStore,
    minhash: MinHashStore,
    chunks: ChunkHashStore,
    metrics: DedupMetrics,
    commit_lock: Mutex<()>,
}

impl GlobalFingerprintManager {
    /// Creates a manager whose stores live only in memory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid.
    pub fn in_memory(config: &FingerprintConfig) -> Result<Self> {
        config.validate()?;
        let version = config.params.fingerprint_version.as_str();
        Ok(Self::with_stores(
            config,
            SimHashStore::in_memory(version),
            MinHashStore::in_memory(version),
            ChunkHashStore::in_memory(version),
        ))
    }

    /// Opens the persisted stores of `config.params.fingerprint_version`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an invalid configuration or mismatched
    /// version parameters, and [`Error::FingerprintStore`] if loading fails.
    pub fn open(storage: Arc<dyn StorageBackend>, config: &FingerprintConfig) -> Result<Self> {
        config.validate()?;
        let namespace =
            FingerprintNamespace::open(storage, config.root.clone(), config.params.clone())?;
        let manager = Self::with_stores(
            config,
            SimHashStore::open(&namespace)?,
            MinHashStore::open(&namespace)?,
            ChunkHashStore::open(&namespace)?,
        );
        tracing::info!(
            version = %config.params.fingerprint_version,
            simhash = manager.simhash.len()?,
            minhash = manager.minhash.len()?,
            chunk_hash = manager.chunks.len()?,
            "Opened fingerprint stores"
        );
        Ok(manager)
    }

    fn with_stores(
        config: &FingerprintConfig,
        simhash: SimHashStore,
        minhash: MinHashStore,
        chunks: ChunkHashStore,
    ) -> Self {
        Self {
            config: config.clone(),
            fingerprinter: Fingerprinter::new(config.params.clone()),
            simhash,
            minhash,
            chunks,
            metrics: DedupMetrics::new(),
            commit_lock: Mutex::new(()),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &FingerprintConfig {
        &self.config
    }

    /// Returns the frozen hash parameters.
    #[must_use]
    pub const fn params(&self) -> &HashParams {
        self.fingerprinter.params()
    }

    /// Computes the fingerprints of a document without touching the stores.
    #[must_use]
    pub fn fingerprint(&self, document: &Document) -> Fingerprints {
        self.fingerprinter.compute(document)
    }

    /// Evaluates a document and commits its fingerprints if it is kept.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FingerprintStore`] if a store cannot be read or
    /// updated. The caller must treat that as fatal for the source.
    pub fn evaluate(&self, document: &Document, priority: &PriorityConfig) -> Result<Verdict> {
        let fingerprints = self.fingerprinter.compute(document);
        self.evaluate_fingerprints(document, &fingerprints, priority)
    }

    /// Same as [`Self::evaluate`] with precomputed fingerprints.
    #[instrument(skip_all, fields(doc_id = %document.doc_id, source = %document.source_name))]
    pub fn evaluate_fingerprints(
        &self,
        document: &Document,
        fingerprints: &Fingerprints,
        priority: &PriorityConfig,
    ) -> Result<Verdict> {
        let start = Instant::now();
        let _guard = self
            .commit_lock
            .lock()
            .map_err(|_| Error::store("evaluate", "commit lock poisoned"))?;

        let full_matches = self.find_full_matches(fingerprints)?;
        let (verdict, matched_sources) = if full_matches.is_empty() {
            (self.chunk_verdict(document, fingerprints)?, Vec::new())
        } else {
            let sources = full_matches.iter().map(|m| m.source_name.clone()).collect();
            (self.resolve_full_match(document, &full_matches, priority)?, sources)
        };

        if verdict.is_kept() {
            self.commit(document, fingerprints)?;
        }

        let chunks_checked = if self.config.enable_chunk_hash && full_matches.is_empty() {
            fingerprints.chunks.len()
        } else {
            0
        };
        self.metrics
            .record(&document.source_name, &verdict, &matched_sources, chunks_checked);
        metrics::counter!(
            "corpusgate_dedup_verdicts_total",
            "verdict" => verdict.label(),
            "via" => verdict.via_label()
        )
        .increment(1);
        metrics::histogram!("corpusgate_dedup_duration_ms")
            .record(start.elapsed().as_secs_f64() * 1000.0);

        debug!(verdict = verdict.label(), via = verdict.via_label(), "Evaluated document");
        Ok(verdict)
    }

    /// Steps 1 and 2: full-document matches, one per kept document.
    fn find_full_matches(&self, fingerprints: &Fingerprints) -> Result<Vec<FullMatch>> {
        let mut seen = HashSet::new();
        let mut matches = Vec::new();

        if self.config.enable_simhash {
            for (distance, record) in self
                .simhash
                .query_within(fingerprints.simhash, self.config.simhash_max_hamming)?
            {
                if seen.insert(record.doc_id.clone()) {
                    matches.push(FullMatch {
                        doc_id: record.doc_id,
                        source_name: record.source_name,
                        document_type: record.document_type,
                        matched_via: MatchedVia::SimHash { distance },
                    });
                }
            }
            if !matches.is_empty() {
                return Ok(matches);
            }
        }

        if self.config.enable_minhash
            && let Some(signature) = fingerprints.minhash.as_deref()
        {
            let bands = band_keys(signature, self.params().bands);
            let mut scored = Vec::new();
            for candidate in self.minhash.candidates(&bands)? {
                let Some(stored) = self.minhash.signature(&candidate.doc_id)? else {
                    continue;
                };
                let similarity = jaccard_estimate(signature, &stored);
                if similarity >= self.config.minhash_threshold {
                    scored.push((similarity, candidate));
                }
            }
            scored.sort_by(|a, b| b.0.total_cmp(&a.0));
            for (similarity, record) in scored {
                if seen.insert(record.doc_id.clone()) {
                    matches.push(FullMatch {
                        doc_id: record.doc_id,
                        source_name: record.source_name,
                        document_type: record.document_type,
                        matched_via: MatchedVia::MinHash { similarity },
                    });
                }
            }
        }
        Ok(matches)
    }

    /// Step 4: settles a full-document match by priority.
    fn resolve_full_match(
        &self,
        document: &Document,
        matches: &[FullMatch],
        priority: &PriorityConfig,
    ) -> Result<Verdict> {
        let incoming = priority.key_for(&document.document_type, &document.source_name);
        // Earlier matches are closer, so the first one with the best key is reported.
        let mut best: Option<(PriorityKey, &FullMatch)> = None;
        for m in matches {
            let key = priority.key_for(&m.document_type, &m.source_name);
            if best.is_none_or(|(best_key, _)| key < best_key) {
                best = Some((key, m));
            }
        }
        let Some((existing, winner)) = best else {
            return Ok(Verdict::Unique);
        };

        match resolve(incoming, existing) {
            Resolution::KeepExisting => Ok(Verdict::DuplicateOf {
                doc_id: winner.doc_id.clone(),
                source_name: winner.source_name.clone(),
                matched_via: winner.matched_via,
            }),
            Resolution::KeepIncoming => {
                let doc_ids: Vec<DocId> = matches.iter().map(|m| m.doc_id.clone()).collect();
                for doc_id in &doc_ids {
                    self.evict(doc_id)?;
                }
                warn!(
                    evicted = doc_ids.len(),
                    via = winner.matched_via.as_str(),
                    "Incoming document supersedes kept documents; their shards are not rewritten"
                );
                metrics::counter!("corpusgate_dedup_evictions_total")
                    .increment(doc_ids.len() as u64);
                Ok(Verdict::Supersedes {
                    doc_ids,
                    matched_via: winner.matched_via,
                })
            },
        }
    }

    /// Step 3: chunk overlap for a document that had no full match.
    fn chunk_verdict(&self, document: &Document, fingerprints: &Fingerprints) -> Result<Verdict> {
        if !self.config.enable_chunk_hash {
            return Ok(Verdict::Unique);
        }
        let mut matched_chunks = Vec::new();
        for chunk in &fingerprints.chunks {
            let hit = self
                .chunks
                .query(&chunk.hash)?
                .into_iter()
                .find(|record| record.doc_id != document.doc_id);
            if let Some(record) = hit {
                matched_chunks.push(ChunkMatch {
                    chunk_index: chunk.chunk_index,
                    doc_id: record.doc_id,
                    chunk_id: record.chunk_id,
                });
            }
        }
        if matched_chunks.is_empty() {
            return Ok(Verdict::Unique);
        }

        let mut counts: BTreeMap<&DocId, usize> = BTreeMap::new();
        for m in &matched_chunks {
            *counts.entry(&m.doc_id).or_default() += 1;
        }
        let doc_id = counts
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(id, _)| (*id).clone())
            .unwrap_or_else(|| document.doc_id.clone());
        Ok(Verdict::PartialOverlap {
            doc_id,
            matched_chunks,
        })
    }

    /// Step 5: adds the kept document's records to every enabled store.
    fn commit(&self, document: &Document, fingerprints: &Fingerprints) -> Result<()> {
        let params = self.params();
        let record = |value| {
            FingerprintRecord::new(
                value,
                document.doc_id.clone(),
                document.source_name.clone(),
                document.document_type.clone(),
                params,
            )
        };

        if self.config.enable_simhash {
            self.simhash.add(record(FingerprintValue::SimHash {
                value: fingerprints.simhash,
            }))?;
        }
        if self.config.enable_minhash
            && let Some(signature) = fingerprints.minhash.as_ref()
        {
            for (band, band_hash) in band_keys(signature, params.bands) {
                self.minhash
                    .add(record(FingerprintValue::LshBand { band, band_hash }))?;
            }
            self.minhash
                .add_signature(&document.doc_id, signature.clone())?;
        }
        if self.config.enable_chunk_hash {
            for chunk in &fingerprints.chunks {
                self.chunks.add(
                    record(FingerprintValue::ChunkHash {
                        hash: chunk.hash.clone(),
                    })
                    .with_chunk_id(chunk.chunk_index),
                )?;
            }
        }
        Ok(())
    }

    fn evict(&self, doc_id: &DocId) -> Result<usize> {
        let removed = self.simhash.remove_doc(doc_id)?
            + self.minhash.remove_doc(doc_id)?
            + self.chunks.remove_doc(doc_id)?;
        debug!(%doc_id, removed, "Evicted fingerprints");
        Ok(removed)
    }

    /// Removes every record of a document from all three stores.
    ///
    /// Administrative path; the change is persisted on the next flush.
    pub fn remove_document(&self, doc_id: &DocId) -> Result<usize> {
        let _guard = self
            .commit_lock
            .lock()
            .map_err(|_| Error::store("remove_document", "commit lock poisoned"))?;
        self.evict(doc_id)
    }

    /// Looks up everything the stores hold for `text`, without committing.
    pub fn query_text(&self, text: &str) -> Result<FingerprintMatches> {
        let probe = Document::new("query", "", text);
        let fingerprints = self.fingerprinter.compute(&probe);
        let mut matches = FingerprintMatches {
            simhash: self
                .simhash
                .query_within(fingerprints.simhash, self.config.simhash_max_hamming)?,
            ..FingerprintMatches::default()
        };
        if let Some(signature) = fingerprints.minhash.as_deref() {
            for candidate in self.minhash.candidates(&band_keys(signature, self.params().bands))? {
                if let Some(stored) = self.minhash.signature(&candidate.doc_id)? {
                    matches
                        .minhash
                        .push((jaccard_estimate(signature, &stored), candidate));
                }
            }
            matches.minhash.sort_by(|a, b| b.0.total_cmp(&a.0));
        }
        for chunk in &fingerprints.chunks {
            for record in self.chunks.query(&chunk.hash)? {
                matches.chunks.push((chunk.chunk_index, record));
            }
        }
        Ok(matches)
    }

    /// Records of a document in every store, for auditing.
    pub fn records_for_doc(&self, doc_id: &DocId) -> Result<Vec<FingerprintRecord>> {
        let mut records = self.simhash.records_for_doc(doc_id)?;
        records.extend(self.minhash.records_for_doc(doc_id)?);
        records.extend(self.chunks.records_for_doc(doc_id)?);
        Ok(records)
    }

    /// Persists every pending change.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FingerprintStore`] on the first failed write.
    #[instrument(skip(self))]
    pub fn flush(&self) -> Result<()> {
        let _guard = self
            .commit_lock
            .lock()
            .map_err(|_| Error::store("flush", "commit lock poisoned"))?;
        self.simhash.flush()?;
        self.minhash.flush()?;
        self.chunks.flush()
    }

    /// Discards every change since the last flush.
    pub fn rollback(&self) -> Result<()> {
        let _guard = self
            .commit_lock
            .lock()
            .map_err(|_| Error::store("rollback", "commit lock poisoned"))?;
        self.simhash.rollback()?;
        self.minhash.rollback()?;
        self.chunks.rollback()
    }

    /// Record counts per store: `(simhash, minhash, chunk_hash)`.
    pub fn store_sizes(&self) -> Result<(usize, usize, usize)> {
        Ok((self.simhash.len()?, self.minhash.len()?, self.chunks.len()?))
    }

    /// Returns the metrics accumulator.
    #[must_use]
    pub const fn metrics(&self) -> &DedupMetrics {
        &self.metrics
    }

    /// Returns a snapshot of the dedup metrics.
    #[must_use]
    pub fn summary(&self) -> DedupSummary {
        self.metrics.summary()
    }
}

fn band_keys(signature: &[u64], bands: usize) -> Vec<(u32, u64)> {
    crate::fingerprints::band_hashes(signature, bands)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    const TEXT: &str = "The committee reviewed the annual budget and approved new funding \
        for the public library, the community garden and the river cleanup project.";

    fn priority() -> PriorityConfig {
        PriorityConfig::new(vec!["books".into(), "wiki".into(), "commoncrawl".into()])
    }

    fn manager() -> GlobalFingerprintManager {
        GlobalFingerprintManager::in_memory(&FingerprintConfig::default()).unwrap()
    }

    #[test]
    fn test_exact_copy_from_lower_priority_is_dropped() {
        let m = manager();
        let book = Document::new("gutenberg", "books", TEXT);
        let web = Document::new("cc", "commoncrawl", TEXT);
        assert_eq!(m.evaluate(&book, &priority()).unwrap(), Verdict::Unique);
        let verdict = m.evaluate(&web, &priority()).unwrap();
        assert!(matches!(
            verdict,
            Verdict::DuplicateOf {
                ref doc_id,
                matched_via: MatchedVia::SimHash { distance: 0 },
                ..
            } if *doc_id == book.doc_id
        ));
        assert!(m.records_for_doc(&web.doc_id).unwrap().is_empty());
    }

    #[test]
    fn test_higher_priority_arrival_supersedes() {
        let m = manager();
        let web = Document::new("cc", "commoncrawl", TEXT);
        let book = Document::new("gutenberg", "books", TEXT);
        m.evaluate(&web, &priority()).unwrap();
        let verdict = m.evaluate(&book, &priority()).unwrap();
        assert_eq!(
            verdict,
            Verdict::Supersedes {
                doc_ids: vec![web.doc_id.clone()],
                matched_via: MatchedVia::SimHash { distance: 0 },
            }
        );
        assert!(m.records_for_doc(&web.doc_id).unwrap().is_empty());
        assert!(!m.records_for_doc(&book.doc_id).unwrap().is_empty());
        assert_eq!(m.summary().supersessions, 1);
    }

    #[test]
    fn test_equal_priority_keeps_existing() {
        let m = manager();
        let first = Document::new("wiki-en", "wiki", TEXT);
        let second = Document::new("wiki-mirror", "wiki", TEXT);
        m.evaluate(&first, &priority()).unwrap();
        assert!(!m.evaluate(&second, &priority()).unwrap().is_kept());
    }

    #[test]
    fn test_minhash_path_when_simhash_disabled() {
        let config = FingerprintConfig::default().with_stores(false, true, true);
        let m = GlobalFingerprintManager::in_memory(&config).unwrap();
        let a = Document::new("gutenberg", "books", TEXT);
        let b = Document::new("cc", "commoncrawl", TEXT);
        m.evaluate(&a, &priority()).unwrap();
        let verdict = m.evaluate(&b, &priority()).unwrap();
        assert!(matches!(
            verdict,
            Verdict::DuplicateOf { matched_via: MatchedVia::MinHash { similarity }, .. }
                if (similarity - 1.0).abs() < f64::EPSILON
        ));
    }

    #[test]
    fn test_all_stores_disabled_is_always_unique() {
        let config = FingerprintConfig::default().with_stores(false, false, false);
        let m = GlobalFingerprintManager::in_memory(&config).unwrap();
        let a = Document::new("a", "books", TEXT);
        m.evaluate(&a, &priority()).unwrap();
        assert_eq!(m.evaluate(&a, &priority()).unwrap(), Verdict::Unique);
        assert_eq!(m.store_sizes().unwrap(), (0, 0, 0));
    }

    #[test]
    fn test_rollback_forgets_unflushed_documents() {
        let m = manager();
        let a = Document::new("gutenberg", "books", TEXT);
        m.evaluate(&a, &priority()).unwrap();
        m.rollback().unwrap();
        assert_eq!(m.store_sizes().unwrap(), (0, 0, 0));
        assert_eq!(m.evaluate(&a, &priority()).unwrap(), Verdict::Unique);
    }

    #[test]
    fn test_flush_failure_is_a_store_error() {
        let storage = Arc::new(MemoryStorage::new());
        let m = GlobalFingerprintManager::open(storage.clone(), &FingerprintConfig::default())
            .unwrap();
        storage.fail_writes_under("fingerprints/");
        m.evaluate(&Document::new("gutenberg", "books", TEXT), &priority())
            .unwrap();
        assert!(matches!(m.flush(), Err(Error::FingerprintStore { .. })));
    }

    #[test]
    fn test_persisted_stores_survive_reopen() {
        let storage = Arc::new(MemoryStorage::new());
        let config = FingerprintConfig::default();
        let book = Document::new("gutenberg", "books", TEXT);
        {
            let m = GlobalFingerprintManager::open(storage.clone(), &config).unwrap();
            m.evaluate(&book, &priority()).unwrap();
            m.flush().unwrap();
        }
        let m = GlobalFingerprintManager::open(storage, &config).unwrap();
        let again = Document::new("cc", "commoncrawl", TEXT);
        assert!(!m.evaluate(&again, &priority()).unwrap().is_kept());
    }

    #[test]
    fn test_query_text_reports_matches() {
        let m = manager();
        m.evaluate(&Document::new("gutenberg", "books", TEXT), &priority())
            .unwrap();
        let found = m.query_text(TEXT).unwrap();
        assert_eq!(found.simhash.len(), 1);
        assert_eq!(found.minhash.len(), 1);
        assert!(!found.chunks.is_empty());
    }
}
