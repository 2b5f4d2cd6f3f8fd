//! In-process dedup metrics summary.

use super::types::Verdict;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Mutex;

/// How many top duplicated sources a summary lists.
const TOP_SOURCES: usize = 5;

/// Kept/dropped counts of one source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceDominance {
    /// Documents kept (unique, partial overlap or superseding).
    pub kept: u64,
    /// Documents dropped as duplicates.
    pub dropped: u64,
    /// Previously kept documents this source evicted.
    pub superseded_others: u64,
    /// Sources whose documents caused this source's drops.
    pub dropped_by: BTreeMap<String, u64>,
}

/// Point-in-time summary of dedup outcomes.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DedupSummary {
    /// Documents evaluated.
    pub evaluated: u64,
    /// `Unique` verdicts.
    pub unique: u64,
    /// `DuplicateOf` verdicts.
    pub duplicates: u64,
    /// `PartialOverlap` verdicts.
    pub partial_overlaps: u64,
    /// `Supersedes` verdicts.
    pub supersessions: u64,
    /// Full-document matches against another source.
    pub cross_source_collisions: u64,
    /// Chunks looked up.
    pub chunks_checked: u64,
    /// Chunks already present.
    pub chunks_reused: u64,
    /// `duplicates / evaluated`.
    pub duplicate_rate: f64,
    /// `cross_source_collisions / evaluated`.
    pub cross_source_collision_rate: f64,
    /// `chunks_reused / chunks_checked`.
    pub chunk_reuse_rate: f64,
    /// Per-source outcomes.
    pub per_source: BTreeMap<String, SourceDominance>,
    /// Sources with the most dropped documents, descending.
    pub top_duplicated_sources: Vec<(String, u64)>,
}

#[derive(Debug, Default)]
struct Counters {
    evaluated: u64,
    unique: u64,
    duplicates: u64,
    partial_overlaps: u64,
    supersessions: u64,
    cross_source_collisions: u64,
    chunks_checked: u64,
    chunks_reused: u64,
    per_source: BTreeMap<String, SourceDominance>,
}

/// Thread-safe accumulator behind [`DedupSummary`].
#[derive(Debug, Default)]
pub struct DedupMetrics {
    counters: Mutex<Counters>,
}

impl DedupMetrics {
    /// Creates empty metrics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one verdict for a document from `source`.
    ///
    /// `matched_sources` are the sources of the matched documents; the
    /// collision is cross-source when any of them differs from `source`.
    pub fn record(
        &self,
        source: &str,
        verdict: &Verdict,
        matched_sources: &[String],
        chunks_checked: usize,
    ) {
        let Ok(mut guard) = self.counters.lock() else {
            return;
        };
        let c = &mut *guard;
        c.evaluated += 1;
        c.chunks_checked += chunks_checked as u64;
        let cross_source = matched_sources.iter().any(|s| s != source);
        let entry = c.per_source.entry(source.to_string()).or_default();
        match verdict {
            Verdict::Unique => {
                entry.kept += 1;
                c.unique += 1;
            },
            Verdict::DuplicateOf { source_name, .. } => {
                entry.dropped += 1;
                *entry.dropped_by.entry(source_name.clone()).or_default() += 1;
                c.duplicates += 1;
            },
            Verdict::PartialOverlap { matched_chunks, .. } => {
                entry.kept += 1;
                c.partial_overlaps += 1;
                c.chunks_reused += matched_chunks.len() as u64;
            },
            Verdict::Supersedes { doc_ids, .. } => {
                entry.kept += 1;
                entry.superseded_others += doc_ids.len() as u64;
                c.supersessions += 1;
            },
        }
        if cross_source
            && matches!(verdict, Verdict::DuplicateOf { .. } | Verdict::Supersedes { .. })
        {
            c.cross_source_collisions += 1;
        }
    }

    /// Returns the current summary.
    #[must_use]
    pub fn summary(&self) -> DedupSummary {
        let Ok(c) = self.counters.lock() else {
            return DedupSummary::default();
        };
        let mut top: Vec<(String, u64)> = c
            .per_source
            .iter()
            .filter(|(_, d)| d.dropped > 0)
            .map(|(name, d)| (name.clone(), d.dropped))
            .collect();
        top.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        top.truncate(TOP_SOURCES);

        DedupSummary {
            evaluated: c.evaluated,
            unique: c.unique,
            duplicates: c.duplicates,
            partial_overlaps: c.partial_overlaps,
            supersessions: c.supersessions,
            cross_source_collisions: c.cross_source_collisions,
            chunks_checked: c.chunks_checked,
            chunks_reused: c.chunks_reused,
            duplicate_rate: ratio(c.duplicates, c.evaluated),
            cross_source_collision_rate: ratio(c.cross_source_collisions, c.evaluated),
            chunk_reuse_rate: ratio(c.chunks_reused, c.chunks_checked),
            per_source: c.per_source.clone(),
            top_duplicated_sources: top,
        }
    }

    /// Clears every counter.
    pub fn reset(&self) {
        if let Ok(mut c) = self.counters.lock() {
            *c = Counters::default();
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn ratio(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

impl fmt::Display for DedupSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Dedup summary")?;
        writeln!(f, "  evaluated:              {}", self.evaluated)?;
        writeln!(
            f,
            "  unique / dup / partial: {} / {} / {}",
            self.unique, self.duplicates, self.partial_overlaps
        )?;
        writeln!(f, "  supersessions:          {}", self.supersessions)?;
        writeln!(f, "  duplicate rate:         {:.2}%", self.duplicate_rate * 100.0)?;
        writeln!(
            f,
            "  cross-source rate:      {:.2}%",
            self.cross_source_collision_rate * 100.0
        )?;
        writeln!(f, "  chunk reuse rate:       {:.2}%", self.chunk_reuse_rate * 100.0)?;
        for (source, d) in &self.per_source {
            writeln!(f, "  {source}: kept {} dropped {}", d.kept, d.dropped)?;
        }
        if !self.top_duplicated_sources.is_empty() {
            let top: Vec<String> = self
                .top_duplicated_sources
                .iter()
                .map(|(name, n)| format!("{name} ({n})"))
                .collect();
            writeln!(f, "  most duplicated:        {}", top.join(", "))?;
        }
        Ok(())
    }
}
