//! Global fingerprint deduplication.
//!
//! The [`GlobalFingerprintManager`] is the only component that reads or
//! mutates the fingerprint stores during a run. Priority conflicts are settled
//! by the pure [`resolve`] function so the rule can be tested without stores.
//!
//! # Metrics
//!
//! | Metric | Labels | Description |
//! |--------|--------|-------------|
//! | `corpusgate_dedup_verdicts_total` | `verdict`, `via` | Verdicts by outcome and matching fingerprint |
//! | `corpusgate_dedup_evictions_total` | | Documents evicted by a higher-priority arrival |
//! | `corpusgate_dedup_duration_ms` | | Time spent evaluating one document |

mod config;
mod manager;
mod metrics;
mod priority;
mod types;

pub use config::FingerprintConfig;
pub use manager::{FingerprintMatches, GlobalFingerprintManager};
pub use metrics::{DedupMetrics, DedupSummary, SourceDominance};
pub use priority::{Resolution, resolve};
pub use types::{ChunkMatch, MatchedVia, Verdict};
