//! Per-stage counters.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Mutex;
use tracing::info;

/// Counters of one stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StageCounts {
    /// Documents that entered the stage.
    #[serde(rename = "in")]
    pub entered: u64,
    /// Documents accepted.
    pub accepted: u64,
    /// Documents rejected.
    pub rejected: u64,
    /// Rejections by reason code.
    pub reasons: BTreeMap<String, u64>,
}

/// Thread-safe stage counters, reset per source.
#[derive(Debug, Default)]
pub struct StageAnalytics {
    stages: Mutex<BTreeMap<String, StageCounts>>,
}

impl StageAnalytics {
    pub(crate) fn accepted(&self, stage: &str) {
        if let Ok(mut stages) = self.stages.lock() {
            let counts = stages.entry(stage.to_string()).or_default();
            counts.entered += 1;
            counts.accepted += 1;
        }
    }

    pub(crate) fn rejected(&self, stage: &str, reason_code: &str) {
        if let Ok(mut stages) = self.stages.lock() {
            let counts = stages.entry(stage.to_string()).or_default();
            counts.entered += 1;
            counts.rejected += 1;
            *counts.reasons.entry(reason_code.to_string()).or_default() += 1;
        }
        metrics::counter!("corpusgate_stage_rejections_total", "stage" => stage.to_string())
            .increment(1);
    }

    /// Returns a copy of the counters.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, StageCounts> {
        self.stages.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Logs the counters for `source`.
    pub fn log(&self, source: &str) {
        for (stage, counts) in self.snapshot() {
            info!(
                source,
                stage = %stage,
                entered = counts.entered,
                accepted = counts.accepted,
                rejected = counts.rejected,
                reasons = ?counts.reasons,
                "Stage analytics"
            );
        }
    }

    /// Clears the counters.
    pub fn reset(&self) {
        if let Ok(mut stages) = self.stages.lock() {
            stages.clear();
        }
    }
}
