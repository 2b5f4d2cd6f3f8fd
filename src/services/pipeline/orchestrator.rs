//! Stage orchestration.
//!
//! A batch moves through three phases:
//!
//! | Phase | Classes | Execution |
//! |-------|---------|-----------|
//! | pre-dedup | normalize, pii | parallel across documents |
//! | dedup | dedup | sequential, in document order |
//! | post-dedup | quality, metadata | parallel across documents |
//!
//! Parallel phases keep document order, so the dedup phase always sees the
//! batch in source order.

use super::analytics::StageAnalytics;
use super::stage::{Decision, RejectedDocument, Rejection, Stage, StageClass};
use crate::models::{Document, DocumentStatus, PipelineState};
use crate::{Error, Result};
use rayon::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Documents of one batch after every stage ran.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Documents that passed every stage, in input order, frozen.
    pub accepted: Vec<Document>,
    /// Documents rejected by some stage, in input order.
    pub rejected: Vec<RejectedDocument>,
}

enum DocOutcome {
    Accepted(Document),
    Rejected(RejectedDocument),
}

/// Checks that stage names are unique and classes never go backwards.
///
/// # Errors
///
/// Returns [`Error::Config`] naming the offending stage.
///
/// # Example
///
/// ```rust
/// use corpusgate::StageClass;
/// use corpusgate::services::pipeline::validate_stage_order;
///
/// let ok = [("clean", StageClass::Normalize), ("dedup", StageClass::Dedup), ("quality", StageClass::Quality)];
/// assert!(validate_stage_order(&ok).is_ok());
///
/// let bad = [("quality", StageClass::Quality), ("dedup", StageClass::Dedup)];
/// assert!(validate_stage_order(&bad).is_err());
/// ```
pub fn validate_stage_order(stages: &[(&str, StageClass)]) -> Result<()> {
    let mut seen = HashSet::new();
    let mut previous: Option<(&str, StageClass)> = None;
    for &(name, class) in stages {
        if name.trim().is_empty() {
            return Err(Error::Config("stage with a blank name".to_string()));
        }
        if !seen.insert(name) {
            return Err(Error::Config(format!("stage '{name}' is listed more than once")));
        }
        if let Some((prev_name, prev_class)) = previous
            && class < prev_class
        {
            return Err(Error::Config(format!(
                "stage '{name}' ({class}) must not run after '{prev_name}' ({prev_class})"
            )));
        }
        previous = Some((name, class));
    }
    Ok(())
}

/// Runs validated stages over batches of documents.
pub struct PipelineOrchestrator {
    pre_dedup: Vec<Arc<dyn Stage>>,
    dedup: Vec<Arc<dyn Stage>>,
    post_dedup: Vec<Arc<dyn Stage>>,
    analytics: StageAnalytics,
}

impl PipelineOrchestrator {
    /// Validates the stage order and builds the orchestrator.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the order is invalid.
    pub fn new(stages: Vec<Arc<dyn Stage>>) -> Result<Self> {
        let declared: Vec<(&str, StageClass)> =
            stages.iter().map(|s| (s.name(), s.class())).collect();
        validate_stage_order(&declared)?;

        let mut orchestrator = Self {
            pre_dedup: Vec::new(),
            dedup: Vec::new(),
            post_dedup: Vec::new(),
            analytics: StageAnalytics::default(),
        };
        for stage in stages {
            match stage.class() {
                StageClass::Normalize | StageClass::Pii => orchestrator.pre_dedup.push(stage),
                StageClass::Dedup => orchestrator.dedup.push(stage),
                StageClass::Quality | StageClass::Metadata => orchestrator.post_dedup.push(stage),
            }
        }
        Ok(orchestrator)
    }

    /// Stage names in execution order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<String> {
        self.pre_dedup
            .iter()
            .chain(&self.dedup)
            .chain(&self.post_dedup)
            .map(|s| s.name().to_string())
            .collect()
    }

    /// Returns true if any stage deduplicates.
    #[must_use]
    pub fn has_dedup(&self) -> bool {
        !self.dedup.is_empty()
    }

    /// Per-stage counters.
    #[must_use]
    pub const fn analytics(&self) -> &StageAnalytics {
        &self.analytics
    }

    /// Runs every stage over a batch.
    ///
    /// # Errors
    ///
    /// Returns the first fatal stage error. Non-fatal stage errors reject the
    /// document with `RUNTIME_ERROR`.
    pub fn process_batch(&self, documents: Vec<Document>) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();

        let pre: Vec<Result<DocOutcome>> = documents
            .into_par_iter()
            .map(|doc| self.run_stages(doc, &self.pre_dedup))
            .collect();
        let survivors = split(pre, &mut outcome)?;

        let mut deduped = Vec::with_capacity(survivors.len());
        for doc in survivors {
            deduped.push(self.run_stages(doc, &self.dedup));
        }
        let survivors = split(deduped, &mut outcome)?;

        let post: Vec<Result<DocOutcome>> = survivors
            .into_par_iter()
            .map(|doc| self.run_stages(doc, &self.post_dedup))
            .collect();
        let finished = split(post, &mut outcome)?;

        outcome.accepted = finished
            .into_iter()
            .map(|mut doc| {
                doc.state = PipelineState::Frozen;
                doc.status = DocumentStatus::Accepted;
                doc
            })
            .collect();
        debug!(
            accepted = outcome.accepted.len(),
            rejected = outcome.rejected.len(),
            "Processed batch"
        );
        Ok(outcome)
    }

    fn run_stages(&self, mut doc: Document, stages: &[Arc<dyn Stage>]) -> Result<DocOutcome> {
        for stage in stages {
            let doc_id = doc.doc_id.clone();
            let source = doc.source_name.clone();
            let source_file = doc.source_file.clone();
            let rejection = match stage.apply(doc) {
                Ok(Decision::Accept(mut next)) => {
                    let target = stage.class().target_state();
                    if target.ordinal() > next.state.ordinal() {
                        next.state = target;
                    }
                    self.analytics.accepted(stage.name());
                    doc = next;
                    continue;
                },
                Ok(Decision::Reject(rejection)) => rejection,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(
                        stage = stage.name(),
                        %doc_id,
                        error = %e,
                        "Stage failed; rejecting document"
                    );
                    Rejection::new("RUNTIME_ERROR", e.to_string())
                },
            };
            self.analytics.rejected(stage.name(), &rejection.reason_code);
            debug!(
                stage = stage.name(),
                %doc_id,
                reason = %rejection.reason_code,
                "Rejected document"
            );
            return Ok(DocOutcome::Rejected(RejectedDocument::new(
                doc_id,
                source,
                source_file,
                stage.name(),
                rejection,
            )));
        }
        Ok(DocOutcome::Accepted(doc))
    }
}

fn split(results: Vec<Result<DocOutcome>>, outcome: &mut BatchOutcome) -> Result<Vec<Document>> {
    let mut accepted = Vec::with_capacity(results.len());
    for result in results {
        match result? {
            DocOutcome::Accepted(doc) => accepted.push(doc),
            DocOutcome::Rejected(rejected) => outcome.rejected.push(rejected),
        }
    }
    Ok(accepted)
}
