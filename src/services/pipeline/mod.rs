//! Document pipeline: stage interface, registry and orchestrator.

mod analytics;
mod builtin;
mod orchestrator;
mod registry;
mod stage;

pub use analytics::{StageAnalytics, StageCounts};
pub use builtin::{GLOBAL_DEDUP, GlobalDedupStage, UNICODE_NORMALIZE, UnicodeNormalizeStage};
pub use orchestrator::{BatchOutcome, PipelineOrchestrator, validate_stage_order};
pub use registry::StageRegistry;
pub use stage::{Decision, RejectedDocument, Rejection, Stage, StageClass};
