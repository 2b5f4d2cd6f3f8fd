//! Business logic services.
//!
//! Services orchestrate sources, stages, the fingerprint stores and the
//! checkpoint store, and provide the high-level run operation.

pub mod checkpoint;
pub mod dedup;
pub mod pipeline;
pub mod runner;
pub mod scheduler;

pub use checkpoint::CheckpointManager;
pub use dedup::GlobalFingerprintManager;
pub use pipeline::PipelineOrchestrator;
pub use runner::{PipelineRunner, RunReport};
pub use scheduler::SourceScheduler;
