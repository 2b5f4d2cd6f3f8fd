//! Stage lookup by configured name.

use super::builtin::{GlobalDedupStage, UnicodeNormalizeStage};
use super::stage::Stage;
use crate::models::PriorityConfig;
use crate::services::dedup::GlobalFingerprintManager;
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Maps stage names from the configuration to stage instances.
#[derive(Default, Clone)]
pub struct StageRegistry {
    stages: BTreeMap<String, Arc<dyn Stage>>,
}

impl StageRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding `unicode_normalize` and `global_dedup`.
    #[must_use]
    pub fn with_builtins(manager: Arc<GlobalFingerprintManager>, priority: PriorityConfig) -> Self {
        Self::new()
            .with(Arc::new(UnicodeNormalizeStage))
            .with(Arc::new(GlobalDedupStage::new(manager, priority)))
    }

    /// Adds or replaces a stage under its own name.
    #[must_use]
    pub fn with(mut self, stage: Arc<dyn Stage>) -> Self {
        self.register(stage);
        self
    }

    /// Adds or replaces a stage under its own name.
    pub fn register(&mut self, stage: Arc<dyn Stage>) {
        self.stages.insert(stage.name().to_string(), stage);
    }

    /// Registered names.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.stages.keys().map(String::as_str).collect()
    }

    /// Resolves a list of names into stages, in the given order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an unknown name.
    pub fn build(&self, names: &[String]) -> Result<Vec<Arc<dyn Stage>>> {
        names
            .iter()
            .map(|name| {
                self.stages.get(name.trim()).cloned().ok_or_else(|| {
                    Error::Config(format!(
                        "unknown stage '{name}' (registered: {})",
                        self.names().join(", ")
                    ))
                })
            })
            .collect()
    }
}
