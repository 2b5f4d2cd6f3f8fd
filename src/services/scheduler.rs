//! Priority-ordered source scheduling.
//!
//! Sources are processed one at a time in priority order whenever dedup is
//! enabled. A lower-priority source evaluated before a higher-priority one has
//! been committed could keep a copy the higher-priority source would have won.

use crate::models::{CheckpointRecord, PriorityConfig, PriorityKey};
use crate::sources::SourceConnector;
use tracing::{debug, info};

/// Anything the scheduler can order.
pub trait Schedulable {
    /// Configured source name.
    fn source_name(&self) -> &str;

    /// Document family of the source.
    fn source_document_type(&self) -> &str;
}

impl Schedulable for Box<dyn SourceConnector> {
    fn source_name(&self) -> &str {
        self.name()
    }

    fn source_document_type(&self) -> &str {
        self.document_type()
    }
}

impl Schedulable for crate::config::SourceSpec {
    fn source_name(&self) -> &str {
        &self.name
    }

    fn source_document_type(&self) -> &str {
        &self.document_type
    }
}

/// One planned source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleEntry {
    /// Source name.
    pub source_name: String,
    /// Resolved priority.
    pub key: PriorityKey,
    /// Position in the configuration.
    pub config_index: usize,
}

/// Orders sources by `(type rank, source rank, config index)`.
#[derive(Debug, Clone)]
pub struct SourceScheduler {
    priority: PriorityConfig,
}

impl SourceScheduler {
    /// Creates a scheduler.
    #[must_use]
    pub const fn new(priority: PriorityConfig) -> Self {
        Self { priority }
    }

    /// Returns the priority configuration.
    #[must_use]
    pub const fn priority(&self) -> &PriorityConfig {
        &self.priority
    }

    /// Sorts sources highest priority first. The sort is stable on config order.
    ///
    /// # Example
    ///
    /// ```rust
    /// use corpusgate::{PriorityConfig, SourceScheduler};
    /// use corpusgate::sources::{SourceConnector, VecSource};
    ///
    /// let priority = PriorityConfig::new(vec!["books".into(), "commoncrawl".into()]);
    /// let sources: Vec<Box<dyn SourceConnector>> = vec![
    ///     Box::new(VecSource::from_texts("cc", "commoncrawl", ["x"])),
    ///     Box::new(VecSource::from_texts("forum", "forums", ["y"])),
    ///     Box::new(VecSource::from_texts("gutenberg", "books", ["z"])),
    /// ];
    /// let ordered = SourceScheduler::new(priority).order(sources);
    /// let names: Vec<&str> = ordered.iter().map(|s| s.name()).collect();
    /// assert_eq!(names, ["gutenberg", "cc", "forum"]);
    /// ```
    #[must_use]
    pub fn order<T: Schedulable>(&self, sources: Vec<T>) -> Vec<T> {
        let mut keyed: Vec<(PriorityKey, usize, T)> = sources
            .into_iter()
            .enumerate()
            .map(|(index, source)| (self.key(&source), index, source))
            .collect();
        keyed.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
        keyed.into_iter().map(|(_, _, source)| source).collect()
    }

    /// Describes the order without consuming the sources.
    #[must_use]
    pub fn plan<T: Schedulable>(&self, sources: &[T]) -> Vec<ScheduleEntry> {
        let mut plan: Vec<ScheduleEntry> = sources
            .iter()
            .enumerate()
            .map(|(config_index, source)| ScheduleEntry {
                source_name: source.source_name().to_string(),
                key: self.key(source),
                config_index,
            })
            .collect();
        plan.sort_by(|a, b| a.key.cmp(&b.key).then(a.config_index.cmp(&b.config_index)));
        for (position, entry) in plan.iter().enumerate() {
            debug!(
                position,
                source = %entry.source_name,
                type_rank = entry.key.type_rank,
                source_rank = entry.key.source_rank,
                "Scheduled source"
            );
        }
        plan
    }

    /// Orders sources and drops the ones the checkpoint marks complete.
    #[must_use]
    pub fn pending<T: Schedulable>(
        &self,
        sources: Vec<T>,
        checkpoint: &CheckpointRecord,
    ) -> Vec<T> {
        self.order(sources)
            .into_iter()
            .filter(|source| {
                let done = checkpoint.is_complete(source.source_name());
                if done {
                    info!(source = source.source_name(), "Skipping completed source");
                }
                !done
            })
            .collect()
    }

    fn key<T: Schedulable>(&self, source: &T) -> PriorityKey {
        self.priority
            .key_for(source.source_document_type(), source.source_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceProgress;
    use crate::sources::VecSource;

    fn sources(specs: &[(&str, &str)]) -> Vec<Box<dyn SourceConnector>> {
        specs
            .iter()
            .map(|(name, doc_type)| {
                Box::new(VecSource::from_texts(*name, *doc_type, Vec::<String>::new()))
                    as Box<dyn SourceConnector>
            })
            .collect()
    }

    fn names(sources: &[Box<dyn SourceConnector>]) -> Vec<String> {
        sources.iter().map(|s| s.name().to_string()).collect()
    }

    #[test]
    fn test_source_rank_breaks_type_ties() {
        let priority = PriorityConfig::new(vec!["books".into(), "wiki".into()])
            .with_source_priority(vec!["openlib".into(), "gutenberg".into()]);
        let ordered = SourceScheduler::new(priority).order(sources(&[
            ("wiki-en", "wiki"),
            ("gutenberg", "books"),
            ("unranked-books", "books"),
            ("openlib", "books"),
        ]));
        assert_eq!(names(&ordered), ["openlib", "gutenberg", "unranked-books", "wiki-en"]);
    }

    #[test]
    fn test_mapping_used_when_type_blank() {
        let priority = PriorityConfig::new(vec!["books".into(), "wiki".into()])
            .with_source_type("mapped", "books");
        let ordered =
            SourceScheduler::new(priority).order(sources(&[("w", "wiki"), ("mapped", "")]));
        assert_eq!(names(&ordered), ["mapped", "w"]);
    }

    #[test]
    fn test_unknown_sources_keep_config_order_at_the_end() {
        let priority = PriorityConfig::new(vec!["books".into()]);
        let scheduler = SourceScheduler::new(priority);
        let input = sources(&[("x", "a"), ("y", "b"), ("z", "books")]);
        let plan = scheduler.plan(&input);
        assert_eq!(plan[0].source_name, "z");
        assert_eq!(plan[1].config_index, 0);
        assert_eq!(names(&scheduler.order(input)), ["z", "x", "y"]);
    }

    #[test]
    fn test_pending_skips_completed() {
        let scheduler = SourceScheduler::new(PriorityConfig::new(vec!["books".into()]));
        let mut checkpoint = CheckpointRecord::empty("run");
        checkpoint.sources.insert(
            "a".into(),
            SourceProgress {
                completed: true,
                ..SourceProgress::default()
            },
        );
        let pending = scheduler.pending(sources(&[("a", "books"), ("b", "books")]), &checkpoint);
        assert_eq!(names(&pending), ["b"]);
    }
}
