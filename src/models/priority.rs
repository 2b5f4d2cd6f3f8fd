//! Source and document-family priority.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Rank given to any source or type absent from the configuration.
///
/// Unranked content is processed last and always loses ties.
pub const LOWEST_RANK: usize = usize::MAX;

/// Priority configuration shared by the scheduler and the fingerprint manager.
///
/// Lower index means higher priority.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityConfig {
    /// Document families, highest priority first.
    #[serde(default)]
    pub document_type_priority: Vec<String>,
    /// Source name to document family.
    #[serde(default)]
    pub source_to_document_type: BTreeMap<String, String>,
    /// Optional source order, used only to break ties within a family.
    #[serde(default)]
    pub source_priority: Vec<String>,
}

/// Comparable priority of a document or source. Smaller sorts first and wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PriorityKey {
    /// Rank of the document family.
    pub type_rank: usize,
    /// Rank of the source within its family.
    pub source_rank: usize,
}

impl PriorityConfig {
    /// Creates a configuration from a family order.
    #[must_use]
    pub fn new(document_type_priority: Vec<String>) -> Self {
        Self {
            document_type_priority,
            ..Self::default()
        }
    }

    /// Adds a source to family mapping.
    #[must_use]
    pub fn with_source_type(
        mut self,
        source_name: impl Into<String>,
        document_type: impl Into<String>,
    ) -> Self {
        self.source_to_document_type
            .insert(source_name.into(), document_type.into());
        self
    }

    /// Sets the within-family source order.
    #[must_use]
    pub fn with_source_priority(mut self, source_priority: Vec<String>) -> Self {
        self.source_priority = source_priority;
        self
    }

    /// Validates the lists.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for blank or repeated entries.
    pub fn validate(&self) -> Result<()> {
        check_list("document_type_priority", &self.document_type_priority)?;
        check_list("source_priority", &self.source_priority)?;
        for (source, doc_type) in &self.source_to_document_type {
            if source.trim().is_empty() || doc_type.trim().is_empty() {
                return Err(Error::Config(format!(
                    "source_to_document_type has a blank entry: '{source}' -> '{doc_type}'"
                )));
            }
        }
        Ok(())
    }

    /// Rank of a document family. Matching is case-insensitive.
    ///
    /// # Example
    ///
    /// ```rust
    /// use corpusgate::PriorityConfig;
    /// use corpusgate::models::LOWEST_RANK;
    ///
    /// let priority = PriorityConfig::new(vec!["books".into(), "wiki".into()]);
    /// assert_eq!(priority.type_rank("Books"), 0);
    /// assert_eq!(priority.type_rank("wiki"), 1);
    /// assert_eq!(priority.type_rank("forum"), LOWEST_RANK);
    /// ```
    #[must_use]
    pub fn type_rank(&self, document_type: &str) -> usize {
        rank_in(&self.document_type_priority, document_type)
    }

    /// Rank of a source within its family, [`LOWEST_RANK`] when unset.
    #[must_use]
    pub fn source_rank(&self, source_name: &str) -> usize {
        rank_in(&self.source_priority, source_name)
    }

    /// Resolves a document family, preferring an explicit type over the mapping.
    #[must_use]
    pub fn document_type_for<'a>(&'a self, source_name: &str, explicit: &'a str) -> &'a str {
        if explicit.trim().is_empty() {
            self.source_to_document_type
                .get(source_name)
                .map_or("", String::as_str)
        } else {
            explicit
        }
    }

    /// Priority key for content of `document_type` read from `source_name`.
    #[must_use]
    pub fn key_for(&self, document_type: &str, source_name: &str) -> PriorityKey {
        let doc_type = self.document_type_for(source_name, document_type);
        PriorityKey {
            type_rank: self.type_rank(doc_type),
            source_rank: self.source_rank(source_name),
        }
    }
}

fn rank_in(order: &[String], label: &str) -> usize {
    let label = label.trim();
    if label.is_empty() {
        return LOWEST_RANK;
    }
    order
        .iter()
        .position(|entry| entry.trim().eq_ignore_ascii_case(label))
        .unwrap_or(LOWEST_RANK)
}

fn check_list(name: &str, entries: &[String]) -> Result<()> {
    let mut seen = HashSet::new();
    for entry in entries {
        let normalized = entry.trim().to_lowercase();
        if normalized.is_empty() {
            return Err(Error::Config(format!("{name} contains a blank entry")));
        }
        if !seen.insert(normalized) {
            return Err(Error::Config(format!("{name} lists '{entry}' more than once")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn priority() -> PriorityConfig {
        PriorityConfig::new(vec!["books".into(), "wiki".into(), "commoncrawl".into()])
            .with_source_type("gutenberg", "books")
            .with_source_type("cc-2024", "commoncrawl")
            .with_source_priority(vec!["gutenberg".into(), "openlib".into()])
    }

    #[test]
    fn test_key_uses_mapping_when_type_blank() {
        let p = priority();
        let key = p.key_for("", "cc-2024");
        assert_eq!(key.type_rank, 2);
        assert_eq!(key.source_rank, LOWEST_RANK);
    }

    #[test]
    fn test_explicit_type_wins_over_mapping() {
        let p = priority();
        assert_eq!(p.key_for("wiki", "cc-2024").type_rank, 1);
    }

    #[test]
    fn test_unknown_source_gets_lowest_rank() {
        let p = priority();
        let key = p.key_for("", "mystery");
        assert_eq!(key.type_rank, LOWEST_RANK);
        assert!(p.key_for("", "gutenberg") < key);
    }

    #[test]
    fn test_key_orders_type_before_source() {
        let p = priority();
        let books_unranked = p.key_for("books", "openlib-mirror");
        let wiki_ranked = p.key_for("wiki", "gutenberg");
        assert!(books_unranked < wiki_ranked);
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let p = PriorityConfig::new(vec!["books".into(), "Books".into()]);
        assert!(matches!(p.validate(), Err(Error::Config(_))));
        let p = PriorityConfig::new(vec!["books".into(), " ".into()]);
        assert!(p.validate().is_err());
        assert!(priority().validate().is_ok());
    }
}
