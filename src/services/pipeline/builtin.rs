//! Built-in stages.

use super::stage::{Decision, Rejection, Stage, StageClass};
use crate::Result;
use crate::models::{Document, PriorityConfig};
use crate::services::dedup::{GlobalFingerprintManager, Verdict};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

/// Registry name of [`UnicodeNormalizeStage`].
pub const UNICODE_NORMALIZE: &str = "unicode_normalize";

/// Registry name of [`GlobalDedupStage`].
pub const GLOBAL_DEDUP: &str = "global_dedup";

static HTML_TAG: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)] // Static pattern, validated by tests
    Regex::new(r"</?[A-Za-z][^<>]{0,512}>").expect("static regex")
});

static INLINE_SPACE: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)] // Static pattern, validated by tests
    Regex::new(r"[ \t\x0B\x0C]+").expect("static regex")
});

static BLANK_LINES: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)] // Static pattern, validated by tests
    Regex::new(r"\n{3,}").expect("static regex")
});

/// Cleans up text before any other stage sees it.
///
/// Strips simple HTML tags and control characters, maps unusual spaces to
/// ASCII, drops zero-width characters, collapses runs of inline whitespace and
/// blank lines. Documents left empty are rejected with `EMPTY_TEXT`.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnicodeNormalizeStage;

impl UnicodeNormalizeStage {
    /// Returns the cleaned text.
    #[must_use]
    pub fn normalize(text: &str) -> String {
        let text = text.replace("\r\n", "\n").replace('\r', "\n");
        let text = HTML_TAG.replace_all(&text, " ").into_owned();
        let text: String = text
            .chars()
            .filter_map(|c| match c {
                '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{2060}' | '\u{FEFF}' => None,
                '\u{00A0}' | '\u{2000}'..='\u{200A}' | '\u{202F}' | '\u{205F}' | '\u{3000}' => {
                    Some(' ')
                },
                '\n' | '\t' => Some(c),
                c if c.is_control() => None,
                c => Some(c),
            })
            .collect();
        let text = INLINE_SPACE.replace_all(&text, " ").into_owned();
        let text = text
            .lines()
            .map(str::trim)
            .collect::<Vec<_>>()
            .join("\n");
        let text = BLANK_LINES.replace_all(&text, "\n\n").into_owned();
        text.trim().to_string()
    }
}

impl Stage for UnicodeNormalizeStage {
    fn name(&self) -> &str {
        UNICODE_NORMALIZE
    }

    fn class(&self) -> StageClass {
        StageClass::Normalize
    }

    fn apply(&self, mut document: Document) -> Result<Decision> {
        let cleaned = Self::normalize(document.text());
        if cleaned.is_empty() {
            return Ok(Decision::Reject(Rejection::new(
                "EMPTY_TEXT",
                "no text left after normalization",
            )));
        }
        if cleaned != document.text() {
            document.set_text(cleaned);
        }
        document.transform_chain.push("unicode_normalize_v1".to_string());
        Ok(Decision::Accept(document))
    }
}

/// Adapter running the global fingerprint manager as a stage.
///
/// Appends `global_dedup_kept_v1` or `global_dedup_keep_link_chunks=N_v1` to
/// the transform chain of kept documents and rejects duplicates with
/// `DUPLICATE`.
pub struct GlobalDedupStage {
    manager: Arc<GlobalFingerprintManager>,
    priority: PriorityConfig,
}

impl GlobalDedupStage {
    /// Creates the stage.
    #[must_use]
    pub const fn new(manager: Arc<GlobalFingerprintManager>, priority: PriorityConfig) -> Self {
        Self { manager, priority }
    }
}

impl Stage for GlobalDedupStage {
    fn name(&self) -> &str {
        GLOBAL_DEDUP
    }

    fn class(&self) -> StageClass {
        StageClass::Dedup
    }

    fn apply(&self, mut document: Document) -> Result<Decision> {
        match self.manager.evaluate(&document, &self.priority)? {
            Verdict::Unique => {
                document.transform_chain.push("global_dedup_kept_v1".to_string());
            },
            Verdict::PartialOverlap {
                doc_id,
                matched_chunks,
            } => {
                document.transform_chain.push(format!(
                    "global_dedup_keep_link_chunks={}_v1",
                    matched_chunks.len()
                ));
                document
                    .metadata
                    .insert("dedup_linked_doc_id".to_string(), doc_id.to_string());
            },
            Verdict::Supersedes { doc_ids, .. } => {
                document.transform_chain.push("global_dedup_kept_v1".to_string());
                let ids: Vec<String> = doc_ids.iter().map(ToString::to_string).collect();
                document
                    .metadata
                    .insert("dedup_superseded_doc_ids".to_string(), ids.join(","));
            },
            Verdict::DuplicateOf {
                doc_id,
                source_name,
                matched_via,
            } => {
                return Ok(Decision::Reject(Rejection::new(
                    "DUPLICATE",
                    format!(
                        "global_dedup_dropped_v1: duplicate of {doc_id} from '{source_name}' \
                         via {matched_via}"
                    ),
                )));
            },
        }
        Ok(Decision::Accept(document))
    }
}
