//! Source connectors.
//!
//! A connector yields a lazy, restartable sequence of raw records. The runner
//! turns them into [`Document`]s and accounts for every record, including
//! failed ones, in the checkpoint's per-file statistics.

mod jsonl;

pub use jsonl::JsonlSource;

use crate::Result;
use crate::models::Document;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How reliably a source can be restarted from an offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceMode {
    /// Deterministic order; skipping `n` records lands on the same record every time.
    #[default]
    Batch,
    /// No stable offsets; skipping is best effort and may re-deliver records.
    Streaming,
}

/// A record as delivered by a connector, before any stage runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawDocument {
    /// Document text.
    pub text: String,
    /// Originating file, if the source spans several.
    pub source_file: Option<String>,
    /// Originating URL.
    pub url: Option<String>,
    /// Language code.
    pub language: Option<String>,
    /// Extra metadata carried into the document.
    pub metadata: BTreeMap<String, String>,
}

impl RawDocument {
    /// Creates a record with only text.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// Builder method to set the originating file.
    #[must_use]
    pub fn with_source_file(mut self, source_file: impl Into<String>) -> Self {
        self.source_file = Some(source_file.into());
        self
    }

    /// Converts into a pipeline document.
    #[must_use]
    pub fn into_document(self, source_name: &str, document_type: &str) -> Document {
        let mut doc = Document::new(source_name, document_type, self.text);
        if let Some(language) = self.language {
            doc = doc.with_language(&language);
        }
        if let Some(file) = self.source_file {
            doc = doc.with_source_file(file);
        }
        if let Some(url) = self.url {
            doc = doc.with_url(url);
        }
        doc.metadata = self.metadata;
        doc
    }
}

/// One item of a source stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceRecord {
    /// A readable record.
    Document(RawDocument),
    /// A record that could not be parsed. Counted and rejected, never skipped silently.
    Failed {
        /// File the record came from.
        source_file: Option<String>,
        /// What went wrong.
        cause: String,
    },
}

/// Iterator over a source that tracks its position.
///
/// `Err` items are fatal for the source; recoverable problems arrive as
/// [`SourceRecord::Failed`].
pub struct SourceStream {
    position: u64,
    records: Box<dyn Iterator<Item = Result<SourceRecord>> + Send>,
}

impl SourceStream {
    /// Wraps an iterator that starts at record `offset`.
    #[must_use]
    pub fn new(
        offset: u64,
        records: impl Iterator<Item = Result<SourceRecord>> + Send + 'static,
    ) -> Self {
        Self {
            position: offset,
            records: Box::new(records),
        }
    }

    /// Records consumed from the start of the source, including the skipped offset.
    #[must_use]
    pub const fn position(&self) -> u64 {
        self.position
    }
}

impl Iterator for SourceStream {
    type Item = Result<SourceRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.records.next()?;
        self.position += 1;
        Some(item)
    }
}

/// A producer of raw documents.
pub trait SourceConnector: Send {
    /// Configured source name; unique within a run.
    fn name(&self) -> &str;

    /// Document family of the source.
    fn document_type(&self) -> &str;

    /// Restart behaviour.
    fn mode(&self) -> SourceMode {
        SourceMode::Batch
    }

    /// Opens the source positioned after `offset` records.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Source`] if the source cannot be opened.
    fn open(&self, offset: u64) -> Result<SourceStream>;
}

/// Connector over records held in memory.
#[derive(Debug, Clone)]
pub struct VecSource {
    name: String,
    document_type: String,
    mode: SourceMode,
    records: Vec<SourceRecord>,
}

impl VecSource {
    /// Creates a batch source.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        document_type: impl Into<String>,
        records: Vec<SourceRecord>,
    ) -> Self {
        Self {
            name: name.into(),
            document_type: document_type.into(),
            mode: SourceMode::Batch,
            records,
        }
    }

    /// Creates a batch source from plain texts.
    #[must_use]
    pub fn from_texts<S: Into<String>>(
        name: impl Into<String>,
        document_type: impl Into<String>,
        texts: impl IntoIterator<Item = S>,
    ) -> Self {
        let records = texts
            .into_iter()
            .map(|text| SourceRecord::Document(RawDocument::new(text)))
            .collect();
        Self::new(name, document_type, records)
    }

    /// Builder method to set the mode.
    #[must_use]
    pub const fn with_mode(mut self, mode: SourceMode) -> Self {
        self.mode = mode;
        self
    }
}

impl SourceConnector for VecSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn document_type(&self) -> &str {
        &self.document_type
    }

    fn mode(&self) -> SourceMode {
        self.mode
    }

    fn open(&self, offset: u64) -> Result<SourceStream> {
        let skip = usize::try_from(offset).unwrap_or(usize::MAX);
        let records: Vec<_> = self.records.iter().skip(skip).cloned().map(Ok).collect();
        Ok(SourceStream::new(offset, records.into_iter()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_position_includes_offset() {
        let source = VecSource::from_texts("s", "wiki", ["a", "b", "c"]);
        let mut stream = source
            .open(1)
            .unwrap_or_else(|_| SourceStream::new(0, std::iter::empty()));
        assert_eq!(stream.position(), 1);
        assert!(stream.next().is_some());
        assert!(stream.next().is_some());
        assert!(stream.next().is_none());
        assert_eq!(stream.position(), 3);
    }

    #[test]
    fn test_raw_document_conversion() {
        let mut raw = RawDocument::new("hello").with_source_file("a.jsonl");
        raw.language = Some("de-DE".into());
        raw.metadata.insert("license".into(), "cc-by".into());
        let doc = raw.into_document("wiki-de", "wiki");
        assert_eq!(doc.language, "de");
        assert_eq!(doc.source_file.as_deref(), Some("a.jsonl"));
        assert_eq!(doc.metadata["license"], "cc-by");
        assert_eq!(doc.text(), "hello");
    }
}
