//! Line-delimited JSON source.

use super::{RawDocument, SourceConnector, SourceMode, SourceRecord, SourceStream};
use crate::{Error, Result};
use std::collections::{BTreeMap, VecDeque};
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Reads documents from a `.jsonl` file or every `.jsonl` file under a directory.
///
/// Files are read in path order, one JSON object per non-blank line. The text
/// comes from `text_field`; optional `url` and `language`/`lang` fields are
/// carried over, as are other string fields as metadata. Unparsable lines
/// become [`SourceRecord::Failed`].
#[derive(Debug, Clone)]
pub struct JsonlSource {
    name: String,
    document_type: String,
    path: PathBuf,
    text_field: String,
    mode: SourceMode,
}

impl JsonlSource {
    /// Creates a batch source reading `text` fields.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        document_type: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            document_type: document_type.into(),
            path: path.into(),
            text_field: "text".to_string(),
            mode: SourceMode::Batch,
        }
    }

    /// Builder method to set the text field.
    #[must_use]
    pub fn with_text_field(mut self, field: impl Into<String>) -> Self {
        self.text_field = field.into();
        self
    }

    /// Builder method to set the mode.
    #[must_use]
    pub const fn with_mode(mut self, mode: SourceMode) -> Self {
        self.mode = mode;
        self
    }

    fn files(&self) -> Result<VecDeque<PathBuf>> {
        if self.path.is_file() {
            return Ok(VecDeque::from([self.path.clone()]));
        }
        if !self.path.is_dir() {
            return Err(self.error(format!("{} does not exist", self.path.display())));
        }
        let mut files = Vec::new();
        for entry in WalkDir::new(&self.path).sort_by_file_name() {
            let entry = entry.map_err(|e| self.error(e))?;
            if entry.file_type().is_file()
                && entry.path().extension().is_some_and(|ext| ext == "jsonl")
            {
                files.push(entry.into_path());
            }
        }
        Ok(files.into())
    }

    fn error(&self, cause: impl std::fmt::Display) -> Error {
        Error::Source {
            source_name: self.name.clone(),
            cause: cause.to_string(),
        }
    }
}

impl SourceConnector for JsonlSource {
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
        let records = JsonlRecords {
            source_name: self.name.clone(),
            text_field: self.text_field.clone(),
            files: self.files()?,
            current: None,
        };
        let skip = usize::try_from(offset).unwrap_or(usize::MAX);
        Ok(SourceStream::new(offset, records.skip(skip)))
    }
}

struct JsonlRecords {
    source_name: String,
    text_field: String,
    files: VecDeque<PathBuf>,
    current: Option<(String, Lines<BufReader<File>>)>,
}

impl JsonlRecords {
    fn open_next(&mut self) -> Option<Result<()>> {
        let path = self.files.pop_front()?;
        Some(match File::open(&path) {
            Ok(file) => {
                self.current = Some((display(&path), BufReader::new(file).lines()));
                Ok(())
            },
            Err(e) => Err(Error::Source {
                source_name: self.source_name.clone(),
                cause: format!("{}: {e}", path.display()),
            }),
        })
    }

    fn parse(&self, file: &str, line: &str) -> SourceRecord {
        let failed = |cause: String| SourceRecord::Failed {
            source_file: Some(file.to_string()),
            cause,
        };
        let value: serde_json::Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => return failed(format!("invalid JSON: {e}")),
        };
        let Some(object) = value.as_object() else {
            return failed("line is not a JSON object".to_string());
        };
        let Some(text) = object.get(&self.text_field).and_then(|v| v.as_str()) else {
            return failed(format!("missing string field '{}'", self.text_field));
        };

        let mut metadata = BTreeMap::new();
        for (key, value) in object {
            if key == &self.text_field || matches!(key.as_str(), "url" | "language" | "lang") {
                continue;
            }
            if let Some(s) = value.as_str() {
                metadata.insert(key.clone(), s.to_string());
            }
        }
        let field = |name: &str| object.get(name).and_then(|v| v.as_str()).map(String::from);
        SourceRecord::Document(RawDocument {
            text: text.to_string(),
            source_file: Some(file.to_string()),
            url: field("url"),
            language: field("language").or_else(|| field("lang")),
            metadata,
        })
    }
}

impl Iterator for JsonlRecords {
    type Item = Result<SourceRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.current.is_none() {
                if let Err(e) = self.open_next()? {
                    return Some(Err(e));
                }
                continue;
            }
            let (file, lines) = self.current.as_mut()?;
            match lines.next() {
                None => self.current = None,
                Some(Err(e)) => {
                    let file = file.clone();
                    self.current = None;
                    return Some(Err(Error::Source {
                        source_name: self.source_name.clone(),
                        cause: format!("{file}: {e}"),
                    }));
                },
                Some(Ok(line)) if line.trim().is_empty() => {},
                Some(Ok(line)) => {
                    let file = file.clone();
                    return Some(Ok(self.parse(&file, &line)));
                },
            }
        }
    }
}

fn display(path: &Path) -> String {
    path.display().to_string()
}
