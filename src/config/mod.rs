//! Configuration management.
//!
//! A run is described by one TOML file:
//!
//! ```toml
//! stages = ["unicode_normalize", "global_dedup"]
//!
//! [run]
//! out_dir = "storage/{run_id}"
//! state_dir = "storage"
//! shard_docs = 5000
//! resume = "auto"
//!
//! [run.run_id_auto]
//! prefix_digits = 4
//!
//! [fingerprints]
//! simhash_max_hamming = 3
//! minhash_threshold = 0.9
//!
//! [priority]
//! document_type_priority = ["books", "wiki", "commoncrawl"]
//!
//! [[sources]]
//! name = "gutenberg"
//! kind = "jsonl"
//! path = "data/gutenberg"
//! document_type = "books"
//! ```
//!
//! Every section is optional except `[[sources]]`. Missing keys take the
//! defaults documented on each field.

mod run_id;

pub use crate::services::dedup::FingerprintConfig;
pub use run_id::{DEFAULT_RUN_ID, RunIdAuto, generate_run_id, resolve_out_dir, resolve_run_id};

use crate::models::{HashParams, PriorityConfig, ResumeMode};
use crate::observability::{LoggingSettings, MetricsSettings};
use crate::services::pipeline::{GLOBAL_DEDUP, UNICODE_NORMALIZE};
use crate::sources::{JsonlSource, SourceConnector, SourceMode};
use crate::{Error, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

/// Resolved run settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// Run identifier, explicit or generated.
    pub run_id: String,
    /// Output root with `{run_id}` substituted; holds shards, rejections,
    /// checkpoints and manifests.
    pub out_dir: PathBuf,
    /// Root of the global fingerprint stores, shared by every run.
    pub state_dir: PathBuf,
    /// Documents per output shard.
    pub shard_docs: usize,
    /// Commit a checkpoint at least this often, in records read.
    pub checkpoint_every_docs: usize,
    /// Documents handed to the orchestrator at once.
    pub batch_size: usize,
    /// How to treat an existing checkpoint.
    pub resume: ResumeMode,
    /// Snapshot to load when `resume = "checkpoint"`.
    pub checkpoint_id: Option<String>,
    /// Worker threads for pre/post-dedup stages; 0 uses the rayon default.
    pub workers: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            run_id: DEFAULT_RUN_ID.to_string(),
            out_dir: PathBuf::from("storage"),
            state_dir: PathBuf::from("storage"),
            shard_docs: 5000,
            checkpoint_every_docs: 10_000,
            batch_size: 1000,
            resume: ResumeMode::Auto,
            checkpoint_id: None,
            workers: 0,
        }
    }
}

/// Connector kind of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceKind {
    /// Local line-delimited JSON file or directory.
    #[default]
    Jsonl,
}

impl SourceKind {
    fn parse(kind: &str) -> Result<Self> {
        match kind.trim().to_lowercase().as_str() {
            "jsonl" | "local_jsonl" | "ndjson" => Ok(Self::Jsonl),
            other => Err(Error::Config(format!(
                "unsupported source kind '{other}' (supported: jsonl)"
            ))),
        }
    }
}

/// One configured source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSpec {
    /// Unique source name.
    pub name: String,
    /// Connector kind.
    pub kind: SourceKind,
    /// File or directory to read.
    pub path: PathBuf,
    /// Document family; falls back to `priority.source_to_document_type`.
    pub document_type: String,
    /// Restart behaviour.
    pub mode: SourceMode,
    /// JSON field holding the text.
    pub text_field: String,
}

impl SourceSpec {
    /// Builds the connector for this source.
    #[must_use]
    pub fn connector(&self) -> Box<dyn SourceConnector> {
        match self.kind {
            SourceKind::Jsonl => Box::new(
                JsonlSource::new(&self.name, &self.document_type, &self.path)
                    .with_text_field(&self.text_field)
                    .with_mode(self.mode),
            ),
        }
    }
}

/// Complete run configuration.
#[derive(Debug, Clone)]
pub struct CorpusConfig {
    /// Run settings.
    pub run: RunConfig,
    /// Fingerprint stores and thresholds.
    pub fingerprints: FingerprintConfig,
    /// Source and family priority.
    pub priority: PriorityConfig,
    /// Sources in configuration order.
    pub sources: Vec<SourceSpec>,
    /// Stage names in execution order.
    pub stages: Vec<String>,
    /// Logging settings, resolved by the binary.
    pub logging: LoggingSettings,
    /// Metrics settings, resolved by the binary.
    pub metrics: MetricsSettings,
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// Run section.
    pub run: Option<ConfigFileRun>,
    /// Fingerprints section.
    pub fingerprints: Option<ConfigFileFingerprints>,
    /// Priority section.
    pub priority: Option<PriorityConfig>,
    /// Sources.
    #[serde(default)]
    pub sources: Vec<ConfigFileSource>,
    /// Stage names.
    pub stages: Option<Vec<String>>,
    /// Logging section.
    pub logging: Option<LoggingSettings>,
    /// Metrics section.
    pub metrics: Option<MetricsSettings>,
}

/// `[run]` section in config file.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFileRun {
    /// Explicit run id.
    pub run_id: Option<String>,
    /// Run id generation.
    pub run_id_auto: Option<RunIdAuto>,
    /// Output root; may contain `{run_id}`.
    pub out_dir: Option<String>,
    /// Fingerprint store root.
    pub state_dir: Option<String>,
    /// Documents per shard.
    pub shard_docs: Option<usize>,
    /// Checkpoint interval.
    pub checkpoint_every_docs: Option<usize>,
    /// Orchestrator batch size.
    pub batch_size: Option<usize>,
    /// Resume mode.
    pub resume: Option<String>,
    /// Snapshot id.
    pub checkpoint_id: Option<String>,
    /// Worker threads.
    pub workers: Option<usize>,
}

/// `[fingerprints]` section in config file.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFileFingerprints {
    /// Enabled stores: any of `simhash`, `minhash`, `chunk_hash`.
    pub enabled: Option<Vec<String>>,
    /// SimHash distance.
    pub simhash_max_hamming: Option<u32>,
    /// SimHash token cap.
    pub simhash_max_tokens: Option<usize>,
    /// MinHash threshold.
    pub minhash_threshold: Option<f64>,
    /// Shingle size.
    pub minhash_ngram: Option<usize>,
    /// Permutations.
    pub minhash_num_perm: Option<usize>,
    /// LSH bands.
    pub minhash_bands: Option<usize>,
    /// Chunk size in characters.
    pub chunk_size: Option<usize>,
    /// Chunk overlap in characters.
    pub chunk_overlap: Option<usize>,
    /// Namespace version.
    pub fingerprint_version: Option<String>,
    /// Storage prefix.
    pub root: Option<String>,
}

/// `[[sources]]` entry in config file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFileSource {
    /// Source name.
    pub name: String,
    /// Connector kind; defaults to `jsonl`.
    pub kind: Option<String>,
    /// Path to read.
    pub path: String,
    /// Document family.
    pub document_type: Option<String>,
    /// `batch` or `streaming`.
    pub mode: Option<SourceMode>,
    /// Text field; defaults to `text`.
    pub text_field: Option<String>,
}

impl CorpusConfig {
    /// Loads and validates configuration from a file path.
    ///
    /// Relative source paths are resolved against the file's directory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] if the file cannot be read and
    /// [`Error::Config`] if it cannot be parsed or fails validation.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::operation("read_config_file", format!("{}: {e}", path.display())))?;
        let base = path.parent().unwrap_or_else(|| Path::new(""));
        Self::from_toml_str(&contents, base, |name| std::env::var(name).ok())
    }

    /// Parses and validates configuration text.
    ///
    /// `lookup` supplies the `CORPUSGATE_*` overrides for the fingerprint
    /// thresholds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] on parse or validation failure.
    pub fn from_toml_str(
        contents: &str,
        base_dir: &Path,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let file: ConfigFile = toml::from_str(contents)
            .map_err(|e| Error::Config(format!("failed to parse config: {e}")))?;
        let config = Self::from_config_file(file, base_dir, lookup)?;
        config.validate()?;
        Ok(config)
    }

    fn from_config_file(
        file: ConfigFile,
        base_dir: &Path,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let priority = file.priority.unwrap_or_default();

        let mut sources = Vec::with_capacity(file.sources.len());
        for source in file.sources {
            let document_type = source
                .document_type
                .filter(|t| !t.trim().is_empty())
                .or_else(|| priority.source_to_document_type.get(&source.name).cloned())
                .unwrap_or_default();
            let path = PathBuf::from(&source.path);
            sources.push(SourceSpec {
                kind: source.kind.as_deref().map_or(Ok(SourceKind::Jsonl), SourceKind::parse)?,
                path: if path.is_relative() { base_dir.join(path) } else { path },
                document_type,
                mode: source.mode.unwrap_or_default(),
                text_field: source.text_field.unwrap_or_else(|| "text".to_string()),
                name: source.name,
            });
        }

        let run_file = file.run.unwrap_or_default();
        let first_source = sources.first().map(|s| s.name.as_str());
        let run_id = resolve_run_id(
            run_file.run_id.as_deref(),
            run_file.run_id_auto.as_ref(),
            first_source,
        );
        let defaults = RunConfig::default();
        let run = RunConfig {
            out_dir: resolve_out_dir(run_file.out_dir.as_deref().unwrap_or("storage"), &run_id),
            state_dir: run_file
                .state_dir
                .map_or_else(|| defaults.state_dir.clone(), PathBuf::from),
            run_id,
            shard_docs: run_file.shard_docs.unwrap_or(defaults.shard_docs),
            checkpoint_every_docs: run_file
                .checkpoint_every_docs
                .unwrap_or(defaults.checkpoint_every_docs),
            batch_size: run_file.batch_size.unwrap_or(defaults.batch_size),
            resume: run_file
                .resume
                .as_deref()
                .map_or(Ok(ResumeMode::Auto), str::parse)?,
            checkpoint_id: run_file.checkpoint_id.filter(|id| !id.trim().is_empty()),
            workers: run_file.workers.unwrap_or(defaults.workers),
        };

        Ok(Self {
            run,
            fingerprints: fingerprint_config(file.fingerprints.unwrap_or_default())?
                .with_overrides(lookup),
            priority,
            sources,
            stages: file
                .stages
                .unwrap_or_else(|| vec![UNICODE_NORMALIZE.to_string(), GLOBAL_DEDUP.to_string()]),
            logging: file.logging.unwrap_or_default(),
            metrics: file.metrics.unwrap_or_default(),
        })
    }

    /// Validates cross-field constraints.
    ///
    /// Unknown stage names are detected when the stage registry builds the
    /// pipeline, since plugins may register additional names.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.sources.is_empty() {
            return Err(Error::Config("at least one [[sources]] entry is required".to_string()));
        }
        let mut names = HashSet::new();
        for source in &self.sources {
            if source.name.trim().is_empty() {
                return Err(Error::Config("source name must not be blank".to_string()));
            }
            if !names.insert(source.name.as_str()) {
                return Err(Error::Config(format!("duplicate source name '{}'", source.name)));
            }
            if source.text_field.trim().is_empty() {
                return Err(Error::Config(format!(
                    "source '{}' has a blank text_field",
                    source.name
                )));
            }
        }
        let mut stages = HashSet::new();
        for stage in &self.stages {
            if !stages.insert(stage.as_str()) {
                return Err(Error::Config(format!("stage '{stage}' is listed more than once")));
            }
        }
        if self.run.shard_docs == 0
            || self.run.batch_size == 0
            || self.run.checkpoint_every_docs == 0
        {
            return Err(Error::Config(
                "shard_docs, batch_size and checkpoint_every_docs must be positive".to_string(),
            ));
        }
        if self.run.resume == ResumeMode::Checkpoint && self.run.checkpoint_id.is_none() {
            return Err(Error::Config(
                "resume = \"checkpoint\" requires run.checkpoint_id".to_string(),
            ));
        }
        self.priority.validate()?;
        self.fingerprints.validate()
    }

    /// Builds connectors for every source, in configuration order.
    #[must_use]
    pub fn connectors(&self) -> Vec<Box<dyn SourceConnector>> {
        self.sources.iter().map(SourceSpec::connector).collect()
    }

    /// Source to family mapping including per-source `document_type`s.
    #[must_use]
    pub fn effective_priority(&self) -> PriorityConfig {
        let mut priority = self.priority.clone();
        let mapped: BTreeMap<String, String> = self
            .sources
            .iter()
            .filter(|s| !s.document_type.is_empty())
            .map(|s| (s.name.clone(), s.document_type.clone()))
            .collect();
        for (name, doc_type) in mapped {
            priority.source_to_document_type.entry(name).or_insert(doc_type);
        }
        priority
    }
}

fn fingerprint_config(file: ConfigFileFingerprints) -> Result<FingerprintConfig> {
    let mut config = FingerprintConfig::default();
    if let Some(enabled) = file.enabled {
        let mut flags = (false, false, false);
        for store in &enabled {
            match store.trim().to_lowercase().as_str() {
                "simhash" => flags.0 = true,
                "minhash" => flags.1 = true,
                "chunk_hash" | "chunk" => flags.2 = true,
                other => {
                    return Err(Error::Config(format!(
                        "unknown fingerprint store '{other}' \
                         (expected simhash, minhash or chunk_hash)"
                    )));
                },
            }
        }
        config = config.with_stores(flags.0, flags.1, flags.2);
    }
    if let Some(k) = file.simhash_max_hamming {
        config.simhash_max_hamming = k;
    }
    if let Some(t) = file.minhash_threshold {
        config.minhash_threshold = t;
    }
    if let Some(root) = file.root {
        config.root = root;
    }
    let defaults = HashParams::default();
    config.params = HashParams {
        fingerprint_version: file.fingerprint_version.unwrap_or(defaults.fingerprint_version),
        shingle_size: file.minhash_ngram.unwrap_or(defaults.shingle_size),
        num_perm: file.minhash_num_perm.unwrap_or(defaults.num_perm),
        bands: file.minhash_bands.unwrap_or(defaults.bands),
        max_tokens: file.simhash_max_tokens.unwrap_or(defaults.max_tokens),
        chunk_size: file.chunk_size.unwrap_or(defaults.chunk_size),
        chunk_overlap: file.chunk_overlap.unwrap_or(defaults.chunk_overlap),
    };
    Ok(config)
}
