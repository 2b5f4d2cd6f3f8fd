//! End-to-end runs from a configuration file over JSONL sources.

#![allow(clippy::unwrap_used)]

use corpusgate::{
    CheckpointManager, CorpusConfig, Error, JsonlRejectionSink, LocalStorage, PipelineRunner,
    ResumeMode, RunReport, StorageBackend,
};
use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// Distinct texts; no word is shared between two documents.
fn texts(prefix: &str, n: usize) -> Vec<String> {
    (0..n as u64)
        .map(|i| {
            (0..40u64)
                .map(|j| {
                    let x = (i + 1)
                        .wrapping_mul(0x9E37_79B9_7F4A_7C15)
                        .wrapping_add((j + 1).wrapping_mul(0xBF58_476D_1CE4_E5B9));
                    format!("{prefix}{:x}", x >> 36)
                })
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect()
}

fn write_jsonl(path: &Path, texts: &[String]) {
    let mut body = String::new();
    for text in texts {
        writeln!(body, "{}", serde_json::json!({ "text": text })).unwrap();
    }
    std::fs::write(path, body).unwrap();
}

/// Config with the lower-priority source listed first. Output paths are absolute.
fn write_config(dir: &Path) -> std::path::PathBuf {
    let config = format!(
        r#"
stages = ["unicode_normalize", "global_dedup"]

[run]
run_id = "e2e"
out_dir = "{out}"
state_dir = "{state}"
shard_docs = 4
checkpoint_every_docs = 4
batch_size = 2

[priority]
document_type_priority = ["books", "commoncrawl"]

[[sources]]
name = "cc"
path = "cc.jsonl"
document_type = "commoncrawl"

[[sources]]
name = "gutenberg"
path = "books.jsonl"
document_type = "books"
"#,
        out = dir.join("out").display(),
        state = dir.join("state").display(),
    );
    let path = dir.join("corpusgate.toml");
    std::fs::write(&path, config).unwrap();
    path
}

/// Books are all unique; the crawl copies three of them and adds two of its own.
fn fixture() -> (TempDir, CorpusConfig) {
    let dir = TempDir::new().unwrap();
    let books = texts("book", 6);
    let mut crawl: Vec<String> = books[..3].to_vec();
    crawl.extend(texts("web", 2));
    write_jsonl(&dir.path().join("books.jsonl"), &books);
    write_jsonl(&dir.path().join("cc.jsonl"), &crawl);
    let config = CorpusConfig::load_from_file(&write_config(dir.path())).unwrap();
    (dir, config)
}

fn run(config: &CorpusConfig) -> corpusgate::Result<RunReport> {
    PipelineRunner::from_config(config)?.run(config.connectors())
}

/// Document count of every shard of `source`, in shard order.
fn shard_sizes(dir: &Path, source: &str) -> Vec<usize> {
    let mut shards: Vec<_> = std::fs::read_dir(dir.join("out/docs").join(source))
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    shards.sort();
    shards
        .iter()
        .map(|path| std::fs::read_to_string(path).unwrap().lines().count())
        .collect()
}

fn source<'a>(report: &'a RunReport, name: &str) -> &'a corpusgate::services::runner::SourceReport {
    report.sources.iter().find(|s| s.source == name).unwrap()
}

#[test]
fn test_higher_priority_source_runs_first_and_wins() {
    let (dir, config) = fixture();
    let report = run(&config).unwrap();

    assert_eq!(report.sources[0].source, "gutenberg");
    assert_eq!(source(&report, "gutenberg").written, 6);
    assert_eq!(source(&report, "cc").written, 2);
    assert_eq!(source(&report, "cc").rejected, 3);

    let out = LocalStorage::new(dir.path().join("out")).unwrap();
    let rejected = JsonlRejectionSink::new(Arc::new(out)).read_all("cc").unwrap();
    assert_eq!(rejected.len(), 3);
    assert!(rejected.iter().all(|r| r.reason_code == "DUPLICATE" && r.stage == "global_dedup"));
    assert!(dir.path().join("out/manifests/e2e.json").exists());
    assert!(dir.path().join("out/docs/gutenberg/shard_00000.jsonl").exists());
    assert!(dir.path().join("state").is_dir());
}

#[test]
fn test_checkpoint_round_trip_after_run() {
    let (dir, config) = fixture();
    run(&config).unwrap();

    let storage: Arc<dyn StorageBackend> =
        Arc::new(LocalStorage::new(dir.path().join("out")).unwrap());
    let mut checkpoints = CheckpointManager::new(storage, "e2e");
    let record = checkpoints.load(ResumeMode::Auto, None).unwrap();
    let books = record.progress("gutenberg");
    assert_eq!(books.processed_docs, 6);
    assert_eq!(books.shard_idx, 2);
    assert!(books.completed);
    assert_eq!(record.progress("cc").processed_docs, 5);

    let snapshots = checkpoints.list_snapshots().unwrap();
    assert!(snapshots.iter().any(|s| s.starts_with("gutenberg-6")));
}

#[test]
fn test_auto_resume_skips_completed_sources() {
    let (_dir, config) = fixture();
    run(&config).unwrap();
    let report = run(&config).unwrap();
    assert!(report.sources.iter().all(|s| s.skipped));
    assert_eq!(report.total_written(), 0);
}

#[test]
fn test_reingestion_from_beginning_accepts_nothing_new() {
    let (dir, mut config) = fixture();
    let first = run(&config).unwrap();
    assert_eq!(first.total_written(), 8);

    config.run.resume = ResumeMode::Beginning;
    let second = run(&config).unwrap();
    assert_eq!(second.total_written(), 0);
    assert_eq!(second.total_rejected(), 11);
    assert_eq!(shard_sizes(dir.path(), "gutenberg"), vec![4, 2]);
    assert_eq!(shard_sizes(dir.path(), "cc"), vec![1, 1]);
}

#[test]
fn test_reingestion_from_beginning_appends_new_shards() {
    let (dir, mut config) = fixture();
    run(&config).unwrap();

    write_jsonl(&dir.path().join("books.jsonl"), &texts("book", 7));
    config.run.resume = ResumeMode::Beginning;
    let report = run(&config).unwrap();
    assert_eq!(source(&report, "gutenberg").written, 1);
    assert_eq!(shard_sizes(dir.path(), "gutenberg"), vec![4, 2, 1]);
}

#[test]
fn test_fingerprints_persist_across_runs() {
    let (dir, config) = fixture();
    run(&config).unwrap();

    // A new run id over a fresh output directory still sees the shared state.
    let mirror = texts("book", 2);
    write_jsonl(&dir.path().join("mirror.jsonl"), &mirror);
    let contents = format!(
        r#"
[run]
run_id = "second"
out_dir = "{out}"
state_dir = "{state}"

[priority]
document_type_priority = ["books", "commoncrawl"]

[[sources]]
name = "mirror"
path = "mirror.jsonl"
document_type = "commoncrawl"
"#,
        out = dir.path().join("out2").display(),
        state = dir.path().join("state").display(),
    );
    let path = dir.path().join("second.toml");
    std::fs::write(&path, contents).unwrap();
    let second = CorpusConfig::load_from_file(&path).unwrap();
    let report = run(&second).unwrap();
    assert_eq!(report.total_written(), 0);
    assert_eq!(report.total_rejected(), 2);
}

#[test]
fn test_checkpoint_mode_requires_a_known_snapshot() {
    let (_dir, mut config) = fixture();
    run(&config).unwrap();

    config.run.resume = ResumeMode::Checkpoint;
    config.run.checkpoint_id = Some("gutenberg-999".into());
    assert!(matches!(run(&config), Err(Error::Config(_))));
}

#[test]
fn test_corrupt_checkpoint_needs_explicit_mode() {
    let (dir, mut config) = fixture();
    run(&config).unwrap();
    std::fs::write(dir.path().join("out/checkpoints/e2e.json"), b"{ torn").unwrap();

    assert!(matches!(run(&config), Err(Error::CheckpointCorruption { .. })));

    config.run.resume = ResumeMode::Ignore;
    let report = run(&config).unwrap();
    assert_eq!(report.sources.len(), 2);
    assert!(report.sources.iter().all(|s| !s.skipped));
    assert_eq!(source(&report, "gutenberg").written, 6);
    assert_eq!(source(&report, "cc").written, 2);
    assert_eq!(source(&report, "cc").rejected, 3);
    assert_eq!(shard_sizes(dir.path(), "gutenberg"), vec![4, 2]);
}

#[test]
fn test_unknown_stage_fails_at_startup() {
    let (_dir, mut config) = fixture();
    config.stages = vec!["global_dedup".into(), "toxicity".into()];
    assert!(matches!(PipelineRunner::from_config(&config), Err(Error::Config(_))));
}
