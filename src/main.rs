//! Binary entry point for corpusgate.
//!
//! This binary provides the CLI over the corpusgate pipeline: running a
//! configured ingestion, inspecting checkpoints and auditing the global
//! fingerprint stores.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr in main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow needless_pass_by_value for command functions
#![allow(clippy::needless_pass_by_value)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use corpusgate::config::CorpusConfig;
use corpusgate::observability::{
    self, LoggingConfig, MetricsConfig, install_prometheus, render_metrics,
};
use corpusgate::services::runner::CancellationToken;
use corpusgate::{
    CheckpointManager, GlobalFingerprintManager, LocalStorage, PipelineRunner, ResumeMode,
    StorageBackend,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

/// Corpusgate - priority-ordered corpus ingestion with global deduplication.
#[derive(Parser)]
#[command(name = "corpusgate")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Run the configured sources through the pipeline.
    Run {
        /// Path to the TOML configuration file.
        #[arg(short, long, env = "CORPUSGATE_CONFIG")]
        config: PathBuf,

        /// Resume mode: auto, beginning, checkpoint or ignore.
        #[arg(long)]
        resume: Option<String>,

        /// Snapshot to resume from when `--resume checkpoint`.
        #[arg(long)]
        checkpoint_id: Option<String>,
    },

    /// Inspect checkpoints.
    Checkpoint {
        #[command(subcommand)]
        action: CheckpointAction,
    },

    /// Audit the global fingerprint stores.
    Fingerprints {
        #[command(subcommand)]
        action: FingerprintsAction,
    },
}

/// Checkpoint subcommands.
#[derive(Subcommand)]
enum CheckpointAction {
    /// Show the checkpoint of a run, or list runs with a checkpoint.
    Show {
        /// Path to the TOML configuration file.
        #[arg(short, long, env = "CORPUSGATE_CONFIG")]
        config: PathBuf,

        /// Run to show; defaults to the configured run id.
        #[arg(long)]
        run_id: Option<String>,

        /// List every run with a checkpoint instead.
        #[arg(long)]
        all: bool,
    },
}

/// Fingerprint subcommands.
#[derive(Subcommand)]
enum FingerprintsAction {
    /// Show stored fingerprints that match a text.
    Query {
        /// Path to the TOML configuration file.
        #[arg(short, long, env = "CORPUSGATE_CONFIG")]
        config: PathBuf,

        /// Text to fingerprint and look up.
        #[arg(long)]
        text: String,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run_command(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        },
    }
}

/// Runs the selected command.
fn run_command(cli: Cli) -> Result<ExitCode> {
    let verbose = cli.verbose;
    match cli.command {
        Commands::Run {
            config,
            resume,
            checkpoint_id,
        } => cmd_run(&config, resume, checkpoint_id, verbose),
        Commands::Checkpoint {
            action:
                CheckpointAction::Show {
                    config,
                    run_id,
                    all,
                },
        } => cmd_checkpoint_show(&config, run_id, all, verbose),
        Commands::Fingerprints {
            action: FingerprintsAction::Query { config, text },
        } => cmd_fingerprints_query(&config, &text, verbose),
    }
}

/// Loads configuration and initializes logging from it.
fn load(path: &Path, verbose: bool) -> Result<CorpusConfig> {
    let config = CorpusConfig::load_from_file(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))?;
    observability::init_logging(LoggingConfig::from_settings(Some(&config.logging), verbose))
        .context("failed to initialize logging")?;
    Ok(config)
}

fn cmd_run(
    path: &Path,
    resume: Option<String>,
    checkpoint_id: Option<String>,
    verbose: bool,
) -> Result<ExitCode> {
    let mut config = load(path, verbose)?;
    if let Some(mode) = resume {
        config.run.resume = mode.parse::<ResumeMode>()?;
    }
    if checkpoint_id.is_some() {
        config.run.checkpoint_id = checkpoint_id;
    }
    config.validate()?;

    let _metrics = install_prometheus(&MetricsConfig::from_settings(Some(&config.metrics)))?;

    if config.run.workers > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(config.run.workers)
            .build_global()
            .context("failed to configure worker pool")?;
    }

    let cancellation = CancellationToken::new();
    let handler_token = cancellation.clone();
    ctrlc::set_handler(move || {
        tracing::warn!("Interrupt received, stopping after the current batch");
        handler_token.cancel();
    })
    .context("failed to install interrupt handler")?;

    let runner = PipelineRunner::from_config(&config)?.with_cancellation(cancellation);
    tracing::info!(
        run_id = runner.run_id(),
        out_dir = %config.run.out_dir.display(),
        resume = %config.run.resume,
        sources = config.sources.len(),
        "Starting run"
    );

    let report = match runner.run(config.connectors()) {
        Ok(report) => report,
        Err(corpusgate::Error::Cancelled) => {
            eprintln!("Run cancelled; progress up to the last checkpoint is kept.");
            return Ok(ExitCode::from(130));
        },
        Err(e) => return Err(e.into()),
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    if let Some(rendered) = render_metrics() {
        eprintln!("{rendered}");
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_checkpoint_show(
    path: &Path,
    run_id: Option<String>,
    all: bool,
    verbose: bool,
) -> Result<ExitCode> {
    let config = load(path, verbose)?;
    let storage = LocalStorage::new(&config.run.out_dir)?;

    if all {
        let runs = CheckpointManager::list_runs(&storage)?;
        if runs.is_empty() {
            println!("No checkpoints under {}", config.run.out_dir.display());
        }
        for run in runs {
            println!("{run}");
        }
        return Ok(ExitCode::SUCCESS);
    }

    let run_id = run_id.unwrap_or_else(|| config.run.run_id.clone());
    let Some(record) = CheckpointManager::read(&storage, &run_id)? else {
        println!("No checkpoint for run '{run_id}'");
        return Ok(ExitCode::FAILURE);
    };
    println!("{}", serde_json::to_string_pretty(&record)?);

    let manager = CheckpointManager::new(Arc::new(storage) as Arc<dyn StorageBackend>, run_id);
    let snapshots = manager.list_snapshots()?;
    if !snapshots.is_empty() {
        println!();
        println!("Snapshots:");
        for snapshot in snapshots {
            println!("  {snapshot}");
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_fingerprints_query(path: &Path, text: &str, verbose: bool) -> Result<ExitCode> {
    let config = load(path, verbose)?;
    let storage: Arc<dyn StorageBackend> = Arc::new(LocalStorage::new(&config.run.state_dir)?);
    let manager = GlobalFingerprintManager::open(storage, &config.fingerprints)?;
    let matches = manager.query_text(text)?;

    let simhash: Vec<_> = matches
        .simhash
        .iter()
        .map(|(distance, record)| serde_json::json!({ "distance": distance, "record": record }))
        .collect();
    let minhash: Vec<_> = matches
        .minhash
        .iter()
        .map(|(similarity, record)| {
            serde_json::json!({ "similarity": similarity, "record": record })
        })
        .collect();
    let chunks: Vec<_> = matches
        .chunks
        .iter()
        .map(|(chunk_index, record)| {
            serde_json::json!({ "query_chunk": chunk_index, "record": record })
        })
        .collect();

    let output = serde_json::json!({
        "fingerprint_version": manager.params().fingerprint_version,
        "simhash": simhash,
        "minhash": minhash,
        "chunk_hash": chunks,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(ExitCode::SUCCESS)
}
