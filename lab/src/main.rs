//! Command-line front end for the experiment matrix engine.
//!
//! `run` executes (or resumes) an experiment described by a TOML config,
//! `list` shows the enumerated combinations, `report` re-renders a stored
//! snapshot and `plugins` lists the built-in plugin names.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;

use matrix::error::EngineError;
use matrix::exit_codes;
use matrix::experiment::{ResumeMode, RunContext, RunOptions, run_experiment};
use matrix::io::checkpoint::{CheckpointStore, FileCheckpointStore};
use matrix::io::config::{base_dir, load_config};
use matrix::io::display::{IndexExport, SummaryTable, render_summary};
use matrix::plugins::registry::Registry;

#[derive(Parser)]
#[command(
    name = "matrix-lab",
    version,
    about = "Run every dataset item against every variation combination and rank the results"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute an experiment, reusing a stored snapshot when it is still valid.
    Run {
        /// Experiment config (TOML).
        config: PathBuf,
        /// Fail unless a usable snapshot exists.
        #[arg(long, conflicts_with = "force")]
        resume: bool,
        /// Ignore any stored snapshot and recompute.
        #[arg(long)]
        force: bool,
        /// Snapshot path overriding `[checkpoint] path`.
        #[arg(long)]
        checkpoint: Option<PathBuf>,
        /// Skip the summary table on stdout.
        #[arg(long)]
        no_display: bool,
        /// Also write an index.json for dashboards.
        #[arg(long)]
        index: Option<PathBuf>,
        /// Exit non-zero when any pair failed.
        #[arg(long)]
        strict: bool,
    },
    /// Print the combinations a config enumerates.
    List {
        config: PathBuf,
    },
    /// Print the summary of a stored snapshot.
    Report {
        snapshot: PathBuf,
    },
    /// List registered plugin names.
    Plugins,
}

fn main() {
    matrix::logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            let code = err
                .downcast_ref::<EngineError>()
                .map_or(exit_codes::INVALID, EngineError::exit_code);
            std::process::exit(code);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            config,
            resume,
            force,
            checkpoint,
            no_display,
            index,
            strict,
        } => {
            let resume = if force {
                ResumeMode::Off
            } else if resume {
                ResumeMode::Required
            } else {
                ResumeMode::Auto
            };
            cmd_run(
                &config,
                RunOptions { resume, checkpoint },
                !no_display,
                index,
                strict,
            )
        }
        Command::List { config } => cmd_list(&config),
        Command::Report { snapshot } => cmd_report(&snapshot),
        Command::Plugins => cmd_plugins(),
    }
}

fn cmd_run(
    config_path: &Path,
    options: RunOptions,
    display: bool,
    index: Option<PathBuf>,
    strict: bool,
) -> Result<i32> {
    let config = load_config(config_path)?;
    let registry = Registry::with_builtins();
    let mut ctx = RunContext::from_config(&config, &base_dir(config_path), &registry, options)?
        .with_progress(|p| {
            debug!(
                batch = p.batch,
                completed = p.completed,
                batch_total = p.progress.total,
                "progress"
            );
        });
    if display {
        ctx = ctx.with_sink(Arc::new(SummaryTable));
    }
    if let Some(path) = index {
        ctx = ctx.with_sink(Arc::new(IndexExport::new(path)));
    }

    let report = run_experiment(&mut ctx)?;
    for warning in &report.warnings {
        eprintln!("warning: {warning}");
    }
    if report.cancelled {
        eprintln!("run cancelled; results are partial");
    }
    if strict && report.failed_pairs() > 0 {
        eprintln!("{} pair(s) failed", report.failed_pairs());
        return Ok(exit_codes::FAILED_PAIRS);
    }
    Ok(exit_codes::OK)
}

fn cmd_list(config_path: &Path) -> Result<i32> {
    let config = load_config(config_path)?;
    let combinations = config.variation_space().enumerate()?;
    for combination in &combinations {
        println!("[{}] {}", combination.index, combination.label());
    }
    Ok(exit_codes::OK)
}

fn cmd_report(snapshot_path: &Path) -> Result<i32> {
    let store = FileCheckpointStore::new(snapshot_path);
    let snapshot = store
        .load()?
        .with_context(|| format!("no snapshot at {}", snapshot_path.display()))?;
    print!("{}", render_summary(&snapshot));
    Ok(exit_codes::OK)
}

fn cmd_plugins() -> Result<i32> {
    for (kind, names) in Registry::with_builtins().names() {
        println!("{kind}: {}", names.join(", "));
    }
    Ok(exit_codes::OK)
}
