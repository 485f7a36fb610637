//! Batch CLI for materialization experiments.
//!
//! Two subcommands: `import` builds a baseline store from an NDJSON corpus,
//! `run` sweeps a budget schedule over a generated workload and writes
//! result artifacts. There is no service process; every invocation runs to
//! completion and exits.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use strata_advisor::{Dataset, ScoringMode};
use strata_store::DocumentStore;
use strata_workload::{ExperimentConfig, ExperimentDriver};
use tracing_subscriber::EnvFilter;

/// CLI entry point wrapper.
#[derive(Parser, Debug)]
#[command(name = "strata-workload")]
struct Args {
    #[command(subcommand)]
    cmd: Command,
}

/// Top-level CLI subcommands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Import an NDJSON corpus into a baseline store file.
    Import(ImportArgs),
    /// Run a materialization experiment against a baseline store.
    Run(RunArgs),
}

#[derive(Parser, Debug, Clone)]
struct ImportArgs {
    /// Newline-delimited JSON corpus, one document per line.
    #[arg(long)]
    data: PathBuf,

    /// Baseline store file to create (overwritten if present).
    #[arg(long, default_value = ".tmp/strata/baseline.duckdb")]
    baseline: PathBuf,
}

#[derive(Parser, Debug, Clone)]
struct RunArgs {
    /// Built-in dataset name. Ignored when --dataset-file is given.
    #[arg(long, default_value = "lineitem")]
    dataset: String,

    /// JSON dataset definition (catalog + queries + overrides).
    #[arg(long)]
    dataset_file: Option<PathBuf>,

    /// NDJSON corpus to import before running. When omitted, --baseline
    /// must point at a previously imported store.
    #[arg(long)]
    data: Option<PathBuf>,

    /// Baseline store file.
    #[arg(long, default_value = ".tmp/strata/baseline.duckdb")]
    baseline: PathBuf,

    /// Number of query invocations in the workload.
    #[arg(long, default_value_t = 500)]
    length: usize,

    /// Number of distinct queries in the majority set.
    #[arg(long, default_value_t = 4)]
    majority_size: usize,

    /// Fraction of the workload drawn from the majority set.
    #[arg(long, default_value_t = 0.8)]
    majority_fraction: f64,

    /// Workload generation seed.
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Timed iterations per measured query; the first is the discarded
    /// cold run.
    #[arg(long, default_value_t = 4)]
    iterations: usize,

    /// Non-decreasing materialization budget schedule.
    #[arg(long, value_delimiter = ',', default_value = "0,2,4,6")]
    budgets: Vec<usize>,

    /// Field scoring mode.
    #[arg(long, value_enum, default_value_t = ModeArg::Weighted)]
    mode: ModeArg,

    /// Output directory for result artifacts.
    #[arg(long, default_value = ".tmp/strata/results")]
    out: PathBuf,

    /// Keep per-step store copies instead of discarding them.
    #[arg(long)]
    keep_step_stores: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Frequency,
    Weighted,
}

impl From<ModeArg> for ScoringMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Frequency => Self::Frequency,
            ModeArg::Weighted => Self::Weighted,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            // Keep a practical default if `RUST_LOG` is absent or invalid.
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new("strata_workload=info,strata_store=info,strata_advisor=info,warn")
            }),
        )
        .init();

    let args = Args::parse();
    match args.cmd {
        Command::Import(args) => import(args),
        Command::Run(args) => run(args),
    }
}

fn import(args: ImportArgs) -> Result<()> {
    if let Some(parent) = args.baseline.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create dir {}", parent.display()))?;
    }
    let store = DocumentStore::import(&args.baseline, &args.data)
        .with_context(|| format!("import {}", args.data.display()))?;
    let rows = store.document_count()?;
    eprintln!("imported {rows} documents into {}", args.baseline.display());
    Ok(())
}

fn run(args: RunArgs) -> Result<()> {
    let dataset = match &args.dataset_file {
        Some(path) => Dataset::from_json_file(path)
            .with_context(|| format!("load dataset file {}", path.display()))?,
        None => Dataset::builtin(&args.dataset)
            .with_context(|| format!("resolve built-in dataset '{}'", args.dataset))?,
    };

    let config = ExperimentConfig {
        dataset: dataset.name.clone(),
        data: args.data,
        baseline: args.baseline,
        workload_length: args.length,
        majority_size: args.majority_size,
        majority_fraction: args.majority_fraction,
        seed: args.seed,
        iterations: args.iterations,
        budgets: args.budgets,
        mode: args.mode.into(),
        out_dir: args.out,
        keep_step_stores: args.keep_step_stores,
    };

    ExperimentDriver::new(config, dataset)?.run()
}
