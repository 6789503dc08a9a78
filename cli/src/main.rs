//! `forkline`: replay-first tracing and diffing for agentic workflows.
//!
//! Exit codes: 0 for `exact_match`, 1 for any other status or operational
//! error. Errors are one-line diagnostics on stderr.

#![forbid(unsafe_code)]

mod format;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use forkline_core::first_divergence::{
    find_first_divergence, DiffOptions, DivergenceStatus, ShowDiffs,
};
use forkline_store::SqliteStore;

#[derive(Parser)]
#[command(
    name = "forkline",
    about = "Forkline: replay-first tracing and diffing for agentic workflows"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compare two recorded runs and report the first divergence
    Diff {
        /// Run ID for baseline
        run_a: String,
        /// Run ID for comparison
        run_b: String,
        /// Resync window size
        #[arg(long, default_value_t = 10)]
        window: usize,
        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        format: Format,
        /// Which diffs to show
        #[arg(long, value_enum, default_value = "both")]
        show: Show,
        /// Canonicalization profile
        #[arg(long, value_enum, default_value = "strict")]
        canon: CanonProfile,
        /// Path to the SQLite database
        #[arg(long, default_value = "forkline.db")]
        db: PathBuf,
    },
    /// List recorded runs
    Runs {
        /// Path to the SQLite database
        #[arg(long, default_value = "forkline.db")]
        db: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Json,
    Text,
}

#[derive(Clone, Copy, ValueEnum)]
enum Show {
    Input,
    Output,
    Both,
}

impl From<Show> for ShowDiffs {
    fn from(show: Show) -> Self {
        match show {
            Show::Input => Self::Input,
            Show::Output => Self::Output,
            Show::Both => Self::Both,
        }
    }
}

/// Only the strict profile is defined.
#[derive(Clone, Copy, ValueEnum)]
enum CanonProfile {
    Strict,
}

fn main() -> ExitCode {
    match run(Cli::parse()) {
        Ok(code) => code,
        Err(message) => {
            eprintln!("error: {message}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode, String> {
    match cli.command {
        Command::Diff {
            run_a,
            run_b,
            window,
            format,
            show,
            canon: CanonProfile::Strict,
            db,
        } => cmd_diff(&run_a, &run_b, window, format, show, &db),
        Command::Runs { db } => cmd_runs(&db),
    }
}

fn cmd_diff(
    run_a: &str,
    run_b: &str,
    window: usize,
    format: Format,
    show: Show,
    db: &Path,
) -> Result<ExitCode, String> {
    let store = SqliteStore::open(db).map_err(|e| e.to_string())?;
    let load = |run_id: &str| -> Result<forkline_core::model::Run, String> {
        store
            .load_run(run_id)
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("run '{run_id}' not found in {}", db.display()))
    };
    let baseline = load(run_a)?;
    let comparison = load(run_b)?;

    let options = DiffOptions {
        window,
        show: show.into(),
        ..DiffOptions::default()
    };
    let result = find_first_divergence(&baseline, &comparison, &options);

    match format {
        Format::Json => println!("{}", format::format_json(&result)),
        Format::Text => println!("{}", format::format_text(&result)),
    }

    if result.status == DivergenceStatus::ExactMatch {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

fn cmd_runs(db: &Path) -> Result<ExitCode, String> {
    let store = SqliteStore::open(db).map_err(|e| e.to_string())?;
    let runs = store.list_runs().map_err(|e| e.to_string())?;
    if runs.is_empty() {
        println!("No runs recorded in {}", db.display());
        return Ok(ExitCode::SUCCESS);
    }
    for info in runs {
        println!(
            "{}  {}  steps={}  schema={}  forkline={}",
            info.run_id, info.created_at, info.step_count, info.schema_version,
            info.forkline_version
        );
    }
    Ok(ExitCode::SUCCESS)
}
