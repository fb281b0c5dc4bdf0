//! Headless skirmish runner.
//!
//! # Usage
//!
//! ```bash
//! # Run one scenario and print the summary
//! cargo run -p skirmish_headless -- run scenarios/border_clash.ron
//!
//! # Override seed and length
//! cargo run -p skirmish_headless -- run scenarios/border_clash.ron --seed 42 --ticks 3600
//!
//! # Run several times and compare final hashes
//! cargo run -p skirmish_headless -- verify scenarios/border_clash.ron --runs 5
//! ```
//!
//! Logs go to stderr; `RUST_LOG` overrides the level picked by `--verbose`.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use skirmish_headless::{verify, Scenario, ScenarioError, ScenarioRunner};

#[derive(Parser)]
#[command(name = "skirmish_headless")]
#[command(about = "Headless skirmish runner for balance checks and CI")]
#[command(version)]
struct Cli {
    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pretty: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scenario once
    Run {
        /// Scenario file to load
        scenario: PathBuf,

        /// Override the scenario seed
        #[arg(long)]
        seed: Option<u64>,

        /// Override the tick limit
        #[arg(long)]
        ticks: Option<u64>,
    },

    /// Verify determinism by running the same scenario several times
    Verify {
        /// Scenario file to load
        scenario: PathBuf,

        /// Number of runs
        #[arg(short, long, default_value = "3")]
        runs: usize,

        /// Override the scenario seed
        #[arg(long)]
        seed: Option<u64>,

        /// Override the tick limit
        #[arg(long)]
        ticks: Option<u64>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // stdout is reserved for results.
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(true),
        )
        .with(filter)
        .init();

    let result = match cli.command {
        Commands::Run { scenario, seed, ticks } => cmd_run(&scenario, seed, ticks, cli.pretty),
        Commands::Verify {
            scenario,
            runs,
            seed,
            ticks,
        } => cmd_verify(&scenario, runs, seed, ticks, cli.pretty),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "run failed");
            ExitCode::FAILURE
        }
    }
}

fn load(path: &Path, seed: Option<u64>, ticks: Option<u64>) -> Result<Scenario, ScenarioError> {
    let mut scenario = Scenario::load(path)?;
    if let Some(seed) = seed {
        scenario = scenario.with_seed(seed);
    }
    if let Some(ticks) = ticks {
        scenario = scenario.with_max_ticks(ticks);
    }
    tracing::debug!(path = %path.display(), name = %scenario.name, "scenario file read");
    Ok(scenario)
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<(), ScenarioError> {
    let json = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{json}");
    Ok(())
}

/// Run a scenario once
fn cmd_run(path: &Path, seed: Option<u64>, ticks: Option<u64>, pretty: bool) -> Result<ExitCode, ScenarioError> {
    let scenario = load(path, seed, ticks)?;
    let summary = ScenarioRunner::new(scenario)?.run();
    print_json(&summary, pretty)?;
    Ok(ExitCode::SUCCESS)
}

/// Run a scenario several times and compare final hashes
fn cmd_verify(
    path: &Path,
    runs: usize,
    seed: Option<u64>,
    ticks: Option<u64>,
    pretty: bool,
) -> Result<ExitCode, ScenarioError> {
    let scenario = load(path, seed, ticks)?;
    tracing::info!(scenario = %scenario.name, runs, "verifying determinism");
    let report = verify(&scenario, runs)?;
    print_json(&report, pretty)?;
    Ok(if report.deterministic {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
