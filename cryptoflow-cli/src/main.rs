//! cryptoflow CLI: run, serve and preview the CoinCap ETL.
//!
//! Commands:
//! - `run`: fetch, transform and load once
//! - `serve`: run now and then on a fixed interval under a deployment name
//! - `preview`: fetch and transform only; print tables, optionally export Parquet

mod logging;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cryptoflow_core::export::export_parquet;
use cryptoflow_core::pipeline::extract;
use cryptoflow_core::{CoinCapClient, Config, Pipeline, PostgresLoader, RunReport};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{error, info};

#[derive(Parser)]
#[command(
    name = "cryptoflow",
    about = "cryptoflow: CoinCap market data ETL into PostgreSQL"
)]
struct Cli {
    /// Path to a TOML config file. Defaults to ./cryptoflow.toml when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(long, short, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, transform and load all four resources once.
    Run,
    /// Run the pipeline now and then repeatedly on an interval.
    Serve {
        /// Deployment name attached to every scheduled run's logs.
        #[arg(long, default_value = "first-deployment")]
        name: String,

        /// Seconds between run starts.
        #[arg(long, default_value_t = 3600)]
        interval_secs: u64,

        /// Stop after this many runs.
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        max_runs: Option<u64>,
    },
    /// Fetch and transform without loading; print each table.
    Preview {
        /// Also write each table to `<dir>/<table>.parquet`.
        #[arg(long)]
        export: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose)?;

    let config = Config::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_once(&config),
        Commands::Serve {
            name,
            interval_secs,
            max_runs,
        } => run_serve(&config, &name, Duration::from_secs(interval_secs), max_runs),
        Commands::Preview { export } => run_preview(&config, export.as_deref()),
    }
}

fn build_pipeline(config: &Config) -> Result<Pipeline<CoinCapClient, PostgresLoader>> {
    let source = CoinCapClient::new(&config.source).context("creating CoinCap client")?;
    let sink = PostgresLoader::new(&config.database).context("configuring database")?;
    Ok(Pipeline::new(source, sink))
}

fn run_once(config: &Config) -> Result<()> {
    let pipeline = build_pipeline(config)?;
    let report = pipeline.run()?;
    print_report(&report);
    Ok(())
}

fn run_serve(config: &Config, name: &str, interval: Duration, max_runs: Option<u64>) -> Result<()> {
    let pipeline = build_pipeline(config)?;
    info!(deployment = name, interval_secs = interval.as_secs(), "serving deployment");

    let mut runs: u64 = 0;
    loop {
        runs += 1;
        let started = Instant::now();
        info!(deployment = name, run = runs, "starting scheduled run");

        match pipeline.run() {
            Ok(report) => print_report(&report),
            Err(e) => error!(deployment = name, run = runs, "run failed: {e}"),
        }

        if max_runs.is_some_and(|max| runs >= max) {
            info!(deployment = name, runs, "reached max runs, stopping");
            return Ok(());
        }
        std::thread::sleep(next_delay(interval, started.elapsed()));
    }
}

/// Time left until the next run start. A run that overran starts the next
/// one immediately.
fn next_delay(interval: Duration, elapsed: Duration) -> Duration {
    interval.saturating_sub(elapsed)
}

fn run_preview(config: &Config, export_dir: Option<&Path>) -> Result<()> {
    let source = CoinCapClient::new(&config.source).context("creating CoinCap client")?;
    let batches = extract(&source)?;

    for batch in &batches {
        println!("\n=== {} ({} rows) ===", batch.kind, batch.height());
        println!("{}", batch.frame);
        let extra = batch.passthrough_columns();
        if !extra.is_empty() {
            println!("passthrough columns (not loaded): {}", extra.join(", "));
        }
    }

    if let Some(dir) = export_dir {
        let paths = export_parquet(&batches, dir)
            .with_context(|| format!("exporting to {}", dir.display()))?;
        for path in paths {
            println!("Exported: {}", path.display());
        }
    }

    Ok(())
}

fn print_report(report: &RunReport) {
    println!("\n=== Run Summary ===");
    println!("Captured at: {}", report.captured_at);
    println!("{:<10} {:>8} {:>9} {:>8}", "table", "fetched", "inserted", "skipped");
    for kind in &report.kinds {
        println!(
            "{:<10} {:>8} {:>9} {:>8}",
            kind.kind.to_string(),
            kind.fetched,
            kind.inserted,
            kind.skipped()
        );
    }
    println!("Total inserted: {}", report.total_inserted());
}
