//! CLI entry point for harvest.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::Parser;
use harvest_core::{RunOptions, Settings, build_run_dir, execute};
use tracing::{debug, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

mod cli;

use cli::{Args, Command};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();
    let settings = Settings::from_env()?;

    let Command::Run(run) = &args.command;
    let run_dir = build_run_dir(&settings.run_dir, run.provider.name())?;
    let log_path = run_dir.join("run.log");
    init_tracing(args.log_level(settings.debug), &log_path)?;

    debug!(?args, ?settings, "CLI arguments parsed");
    info!(run_dir = %run_dir.display(), "harvest starting");
    report_line(&log_path, &format!("run_dir={}", run_dir.display()));

    let options = RunOptions {
        provider: run.provider,
        live: run.live,
        limit: usize::from(run.limit),
    };
    let report = execute(&settings, options, &run_dir)
        .await
        .with_context(|| format!("run failed; see {}", run_dir.join("error.txt").display()))?;

    report_line(
        &log_path,
        &format!(
            "provider={} live={} responses={} artifacts={}",
            options.provider, options.live, report.outcome.responses, report.outcome.artifacts
        ),
    );
    Ok(())
}

/// Prints `line` to stdout and appends it to the run transcript.
fn report_line(log_path: &Path, line: &str) {
    println!("{line}");
    let appended = OpenOptions::new()
        .append(true)
        .open(log_path)
        .and_then(|mut file| writeln!(file, "{line}"));
    if let Err(e) = appended {
        warn!(error = %e, path = %log_path.display(), "failed to append to run.log");
    }
}

/// Logs to stderr and to `run.log` in the run directory.
///
/// The file is opened in append mode so stdout lines written by
/// [`report_line`] interleave with log records instead of overwriting them.
///
/// Priority: `RUST_LOG` > `APP_DEBUG`/`--verbose` > `--quiet` > info.
fn init_tracing(default_level: &str, log_path: &Path) -> Result<()> {
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .with_context(|| format!("failed to create {}", log_path.display()))?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(log_file)),
        )
        .try_init()
        .context("failed to initialize logging")
}
