//! CLI argument definitions using clap derive macros.

use clap::{Args as ClapArgs, Parser, Subcommand};

use harvest_core::Provider;

/// Fetch API metadata and documents with rate limiting, retries and a
/// redacted per-run audit trail.
#[derive(Parser, Debug)]
#[command(name = "harvest")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one provider's pipeline and capture every attempt
    Run(RunArgs),
}

#[derive(ClapArgs, Debug, Clone)]
pub struct RunArgs {
    /// Data source: sec_edgar or nrc_adams_aps
    #[arg(long)]
    pub provider: Provider,

    /// Hit the real APIs instead of offline fixtures
    #[arg(long)]
    pub live: bool,

    /// Maximum planned items to process (1-1000)
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u16).range(1..=1000))]
    pub limit: u16,
}

impl Args {
    /// Default log level from flags; `RUST_LOG` still takes precedence.
    #[must_use]
    pub fn log_level(&self, app_debug: bool) -> &'static str {
        match self.verbose {
            0 if app_debug => "debug",
            0 if self.quiet => "error",
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}
