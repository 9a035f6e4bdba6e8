//! Tally: keeps catalog download counts in a GitHub repository in step
//! with the authoritative counts in a document store.
//!
//! # Usage
//!
//! ```text
//! tally init [--force]
//! tally config
//! tally run [--kind applications|themes] [--dry-run] [--fail-fast] [--json]
//! tally diff <kind>
//! tally daemon [--once] [--interval <secs>] [--dry-run]
//! ```
//!
//! Every command accepts `--config <path>` (default `~/.tally/config.yaml`)
//! and `--log-json`.

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    config::ConfigArgs, daemon::DaemonArgs, diff::DiffArgs, init::InitArgs, run::RunArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "tally",
    version,
    about = "Reconcile catalog download counts against the authoritative store",
    long_about = None,
)]
struct Cli {
    /// Config file to use instead of ~/.tally/config.yaml.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a starter config file.
    Init(InitArgs),

    /// Show the resolved configuration with secrets redacted.
    Config(ConfigArgs),

    /// Reconcile and commit download counts once.
    Run(RunArgs),

    /// Show the unified diff a run would commit for one dataset.
    Diff(DiffArgs),

    /// Run on the configured schedule until interrupted.
    Daemon(DaemonArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    let global = commands::Global {
        config: cli.config,
        log_json: cli.log_json,
    };
    match cli.command {
        Commands::Init(args) => args.run(&global),
        Commands::Config(args) => args.run(&global),
        Commands::Run(args) => args.run(&global),
        Commands::Diff(args) => args.run(&global),
        Commands::Daemon(args) => args.run(&global),
    }
}
