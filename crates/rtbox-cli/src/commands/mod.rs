//! CLI command definitions and dispatch.

pub mod ledger;
pub mod state;
pub mod stats;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use rtbox_common::config::RuntimeConfig;
use rtbox_common::constants::DEFAULT_CONFIG_FILE;

/// rtbox: diagnostics for real-time cgroups and container state.
#[derive(Parser, Debug)]
#[command(name = "rtbox", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Path to the runtime configuration file.
    #[arg(long, global = true, env = "RTBOX_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Print JSON instead of tables.
    #[arg(long, global = true)]
    pub json: bool,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show the CFS throttling counters of a cgroup.
    Stats(stats::StatsArgs),
    /// Inspect real-time runtime ledgers.
    Ledger(ledger::LedgerArgs),
    /// Show the saved state of a container.
    State(state::StateArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded or the command
/// fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    let config = RuntimeConfig::load(&cli.config)?;
    match cli.command {
        Command::Stats(args) => stats::execute(&args, &config, cli.json),
        Command::Ledger(args) => ledger::execute(args, &config, cli.json),
        Command::State(args) => state::execute(&args, &config, cli.json),
    }
}

/// Resolves a cgroup directory given on the command line. Relative paths
/// are taken below the cpu controller mount.
#[must_use]
pub fn resolve_cgroup(config: &RuntimeConfig, dir: &Path) -> PathBuf {
    if dir.is_absolute() {
        dir.to_path_buf()
    } else {
        config.cpu_mount().join(dir)
    }
}
