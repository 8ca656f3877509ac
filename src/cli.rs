//! CLI argument parsing and command dispatch

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::commands;

/// Repository Backup - Mirror hosted git repositories into local or object storage
#[derive(Parser, Debug)]
#[command(name = "repo-backup")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL", default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Back up repositories to the configured destinations
    Backup(commands::backup::BackupArgs),

    /// Verify the integrity of stored bundles and archives
    Verify(commands::verify::VerifyArgs),

    /// List stored backups
    List(commands::list::ListArgs),

    /// Remove workspaces left behind by interrupted runs
    Reap(commands::reap::ReapArgs),
}

impl Cli {
    /// Execute the CLI command
    pub fn execute(self) -> Result<()> {
        // RUST_LOG takes precedence over --log-level.
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&self.log_level))
            .format_timestamp_secs()
            .init();

        match self.command {
            Commands::Backup(args) => commands::backup::execute(args),
            Commands::Verify(args) => commands::verify::execute(args),
            Commands::List(args) => commands::list::execute(args),
            Commands::Reap(args) => commands::reap::execute(args),
        }
    }
}
