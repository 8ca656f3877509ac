//! # Repository Backup CLI
//!
//! This is the binary entry point for the `repo-backup` command-line tool.
//!
//! Its primary responsibilities are:
//! - Parsing command-line arguments using `clap`.
//! - Initialising logging.
//! - Executing the selected command and mapping its result to an exit code.
//!
//! The backup engine lives in the `repo_backup` library crate; the binary is a
//! thin wrapper around it.

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    // Usage errors raised after parsing keep clap's exit code.
    cli.execute().map_err(|e| match e.downcast::<clap::Error>() {
        Ok(usage) => usage.exit(),
        Err(e) => e,
    })
}
