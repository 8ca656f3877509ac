//! Verify command implementation
//!
//! Checks stored artifacts independently of the backup path: bundles with
//! `git bundle verify`, `.tar.gz` archives by reading every entry.

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Args;

use repo_backup::git::SystemGit;
use repo_backup::verify::verify_path;

/// Arguments for the verify command
#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// A `.bundle` / `.tar.gz` file, or a directory to search recursively.
    #[arg(value_name = "PATH")]
    pub path: PathBuf,

    /// Only report failures.
    #[arg(short, long)]
    pub quiet: bool,
}

/// Execute the verify command
pub fn execute(args: VerifyArgs) -> Result<()> {
    let report = verify_path(&SystemGit, &args.path)?;

    if report.artifacts.is_empty() {
        bail!("No backup artifacts found at {}", args.path.display());
    }

    for artifact in &report.artifacts {
        match &artifact.error {
            None if !args.quiet => println!("OK      {}", artifact.path.display()),
            None => {}
            Some(error) => println!("INVALID {}: {}", artifact.path.display(), error),
        }
    }
    if !args.quiet {
        println!(
            "{} valid, {} invalid",
            report.valid(),
            report.invalid()
        );
    }

    if !report.is_success() {
        bail!("{} of {} artifacts failed verification", report.invalid(), report.artifacts.len());
    }
    Ok(())
}
