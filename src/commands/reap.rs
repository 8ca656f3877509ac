//! Reap command implementation
//!
//! Removes per-task workspace directories left under the temp root by runs
//! that crashed or were killed. Only directories following the workspace
//! naming convention are touched.

use anyhow::Result;
use clap::Args;

use repo_backup::workspace::WorkspaceManager;

use super::{remove_empty_work_dirs, DestinationArgs};

/// Arguments for the reap command
#[derive(Args, Debug)]
pub struct ReapArgs {
    #[command(flatten)]
    pub destination: DestinationArgs,
}

/// Execute the reap command
pub fn execute(args: ReapArgs) -> Result<()> {
    let config = args.destination.resolve()?;
    let temp_root = config.temp_root();
    if !temp_root.is_dir() {
        println!("Nothing to reap: {} does not exist", temp_root.display());
        return Ok(());
    }

    let workspaces = WorkspaceManager::new(&temp_root)?;
    let reaped = workspaces.reap_stale()?;
    remove_empty_work_dirs(&config, &workspaces);
    println!("Reaped {} stale workspaces under {}", reaped, temp_root.display());
    Ok(())
}
