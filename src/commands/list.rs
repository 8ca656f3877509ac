//! # List Command Implementation
//!
//! Lists backups already stored in the configured destinations, newest
//! fingerprint first. This command is read-only.

use anyhow::{Context, Result};
use clap::Args;

use repo_backup::destination::Destination;
use repo_backup::listing::{list_local, list_remote, StoredArtifact};

use super::{build_destinations, format_size, DestinationArgs};

/// List stored backups
#[derive(Args, Debug)]
pub struct ListArgs {
    #[command(flatten)]
    pub destination: DestinationArgs,

    /// Only list backups of this platform.
    #[arg(long, value_name = "PLATFORM")]
    pub platform: Option<String>,

    /// Print JSON instead of a table.
    #[arg(long)]
    pub json: bool,
}

/// Execute the list command
pub fn execute(args: ListArgs) -> Result<()> {
    let config = args.destination.resolve()?;
    config.destination_mode()?;
    let destinations = build_destinations(&config)?;
    let platform = args.platform.as_deref();

    let mut sections: Vec<(String, Vec<StoredArtifact>)> = Vec::new();
    if let Some(local) = destinations.local() {
        let artifacts = list_local(local.root(), platform)
            .with_context(|| format!("Failed to list {}", local.describe()))?;
        sections.push((local.describe(), artifacts));
    }
    if let Some(remote) = destinations.remote() {
        let artifacts = list_remote(remote.store().as_ref(), remote.prefix(), platform)
            .with_context(|| format!("Failed to list {}", remote.describe()))?;
        sections.push((remote.describe(), artifacts));
    }

    if args.json {
        let all: Vec<&StoredArtifact> = sections.iter().flat_map(|(_, a)| a.iter()).collect();
        println!("{}", serde_json::to_string_pretty(&all)?);
        return Ok(());
    }

    for (location, artifacts) in &sections {
        println!("{} ({} artifacts)", location, artifacts.len());
        for artifact in artifacts {
            println!(
                "  {:<10} {:<20} {:<30} {}  {:>10}",
                artifact.platform,
                artifact.owner,
                artifact.name,
                artifact.fingerprint,
                format_size(artifact.size)
            );
        }
    }
    Ok(())
}
