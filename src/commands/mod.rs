//! # CLI Command Implementations
//!
//! This module contains the implementation for each subcommand of the
//! `repo-backup` command-line tool. Each subcommand is defined in its own file.
//!
//! ## Structure
//!
//! Each command module contains:
//! - An `Args` struct that defines the command-specific arguments and options,
//!   derived using `clap`.
//! - An `execute` function that takes the parsed `Args` and performs the
//!   command's logic by calling into the `repo_backup` library.
//!
//! Destination and configuration flags shared by several commands live in
//! [`DestinationArgs`].

pub mod backup;
pub mod list;
pub mod reap;
pub mod verify;

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use log::info;

use repo_backup::config::{self, BackupConfig, ConfigFile, ConfigOverrides};
use repo_backup::defaults::CONFIG_ENV;
use repo_backup::destination::{
    AwsCliStore, DestinationSet, LocalDestination, ObjectStorageDestination,
};
use repo_backup::workspace::WorkspaceManager;

/// Configuration file and destination flags.
#[derive(Args, Debug, Clone, Default)]
pub struct DestinationArgs {
    /// YAML configuration file.
    #[arg(short, long, value_name = "FILE", env = CONFIG_ENV)]
    pub config: Option<PathBuf>,

    /// Local backup root.
    #[arg(long, value_name = "DIR", env = "LOCAL_BACKUP_PATH")]
    pub local_path: Option<PathBuf>,

    /// Object storage bucket.
    #[arg(long, value_name = "NAME", env = "AWS_S3_BUCKET")]
    pub bucket: Option<String>,

    /// Key prefix inside the bucket (default: repos).
    #[arg(long, value_name = "PREFIX", env = "S3_PREFIX")]
    pub prefix: Option<String>,

    /// Object storage region (default: us-west-2).
    #[arg(long, value_name = "REGION", env = "AWS_REGION")]
    pub region: Option<String>,

    /// Named AWS CLI profile.
    #[arg(long, value_name = "PROFILE", env = "AWS_PROFILE")]
    pub profile: Option<String>,

    /// Directory for temporary clones
    /// (default: <local-path>/tmp, or /var/tmp without a local destination).
    #[arg(long, value_name = "DIR", env = "WORK_DIR")]
    pub work_dir: Option<PathBuf>,
}

impl DestinationArgs {
    /// The configuration file, or an empty one when none was given.
    pub fn config_file(&self) -> Result<ConfigFile> {
        match &self.config {
            Some(path) => config::from_file(path)
                .with_context(|| format!("Failed to load config from {}", path.display())),
            None => Ok(ConfigFile::default()),
        }
    }

    /// Overrides carrying only the destination flags.
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            work_dir: self.work_dir.clone(),
            local_path: self.local_path.clone(),
            bucket: self.bucket.clone(),
            prefix: self.prefix.clone(),
            region: self.region.clone(),
            profile: self.profile.clone(),
            ..Default::default()
        }
    }

    /// Resolves the configuration with only the destination flags applied.
    pub fn resolve(&self) -> Result<BackupConfig> {
        Ok(BackupConfig::resolve(self.config_file()?, self.overrides())?)
    }
}

/// Builds the destinations named by `config`, creating the local root.
pub fn build_destinations(config: &BackupConfig) -> Result<DestinationSet> {
    let local = match &config.local {
        Some(local) => {
            fs::create_dir_all(&local.path).with_context(|| {
                format!("Failed to create backup directory {}", local.path.display())
            })?;
            Some(LocalDestination::new(&local.path))
        }
        None => None,
    };

    let remote = config.remote.as_ref().map(|remote| {
        let store = AwsCliStore::new(&remote.bucket, &remote.region, remote.profile.as_deref());
        ObjectStorageDestination::new(Arc::new(store), &remote.prefix)
    });

    Ok(DestinationSet::new(local, remote))
}

/// Removes the temp root once empty, and the default `<local>/tmp` work
/// directory with it.
pub fn remove_empty_work_dirs(config: &BackupConfig, workspaces: &WorkspaceManager) {
    if !workspaces.remove_root_if_empty() {
        return;
    }
    if let Some(work_dir) = config.owned_work_dir() {
        if fs::remove_dir(work_dir).is_ok() {
            info!("[CLEANUP] Removed empty work directory {}", work_dir.display());
        }
    }
}

/// Human readable byte count.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}
