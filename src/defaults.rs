//! Default values for repo-backup configuration.
//!
//! This module provides centralized default values used across commands,
//! ensuring consistency and avoiding duplication.

use std::path::{Path, PathBuf};

/// Number of backup tasks run concurrently.
pub const DEFAULT_WORKERS: usize = 5;

/// Key prefix under which artifacts are uploaded.
pub const DEFAULT_S3_PREFIX: &str = "repos";

/// Object storage region.
pub const DEFAULT_REGION: &str = "us-west-2";

/// Name of the shared temp root created inside the work directory.
pub const TEMP_ROOT_NAME: &str = "repo-backup";

/// Work directory created inside a local destination.
pub const LOCAL_WORK_DIR_NAME: &str = "tmp";

/// Work directory used when no local destination is configured.
pub const FALLBACK_WORK_DIR: &str = "/var/tmp";

/// Environment variable naming a YAML configuration file.
pub const CONFIG_ENV: &str = "REPO_BACKUP_CONFIG";

/// Returns the default work directory.
///
/// With a local destination the work directory lives inside it
/// (`<local>/tmp`), so sealed artifacts are copied within one filesystem.
/// Otherwise `/var/tmp` is used.
pub fn default_work_dir(local_root: Option<&Path>) -> PathBuf {
    match local_root {
        Some(root) => root.join(LOCAL_WORK_DIR_NAME),
        None => PathBuf::from(FALLBACK_WORK_DIR),
    }
}
