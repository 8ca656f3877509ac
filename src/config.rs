//! # Configuration
//!
//! This module defines `BackupConfig`, the immutable value that describes one
//! backup run, and the logic for building it.
//!
//! ## Precedence
//!
//! From lowest to highest:
//!
//! 1. Built-in defaults (see [`crate::defaults`]).
//! 2. An optional YAML configuration file.
//! 3. Command line flags and the environment variables bound to them.
//!
//! The resolved `BackupConfig` is handed to the catalog, the pipeline and the
//! scheduler at construction time; nothing below the command layer reads the
//! process environment.
//!
//! ## File Format
//!
//! ```yaml
//! work_dir: /var/tmp
//! method: bundle          # bundle | direct | archive
//! workers: 5
//! include_personal: false
//! platforms: [github, gitlab]
//! catalogs:
//!   - catalogs/github.yaml
//! local:
//!   path: /backups
//! remote:
//!   bucket: acme-repo-backups
//!   prefix: repos
//!   region: us-west-2
//!   profile: backup
//! ```
//!
//! ## Pattern Files
//!
//! A pattern file holds one selection pattern per line. Blank lines and
//! lines starting with `#` are ignored.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::artifact::ArtifactFormat;
use crate::defaults::{
    default_work_dir, DEFAULT_REGION, DEFAULT_S3_PREFIX, DEFAULT_WORKERS, TEMP_ROOT_NAME,
};
use crate::error::{Error, Result};

fn default_prefix() -> String {
    DEFAULT_S3_PREFIX.to_string()
}

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

/// Local filesystem destination settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocalConfig {
    pub path: PathBuf,
}

/// Object storage destination settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemoteConfig {
    pub bucket: String,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub profile: Option<String>,
}

/// The YAML configuration file. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub work_dir: Option<PathBuf>,
    pub method: Option<ArtifactFormat>,
    pub workers: Option<usize>,
    pub include_personal: Option<bool>,
    pub platforms: Vec<String>,
    pub catalogs: Vec<PathBuf>,
    pub local: Option<LocalConfig>,
    pub remote: Option<RemoteConfig>,
}

/// Values supplied on the command line or through bound environment
/// variables. `None` leaves the lower layer untouched.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub work_dir: Option<PathBuf>,
    pub method: Option<ArtifactFormat>,
    pub workers: Option<usize>,
    pub sequential: bool,
    pub include_personal: bool,
    pub platforms: Vec<String>,
    pub catalogs: Vec<PathBuf>,
    pub local_path: Option<PathBuf>,
    pub bucket: Option<String>,
    pub prefix: Option<String>,
    pub region: Option<String>,
    pub profile: Option<String>,
}

/// Which destinations a run writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationMode {
    Local,
    Remote,
    Both,
}

/// Resolved configuration of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct BackupConfig {
    pub work_dir: PathBuf,
    pub method: ArtifactFormat,
    pub workers: usize,
    pub include_personal: bool,
    /// Lower-case platform tags; empty means all.
    pub platforms: Vec<String>,
    pub catalogs: Vec<PathBuf>,
    pub local: Option<LocalConfig>,
    pub remote: Option<RemoteConfig>,
}

impl BackupConfig {
    /// Layers `overrides` on top of `file` on top of the defaults.
    pub fn resolve(file: ConfigFile, overrides: ConfigOverrides) -> Result<Self> {
        let local = match overrides.local_path {
            Some(path) => Some(LocalConfig { path }),
            None => file.local,
        };

        let remote = match (file.remote, overrides.bucket) {
            (Some(mut remote), bucket) => {
                if let Some(bucket) = bucket {
                    remote.bucket = bucket;
                }
                Some(remote)
            }
            (None, Some(bucket)) => Some(RemoteConfig {
                bucket,
                prefix: default_prefix(),
                region: default_region(),
                profile: None,
            }),
            (None, None) => None,
        };
        let remote = remote.map(|mut remote| {
            if let Some(prefix) = overrides.prefix {
                remote.prefix = prefix;
            }
            if let Some(region) = overrides.region {
                remote.region = region;
            }
            if overrides.profile.is_some() {
                remote.profile = overrides.profile;
            }
            remote
        });

        let workers = if overrides.sequential {
            1
        } else {
            overrides.workers.or(file.workers).unwrap_or(DEFAULT_WORKERS)
        };

        let platforms = if overrides.platforms.is_empty() {
            file.platforms
        } else {
            overrides.platforms
        };

        let catalogs = if overrides.catalogs.is_empty() {
            file.catalogs
        } else {
            overrides.catalogs
        };

        let work_dir = overrides
            .work_dir
            .or(file.work_dir)
            .unwrap_or_else(|| default_work_dir(local.as_ref().map(|l| l.path.as_path())));

        let config = Self {
            work_dir,
            method: overrides.method.or(file.method).unwrap_or_default(),
            workers,
            include_personal: overrides.include_personal || file.include_personal.unwrap_or(false),
            platforms: platforms
                .iter()
                .map(|p| p.trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
            catalogs,
            local,
            remote,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::ConfigParse {
                message: "workers must be at least 1".to_string(),
                hint: Some("use --sequential to run one task at a time".to_string()),
            });
        }
        if let Some(remote) = &self.remote {
            if remote.bucket.trim().is_empty() {
                return Err(Error::ConfigParse {
                    message: "remote bucket name is empty".to_string(),
                    hint: Some("set --bucket or AWS_S3_BUCKET".to_string()),
                });
            }
        }
        Ok(())
    }

    /// The configured destinations, or an error when there are none.
    pub fn destination_mode(&self) -> Result<DestinationMode> {
        match (&self.local, &self.remote) {
            (Some(_), Some(_)) => Ok(DestinationMode::Both),
            (Some(_), None) => Ok(DestinationMode::Local),
            (None, Some(_)) => Ok(DestinationMode::Remote),
            (None, None) => Err(Error::ConfigParse {
                message: "no backup destination configured".to_string(),
                hint: Some(
                    "set --local-path (LOCAL_BACKUP_PATH) and/or --bucket (AWS_S3_BUCKET)"
                        .to_string(),
                ),
            }),
        }
    }

    /// Shared root under which per-task workspaces are created.
    pub fn temp_root(&self) -> PathBuf {
        self.work_dir.join(TEMP_ROOT_NAME)
    }

    /// The work directory when it is the default one inside the local
    /// destination, which the tool creates and may remove once empty.
    pub fn owned_work_dir(&self) -> Option<&Path> {
        let local = self.local.as_ref()?;
        (self.work_dir == default_work_dir(Some(&local.path))).then_some(self.work_dir.as_path())
    }
}

/// Parses a YAML configuration file's content.
pub fn parse(yaml_content: &str) -> Result<ConfigFile> {
    if yaml_content.trim().is_empty() {
        return Ok(ConfigFile::default());
    }
    serde_yaml::from_str(yaml_content).map_err(|e| Error::ConfigParse {
        message: e.to_string(),
        hint: Some(
            "known keys: work_dir, method, workers, include_personal, platforms, catalogs, local, remote"
                .to_string(),
        ),
    })
}

/// Loads a YAML configuration file.
pub fn from_file<P: AsRef<Path>>(path: P) -> Result<ConfigFile> {
    let content = fs::read_to_string(path).map_err(Error::Io)?;
    parse(&content)
}

/// Patterns from a pattern file's content.
pub fn parse_patterns(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Reads a pattern file.
pub fn load_patterns_file<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|e| Error::ConfigParse {
        message: format!("cannot read pattern file {}: {}", path.display(), e),
        hint: None,
    })?;
    Ok(parse_patterns(&content))
}

/// Splits a comma-separated pattern list.
pub fn split_pattern_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}
