//! # Backup Artifacts
//!
//! This module turns a repository mirror into sealed, fingerprinted backup
//! artifacts.
//!
//! ## Fingerprints
//!
//! The idempotency key of a backup is the commit time of the most recent
//! commit reachable from any ref, formatted as `YYYYMMDD_HHMMSS` in the
//! committer's own offset. Two artifacts with the same fingerprint are
//! considered identical, which is what lets a re-run skip repositories that
//! did not change.
//!
//! ## Naming
//!
//! | Artifact | File name |
//! |---|---|
//! | bundle | `<name>_<fingerprint>.bundle` |
//! | archive | `<name>_<fingerprint>.tar.gz` (one top-level `<name>/` directory) |
//! | LFS sidecar | `<name>_<fingerprint>_lfs.tar.gz` (rooted at `lfs/objects`) |
//!
//! ## Building
//!
//! `ArtifactBuilder::build` drives one repository through clone →
//! fingerprint → existence check → LFS → seal. Writing the sealed files to
//! their destinations is the caller's job.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDateTime};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::destination::{DestinationSet, WritePlan};
use crate::error::{Error, Result};
use crate::git::{uses_lfs, GitOperations};
use crate::repository::RepositoryDescriptor;
use crate::workspace::{sanitize_component, WorkspaceHandle};

/// Format used when formatting a commit time into a fingerprint.
pub const FINGERPRINT_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Extension of gzip-compressed tar archives.
pub const ARCHIVE_EXTENSION: &str = "tar.gz";

/// Path inside the mirror, and inside the sidecar, holding LFS objects.
pub const LFS_OBJECTS_DIR: &str = "lfs/objects";

/// How the primary artifact is sealed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactFormat {
    /// Self-contained all-refs `git bundle`.
    #[default]
    #[serde(alias = "direct")]
    Bundle,
    /// gzip-compressed tar of the whole bare mirror.
    Archive,
}

impl ArtifactFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ArtifactFormat::Bundle => "bundle",
            ArtifactFormat::Archive => ARCHIVE_EXTENSION,
        }
    }
}

impl FromStr for ArtifactFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bundle" | "direct" => Ok(ArtifactFormat::Bundle),
            "archive" => Ok(ArtifactFormat::Archive),
            other => Err(format!(
                "unknown backup method '{other}' (expected bundle, direct or archive)"
            )),
        }
    }
}

impl fmt::Display for ArtifactFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactFormat::Bundle => write!(f, "bundle"),
            ArtifactFormat::Archive => write!(f, "archive"),
        }
    }
}

/// Idempotency key derived from the latest commit time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Formats a commit time, keeping the committer's offset.
    pub fn from_commit_time(time: &DateTime<FixedOffset>) -> Self {
        Self(time.format(FINGERPRINT_FORMAT).to_string())
    }

    /// Accepts a string already in `YYYYMMDD_HHMMSS` form.
    pub fn parse(text: &str) -> Option<Self> {
        if text.len() != 15 {
            return None;
        }
        NaiveDateTime::parse_from_str(text, FINGERPRINT_FORMAT)
            .ok()
            .map(|_| Self(text.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Deterministic identity of one artifact: `(platform, owner, name,
/// fingerprint, format)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactKey {
    pub platform: String,
    pub owner: String,
    pub name: String,
    pub fingerprint: Fingerprint,
    pub format: ArtifactFormat,
}

impl ArtifactKey {
    pub fn new(repo: &RepositoryDescriptor, fingerprint: Fingerprint, format: ArtifactFormat) -> Self {
        Self {
            platform: repo.platform.clone(),
            owner: repo.owner.clone(),
            name: repo.name.clone(),
            fingerprint,
            format,
        }
    }

    /// `<name>_<fingerprint>.<ext>`
    pub fn file_name(&self) -> String {
        format!("{}_{}.{}", self.name, self.fingerprint, self.format.extension())
    }

    /// `<name>_<fingerprint>_lfs.tar.gz`
    pub fn sidecar_file_name(&self) -> String {
        format!("{}_{}_lfs.{}", self.name, self.fingerprint, ARCHIVE_EXTENSION)
    }

    /// `<platform>/<owner>`, relative to a destination root.
    pub fn directory(&self) -> PathBuf {
        PathBuf::from(&self.platform).join(&self.owner)
    }

    /// `<prefix>/<platform>/<owner>/<file_name>`
    pub fn object_key(&self, prefix: &str) -> String {
        join_key(prefix, &self.platform, &self.owner, &self.file_name())
    }

    /// `<prefix>/<platform>/<owner>/<sidecar_file_name>`
    pub fn sidecar_object_key(&self, prefix: &str) -> String {
        join_key(prefix, &self.platform, &self.owner, &self.sidecar_file_name())
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.platform, self.owner, self.file_name())
    }
}

fn join_key(prefix: &str, platform: &str, owner: &str, file: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        format!("{platform}/{owner}/{file}")
    } else {
        format!("{prefix}/{platform}/{owner}/{file}")
    }
}

/// Splits an artifact file name into `(name, fingerprint, is_sidecar)`.
///
/// Returns `None` for files that do not follow the artifact naming scheme.
pub fn parse_artifact_file_name(file_name: &str) -> Option<(String, Fingerprint, ArtifactKind)> {
    let (stem, kind) = if let Some(stem) = file_name.strip_suffix("_lfs.tar.gz") {
        (stem, ArtifactKind::LfsSidecar)
    } else if let Some(stem) = file_name.strip_suffix(".tar.gz") {
        (stem, ArtifactKind::Archive)
    } else if let Some(stem) = file_name.strip_suffix(".bundle") {
        (stem, ArtifactKind::Bundle)
    } else {
        return None;
    };

    // The fingerprint itself contains one underscore: NAME_YYYYMMDD_HHMMSS.
    if stem.len() < 17 || !stem.is_char_boundary(stem.len() - 16) {
        return None;
    }
    let (name, rest) = stem.split_at(stem.len() - 16);
    let fingerprint = Fingerprint::parse(rest.strip_prefix('_')?)?;
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), fingerprint, kind))
}

/// Kind of a stored artifact file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Bundle,
    Archive,
    LfsSidecar,
}

/// Sealed files of one repository, ready to be written to destinations.
#[derive(Debug, Clone)]
pub struct SealedArtifact {
    pub key: ArtifactKey,
    /// The bundle or archive.
    pub primary: PathBuf,
    /// LFS object archive, present when LFS objects were fetched.
    pub lfs_sidecar: Option<PathBuf>,
}

/// What the builder produced for one repository.
#[derive(Debug)]
pub enum BuildOutcome {
    /// Fresh artifacts were sealed inside the workspace.
    Sealed(SealedArtifact),
    /// An artifact already stored locally can be copied to the remaining
    /// destinations without sealing again.
    Reusable(SealedArtifact),
    /// The repository has no commits.
    EmptySkip,
    /// Every destination already holds this fingerprint.
    AlreadyExists(ArtifactKey),
}

/// Clones, fingerprints and seals repositories.
pub struct ArtifactBuilder {
    git: Arc<dyn GitOperations>,
    format: ArtifactFormat,
}

impl ArtifactBuilder {
    pub fn new(git: Arc<dyn GitOperations>, format: ArtifactFormat) -> Self {
        Self { git, format }
    }

    pub fn format(&self) -> ArtifactFormat {
        self.format
    }

    /// Runs clone → fingerprint → existence check → LFS → seal for `repo`.
    ///
    /// Errors are task failures; the caller owns the workspace and releases
    /// it whatever the outcome.
    pub fn build(
        &self,
        repo: &RepositoryDescriptor,
        workspace: &WorkspaceHandle,
        destinations: &DestinationSet,
    ) -> Result<BuildOutcome> {
        let mirror = workspace.join(format!("{}.git", sanitize_component(&repo.name)));

        info!("[BACKUP] Cloning {}...", repo);
        self.git.clone_mirror(&repo.clone_url, &mirror)?;

        let Some(commit_time) = self.git.latest_commit_time(&mirror)? else {
            info!("[SKIP] Skipping {} - repository is empty (no commits)", repo);
            return Ok(BuildOutcome::EmptySkip);
        };
        let fingerprint = Fingerprint::from_commit_time(&commit_time);
        let key = ArtifactKey::new(repo, fingerprint, self.format);
        debug!("[BACKUP] Fingerprint for {} is {}", repo, key.fingerprint);

        match destinations.plan(&key)? {
            WritePlan::UpToDate => {
                info!(
                    "[SKIP] Backup already exists for {} with commit date {}",
                    repo, key.fingerprint
                );
                return Ok(BuildOutcome::AlreadyExists(key));
            }
            WritePlan::Reuse(existing) => {
                info!(
                    "[SMART] Reusing local artifact {} for {}",
                    existing.primary.display(),
                    repo
                );
                return Ok(BuildOutcome::Reusable(existing));
            }
            WritePlan::Seal => {}
        }

        let lfs = self.fetch_lfs_if_needed(repo, &mirror)?;

        let primary = workspace.join(key.file_name());
        match self.format {
            ArtifactFormat::Bundle => {
                info!("[BUNDLE] Creating bundle for {}...", repo);
                self.git.create_bundle(&mirror, &primary)?;
            }
            ArtifactFormat::Archive => {
                info!("[ARCHIVE] Creating archive for {}...", repo);
                archive_directory(&mirror, &repo.name, &primary)?;
            }
        }

        let lfs_objects = mirror.join(LFS_OBJECTS_DIR);
        let lfs_sidecar = if lfs && lfs_objects.is_dir() {
            let sidecar = workspace.join(key.sidecar_file_name());
            info!("[LFS] Archiving LFS objects for {}...", repo);
            archive_directory(&lfs_objects, LFS_OBJECTS_DIR, &sidecar)?;
            Some(sidecar)
        } else {
            None
        };

        Ok(BuildOutcome::Sealed(SealedArtifact {
            key,
            primary,
            lfs_sidecar,
        }))
    }

    /// Returns whether LFS objects were fetched into the mirror.
    fn fetch_lfs_if_needed(&self, repo: &RepositoryDescriptor, mirror: &Path) -> Result<bool> {
        let flagged = self
            .git
            .read_head_file(mirror, ".gitattributes")?
            .map(|attributes| uses_lfs(&attributes))
            .unwrap_or(false);
        if !flagged {
            return Ok(false);
        }

        if !self.git.lfs_available() {
            return Err(Error::LfsMissing {
                repo: repo.full_name(),
            });
        }

        info!("[LFS] Fetching LFS objects for {}...", repo);
        self.git.lfs_fetch_all(mirror)?;
        Ok(true)
    }
}

/// Writes `source` into a gzip-compressed tar at `output`, with every entry
/// placed under `root` inside the archive. Returns the archive size.
pub fn archive_directory(source: &Path, root: &str, output: &Path) -> Result<u64> {
    let file = File::create(output)?;
    let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);
    builder.append_dir_all(root, source)?;
    let encoder = builder.into_inner()?;
    let mut writer = encoder.finish()?;
    io::Write::flush(&mut writer)?;
    drop(writer);
    Ok(fs::metadata(output)?.len())
}

/// Reads every entry of a gzip-compressed tar, returning the entry count.
///
/// Any truncation or corruption surfaces as an error.
pub fn verify_archive(path: &Path) -> Result<usize> {
    let file = File::open(path)?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    let mut count = 0;
    for entry in archive.entries()? {
        let mut entry = entry?;
        io::copy(&mut entry, &mut io::sink())?;
        count += 1;
    }
    if count == 0 {
        return Err(Error::Verification {
            path: path.to_path_buf(),
            message: "archive contains no entries".to_string(),
        });
    }
    Ok(count)
}
