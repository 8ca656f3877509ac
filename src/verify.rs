//! Integrity verification of stored artifacts.
//!
//! Bundles go through `git bundle verify`; `.tar.gz` archives and LFS
//! sidecars are decompressed and every entry is read to the end. Either a
//! single file or every artifact below a directory can be checked.

use std::path::{Path, PathBuf};

use log::{error, info, warn};
use walkdir::WalkDir;

use crate::artifact::{verify_archive, ARCHIVE_EXTENSION};
use crate::error::{Error, Result};
use crate::git::GitOperations;

/// Result of checking one file.
#[derive(Debug)]
pub struct VerifiedArtifact {
    pub path: PathBuf,
    /// `None` when the artifact is intact.
    pub error: Option<String>,
}

impl VerifiedArtifact {
    pub fn is_valid(&self) -> bool {
        self.error.is_none()
    }
}

/// Outcome of a verification run.
#[derive(Debug, Default)]
pub struct VerifyReport {
    pub artifacts: Vec<VerifiedArtifact>,
}

impl VerifyReport {
    pub fn valid(&self) -> usize {
        self.artifacts.iter().filter(|a| a.is_valid()).count()
    }

    pub fn invalid(&self) -> usize {
        self.artifacts.len() - self.valid()
    }

    pub fn is_success(&self) -> bool {
        !self.artifacts.is_empty() && self.invalid() == 0
    }
}

fn is_artifact(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    name.ends_with(".bundle") || name.ends_with(&format!(".{ARCHIVE_EXTENSION}"))
}

/// Collects the artifacts to check below `path`, sorted.
pub fn find_artifacts(path: &Path) -> Result<Vec<PathBuf>> {
    if !path.exists() {
        return Err(Error::Verification {
            path: path.to_path_buf(),
            message: "path does not exist".to_string(),
        });
    }
    if path.is_file() {
        if !is_artifact(path) {
            return Err(Error::Verification {
                path: path.to_path_buf(),
                message: "not a .bundle or .tar.gz file".to_string(),
            });
        }
        return Ok(vec![path.to_path_buf()]);
    }

    let mut found = Vec::new();
    for entry in WalkDir::new(path).follow_links(false) {
        let entry = entry.map_err(|e| Error::Verification {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        if entry.file_type().is_file() && is_artifact(entry.path()) {
            found.push(entry.into_path());
        }
    }
    found.sort();
    Ok(found)
}

/// Verifies one artifact file.
pub fn verify_file(git: &dyn GitOperations, path: &Path) -> Result<()> {
    if path.extension().is_some_and(|ext| ext == "bundle") {
        git.verify_bundle(path)
    } else {
        verify_archive(path).map(|_| ())
    }
}

/// Verifies every artifact at or below `path`.
pub fn verify_path(git: &dyn GitOperations, path: &Path) -> Result<VerifyReport> {
    let files = find_artifacts(path)?;
    if files.is_empty() {
        warn!("[VERIFY] No artifacts found under {}", path.display());
    }

    let mut report = VerifyReport::default();
    for file in files {
        let error = match verify_file(git, &file) {
            Ok(()) => {
                info!("[VERIFY] OK {}", file.display());
                None
            }
            Err(e) => {
                error!("[VERIFY] INVALID {}: {}", file.display(), e);
                Some(e.to_string())
            }
        };
        report.artifacts.push(VerifiedArtifact { path: file, error });
    }
    Ok(report)
}
