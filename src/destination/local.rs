//! Local filesystem destination.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::artifact::{ArtifactKey, SealedArtifact};
use crate::destination::Destination;
use crate::error::Result;
use crate::repository::RepositoryDescriptor;

const PARTIAL_SUFFIX: &str = ".partial";

/// Stores artifacts at `<root>/<platform>/<owner>/<file>`.
#[derive(Debug, Clone)]
pub struct LocalDestination {
    root: PathBuf,
}

impl LocalDestination {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &ArtifactKey) -> PathBuf {
        self.root.join(key.directory()).join(key.file_name())
    }

    pub fn sidecar_path_for(&self, key: &ArtifactKey) -> PathBuf {
        self.root.join(key.directory()).join(key.sidecar_file_name())
    }

    /// The stored artifact for `key`, as a write source for other destinations.
    pub fn existing(&self, key: &ArtifactKey) -> Option<SealedArtifact> {
        let primary = self.path_for(key);
        if !primary.is_file() {
            return None;
        }
        let sidecar = self.sidecar_path_for(key);
        Some(SealedArtifact {
            key: key.clone(),
            primary,
            lfs_sidecar: sidecar.is_file().then_some(sidecar),
        })
    }
}

impl Destination for LocalDestination {
    fn describe(&self) -> String {
        self.root.display().to_string()
    }

    fn exists(&self, key: &ArtifactKey) -> Result<bool> {
        Ok(self.path_for(key).is_file())
    }

    fn write(&self, artifact: &SealedArtifact, _repo: &RepositoryDescriptor) -> Result<()> {
        let target = self.path_for(&artifact.key);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        // The primary file lands last: its presence marks a complete backup.
        if let Some(sidecar) = &artifact.lfs_sidecar {
            copy_into_place(sidecar, &self.sidecar_path_for(&artifact.key))?;
        }
        copy_into_place(&artifact.primary, &target)?;

        let size = fs::metadata(&target).map(|m| m.len()).unwrap_or(0);
        info!(
            "[LOCAL] Saved {} ({:.1} MB)",
            target.display(),
            size as f64 / (1024.0 * 1024.0)
        );
        Ok(())
    }
}

/// Copies `source` to `target` through a `.partial` file and a rename, so
/// `target` only ever holds complete content.
fn copy_into_place(source: &Path, target: &Path) -> Result<()> {
    if source == target {
        return Ok(());
    }
    let mut partial = target.as_os_str().to_owned();
    partial.push(PARTIAL_SUFFIX);
    let partial = PathBuf::from(partial);

    let result = fs::copy(source, &partial).and_then(|_| fs::rename(&partial, target));
    if let Err(e) = result {
        debug!("[LOCAL] Removing partial file {}", partial.display());
        match fs::remove_file(&partial) {
            Ok(()) => {}
            Err(remove) if remove.kind() == io::ErrorKind::NotFound => {}
            Err(remove) => debug!("[LOCAL] Could not remove {}: {}", partial.display(), remove),
        }
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{ArtifactFormat, Fingerprint};
    use tempfile::TempDir;

    fn repo() -> RepositoryDescriptor {
        RepositoryDescriptor::new("github", "acme", "app", "https://github.com/acme/app.git")
    }

    fn key() -> ArtifactKey {
        ArtifactKey::new(
            &repo(),
            Fingerprint::parse("20240101_100000").unwrap(),
            ArtifactFormat::Bundle,
        )
    }

    #[test]
    fn test_local_layout() {
        let dest = LocalDestination::new("/backups");
        assert_eq!(
            dest.path_for(&key()),
            PathBuf::from("/backups/github/acme/app_20240101_100000.bundle")
        );
        assert_eq!(
            dest.sidecar_path_for(&key()),
            PathBuf::from("/backups/github/acme/app_20240101_100000_lfs.tar.gz")
        );
    }

    #[test]
    fn test_write_then_exists() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("sealed.bundle");
        fs::write(&source, b"bundle").unwrap();
        let sidecar = temp.path().join("sealed_lfs.tar.gz");
        fs::write(&sidecar, b"lfs").unwrap();

        let dest = LocalDestination::new(temp.path().join("backups"));
        assert!(!dest.exists(&key()).unwrap());
        assert!(dest.existing(&key()).is_none());

        let artifact = SealedArtifact {
            key: key(),
            primary: source,
            lfs_sidecar: Some(sidecar),
        };
        dest.write(&artifact, &repo()).unwrap();

        assert!(dest.exists(&key()).unwrap());
        assert_eq!(fs::read(dest.path_for(&key())).unwrap(), b"bundle");
        assert_eq!(fs::read(dest.sidecar_path_for(&key())).unwrap(), b"lfs");
        let existing = dest.existing(&key()).unwrap();
        assert!(existing.lfs_sidecar.is_some());

        let leftovers: Vec<_> = walkdir::WalkDir::new(dest.root())
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(PARTIAL_SUFFIX))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_failed_write_leaves_no_artifact() {
        let temp = TempDir::new().unwrap();
        let dest = LocalDestination::new(temp.path().join("backups"));
        let artifact = SealedArtifact {
            key: key(),
            primary: temp.path().join("missing.bundle"),
            lfs_sidecar: None,
        };
        assert!(dest.write(&artifact, &repo()).is_err());
        assert!(!dest.exists(&key()).unwrap());
        let partial = dest.path_for(&key()).with_extension("bundle.partial");
        assert!(!partial.exists());
    }
}
