//! # Destinations
//!
//! A destination persists sealed artifacts. Two backends exist:
//!
//! - **`LocalDestination`**: `<root>/<platform>/<owner>/<name>_<fingerprint>.<ext>`,
//!   existence is a filesystem stat.
//! - **`ObjectStorageDestination`**: the same layout under a key prefix,
//!   uploaded with server-side encryption and repository metadata; existence
//!   is a metadata probe.
//!
//! `DestinationSet` holds whichever backends a run is configured with and
//! decides, per artifact key, whether there is anything to do:
//!
//! | local | remote | plan |
//! |---|---|---|
//! | present | present | `UpToDate` |
//! | present | missing | `Reuse` (upload the local file, no re-seal) |
//! | missing | any | `Seal` |
//!
//! Unconfigured backends count as present. Every key carries the
//! fingerprint, so the fast path uploads under the same key a fresh seal
//! would have produced.

pub mod local;
pub mod remote;
pub mod store;

use log::{debug, error};

use crate::artifact::{ArtifactKey, SealedArtifact};
use crate::error::Result;
use crate::repository::RepositoryDescriptor;

pub use local::LocalDestination;
pub use remote::ObjectStorageDestination;
pub use store::{AwsCliStore, MemoryObjectStore, ObjectInfo, ObjectMetadata, ObjectStore};

/// A place sealed artifacts are written to.
pub trait Destination: Send + Sync {
    /// Human readable location for log messages.
    fn describe(&self) -> String;

    /// Whether the primary artifact for `key` is already stored.
    fn exists(&self, key: &ArtifactKey) -> Result<bool>;

    /// Stores the primary artifact and its sidecar, if any.
    fn write(&self, artifact: &SealedArtifact, repo: &RepositoryDescriptor) -> Result<()>;
}

/// What a task has to do for one artifact key.
#[derive(Debug)]
pub enum WritePlan {
    /// Every configured destination already has the artifact.
    UpToDate,
    /// The local destination has it and can feed the others.
    Reuse(SealedArtifact),
    /// The artifact has to be sealed.
    Seal,
}

/// The destinations configured for a run.
#[derive(Clone, Default)]
pub struct DestinationSet {
    local: Option<LocalDestination>,
    remote: Option<ObjectStorageDestination>,
}

impl DestinationSet {
    pub fn new(local: Option<LocalDestination>, remote: Option<ObjectStorageDestination>) -> Self {
        Self { local, remote }
    }

    pub fn is_empty(&self) -> bool {
        self.local.is_none() && self.remote.is_none()
    }

    pub fn local(&self) -> Option<&LocalDestination> {
        self.local.as_ref()
    }

    pub fn remote(&self) -> Option<&ObjectStorageDestination> {
        self.remote.as_ref()
    }

    fn all(&self) -> Vec<&dyn Destination> {
        let mut all: Vec<&dyn Destination> = Vec::new();
        if let Some(local) = &self.local {
            all.push(local);
        }
        if let Some(remote) = &self.remote {
            all.push(remote);
        }
        all
    }

    /// Decides what to do for `key`.
    pub fn plan(&self, key: &ArtifactKey) -> Result<WritePlan> {
        let local = match &self.local {
            Some(local) => Some(local.exists(key)?),
            None => None,
        };
        let remote = match &self.remote {
            Some(remote) => Some(remote.exists(key)?),
            None => None,
        };

        match (local, remote) {
            (Some(true), Some(false)) => match self.local.as_ref().and_then(|l| l.existing(key)) {
                Some(existing) => Ok(WritePlan::Reuse(existing)),
                None => Ok(WritePlan::Seal),
            },
            (local, remote) if local.unwrap_or(true) && remote.unwrap_or(true) => {
                Ok(WritePlan::UpToDate)
            }
            _ => Ok(WritePlan::Seal),
        }
    }

    /// Writes `artifact` to every destination that does not hold it yet.
    ///
    /// Every destination is attempted; the first error is returned once all
    /// have been tried.
    pub fn write(&self, artifact: &SealedArtifact, repo: &RepositoryDescriptor) -> Result<usize> {
        let mut written = 0;
        let mut first_error = None;

        for destination in self.all() {
            let result = destination.exists(&artifact.key).and_then(|present| {
                if present {
                    debug!(
                        "[SKIP] {} already stored in {}",
                        artifact.key,
                        destination.describe()
                    );
                    Ok(false)
                } else {
                    destination.write(artifact, repo).map(|()| true)
                }
            });

            match result {
                Ok(true) => written += 1,
                Ok(false) => {}
                Err(e) => {
                    error!(
                        "[ERROR] Writing {} to {} failed: {}",
                        artifact.key,
                        destination.describe(),
                        e
                    );
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(written),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{ArtifactFormat, Fingerprint};
    use std::fs;
    use std::sync::Arc;
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

    fn sealed(temp: &TempDir) -> SealedArtifact {
        let primary = temp.path().join("sealed.bundle");
        fs::write(&primary, b"bundle").unwrap();
        SealedArtifact {
            key: key(),
            primary,
            lfs_sidecar: None,
        }
    }

    #[test]
    fn test_plan_local_only() {
        let temp = TempDir::new().unwrap();
        let set = DestinationSet::new(Some(LocalDestination::new(temp.path().join("b"))), None);
        assert!(matches!(set.plan(&key()).unwrap(), WritePlan::Seal));

        set.write(&sealed(&temp), &repo()).unwrap();
        assert!(matches!(set.plan(&key()).unwrap(), WritePlan::UpToDate));
    }

    #[test]
    fn test_plan_remote_only() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(MemoryObjectStore::new());
        let set = DestinationSet::new(None, Some(ObjectStorageDestination::new(store, "repos")));
        assert!(matches!(set.plan(&key()).unwrap(), WritePlan::Seal));
        assert_eq!(set.write(&sealed(&temp), &repo()).unwrap(), 1);
        assert!(matches!(set.plan(&key()).unwrap(), WritePlan::UpToDate));
    }

    #[test]
    fn test_plan_fast_path_reuses_local_file() {
        let temp = TempDir::new().unwrap();
        let local = LocalDestination::new(temp.path().join("b"));
        local.write(&sealed(&temp), &repo()).unwrap();

        let store = Arc::new(MemoryObjectStore::new());
        let set = DestinationSet::new(
            Some(local.clone()),
            Some(ObjectStorageDestination::new(store.clone(), "repos")),
        );

        let existing = match set.plan(&key()).unwrap() {
            WritePlan::Reuse(existing) => existing,
            other => panic!("expected reuse, got {other:?}"),
        };
        assert_eq!(existing.primary, local.path_for(&key()));

        assert_eq!(set.write(&existing, &repo()).unwrap(), 1);
        assert_eq!(
            store.keys(),
            vec!["repos/github/acme/app_20240101_100000.bundle".to_string()]
        );
        assert!(matches!(set.plan(&key()).unwrap(), WritePlan::UpToDate));
    }

    #[test]
    fn test_plan_remote_present_local_missing_seals() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(MemoryObjectStore::new());
        store.insert("repos/github/acme/app_20240101_100000.bundle", b"x");
        let set = DestinationSet::new(
            Some(LocalDestination::new(temp.path().join("b"))),
            Some(ObjectStorageDestination::new(store, "repos")),
        );
        assert!(matches!(set.plan(&key()).unwrap(), WritePlan::Seal));
        assert_eq!(set.write(&sealed(&temp), &repo()).unwrap(), 1);
    }

    #[test]
    fn test_write_attempts_all_destinations_before_failing() {
        let temp = TempDir::new().unwrap();
        let local = LocalDestination::new(temp.path().join("b"));
        let set = DestinationSet::new(
            Some(local.clone()),
            Some(ObjectStorageDestination::new(
                Arc::new(MemoryObjectStore::failing()),
                "repos",
            )),
        );
        assert!(set.write(&sealed(&temp), &repo()).is_err());
        assert!(local.exists(&key()).unwrap());
    }
}
