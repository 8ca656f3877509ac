//! Object storage destination.

use std::path::Path;
use std::sync::Arc;

use log::info;

use crate::artifact::{ArtifactKey, SealedArtifact};
use crate::destination::store::{ObjectMetadata, ObjectStore};
use crate::destination::Destination;
use crate::error::{Error, Result};
use crate::repository::RepositoryDescriptor;

/// Uploads artifacts under `<prefix>/<platform>/<owner>/<file>`.
#[derive(Clone)]
pub struct ObjectStorageDestination {
    store: Arc<dyn ObjectStore>,
    prefix: String,
}

impl ObjectStorageDestination {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: &str) -> Self {
        Self {
            store,
            prefix: prefix.trim_matches('/').to_string(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Uploads one file and re-probes it before reporting success.
    fn upload(&self, path: &Path, key: &str, metadata: &ObjectMetadata) -> Result<()> {
        info!("[UPLOAD] Uploading {} to {}/{}", path.display(), self.store.location(), key);
        self.store.put_file(path, key, metadata)?;

        match self.store.head(key)? {
            Some(info) => {
                info!(
                    "[UPLOAD] Verified {} ({:.1} MB)",
                    key,
                    info.size as f64 / (1024.0 * 1024.0)
                );
                Ok(())
            }
            None => Err(Error::ObjectStore {
                key: key.to_string(),
                message: "object not found after upload".to_string(),
            }),
        }
    }
}

/// `{platform, owner, is_private, default_branch}` attached to every object.
pub fn object_metadata(repo: &RepositoryDescriptor) -> ObjectMetadata {
    let mut metadata = ObjectMetadata::new();
    metadata.insert("platform".to_string(), repo.platform.clone());
    metadata.insert("owner".to_string(), repo.owner.clone());
    metadata.insert("is_private".to_string(), repo.is_private.to_string());
    metadata.insert(
        "default_branch".to_string(),
        repo.default_branch
            .clone()
            .unwrap_or_else(|| "unknown".to_string()),
    );
    metadata
}

impl Destination for ObjectStorageDestination {
    fn describe(&self) -> String {
        if self.prefix.is_empty() {
            self.store.location()
        } else {
            format!("{}/{}", self.store.location(), self.prefix)
        }
    }

    fn exists(&self, key: &ArtifactKey) -> Result<bool> {
        Ok(self.store.head(&key.object_key(&self.prefix))?.is_some())
    }

    fn write(&self, artifact: &SealedArtifact, repo: &RepositoryDescriptor) -> Result<()> {
        let metadata = object_metadata(repo);
        if let Some(sidecar) = &artifact.lfs_sidecar {
            self.upload(sidecar, &artifact.key.sidecar_object_key(&self.prefix), &metadata)?;
        }
        self.upload(&artifact.primary, &artifact.key.object_key(&self.prefix), &metadata)
    }
}
