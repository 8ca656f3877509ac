//! Enumerates backups already stored in a local tree or under an object
//! storage prefix.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use walkdir::WalkDir;

use crate::artifact::{parse_artifact_file_name, ArtifactKind};
use crate::destination::ObjectStore;
use crate::error::Result;
use crate::workspace::is_workspace_name;

/// One stored artifact file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredArtifact {
    /// Filesystem path or object key.
    pub location: String,
    pub platform: String,
    pub owner: String,
    pub name: String,
    pub fingerprint: String,
    pub kind: ArtifactKind,
    pub size: u64,
    pub modified_at: Option<DateTime<Utc>>,
}

/// Parses `<platform>/<owner...>/<file>` into a `StoredArtifact`.
///
/// Owners may span several components, e.g. nested groups `group/sub`.
fn from_relative(
    location: String,
    relative: &[&str],
    size: u64,
    modified_at: Option<DateTime<Utc>>,
) -> Option<StoredArtifact> {
    let [platform, owner @ .., file] = relative else {
        return None;
    };
    if owner.is_empty() || owner.iter().any(|part| part.is_empty()) {
        return None;
    }
    let (name, fingerprint, kind) = parse_artifact_file_name(file)?;
    Some(StoredArtifact {
        location,
        platform: platform.to_string(),
        owner: owner.join("/"),
        name,
        fingerprint: fingerprint.to_string(),
        kind,
        size,
        modified_at,
    })
}

fn keep(artifact: &StoredArtifact, platform: Option<&str>) -> bool {
    platform.map_or(true, |p| artifact.platform.eq_ignore_ascii_case(p))
}

/// Newest fingerprint first, then by location.
pub fn sort_newest_first(artifacts: &mut [StoredArtifact]) {
    artifacts.sort_by(|a, b| {
        b.fingerprint
            .cmp(&a.fingerprint)
            .then_with(|| a.location.cmp(&b.location))
    });
}

/// Lists artifacts below a local backup root.
pub fn list_local(root: &Path, platform: Option<&str>) -> Result<Vec<StoredArtifact>> {
    if !root.is_dir() {
        return Ok(Vec::new());
    }

    let mut artifacts = Vec::new();
    let walker = WalkDir::new(root)
        .into_iter()
        .filter_entry(|entry| {
            !(entry.file_type().is_dir() && is_workspace_name(&entry.file_name().to_string_lossy()))
        });
    for entry in walker {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect();
        let parts: Vec<&str> = parts.iter().map(String::as_str).collect();
        let metadata = entry.metadata().ok();
        let size = metadata.as_ref().map(|m| m.len()).unwrap_or(0);
        let modified = metadata
            .and_then(|m| m.modified().ok())
            .map(DateTime::<Utc>::from);

        if let Some(artifact) = from_relative(
            entry.path().display().to_string(),
            &parts,
            size,
            modified,
        ) {
            if keep(&artifact, platform) {
                artifacts.push(artifact);
            }
        }
    }
    sort_newest_first(&mut artifacts);
    Ok(artifacts)
}

/// Lists artifacts stored under `prefix`.
pub fn list_remote(
    store: &dyn ObjectStore,
    prefix: &str,
    platform: Option<&str>,
) -> Result<Vec<StoredArtifact>> {
    let prefix = prefix.trim_matches('/');
    let search = match (prefix.is_empty(), platform) {
        (true, None) => String::new(),
        (true, Some(p)) => format!("{}/", p.to_lowercase()),
        (false, None) => format!("{prefix}/"),
        (false, Some(p)) => format!("{prefix}/{}/", p.to_lowercase()),
    };

    let mut artifacts: Vec<StoredArtifact> = store
        .list(&search)?
        .into_iter()
        .filter_map(|object| {
            let relative = if prefix.is_empty() {
                object.key.as_str()
            } else {
                object.key.strip_prefix(prefix)?.strip_prefix('/')?
            };
            let parts: Vec<&str> = relative.split('/').collect();
            from_relative(object.key.clone(), &parts, object.size, object.modified_at)
        })
        .filter(|artifact| keep(artifact, platform))
        .collect();
    sort_newest_first(&mut artifacts);
    Ok(artifacts)
}
