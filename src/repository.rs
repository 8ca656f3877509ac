//! # Repository Catalog
//!
//! This module defines the `RepositoryDescriptor` value that flows through the
//! whole backup engine, and the `RepositorySource` trait through which
//! descriptors enter it.
//!
//! ## Design
//!
//! Platform-specific catalog retrieval (authentication, pagination, group and
//! workspace discovery) lives behind `RepositorySource`. The engine never
//! branches on platform identity: the platform is an opaque tag carried by
//! each descriptor and used only for naming artifacts.
//!
//! - **`RepositorySource`**: lists repositories for one platform account and
//!   classifies ownership so personal repositories and forks can be excluded.
//!
//! - **`CatalogFile`**: a `RepositorySource` backed by a YAML file of
//!   descriptors, which is what a catalog exporter produces.
//!
//! - **`Catalog`**: combines several sources into one list, applying the
//!   platform filter and the personal-repository policy.

use std::fmt;
use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result, SourceError};

/// An immutable description of one hosted repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryDescriptor {
    /// Repository name, without the owner.
    pub name: String,
    /// URL that `git clone --mirror` accepts.
    pub clone_url: String,
    /// Owning user, organisation, group or workspace.
    pub owner: String,
    /// Opaque platform tag, e.g. `github`.
    pub platform: String,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub is_fork: bool,
    /// Whether the repository belongs to the authenticated user personally.
    #[serde(default)]
    pub owned_by_user: bool,
    /// Size hint reported by the platform, in kilobytes.
    #[serde(default)]
    pub size_kb: Option<u64>,
    #[serde(default)]
    pub default_branch: Option<String>,
}

impl RepositoryDescriptor {
    /// Creates a descriptor with the required fields and default flags.
    pub fn new(platform: &str, owner: &str, name: &str, clone_url: &str) -> Self {
        Self {
            name: name.to_string(),
            clone_url: clone_url.to_string(),
            owner: owner.to_string(),
            platform: platform.to_string(),
            is_private: false,
            is_fork: false,
            owned_by_user: false,
            size_kb: None,
            default_branch: None,
        }
    }

    /// The identity of this repository within a resolved set.
    pub fn key(&self) -> RepoKey {
        RepoKey {
            platform: self.platform.clone(),
            owner: self.owner.clone(),
            name: self.name.clone(),
        }
    }

    /// `owner/name`
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    /// `platform:owner/name`
    pub fn qualified_name(&self) -> String {
        format!("{}:{}/{}", self.platform, self.owner, self.name)
    }
}

impl fmt::Display for RepositoryDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}/{}",
            self.platform.to_uppercase(),
            self.owner,
            self.name
        )
    }
}

/// `(platform, owner, name)`, unique within a resolved set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RepoKey {
    pub platform: String,
    pub owner: String,
    pub name: String,
}

/// A catalog of repositories on one hosting platform account.
pub trait RepositorySource: Send + Sync {
    /// Opaque platform tag stamped on every descriptor this source returns.
    fn platform(&self) -> &str;

    /// Lists every repository visible to this source.
    fn list_repositories(&self) -> std::result::Result<Vec<RepositoryDescriptor>, SourceError>;

    /// Whether a repository belongs to the organisation rather than a person.
    fn is_corporate(&self, repo: &RepositoryDescriptor) -> bool {
        !repo.owned_by_user && !repo.is_fork
    }
}

/// A `RepositorySource` backed by a YAML list of descriptors.
#[derive(Debug, Clone)]
pub struct CatalogFile {
    path: PathBuf,
    platform: String,
}

impl CatalogFile {
    /// Creates a source reading descriptors from `path`.
    ///
    /// The platform tag is only used for log messages; descriptors carry
    /// their own platform.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let platform = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_else(|| "catalog".to_string());
        Self { path, platform }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RepositorySource for CatalogFile {
    fn platform(&self) -> &str {
        &self.platform
    }

    fn list_repositories(&self) -> std::result::Result<Vec<RepositoryDescriptor>, SourceError> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| SourceError::Transient {
            platform: self.platform.clone(),
            message: format!("cannot read {}: {}", self.path.display(), e),
        })?;
        parse_catalog(&content).map_err(|e| SourceError::Invalid {
            message: format!("{}: {}", self.path.display(), e),
        })
    }
}

/// Parses a YAML list of repository descriptors.
pub fn parse_catalog(yaml_content: &str) -> Result<Vec<RepositoryDescriptor>> {
    if yaml_content.trim().is_empty() {
        return Ok(Vec::new());
    }
    let repos: Vec<RepositoryDescriptor> = serde_yaml::from_str(yaml_content)?;
    for repo in &repos {
        if repo.name.is_empty() || repo.owner.is_empty() || repo.platform.is_empty() {
            return Err(Error::ConfigParse {
                message: format!(
                    "catalog entry '{}' is missing name, owner or platform",
                    repo.clone_url
                ),
                hint: None,
            });
        }
    }
    Ok(repos)
}

/// Filters applied while collecting repositories from several sources.
#[derive(Debug, Clone, Default)]
pub struct CatalogFilter {
    /// Lower-case platform tags to keep. Empty keeps everything.
    pub platforms: Vec<String>,
    /// Keep repositories owned by the user and forks.
    pub include_personal: bool,
}

/// The combined repository catalog of a run.
pub struct Catalog;

impl Catalog {
    /// Collects repositories from every source.
    ///
    /// An authentication failure aborts collection because the operator must
    /// fix credentials. A transient failure is logged and that source
    /// contributes nothing; the rest of the run proceeds.
    pub fn collect(
        sources: &[Box<dyn RepositorySource>],
        filter: &CatalogFilter,
    ) -> Result<Vec<RepositoryDescriptor>> {
        let mut all_repos = Vec::new();

        for source in sources {
            info!("[CONNECT] Listing repositories from {}...", source.platform());
            let repos = match source.list_repositories() {
                Ok(repos) => repos,
                Err(e @ SourceError::Authentication { .. }) => {
                    error!("[ERROR] {}", e);
                    return Err(e.into());
                }
                Err(e) => {
                    error!("[ERROR] {}", e);
                    continue;
                }
            };

            let before = repos.len();
            let kept: Vec<RepositoryDescriptor> = repos
                .into_iter()
                .filter(|repo| {
                    filter.platforms.is_empty()
                        || filter
                            .platforms
                            .iter()
                            .any(|p| p.eq_ignore_ascii_case(&repo.platform))
                })
                .filter(|repo| filter.include_personal || source.is_corporate(repo))
                .collect();

            if kept.is_empty() {
                warn!("[WARN] No repositories kept from {}", source.platform());
            } else {
                info!(
                    "[OK] Kept {} of {} repositories from {}",
                    kept.len(),
                    before,
                    source.platform()
                );
            }
            for repo in &kept {
                debug!(
                    "  - {} ({})",
                    repo.qualified_name(),
                    if repo.is_private { "private" } else { "public" }
                );
            }
            all_repos.extend(kept);
        }

        Ok(all_repos)
    }
}

/// Picks the smallest non-fork repository that is not known to be empty.
///
/// Repositories without a size hint sort after every sized repository.
pub fn smallest_repository(repos: &[RepositoryDescriptor]) -> Option<RepositoryDescriptor> {
    repos
        .iter()
        .filter(|repo| !repo.is_fork && repo.size_kb != Some(0))
        .min_by_key(|repo| repo.size_kb.unwrap_or(u64::MAX))
        .cloned()
}
