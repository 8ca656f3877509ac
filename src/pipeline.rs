//! # Backup Task Pipeline
//!
//! One backup task takes one repository through
//! workspace allocation → build → write → workspace release and ends in
//! exactly one `TaskOutcome`. Errors never leave a task: they become
//! `TaskOutcome::Failed` with the error text as the reason.

use std::fmt;
use std::sync::Arc;

use log::{error, info};

use crate::artifact::{ArtifactBuilder, ArtifactFormat, BuildOutcome};
use crate::destination::DestinationSet;
use crate::error::Result;
use crate::git::GitOperations;
use crate::repository::RepositoryDescriptor;
use crate::workspace::WorkspaceManager;

/// Terminal state of one backup task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// A new artifact was written.
    Success,
    /// The repository has no commits.
    SkippedEmpty,
    /// Every destination already had this fingerprint.
    SkippedExists,
    /// The task failed; the reason is the error text.
    Failed(String),
}

impl TaskOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, TaskOutcome::Failed(_))
    }
}

impl fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskOutcome::Success => write!(f, "success"),
            TaskOutcome::SkippedEmpty => write!(f, "skipped (empty)"),
            TaskOutcome::SkippedExists => write!(f, "skipped (exists)"),
            TaskOutcome::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Everything a backup task needs, shared by all workers.
pub struct BackupPipeline {
    workspaces: WorkspaceManager,
    builder: ArtifactBuilder,
    destinations: DestinationSet,
}

impl BackupPipeline {
    pub fn new(
        workspaces: WorkspaceManager,
        git: Arc<dyn GitOperations>,
        format: ArtifactFormat,
        destinations: DestinationSet,
    ) -> Self {
        Self {
            workspaces,
            builder: ArtifactBuilder::new(git, format),
            destinations,
        }
    }

    pub fn workspaces(&self) -> &WorkspaceManager {
        &self.workspaces
    }

    pub fn destinations(&self) -> &DestinationSet {
        &self.destinations
    }

    /// Runs one task to its terminal state.
    pub fn run_task(&self, repo: &RepositoryDescriptor) -> TaskOutcome {
        match self.execute(repo) {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("[ERROR] Backup of {} failed: {}", repo, e);
                TaskOutcome::Failed(e.to_string())
            }
        }
    }

    fn execute(&self, repo: &RepositoryDescriptor) -> Result<TaskOutcome> {
        let workspace = self.workspaces.allocate(&repo.name)?;

        let result = self
            .builder
            .build(repo, &workspace, &self.destinations)
            .and_then(|built| match built {
                BuildOutcome::EmptySkip => Ok(TaskOutcome::SkippedEmpty),
                BuildOutcome::AlreadyExists(_) => Ok(TaskOutcome::SkippedExists),
                BuildOutcome::Sealed(artifact) | BuildOutcome::Reusable(artifact) => {
                    self.destinations.write(&artifact, repo)?;
                    info!("[OK] Backed up {} as {}", repo, artifact.key.file_name());
                    Ok(TaskOutcome::Success)
                }
            });

        self.workspaces.release(workspace);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destination::{LocalDestination, MemoryObjectStore, ObjectStorageDestination};
    use crate::error::Error;
    use chrono::{DateTime, FixedOffset};
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    /// Fake git that writes a marker file instead of cloning.
    struct FakeGit {
        commit: Option<&'static str>,
        gitattributes: Option<&'static str>,
        lfs_installed: bool,
        fail_clone: bool,
    }

    impl Default for FakeGit {
        fn default() -> Self {
            Self {
                commit: Some("2024-01-01T10:00:00Z"),
                gitattributes: None,
                lfs_installed: true,
                fail_clone: false,
            }
        }
    }

    impl GitOperations for FakeGit {
        fn clone_mirror(&self, url: &str, target: &Path) -> Result<()> {
            if self.fail_clone {
                return Err(Error::GitClone {
                    url: url.to_string(),
                    message: "repository not found".to_string(),
                });
            }
            fs::create_dir_all(target)?;
            fs::write(target.join("HEAD"), b"ref: refs/heads/main\n")?;
            Ok(())
        }

        fn latest_commit_time(&self, _mirror: &Path) -> Result<Option<DateTime<FixedOffset>>> {
            Ok(self
                .commit
                .map(|c| DateTime::parse_from_rfc3339(c).unwrap()))
        }

        fn read_head_file(&self, _mirror: &Path, _file: &str) -> Result<Option<String>> {
            Ok(self.gitattributes.map(str::to_string))
        }

        fn lfs_available(&self) -> bool {
            self.lfs_installed
        }

        fn lfs_fetch_all(&self, mirror: &Path) -> Result<()> {
            let objects = mirror.join("lfs/objects/ab/cd");
            fs::create_dir_all(&objects)?;
            fs::write(objects.join("abcd1234"), b"large file")?;
            Ok(())
        }

        fn create_bundle(&self, _mirror: &Path, output: &Path) -> Result<()> {
            fs::write(output, b"# v2 git bundle\n")?;
            Ok(())
        }

        fn verify_bundle(&self, _bundle: &Path) -> Result<()> {
            Ok(())
        }
    }

    fn repo() -> RepositoryDescriptor {
        RepositoryDescriptor::new("github", "acme", "app", "https://github.com/acme/app.git")
    }

    fn pipeline(temp: &TempDir, git: FakeGit) -> BackupPipeline {
        let workspaces = WorkspaceManager::new(temp.path().join("work")).unwrap();
        let destinations =
            DestinationSet::new(Some(LocalDestination::new(temp.path().join("backups"))), None);
        BackupPipeline::new(workspaces, Arc::new(git), ArtifactFormat::Bundle, destinations)
    }

    fn leftover_workspaces(temp: &TempDir) -> usize {
        fs::read_dir(temp.path().join("work")).unwrap().count()
    }

    #[test]
    fn test_success_writes_named_bundle() {
        let temp = TempDir::new().unwrap();
        let pipeline = pipeline(&temp, FakeGit::default());
        assert_eq!(pipeline.run_task(&repo()), TaskOutcome::Success);
        assert!(temp
            .path()
            .join("backups/github/acme/app_20240101_100000.bundle")
            .is_file());
        assert_eq!(leftover_workspaces(&temp), 0);
    }

    #[test]
    fn test_second_run_is_skipped_exists() {
        let temp = TempDir::new().unwrap();
        let pipeline = pipeline(&temp, FakeGit::default());
        assert_eq!(pipeline.run_task(&repo()), TaskOutcome::Success);
        assert_eq!(pipeline.run_task(&repo()), TaskOutcome::SkippedExists);
        let files = fs::read_dir(temp.path().join("backups/github/acme"))
            .unwrap()
            .count();
        assert_eq!(files, 1);
    }

    #[test]
    fn test_empty_repository_is_skipped() {
        let temp = TempDir::new().unwrap();
        let git = FakeGit {
            commit: None,
            ..Default::default()
        };
        let pipeline = pipeline(&temp, git);
        assert_eq!(pipeline.run_task(&repo()), TaskOutcome::SkippedEmpty);
        assert!(!temp.path().join("backups").exists());
        assert_eq!(leftover_workspaces(&temp), 0);
    }

    #[test]
    fn test_clone_failure_is_failed_outcome() {
        let temp = TempDir::new().unwrap();
        let git = FakeGit {
            fail_clone: true,
            ..Default::default()
        };
        let outcome = pipeline(&temp, git).run_task(&repo());
        assert!(outcome.is_failure());
        assert!(outcome.to_string().contains("repository not found"));
        assert_eq!(leftover_workspaces(&temp), 0);
    }

    #[test]
    fn test_missing_lfs_fails_without_artifact() {
        let temp = TempDir::new().unwrap();
        let git = FakeGit {
            gitattributes: Some("*.psd filter=lfs diff=lfs merge=lfs -text\n"),
            lfs_installed: false,
            ..Default::default()
        };
        let outcome = pipeline(&temp, git).run_task(&repo());
        match outcome {
            TaskOutcome::Failed(reason) => assert!(reason.contains("git-lfs is not installed")),
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(!temp.path().join("backups").exists());
        assert_eq!(leftover_workspaces(&temp), 0);
    }

    #[test]
    fn test_lfs_repository_gets_sidecar() {
        let temp = TempDir::new().unwrap();
        let git = FakeGit {
            gitattributes: Some("*.psd filter=lfs diff=lfs merge=lfs -text\n"),
            ..Default::default()
        };
        assert_eq!(pipeline(&temp, git).run_task(&repo()), TaskOutcome::Success);
        let sidecar = temp
            .path()
            .join("backups/github/acme/app_20240101_100000_lfs.tar.gz");
        assert!(sidecar.is_file());
        assert!(crate::artifact::verify_archive(&sidecar).unwrap() > 0);
    }

    #[test]
    fn test_fast_path_uploads_local_artifact() {
        let temp = TempDir::new().unwrap();
        let local = LocalDestination::new(temp.path().join("backups"));
        let store = Arc::new(MemoryObjectStore::new());

        let local_only = BackupPipeline::new(
            WorkspaceManager::new(temp.path().join("work")).unwrap(),
            Arc::new(FakeGit::default()),
            ArtifactFormat::Bundle,
            DestinationSet::new(Some(local.clone()), None),
        );
        assert_eq!(local_only.run_task(&repo()), TaskOutcome::Success);

        let both = BackupPipeline::new(
            WorkspaceManager::new(temp.path().join("work")).unwrap(),
            Arc::new(FakeGit::default()),
            ArtifactFormat::Bundle,
            DestinationSet::new(
                Some(local),
                Some(ObjectStorageDestination::new(store.clone(), "repos")),
            ),
        );
        assert_eq!(both.run_task(&repo()), TaskOutcome::Success);
        assert_eq!(
            store.keys(),
            vec!["repos/github/acme/app_20240101_100000.bundle".to_string()]
        );
        assert_eq!(both.run_task(&repo()), TaskOutcome::SkippedExists);
    }

    #[test]
    fn test_remote_failure_fails_task() {
        let temp = TempDir::new().unwrap();
        let pipeline = BackupPipeline::new(
            WorkspaceManager::new(temp.path().join("work")).unwrap(),
            Arc::new(FakeGit::default()),
            ArtifactFormat::Bundle,
            DestinationSet::new(
                None,
                Some(ObjectStorageDestination::new(
                    Arc::new(MemoryObjectStore::failing()),
                    "repos",
                )),
            ),
        );
        assert!(pipeline.run_task(&repo()).is_failure());
        assert_eq!(leftover_workspaces(&temp), 0);
    }
}
