//! Shared test utilities for integration and E2E tests.
//!
//! This module provides common fixtures and helper functions to reduce
//! duplication across test files.
//!
//! ## Usage
//!
//! Add `mod common;` to your test file, then use the helpers:
//!
//! ```rust,ignore
//! mod common;
//! use common::prelude::*;
//!
//! #[test]
//! fn test_example() {
//!     let fixture = TestFixture::new().with_catalog(catalogs::ACME);
//!     fixture.command().arg("backup").arg("--all").assert().success();
//! }
//! ```

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::Command;

use assert_fs::prelude::*;

/// Re-export commonly used test dependencies for convenience.
pub mod prelude {
    pub use assert_cmd::cargo::cargo_bin_cmd;
    pub use assert_fs::prelude::*;
    #[allow(unused_imports)]
    pub use assert_fs::TempDir;
    pub use predicates::prelude::*;

    #[allow(unused_imports)]
    pub use super::catalogs;
    pub use super::TestFixture;
}

/// Environment variables that would leak destination settings into tests.
pub const CONFIG_ENV_VARS: [&str; 11] = [
    "REPO_BACKUP_CONFIG",
    "LOCAL_BACKUP_PATH",
    "AWS_S3_BUCKET",
    "S3_PREFIX",
    "AWS_REGION",
    "AWS_PROFILE",
    "WORK_DIR",
    "PARALLEL_WORKERS",
    "BACKUP_METHOD",
    "SPECIFIC_REPOS",
    "RUST_LOG",
];

/// Catalog YAML snippets for testing.
pub mod catalogs {
    /// Two corporate repositories and one personal one.
    pub const ACME: &str = r#"
- name: app
  clone_url: https://example.invalid/acme/app.git
  owner: acme
  platform: github
  size_kb: 120
- name: lib
  clone_url: https://example.invalid/acme/lib.git
  owner: acme
  platform: github
  size_kb: 4
- name: dotfiles
  clone_url: https://example.invalid/me/dotfiles.git
  owner: me
  platform: github
  owned_by_user: true
"#;

    pub const INVALID_YAML: &str = "- name: [unterminated";
}

/// A temporary directory holding catalogs, configs and backup trees.
pub struct TestFixture {
    temp_dir: assert_fs::TempDir,
}

impl TestFixture {
    pub fn new() -> Self {
        Self {
            temp_dir: assert_fs::TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Writes `catalog.yaml`.
    pub fn with_catalog(self, content: &str) -> Self {
        self.with_file("catalog.yaml", content)
    }

    /// Writes `repo-backup.yaml`.
    pub fn with_config(self, content: &str) -> Self {
        self.with_file("repo-backup.yaml", content)
    }

    pub fn with_file(self, path: &str, content: &str) -> Self {
        self.temp_dir
            .child(path)
            .write_str(content)
            .expect("Failed to write file");
        self
    }

    pub fn with_binary_file(self, path: &str, content: &[u8]) -> Self {
        self.temp_dir
            .child(path)
            .write_binary(content)
            .expect("Failed to write binary file");
        self
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.path().join("catalog.yaml")
    }

    pub fn config_path(&self) -> PathBuf {
        self.path().join("repo-backup.yaml")
    }

    /// Local backup root used by the helpers.
    pub fn backup_root(&self) -> PathBuf {
        self.path().join("backups")
    }

    pub fn child(&self, path: &str) -> assert_fs::fixture::ChildPath {
        self.temp_dir.child(path)
    }

    /// The binary, run in the fixture directory with a clean environment.
    pub fn command(&self) -> assert_cmd::Command {
        let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("repo-backup");
        cmd.current_dir(self.path());
        for var in CONFIG_ENV_VARS {
            cmd.env_remove(var);
        }
        cmd
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs `git` in `dir`, panicking on failure.
pub fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_AUTHOR_NAME", "Test")
        .env("GIT_AUTHOR_EMAIL", "test@example.invalid")
        .env("GIT_COMMITTER_NAME", "Test")
        .env("GIT_COMMITTER_EMAIL", "test@example.invalid")
        .status()
        .expect("Failed to run git");
    assert!(status.success(), "git {:?} failed", args);
}

/// Creates a repository with one commit dated `2024-01-01T10:00:00Z`.
pub fn create_source_repo(parent: &Path, name: &str) -> PathBuf {
    let repo = parent.join(name);
    std::fs::create_dir_all(&repo).expect("Failed to create repo dir");
    git(&repo, &["init", "--quiet"]);
    std::fs::write(repo.join("README.md"), "# test\n").expect("Failed to write README");
    git(&repo, &["add", "README.md"]);
    let status = Command::new("git")
        .args(["commit", "--quiet", "-m", "initial"])
        .current_dir(&repo)
        .env("GIT_AUTHOR_NAME", "Test")
        .env("GIT_AUTHOR_EMAIL", "test@example.invalid")
        .env("GIT_COMMITTER_NAME", "Test")
        .env("GIT_COMMITTER_EMAIL", "test@example.invalid")
        .env("GIT_AUTHOR_DATE", "2024-01-01T10:00:00Z")
        .env("GIT_COMMITTER_DATE", "2024-01-01T10:00:00Z")
        .status()
        .expect("Failed to run git commit");
    assert!(status.success());
    repo
}

/// Catalog YAML with one entry per `(owner, name, clone_url)`.
pub fn catalog_yaml(entries: &[(&str, &str, &Path)]) -> String {
    entries
        .iter()
        .map(|(owner, name, url)| {
            format!(
                "- name: {name}\n  clone_url: {}\n  owner: {owner}\n  platform: github\n",
                url.display()
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_creates_temp_dir() {
        let fixture = TestFixture::new();
        assert!(fixture.path().exists());
    }

    #[test]
    fn test_fixture_with_catalog() {
        let fixture = TestFixture::new().with_catalog(catalogs::ACME);
        assert!(fixture.catalog_path().exists());
    }

    #[test]
    fn test_catalogs_parse() {
        let repos = repo_backup::repository::parse_catalog(catalogs::ACME).unwrap();
        assert_eq!(repos.len(), 3);
        assert!(repo_backup::repository::parse_catalog(catalogs::INVALID_YAML).is_err());
    }
}
