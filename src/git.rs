//! # Git Operations
//!
//! Thin wrappers around the system `git` command. Using the installed binary
//! means every authentication method the operator already configured keeps
//! working unchanged:
//! - SSH keys from ~/.ssh/
//! - Git credential helpers
//! - Personal access tokens embedded in clone URLs
//! - Any authentication configured in ~/.gitconfig
//!
//! All operations go through the `GitOperations` trait so the backup pipeline
//! can be exercised in tests without a network or a git installation.

use std::path::Path;
use std::process::{Command, Output};

use chrono::{DateTime, FixedOffset};
use log::debug;

use crate::error::{truncate_diagnostic, Error, Result, MAX_DIAGNOSTIC_LEN};

/// Trait for git operations - allows mocking in tests
pub trait GitOperations: Send + Sync {
    /// Creates a bare mirror clone of `url` at `target`.
    fn clone_mirror(&self, url: &str, target: &Path) -> Result<()>;

    /// Commit time of the most recent commit reachable from any ref.
    ///
    /// Returns `None` when the repository has no commits at all.
    fn latest_commit_time(&self, mirror: &Path) -> Result<Option<DateTime<FixedOffset>>>;

    /// Reads a file from the root tree of `HEAD`, if it exists.
    fn read_head_file(&self, mirror: &Path, file: &str) -> Result<Option<String>>;

    /// Whether the `git lfs` extension is installed.
    fn lfs_available(&self) -> bool;

    /// Downloads every LFS object referenced by any ref into the mirror.
    fn lfs_fetch_all(&self, mirror: &Path) -> Result<()>;

    /// Writes an all-refs bundle of `mirror` to `output`.
    fn create_bundle(&self, mirror: &Path, output: &Path) -> Result<()>;

    /// Checks that `bundle` is a structurally valid, self-contained bundle.
    fn verify_bundle(&self, bundle: &Path) -> Result<()>;
}

/// The default implementation of `GitOperations`, which runs the system's
/// `git` command.
#[derive(Debug, Clone, Default)]
pub struct SystemGit;

impl SystemGit {
    fn git(&self) -> Command {
        let mut cmd = Command::new("git");
        // Never block a worker on an interactive credential prompt.
        cmd.env("GIT_TERMINAL_PROMPT", "0");
        cmd
    }

    fn run(&self, mut cmd: Command, description: &str) -> Result<Output> {
        debug!("[GIT] {}", description);
        cmd.output().map_err(|e| Error::GitCommand {
            command: description.to_string(),
            stderr: e.to_string(),
        })
    }

    fn run_checked(&self, cmd: Command, description: &str) -> Result<Output> {
        let output = self.run(cmd, description)?;
        if !output.status.success() {
            return Err(Error::GitCommand {
                command: description.to_string(),
                stderr: truncate_diagnostic(
                    &String::from_utf8_lossy(&output.stderr),
                    MAX_DIAGNOSTIC_LEN,
                ),
            });
        }
        Ok(output)
    }

    fn has_any_commit(&self, mirror: &Path) -> Result<bool> {
        let mut cmd = self.git();
        cmd.arg("--git-dir")
            .arg(mirror)
            .args(["rev-list", "-n", "1", "--all"]);
        let output = self.run(cmd, "rev-list -n 1 --all")?;
        Ok(output.status.success() && !String::from_utf8_lossy(&output.stdout).trim().is_empty())
    }
}

impl GitOperations for SystemGit {
    fn clone_mirror(&self, url: &str, target: &Path) -> Result<()> {
        let mut cmd = self.git();
        cmd.args(["clone", "--mirror", url]).arg(target);
        let output = cmd.output().map_err(|e| Error::GitClone {
            url: redact_url(url),
            message: e.to_string(),
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::GitClone {
                url: redact_url(url),
                message: clone_failure_message(&stderr),
            });
        }
        Ok(())
    }

    fn latest_commit_time(&self, mirror: &Path) -> Result<Option<DateTime<FixedOffset>>> {
        let mut cmd = self.git();
        cmd.arg("--git-dir")
            .arg(mirror)
            .args(["log", "-1", "--all", "--format=%cI"]);
        let output = self.run(cmd, "log -1 --all --format=%cI")?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let line = stdout.trim();

        if !output.status.success() || line.is_empty() {
            // `git log` fails or prints nothing on a repository without commits.
            if !self.has_any_commit(mirror)? {
                return Ok(None);
            }
            return Err(Error::GitCommand {
                command: "log -1 --all --format=%cI".to_string(),
                stderr: truncate_diagnostic(
                    &String::from_utf8_lossy(&output.stderr),
                    MAX_DIAGNOSTIC_LEN,
                ),
            });
        }

        parse_commit_time(line).map(Some)
    }

    fn read_head_file(&self, mirror: &Path, file: &str) -> Result<Option<String>> {
        let mut cmd = self.git();
        cmd.arg("--git-dir")
            .arg(mirror)
            .arg("show")
            .arg(format!("HEAD:{file}"));
        let output = self.run(cmd, &format!("show HEAD:{file}"))?;
        if !output.status.success() {
            // Missing file, or HEAD points at an unborn branch.
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&output.stdout).to_string()))
    }

    fn lfs_available(&self) -> bool {
        let mut cmd = self.git();
        cmd.args(["lfs", "version"]);
        matches!(cmd.output(), Ok(output) if output.status.success())
    }

    fn lfs_fetch_all(&self, mirror: &Path) -> Result<()> {
        let mut cmd = self.git();
        cmd.arg("--git-dir")
            .arg(mirror)
            .args(["lfs", "fetch", "--all"]);
        self.run_checked(cmd, "lfs fetch --all")?;
        Ok(())
    }

    fn create_bundle(&self, mirror: &Path, output: &Path) -> Result<()> {
        let mut cmd = self.git();
        cmd.arg("--git-dir")
            .arg(mirror)
            .args(["bundle", "create"])
            .arg(output)
            .arg("--all");
        self.run_checked(cmd, "bundle create --all")?;
        Ok(())
    }

    fn verify_bundle(&self, bundle: &Path) -> Result<()> {
        // `bundle verify` only checks the header and prerequisites, so the
        // refs are listed and the pack is fetched into a scratch repository.
        let scratch = tempfile::Builder::new()
            .prefix("repo-backup-verify")
            .tempdir()?;
        let mut init = self.git();
        init.args(["init", "--bare", "--quiet"]).arg(scratch.path());
        self.run_checked(init, "init --bare")?;

        let invalid = |output: &Output, step: &str| Error::Verification {
            path: bundle.to_path_buf(),
            message: format!(
                "{} failed: {}",
                step,
                truncate_diagnostic(&String::from_utf8_lossy(&output.stderr), MAX_DIAGNOSTIC_LEN)
            ),
        };

        let mut verify = self.git();
        verify
            .arg("--git-dir")
            .arg(scratch.path())
            .args(["bundle", "verify", "--quiet"])
            .arg(bundle);
        let output = self.run(verify, "bundle verify")?;
        if !output.status.success() {
            return Err(invalid(&output, "bundle verify"));
        }

        let mut heads = self.git();
        heads
            .arg("--git-dir")
            .arg(scratch.path())
            .args(["bundle", "list-heads"])
            .arg(bundle);
        let output = self.run(heads, "bundle list-heads")?;
        if !output.status.success() {
            return Err(invalid(&output, "bundle list-heads"));
        }
        let refs = String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter(|line| !line.trim().is_empty())
            .count();
        if refs == 0 {
            return Err(Error::Verification {
                path: bundle.to_path_buf(),
                message: "bundle contains no refs".to_string(),
            });
        }

        let mut fetch = self.git();
        fetch
            .arg("--git-dir")
            .arg(scratch.path())
            .args(["fetch", "--quiet", "--no-tags"])
            .arg(bundle)
            .arg("refs/*:refs/*");
        let output = self.run(fetch, "fetch bundle")?;
        if !output.status.success() {
            return Err(invalid(&output, "fetch"));
        }
        debug!("[VERIFY] {} lists {} refs", bundle.display(), refs);
        Ok(())
    }
}

/// Parses a strict ISO 8601 commit timestamp as printed by `%cI`.
pub fn parse_commit_time(text: &str) -> Result<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(text.trim()).map_err(|e| Error::GitCommand {
        command: "log -1 --all --format=%cI".to_string(),
        stderr: format!("unparseable commit date '{}': {}", text.trim(), e),
    })
}

/// Whether a `.gitattributes` file routes any path through the LFS filter.
pub fn uses_lfs(gitattributes: &str) -> bool {
    gitattributes
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .any(|line| line.split_whitespace().skip(1).any(|attr| attr == "filter=lfs"))
}

/// Removes credentials embedded in an HTTP(S) clone URL.
pub fn redact_url(url: &str) -> String {
    if let Some((scheme, rest)) = url.split_once("://") {
        if let Some((_, host)) = rest.split_once('@') {
            return format!("{scheme}://***@{host}");
        }
    }
    url.to_string()
}

fn clone_failure_message(stderr: &str) -> String {
    let hint = if stderr.contains("Authentication failed")
        || stderr.contains("Permission denied")
        || stderr.contains("Could not read from remote repository")
    {
        " (check that the configured credentials can read this repository)"
    } else {
        ""
    };
    format!("{}{}", truncate_diagnostic(stderr, MAX_DIAGNOSTIC_LEN), hint)
}
