//! # Per-Task Workspaces
//!
//! Every backup task clones into its own ephemeral directory under a shared
//! temp root. This module allocates those directories, removes them again on
//! every exit path, and reaps directories leaked by a previous crashed run.
//!
//! ## Naming
//!
//! Workspace directories are named `<repo>_<8 hex chars>_clone`. The random
//! suffix keeps tasks for equally named repositories on different platforms
//! apart, and the fixed shape lets the reaper recognise leftovers without
//! touching anything else under the temp root.
//!
//! ## Removal
//!
//! Freshly exited git subprocesses can leave file handles that make a
//! recursive delete fail with "directory not empty". Removal therefore goes
//! through [`retry_with_backoff`], and a directory that still cannot be
//! removed is reported as [`CleanupOutcome::Leaked`]: a warning, never a task
//! failure.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Suffix shared by every workspace directory name.
pub const WORKSPACE_SUFFIX: &str = "_clone";

/// Attempts made when removing a workspace directory.
pub const DEFAULT_REMOVE_ATTEMPTS: u32 = 3;

/// Delay before the second removal attempt; doubles for each further attempt.
pub const DEFAULT_REMOVE_BACKOFF: Duration = Duration::from_millis(200);

const MAX_ALLOCATION_ATTEMPTS: u32 = 5;

/// Result of a bounded retry loop.
#[derive(Debug, PartialEq, Eq)]
pub enum RetryResult<T, E> {
    /// The operation succeeded after `attempts` tries.
    Succeeded { value: T, attempts: u32 },
    /// Every attempt failed; `last_error` is from the final one.
    Exhausted { attempts: u32, last_error: E },
}

/// Runs `op` up to `attempts` times, sleeping `base_delay * 2^n` between
/// attempts.
pub fn retry_with_backoff<T, E, F>(attempts: u32, base_delay: Duration, mut op: F) -> RetryResult<T, E>
where
    F: FnMut(u32) -> std::result::Result<T, E>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt) {
            Ok(value) => {
                return RetryResult::Succeeded {
                    value,
                    attempts: attempt,
                }
            }
            Err(last_error) if attempt >= attempts => {
                return RetryResult::Exhausted {
                    attempts: attempt,
                    last_error,
                }
            }
            Err(_) => {
                thread::sleep(base_delay * 2u32.pow(attempt - 1));
                attempt += 1;
            }
        }
    }
}

/// What happened when a workspace directory was removed.
#[derive(Debug)]
pub enum CleanupOutcome {
    /// The directory was removed.
    Removed { attempts: u32 },
    /// The directory did not exist any more.
    AlreadyGone,
    /// The directory could not be removed within the retry budget.
    Leaked { attempts: u32, error: io::Error },
}

impl CleanupOutcome {
    pub fn is_clean(&self) -> bool {
        !matches!(self, CleanupOutcome::Leaked { .. })
    }
}

/// Recursively removes `path`, retrying transient failures.
pub fn remove_dir_with_retry(path: &Path, attempts: u32, base_delay: Duration) -> CleanupOutcome {
    if !path.exists() {
        return CleanupOutcome::AlreadyGone;
    }

    let result = retry_with_backoff(attempts, base_delay, |attempt| {
        match fs::remove_dir_all(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                debug!(
                    "[CLEANUP] Attempt {} to remove {} failed: {}",
                    attempt,
                    path.display(),
                    e
                );
                Err(e)
            }
        }
    });

    match result {
        RetryResult::Succeeded { attempts, .. } => CleanupOutcome::Removed { attempts },
        RetryResult::Exhausted {
            attempts,
            last_error,
        } => CleanupOutcome::Leaked {
            attempts,
            error: last_error,
        },
    }
}

/// Replaces characters that are unsafe in a directory name.
pub fn sanitize_component(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            c if c.is_alphanumeric() || c == '.' || c == '-' || c == '_' => c,
            _ => '_',
        })
        .collect();
    if sanitized.is_empty() {
        "repo".to_string()
    } else {
        sanitized
    }
}

/// Allocates and releases per-task workspace directories under one root.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
    in_flight: Arc<Mutex<HashSet<PathBuf>>>,
    remove_attempts: u32,
    remove_backoff: Duration,
}

impl WorkspaceManager {
    /// Creates a manager for `root`, creating the directory if needed.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| Error::Workspace {
            path: root.clone(),
            message: format!("cannot create temp root: {e}"),
        })?;
        Ok(Self {
            root,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            remove_attempts: DEFAULT_REMOVE_ATTEMPTS,
            remove_backoff: DEFAULT_REMOVE_BACKOFF,
        })
    }

    /// Overrides the removal retry budget.
    pub fn with_remove_policy(mut self, attempts: u32, base_delay: Duration) -> Self {
        self.remove_attempts = attempts;
        self.remove_backoff = base_delay;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates a new, exclusively owned workspace directory.
    pub fn allocate(&self, prefix: &str) -> Result<WorkspaceHandle> {
        let prefix = sanitize_component(prefix);
        for _ in 0..MAX_ALLOCATION_ATTEMPTS {
            let suffix = Uuid::new_v4().simple().to_string();
            let path = self
                .root
                .join(format!("{}_{}{}", prefix, &suffix[..8], WORKSPACE_SUFFIX));

            match fs::create_dir(&path) {
                Ok(()) => {
                    self.track(&path, true);
                    debug!("[WORKSPACE] Allocated {}", path.display());
                    return Ok(WorkspaceHandle {
                        path,
                        manager: self.clone(),
                        released: false,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(Error::Workspace {
                        path,
                        message: e.to_string(),
                    })
                }
            }
        }
        Err(Error::Workspace {
            path: self.root.clone(),
            message: format!(
                "could not allocate a unique workspace after {} attempts",
                MAX_ALLOCATION_ATTEMPTS
            ),
        })
    }

    /// Removes a workspace. Leaks are logged as warnings.
    pub fn release(&self, mut handle: WorkspaceHandle) -> CleanupOutcome {
        handle.released = true;
        self.remove(&handle.path)
    }

    /// Number of workspaces allocated and not yet released.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().map(|set| set.len()).unwrap_or(0)
    }

    /// Removes workspace directories left behind by previous runs.
    ///
    /// Only directories matching the workspace naming convention and not
    /// owned by an in-flight task are touched. Returns how many were removed.
    pub fn reap_stale(&self) -> Result<usize> {
        let in_flight: HashSet<PathBuf> = self
            .in_flight
            .lock()
            .map(|set| set.clone())
            .unwrap_or_default();

        let mut reaped = 0;
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            if !entry.file_type()?.is_dir() || in_flight.contains(&path) {
                continue;
            }
            let name = entry.file_name();
            if !is_workspace_name(&name.to_string_lossy()) {
                continue;
            }
            match remove_dir_with_retry(&path, self.remove_attempts, self.remove_backoff) {
                CleanupOutcome::Removed { .. } | CleanupOutcome::AlreadyGone => {
                    info!("[CLEANUP] Reaped stale workspace {}", path.display());
                    reaped += 1;
                }
                CleanupOutcome::Leaked { error, .. } => {
                    warn!(
                        "[CLEANUP] Could not reap stale workspace {}: {}",
                        path.display(),
                        error
                    );
                }
            }
        }
        Ok(reaped)
    }

    /// Removes the temp root if nothing is left in it.
    pub fn remove_root_if_empty(&self) -> bool {
        match fs::remove_dir(&self.root) {
            Ok(()) => {
                info!("[CLEANUP] Removed working directory {}", self.root.display());
                true
            }
            Err(_) => false,
        }
    }

    fn remove(&self, path: &Path) -> CleanupOutcome {
        let outcome = remove_dir_with_retry(path, self.remove_attempts, self.remove_backoff);
        if let CleanupOutcome::Leaked { attempts, error } = &outcome {
            warn!(
                "[CLEANUP] Could not remove workspace {} after {} attempts: {}",
                path.display(),
                attempts,
                error
            );
        }
        self.track(path, false);
        outcome
    }

    fn track(&self, path: &Path, add: bool) {
        if let Ok(mut set) = self.in_flight.lock() {
            if add {
                set.insert(path.to_path_buf());
            } else {
                set.remove(path);
            }
        }
    }
}

/// Whether `name` follows the `<repo>_<8 hex chars>_clone` convention.
pub fn is_workspace_name(name: &str) -> bool {
    let Some(stem) = name.strip_suffix(WORKSPACE_SUFFIX) else {
        return false;
    };
    match stem.rsplit_once('_') {
        Some((repo, hex)) => {
            !repo.is_empty()
                && hex.len() == 8
                && hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
        }
        None => false,
    }
}

/// An exclusively owned workspace directory.
///
/// Dropping a handle that was not explicitly released removes the directory,
/// so an early return or a panic inside a task still cleans up.
#[derive(Debug)]
pub struct WorkspaceHandle {
    path: PathBuf,
    manager: WorkspaceManager,
    released: bool,
}

impl WorkspaceHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of a file or directory inside the workspace.
    pub fn join<P: AsRef<Path>>(&self, child: P) -> PathBuf {
        self.path.join(child)
    }
}

impl Drop for WorkspaceHandle {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            self.manager.remove(&self.path);
        }
    }
}
