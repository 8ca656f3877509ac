//! # Error Handling
//!
//! This module defines the centralized error handling mechanism for
//! `repo-backup`. It uses the `thiserror` library to create an `Error` enum
//! covering every failure mode the backup engine can run into, with enough
//! context (repository URL, command, object key, path) to make a log line
//! actionable on its own.
//!
//! ## Key Components
//!
//! - **`Error`**: The main enum for library failures. Each variant carries the
//!   contextual information needed to diagnose the failure.
//!
//! - **`SourceError`**: Failures reported by a `RepositorySource`. Catalog
//!   adapters must distinguish authentication problems (operator action
//!   required) from transient network problems (re-run later).
//!
//! - **`Result<T>`**: A type alias for `std::result::Result<T, Error>`.
//!
//! Task-level failures never escape a backup task: the pipeline converts any
//! `Error` into a failed task outcome so one repository cannot abort the run.

use std::path::PathBuf;

use thiserror::Error;

/// Upper bound for subprocess diagnostics embedded in error messages.
pub const MAX_DIAGNOSTIC_LEN: usize = 500;

/// Main error type for repo-backup operations
#[derive(Error, Debug)]
pub enum Error {
    /// An error occurred while parsing a configuration or catalog file.
    #[error("Configuration parsing error: {message}{}", hint.as_ref().map(|h| format!("\n  hint: {}", h)).unwrap_or_default())]
    ConfigParse {
        message: String,
        /// Optional hint for how to fix the configuration issue
        hint: Option<String>,
    },

    /// The mirror clone of a repository failed.
    ///
    /// The message is truncated to [`MAX_DIAGNOSTIC_LEN`] to bound log volume.
    #[error("Git clone error for {url}: {message}")]
    GitClone { url: String, message: String },

    /// A git command other than clone failed.
    #[error("Git command failed: {command} - {stderr}")]
    GitCommand { command: String, stderr: String },

    /// The repository tracks files with Git LFS but `git-lfs` is not installed.
    #[error(
        "Repository {repo} uses Git LFS but git-lfs is not installed. \
         Install it (https://git-lfs.com) and run `git lfs install`, then re-run the backup; \
         refusing to back up without the LFS objects"
    )]
    LfsMissing { repo: String },

    /// A per-task workspace could not be allocated or inspected.
    #[error("Workspace error at {}: {message}", path.display())]
    Workspace { path: PathBuf, message: String },

    /// An object-storage operation failed.
    #[error("Object storage error for {key}: {message}")]
    ObjectStore { key: String, message: String },

    /// A catalog source failed to list repositories.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// A selection pattern could not be compiled.
    #[error("Invalid pattern '{pattern}': {message}")]
    Pattern { pattern: String, message: String },

    /// The worker pool could not be created.
    #[error("Scheduler error: {message}")]
    Scheduler { message: String },

    /// An artifact failed integrity verification.
    #[error("Verification failed for {}: {message}", path.display())]
    Verification { path: PathBuf, message: String },

    /// An I/O error, wrapped from `std::io::Error`.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A YAML parsing error, wrapped from `serde_yaml::Error`.
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A JSON parsing error, wrapped from `serde_json::Error`.
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// A regular expression error, wrapped from `regex::Error`.
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    /// A glob pattern error, wrapped from `glob::PatternError`.
    #[error("Glob pattern error: {0}")]
    Glob(#[from] glob::PatternError),
}

/// Errors produced by a `RepositorySource` while listing repositories.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// Credentials were rejected or missing. Re-running will not help.
    #[error("Authentication failed for {platform}: {message}")]
    Authentication { platform: String, message: String },

    /// The platform could not be reached. Re-running later may succeed.
    #[error("Transient error listing {platform}: {message}")]
    Transient { platform: String, message: String },

    /// The catalog content itself is malformed.
    #[error("Invalid catalog: {message}")]
    Invalid { message: String },
}

/// A convenient type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Truncate a subprocess diagnostic to at most `max` characters.
///
/// Truncation happens on a character boundary and appends a marker so the
/// reader knows the output was cut.
pub fn truncate_diagnostic(text: &str, max: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(max).collect();
    format!("{cut}... (truncated)")
}
