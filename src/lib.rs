//! # Repository Backup Library
//!
//! This library mirrors git repositories from hosting platforms into durable
//! storage, incrementally and in parallel. It is designed to be used by the
//! `repo-backup` command-line tool but can also be embedded in other
//! automation.
//!
//! ## Quick Example
//!
//! ```
//! use repo_backup::repository::RepositoryDescriptor;
//! use repo_backup::selector::resolve;
//!
//! let catalog = vec![
//!     RepositoryDescriptor::new("github", "acme", "app", "https://github.com/acme/app.git"),
//!     RepositoryDescriptor::new("github", "acme", "lib", "https://github.com/acme/lib.git"),
//!     RepositoryDescriptor::new("github", "other", "app", "https://github.com/other/app.git"),
//! ];
//!
//! let resolution = resolve(&["acme/*", "acme/app"], &catalog);
//! assert_eq!(resolution.repositories.len(), 2);
//! ```
//!
//! ## Core Concepts
//!
//! - **Catalog (`repository`)**: repository descriptors and the
//!   `RepositorySource` trait through which they enter the engine.
//! - **Selection (`selector`)**: exact, glob and regex patterns resolved into
//!   a de-duplicated, order-stable set.
//! - **Workspaces (`workspace`)**: exclusive per-task temp directories with
//!   retried removal and a stale-directory reaper.
//! - **Artifacts (`artifact`, `git`)**: mirror clone, commit-time
//!   fingerprint, optional LFS sidecar, bundle or tar.gz sealing.
//! - **Destinations (`destination`)**: local tree and object storage, with
//!   existence checks and a local-to-remote fast path.
//! - **Scheduling (`pipeline`, `scheduler`)**: one task per repository on a
//!   bounded worker pool; failures are isolated and counted.
//!
//! ## Execution Flow
//!
//! 1.  **Collect**: list repositories from every configured source.
//! 2.  **Select**: resolve patterns (or `--all`) into the task set.
//! 3.  **Back up**: per task, allocate a workspace, clone, fingerprint,
//!     skip if stored, fetch LFS, seal, write, release the workspace.
//! 4.  **Report**: aggregate outcomes; any failure fails the run.

pub mod artifact;
pub mod config;
pub mod defaults;
pub mod destination;
pub mod error;
pub mod git;
pub mod listing;
pub mod pipeline;
pub mod repository;
pub mod scheduler;
pub mod selector;
pub mod verify;
pub mod workspace;

#[cfg(test)]
mod selector_proptest;
