//! # Backup Scheduler
//!
//! Fans backup tasks out across a bounded worker pool and aggregates their
//! outcomes into a `Summary`.
//!
//! - Concurrency 1 runs tasks strictly in input order on the calling thread.
//! - Concurrency N builds a dedicated rayon pool of N threads; tasks start
//!   and finish in any order.
//!
//! Every task is attempted. A panic inside a task is caught at the task
//! boundary and counted as a failure, so one task can never abort or block
//! the others. The only shared state is a set of atomic counters.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};

use log::{error, info};
use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::pipeline::TaskOutcome;
use crate::repository::RepositoryDescriptor;

/// Aggregate result of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    /// Tasks that did not fail, skips included.
    pub success: usize,
    pub failed: usize,
    /// Portion of `success` skipped because the repository has no commits.
    pub skipped_empty: usize,
    /// Portion of `success` skipped because the artifact already existed.
    pub skipped_exists: usize,
    pub total: usize,
}

impl Summary {
    /// The run succeeds iff no task failed.
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// Tasks that wrote a new artifact.
    pub fn written(&self) -> usize {
        self.success - self.skipped_empty - self.skipped_exists
    }
}

#[derive(Default)]
struct Counters {
    success: AtomicUsize,
    failed: AtomicUsize,
    skipped_empty: AtomicUsize,
    skipped_exists: AtomicUsize,
}

impl Counters {
    fn record(&self, outcome: &TaskOutcome) {
        match outcome {
            TaskOutcome::Failed(_) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                return;
            }
            TaskOutcome::SkippedEmpty => {
                self.skipped_empty.fetch_add(1, Ordering::Relaxed);
            }
            TaskOutcome::SkippedExists => {
                self.skipped_exists.fetch_add(1, Ordering::Relaxed);
            }
            TaskOutcome::Success => {}
        }
        self.success.fetch_add(1, Ordering::Relaxed);
    }

    fn summary(&self, total: usize) -> Summary {
        Summary {
            success: self.success.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            skipped_empty: self.skipped_empty.load(Ordering::SeqCst),
            skipped_exists: self.skipped_exists.load(Ordering::SeqCst),
            total,
        }
    }
}

/// Runs backup tasks with bounded parallelism.
#[derive(Debug, Clone, Copy)]
pub struct Scheduler {
    concurrency: usize,
}

impl Scheduler {
    /// A concurrency of 0 is treated as 1.
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Runs `task` once per repository and reports each outcome to
    /// `on_complete` from the worker that produced it.
    pub fn run<T, C>(&self, repos: &[RepositoryDescriptor], task: T, on_complete: C) -> Result<Summary>
    where
        T: Fn(&RepositoryDescriptor) -> TaskOutcome + Sync,
        C: Fn(&RepositoryDescriptor, &TaskOutcome) + Sync,
    {
        let counters = Counters::default();
        let run_one = |repo: &RepositoryDescriptor| {
            let outcome = guarded(&task, repo);
            counters.record(&outcome);
            on_complete(repo, &outcome);
        };

        if self.concurrency == 1 || repos.len() <= 1 {
            info!("[START] Backing up {} repositories sequentially", repos.len());
            repos.iter().for_each(run_one);
        } else {
            info!(
                "[START] Backing up {} repositories with {} parallel workers",
                repos.len(),
                self.concurrency
            );
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.concurrency)
                .thread_name(|i| format!("backup-worker-{i}"))
                .build()
                .map_err(|e| Error::Scheduler {
                    message: e.to_string(),
                })?;
            pool.install(|| repos.par_iter().for_each(run_one));
        }

        let summary = counters.summary(repos.len());
        info!(
            "[SUMMARY] {} succeeded ({} skipped), {} failed, {} total",
            summary.success,
            summary.skipped_empty + summary.skipped_exists,
            summary.failed,
            summary.total
        );
        Ok(summary)
    }
}

/// Runs one task, turning a panic into a failed outcome.
fn guarded<T>(task: &T, repo: &RepositoryDescriptor) -> TaskOutcome
where
    T: Fn(&RepositoryDescriptor) -> TaskOutcome,
{
    match panic::catch_unwind(AssertUnwindSafe(|| task(repo))) {
        Ok(outcome) => outcome,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!("[ERROR] Backup of {} panicked: {}", repo, message);
            TaskOutcome::Failed(format!("panicked: {message}"))
        }
    }
}
