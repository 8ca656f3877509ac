//! # Backup Command Implementation
//!
//! This module implements the `backup` subcommand:
//!
//! 1. Resolve the configuration (defaults → config file → flags).
//! 2. Collect repositories from every catalog.
//! 3. Select the task set: `--all`, `--repos`, `--repos-file` or `--test`.
//! 4. Reap workspaces left by earlier crashed runs.
//! 5. Run one backup task per repository on the worker pool.
//! 6. Report the summary; any failed task fails the command.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use clap::error::ErrorKind;
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};

use repo_backup::artifact::ArtifactFormat;
use repo_backup::config::{load_patterns_file, split_pattern_list, BackupConfig, ConfigOverrides};
use repo_backup::error::{Error, SourceError};
use repo_backup::git::SystemGit;
use repo_backup::pipeline::{BackupPipeline, TaskOutcome};
use repo_backup::repository::{
    smallest_repository, Catalog, CatalogFile, CatalogFilter, RepositoryDescriptor,
    RepositorySource,
};
use repo_backup::scheduler::Scheduler;
use repo_backup::selector::{dedup, resolve};
use repo_backup::workspace::WorkspaceManager;

use super::{build_destinations, remove_empty_work_dirs, DestinationArgs};

/// Which repositories to back up. Exactly one is required, unless
/// `SPECIFIC_REPOS` supplies the patterns.
#[derive(Args, Debug, Clone, Default)]
#[group(multiple = false)]
pub struct Selection {
    /// Back up every repository in the catalogs.
    #[arg(long)]
    pub all: bool,

    /// Comma-separated patterns: exact (owner/repo), glob (owner/repo*),
    /// qualified (platform:owner/repo) or regex (re:pattern).
    #[arg(long, value_name = "PATTERNS")]
    pub repos: Option<String>,

    /// File with one pattern per line.
    #[arg(long, value_name = "FILE")]
    pub repos_file: Option<PathBuf>,

    /// Back up only the smallest non-empty, non-fork repository.
    #[arg(long)]
    pub test: bool,
}

/// Arguments for the backup command
#[derive(Args, Debug)]
pub struct BackupArgs {
    #[command(flatten)]
    pub selection: Selection,

    /// Patterns used when no selection flag is given.
    #[arg(long, value_name = "PATTERNS", env = "SPECIFIC_REPOS", hide = true)]
    pub specific_repos: Option<String>,

    #[command(flatten)]
    pub destination: DestinationArgs,

    /// Repository catalog file (YAML); may be repeated.
    #[arg(long = "catalog", value_name = "FILE")]
    pub catalogs: Vec<PathBuf>,

    /// Only use these platforms (comma-separated).
    #[arg(long, value_name = "PLATFORMS", value_delimiter = ',')]
    pub platform: Vec<String>,

    /// Include repositories owned by the user personally, and forks.
    #[arg(long)]
    pub include_personal: bool,

    /// Number of parallel workers (default: 5).
    #[arg(short, long, value_name = "N", env = "PARALLEL_WORKERS")]
    pub workers: Option<usize>,

    /// Run backups one at a time, in catalog order.
    #[arg(long)]
    pub sequential: bool,

    /// Artifact format: bundle (alias: direct) or archive.
    #[arg(long, value_name = "METHOD", env = "BACKUP_METHOD")]
    pub method: Option<ArtifactFormat>,

    /// Hide the progress bar and summary.
    #[arg(short, long)]
    pub quiet: bool,
}

impl Selection {
    fn is_empty(&self) -> bool {
        !self.all && !self.test && self.repos.is_none() && self.repos_file.is_none()
    }

    /// Falls back to `patterns` when no selection flag was given.
    fn or_patterns(self, patterns: Option<String>) -> Option<Self> {
        if !self.is_empty() {
            return Some(self);
        }
        Some(Self {
            repos: Some(patterns?),
            ..self
        })
    }
}

impl BackupArgs {
    fn resolve_config(&self) -> Result<BackupConfig> {
        let overrides = ConfigOverrides {
            workers: self.workers,
            sequential: self.sequential,
            method: self.method,
            include_personal: self.include_personal,
            platforms: self.platform.clone(),
            catalogs: self.catalogs.clone(),
            ..self.destination.overrides()
        };
        Ok(BackupConfig::resolve(
            self.destination.config_file()?,
            overrides,
        )?)
    }
}

/// Execute the backup command
pub fn execute(args: BackupArgs) -> Result<()> {
    let Some(selection) = args.selection.clone().or_patterns(args.specific_repos.clone()) else {
        return Err(clap::Error::raw(
            ErrorKind::MissingRequiredArgument,
            "one of --all, --repos, --repos-file or --test is required (or set SPECIFIC_REPOS)\n",
        )
        .into());
    };
    let config = args.resolve_config()?;
    let mode = config.destination_mode()?;
    info!(
        "[CONFIG] Destinations: {:?}, method: {}, workers: {}",
        mode, config.method, config.workers
    );

    let catalog = collect_catalog(&config)?;
    let repos = select(&selection, catalog)?;
    if repos.is_empty() {
        warn!("[WARN] No repositories to back up");
        return Ok(());
    }

    let destinations = build_destinations(&config)?;
    let workspaces = WorkspaceManager::new(config.temp_root())?;
    match workspaces.reap_stale() {
        Ok(0) => {}
        Ok(n) => info!("[CLEANUP] Reaped {} stale workspaces", n),
        Err(e) => warn!("[CLEANUP] Stale workspace scan failed: {}", e),
    }

    let pipeline = BackupPipeline::new(
        workspaces.clone(),
        Arc::new(SystemGit),
        config.method,
        destinations,
    );

    let progress = if args.quiet {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(repos.len() as u64)
    };
    progress.set_style(
        ProgressStyle::with_template("{spinner} [{elapsed_precise}] {bar:30} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let failures: Mutex<Vec<(String, String)>> = Mutex::new(Vec::new());
    let summary = Scheduler::new(config.workers).run(
        &repos,
        |repo| pipeline.run_task(repo),
        |repo, outcome| {
            if let TaskOutcome::Failed(reason) = outcome {
                if let Ok(mut failures) = failures.lock() {
                    failures.push((repo.qualified_name(), reason.clone()));
                }
            }
            progress.set_message(format!("{} {}", repo.qualified_name(), outcome_label(outcome)));
            progress.inc(1);
        },
    )?;
    progress.finish_and_clear();
    remove_empty_work_dirs(&config, &workspaces);

    if !args.quiet {
        println!(
            "Backed up {} repositories: {} written, {} unchanged, {} empty, {} failed",
            summary.total,
            summary.written(),
            summary.skipped_exists,
            summary.skipped_empty,
            summary.failed
        );
        if let Ok(failures) = failures.lock() {
            for (repo, reason) in failures.iter() {
                println!("  FAIL {}: {}", repo, reason);
            }
        }
    }

    if !summary.is_success() {
        bail!("{} of {} backups failed", summary.failed, summary.total);
    }
    Ok(())
}

fn outcome_label(outcome: &TaskOutcome) -> &'static str {
    match outcome {
        TaskOutcome::Success => "OK",
        TaskOutcome::SkippedEmpty => "EMPTY",
        TaskOutcome::SkippedExists => "UNCHANGED",
        TaskOutcome::Failed(_) => "FAIL",
    }
}

fn collect_catalog(config: &BackupConfig) -> Result<Vec<RepositoryDescriptor>> {
    if config.catalogs.is_empty() {
        bail!("No repository catalog configured; pass --catalog FILE or set `catalogs` in the config file");
    }

    let sources: Vec<Box<dyn RepositorySource>> = config
        .catalogs
        .iter()
        .map(|path| Box::new(CatalogFile::new(path)) as Box<dyn RepositorySource>)
        .collect();
    let filter = CatalogFilter {
        platforms: config.platforms.clone(),
        include_personal: config.include_personal,
    };

    match Catalog::collect(&sources, &filter) {
        Ok(repos) => Ok(repos),
        Err(e @ Error::Source(SourceError::Authentication { .. })) => Err(e)
            .context("Fix the platform credentials and re-run; no repositories were backed up"),
        Err(e) => Err(e.into()),
    }
}

fn select(
    selection: &Selection,
    catalog: Vec<RepositoryDescriptor>,
) -> Result<Vec<RepositoryDescriptor>> {
    if selection.all {
        return Ok(dedup(catalog));
    }

    if selection.test {
        let repo = smallest_repository(&catalog);
        match &repo {
            Some(repo) => info!(
                "[TEST] Selected {} ({} KB)",
                repo,
                repo.size_kb
                    .map(|kb| kb.to_string())
                    .unwrap_or_else(|| "unknown".to_string())
            ),
            None => warn!("[TEST] No suitable repository found for test mode"),
        }
        return Ok(repo.into_iter().collect());
    }

    let patterns = match (&selection.repos, &selection.repos_file) {
        (Some(list), _) => split_pattern_list(list),
        (None, Some(path)) => load_patterns_file(path)?,
        (None, None) => Vec::new(),
    };
    if patterns.is_empty() {
        bail!("No repository patterns given");
    }

    let resolution = resolve(&patterns, &catalog);
    for invalid in &resolution.invalid {
        warn!("[ERROR] Skipping invalid pattern '{}': {}", invalid.pattern, invalid.message);
    }
    if resolution.repositories.is_empty() {
        bail!(
            "No repositories matched the given patterns: {}",
            patterns.join(", ")
        );
    }
    Ok(resolution.repositories)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Vec<RepositoryDescriptor> {
        let mut small = RepositoryDescriptor::new("github", "acme", "tiny", "u");
        small.size_kb = Some(3);
        vec![
            RepositoryDescriptor::new("github", "acme", "app", "u"),
            RepositoryDescriptor::new("github", "acme", "lib", "u"),
            small,
        ]
    }

    #[test]
    fn test_select_all() {
        let selection = Selection {
            all: true,
            ..Default::default()
        };
        assert_eq!(select(&selection, catalog()).unwrap().len(), 3);
    }

    #[test]
    fn test_select_patterns() {
        let selection = Selection {
            repos: Some("acme/app, acme/*".to_string()),
            ..Default::default()
        };
        let repos = select(&selection, catalog()).unwrap();
        let names: Vec<&str> = repos.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["app", "lib", "tiny"]);
    }

    #[test]
    fn test_select_no_match_is_error() {
        let selection = Selection {
            repos: Some("nobody/*".to_string()),
            ..Default::default()
        };
        assert!(select(&selection, catalog()).is_err());
    }

    #[test]
    fn test_selection_falls_back_to_env_patterns() {
        let selection = Selection::default()
            .or_patterns(Some("acme/lib".to_string()))
            .unwrap();
        assert_eq!(selection.repos.as_deref(), Some("acme/lib"));
        let repos = select(&selection, catalog()).unwrap();
        assert_eq!(repos.len(), 1);
        assert_eq!(repos[0].name, "lib");

        let all = Selection {
            all: true,
            ..Default::default()
        }
        .or_patterns(Some("acme/lib".to_string()))
        .unwrap();
        assert!(all.all);
        assert_eq!(all.repos, None);

        assert!(Selection::default().or_patterns(None).is_none());
    }

    #[test]
    fn test_select_test_mode() {
        let selection = Selection {
            test: true,
            ..Default::default()
        };
        let repos = select(&selection, catalog()).unwrap();
        assert_eq!(repos.len(), 1);
        assert_eq!(repos[0].name, "tiny");
    }
}
