//! # Repository Pattern Selection
//!
//! Resolves user-supplied repository patterns against the full catalog into a
//! de-duplicated, order-stable list of repositories to back up.
//!
//! ## Pattern Dialects
//!
//! Each pattern is classified once, in this priority order:
//!
//! 1. `re:<regex>` is a case-insensitive regular expression searched for in
//!    both `owner/name` and `platform:owner/name`.
//! 2. A pattern containing `:` but none of `*?[` is an exact,
//!    case-insensitive match against `platform:owner/name`.
//! 3. A pattern containing any of `*?[` is a case-insensitive glob matched
//!    against both `owner/name` and `platform:owner/name`.
//! 4. Anything else is an exact, case-insensitive match against `owner/name`.
//!
//! A pattern that fails to compile matches nothing and is reported in the
//! `Resolution`; it never aborts resolution of the remaining patterns.

use std::collections::HashSet;

use glob::MatchOptions;
use log::{debug, info, warn};
use regex::{Regex, RegexBuilder};

use crate::error::{Error, Result};
use crate::repository::{RepoKey, RepositoryDescriptor};

const GLOB_METACHARACTERS: [char; 3] = ['*', '?', '['];

const GLOB_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// A compiled repository selection pattern.
#[derive(Debug, Clone)]
pub enum Pattern {
    /// `re:` prefixed regular expression
    Regex(Regex),
    /// Exact `platform:owner/name`, stored lower-case
    Qualified(String),
    /// Glob over `owner/name` and `platform:owner/name`
    Glob(glob::Pattern),
    /// Exact `owner/name`, stored lower-case
    Exact(String),
}

impl Pattern {
    /// Classifies and compiles a raw pattern string.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if let Some(expr) = raw.strip_prefix("re:") {
            let regex = RegexBuilder::new(expr)
                .case_insensitive(true)
                .build()
                .map_err(|e| Error::Pattern {
                    pattern: raw.to_string(),
                    message: e.to_string(),
                })?;
            return Ok(Pattern::Regex(regex));
        }

        let has_glob = raw.contains(GLOB_METACHARACTERS);
        if raw.contains(':') && !has_glob {
            return Ok(Pattern::Qualified(raw.to_lowercase()));
        }
        if has_glob {
            let glob = glob::Pattern::new(raw).map_err(|e| Error::Pattern {
                pattern: raw.to_string(),
                message: e.to_string(),
            })?;
            return Ok(Pattern::Glob(glob));
        }
        Ok(Pattern::Exact(raw.to_lowercase()))
    }

    /// Tests this pattern against one repository.
    pub fn matches(&self, repo: &RepositoryDescriptor) -> bool {
        match self {
            Pattern::Regex(regex) => {
                regex.is_match(&repo.full_name()) || regex.is_match(&repo.qualified_name())
            }
            Pattern::Qualified(expected) => *expected == repo.qualified_name().to_lowercase(),
            Pattern::Glob(glob) => {
                glob.matches_with(&repo.full_name(), GLOB_OPTIONS)
                    || glob.matches_with(&repo.qualified_name(), GLOB_OPTIONS)
            }
            Pattern::Exact(expected) => *expected == repo.full_name().to_lowercase(),
        }
    }
}

/// A pattern that could not be used, with the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidPattern {
    pub pattern: String,
    pub message: String,
}

/// The outcome of resolving a set of patterns against a catalog.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Matched repositories, first-seen order, no duplicate `RepoKey`.
    pub repositories: Vec<RepositoryDescriptor>,
    /// Valid patterns that matched nothing.
    pub unmatched: Vec<String>,
    /// Patterns that failed to compile.
    pub invalid: Vec<InvalidPattern>,
    /// Total matches before de-duplication.
    pub total_matches: usize,
}

impl Resolution {
    /// Whether every pattern was valid and matched at least one repository.
    pub fn is_clean(&self) -> bool {
        self.unmatched.is_empty() && self.invalid.is_empty()
    }
}

/// Resolves `patterns` against `catalog`.
///
/// Results are unioned across patterns and de-duplicated by
/// `(platform, owner, name)`, keeping the first occurrence.
pub fn resolve<S: AsRef<str>>(patterns: &[S], catalog: &[RepositoryDescriptor]) -> Resolution {
    let mut resolution = Resolution::default();
    let mut seen: HashSet<RepoKey> = HashSet::new();

    for raw in patterns {
        let raw = raw.as_ref().trim();
        if raw.is_empty() {
            continue;
        }

        let pattern = match Pattern::parse(raw) {
            Ok(pattern) => pattern,
            Err(e) => {
                warn!("[ERROR] {}", e);
                let message = match e {
                    Error::Pattern { message, .. } => message,
                    other => other.to_string(),
                };
                resolution.invalid.push(InvalidPattern {
                    pattern: raw.to_string(),
                    message,
                });
                continue;
            }
        };

        let mut matched = 0usize;
        for repo in catalog.iter().filter(|repo| pattern.matches(repo)) {
            matched += 1;
            if seen.insert(repo.key()) {
                resolution.repositories.push(repo.clone());
            }
        }
        resolution.total_matches += matched;

        match matched {
            0 => {
                warn!("[NO_MATCH] Pattern '{}' matched no repositories", raw);
                resolution.unmatched.push(raw.to_string());
            }
            1 => info!("[MATCH] Pattern '{}' matched 1 repository", raw),
            n => {
                info!("[MATCH] Pattern '{}' matched {} repositories", raw, n);
                for repo in catalog.iter().filter(|repo| pattern.matches(repo)).take(5) {
                    debug!("  - {}", repo);
                }
            }
        }
    }

    if resolution.total_matches != resolution.repositories.len() {
        info!(
            "[DEDUP] {} total matches, {} unique repositories after de-duplication",
            resolution.total_matches,
            resolution.repositories.len()
        );
    }

    resolution
}

/// De-duplicates an arbitrary list of repositories, keeping first occurrences.
pub fn dedup(repos: Vec<RepositoryDescriptor>) -> Vec<RepositoryDescriptor> {
    let mut seen = HashSet::new();
    repos
        .into_iter()
        .filter(|repo| seen.insert(repo.key()))
        .collect()
}
