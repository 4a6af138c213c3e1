//! Package-level rewrite orchestration.
//!
//! A package goes through parsing, matching, safety filtering, one batched
//! registry resolution, path selection, optional confirmation and finally the
//! per-file commit. Packages are processed one at a time and share a single
//! [`RewriteState`], so repositories seen in an earlier package are never
//! resolved twice.

use crate::analyzer::{self, KeepReason, KeptImport};
use crate::error::RewriteError;
use crate::gate::{Decision, Gate, Prompt};
use crate::gotool::{Materializer, PackageNames};
use crate::registry::{Registry, RepoRequest};
use crate::report;
use crate::rewriter::{self, CommitOptions, FileReport};
use crate::scanner;
use crate::selector::{Selection, SkipReason, select_path};
use crate::state::RewriteState;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Whether a package is treated as a library.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LibraryMode {
    /// Every package except `main`.
    #[default]
    Auto,
    On,
    Off,
}

impl LibraryMode {
    pub fn applies_to(self, package_name: &str) -> bool {
        match self {
            LibraryMode::Auto => package_name != "main",
            LibraryMode::On => true,
            LibraryMode::Off => false,
        }
    }
}

impl FromStr for LibraryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(LibraryMode::Auto),
            "1" | "t" | "true" | "y" | "yes" => Ok(LibraryMode::On),
            "0" | "f" | "false" | "n" | "no" => Ok(LibraryMode::Off),
            _ => Err(format!(
                "Invalid library mode '{}', expected auto, true or false",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RewriteOptions {
    /// Confirm every repository before rewriting it.
    pub interactive: bool,
    /// Pin applications to revisions even when a version is published.
    pub prefer_revisions: bool,
    pub library: LibraryMode,
    /// Report what would change without touching anything.
    pub dry_run: bool,
    pub verbose: bool,
}

/// The outside world a rewrite pass talks to.
pub struct Collaborators<'a> {
    pub registry: &'a dyn Registry,
    pub materializer: &'a dyn Materializer,
    pub names: &'a dyn PackageNames,
    pub gate: &'a mut dyn Gate,
}

/// A repository whose imports keep their original path.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedRepo {
    pub repository: String,
    pub reason: String,
}

/// What a committed package pass did.
#[derive(Debug, Clone, Serialize)]
pub struct PackageSummary {
    pub package: String,
    pub dir: PathBuf,
    pub library: bool,
    pub dry_run: bool,
    /// Chosen replacement for each repository key.
    pub rewrites: BTreeMap<String, String>,
    pub kept: Vec<KeptImport>,
    pub skipped: Vec<SkippedRepo>,
    pub files_rewritten: usize,
    pub imports_rewritten: usize,
    /// Files with at least one substitution, in discovery order.
    pub files: Vec<FileReport>,
}

#[derive(Debug, Clone)]
pub enum PackageOutcome {
    /// Nothing parseable, or no eligible third-party imports.
    NoOp,
    Committed(PackageSummary),
    /// The operator aborted; nothing of this package was written.
    Aborted,
}

/// Runs one rewrite pass over the package in `dir`.
///
/// A registry batch failure returns an error before any file is touched. An
/// abort at the gate also returns before writing anything of this package.
pub fn rewrite_package(
    dir: &Path,
    state: &mut RewriteState,
    tools: &mut Collaborators<'_>,
    opts: &RewriteOptions,
) -> Result<PackageOutcome, RewriteError> {
    let Some(package) = scanner::load_package(dir)? else {
        tracing::debug!(dir = %dir.display(), "no parseable Go files");
        return Ok(PackageOutcome::NoOp);
    };
    let library = opts.library.applies_to(&package.name);

    let analysis = analyzer::analyze(&package, tools.names);
    for (path, message) in analysis.unresolved() {
        report::warn(format!("{}, keeping import {}", message, path));
    }
    for kept in &analysis.kept {
        match &kept.reason {
            KeepReason::UnknownName { .. } | KeepReason::Canonical => {}
            reason if opts.verbose => report::info(format!(
                "keeping import {} due to {} in {}",
                kept.path,
                reason,
                kept.file.display()
            )),
            _ => {}
        }
    }

    let keys: Vec<String> = analysis.repository_keys().map(str::to_string).collect();
    if keys.is_empty() {
        tracing::debug!(package = %package.name, "no eligible repositories");
        return Ok(PackageOutcome::NoOp);
    }
    if opts.verbose {
        report::info(format!(
            "package {} uses {} 3rd party repositories: {}",
            package.name,
            keys.len(),
            keys.join(", ")
        ));
    }

    let requests: Vec<RepoRequest> = keys.iter().map(RepoRequest::latest).collect();
    let repos = state.repos(tools.registry, &requests)?;

    let mut rewrites = BTreeMap::new();
    let mut skipped = Vec::new();
    for (key, repo) in keys.iter().zip(&repos) {
        let replacement = match select_path(repo, library, opts.prefer_revisions) {
            Selection::Use(path) => path,
            Selection::Skip(reason) => {
                match &reason {
                    SkipReason::Registry(message) => report::warn(format!(
                        "gopkgs can't find package {}: {}, keeping original",
                        key, message
                    )),
                    SkipReason::NoVersion if opts.verbose => {
                        report::info(format!("ignoring package {}, no versions available", key))
                    }
                    _ if opts.verbose => report::info(format!("ignoring package {}, {}", key, reason)),
                    _ => {}
                }
                skipped.push(SkippedRepo {
                    repository: key.clone(),
                    reason: reason.to_string(),
                });
                continue;
            }
        };

        if opts.interactive {
            let prompt = Prompt {
                original: key.clone(),
                replacement: replacement.clone(),
                package: package.name.clone(),
            };
            match tools.gate.decide(&prompt).map_err(RewriteError::Prompt)? {
                Decision::Accept => {}
                Decision::Decline => {
                    skipped.push(SkippedRepo {
                        repository: key.clone(),
                        reason: "declined".to_string(),
                    });
                    continue;
                }
                Decision::Abort => return Ok(PackageOutcome::Aborted),
            }
        }

        rewrites.insert(key.clone(), replacement);
    }

    let commit_opts = CommitOptions {
        dry_run: opts.dry_run,
        verbose: opts.verbose,
    };
    let mut files = Vec::new();
    if !rewrites.is_empty() {
        for file in &package.files {
            let subs = rewriter::substitutions(file, &rewrites, &analysis.disabled);
            if subs.is_empty() {
                continue;
            }
            files.push(rewriter::commit(
                file,
                subs,
                state,
                tools.materializer,
                commit_opts,
            ));
        }
    }

    let changed: Vec<&FileReport> = files
        .iter()
        .filter(|f| f.written || (opts.dry_run && !f.substitutions.is_empty()))
        .collect();
    let files_rewritten = changed.len();
    let imports_rewritten = changed.iter().map(|f| f.substitutions.len()).sum();

    Ok(PackageOutcome::Committed(PackageSummary {
        package: package.name,
        dir: package.dir,
        library,
        dry_run: opts.dry_run,
        rewrites,
        kept: analysis.kept,
        skipped,
        files_rewritten,
        imports_rewritten,
        files,
    }))
}

/// A package whose pass failed.
#[derive(Debug, Clone, Serialize)]
pub struct FailedPackage {
    pub dir: PathBuf,
    pub error: String,
}

/// Outcome of a whole invocation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub packages: Vec<PackageSummary>,
    pub failed: Vec<FailedPackage>,
    pub aborted: bool,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && !self.aborted
    }

    pub fn files_rewritten(&self) -> usize {
        self.packages.iter().map(|p| p.files_rewritten).sum()
    }

    pub fn imports_rewritten(&self) -> usize {
        self.packages.iter().map(|p| p.imports_rewritten).sum()
    }
}

/// Rewrites every package in `dirs`, in order.
///
/// A failed package is reported and the run moves on; an abort stops the run
/// and leaves earlier packages as they were committed.
pub fn run(
    dirs: &[PathBuf],
    state: &mut RewriteState,
    tools: &mut Collaborators<'_>,
    opts: &RewriteOptions,
) -> RunSummary {
    let mut summary = RunSummary::default();

    for dir in dirs {
        match rewrite_package(dir, state, tools, opts) {
            Ok(PackageOutcome::NoOp) => {}
            Ok(PackageOutcome::Committed(package)) => summary.packages.push(package),
            Ok(PackageOutcome::Aborted) => {
                tracing::debug!(dir = %dir.display(), "run aborted");
                summary.aborted = true;
                break;
            }
            Err(err) => {
                let message = format!("{:#}", anyhow::Error::from(err));
                report::error(format!(
                    "error rewriting package {}: {}",
                    dir.display(),
                    message
                ));
                summary.failed.push(FailedPackage {
                    dir: dir.clone(),
                    error: message,
                });
            }
        }
    }

    summary
}
