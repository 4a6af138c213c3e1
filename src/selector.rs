//! Replacement path selection.
//!
//! Picks the mirror import path for a resolved repository, given whether the
//! package being rewritten is a library (which must never be pinned to an
//! unpublished revision) and whether revisions are preferred over versions.

use crate::matcher::GOPKGS_PREFIX;
use crate::registry::Repo;
use std::fmt;

/// Outcome of choosing a replacement for one repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Rewrite the repository's imports to this path.
    Use(String),
    /// Keep the original imports.
    Skip(SkipReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The registry reported an error for this repository.
    Registry(String),
    /// The registry has no mirror path for it.
    Unmirrored,
    /// Library mode and nothing published that may be pinned.
    NoVersion,
    /// Already a gopkgs.com path.
    Canonical,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Registry(message) => write!(f, "{}", message),
            SkipReason::Unmirrored => write!(f, "not mirrored at gopkgs.com"),
            SkipReason::NoVersion => write!(f, "no versions available"),
            SkipReason::Canonical => write!(f, "already a gopkgs.com path"),
        }
    }
}

/// Chooses the replacement import path for `repo`.
///
/// Libraries get the versioned path, or the bare path when nothing is
/// published but unpinned imports are allowed. Applications get the
/// versioned path unless revisions are preferred or nothing is published,
/// in which case the revision path (or the bare path) is used.
pub fn select_path(repo: &Repo, library_mode: bool, prefer_revisions: bool) -> Selection {
    if !repo.error.is_empty() {
        return Selection::Skip(SkipReason::Registry(repo.error.clone()));
    }
    if repo.gopkgs_path.is_empty() {
        return Selection::Skip(SkipReason::Unmirrored);
    }

    if library_mode {
        return match (repo.version, repo.allows_unpinned) {
            (v, _) if v > 0 => Selection::Use(repo.version_import_path()),
            (_, true) => Selection::Use(repo.gopkgs_path.clone()),
            (_, false) => Selection::Skip(SkipReason::NoVersion),
        };
    }

    if prefer_revisions || repo.version <= 0 {
        Selection::Use(repo.revision_import_path())
    } else {
        Selection::Use(repo.version_import_path())
    }
}

/// Chooses what `get` fetches for `requested`.
///
/// Library mode never applies here: the versioned path is used unless
/// revisions are preferred. Skips mean the original path is fetched.
pub fn fetch_path(requested: &str, repo: &Repo, prefer_revisions: bool) -> Selection {
    if requested.starts_with(GOPKGS_PREFIX) {
        return Selection::Skip(SkipReason::Canonical);
    }
    select_path(repo, false, prefer_revisions)
}
