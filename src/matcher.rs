//! Recognition of import paths hosted under known repository patterns.
//!
//! Three host families are recognized, anchored at the start of the path:
//! GitHub (`github.com/owner/repo`), Google Code
//! (`code.google.com/p/project[.suffix]`) and the registry's own namespace
//! (`gopkgs.com/key`). The matched prefix is the repository key used for
//! registry lookups and for rewriting every import below it.

use regex::Regex;
use std::sync::LazyLock;

/// Prefix of every canonical import path.
pub const GOPKGS_PREFIX: &str = "gopkgs.com/";

const GITHUB_PATTERN: &str = r"github\.com/(?P<github>[A-Za-z0-9_.\-]+/[A-Za-z0-9_.\-]+)";
const GOOGLE_CODE_PATTERN: &str =
    r"code\.google\.com/p/(?P<google>[A-Za-z0-9\-]+(?:\.[A-Za-z0-9]+)?)";
const GOPKGS_PATTERN: &str = r"gopkgs\.com/(?P<gopkgs>[A-Za-z0-9]+)";

static REPOSITORY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        "^(?:{}|{}|{})",
        GITHUB_PATTERN, GOOGLE_CODE_PATTERN, GOPKGS_PATTERN
    ))
    .expect("repository pattern is valid")
});

/// Hosting family a repository key was matched under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Host {
    GitHub,
    GoogleCode,
    GoPkgs,
}

/// A recognized repository prefix of an import path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoMatch {
    /// Full matched prefix, e.g. `github.com/acme/widget`.
    pub key: String,
    pub host: Host,
}

impl RepoMatch {
    /// Whether the import already lives under the registry namespace.
    pub fn is_canonical(&self) -> bool {
        self.host == Host::GoPkgs
    }
}

/// Matches `import_path` against the known host patterns.
pub fn match_repository(import_path: &str) -> Option<RepoMatch> {
    let caps = REPOSITORY_RE.captures(import_path)?;
    let host = if caps.name("github").is_some() {
        Host::GitHub
    } else if caps.name("google").is_some() {
        Host::GoogleCode
    } else {
        Host::GoPkgs
    };
    Some(RepoMatch {
        key: caps.get(0)?.as_str().to_string(),
        host,
    })
}

/// Whether `import_path` is the repository `key` itself or a package inside it.
pub fn owns(key: &str, import_path: &str) -> bool {
    match import_path.strip_prefix(key) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Replaces the repository prefix `key` of `import_path` with `replacement`.
///
/// Returns `None` when `import_path` does not belong to `key`.
pub fn replace_prefix(key: &str, import_path: &str, replacement: &str) -> Option<String> {
    if !owns(key, import_path) {
        return None;
    }
    Some(format!("{}{}", replacement, &import_path[key.len()..]))
}
