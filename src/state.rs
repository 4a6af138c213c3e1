//! Per-invocation rewrite state.
//!
//! Deduplicates registry lookups and dependency downloads across every package
//! processed by one command. The state is created by the command, handed to
//! each package pass by `&mut`, and dropped when the command exits. Once a key
//! is populated it is never looked up again, even when the cached outcome is
//! an error.
//!
//! Passes run sequentially; a parallel driver would have to put both maps
//! behind a lock since population is a check-then-insert.

use crate::error::{MaterializeError, RegistryError};
use crate::gotool::Materializer;
use crate::registry::{Registry, Repo, RepoRequest};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Default)]
pub struct RewriteState {
    repos: HashMap<RepoRequest, Repo>,
    materialized: HashMap<String, Result<(), MaterializeError>>,
}

impl RewriteState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves `requests`, asking the registry only for keys not seen before.
    ///
    /// Missing keys go out in a single batch, deduplicated and in first-seen
    /// order. A batch failure leaves the cache untouched. The result holds one
    /// record per request, in request order.
    pub fn repos(
        &mut self,
        registry: &dyn Registry,
        requests: &[RepoRequest],
    ) -> Result<Vec<Repo>, RegistryError> {
        let mut seen = HashSet::new();
        let pending: Vec<RepoRequest> = requests
            .iter()
            .filter(|r| !self.repos.contains_key(*r) && seen.insert(*r))
            .cloned()
            .collect();

        if !pending.is_empty() {
            tracing::debug!(count = pending.len(), "querying registry");
            let resolved = registry.resolve(&pending)?;
            if resolved.len() != pending.len() {
                return Err(RegistryError::Mismatch {
                    expected: pending.len(),
                    got: resolved.len(),
                });
            }
            self.repos.extend(pending.into_iter().zip(resolved));
        } else {
            tracing::debug!(count = requests.len(), "all repositories cached");
        }

        Ok(requests
            .iter()
            .map(|r| self.repos.get(r).cloned().unwrap_or_default())
            .collect())
    }

    /// Makes `import_path` available, running the materializer at most once
    /// per path for the lifetime of the state.
    pub fn materialize(
        &mut self,
        materializer: &dyn Materializer,
        import_path: &str,
    ) -> Result<(), MaterializeError> {
        if let Some(outcome) = self.materialized.get(import_path) {
            return outcome.clone();
        }
        let outcome = materializer.materialize(import_path);
        self.materialized
            .insert(import_path.to_string(), outcome.clone());
        outcome
    }

    /// Number of cached registry records.
    pub fn cached_repos(&self) -> usize {
        self.repos.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Default)]
    struct CountingRegistry {
        calls: RefCell<Vec<Vec<String>>>,
        fail: bool,
    }

    impl Registry for CountingRegistry {
        fn resolve(&self, requests: &[RepoRequest]) -> Result<Vec<Repo>, RegistryError> {
            self.calls
                .borrow_mut()
                .push(requests.iter().map(|r| r.path.clone()).collect());
            if self.fail {
                return Err(RegistryError::Status {
                    code: 500,
                    host: "test".to_string(),
                    body: String::new(),
                });
            }
            Ok(requests
                .iter()
                .map(|r| Repo {
                    path: r.path.clone(),
                    error: if r.path.contains("gone") {
                        "not found".to_string()
                    } else {
                        String::new()
                    },
                    ..Repo::default()
                })
                .collect())
        }
    }

    #[derive(Default)]
    struct CountingMaterializer {
        calls: RefCell<Vec<String>>,
    }

    impl Materializer for CountingMaterializer {
        fn materialize(&self, import_path: &str) -> Result<(), MaterializeError> {
            self.calls.borrow_mut().push(import_path.to_string());
            if import_path.contains("broken") {
                return Err(MaterializeError {
                    path: import_path.to_string(),
                    message: "exit status 1".to_string(),
                });
            }
            Ok(())
        }
    }

    fn reqs(paths: &[&str]) -> Vec<RepoRequest> {
        paths.iter().map(|p| RepoRequest::latest(*p)).collect()
    }

    #[test]
    fn deduplicates_within_a_batch() {
        let registry = CountingRegistry::default();
        let mut state = RewriteState::new();
        let repos = state
            .repos(&registry, &reqs(&["github.com/a/x", "github.com/b/y", "github.com/a/x"]))
            .unwrap();
        assert_eq!(repos.len(), 3);
        assert_eq!(repos[2].path, "github.com/a/x");
        assert_eq!(
            *registry.calls.borrow(),
            vec![vec!["github.com/a/x".to_string(), "github.com/b/y".to_string()]]
        );
    }

    #[test]
    fn cached_keys_are_not_requested_again() {
        let registry = CountingRegistry::default();
        let mut state = RewriteState::new();
        state.repos(&registry, &reqs(&["github.com/a/x"])).unwrap();
        state
            .repos(&registry, &reqs(&["github.com/a/x", "github.com/b/y"]))
            .unwrap();
        state.repos(&registry, &reqs(&["github.com/b/y"])).unwrap();
        assert_eq!(
            *registry.calls.borrow(),
            vec![
                vec!["github.com/a/x".to_string()],
                vec!["github.com/b/y".to_string()]
            ]
        );
        assert_eq!(state.cached_repos(), 2);
    }

    #[test]
    fn inline_errors_are_cached() {
        let registry = CountingRegistry::default();
        let mut state = RewriteState::new();
        let first = state.repos(&registry, &reqs(&["github.com/a/gone"])).unwrap();
        let second = state.repos(&registry, &reqs(&["github.com/a/gone"])).unwrap();
        assert_eq!(first[0].error, "not found");
        assert_eq!(second, first);
        assert_eq!(registry.calls.borrow().len(), 1);
    }

    #[test]
    fn revisions_are_distinct_keys() {
        let registry = CountingRegistry::default();
        let mut state = RewriteState::new();
        let pinned = RepoRequest {
            path: "github.com/a/x".to_string(),
            revision: "abc".to_string(),
        };
        state
            .repos(&registry, &[RepoRequest::latest("github.com/a/x"), pinned])
            .unwrap();
        assert_eq!(state.cached_repos(), 2);
    }

    #[test]
    fn batch_failure_populates_nothing() {
        let registry = CountingRegistry {
            fail: true,
            ..CountingRegistry::default()
        };
        let mut state = RewriteState::new();
        assert!(state.repos(&registry, &reqs(&["github.com/a/x"])).is_err());
        assert!(state.repos(&registry, &reqs(&["github.com/a/x"])).is_err());
        assert_eq!(state.cached_repos(), 0);
        assert_eq!(registry.calls.borrow().len(), 2);
    }

    #[test]
    fn materializes_each_path_once() {
        let materializer = CountingMaterializer::default();
        let mut state = RewriteState::new();
        assert!(state.materialize(&materializer, "gopkgs.com/x.v1").is_ok());
        assert!(state.materialize(&materializer, "gopkgs.com/x.v1").is_ok());
        assert!(state.materialize(&materializer, "gopkgs.com/broken.v1").is_err());
        assert!(state.materialize(&materializer, "gopkgs.com/broken.v1").is_err());
        assert_eq!(
            *materializer.calls.borrow(),
            vec!["gopkgs.com/x.v1".to_string(), "gopkgs.com/broken.v1".to_string()]
        );
    }
}
