//! Package registry records and client.
//!
//! The registry maps an original import path (and optional revision) to its
//! gopkgs.com mirror: the canonical path, the latest published version, the
//! pinned revision and whether unpinned imports are allowed. Lookups are
//! batched: one `POST /api/v1/info` carries every request as a JSON array and
//! the response holds one record per request, in order.
//!
//! Failures of the whole call (transport, status, malformed body) are
//! `RegistryError`s. Failures for one repository come back inline in that
//! record's `error` field.

use crate::error::RegistryError;
use serde::{Deserialize, Serialize};

/// Default registry host.
pub const DEFAULT_API_HOST: &str = "gopkgs.com";

const API_VERSION: &str = "1";

/// A registry query key. An empty revision means the latest one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepoRequest {
    pub path: String,
    #[serde(default)]
    pub revision: String,
}

impl RepoRequest {
    /// Request for the latest state of `path`.
    pub fn latest(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            revision: String::new(),
        }
    }
}

/// A resolved registry record.
///
/// When `error` is set none of the path fields are meaningful. A `version`
/// of 0 means nothing has been published; only `revision` can be used then.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Repo {
    pub path: String,
    pub gopkgs_path: String,
    pub version: i64,
    pub revision: String,
    pub allows_unpinned: bool,
    pub error: String,
    pub documentation_prefix: String,
}

impl Repo {
    /// Versioned import path, falling back to the revision path when no
    /// version has been published.
    pub fn version_import_path(&self) -> String {
        if self.version > 0 {
            format!("{}.v{}", self.gopkgs_path, self.version)
        } else {
            self.revision_import_path()
        }
    }

    /// Revision-pinned import path, falling back to the bare mirror path when
    /// no revision is known.
    pub fn revision_import_path(&self) -> String {
        if self.revision.is_empty() {
            self.gopkgs_path.clone()
        } else {
            format!("{}.r{}", self.gopkgs_path, self.revision)
        }
    }

    pub fn version_documentation(&self) -> String {
        format!("{}{}", self.documentation_prefix, self.version_import_path())
    }

    pub fn revision_documentation(&self) -> String {
        format!("{}{}", self.documentation_prefix, self.revision_import_path())
    }
}

/// Batched registry lookup.
pub trait Registry {
    /// Resolves every request; the result holds one record per request, in
    /// request order.
    fn resolve(&self, requests: &[RepoRequest]) -> Result<Vec<Repo>, RegistryError>;
}

/// Registry reached over HTTP.
#[derive(Clone)]
pub struct HttpRegistry {
    host: String,
    agent: ureq::Agent,
}

impl HttpRegistry {
    pub fn new(host: impl Into<String>) -> Self {
        let config = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .build();
        Self {
            host: host.into(),
            agent: ureq::Agent::new_with_config(config),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn api_url(&self, endpoint: &str) -> String {
        format!("http://{}/api/v{}{}", self.host, API_VERSION, endpoint)
    }

    fn transport(&self, err: ureq::Error) -> RegistryError {
        RegistryError::Transport {
            host: self.host.clone(),
            message: err.to_string(),
        }
    }
}

impl Registry for HttpRegistry {
    fn resolve(&self, requests: &[RepoRequest]) -> Result<Vec<Repo>, RegistryError> {
        let url = self.api_url("/info");
        tracing::debug!(%url, count = requests.len(), "resolving repositories");

        let mut response = self
            .agent
            .post(&url)
            .send_json(requests)
            .map_err(|e| self.transport(e))?;
        let status = response.status();
        let body = response
            .body_mut()
            .read_to_string()
            .map_err(|e| self.transport(e))?;

        if !status.is_success() {
            return Err(RegistryError::Status {
                code: status.as_u16(),
                host: self.host.clone(),
                body,
            });
        }

        decode_repos(&body, requests.len())
    }
}

/// Decodes a registry response holding `expected` records.
pub fn decode_repos(body: &str, expected: usize) -> Result<Vec<Repo>, RegistryError> {
    let repos: Vec<Repo> = serde_json::from_str(body).map_err(|source| RegistryError::Decode {
        source,
        body: body.to_string(),
    })?;
    if repos.len() != expected {
        return Err(RegistryError::Mismatch {
            expected,
            got: repos.len(),
        });
    }
    Ok(repos)
}

/// Looks up a single repository, turning an inline error into a failure.
pub fn lookup(registry: &dyn Registry, path: &str) -> Result<Repo, RegistryError> {
    let repo = registry
        .resolve(&[RepoRequest::latest(path)])?
        .into_iter()
        .next()
        .ok_or(RegistryError::Mismatch {
            expected: 1,
            got: 0,
        })?;
    if !repo.error.is_empty() {
        return Err(RegistryError::Repo {
            path: path.to_string(),
            message: repo.error,
        });
    }
    Ok(repo)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn widget() -> Repo {
        Repo {
            path: "github.com/acme/widget".to_string(),
            gopkgs_path: "gopkgs.com/widget".to_string(),
            version: 2,
            revision: "abc123".to_string(),
            documentation_prefix: "http://godoc.org/".to_string(),
            ..Repo::default()
        }
    }

    struct Canned(Vec<Repo>);

    impl Registry for Canned {
        fn resolve(&self, _requests: &[RepoRequest]) -> Result<Vec<Repo>, RegistryError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn version_path_uses_published_version() {
        assert_eq!(widget().version_import_path(), "gopkgs.com/widget.v2");
    }

    #[test]
    fn version_path_falls_back_to_revision_then_bare() {
        let mut repo = widget();
        repo.version = 0;
        assert_eq!(repo.version_import_path(), "gopkgs.com/widget.rabc123");
        repo.revision.clear();
        assert_eq!(repo.version_import_path(), "gopkgs.com/widget");
    }

    #[test]
    fn documentation_urls_use_prefix() {
        let repo = widget();
        assert_eq!(
            repo.version_documentation(),
            "http://godoc.org/gopkgs.com/widget.v2"
        );
        assert_eq!(
            repo.revision_documentation(),
            "http://godoc.org/gopkgs.com/widget.rabc123"
        );
    }

    #[test]
    fn requests_serialize_with_wire_names() {
        let value = serde_json::to_value(vec![RepoRequest::latest("github.com/acme/widget")]).unwrap();
        assert_eq!(
            value,
            json!([{ "path": "github.com/acme/widget", "revision": "" }])
        );
    }

    #[test]
    fn decodes_records_with_missing_fields() {
        let body = r#"[
            {"path": "github.com/acme/widget", "gopkgs_path": "gopkgs.com/widget", "version": 2},
            {"path": "github.com/acme/gone", "error": "not found"}
        ]"#;
        let repos = decode_repos(body, 2).unwrap();
        assert_eq!(repos[0].version, 2);
        assert!(!repos[0].allows_unpinned);
        assert_eq!(repos[1].error, "not found");
        assert!(repos[1].gopkgs_path.is_empty());
    }

    #[test]
    fn malformed_body_is_a_decode_error() {
        let err = decode_repos("<html>oops</html>", 1).unwrap_err();
        assert!(matches!(err, RegistryError::Decode { .. }));
        assert!(err.to_string().contains("<html>oops</html>"));
    }

    #[test]
    fn short_response_is_a_mismatch() {
        let err = decode_repos("[]", 1).unwrap_err();
        assert!(matches!(
            err,
            RegistryError::Mismatch {
                expected: 1,
                got: 0
            }
        ));
    }

    #[test]
    fn lookup_surfaces_inline_errors() {
        let registry = Canned(vec![Repo {
            path: "github.com/acme/gone".to_string(),
            error: "not found".to_string(),
            ..Repo::default()
        }]);
        let err = lookup(&registry, "github.com/acme/gone").unwrap_err();
        assert_eq!(
            err.to_string(),
            "gopkgs can't find package github.com/acme/gone: not found"
        );
    }

    #[test]
    fn lookup_returns_the_record() {
        let registry = Canned(vec![widget()]);
        assert_eq!(lookup(&registry, "github.com/acme/widget").unwrap(), widget());
    }

    #[test]
    fn api_url_includes_version() {
        let registry = HttpRegistry::new("localhost:8080");
        assert_eq!(registry.host(), "localhost:8080");
        assert_eq!(registry.api_url("/info"), "http://localhost:8080/api/v1/info");
    }
}
