//! Error types for the typed boundaries of the rewrite engine.
//!
//! Plumbing (file IO, command dispatch) uses `anyhow` with context. The
//! registry and materialization boundaries get their own enums because the
//! engine reacts differently to each failure class: a registry batch failure
//! aborts the package, a materialization failure drops one substitution.

use std::path::PathBuf;
use thiserror::Error;

/// Failure talking to the package registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The request never produced a response.
    #[error("registry request to {host} failed: {message}")]
    Transport { host: String, message: String },

    /// The registry answered with a non-success status.
    #[error("{code} status code from {host}: {body}")]
    Status { code: u16, host: String, body: String },

    /// The response body was not the expected JSON.
    #[error("error decoding registry response: {source}\nResponse:\n{body}")]
    Decode {
        #[source]
        source: serde_json::Error,
        body: String,
    },

    /// The registry returned a different number of records than requested.
    #[error("registry returned {got} records for {expected} requests")]
    Mismatch { expected: usize, got: usize },

    /// A single-repository lookup came back with an inline error.
    #[error("gopkgs can't find package {path}: {message}")]
    Repo { path: String, message: String },
}

/// Failure making an import path available locally.
///
/// Cloneable so the outcome can be cached for the rest of the run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("couldn't download {path}: {message}")]
pub struct MaterializeError {
    pub path: String,
    pub message: String,
}

/// Package-level failure of a rewrite pass.
#[derive(Debug, Error)]
pub enum RewriteError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("can't read package directory {}", dir.display())]
    Discover {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("can't load the Go grammar")]
    Grammar(#[source] anyhow::Error),

    #[error("interactive prompt failed")]
    Prompt(#[source] anyhow::Error),
}
