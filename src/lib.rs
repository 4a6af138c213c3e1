//! gopkgs library for rewriting Go imports to gopkgs.com mirror paths.
//!
//! This library provides programmatic access to the import rewriter. A
//! package pass involves four phases:
//!
//! 1. **Scanning**: Parse a package's `.go` files and extract their imports
//! 2. **Analysis**: Keep every import whose types are asserted or type-switched on
//! 3. **Resolution**: Ask the registry for each remaining repository and pick its path
//! 4. **Rewriting**: Substitute the import paths and write the files back
//!
//! # Example
//!
//! ```no_run
//! use gopkgs::engine::{self, Collaborators, RewriteOptions};
//! use gopkgs::gate::TerminalGate;
//! use gopkgs::gotool::GoTool;
//! use gopkgs::registry::HttpRegistry;
//! use gopkgs::state::RewriteState;
//! use std::path::PathBuf;
//!
//! let registry = HttpRegistry::new("gopkgs.com");
//! let tool = GoTool::from_env(false);
//! let mut gate = TerminalGate;
//! let mut tools = Collaborators {
//!     registry: &registry,
//!     materializer: &tool,
//!     names: &tool,
//!     gate: &mut gate,
//! };
//!
//! let opts = RewriteOptions { dry_run: true, ..RewriteOptions::default() };
//! let mut state = RewriteState::new();
//! let summary = engine::run(&[PathBuf::from(".")], &mut state, &mut tools, &opts);
//!
//! println!("Would rewrite {} imports", summary.imports_rewritten());
//! ```

pub mod analyzer;
pub mod buildtags;
pub mod engine;
pub mod error;
pub mod gate;
pub mod gotool;
pub mod matcher;
pub mod registry;
pub mod report;
pub mod rewriter;
pub mod scanner;
pub mod selector;
pub mod state;

// Re-export commonly used types at crate root
pub use engine::{PackageOutcome, PackageSummary, RewriteOptions, RunSummary};
pub use error::{MaterializeError, RegistryError, RewriteError};
pub use registry::{Repo, RepoRequest};
