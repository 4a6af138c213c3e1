//! Command-line interface definitions.
//!
//! Defines the argument parser and subcommands using clap's derive API.
//! Each subcommand corresponds to a distinct operation: rewriting a package's
//! imports, fetching packages through their mirror path, or looking up a
//! package's documentation and registry page.

use clap::{Parser, Subcommand};
use gopkgs::engine::LibraryMode;
use gopkgs::registry::DEFAULT_API_HOST;

/// Point Go imports at their versioned gopkgs.com mirrors.
#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Args {
    /// Registry host to query.
    #[arg(long, global = true, env = "GOPKGS_API_HOST", default_value = DEFAULT_API_HOST)]
    pub api_host: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Rewrite third-party imports to their gopkgs.com paths.
    Rewrite {
        /// Package directories, `dir/...` patterns or import paths. Defaults to
        /// the current directory.
        patterns: Vec<String>,

        /// Confirm each repository before rewriting it.
        #[arg(short, long)]
        interactive: bool,

        /// Prefer revisions to versions.
        #[arg(short = 'r', long)]
        prefer_revisions: bool,

        /// Library mode: refuse to pin packages on revisions, only on versions.
        /// `auto` enables it for every package except `main`.
        #[arg(long = "lib", value_name = "auto|true|false", default_value = "auto", value_parser = parse_library_mode)]
        library: LibraryMode,

        /// Only show the changes that would be made.
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Print additional diagnostics.
        #[arg(short, long)]
        verbose: bool,

        /// Emit a JSON summary on stdout.
        #[arg(long)]
        json: bool,

        /// Glob patterns for directories to skip while expanding `dir/...`.
        /// By default, entries named `testdata` or starting with `.` or `_`
        /// are skipped.
        #[arg(short, long)]
        exclude: Vec<String>,

        /// Disable default exclusion of `testdata`, `.` and `_` prefixed entries.
        #[arg(long)]
        no_default_excludes: bool,
    },

    /// Download packages through their gopkgs.com path.
    Get {
        /// Import paths. With `-u` and none given, every gopkgs.com checkout
        /// in the GOPATH is updated.
        paths: Vec<String>,

        /// Update packages that are already downloaded, and their dependencies.
        #[arg(short, long)]
        update: bool,

        /// Prefer revisions to versions.
        #[arg(short = 'r', long)]
        prefer_revisions: bool,

        /// Print additional diagnostics.
        #[arg(short, long)]
        verbose: bool,
    },

    /// Print the documentation URL of a package.
    Doc {
        /// Import path of the package.
        path: String,

        /// Link the revision documentation instead of the version.
        #[arg(short = 'r', long)]
        prefer_revisions: bool,
    },

    /// Print the gopkgs.com page of a package.
    View {
        /// Import path of the package.
        path: String,
    },
}

impl Commands {
    pub fn verbose(&self) -> bool {
        match self {
            Commands::Rewrite { verbose, .. } | Commands::Get { verbose, .. } => *verbose,
            Commands::Doc { .. } | Commands::View { .. } => false,
        }
    }
}

fn parse_library_mode(s: &str) -> Result<LibraryMode, String> {
    s.parse()
}
