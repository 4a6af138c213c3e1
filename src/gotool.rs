//! Go toolchain collaborators.
//!
//! Package lookups go through the GOPATH workspace layout
//! (`$GOPATH/src/<import path>`), and missing dependencies are fetched by
//! shelling out to `go get`, the same way the toolchain would do it.

use crate::error::MaterializeError;
use crate::matcher::GOPKGS_PREFIX;
use crate::scanner;
use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};
use std::process::Command;
use walkdir::WalkDir;

/// Makes an import path available locally.
pub trait Materializer {
    fn materialize(&self, import_path: &str) -> Result<(), MaterializeError>;
}

/// Looks up the declared name of an imported package.
pub trait PackageNames {
    fn package_name(&self, import_path: &str) -> Result<String>;
}

/// The `go` command and the GOPATH it works in.
#[derive(Debug, Clone)]
pub struct GoTool {
    gopath: Vec<PathBuf>,
    verbose: bool,
}

impl GoTool {
    pub fn new(gopath: Vec<PathBuf>, verbose: bool) -> Self {
        Self { gopath, verbose }
    }

    /// Uses `$GOPATH`, falling back to `$HOME/go` like the go tool.
    pub fn from_env(verbose: bool) -> Self {
        Self::new(gopath_from_env(), verbose)
    }

    pub fn gopath(&self) -> &[PathBuf] {
        &self.gopath
    }

    /// Runs `go get [-u] [-v] <import_path>`, forwarding its output.
    pub fn go_get(&self, import_path: &str, update: bool) -> Result<()> {
        let mut cmd = Command::new("go");
        cmd.arg("get");
        if update {
            cmd.arg("-u");
        }
        if self.verbose {
            cmd.arg("-v");
        }
        cmd.arg(import_path);

        let status = cmd.status().context("Failed to run go get")?;
        if !status.success() {
            bail!("go get {} failed: {}", import_path, status);
        }
        Ok(())
    }

    /// Import paths of every gopkgs.com checkout in the GOPATH.
    ///
    /// A checkout is a directory under `src/gopkgs.com` holding a `.git`
    /// directory.
    pub fn gopkgs_checkouts(&self) -> Vec<String> {
        let mut found = Vec::new();

        for root in &self.gopath {
            let src = root.join("src");
            let base = src.join(GOPKGS_PREFIX.trim_end_matches('/'));
            for entry in WalkDir::new(&base)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|e| e.file_name() != ".git")
                .filter_map(|e| e.ok())
            {
                if !entry.file_type().is_dir() || !entry.path().join(".git").is_dir() {
                    continue;
                }
                if let Ok(rel) = entry.path().strip_prefix(&src) {
                    let parts: Vec<_> = rel
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy().into_owned())
                        .collect();
                    found.push(parts.join("/"));
                }
            }
        }

        found
    }
}

impl Materializer for GoTool {
    fn materialize(&self, import_path: &str) -> Result<(), MaterializeError> {
        if find_import_dir(&self.gopath, import_path).is_some() {
            return Ok(());
        }
        self.go_get(import_path, false)
            .map_err(|err| MaterializeError {
                path: import_path.to_string(),
                message: format!("{:#}", err),
            })
    }
}

impl PackageNames for GoTool {
    fn package_name(&self, import_path: &str) -> Result<String> {
        let dir = find_import_dir(&self.gopath, import_path)
            .with_context(|| format!("can't find import {}", import_path))?;
        read_package_name(&dir)
    }
}

/// Declared package name of the files in `dir` that take part in the build.
pub fn read_package_name(dir: &Path) -> Result<String> {
    match scanner::load_package(dir)? {
        Some(package) => Ok(package.name),
        None => bail!("no buildable Go source files in {}", dir.display()),
    }
}

/// Directory holding `import_path` in the first GOPATH entry that has it.
pub fn find_import_dir(gopath: &[PathBuf], import_path: &str) -> Option<PathBuf> {
    if import_path.is_empty() || import_path.starts_with('.') || Path::new(import_path).is_absolute() {
        return None;
    }
    gopath
        .iter()
        .map(|root| root.join("src").join(import_path))
        .find(|dir| dir.is_dir())
}

fn gopath_from_env() -> Vec<PathBuf> {
    if let Some(value) = std::env::var_os("GOPATH") {
        let roots: Vec<_> = std::env::split_paths(&value)
            .filter(|p| !p.as_os_str().is_empty())
            .collect();
        if !roots.is_empty() {
            return roots;
        }
    }
    std::env::var_os("HOME")
        .map(|home| vec![PathBuf::from(home).join("go")])
        .unwrap_or_default()
}
