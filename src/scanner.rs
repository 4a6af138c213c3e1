//! Go package scanner.
//!
//! Collects the package directories named on the command line, enumerates each
//! package's compilable `.go` files in a stable order, and parses them with
//! tree-sitter to extract the package clause and every import spec.

use crate::buildtags::BuildContext;
use crate::error::RewriteError;
use crate::{gotool, report};
use anyhow::{Context, Result, anyhow};
use std::collections::HashMap;
use std::ops::Range;
use std::path::{Path, PathBuf};
use tree_sitter::{Node, Parser, Tree};
use walkdir::WalkDir;

/// One import spec of a parsed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSpec {
    /// Explicit package name, `_` or `.`, when written.
    pub name: Option<String>,
    /// Unquoted import path.
    pub path: String,
    /// Byte range of the quoted path literal.
    pub path_range: Range<usize>,
    /// Byte range of the whole spec, name included.
    pub spec_range: Range<usize>,
    /// Index of the parenthesized import block holding this spec, if any.
    pub block: Option<usize>,
}

/// A parsed Go source file.
///
/// The tree is owned by the file and dropped together with it once the
/// package pass is over.
pub struct SourceFile {
    pub path: PathBuf,
    pub text: String,
    pub tree: Tree,
    /// Declared package name.
    pub package: String,
    pub imports: Vec<ImportSpec>,
}

impl std::fmt::Debug for SourceFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceFile")
            .field("path", &self.path)
            .field("package", &self.package)
            .field("imports", &self.imports)
            .finish_non_exhaustive()
    }
}

/// The parseable files of one package directory, in discovery order.
#[derive(Debug)]
pub struct Package {
    pub dir: PathBuf,
    /// Package name declared by most of the files.
    pub name: String,
    pub files: Vec<SourceFile>,
}

/// Which directory entries to skip while expanding `dir/...` patterns.
#[derive(Debug, Clone, Default)]
pub struct ScanFilter {
    excludes: Vec<glob::Pattern>,
    default_excludes: bool,
}

impl ScanFilter {
    /// Compiles `excludes` as glob patterns. With `default_excludes`, entries
    /// named `testdata` or starting with `.` or `_` are skipped too, like the
    /// go tool does.
    pub fn new(excludes: &[String], default_excludes: bool) -> Result<Self> {
        let excludes = excludes
            .iter()
            .map(|p| glob::Pattern::new(p).with_context(|| format!("Invalid exclude pattern '{}'", p)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            excludes,
            default_excludes,
        })
    }

    fn is_excluded(&self, entry: &walkdir::DirEntry) -> bool {
        let Some(name) = entry.file_name().to_str() else {
            return false;
        };
        if self.default_excludes && is_ignored_name(name) {
            return true;
        }
        self.excludes
            .iter()
            .any(|p| p.matches(name) || p.matches_path(entry.path()))
    }
}

fn is_ignored_name(name: &str) -> bool {
    name.starts_with('.') || name.starts_with('_') || name == "testdata"
}

/// Expands command-line patterns into package directories.
///
/// A pattern is a directory, a recursive `dir/...` pattern, or an import path
/// looked up under `src` of the `gopath` entries. No patterns means the current
/// directory. Patterns that resolve to nothing are reported and skipped.
pub fn collect_package_dirs(
    patterns: &[String],
    filter: &ScanFilter,
    gopath: &[PathBuf],
) -> Result<Vec<PathBuf>> {
    if patterns.is_empty() {
        return Ok(vec![PathBuf::from(".")]);
    }

    let mut dirs = Vec::new();
    for pattern in patterns {
        if let Some(root) = recursive_root(pattern) {
            for entry in WalkDir::new(root)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|e| e.depth() == 0 || !filter.is_excluded(e))
            {
                let entry = entry?;
                if entry.file_type().is_dir() && !discover_files(entry.path())?.is_empty() {
                    dirs.push(entry.into_path());
                }
            }
        } else if Path::new(pattern).is_dir() {
            dirs.push(PathBuf::from(pattern));
        } else if let Some(dir) = gotool::find_import_dir(gopath, pattern) {
            dirs.push(dir);
        } else {
            report::warn(format!("can't find package {}", pattern));
        }
    }

    Ok(dirs)
}

fn recursive_root(pattern: &str) -> Option<&str> {
    if pattern == "..." {
        return Some(".");
    }
    pattern.strip_suffix("/...").map(|root| if root.is_empty() { "/" } else { root })
}

/// Lists the compilable `.go` files of a package directory, sorted by name.
///
/// Test files, names starting with `.` or `_` and names whose `_GOOS` or
/// `_GOARCH` suffix excludes the host are not part of the build and are left
/// out. Cgo files are ordinary `.go` files and are included.
pub fn discover_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let ctx = BuildContext::host();
    let mut files = Vec::new();

    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let is_source = entry.file_name().to_str().is_some_and(|name| {
            name.ends_with(".go")
                && !name.ends_with("_test.go")
                && !name.starts_with('.')
                && !name.starts_with('_')
                && ctx.matches_file_name(name)
        });
        if is_source {
            files.push(entry.into_path());
        }
    }

    Ok(files)
}

/// Parses every file of the package in `dir`.
///
/// Files that can't be read or parsed are dropped; the rest of the package is
/// still processed. So are files whose build constraints exclude them, like
/// generators tagged `//go:build ignore`, and files declaring a package other
/// than the one most files declare. Returns `None` when nothing parseable is
/// left.
pub fn load_package(dir: &Path) -> Result<Option<Package>, RewriteError> {
    let names = discover_files(dir).map_err(|source| RewriteError::Discover {
        dir: dir.to_path_buf(),
        source,
    })?;

    let ctx = BuildContext::host();
    let mut parser = go_parser().map_err(RewriteError::Grammar)?;
    let mut files = Vec::new();
    for path in names {
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) => {
                report::warn(format!("can't read {}: {}", path.display(), err));
                continue;
            }
        };
        if !ctx.matches_source(&text) {
            tracing::debug!(file = %path.display(), "build constraints exclude file");
            continue;
        }
        match parse_with(&mut parser, &path, text) {
            Some(file) => files.push(file),
            None => tracing::debug!(file = %path.display(), "dropping file with parse errors"),
        }
    }

    let Some(name) = majority_package(&files) else {
        return Ok(None);
    };
    files.retain(|file| {
        let keep = file.package == name;
        if !keep {
            report::warn(format!(
                "ignoring {}: declares package {}, expected {}",
                file.path.display(),
                file.package,
                name
            ));
        }
        keep
    });

    Ok(Some(Package {
        dir: dir.to_path_buf(),
        name,
        files,
    }))
}

/// The package name declared by most files; ties go to the name seen first.
fn majority_package(files: &[SourceFile]) -> Option<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for file in files {
        *counts.entry(file.package.as_str()).or_default() += 1;
    }
    let best = counts.values().copied().max()?;
    files
        .iter()
        .map(|file| file.package.as_str())
        .find(|name| counts[name] == best)
        .map(str::to_string)
}

/// Creates a tree-sitter parser for Go.
pub fn go_parser() -> Result<Parser> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_go::LANGUAGE.into())
        .map_err(|e| anyhow!("Failed to set Go language: {}", e))?;
    Ok(parser)
}

/// Parses Go source text. Returns `None` when the text has syntax errors.
pub fn parse_source(path: &Path, text: String) -> Result<Option<SourceFile>> {
    let mut parser = go_parser()?;
    Ok(parse_with(&mut parser, path, text))
}

fn parse_with(parser: &mut Parser, path: &Path, text: String) -> Option<SourceFile> {
    let tree = parser.parse(&text, None)?;
    let root = tree.root_node();
    if root.has_error() {
        return None;
    }

    let (package, imports) = extract_header(root, &text);

    Some(SourceFile {
        path: path.to_path_buf(),
        text,
        tree,
        package,
        imports,
    })
}

/// Reads the package clause and import specs off the top level of a file.
fn extract_header(root: Node<'_>, text: &str) -> (String, Vec<ImportSpec>) {
    let mut package = String::new();
    let mut imports = Vec::new();
    let mut blocks = 0;

    let mut cursor = root.walk();
    for decl in root.named_children(&mut cursor) {
        match decl.kind() {
            "package_clause" => {
                let mut inner = decl.walk();
                if let Some(ident) = decl
                    .named_children(&mut inner)
                    .find(|n| n.kind() == "package_identifier")
                {
                    package = node_text(ident, text).to_string();
                }
            }
            "import_declaration" => {
                let mut inner = decl.walk();
                for child in decl.named_children(&mut inner) {
                    match child.kind() {
                        "import_spec" => imports.extend(import_spec(child, text, None)),
                        "import_spec_list" => {
                            let block = blocks;
                            blocks += 1;
                            let mut list = child.walk();
                            imports.extend(
                                child
                                    .named_children(&mut list)
                                    .filter(|n| n.kind() == "import_spec")
                                    .filter_map(|n| import_spec(n, text, Some(block))),
                            );
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }

    (package, imports)
}

fn import_spec(node: Node<'_>, text: &str, block: Option<usize>) -> Option<ImportSpec> {
    let path_node = node.child_by_field_name("path")?;
    let path = unquote(node_text(path_node, text))?;
    let name = node
        .child_by_field_name("name")
        .map(|n| node_text(n, text).to_string());
    Some(ImportSpec {
        name,
        path,
        path_range: path_node.byte_range(),
        spec_range: node.byte_range(),
        block,
    })
}

/// Source text covered by `node`.
pub fn node_text<'a>(node: Node<'_>, text: &'a str) -> &'a str {
    &text[node.byte_range()]
}

/// Decodes an interpreted or raw Go string literal.
///
/// Only the escapes that can sensibly appear in an import path are accepted.
pub fn unquote(literal: &str) -> Option<String> {
    if let Some(raw) = literal
        .strip_prefix('`')
        .and_then(|s| s.strip_suffix('`'))
    {
        return Some(raw.to_string());
    }

    let inner = literal.strip_prefix('"')?.strip_suffix('"')?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            '\\' => out.push('\\'),
            '"' => out.push('"'),
            _ => return None,
        }
    }
    Some(out)
}

/// Encodes an import path as an interpreted Go string literal.
pub fn quote(path: &str) -> String {
    format!("\"{}\"", path.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Parses Go source held in memory, for tests.
#[cfg(test)]
pub fn parse_str(text: &str) -> SourceFile {
    parse_source(Path::new("test.go"), text.to_string())
        .unwrap()
        .expect("test source parses")
}
