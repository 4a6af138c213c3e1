//! Committing import substitutions to disk.
//!
//! Substitutions are applied at the byte offsets of the path literals captured
//! while parsing, from the end of the file backwards so earlier offsets stay
//! valid. Parenthesized import blocks that were touched get their
//! blank-line-separated groups re-sorted by path, the way gofmt orders them,
//! so the result needs no further formatting. The new text replaces the file
//! atomically and keeps its permission bits.

use crate::gotool::Materializer;
use crate::matcher::{match_repository, replace_prefix};
use crate::report;
use crate::scanner::{ImportSpec, SourceFile, quote};
use crate::state::RewriteState;
use anyhow::{Context, Result};
use colored::Colorize;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// A single text replacement with position information.
#[derive(Debug, Clone)]
struct Replacement {
    start: usize,
    end: usize,
    new_text: String,
}

/// What happened to one file.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FileReport {
    pub file: PathBuf,
    /// Original import path to its replacement, for every live substitution.
    pub substitutions: BTreeMap<String, String>,
    /// Substitutions dropped because the replacement couldn't be fetched.
    pub dropped: Vec<String>,
    pub written: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-file commit settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommitOptions {
    pub dry_run: bool,
    pub verbose: bool,
}

/// Substitutions for `file` under the package's repository rewrites.
///
/// `rewrites` maps repository keys to their replacement; every import under a
/// key is rewritten, keeping its subpackage suffix. Disabled import paths are
/// never substituted.
pub fn substitutions(
    file: &SourceFile,
    rewrites: &BTreeMap<String, String>,
    disabled: &BTreeSet<String>,
) -> BTreeMap<String, String> {
    let mut subs = BTreeMap::new();

    for import in &file.imports {
        if disabled.contains(&import.path) {
            continue;
        }
        let Some(repo) = match_repository(&import.path) else {
            continue;
        };
        if let Some(new_path) = rewrites
            .get(&repo.key)
            .and_then(|replacement| replace_prefix(&repo.key, &import.path, replacement))
        {
            subs.insert(import.path.clone(), new_path);
        }
    }

    subs
}

/// Applies `subs` to `file`: reports them on a dry run, otherwise fetches the
/// replacements and rewrites the file.
///
/// A replacement that can't be fetched drops only its own substitution.
/// Failures are recorded in the report instead of being returned, so the
/// remaining files of the package still get processed.
pub fn commit(
    file: &SourceFile,
    mut subs: BTreeMap<String, String>,
    state: &mut RewriteState,
    materializer: &dyn Materializer,
    opts: CommitOptions,
) -> FileReport {
    let mut outcome = FileReport {
        file: file.path.clone(),
        ..FileReport::default()
    };
    if subs.is_empty() {
        return outcome;
    }

    if opts.dry_run {
        print_substitutions("would rewrite", &file.path, &subs);
        outcome.substitutions = subs;
        return outcome;
    }

    subs.retain(|original, replacement| match state.materialize(materializer, replacement) {
        Ok(()) => true,
        Err(err) => {
            report::warn(format!("{}, using original {}", err, original));
            outcome.dropped.push(original.clone());
            false
        }
    });
    if subs.is_empty() {
        return outcome;
    }

    if opts.verbose {
        print_substitutions("rewrite", &file.path, &subs);
    }

    let new_text = render(&file.text, &file.imports, &subs);
    match write_atomic(&file.path, &new_text) {
        Ok(()) => outcome.written = true,
        Err(err) => {
            report::warn(format!("error rewriting file {}: {:#}", file.path.display(), err));
            outcome.error = Some(format!("{:#}", err));
        }
    }
    outcome.substitutions = subs;
    outcome
}

fn print_substitutions(verb: &str, file: &Path, subs: &BTreeMap<String, String>) {
    println!(
        "{} {} imports in {}:",
        verb.yellow().bold(),
        subs.len(),
        file.display()
    );
    for (original, replacement) in subs {
        println!("\t{} => {}", original.red(), replacement.green());
    }
}

/// Regenerates `text` with every import path in `subs` replaced.
///
/// Groups of a parenthesized import block that contain a substitution are
/// re-sorted by (path, name) and exact duplicates removed, each spec taking
/// the comment lines directly above it along. Blocks whose specs don't sit one
/// per line are left in their original order.
pub fn render(text: &str, imports: &[ImportSpec], subs: &BTreeMap<String, String>) -> String {
    let mut replacements = Vec::new();

    let touched: BTreeSet<usize> = imports
        .iter()
        .filter(|i| subs.contains_key(&i.path))
        .filter_map(|i| i.block)
        .collect();

    for import in imports {
        let sorted_block = import.block.is_some_and(|b| touched.contains(&b));
        if !sorted_block && let Some(new_path) = subs.get(&import.path) {
            replacements.push(Replacement {
                start: import.path_range.start,
                end: import.path_range.end,
                new_text: quote(new_path),
            });
        }
    }

    for block in touched {
        let specs: Vec<&ImportSpec> = imports.iter().filter(|i| i.block == Some(block)).collect();
        match spec_lines(text, &specs) {
            Some(lines) => replacements.extend(sort_groups(text, &specs, &lines, subs)),
            None => replacements.extend(specs.iter().filter_map(|spec| {
                subs.get(&spec.path).map(|new_path| Replacement {
                    start: spec.path_range.start,
                    end: spec.path_range.end,
                    new_text: quote(new_path),
                })
            })),
        }
    }

    apply_replacements(text, replacements)
}

/// Where a spec sits in its block: the line holding it and the run of `//`
/// comment lines directly above it, which belong to the spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SpecLine {
    /// Start of the first leading comment line, or `start` when there is none.
    lead: usize,
    start: usize,
    end: usize,
}

/// Lines of each spec, or `None` when any spec shares its line with
/// something other than whitespace or a trailing comment.
fn spec_lines(text: &str, specs: &[&ImportSpec]) -> Option<Vec<SpecLine>> {
    specs
        .iter()
        .map(|spec| {
            let start = text[..spec.spec_range.start].rfind('\n').map_or(0, |i| i + 1);
            let end = text[spec.spec_range.end..]
                .find('\n')
                .map_or(text.len(), |i| spec.spec_range.end + i);
            let before = &text[start..spec.spec_range.start];
            let after = text[spec.spec_range.end..end].trim();
            let alone = before.trim().is_empty() && (after.is_empty() || after.starts_with("//"));
            alone.then(|| SpecLine {
                lead: leading_comment_start(text, start),
                start,
                end,
            })
        })
        .collect()
}

/// Walks up from the line starting at `start` over comment-only lines,
/// stopping at a blank line or code.
fn leading_comment_start(text: &str, start: usize) -> usize {
    let mut lead = start;
    while lead > 0 {
        let above = text[..lead - 1].rfind('\n').map_or(0, |i| i + 1);
        if !text[above..lead - 1].trim_start().starts_with("//") {
            break;
        }
        lead = above;
    }
    lead
}

/// A spec line being sorted, with the comment lines that travel with it.
struct SortEntry {
    key: (String, Option<String>),
    comment: String,
    line: String,
}

/// One replacement per group of adjacent spec lines holding a substitution.
fn sort_groups(
    text: &str,
    specs: &[&ImportSpec],
    lines: &[SpecLine],
    subs: &BTreeMap<String, String>,
) -> Vec<Replacement> {
    let mut groups: Vec<Vec<usize>> = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        match groups.last_mut() {
            Some(group) if lines[group[group.len() - 1]].end + 1 == line.lead => group.push(i),
            _ => groups.push(vec![i]),
        }
    }

    groups
        .into_iter()
        .filter(|group| group.iter().any(|&i| subs.contains_key(&specs[i].path)))
        .map(|group| {
            let mut entries: Vec<SortEntry> = group
                .iter()
                .map(|&i| {
                    let spec = specs[i];
                    let SpecLine { lead, start, end } = lines[i];
                    let comment = text[lead..start].to_string();
                    match subs.get(&spec.path) {
                        Some(new_path) => SortEntry {
                            key: (new_path.clone(), spec.name.clone()),
                            comment,
                            line: format!(
                                "{}{}{}",
                                &text[start..spec.path_range.start],
                                quote(new_path),
                                &text[spec.path_range.end..end]
                            ),
                        },
                        None => SortEntry {
                            key: (spec.path.clone(), spec.name.clone()),
                            comment,
                            line: text[start..end].to_string(),
                        },
                    }
                })
                .collect();
            entries.sort_by(|a, b| a.key.cmp(&b.key));
            // A dropped duplicate hands its comment to the spec that stays.
            entries.dedup_by(|later, earlier| {
                let same = later.key == earlier.key;
                if same {
                    earlier.comment.push_str(&later.comment);
                }
                same
            });

            Replacement {
                start: lines[group[0]].lead,
                end: lines[group[group.len() - 1]].end,
                new_text: entries
                    .into_iter()
                    .map(|entry| entry.comment + &entry.line)
                    .collect::<Vec<_>>()
                    .join("\n"),
            }
        })
        .collect()
}

/// Applies replacements to source content, returning the modified string.
///
/// Sorts replacements by start offset (descending) and applies each in turn.
/// This ensures earlier replacements don't invalidate later offsets.
fn apply_replacements(content: &str, mut replacements: Vec<Replacement>) -> String {
    replacements.sort_by(|a, b| b.start.cmp(&a.start));

    let mut result = content.to_string();
    for rep in replacements {
        if rep.start <= result.len() && rep.end <= result.len() && rep.start <= rep.end {
            result.replace_range(rep.start..rep.end, &rep.new_text);
        }
    }

    result
}

/// Replaces the contents of `path` as a whole, keeping its permission bits.
///
/// The text goes to a temporary file in the same directory, which is then
/// renamed over the original.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let permissions = std::fs::metadata(path)
        .with_context(|| format!("Failed to stat {}", path.display()))?
        .permissions();
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temporary file in {}", dir.display()))?;
    tmp.write_all(contents.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.as_file().set_permissions(permissions)?;
    tmp.persist(path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MaterializeError;
    use crate::scanner::parse_str;
    use std::cell::RefCell;

    fn subs(items: &[(&str, &str)]) -> BTreeMap<String, String> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn rendered(source: &str, items: &[(&str, &str)]) -> String {
        let file = parse_str(source);
        render(&file.text, &file.imports, &subs(items))
    }

    #[derive(Default)]
    struct Recorder {
        calls: RefCell<Vec<String>>,
    }

    impl Materializer for Recorder {
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

    #[test]
    fn substitutions_keep_subpackage_suffix() {
        let file = parse_str(
            "package main\n\nimport (\n\t\"fmt\"\n\t\"github.com/acme/widget\"\n\t\"github.com/acme/widget/gear\"\n\t\"github.com/acme/widgets\"\n)\n",
        );
        let rewrites = subs(&[("github.com/acme/widget", "gopkgs.com/widget.v2")]);
        let found = substitutions(&file, &rewrites, &BTreeSet::new());
        assert_eq!(
            found,
            subs(&[
                ("github.com/acme/widget", "gopkgs.com/widget.v2"),
                ("github.com/acme/widget/gear", "gopkgs.com/widget.v2/gear"),
            ])
        );
    }

    #[test]
    fn substitutions_skip_disabled_imports() {
        let file = parse_str("package main\n\nimport \"github.com/acme/widget\"\n");
        let rewrites = subs(&[("github.com/acme/widget", "gopkgs.com/widget.v2")]);
        let disabled: BTreeSet<String> = ["github.com/acme/widget".to_string()].into();
        assert!(substitutions(&file, &rewrites, &disabled).is_empty());
    }

    #[test]
    fn replaces_single_import() {
        let out = rendered(
            "package main\n\nimport \"github.com/acme/widget\"\n\nvar _ = widget.New\n",
            &[("github.com/acme/widget", "gopkgs.com/widget.v2")],
        );
        assert_eq!(
            out,
            "package main\n\nimport \"gopkgs.com/widget.v2\"\n\nvar _ = widget.New\n"
        );
    }

    #[test]
    fn resorts_touched_group_only() {
        let source = r#"package main

import (
	"fmt"
	"os"

	"code.google.com/p/go.tools/astutil"
	"github.com/acme/widget"
	"github.com/zed/zip" // zipper
)

func main() {}
"#;
        let out = rendered(source, &[("github.com/zed/zip", "gopkgs.com/zip.v1")]);
        insta::assert_snapshot!(out, @r#"
package main

import (
	"fmt"
	"os"

	"code.google.com/p/go.tools/astutil"
	"github.com/acme/widget"
	"gopkgs.com/zip.v1" // zipper
)

func main() {}
"#);
    }

    #[test]
    fn leading_comments_move_with_their_import() {
        let source = r#"package main

import (
	// zip compresses things
	"github.com/zed/zip"
	"github.com/acme/a"
)
"#;
        let out = rendered(source, &[("github.com/zed/zip", "gopkgs.com/zip.v1")]);
        insta::assert_snapshot!(out, @r#"
package main

import (
	"github.com/acme/a"
	// zip compresses things
	"gopkgs.com/zip.v1"
)
"#);
    }

    #[test]
    fn comment_below_blank_line_moves_within_its_group() {
        let source = "package main\n\nimport (\n\t\"fmt\"\n\n\t// third party\n\t\"github.com/zed/zip\"\n\t\"github.com/acme/a\"\n)\n";
        let out = rendered(source, &[("github.com/zed/zip", "gopkgs.com/zip.v1")]);
        assert_eq!(
            out,
            "package main\n\nimport (\n\t\"fmt\"\n\n\t\"github.com/acme/a\"\n\t// third party\n\t\"gopkgs.com/zip.v1\"\n)\n"
        );
    }

    #[test]
    fn moves_rewritten_import_to_sorted_position() {
        let source = "package main\n\nimport (\n\t\"github.com/acme/widget\"\n\t\"golang.org/x/net/context\"\n\tw \"github.com/zed/zip\"\n)\n";
        let out = rendered(
            source,
            &[("github.com/acme/widget", "gopkgs.com/widget.v2")],
        );
        assert_eq!(
            out,
            "package main\n\nimport (\n\tw \"github.com/zed/zip\"\n\t\"golang.org/x/net/context\"\n\t\"gopkgs.com/widget.v2\"\n)\n"
        );
    }

    #[test]
    fn removes_duplicates_created_by_rewrite() {
        let source = "package main\n\nimport (\n\t\"github.com/acme/widget\"\n\t\"gopkgs.com/widget.v2\"\n)\n";
        let out = rendered(
            source,
            &[("github.com/acme/widget", "gopkgs.com/widget.v2")],
        );
        assert_eq!(out, "package main\n\nimport (\n\t\"gopkgs.com/widget.v2\"\n)\n");
    }

    #[test]
    fn blocks_with_shared_lines_keep_their_order() {
        let source = "package main\n\nimport (\"github.com/zed/zip\"; \"fmt\")\n";
        let out = rendered(source, &[("github.com/zed/zip", "gopkgs.com/zip.v1")]);
        assert_eq!(out, "package main\n\nimport (\"gopkgs.com/zip.v1\"; \"fmt\")\n");
    }

    #[test]
    fn rendering_is_idempotent() {
        let source = "package main\n\nimport (\n\t\"fmt\"\n\t\"github.com/acme/widget\"\n)\n";
        let items = [("github.com/acme/widget", "gopkgs.com/widget.v2")];
        let once = rendered(source, &items);
        let twice = rendered(&once, &items);
        assert_eq!(once, twice);
    }

    #[test]
    fn dry_run_touches_neither_disk_nor_materializer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("main.go");
        let source = "package main\n\nimport \"github.com/acme/widget\"\n";
        std::fs::write(&path, source).unwrap();
        let mut file = parse_str(source);
        file.path = path.clone();

        let recorder = Recorder::default();
        let mut state = RewriteState::new();
        let report = commit(
            &file,
            subs(&[("github.com/acme/widget", "gopkgs.com/widget.v2")]),
            &mut state,
            &recorder,
            CommitOptions {
                dry_run: true,
                verbose: false,
            },
        );

        assert_eq!(report.substitutions.len(), 1);
        assert!(!report.written);
        assert!(recorder.calls.borrow().is_empty());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), source);
    }

    #[test]
    fn failed_materialization_drops_only_that_substitution() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("main.go");
        let source = "package main\n\nimport (\n\t\"github.com/acme/broken\"\n\t\"github.com/acme/widget\"\n)\n";
        std::fs::write(&path, source).unwrap();
        let mut file = parse_str(source);
        file.path = path.clone();

        let recorder = Recorder::default();
        let mut state = RewriteState::new();
        let report = commit(
            &file,
            subs(&[
                ("github.com/acme/broken", "gopkgs.com/broken.v1"),
                ("github.com/acme/widget", "gopkgs.com/widget.v2"),
            ]),
            &mut state,
            &recorder,
            CommitOptions::default(),
        );

        assert!(report.written);
        assert_eq!(report.dropped, vec!["github.com/acme/broken".to_string()]);
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "package main\n\nimport (\n\t\"github.com/acme/broken\"\n\t\"gopkgs.com/widget.v2\"\n)\n"
        );
    }

    #[test]
    fn all_substitutions_dropped_leaves_file_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("main.go");
        let source = "package main\n\nimport \"github.com/acme/broken\"\n";
        std::fs::write(&path, source).unwrap();
        let mut file = parse_str(source);
        file.path = path.clone();

        let mut state = RewriteState::new();
        let report = commit(
            &file,
            subs(&[("github.com/acme/broken", "gopkgs.com/broken.v1")]),
            &mut state,
            &Recorder::default(),
            CommitOptions::default(),
        );
        assert!(!report.written);
        assert!(report.substitutions.is_empty());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), source);
    }

    #[test]
    fn write_failure_is_reported_not_raised() {
        let dir = tempfile::tempdir().unwrap();
        let source = "package main\n\nimport \"github.com/acme/widget\"\n";
        let mut file = parse_str(source);
        file.path = dir.path().join("vanished.go");

        let mut state = RewriteState::new();
        let report = commit(
            &file,
            subs(&[("github.com/acme/widget", "gopkgs.com/widget.v2")]),
            &mut state,
            &Recorder::default(),
            CommitOptions::default(),
        );
        assert!(!report.written);
        assert!(report.error.unwrap().contains("Failed to stat"));
    }

    #[cfg(unix)]
    #[test]
    fn atomic_write_preserves_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gen.go");
        std::fs::write(&path, "old").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o640)).unwrap();

        write_atomic(&path, "new").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new");
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o640);
    }
}
