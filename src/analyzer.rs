//! Import safety analysis.
//!
//! Rewriting an import changes the identity of every type it provides. A file
//! that type-asserts or type-switches on one of those types may be comparing
//! against a value built by another library that imports the original path;
//! after the rewrite the comparison still compiles but fails at run time. Any
//! import used that way in any file of the package keeps its original path.

use crate::gotool::PackageNames;
use crate::matcher::match_repository;
use crate::scanner::{Package, SourceFile, node_text};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::PathBuf;
use tree_sitter::Node;

/// Shape of a type expression, as far as type identity is concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeShape {
    /// `pkg.Name`
    Qualified { package: String, name: String },
    /// `*T`
    Pointer(Box<TypeShape>),
    /// Anything else; never attributed to a package.
    Other,
}

impl TypeShape {
    pub fn from_node(node: Node<'_>, text: &str) -> Self {
        match node.kind() {
            "qualified_type" => match (
                node.child_by_field_name("package"),
                node.child_by_field_name("name"),
            ) {
                (Some(package), Some(name)) => TypeShape::Qualified {
                    package: node_text(package, text).to_string(),
                    name: node_text(name, text).to_string(),
                },
                _ => TypeShape::Other,
            },
            "selector_expression" => match (
                node.child_by_field_name("operand"),
                node.child_by_field_name("field"),
            ) {
                (Some(operand), Some(field)) if operand.kind() == "identifier" => {
                    TypeShape::Qualified {
                        package: node_text(operand, text).to_string(),
                        name: node_text(field, text).to_string(),
                    }
                }
                _ => TypeShape::Other,
            },
            "pointer_type" => {
                let mut cursor = node.walk();
                let inner = node.named_children(&mut cursor).next();
                match inner {
                    Some(inner) => TypeShape::Pointer(Box::new(TypeShape::from_node(inner, text))),
                    None => TypeShape::Other,
                }
            }
            "unary_expression" => {
                let is_deref = node
                    .child_by_field_name("operator")
                    .is_some_and(|op| node_text(op, text) == "*");
                match node.child_by_field_name("operand") {
                    Some(operand) if is_deref => {
                        TypeShape::Pointer(Box::new(TypeShape::from_node(operand, text)))
                    }
                    _ => TypeShape::Other,
                }
            }
            _ => TypeShape::Other,
        }
    }

    /// Package identifier qualifying the type, if any.
    pub fn package(&self) -> Option<&str> {
        match self {
            TypeShape::Qualified { package, .. } => Some(package),
            TypeShape::Pointer(inner) => inner.package(),
            TypeShape::Other => None,
        }
    }
}

/// Why an import keeps its original path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum KeepReason {
    /// Already under the registry namespace.
    Canonical,
    /// The imported package's name couldn't be determined.
    UnknownName { message: String },
    /// Blank or dot import; its uses can't be attributed.
    Unanalyzable { name: String },
    TypeAssertion { line: usize },
    TypeSwitch { line: usize },
}

impl fmt::Display for KeepReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeepReason::Canonical => write!(f, "already canonical"),
            KeepReason::UnknownName { message } => write!(f, "{}", message),
            KeepReason::Unanalyzable { name } => {
                write!(f, "imported as '{}', uses can't be analyzed", name)
            }
            KeepReason::TypeAssertion { line } => write!(f, "type assertion at line {}", line),
            KeepReason::TypeSwitch { line } => write!(f, "case in type switch at line {}", line),
        }
    }
}

/// An import disabled in one file.
#[derive(Debug, Clone, Serialize)]
pub struct KeptImport {
    pub path: String,
    pub file: PathBuf,
    #[serde(flatten)]
    pub reason: KeepReason,
}

/// Result of analyzing a package.
#[derive(Debug, Default)]
pub struct Analysis {
    /// Import paths that must keep their original path everywhere.
    pub disabled: BTreeSet<String>,
    /// Every disabling occurrence, in file and import order.
    pub kept: Vec<KeptImport>,
    /// Repository key of every eligible import, with the import paths under it.
    pub eligible: BTreeMap<String, BTreeSet<String>>,
}

impl Analysis {
    pub fn repository_keys(&self) -> impl Iterator<Item = &str> {
        self.eligible.keys().map(String::as_str)
    }

    /// Import paths whose package name couldn't be resolved, each once, with
    /// the first error seen for it.
    pub fn unresolved(&self) -> Vec<(&str, &str)> {
        let mut seen = BTreeSet::new();
        self.kept
            .iter()
            .filter_map(|kept| match &kept.reason {
                KeepReason::UnknownName { message } => Some((kept.path.as_str(), message.as_str())),
                _ => None,
            })
            .filter(|(path, _)| seen.insert(*path))
            .collect()
    }
}

/// Analyzes every matched import of `package`.
///
/// An import path is eligible only if no file of the package disables it.
pub fn analyze(package: &Package, names: &dyn PackageNames) -> Analysis {
    let mut analysis = Analysis::default();
    let mut resolved_names: HashMap<String, Result<String, String>> = HashMap::new();

    for file in &package.files {
        for import in &file.imports {
            let Some(repo) = match_repository(&import.path) else {
                continue;
            };
            let reason = if repo.is_canonical() {
                Some(KeepReason::Canonical)
            } else {
                let name = match &import.name {
                    Some(alias) => Ok(alias.clone()),
                    None => resolved_names
                        .entry(import.path.clone())
                        .or_insert_with(|| declared_name(&import.path, names))
                        .clone(),
                };
                match name {
                    Ok(name) => keep_reason(file, &name),
                    Err(message) => Some(KeepReason::UnknownName { message }),
                }
            };
            if let Some(reason) = reason {
                analysis.disabled.insert(import.path.clone());
                analysis.kept.push(KeptImport {
                    path: import.path.clone(),
                    file: file.path.clone(),
                    reason,
                });
            }
        }
    }

    for file in &package.files {
        for import in &file.imports {
            if analysis.disabled.contains(&import.path) {
                continue;
            }
            if let Some(repo) = match_repository(&import.path) {
                analysis
                    .eligible
                    .entry(repo.key)
                    .or_default()
                    .insert(import.path.clone());
            }
        }
    }

    analysis
}

/// Declared name of the package at `import_path`, for imports without alias.
fn declared_name(import_path: &str, names: &dyn PackageNames) -> Result<String, String> {
    names
        .package_name(import_path)
        .map_err(|err| format!("{:#}", err))
}

/// Decides whether `file` must keep an import it refers to as `name`.
pub fn keep_reason(file: &SourceFile, name: &str) -> Option<KeepReason> {
    if name.is_empty() || name == "_" || name == "." {
        return Some(KeepReason::Unanalyzable {
            name: name.to_string(),
        });
    }
    find_type_use(file, name)
}

/// Finds the first type assertion or type-switch case on a type from `name`.
pub fn find_type_use(file: &SourceFile, name: &str) -> Option<KeepReason> {
    let text = file.text.as_str();
    let qualifies = |node: Node<'_>| TypeShape::from_node(node, text).package() == Some(name);

    let node = find_node(file.tree.root_node(), |node| match node.kind() {
        "type_assertion_expression" => node.child_by_field_name("type").is_some_and(qualifies),
        "type_case" => {
            let mut cursor = node.walk();
            let found = node
                .children_by_field_name("type", &mut cursor)
                .any(qualifies);
            found
        }
        _ => false,
    })?;

    let line = node.start_position().row + 1;
    Some(match node.kind() {
        "type_assertion_expression" => KeepReason::TypeAssertion { line },
        _ => KeepReason::TypeSwitch { line },
    })
}

/// Pre-order search that stops at the first node matching `pred`.
fn find_node<'t>(root: Node<'t>, mut pred: impl FnMut(Node<'t>) -> bool) -> Option<Node<'t>> {
    let mut cursor = root.walk();
    loop {
        let node = cursor.node();
        if pred(node) {
            return Some(node);
        }
        if cursor.goto_first_child() {
            continue;
        }
        loop {
            if cursor.goto_next_sibling() {
                break;
            }
            if !cursor.goto_parent() {
                return None;
            }
        }
    }
}
