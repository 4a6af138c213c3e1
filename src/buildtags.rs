//! Go build constraints.
//!
//! A file takes part in the build only when its name suffixes (`_linux.go`,
//! `_amd64.go`, `_windows_386.go`) and its `//go:build` or `// +build` lines
//! hold for the target platform. Files like `gen.go` carrying
//! `//go:build ignore` never do.

const KNOWN_OS: &[&str] = &[
    "aix", "android", "darwin", "dragonfly", "freebsd", "hurd", "illumos", "ios", "js",
    "linux", "nacl", "netbsd", "openbsd", "plan9", "solaris", "wasip1", "windows", "zos",
];

const KNOWN_ARCH: &[&str] = &[
    "386", "amd64", "arm", "arm64", "loong64", "mips", "mips64", "mips64le", "mipsle", "ppc64",
    "ppc64le", "riscv64", "s390x", "wasm",
];

const UNIX_OS: &[&str] = &[
    "aix", "android", "darwin", "dragonfly", "freebsd", "hurd", "illumos", "ios", "linux",
    "netbsd", "openbsd", "solaris",
];

/// The platform constraints are evaluated against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildContext {
    pub goos: String,
    pub goarch: String,
    /// Extra tags that hold, e.g. from `-tags`.
    pub tags: Vec<String>,
}

impl BuildContext {
    pub fn new(goos: impl Into<String>, goarch: impl Into<String>) -> Self {
        Self {
            goos: goos.into(),
            goarch: goarch.into(),
            tags: Vec::new(),
        }
    }

    /// The platform this process runs on, named the way Go names it.
    pub fn host() -> Self {
        let goos = match std::env::consts::OS {
            "macos" => "darwin",
            other => other,
        };
        let goarch = match std::env::consts::ARCH {
            "x86_64" => "amd64",
            "x86" => "386",
            "aarch64" => "arm64",
            "powerpc64" => "ppc64",
            "loongarch64" => "loong64",
            other => other,
        };
        Self::new(goos, goarch)
    }

    fn has_tag(&self, tag: &str) -> bool {
        tag == self.goos
            || tag == self.goarch
            || (tag == "unix" && UNIX_OS.contains(&self.goos.as_str()))
            || tag == "gc"
            || tag == "cgo"
            || is_release_tag(tag)
            || self.tags.iter().any(|t| t == tag)
    }

    /// Whether the `_GOOS`, `_GOARCH` or `_GOOS_GOARCH` suffix of a file name
    /// allows it on this platform.
    pub fn matches_file_name(&self, name: &str) -> bool {
        let stem = name.strip_suffix(".go").unwrap_or(name);
        let stem = stem.strip_suffix("_test").unwrap_or(stem);
        let parts: Vec<&str> = stem.split('_').collect();
        // The first element is never a suffix: `linux.go` builds everywhere.
        let suffix = &parts[1.min(parts.len())..];

        match suffix {
            [.., os, arch] if KNOWN_OS.contains(os) && KNOWN_ARCH.contains(arch) => {
                self.has_tag(os) && self.has_tag(arch)
            }
            [.., last] if KNOWN_OS.contains(last) || KNOWN_ARCH.contains(last) => {
                self.has_tag(last)
            }
            _ => true,
        }
    }

    /// Whether the constraint lines in the header of `text` hold.
    ///
    /// A `//go:build` line takes precedence over `// +build` lines, which are
    /// all required to hold. Lines in the doc comment directly above the
    /// package clause are not constraints.
    pub fn matches_source(&self, text: &str) -> bool {
        let header = constraint_header(text);

        if let Some(expr) = header
            .iter()
            .find_map(|line| line.strip_prefix("//go:build"))
            .filter(|rest| rest.is_empty() || rest.starts_with([' ', '\t']))
        {
            return match Expr::parse(expr) {
                Some(expr) => expr.eval(&|tag| self.has_tag(tag)),
                None => {
                    tracing::debug!(expr, "unparseable //go:build line");
                    false
                }
            };
        }

        header
            .iter()
            .filter_map(|line| {
                let rest = line.strip_prefix("//")?.trim_start();
                let rest = rest.strip_prefix("+build")?;
                (rest.is_empty() || rest.starts_with([' ', '\t'])).then_some(rest)
            })
            .all(|options| self.plus_build_line(options))
    }

    /// A `// +build` line: space-separated alternatives of comma-separated
    /// terms, each optionally negated with `!`.
    fn plus_build_line(&self, options: &str) -> bool {
        options.split_whitespace().any(|option| {
            option.split(',').all(|term| match term.strip_prefix('!') {
                Some(tag) => is_valid_tag(tag) && !self.has_tag(tag),
                None => is_valid_tag(term) && self.has_tag(term),
            })
        })
    }
}

fn is_release_tag(tag: &str) -> bool {
    tag.strip_prefix("go1.")
        .is_some_and(|minor| !minor.is_empty() && minor.bytes().all(|b| b.is_ascii_digit()))
}

fn is_valid_tag(tag: &str) -> bool {
    !tag.is_empty()
        && tag
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '.')
}

/// Trimmed `//` lines that precede the last blank line before the first
/// line of code.
fn constraint_header(text: &str) -> Vec<&str> {
    let mut lines = Vec::new();
    let mut last_blank = 0;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            last_blank = lines.len();
            continue;
        }
        if !line.starts_with("//") {
            break;
        }
        lines.push(line);
    }

    lines.truncate(last_blank);
    lines
}

/// A `//go:build` expression.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Expr {
    Tag(String),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

impl Expr {
    fn parse(input: &str) -> Option<Expr> {
        let tokens = tokenize(input)?;
        let mut parser = ExprParser { tokens, pos: 0 };
        let expr = parser.or()?;
        (parser.pos == parser.tokens.len()).then_some(expr)
    }

    fn eval(&self, has_tag: &dyn Fn(&str) -> bool) -> bool {
        match self {
            Expr::Tag(tag) => has_tag(tag),
            Expr::Not(inner) => !inner.eval(has_tag),
            Expr::And(a, b) => a.eval(has_tag) && b.eval(has_tag),
            Expr::Or(a, b) => a.eval(has_tag) || b.eval(has_tag),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Tag(String),
    Not,
    And,
    Or,
    Open,
    Close,
}

fn tokenize(input: &str) -> Option<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' => {
                chars.next();
            }
            '!' => {
                chars.next();
                tokens.push(Token::Not);
            }
            '(' => {
                chars.next();
                tokens.push(Token::Open);
            }
            ')' => {
                chars.next();
                tokens.push(Token::Close);
            }
            '&' | '|' => {
                chars.next();
                if chars.next() != Some(c) {
                    return None;
                }
                tokens.push(if c == '&' { Token::And } else { Token::Or });
            }
            _ => {
                let mut tag = String::new();
                while let Some(&c) = chars.peek() {
                    if !(c.is_alphanumeric() || c == '_' || c == '.') {
                        break;
                    }
                    tag.push(c);
                    chars.next();
                }
                if tag.is_empty() {
                    return None;
                }
                tokens.push(Token::Tag(tag));
            }
        }
    }

    Some(tokens)
}

struct ExprParser {
    tokens: Vec<Token>,
    pos: usize,
}

impl ExprParser {
    fn eat(&mut self, token: &Token) -> bool {
        if self.tokens.get(self.pos) == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn or(&mut self) -> Option<Expr> {
        let mut expr = self.and()?;
        while self.eat(&Token::Or) {
            expr = Expr::Or(Box::new(expr), Box::new(self.and()?));
        }
        Some(expr)
    }

    fn and(&mut self) -> Option<Expr> {
        let mut expr = self.not()?;
        while self.eat(&Token::And) {
            expr = Expr::And(Box::new(expr), Box::new(self.not()?));
        }
        Some(expr)
    }

    fn not(&mut self) -> Option<Expr> {
        if self.eat(&Token::Not) {
            return Some(Expr::Not(Box::new(self.not()?)));
        }
        if self.eat(&Token::Open) {
            let expr = self.or()?;
            return self.eat(&Token::Close).then_some(expr);
        }
        match self.tokens.get(self.pos)? {
            Token::Tag(tag) => {
                let tag = tag.clone();
                self.pos += 1;
                Some(Expr::Tag(tag))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linux() -> BuildContext {
        BuildContext::new("linux", "amd64")
    }

    #[test]
    fn ignore_tag_never_holds() {
        assert!(!linux().matches_source("//go:build ignore\n\npackage main\n"));
        assert!(!linux().matches_source("// +build ignore\n\npackage main\n"));
    }

    #[test]
    fn files_without_constraints_build() {
        assert!(linux().matches_source("package widget\n"));
        assert!(linux().matches_source("// Copyright 2014 Acme.\n\npackage widget\n"));
    }

    #[test]
    fn go_build_expressions() {
        let ctx = linux();
        assert!(ctx.matches_source("//go:build linux && (amd64 || arm64)\n\npackage x\n"));
        assert!(ctx.matches_source("//go:build !windows\n\npackage x\n"));
        assert!(ctx.matches_source("//go:build unix && go1.18\n\npackage x\n"));
        assert!(!ctx.matches_source("//go:build darwin || windows\n\npackage x\n"));
        assert!(!ctx.matches_source("//go:build linux && !cgo\n\npackage x\n"));
    }

    #[test]
    fn go_build_wins_over_plus_build() {
        let source = "//go:build linux\n// +build windows\n\npackage x\n";
        assert!(linux().matches_source(source));
    }

    #[test]
    fn plus_build_lines_are_anded() {
        let ctx = linux();
        assert!(ctx.matches_source("// +build linux darwin\n// +build amd64\n\npackage x\n"));
        assert!(ctx.matches_source("// +build linux,!386\n\npackage x\n"));
        assert!(!ctx.matches_source("// +build linux\n// +build arm\n\npackage x\n"));
    }

    #[test]
    fn doc_comment_lines_are_not_constraints() {
        let source = "// +build ignore\npackage x\n";
        assert!(linux().matches_source(source));
    }

    #[test]
    fn unparseable_expression_excludes_the_file() {
        assert!(!linux().matches_source("//go:build linux &&\n\npackage x\n"));
    }

    #[test]
    fn file_name_suffixes() {
        let ctx = linux();
        assert!(ctx.matches_file_name("widget.go"));
        assert!(ctx.matches_file_name("linux.go"));
        assert!(ctx.matches_file_name("widget_linux.go"));
        assert!(ctx.matches_file_name("widget_linux_amd64.go"));
        assert!(ctx.matches_file_name("widget_amd64.go"));
        assert!(!ctx.matches_file_name("widget_windows.go"));
        assert!(!ctx.matches_file_name("widget_linux_arm.go"));
        assert!(ctx.matches_file_name("zip_stuff.go"));
    }
}
