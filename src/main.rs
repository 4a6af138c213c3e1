//! gopkgs: point Go imports at their versioned gopkgs.com mirrors.
//!
//! `rewrite` scans Go packages for imports hosted on GitHub or Google Code,
//! resolves them through the gopkgs.com registry and rewrites the ones that
//! can be changed without breaking type identity. `get`, `doc` and `view`
//! work on single packages.

mod cli;

use anyhow::{Result, bail};
use clap::Parser;
use cli::{Args, Commands};
use colored::Colorize;
use gopkgs::engine::{self, Collaborators, RewriteOptions, RunSummary};
use gopkgs::gate::TerminalGate;
use gopkgs::gotool::GoTool;
use gopkgs::registry::{self, HttpRegistry, Registry, RepoRequest};
use gopkgs::report;
use gopkgs::scanner::{self, ScanFilter};
use gopkgs::selector::{Selection, SkipReason, fetch_path};
use gopkgs::state::RewriteState;
use std::process::ExitCode;

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.command.verbose());

    match execute(args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            report::error(format!("{:#}", err));
            ExitCode::FAILURE
        }
    }
}

/// Diagnostics default to warnings; `-v` turns on this crate's debug events.
/// `RUST_LOG` overrides both.
fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let default = if verbose { "warn,gopkgs=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Runs the command. `Ok(false)` means it finished but something failed.
fn execute(args: Args) -> Result<bool> {
    let registry = HttpRegistry::new(args.api_host);

    match args.command {
        Commands::Rewrite {
            patterns,
            interactive,
            prefer_revisions,
            library,
            dry_run,
            verbose,
            json,
            exclude,
            no_default_excludes,
        } => {
            let opts = RewriteOptions {
                interactive,
                prefer_revisions,
                library,
                dry_run,
                verbose,
            };
            cmd_rewrite(
                &registry,
                &patterns,
                &opts,
                json,
                &exclude,
                no_default_excludes,
            )
        }
        Commands::Get {
            paths,
            update,
            prefer_revisions,
            verbose,
        } => cmd_get(&registry, paths, update, prefer_revisions, verbose),
        Commands::Doc {
            path,
            prefer_revisions,
        } => cmd_doc(&registry, &path, prefer_revisions).map(|()| true),
        Commands::View { path } => cmd_view(&registry, &path).map(|()| true),
    }
}

fn cmd_rewrite(
    registry: &HttpRegistry,
    patterns: &[String],
    opts: &RewriteOptions,
    json_output: bool,
    exclude: &[String],
    no_default_excludes: bool,
) -> Result<bool> {
    let tool = GoTool::from_env(opts.verbose);
    let filter = ScanFilter::new(exclude, !no_default_excludes)?;
    let dirs = scanner::collect_package_dirs(patterns, &filter, tool.gopath())?;
    if opts.verbose {
        report::info(format!(
            "Found {} package directories, resolving repositories against {}",
            dirs.len(),
            registry.host()
        ));
    }

    let mut gate = TerminalGate;
    let mut tools = Collaborators {
        registry,
        materializer: &tool,
        names: &tool,
        gate: &mut gate,
    };
    let mut state = RewriteState::new();
    let summary = engine::run(&dirs, &mut state, &mut tools, opts);
    tracing::debug!(repos = state.cached_repos(), "registry records cached");

    if json_output {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_run_summary(&summary, opts);
    }

    Ok(summary.is_success())
}

fn print_run_summary(summary: &RunSummary, opts: &RewriteOptions) {
    if summary.aborted {
        report::error("aborted, later packages were not rewritten");
    }

    let imports = summary.imports_rewritten();
    if imports == 0 {
        if summary.is_success() {
            println!("{} No imports to rewrite", "ok:".green().bold());
        }
        return;
    }

    println!(
        "\n{} {} imports in {} files across {} packages",
        if opts.dry_run { "Would rewrite" } else { "Rewrote" }.yellow().bold(),
        imports,
        summary.files_rewritten(),
        summary.packages.iter().filter(|p| p.files_rewritten > 0).count()
    );
    if opts.dry_run {
        report::hint("Run without -n to apply changes");
    }
}

fn cmd_get(
    registry: &HttpRegistry,
    paths: Vec<String>,
    update: bool,
    prefer_revisions: bool,
    verbose: bool,
) -> Result<bool> {
    let tool = GoTool::from_env(verbose);
    let paths = if paths.is_empty() && update {
        tool.gopkgs_checkouts()
    } else {
        paths
    };
    if paths.is_empty() {
        bail!("no packages specified");
    }

    let requests: Vec<RepoRequest> = paths.iter().map(RepoRequest::latest).collect();
    let repos = registry.resolve(&requests)?;

    let mut ok = true;
    for (request, repo) in requests.iter().zip(&repos) {
        let import_path = match fetch_path(&request.path, repo, prefer_revisions) {
            Selection::Use(path) => {
                println!("using {} for package {}", path.green(), request.path);
                path
            }
            Selection::Skip(SkipReason::Registry(message)) => {
                report::warn(format!(
                    "gopkgs can't find package {}: {}, using original",
                    request.path, message
                ));
                request.path.clone()
            }
            Selection::Skip(_) => request.path.clone(),
        };
        if let Err(err) = tool.go_get(&import_path, update) {
            report::error(format!("{:#}", err));
            ok = false;
        }
    }

    Ok(ok)
}

fn cmd_doc(registry: &HttpRegistry, path: &str, prefer_revisions: bool) -> Result<()> {
    let repo = registry::lookup(registry, path)?;
    if repo.gopkgs_path.is_empty() {
        bail!("{} is not mirrored at gopkgs.com", path);
    }
    let url = if prefer_revisions {
        repo.revision_documentation()
    } else {
        repo.version_documentation()
    };
    println!("{}", url);
    Ok(())
}

fn cmd_view(registry: &HttpRegistry, path: &str) -> Result<()> {
    let repo = registry::lookup(registry, path)?;
    if repo.gopkgs_path.is_empty() {
        bail!("{} is not mirrored at gopkgs.com", path);
    }
    println!("http://{}", repo.gopkgs_path);
    Ok(())
}
