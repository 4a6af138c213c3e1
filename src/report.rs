//! Operator-facing messages.
//!
//! Short colored prefixes on stderr, matching what the CLI prints for its own
//! diagnostics. Internal tracing goes through `tracing` instead.

use colored::Colorize;
use std::fmt::Display;

pub fn info(message: impl Display) {
    eprintln!("{} {}", "info:".blue().bold(), message);
}

pub fn warn(message: impl Display) {
    eprintln!("{} {}", "warn:".yellow().bold(), message);
}

pub fn error(message: impl Display) {
    eprintln!("{} {}", "error:".red().bold(), message);
}

pub fn hint(message: impl Display) {
    eprintln!("{} {}", "hint:".cyan().bold(), message);
}
