//! Per-rewrite confirmation.
//!
//! Each pending substitution is shown to the operator, who answers with a
//! single keystroke: accept, decline, or abort the whole run. The gate is a
//! trait so scripted answers can stand in for a terminal.

use anyhow::{Result, bail};
use colored::Colorize;
use dialoguer::console::{Key, Term};
use std::io::{ErrorKind, Read};

/// A substitution awaiting confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub original: String,
    pub replacement: String,
    pub package: String,
}

impl Prompt {
    pub fn question(&self) -> String {
        format!(
            "rewrite import {} to {} in package {}?",
            self.original.red(),
            self.replacement.green(),
            self.package
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Keep this substitution.
    Accept,
    /// Drop this substitution and move on.
    Decline,
    /// Stop the run without writing anything else.
    Abort,
}

pub trait Gate {
    fn decide(&mut self, prompt: &Prompt) -> Result<Decision>;
}

/// Maps a keystroke to a decision. Other keys are ignored.
///
/// Enter declines, like the `(y/N)` default. Ctrl-C and Ctrl-A abort.
pub fn decision_for_key(key: u8) -> Option<Decision> {
    match key {
        b'y' | b'Y' => Some(Decision::Accept),
        b'n' | b'N' | b'\r' | b'\n' => Some(Decision::Decline),
        b'\x03' | b'\x01' => Some(Decision::Abort),
        _ => None,
    }
}

/// Maps a key read from a raw-mode terminal to a decision.
///
/// The terminal decodes Enter and Ctrl-A (reported as `Home`) before they
/// reach us, so those are mapped here; everything else goes through
/// [`decision_for_key`].
pub fn decision_for_term_key(key: &Key) -> Option<Decision> {
    match key {
        Key::Char(c) if c.is_ascii() => decision_for_key(*c as u8),
        Key::Enter => Some(Decision::Decline),
        Key::CtrlC | Key::Home => Some(Decision::Abort),
        _ => None,
    }
}

/// Asks on the controlling terminal, one keystroke per answer.
#[derive(Debug, Default)]
pub struct TerminalGate;

impl Gate for TerminalGate {
    fn decide(&mut self, prompt: &Prompt) -> Result<Decision> {
        let term = Term::stderr();
        if !term.is_term() {
            bail!("interactive mode needs a terminal");
        }

        term.write_str(&format!("{} (y/N) ", prompt.question()))?;
        let decision = loop {
            match term.read_key_raw() {
                Ok(key) => {
                    if let Some(decision) = decision_for_term_key(&key) {
                        break decision;
                    }
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => break Decision::Abort,
                Err(err) => return Err(err.into()),
            }
        };
        term.write_line("")?;
        Ok(decision)
    }
}

/// Reads answers byte by byte from any source, skipping unknown keys.
///
/// Running out of input aborts.
#[derive(Debug)]
pub struct ReaderGate<R> {
    input: R,
}

impl<R: Read> ReaderGate<R> {
    pub fn new(input: R) -> Self {
        Self { input }
    }
}

impl<R: Read> Gate for ReaderGate<R> {
    fn decide(&mut self, prompt: &Prompt) -> Result<Decision> {
        let mut buf = [0u8; 1];
        loop {
            println!("{} (y/N)", prompt.question());
            loop {
                match self.input.read(&mut buf) {
                    Ok(0) => return Ok(Decision::Abort),
                    Ok(_) => break,
                    Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                    Err(err) => return Err(err.into()),
                }
            }
            if let Some(decision) = decision_for_key(buf[0]) {
                return Ok(decision);
            }
        }
    }
}
