// src/metadata/prompt.rs
//! Collection of metadata values that were not configured
//!
//! Manifest generation asks a [`FieldResolver`] for anything it cannot
//! derive on its own (site name, schema, version, ETL URL, table names).

use crate::error::{ConfigError, Result};
use std::io::{self, BufRead, Write};

/// Supplies values for fields that were not configured
pub trait FieldResolver {
    /// Return a value for `prompt`
    ///
    /// When `choices` is non-empty, the returned value must be one of them
    /// (compared case-insensitively).
    fn resolve_missing_field(&mut self, prompt: &str, choices: &[String]) -> Result<String>;
}

/// Prompts on a terminal until an acceptable value is entered
pub struct TerminalResolver<R, W> {
    input: R,
    output: W,
}

impl TerminalResolver<io::StdinLock<'static>, io::Stderr> {
    /// Read from standard input and prompt on standard error
    ///
    /// Standard output is left alone since it may carry the package stream.
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stderr())
    }
}

impl<R: BufRead, W: Write> TerminalResolver<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }
}

impl<R: BufRead, W: Write> FieldResolver for TerminalResolver<R, W> {
    fn resolve_missing_field(&mut self, prompt: &str, choices: &[String]) -> Result<String> {
        loop {
            write!(self.output, "Please provide {prompt}: ")?;
            self.output.flush()?;

            let mut line = String::new();
            if self.input.read_line(&mut line)? == 0 {
                return Err(ConfigError::MissingField(prompt.to_string()).into());
            }
            let value = line.trim();

            if value.is_empty() {
                continue;
            }

            if !choices.is_empty() && !choices.iter().any(|c| c.eq_ignore_ascii_case(value)) {
                writeln!(
                    self.output,
                    "Invalid input, please choose from '{}'.",
                    choices.join(", ")
                )?;
                continue;
            }

            return Ok(value.to_string());
        }
    }
}

/// Fails for every missing field; used when no terminal is available
#[derive(Debug, Clone, Copy, Default)]
pub struct NonInteractive;

impl FieldResolver for NonInteractive {
    fn resolve_missing_field(&mut self, prompt: &str, _choices: &[String]) -> Result<String> {
        Err(ConfigError::MissingField(prompt.to_string()).into())
    }
}
