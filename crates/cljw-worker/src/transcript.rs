//! Per-request output buffer.
//!
//! Collects what the guest printed, optional cache notes for verbose
//! requests, and on failure the error together with the request and the
//! compilation script it was working on.

use std::fmt::Write as _;

use cljw_protocol::WorkError;

/// Output accumulated while handling one request.
#[derive(Debug, Default)]
pub struct Transcript {
    verbose: bool,
    output: String,
    context: Vec<(&'static str, String)>,
}

impl Transcript {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            ..Self::default()
        }
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Append text the guest printed.
    pub fn guest(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.output.push_str(text);
        if !text.ends_with('\n') {
            self.output.push('\n');
        }
    }

    /// Append a worker note. Dropped unless the request is verbose.
    pub fn note(&mut self, line: impl AsRef<str>) {
        if self.verbose {
            let _ = writeln!(self.output, "[cljw] {}", line.as_ref());
        }
    }

    /// Record a value to show if the request fails.
    pub fn remember(&mut self, label: &'static str, value: impl Into<String>) {
        let value = value.into();
        match self.context.iter_mut().find(|(l, _)| *l == label) {
            Some(slot) => slot.1 = value,
            None => self.context.push((label, value)),
        }
    }

    /// Append a failure with every remembered value.
    pub fn fail(&mut self, error: &WorkError) {
        let _ = writeln!(self.output, "{}", error);
        for (label, value) in &self.context {
            let _ = writeln!(self.output, "{}: {}", label, value);
        }
    }

    pub fn as_str(&self) -> &str {
        &self.output
    }

    pub fn into_output(self) -> String {
        self.output
    }
}
