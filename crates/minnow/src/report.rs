//! Error reporting: the kinds of diagnostics the runtime produces and the
//! pluggable sinks that receive them.
//!
//! Compile-time errors are reported, never thrown: the compiler drains the
//! token stream best-effort so one pass surfaces as many problems as it can,
//! and a sticky flag marks the resulting script unexecutable.

use std::fmt;

/// Result alias for operations that can produce a runtime error.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Category of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, serde::Serialize, serde::Deserialize)]
pub enum ReportKind {
    /// Raised mid-tokenization; the lexer emits an error token and keeps
    /// scanning.
    Lex,
    /// Raised after consumption; suppressed when the offending token is
    /// already an error token, to avoid cascades.
    Parse,
    /// Raised by heap and container operations, or by execution.
    Runtime,
    /// One entry per frame, following a `Runtime` report.
    Stacktrace,
}

/// A single diagnostic routed to the configured [`Reporter`].
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Report {
    pub kind: ReportKind,
    pub path: String,
    /// 1-based source line, or 0 when no location applies.
    pub line: u32,
    pub message: String,
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line == 0 {
            write!(f, "{}: {}: {}", self.kind, self.path, self.message)
        } else {
            write!(f, "{}: {}:{}: {}", self.kind, self.path, self.line, self.message)
        }
    }
}

/// Sink for diagnostics.
///
/// Implement this to capture or redirect error output from embedded minnow
/// code; the default implementation writes to stderr.
pub trait Reporter {
    /// Called once per diagnostic, in the order they occur.
    fn report(&mut self, report: &Report);
}

/// Default [`Reporter`] that writes one line per diagnostic to stderr.
#[derive(Debug, Default)]
pub struct StderrReporter;

impl Reporter for StderrReporter {
    fn report(&mut self, report: &Report) {
        eprintln!("{report}");
    }
}

/// A [`Reporter`] that collects every diagnostic.
///
/// Useful for testing or inspecting errors programmatically.
#[derive(Debug, Default)]
pub struct CollectReports(Vec<Report>);

impl CollectReports {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The collected diagnostics, in order.
    #[must_use]
    pub fn reports(&self) -> &[Report] {
        &self.0
    }

    /// Consumes the reporter and returns the collected diagnostics.
    #[must_use]
    pub fn into_reports(self) -> Vec<Report> {
        self.0
    }
}

impl Reporter for CollectReports {
    fn report(&mut self, report: &Report) {
        self.0.push(report.clone());
    }
}

/// A [`Reporter`] that drops everything.
#[derive(Debug, Default)]
pub struct SilentReporter;

impl Reporter for SilentReporter {
    fn report(&mut self, _report: &Report) {}
}

/// A runtime failure from a heap or container operation.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RuntimeError {
    message: String,
}

impl RuntimeError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }

    #[must_use]
    pub fn unhashable(type_name: &str) -> Self {
        Self::new(format!("a value of type '{type_name}' is not hashable"))
    }

    #[must_use]
    pub fn index_out_of_bounds(index: usize, len: usize) -> Self {
        Self::new(format!("index {index} out of bounds for length {len}"))
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for RuntimeError {}

/// Compilation failed; the diagnostics went to the configured reporter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    /// Number of errors reported.
    pub errors: usize,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "compilation failed with {} error(s)", self.errors)
    }
}

impl std::error::Error for CompileError {}
