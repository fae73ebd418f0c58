//! Error taxonomy and the caller-supplied report callback.
//!
//! Conversions to
//! `Box<dyn std::error::Error>` are left explicit rather than blanket, for
//! the same reason the original crate's `ApiError` does: the standard
//! library already provides a conflicting blanket impl for `StdError` types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VangaError {
    #[error("parse error: {0}")]
    ParseError(String),
    #[error("numerical error: {0}")]
    Numerical(String),
    #[error("I/O error: {0}")]
    IO(String),
    #[error("worker queue overflow: {0}")]
    Overflow(String),
    #[error("operation on a stopped worker pool: {0}")]
    NotActive(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("cancelled")]
    Cancelled,
}

impl From<std::io::Error> for VangaError {
    fn from(err: std::io::Error) -> Self {
        VangaError::IO(err.to_string())
    }
}

/// Severity of a `Report` emitted through a `ReportSink`.
///
/// Warning on per-row/per-feature recoverable issues, error on per-session
/// recoverable issues, critical on session-fatal conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Warning,
    Error,
    Critical,
}

/// A single diagnostic event surfaced to the caller.
#[derive(Debug, Clone)]
pub struct Report {
    pub severity: Severity,
    pub description: String,
    pub code: &'static str,
}

impl Report {
    pub fn new(severity: Severity, code: &'static str, description: impl Into<String>) -> Self {
        Self {
            severity,
            description: description.into(),
            code,
        }
    }
}

/// Borrowed callback sink for diagnostics.
///
/// Threaded as `&dyn ReportSink` through every API that can fail partially
/// (split evaluator, tree learner, segment store). Never a process-wide
/// singleton — every fallible component takes one as a parameter instead.
pub trait ReportSink: Sync {
    fn report(&self, event: Report);
}

/// A sink that discards every report. Useful in tests and for callers that
/// genuinely don't care.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ReportSink for NullSink {
    fn report(&self, _event: Report) {}
}

/// A sink that forwards reports to the `log` crate at the matching level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ReportSink for LogSink {
    fn report(&self, event: Report) {
        match event.severity {
            Severity::Warning => log::warn!("[{}] {}", event.code, event.description),
            Severity::Error => log::error!("[{}] {}", event.code, event.description),
            Severity::Critical => log::error!("CRITICAL [{}] {}", event.code, event.description),
        }
    }
}
