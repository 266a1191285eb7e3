//! Engine-level failure reporting.

use std::fmt;

use thiserror::Error;

/// How serious the engine considers a failure to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Fatal => "fatal",
        };
        f.write_str(name)
    }
}

/// A rejected engine call, carrying the engine's own description.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{operation}: {description} (severity {severity})")]
pub struct EngineError {
    /// Engine primitive that failed (e.g. "decode", "resize").
    pub operation: &'static str,
    pub description: String,
    pub severity: Severity,
}

impl EngineError {
    pub fn new(operation: &'static str, description: impl Into<String>, severity: Severity) -> Self {
        Self {
            operation,
            description: description.into(),
            severity,
        }
    }

    /// Shorthand for the common `Severity::Error` case.
    pub fn error(operation: &'static str, description: impl Into<String>) -> Self {
        Self::new(operation, description, Severity::Error)
    }
}
