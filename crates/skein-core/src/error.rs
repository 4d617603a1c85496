//! Error types for skein operations.
//!
//! Two layers: [`Error`] is the process-boundary error (config, watcher,
//! io). [`ModuleError`] is a *value* — resolution, fetch, and transform
//! failures are returned inside result structs so the graph builder can
//! proceed past one failing module; they are never raised. Internal
//! invariant violations panic with an `Assertion failed:` message and are
//! never recovered.

use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Process-boundary error type for skein operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read config at {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config at {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Watcher failed: {0}")]
    Watch(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    #[must_use]
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}

/// A position in a source file (1-indexed).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Position {
    pub row: u32,
    pub col: u32,
}

/// A half-open source range attached to a diagnostic highlight.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Span {
    pub start: Position,
    pub end: Position,
}

/// Points a diagnostic at the location that triggered it.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Highlight {
    /// Locator URL of the module the span refers to.
    pub source: Option<String>,
    pub label: Option<String>,
    pub span: Option<Span>,
}

/// A single compile-time diagnostic: message plus source highlights.
#[derive(Clone, Debug, Serialize)]
pub struct Diagnostic {
    pub message: String,
    pub highlights: Vec<Highlight>,
}

impl Diagnostic {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            highlights: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_highlight(message: impl Into<String>, highlight: Highlight) -> Self {
        Self {
            message: message.into(),
            highlights: vec![highlight],
        }
    }
}

/// A recoverable module-level failure.
///
/// Carried in `Result<_, ModuleError>` inside the `*Outcome` structs
/// returned by resolve/fetch/transform. A failed module still registers in
/// bundle output (as an error factory) so the rest of the graph completes.
#[derive(Clone, Debug, Serialize)]
pub struct ModuleError {
    pub diagnostics: Vec<Diagnostic>,
}

impl ModuleError {
    #[must_use]
    pub fn from_string(message: impl Into<String>) -> Self {
        Self {
            diagnostics: vec![Diagnostic::new(message)],
        }
    }

    #[must_use]
    pub fn from_diagnostics(diagnostics: Vec<Diagnostic>) -> Self {
        Self { diagnostics }
    }
}

impl std::fmt::Display for ModuleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let messages: Vec<&str> = self
            .diagnostics
            .iter()
            .map(|d| d.message.as_str())
            .collect();
        write!(f, "{}", messages.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_error_display_joins_diagnostics() {
        let err = ModuleError::from_diagnostics(vec![
            Diagnostic::new("first"),
            Diagnostic::new("second"),
        ]);
        assert_eq!(err.to_string(), "first; second");
    }

    #[test]
    fn test_diagnostic_with_highlight() {
        let d = Diagnostic::with_highlight(
            "Module not found",
            Highlight {
                source: Some("/_dev/file/app/index.js".to_string()),
                label: None,
                span: None,
            },
        );
        assert_eq!(d.highlights.len(), 1);
    }
}
