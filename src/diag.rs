//! Diagnostic sink collected while parsing and writing files.
//!
//! Parsers never abort on recoverable structural problems; they record a
//! diagnostic here and continue with the next block or atom. The sink is
//! passed in explicitly so the data model stays free of status bookkeeping.

use serde::Serialize;

/// How bad a diagnostic is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Severity {
    Information,
    Warning,
    Critical,
}

/// A single diagnostic entry.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    /// Which operation produced the entry, e.g. "parsing FLAC header".
    pub context: &'static str,
}

/// Ordered log of diagnostics for one parse or make pass.
#[derive(Debug, Default)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&mut self, severity: Severity, context: &'static str, message: impl Into<String>) {
        let message = message.into();
        match severity {
            Severity::Information => tracing::info!(context, "{message}"),
            Severity::Warning => tracing::warn!(context, "{message}"),
            Severity::Critical => tracing::error!(context, "{message}"),
        }
        self.entries.push(Diagnostic {
            severity,
            message,
            context,
        });
    }

    pub fn information(&mut self, context: &'static str, message: impl Into<String>) {
        self.emit(Severity::Information, context, message);
    }

    pub fn warning(&mut self, context: &'static str, message: impl Into<String>) {
        self.emit(Severity::Warning, context, message);
    }

    pub fn critical(&mut self, context: &'static str, message: impl Into<String>) {
        self.emit(Severity::Critical, context, message);
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn has_critical(&self) -> bool {
        self.entries
            .iter()
            .any(|e| e.severity == Severity::Critical)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Move all entries of `other` to the end of this log.
    pub fn absorb(&mut self, mut other: Diagnostics) {
        self.entries.append(&mut other.entries);
    }
}
