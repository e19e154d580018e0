//! Structured diagnostic messages with severity, code and callable location.

use crate::code::DiagnosticCode;
use crate::severity::Severity;
use kcache_source::SourceLocation;
use serde::{Deserialize, Serialize};

/// A structured diagnostic message about one callable.
///
/// Each diagnostic includes:
/// - A severity level and stable code
/// - A primary message and, when known, the location of the callable
/// - Optional notes and help text
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Diagnostic {
    /// The severity level of this diagnostic.
    pub severity: Severity,
    /// The code identifying the kind of diagnostic.
    pub code: DiagnosticCode,
    /// The main diagnostic message.
    pub message: String,
    /// The source fragment the diagnostic is about.
    pub location: Option<SourceLocation>,
    /// Explanatory footnotes (e.g., "note: ...").
    pub notes: Vec<String>,
    /// Actionable suggestions (e.g., "help: ...").
    pub help: Vec<String>,
}

impl Diagnostic {
    /// Creates a new error diagnostic with the given code and message.
    pub fn error(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, code, message)
    }

    /// Creates a new warning diagnostic with the given code and message.
    pub fn warning(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, code, message)
    }

    fn new(severity: Severity, code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self {
            severity,
            code,
            message: message.into(),
            location: None,
            notes: Vec::new(),
            help: Vec::new(),
        }
    }

    /// Attaches the location of the callable involved.
    pub fn with_location(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }

    /// Adds a note to this diagnostic.
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    /// Adds a help message to this diagnostic.
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help.push(help.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::Category;

    #[test]
    fn create_error() {
        let diag = Diagnostic::error(DiagnosticCode::IMPURE_CAPTURE, "impure capture");
        assert_eq!(diag.severity, Severity::Error);
        assert_eq!(diag.message, "impure capture");
        assert_eq!(format!("{}", diag.code), "E001");
        assert!(diag.location.is_none());
    }

    #[test]
    fn create_warning() {
        let code = DiagnosticCode::new(Category::Warning, 7);
        let diag = Diagnostic::warning(code, "not cached");
        assert_eq!(diag.severity, Severity::Warning);
        assert_eq!(diag.message, "not cached");
    }

    #[test]
    fn builder_methods() {
        let loc = SourceLocation::new("kernels.step", "kernels.py", 3, 9);
        let diag = Diagnostic::error(DiagnosticCode::IMPURE_CAPTURE, "reads `gain`")
            .with_location(loc.clone())
            .with_note("`gain` is captured and mutable")
            .with_help("pass `gain` as a parameter");
        assert_eq!(diag.location, Some(loc));
        assert_eq!(diag.notes.len(), 1);
        assert_eq!(diag.help.len(), 1);
    }

    #[test]
    fn serde_roundtrip() {
        let diag = Diagnostic::warning(DiagnosticCode::ABSTAINED, "abstained")
            .with_location(SourceLocation::new("m.k", "m.py", 1, 2));
        let json = serde_json::to_string(&diag).unwrap();
        let back: Diagnostic = serde_json::from_str(&json).unwrap();
        assert_eq!(back.code, DiagnosticCode::ABSTAINED);
        assert_eq!(back.location, diag.location);
    }
}
