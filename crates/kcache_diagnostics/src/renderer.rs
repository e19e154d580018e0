//! Diagnostic rendering for human-readable output.

use crate::diagnostic::Diagnostic;
use crate::severity::Severity;

/// Trait for rendering diagnostics into formatted output strings.
pub trait DiagnosticRenderer {
    /// Renders a single diagnostic into a formatted string.
    fn render(&self, diag: &Diagnostic) -> String;
}

/// Renders diagnostics in a rustc-style terminal format.
///
/// Produces output like:
/// ```text
/// error[E001]: `kernels.step` reads mutable capture `gain`
///   --> src/kernels.py:10-14 (kernels.step)
///    = note: ...
///    = help: ...
/// ```
pub struct TerminalRenderer {
    /// Whether to use ANSI color codes in output.
    pub color: bool,
}

impl TerminalRenderer {
    /// Creates a new terminal renderer.
    pub fn new(color: bool) -> Self {
        Self { color }
    }

    fn severity_label(&self, severity: Severity) -> String {
        if !self.color {
            return severity.to_string();
        }
        let ansi = match severity {
            Severity::Error => "31",
            Severity::Warning => "33",
            Severity::Note => "36",
        };
        format!("\x1b[1;{ansi}m{severity}\x1b[0m")
    }
}

impl DiagnosticRenderer for TerminalRenderer {
    fn render(&self, diag: &Diagnostic) -> String {
        let mut out = String::new();

        out.push_str(&format!(
            "{}[{}]: {}\n",
            self.severity_label(diag.severity),
            diag.code,
            diag.message
        ));

        if let Some(location) = &diag.location {
            out.push_str(&format!("  --> {location}\n"));
        }

        for note in &diag.notes {
            out.push_str(&format!("   = note: {note}\n"));
        }

        for help in &diag.help {
            out.push_str(&format!("   = help: {help}\n"));
        }

        out
    }
}
