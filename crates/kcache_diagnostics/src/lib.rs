//! User-directed diagnostics for the kernel cache.
//!
//! Soundness violations and abstentions are reported as structured
//! [`Diagnostic`]s with a severity, a stable code and the [`SourceLocation`]
//! of the callable involved. The thread-safe [`DiagnosticSink`] accumulates
//! them and [`TerminalRenderer`] formats them for a terminal.
//!
//! [`SourceLocation`]: kcache_source::SourceLocation

#![warn(missing_docs)]

pub mod code;
pub mod diagnostic;
pub mod renderer;
pub mod severity;
pub mod sink;

pub use code::{Category, DiagnosticCode};
pub use diagnostic::Diagnostic;
pub use renderer::{DiagnosticRenderer, TerminalRenderer};
pub use severity::Severity;
pub use sink::DiagnosticSink;
