//! Thread-safe diagnostic accumulator shared by concurrent callers.

use crate::code::DiagnosticCode;
use crate::diagnostic::Diagnostic;
use crate::severity::Severity;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A thread-safe accumulator for diagnostics emitted while resolving calls.
///
/// The error count is tracked atomically so `has_errors` never locks the
/// diagnostic vector. A panic in another thread while holding the lock does
/// not lose diagnostics: the poisoned guard is recovered.
pub struct DiagnosticSink {
    diagnostics: Mutex<Vec<Diagnostic>>,
    error_count: AtomicUsize,
}

impl DiagnosticSink {
    /// Creates a new empty diagnostic sink.
    pub fn new() -> Self {
        Self {
            diagnostics: Mutex::new(Vec::new()),
            error_count: AtomicUsize::new(0),
        }
    }

    /// Emits a diagnostic into the sink.
    pub fn emit(&self, diag: Diagnostic) {
        if diag.severity == Severity::Error {
            self.error_count.fetch_add(1, Ordering::Relaxed);
        }
        self.lock().push(diag);
    }

    /// Returns `true` if any error-severity diagnostics have been emitted.
    pub fn has_errors(&self) -> bool {
        self.error_count() > 0
    }

    /// Returns the number of error-severity diagnostics emitted so far.
    pub fn error_count(&self) -> usize {
        self.error_count.load(Ordering::Relaxed)
    }

    /// Returns how many currently held diagnostics carry `code`.
    pub fn count_code(&self, code: DiagnosticCode) -> usize {
        self.lock().iter().filter(|d| d.code == code).count()
    }

    /// Takes all accumulated diagnostics, leaving the sink empty.
    ///
    /// The error count is cumulative and is not reset.
    pub fn take_all(&self) -> Vec<Diagnostic> {
        std::mem::take(&mut *self.lock())
    }

    /// Returns a snapshot of all accumulated diagnostics without draining.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Diagnostic>> {
        self.diagnostics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for DiagnosticSink {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_error() -> Diagnostic {
        Diagnostic::error(DiagnosticCode::IMPURE_CAPTURE, "impure")
    }

    fn make_warning() -> Diagnostic {
        Diagnostic::warning(DiagnosticCode::ABSTAINED, "abstained")
    }

    #[test]
    fn empty_sink() {
        let sink = DiagnosticSink::new();
        assert!(!sink.has_errors());
        assert_eq!(sink.error_count(), 0);
        assert!(sink.take_all().is_empty());
    }

    #[test]
    fn emit_error() {
        let sink = DiagnosticSink::new();
        sink.emit(make_error());
        assert!(sink.has_errors());
        assert_eq!(sink.error_count(), 1);
    }

    #[test]
    fn emit_warning_not_error() {
        let sink = DiagnosticSink::new();
        sink.emit(make_warning());
        assert!(!sink.has_errors());
        assert_eq!(sink.diagnostics().len(), 1);
        assert_eq!(sink.count_code(DiagnosticCode::ABSTAINED), 1);
        assert_eq!(sink.count_code(DiagnosticCode::IMPURE_CAPTURE), 0);
    }

    #[test]
    fn take_all_drains() {
        let sink = DiagnosticSink::new();
        sink.emit(make_error());
        sink.emit(make_warning());
        assert_eq!(sink.take_all().len(), 2);
        assert!(sink.take_all().is_empty());
        assert_eq!(sink.error_count(), 1);
    }

    #[test]
    fn survives_poisoned_lock() {
        use std::sync::Arc;

        let sink = Arc::new(DiagnosticSink::new());
        let poisoner = Arc::clone(&sink);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.diagnostics.lock().unwrap();
            panic!("poison");
        })
        .join();

        sink.emit(make_warning());
        assert_eq!(sink.diagnostics().len(), 1);
    }

    #[test]
    fn thread_safety() {
        use std::sync::Arc;
        use std::thread;

        let sink = Arc::new(DiagnosticSink::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let sink = Arc::clone(&sink);
                thread::spawn(move || {
                    for _ in 0..50 {
                        sink.emit(make_error());
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(sink.error_count(), 400);
        assert_eq!(sink.diagnostics().len(), 400);
    }
}
