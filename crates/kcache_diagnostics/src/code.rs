//! Diagnostic codes with category prefixes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The category of a diagnostic code, determining its prefix letter.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum Category {
    /// Error diagnostics, prefixed with `E`.
    Error,
    /// Warning diagnostics, prefixed with `W`.
    Warning,
}

impl Category {
    /// Returns the single-character prefix for this category.
    pub fn prefix(self) -> char {
        match self {
            Category::Error => 'E',
            Category::Warning => 'W',
        }
    }
}

/// A structured diagnostic code combining a category prefix and a numeric identifier.
///
/// Displayed as the category prefix followed by a zero-padded 3-digit number,
/// e.g. `E001`, `W002`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct DiagnosticCode {
    /// The category of this diagnostic.
    pub category: Category,
    /// The numeric identifier within the category.
    pub number: u16,
}

impl DiagnosticCode {
    /// A callable marked pure reads a mutable captured name it does not
    /// receive as a parameter.
    pub const IMPURE_CAPTURE: DiagnosticCode = DiagnosticCode::new(Category::Error, 1);

    /// The cache declined to fingerprint a callable and compiles it every
    /// time it is seen in a new process.
    pub const ABSTAINED: DiagnosticCode = DiagnosticCode::new(Category::Warning, 1);

    /// A side-cache record no longer matches the source it was built from.
    pub const STALE_RECORD: DiagnosticCode = DiagnosticCode::new(Category::Warning, 2);

    /// Creates a new diagnostic code.
    pub const fn new(category: Category, number: u16) -> Self {
        Self { category, number }
    }
}

impl fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:03}", self.category.prefix(), self.number)
    }
}
