//! Line-range locations of callable source fragments.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// A contiguous source fragment belonging to one callable.
///
/// Lines are 1-indexed and the range is inclusive on both ends. A location is
/// immutable once created; it is persisted in side-cache records and read back
/// to re-hash exactly the same lines during validation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLocation {
    /// Fully-qualified name of the callable defined by this fragment.
    pub callable_name: String,
    /// The filesystem path of the source file.
    pub file_path: PathBuf,
    /// The first line of the fragment (1-indexed).
    pub start_line: u32,
    /// The last line of the fragment (1-indexed, inclusive).
    pub end_line: u32,
}

impl SourceLocation {
    /// Creates a new location.
    pub fn new(
        callable_name: impl Into<String>,
        file_path: impl Into<PathBuf>,
        start_line: u32,
        end_line: u32,
    ) -> Self {
        Self {
            callable_name: callable_name.into(),
            file_path: file_path.into(),
            start_line,
            end_line,
        }
    }

    /// Returns the number of lines covered by the fragment.
    pub fn line_count(&self) -> u32 {
        self.end_line.saturating_sub(self.start_line) + 1
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}-{} ({})",
            self.file_path.display(),
            self.start_line,
            self.end_line,
            self.callable_name
        )
    }
}
