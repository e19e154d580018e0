//! Error types for loading source files and fragments.

use std::path::PathBuf;

/// Errors that can occur while reading callable source.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The source file could not be read.
    #[error("cannot read source file {path}: {source}")]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The requested line range lies outside the file.
    #[error("lines {start_line}-{end_line} are outside {path} ({line_count} lines)")]
    LineRange {
        /// The source file.
        path: PathBuf,
        /// First requested line.
        start_line: u32,
        /// Last requested line.
        end_line: u32,
        /// Number of lines actually present.
        line_count: u32,
    },
}
