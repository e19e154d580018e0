//! Source file representation with line-start indexing for fragment extraction.

use kcache_common::ContentHash;
use std::path::PathBuf;

use crate::error::SourceError;
use crate::location::SourceLocation;

/// A source file loaded for fingerprinting.
///
/// Stores the file's content along with precomputed line-start offsets so that
/// the fragments of several callables defined in one file can be sliced out
/// without rescanning.
pub struct SourceFile {
    /// The filesystem path of this file (or a synthetic name for in-memory sources).
    pub path: PathBuf,
    /// The full text content of the file.
    pub content: String,
    /// Byte offsets of each line start (the first entry is always 0).
    line_starts: Vec<usize>,
    /// Hash of the whole file content.
    pub content_hash: ContentHash,
}

impl SourceFile {
    /// Creates a new `SourceFile` with precomputed line starts and content hash.
    pub fn new(path: PathBuf, content: String) -> Self {
        let line_starts = compute_line_starts(&content);
        let content_hash = ContentHash::from_bytes(content.as_bytes());
        Self {
            path,
            content,
            line_starts,
            content_hash,
        }
    }

    /// Returns the number of lines in the file.
    ///
    /// A trailing newline does not start an extra line.
    pub fn line_count(&self) -> u32 {
        let n = self.line_starts.len();
        if n > 1 && self.line_starts[n - 1] == self.content.len() {
            (n - 1) as u32
        } else {
            n as u32
        }
    }

    /// Returns lines `start_line..=end_line` (1-indexed), without the final
    /// line terminator.
    pub fn lines(&self, start_line: u32, end_line: u32) -> Result<&str, SourceError> {
        let line_count = self.line_count();
        if start_line == 0 || start_line > end_line || end_line > line_count {
            return Err(SourceError::LineRange {
                path: self.path.clone(),
                start_line,
                end_line,
                line_count,
            });
        }
        let start = self.line_starts[(start_line - 1) as usize];
        let end = self
            .line_starts
            .get(end_line as usize)
            .copied()
            .unwrap_or(self.content.len());
        Ok(self.content[start..end].trim_end_matches(|c: char| c == '\n' || c == '\r'))
    }

    /// Returns the text of the fragment at `location`.
    pub fn fragment(&self, location: &SourceLocation) -> Result<&str, SourceError> {
        self.lines(location.start_line, location.end_line)
    }
}

/// Computes the byte offsets of each line start in the given content.
fn compute_line_starts(content: &str) -> Vec<usize> {
    let mut starts = vec![0];
    for (i, byte) in content.bytes().enumerate() {
        if byte == b'\n' {
            starts.push(i + 1);
        }
    }
    starts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_file(content: &str) -> SourceFile {
        SourceFile::new(PathBuf::from("test.py"), content.to_string())
    }

    #[test]
    fn line_starts_computation() {
        let f = make_file("abc\ndef\nghi");
        assert_eq!(f.line_starts, vec![0, 4, 8]);
    }

    #[test]
    fn line_count_ignores_trailing_newline() {
        assert_eq!(make_file("a\nb\n").line_count(), 2);
        assert_eq!(make_file("a\nb").line_count(), 2);
        assert_eq!(make_file("").line_count(), 1);
    }

    #[test]
    fn lines_extraction() {
        let f = make_file("one\ntwo\nthree\nfour\n");
        assert_eq!(f.lines(2, 3).unwrap(), "two\nthree");
        assert_eq!(f.lines(4, 4).unwrap(), "four");
        assert_eq!(f.lines(1, 1).unwrap(), "one");
    }

    #[test]
    fn crlf_terminator_trimmed() {
        let f = make_file("one\r\ntwo\r\n");
        assert_eq!(f.lines(1, 1).unwrap(), "one");
    }

    #[test]
    fn out_of_range_errors() {
        let f = make_file("one\ntwo\n");
        assert!(matches!(f.lines(0, 1), Err(SourceError::LineRange { .. })));
        assert!(matches!(f.lines(2, 3), Err(SourceError::LineRange { .. })));
        assert!(matches!(f.lines(2, 1), Err(SourceError::LineRange { .. })));
    }

    #[test]
    fn fragment_by_location() {
        let f = make_file("def f():\n    return 1\n\ndef g():\n    return 2\n");
        let loc = SourceLocation::new("m.g", "test.py", 4, 5);
        assert_eq!(f.fragment(&loc).unwrap(), "def g():\n    return 2");
    }

    #[test]
    fn content_hash_computed() {
        let f = make_file("test content");
        let expected = ContentHash::from_bytes(b"test content");
        assert_eq!(f.content_hash, expected);
    }
}
