//! Path-keyed store of source files read during one fingerprint computation.

use crate::error::SourceError;
use crate::location::SourceLocation;
use crate::source_file::SourceFile;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The source database, owning the text of every file touched while walking a
/// call graph so that callables sharing a file read it only once.
///
/// A `SourceDb` is meant to live for one computation. Validation never goes
/// through a long-lived `SourceDb`; it calls [`read_fragment`] to observe the
/// file as it is on disk right now.
pub struct SourceDb {
    files: Vec<SourceFile>,
    by_path: HashMap<PathBuf, usize>,
}

impl SourceDb {
    /// Creates an empty source database.
    pub fn new() -> Self {
        Self {
            files: Vec::new(),
            by_path: HashMap::new(),
        }
    }

    /// Returns the file at `path`, reading it from disk on first use.
    pub fn load_file(&mut self, path: &Path) -> Result<&SourceFile, SourceError> {
        if let Some(&idx) = self.by_path.get(path) {
            return Ok(&self.files[idx]);
        }
        let content = std::fs::read_to_string(path).map_err(|e| SourceError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(self.insert(path.to_path_buf(), content))
    }

    /// Adds a source file from an in-memory string (useful for tests).
    ///
    /// Replaces any file previously registered under the same name.
    pub fn add_source(&mut self, name: impl Into<PathBuf>, content: String) -> &SourceFile {
        self.insert(name.into(), content)
    }

    /// Returns the text of the fragment at `location`.
    pub fn fragment(&mut self, location: &SourceLocation) -> Result<&str, SourceError> {
        self.load_file(&location.file_path)?.fragment(location)
    }

    /// Returns the number of distinct files loaded.
    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    /// Returns `true` if no file has been loaded.
    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }

    fn insert(&mut self, path: PathBuf, content: String) -> &SourceFile {
        let idx = self.files.len();
        self.files.push(SourceFile::new(path.clone(), content));
        self.by_path.insert(path, idx);
        &self.files[idx]
    }
}

impl Default for SourceDb {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads the fragment at `location` straight from disk.
pub fn read_fragment(location: &SourceLocation) -> Result<String, SourceError> {
    let path = &location.file_path;
    let content = std::fs::read_to_string(path).map_err(|e| SourceError::Io {
        path: path.clone(),
        source: e,
    })?;
    let file = SourceFile::new(path.clone(), content);
    file.fragment(location).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_fragment() {
        let mut db = SourceDb::new();
        db.add_source("k.py", "def k():\n    pass\n".to_string());
        let loc = SourceLocation::new("m.k", "k.py", 1, 2);
        assert_eq!(db.fragment(&loc).unwrap(), "def k():\n    pass");
    }

    #[test]
    fn load_file_is_cached() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("k.py");
        std::fs::write(&path, "def k():\n    pass\n").unwrap();

        let mut db = SourceDb::new();
        db.load_file(&path).unwrap();
        // Later edits are not observed by the same db.
        std::fs::write(&path, "def k():\n    return 1\n").unwrap();
        let file = db.load_file(&path).unwrap();
        assert!(file.content.contains("pass"));
        assert_eq!(db.len(), 1);
    }

    #[test]
    fn missing_file_errors() {
        let mut db = SourceDb::new();
        let err = db.load_file(Path::new("/nonexistent/k.py")).err().unwrap();
        assert!(matches!(err, SourceError::Io { .. }));
        assert!(db.is_empty());
    }

    #[test]
    fn read_fragment_sees_current_disk_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("k.py");
        std::fs::write(&path, "a\nb\nc\n").unwrap();
        let loc = SourceLocation::new("m.k", &path, 2, 3);
        assert_eq!(read_fragment(&loc).unwrap(), "b\nc");

        std::fs::write(&path, "a\nB\nc\n").unwrap();
        assert_eq!(read_fragment(&loc).unwrap(), "B\nc");
    }

    #[test]
    fn read_fragment_missing_file() {
        let loc = SourceLocation::new("m.k", "/nonexistent/k.py", 1, 1);
        assert!(read_fragment(&loc).is_err());
    }
}
