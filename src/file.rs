//! File collaborator: the document a database versions.

use std::io;
use std::path::{Path, PathBuf};

/// Source of the raw bytes captured as a snapshot's file contents.
///
/// The database only needs "current raw content"; what backs it (a file
/// on disk, an in-memory buffer, a view into a larger document) is the
/// caller's business.
pub trait FileSource {
    fn current_contents(&self) -> io::Result<Vec<u8>>;
}

impl FileSource for [u8] {
    fn current_contents(&self) -> io::Result<Vec<u8>> {
        Ok(self.to_vec())
    }
}

impl FileSource for Vec<u8> {
    fn current_contents(&self) -> io::Result<Vec<u8>> {
        Ok(self.clone())
    }
}

/// Handle to the document a database is associated with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileRef {
    name: String,
    path: Option<PathBuf>,
}

impl FileRef {
    /// A file reference with no backing path (in-memory document).
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: None,
        }
    }

    /// A file reference backed by a path on disk.
    pub fn with_path(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: Some(path.into()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl FileSource for FileRef {
    /// Read the current bytes from the backing path.
    fn current_contents(&self) -> io::Result<Vec<u8>> {
        match &self.path {
            Some(path) => std::fs::read(path),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("file reference '{}' has no backing path", self.name),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_slice_source() {
        let bytes: &[u8] = b"document state";
        assert_eq!(bytes.current_contents().unwrap(), b"document state");
    }

    #[test]
    fn test_file_ref_without_path_fails() {
        let file = FileRef::new("untitled");
        assert!(file.current_contents().is_err());
    }

    #[test]
    fn test_file_ref_with_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("doc.bin");
        std::fs::write(&path, b"on disk").unwrap();

        let file = FileRef::with_path("doc.bin", &path);
        assert_eq!(file.current_contents().unwrap(), b"on disk");
        assert_eq!(file.name(), "doc.bin");
    }
}
