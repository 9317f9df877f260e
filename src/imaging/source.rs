//! Re-openable byte sources and output destinations.
//!
//! A decode touches its source several times: once for the header, once per
//! decode attempt. Each [`ImageSource::open`] returns an independent stream
//! owned by the caller, so a failed attempt closes its handle simply by
//! dropping it before the next attempt opens a fresh one.

use crate::naming::NamePattern;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Cursor, Seek};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

/// Readable, seekable stream over a source's bytes.
pub trait SourceStream: BufRead + Seek + Send {}

impl<T: BufRead + Seek + Send> SourceStream for T {}

/// One open handle on a source. Closed on drop.
pub type SourceReader = Box<dyn SourceStream>;

/// An opaque image source that can be opened any number of times.
pub trait ImageSource: Send + Sync {
    /// Human-readable identity used in error messages and logs.
    fn id(&self) -> String;

    /// Open a fresh stream positioned at the first byte.
    fn open(&self) -> io::Result<SourceReader>;

    /// Last modification time, when the source has one.
    fn modified(&self) -> Option<SystemTime> {
        None
    }
}

/// Image stored in a file.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ImageSource for FileSource {
    fn id(&self) -> String {
        self.path.display().to_string()
    }

    fn open(&self) -> io::Result<SourceReader> {
        let file = File::open(&self.path)?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn modified(&self) -> Option<SystemTime> {
        std::fs::metadata(&self.path).and_then(|m| m.modified()).ok()
    }
}

/// Image held in memory, shared cheaply between opens.
#[derive(Debug, Clone)]
pub struct MemorySource {
    name: String,
    bytes: Arc<[u8]>,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl ImageSource for MemorySource {
    fn id(&self) -> String {
        self.name.clone()
    }

    fn open(&self) -> io::Result<SourceReader> {
        Ok(Box::new(Cursor::new(Arc::clone(&self.bytes))))
    }
}

/// Where a finished image goes.
#[derive(Debug, Clone, PartialEq)]
pub enum Destination {
    /// Encode as JPEG and write to this path.
    File(PathBuf),
    /// Encode as JPEG into `dir`, named by rendering `pattern` once the
    /// capture date is known.
    Directory {
        dir: PathBuf,
        pattern: NamePattern,
        index: usize,
    },
    /// Hand the composited buffer back without encoding.
    Memory,
}

impl Destination {
    pub fn describe(&self) -> String {
        match self {
            Self::File(path) => path.display().to_string(),
            Self::Directory { dir, index, .. } => format!("{} (#{index})", dir.display()),
            Self::Memory => "<memory>".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn destination_descriptions() {
        assert_eq!(Destination::Memory.describe(), "<memory>");
        assert_eq!(Destination::File("out/a.jpg".into()).describe(), "out/a.jpg");
        let named = Destination::Directory {
            dir: "out".into(),
            pattern: NamePattern::default(),
            index: 3,
        };
        assert_eq!(named.describe(), "out (#3)");
    }

    #[test]
    fn memory_source_reopens_from_start() {
        let source = MemorySource::new("mem", vec![1u8, 2, 3]);
        let mut first = Vec::new();
        source.open().unwrap().read_to_end(&mut first).unwrap();
        let mut second = Vec::new();
        source.open().unwrap().read_to_end(&mut second).unwrap();
        assert_eq!(first, vec![1, 2, 3]);
        assert_eq!(first, second);
        assert_eq!(source.id(), "mem");
    }

    #[test]
    fn file_source_missing_file_fails_to_open() {
        let source = FileSource::new("/nonexistent/photo.jpg");
        assert!(source.open().is_err());
        assert!(source.modified().is_none());
    }

    #[test]
    fn file_source_reports_modified_time() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("a.bin");
        std::fs::write(&path, b"abc").unwrap();
        let source = FileSource::new(&path);
        assert!(source.modified().is_some());
        assert_eq!(source.id(), path.display().to_string());
    }
}
