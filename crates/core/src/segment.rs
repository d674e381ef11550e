//! Segment store
//!
//! Sequentially numbered files under one directory, each holding one host
//! block of consecutive frames. Files belong to a single shot: they are
//! removed before the next forward sweep and when the engine closes.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};

use tracing::debug;

const PREFIX: &str = "segment_";
const EXTENSION: &str = "bin";

/// Directory of per-shot segment files
#[derive(Debug, Clone)]
pub struct SegmentStore {
    dir: PathBuf,
}

impl SegmentStore {
    /// Store rooted at `dir`; nothing is created until [`Self::prepare`]
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the segments
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of segment `index`
    #[must_use]
    pub fn path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("{PREFIX}{index}.{EXTENSION}"))
    }

    /// Create the directory if needed and remove stale segments
    pub fn prepare(&self) -> io::Result<usize> {
        fs::create_dir_all(&self.dir)?;
        self.clear()
    }

    /// Create (truncating) segment `index` for writing
    pub fn create(&self, index: usize) -> io::Result<BufWriter<File>> {
        File::create(self.path(index)).map(BufWriter::new)
    }

    /// Open segment `index` for reading
    pub fn open(&self, index: usize) -> io::Result<BufReader<File>> {
        File::open(self.path(index)).map(BufReader::new)
    }

    /// Remove every segment file, returning how many were removed
    ///
    /// A missing directory counts as empty. Other files in the directory are
    /// left alone.
    pub fn clear(&self) -> io::Result<usize> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        let mut removed = 0;
        for entry in entries {
            let path = entry?.path();
            if is_segment(&path) {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(dir = %self.dir.display(), removed, "Removed segment files");
        }
        Ok(removed)
    }
}

fn is_segment(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    name.strip_prefix(PREFIX)
        .and_then(|rest| rest.strip_suffix(EXTENSION))
        .and_then(|rest| rest.strip_suffix('.'))
        .is_some_and(|index| !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit()))
}
