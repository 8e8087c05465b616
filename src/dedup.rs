//! Content-hash deduplication index.
//!
//! Maps the SHA-256 of each input to every source path with those bytes, in
//! discovery order. The first path is the canonical one: it is the only one
//! that goes through the pipeline, the others get a copy of its product.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

/// SHA-256 digest of a file's contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Hash everything readable from `reader`.
    pub fn from_reader(mut reader: impl io::Read) -> io::Result<Self> {
        let mut hasher = Sha256::new();
        io::copy(&mut reader, &mut hasher)?;
        Ok(Self(hasher.finalize().into()))
    }

    /// Hash the file at `path`.
    pub fn of_file(path: &Path) -> io::Result<Self> {
        Self::from_reader(File::open(path)?)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// Outcome of recording a path in the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
    /// First path seen with this content; it should be processed.
    Canonical,
    /// Another path already owns this content.
    Duplicate { canonical: PathBuf },
}

/// Concurrent map from content hash to the paths sharing it.
#[derive(Debug, Default)]
pub struct DedupIndex {
    entries: DashMap<ContentHash, Vec<PathBuf>>,
}

impl DedupIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load-or-insert `path` under `hash` as one atomic step.
    ///
    /// The shard lock is held across the lookup and the write, so two inputs
    /// with the same content can never both come back as `Canonical`.
    pub fn record(&self, hash: ContentHash, path: PathBuf) -> Recorded {
        match self.entries.entry(hash) {
            Entry::Occupied(mut e) => {
                let canonical = e.get()[0].clone();
                e.get_mut().push(path);
                Recorded::Duplicate { canonical }
            }
            Entry::Vacant(e) => {
                e.insert(vec![path]);
                Recorded::Canonical
            }
        }
    }

    /// Every path recorded under `hash` except `source`, in discovery order.
    pub fn duplicates_of(&self, hash: &ContentHash, source: &Path) -> Vec<PathBuf> {
        self.entries
            .get(hash)
            .map(|paths| paths.iter().filter(|p| p.as_path() != source).cloned().collect())
            .unwrap_or_default()
    }

    /// Number of distinct contents seen.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of paths suppressed as duplicates.
    pub fn duplicate_count(&self) -> usize {
        self.entries.iter().map(|e| e.value().len() - 1).sum()
    }
}
