//! Work-list construction: expand input patterns into concrete files.
//!
//! Patterns containing `*` or `?` are expanded against the filesystem; every
//! other entry must exist. Directories are skipped, and so is anything whose
//! name carries the `_fixed` marker, which keeps a broad glob over the output
//! folder from feeding old products back in.
//!
//! A file reached through more than one pattern is listed once.
//!
//! With a [`DedupIndex`] attached every file is hashed as it is discovered,
//! and files whose content was already seen are recorded under the earlier
//! file instead of being returned as work.

use crate::dedup::{ContentHash, DedupIndex, Recorded};
use crate::error::RipfixError;
use crate::item::SUFFIX_FIXED;
use crate::progress::Emitter;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Builds the list of source documents for a run.
#[derive(Debug, Default, Clone)]
pub struct ListBuilder {
    dedup: Option<Arc<DedupIndex>>,
    events: Option<Emitter>,
}

impl ListBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hash every file into `index` and drop content-duplicates from the list.
    pub fn dedup(mut self, index: Arc<DedupIndex>) -> Self {
        self.dedup = Some(index);
        self
    }

    /// Report duplicates and the final total on `events`.
    pub fn events(mut self, events: Emitter) -> Self {
        self.events = Some(events);
        self
    }

    /// Expand `patterns` into the work list.
    ///
    /// Emits exactly one [`crate::progress::ProgressEvent::Estimate`] (when
    /// an emitter is attached) carrying the pruned list length.
    pub fn build<S: AsRef<str>>(&self, patterns: &[S]) -> Result<Vec<PathBuf>, RipfixError> {
        let mut list = Listing::default();
        for pattern in patterns {
            self.expand(pattern.as_ref(), &mut list)?;
        }
        let list = list.paths;
        if let Some(ref events) = self.events {
            events.estimate(list.len() as u64);
        }
        debug!("work list built: {} files", list.len());
        Ok(list)
    }

    fn expand(&self, entry: &str, list: &mut Listing) -> Result<(), RipfixError> {
        if is_prior_output(Path::new(entry)) {
            debug!("skipping prior output {}", entry);
            return Ok(());
        }

        if !is_pattern(entry) {
            return self.add(PathBuf::from(entry), list);
        }

        let matches = glob::glob(entry).map_err(|e| RipfixError::InvalidPattern {
            pattern: entry.to_string(),
            detail: e.to_string(),
        })?;

        for m in matches {
            let path = m.map_err(|e| RipfixError::GlobEntry {
                pattern: entry.to_string(),
                path: e.path().to_path_buf(),
                source: e.into(),
            })?;
            if is_prior_output(&path) {
                debug!("skipping prior output {}", path.display());
                continue;
            }
            self.add(path, list)?;
        }
        Ok(())
    }

    fn add(&self, path: PathBuf, list: &mut Listing) -> Result<(), RipfixError> {
        let meta = std::fs::metadata(&path).map_err(|e| RipfixError::InputNotFound {
            path: path.clone(),
            source: e,
        })?;
        if meta.is_dir() {
            return Ok(());
        }

        let key = std::fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
        if !list.seen.insert(key) {
            debug!("{} already listed", path.display());
            return Ok(());
        }

        if let Some(ref index) = self.dedup {
            let hash = ContentHash::of_file(&path).map_err(|e| RipfixError::HashFailed {
                path: path.clone(),
                source: e,
            })?;
            if let Recorded::Duplicate { canonical } = index.record(hash, path.clone()) {
                let msg = format!(
                    "[BUILDLIST] DUPE! File '{}' and '{}' share a sum ({hash})!",
                    canonical.display(),
                    path.display()
                );
                debug!("{msg}");
                if let Some(ref events) = self.events {
                    events.message(msg);
                }
                return Ok(());
            }
        }

        list.paths.push(path);
        Ok(())
    }
}

/// Paths collected so far, in discovery order.
#[derive(Default)]
struct Listing {
    paths: Vec<PathBuf>,
    seen: HashSet<PathBuf>,
}

fn is_pattern(entry: &str) -> bool {
    entry.contains('*') || entry.contains('?')
}

/// True when the entry's own name carries the product marker.
fn is_prior_output(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().contains(SUFFIX_FIXED))
        .unwrap_or(false)
}
