//! Single-instance lock.
//!
//! Two concurrent runs would share the scratch root and race on output
//! names, so the driver takes an exclusive advisory lock on a well-known file
//! before doing anything else. The lock is released when the
//! [`InstanceLock`] is dropped or the process exits.

use crate::error::RipfixError;
use std::fs::{File, OpenOptions, TryLockError};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Name of the lock file inside the temp folder when none is given.
pub const LOCK_FILE: &str = "ripfix.lock";

/// An exclusively held lock file.
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
    // Holding the handle holds the lock.
    _file: File,
}

impl InstanceLock {
    /// Take the lock at `path` without waiting.
    ///
    /// # Errors
    /// [`RipfixError::AlreadyRunning`] if another process holds it,
    /// [`RipfixError::LockFailed`] if the file cannot be opened or locked.
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self, RipfixError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| RipfixError::LockFailed {
                path: path.clone(),
                source: e,
            })?;

        match file.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => return Err(RipfixError::AlreadyRunning { path }),
            Err(TryLockError::Error(e)) => {
                return Err(RipfixError::LockFailed { path, source: e });
            }
        }

        debug!("holding instance lock {}", path.display());
        Ok(Self { path, _file: file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Default lock location: `<temp>/ripfix.lock`.
pub fn default_lock_path(temp_dir: &Path) -> PathBuf {
    temp_dir.join(LOCK_FILE)
}
