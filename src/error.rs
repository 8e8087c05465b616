//! Error types for the ripfix library.
//!
//! Three error types reflect three distinct failure modes:
//!
//! * [`RipfixError`] (**fatal**): the run cannot start or cannot continue
//!   (missing input, output location is not a directory, a required tool is
//!   not installed, duplicate resolution failed after the expensive work was
//!   already done). Returned as `Err(RipfixError)` from [`crate::run()`].
//!
//! * [`StageError`] (**per item**): one document failed at one stage. It is
//!   reported through [`crate::progress::ProgressEvent::Error`] and the run
//!   carries on with the remaining documents.
//!
//! * [`ToolError`]: a single collaborator invocation failed. Always wrapped
//!   into a [`StageError`] by the pipeline runner.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the ripfix library.
#[derive(Debug, Error)]
pub enum RipfixError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// A literal input path could not be statted.
    #[error("file {path:?} cannot be found: {source}")]
    InputNotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An input pattern is not a valid glob.
    #[error("invalid input pattern '{pattern}': {detail}")]
    InvalidPattern { pattern: String, detail: String },

    /// A path matched by a glob could not be read while expanding it.
    #[error("could not read {path:?} while expanding '{pattern}': {source}")]
    GlobEntry {
        pattern: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Hashing an input for deduplication failed while building the work list.
    #[error("could not hash {path:?}: {source}")]
    HashFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Environment errors ────────────────────────────────────────────────
    /// The output location does not exist or is not a directory.
    #[error("output location {path:?} is not a directory")]
    OutputNotDirectory { path: PathBuf },

    /// The scratch root could not be created.
    #[error("could not create scratch root {path:?}: {source}")]
    ScratchRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A collaborator binary is not on `PATH`.
    #[error("could not find path to {tool}!\nInstall it or add it to PATH.")]
    ToolMissing { tool: String },

    /// Another ripfix instance holds the lock file.
    #[error("only one instance of ripfix should be running at a time (lock {path:?} is held)")]
    AlreadyRunning { path: PathBuf },

    /// The lock file could not be opened or locked.
    #[error("error while trying to lock {path:?}: {source}")]
    LockFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Run errors ────────────────────────────────────────────────────────
    /// Copying a canonical artifact to a duplicate's output failed.
    ///
    /// Duplicate resolution runs after the expensive stages have already
    /// succeeded, so a failure here means the filesystem is in a state the
    /// pipeline cannot reason about. The run is stopped.
    #[error("duplicate resolution for {source_path:?} failed: {detail}")]
    DuplicateResolution { source_path: PathBuf, detail: String },

    /// Work was refused because the run already stopped on a fatal error.
    #[error("run halted after a fatal error")]
    Halted,

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Pipeline stage a per-item failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Scratch,
    Rasterize,
    Manifest,
    Recognize,
    Compress,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Scratch => "scratch",
            Stage::Rasterize => "rasterize",
            Stage::Manifest => "manifest",
            Stage::Recognize => "recognize",
            Stage::Compress => "compress",
        };
        f.write_str(name)
    }
}

/// A non-fatal error for a single work item.
///
/// Carried inside [`crate::progress::ItemFailure`]; the run continues with
/// the remaining items.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum StageError {
    /// The per-item scratch directory could not be created.
    #[error("error creating scratch directory {path:?}: {detail}")]
    ScratchDir { path: PathBuf, detail: String },

    /// pdftoppm failed.
    #[error("pdftoppm {source_path:?} -> {scratch:?}: {detail}")]
    Rasterize {
        source_path: PathBuf,
        scratch: PathBuf,
        detail: String,
    },

    /// The page-image manifest could not be written.
    #[error("error writing page list {path:?}: {detail}")]
    Manifest { path: PathBuf, detail: String },

    /// tesseract failed.
    #[error("tesseract {manifest:?} -> {stem:?}: {detail}")]
    Recognize {
        manifest: PathBuf,
        stem: PathBuf,
        detail: String,
    },

    /// ps2pdf failed.
    #[error("compress '{style}' {input:?} -> {output:?}: {detail}")]
    Compress {
        style: String,
        input: PathBuf,
        output: PathBuf,
        detail: String,
    },
}

impl StageError {
    /// The stage this error belongs to.
    pub fn stage(&self) -> Stage {
        match self {
            StageError::ScratchDir { .. } => Stage::Scratch,
            StageError::Rasterize { .. } => Stage::Rasterize,
            StageError::Manifest { .. } => Stage::Manifest,
            StageError::Recognize { .. } => Stage::Recognize,
            StageError::Compress { .. } => Stage::Compress,
        }
    }
}

/// A failed collaborator invocation.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The process could not be started at all.
    #[error("failed to launch {tool}: {source}")]
    Launch {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    /// The process ran and exited unsuccessfully.
    #[error("{tool} exited with {status}")]
    Exit { tool: String, status: String },

    /// Any other failure reported by a [`crate::pipeline::tools::Toolchain`].
    #[error("{tool}: {detail}")]
    Other { tool: String, detail: String },
}
