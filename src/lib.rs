//! # ripfix
//!
//! Batch OCR for scanned PDFs: rasterize every page, run it through
//! tesseract, and optionally shrink the result with ps2pdf. A bounded pool of
//! workers processes many documents at once.
//!
//! ## Pipeline Overview
//!
//! ```text
//! patterns
//!  │
//!  ├─ 1. List       expand globs, skip *_fixed*, optional SHA-256 dedup
//!  ├─ 2. Supervise  at most N documents in flight (semaphore)
//!  └─ 3. Per document
//!        ├─ rasterize   pdftoppm -tiff -r 300
//!        ├─ recognize   tesseract <list> <out>/<stem>_fixed pdf
//!        ├─ compress    ps2pdf -dPDFSETTINGS=/<style>   (optional)
//!        └─ duplicates  copy the product to each twin's output name
//! ```
//!
//! Every stage is skipped when its artifact already exists, so re-running a
//! batch is cheap and an interrupted batch resumes where it stopped.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ripfix::{run, CompressStyle, ExternalTools, RipfixConfig, TracingSink};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RipfixConfig::builder()
//!         .input("scans/*.pdf")
//!         .out_dir("ocr/")
//!         .compress(CompressStyle::Ebook)
//!         .build()?;
//!     let summary = run(&config, Arc::new(ExternalTools::default()), Arc::new(TracingSink)).await?;
//!     eprintln!("{} completed, {} failed", summary.completed, summary.failed);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `ripfix` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! ripfix = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod dedup;
pub mod error;
pub mod item;
pub mod lock;
pub mod pipeline;
pub mod progress;
pub mod run;
pub mod supervisor;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{CompressStyle, RipfixConfig, RipfixConfigBuilder};
pub use dedup::{ContentHash, DedupIndex};
pub use error::{RipfixError, Stage, StageError, ToolError};
pub use item::{Artifacts, WorkItem};
pub use lock::InstanceLock;
pub use pipeline::list::ListBuilder;
pub use pipeline::runner::RunContext;
pub use pipeline::tools::{ExternalTools, Toolchain};
pub use progress::{
    Emitter, ItemFailure, NoopSink, ProgressEvent, ProgressSink, RunSummary, SharedSink,
    TracingSink,
};
pub use run::run;
pub use supervisor::Supervisor;
