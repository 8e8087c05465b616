//! Pipeline stages for OCR-ing scanned PDFs.
//!
//! ## Data Flow
//!
//! ```text
//! patterns ──▶ list ──▶ runner ──▶ tools
//! (globs)     (paths)  (stages)   (pdftoppm / tesseract / ps2pdf)
//! ```
//!
//! 1. [`list`]: expand patterns into concrete files, drop prior outputs
//!    and set content-duplicates aside
//! 2. [`runner`]: drive one document through its stages, skipping any whose
//!    artifact already exists
//! 3. [`tools`]: the external collaborators behind the [`tools::Toolchain`]
//!    trait; every call is blocking and runs in `spawn_blocking`

pub mod list;
pub mod runner;
pub mod tools;
