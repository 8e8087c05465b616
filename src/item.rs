//! Work items and the artifact naming convention.
//!
//! Artifact names must stay bit-exact across releases: a re-run decides what
//! to skip by looking for these files.
//!
//! ```text
//! <out>/<stem>_fixed.pdf           after recognition
//! <out>/<stem>_fixed_<style>.pdf   after compression
//! ```

use crate::config::{CompressStyle, RipfixConfig};
use serde::Serialize;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Marker appended to every product's file stem.
///
/// The list builder refuses inputs whose name contains it, so a broad glob
/// re-run over the output folder never reprocesses old products.
pub const SUFFIX_FIXED: &str = "_fixed";

/// Extension of every product.
pub const PRODUCT_EXT: &str = "pdf";

/// One unit of work: a source document plus the policy to process it with.
///
/// Immutable once built. A `WorkItem` is moved through the work channel, so
/// exactly one worker ever owns it.
#[derive(Debug, Clone, Serialize)]
pub struct WorkItem {
    /// Unique within the run; also names the scratch folder and manifest.
    pub id: String,
    pub source: PathBuf,
    /// `<temp>/ripfix/<pid>.<id>`, unique per item.
    pub scratch: PathBuf,
    pub out_dir: PathBuf,
    pub compress: CompressStyle,
    pub skip_existing: bool,
    pub reprocess: bool,
    pub clean: bool,
    pub dedupe: bool,
}

impl WorkItem {
    /// Build the item for `source` under the run's policy.
    pub fn new(source: impl Into<PathBuf>, config: &RipfixConfig, pid: u32) -> Self {
        let id = Uuid::new_v4().simple().to_string();
        let scratch = config.scratch_root().join(format!("{pid}.{id}"));
        Self {
            id,
            source: source.into(),
            scratch,
            out_dir: config.out_dir.clone(),
            compress: config.compress,
            skip_existing: config.skip_existing,
            reprocess: config.reprocess,
            clean: config.clean,
            dedupe: config.dedupe,
        }
    }

    /// Every path this item can produce.
    pub fn artifacts(&self) -> Artifacts {
        Artifacts::for_source(&self.source, &self.out_dir, self.compress)
    }

    /// The page-image manifest handed to the recognizer.
    pub fn manifest_path(&self) -> PathBuf {
        self.scratch.join(format!("{}.lst", self.id))
    }
}

/// Output paths for one source, computed before any stage runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifacts {
    /// `<out>/<stem>_fixed`; tesseract appends the extension itself.
    pub stem: PathBuf,
    /// `<out>/<stem>_fixed.pdf`
    pub fixed: PathBuf,
    /// `<out>/<stem>_fixed_<style>.pdf`
    pub compressed: PathBuf,
    /// The file the run ends with: `compressed` when a style is set,
    /// `fixed` otherwise.
    pub product: PathBuf,
}

impl Artifacts {
    pub fn for_source(source: &Path, out_dir: &Path, style: CompressStyle) -> Self {
        let base = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let fixed_name = format!("{base}{SUFFIX_FIXED}");

        let stem = out_dir.join(&fixed_name);
        let fixed = out_dir.join(format!("{fixed_name}.{PRODUCT_EXT}"));
        let compressed = out_dir.join(format!("{fixed_name}_{}.{PRODUCT_EXT}", style.as_str()));
        let product = if style.is_none() {
            fixed.clone()
        } else {
            compressed.clone()
        };

        Self {
            stem,
            fixed,
            compressed,
            product,
        }
    }
}
