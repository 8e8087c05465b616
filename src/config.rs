//! Configuration types for a ripfix run.
//!
//! All run behaviour is controlled through [`RipfixConfig`], built via its
//! [`RipfixConfigBuilder`]. The builder normalises the knobs that interact
//! (`reprocess` turns `skip_existing` off, `max_workers` is at least one) so
//! the rest of the crate never has to re-check them.

use crate::error::RipfixError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Configuration for one ripfix run.
///
/// # Example
/// ```rust
/// use ripfix::{CompressStyle, RipfixConfig};
///
/// let config = RipfixConfig::builder()
///     .input("scans/*.pdf")
///     .out_dir("fixed")
///     .max_workers(4)
///     .compress(CompressStyle::Ebook)
///     .build()
///     .unwrap();
/// assert!(config.skip_existing);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RipfixConfig {
    /// Input paths or glob patterns (`*`, `?`).
    pub inputs: Vec<String>,

    /// Where the final products go. Must be an existing directory. Default: `./`.
    pub out_dir: PathBuf,

    /// Root for scratch space; per-item folders live under `<temp_dir>/ripfix`.
    /// Default: the system temp directory.
    pub temp_dir: PathBuf,

    /// Maximum number of documents processed at the same time. Default: number
    /// of available CPUs.
    pub max_workers: usize,

    /// Compression target applied after recognition. Default: none.
    pub compress: CompressStyle,

    /// Treat an existing product as correct and skip the stage that makes it.
    /// Default: true. Always false when `reprocess` is set.
    pub skip_existing: bool,

    /// Only reprocess documents that already have a product. Default: false.
    pub reprocess: bool,

    /// Remove scratch folders and intermediate products when done. Default: true.
    pub clean: bool,

    /// Hash every input and process byte-identical documents only once.
    /// Default: false.
    pub dedupe: bool,
}

impl Default for RipfixConfig {
    fn default() -> Self {
        Self {
            inputs: Vec::new(),
            out_dir: PathBuf::from("./"),
            temp_dir: std::env::temp_dir(),
            max_workers: default_workers(),
            compress: CompressStyle::default(),
            skip_existing: true,
            reprocess: false,
            clean: true,
            dedupe: false,
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl RipfixConfig {
    /// Create a new builder for `RipfixConfig`.
    pub fn builder() -> RipfixConfigBuilder {
        RipfixConfigBuilder {
            config: Self::default(),
        }
    }

    /// The folder all per-item scratch directories are created in.
    pub fn scratch_root(&self) -> PathBuf {
        self.temp_dir.join(SCRATCH_FOLDER)
    }
}

/// Name of the scratch folder created under the temp directory.
pub const SCRATCH_FOLDER: &str = "ripfix";

/// Builder for [`RipfixConfig`].
#[derive(Debug)]
pub struct RipfixConfigBuilder {
    config: RipfixConfig,
}

impl RipfixConfigBuilder {
    pub fn input(mut self, pattern: impl Into<String>) -> Self {
        self.config.inputs.push(pattern.into());
        self
    }

    pub fn inputs<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.inputs.extend(patterns.into_iter().map(Into::into));
        self
    }

    pub fn out_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.out_dir = dir.into();
        self
    }

    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.temp_dir = dir.into();
        self
    }

    pub fn max_workers(mut self, n: usize) -> Self {
        // Zero workers would deadlock the supervisor.
        self.config.max_workers = n.max(1);
        self
    }

    pub fn compress(mut self, style: CompressStyle) -> Self {
        self.config.compress = style;
        self
    }

    pub fn skip_existing(mut self, v: bool) -> Self {
        self.config.skip_existing = v;
        self
    }

    pub fn reprocess(mut self, v: bool) -> Self {
        self.config.reprocess = v;
        self
    }

    pub fn clean(mut self, v: bool) -> Self {
        self.config.clean = v;
        self
    }

    pub fn dedupe(mut self, v: bool) -> Self {
        self.config.dedupe = v;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(mut self) -> Result<RipfixConfig, RipfixError> {
        if self.config.inputs.is_empty() {
            return Err(RipfixError::InvalidConfig(
                "at least one input path or pattern is required".into(),
            ));
        }
        if self.config.reprocess {
            self.config.skip_existing = false;
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Compression target handed to ps2pdf as `-dPDFSETTINGS=/<style>`.
///
/// | Style | Approx. resolution |
/// |-------|--------------------|
/// | `none` | 300 DPI, no compression pass (default) |
/// | `ebook` | 150 DPI |
/// | `screen` | 72 DPI |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressStyle {
    #[default]
    None,
    Ebook,
    Screen,
}

impl CompressStyle {
    /// The token used in file names and on the ps2pdf command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressStyle::None => "none",
            CompressStyle::Ebook => "ebook",
            CompressStyle::Screen => "screen",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, CompressStyle::None)
    }
}

impl fmt::Display for CompressStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompressStyle {
    type Err = RipfixError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" => Ok(CompressStyle::None),
            "ebook" => Ok(CompressStyle::Ebook),
            "screen" => Ok(CompressStyle::Screen),
            other => Err(RipfixError::InvalidConfig(format!(
                "compress option invalid: '{other}' (expected none, ebook or screen)"
            ))),
        }
    }
}
