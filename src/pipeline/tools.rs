//! External collaborators: pdftoppm, tesseract and ps2pdf.
//!
//! The pipeline only talks to the [`Toolchain`] trait. [`ExternalTools`] is
//! the production implementation and shells out to the real binaries; tests
//! substitute fakes that write files and count calls.
//!
//! Every method is blocking. The runner moves each call onto the blocking
//! thread pool with `tokio::task::spawn_blocking`, so a slow OCR pass never
//! stalls a Tokio worker thread.

use crate::config::CompressStyle;
use crate::error::{RipfixError, ToolError};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;

pub const RASTERIZER: &str = "pdftoppm";
pub const RECOGNIZER: &str = "tesseract";
pub const COMPRESSOR: &str = "ps2pdf";

/// Extension of the page images the rasterizer writes.
pub const PAGE_IMAGE_EXT: &str = "tif";

/// The three opaque, fallible tools a document passes through.
pub trait Toolchain: Send + Sync {
    /// Write one page image per page of `source` into `scratch`.
    fn rasterize(&self, source: &Path, scratch: &Path) -> Result<(), ToolError>;

    /// OCR every image listed in `manifest` into `<stem>.pdf`.
    fn recognize(&self, manifest: &Path, stem: &Path) -> Result<(), ToolError>;

    /// Re-encode `input` into a smaller `output` using `style`.
    fn compress(&self, style: CompressStyle, input: &Path, output: &Path) -> Result<(), ToolError>;

    /// Verify that every tool needed for `style` can be run.
    fn check(&self, style: CompressStyle) -> Result<(), RipfixError> {
        let _ = style;
        Ok(())
    }
}

/// Runs the real binaries found on `PATH`.
#[derive(Debug, Clone)]
pub struct ExternalTools {
    /// Rasterization resolution passed to pdftoppm. Default: 300.
    pub dpi: u32,
}

impl Default for ExternalTools {
    fn default() -> Self {
        Self { dpi: 300 }
    }
}

impl Toolchain for ExternalTools {
    fn rasterize(&self, source: &Path, scratch: &Path) -> Result<(), ToolError> {
        let dpi = self.dpi.to_string();
        let prefix = scratch.join("page");
        run(
            RASTERIZER,
            [
                OsStr::new("-tiff"),
                OsStr::new("-r"),
                OsStr::new(&dpi),
                source.as_os_str(),
                prefix.as_os_str(),
            ],
        )
    }

    fn recognize(&self, manifest: &Path, stem: &Path) -> Result<(), ToolError> {
        run(
            RECOGNIZER,
            [manifest.as_os_str(), stem.as_os_str(), OsStr::new("pdf")],
        )
    }

    fn compress(&self, style: CompressStyle, input: &Path, output: &Path) -> Result<(), ToolError> {
        let settings = format!("-dPDFSETTINGS=/{}", style.as_str());
        run(
            COMPRESSOR,
            [OsStr::new(&settings), input.as_os_str(), output.as_os_str()],
        )
    }

    fn check(&self, style: CompressStyle) -> Result<(), RipfixError> {
        let mut needed = vec![RASTERIZER, RECOGNIZER];
        if !style.is_none() {
            needed.push(COMPRESSOR);
        }
        for tool in needed {
            if find_on_path(tool).is_none() {
                return Err(RipfixError::ToolMissing {
                    tool: tool.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Run `tool` to completion, discarding its output.
fn run<I, S>(tool: &str, args: I) -> Result<(), ToolError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new(tool);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    debug!("exec {:?}", cmd);

    let status = cmd.status().map_err(|e| ToolError::Launch {
        tool: tool.to_string(),
        source: e,
    })?;

    if status.success() {
        Ok(())
    } else {
        Err(ToolError::Exit {
            tool: tool.to_string(),
            status: status.to_string(),
        })
    }
}

/// Locate an executable named `name` in the directories of `PATH`.
pub fn find_on_path(name: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file() || path.with_extension("exe").is_file()
}
