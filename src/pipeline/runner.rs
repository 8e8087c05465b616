//! Per-item pipeline: rasterize → recognize → compress → copy to duplicates.
//!
//! Each stage first checks whether its artifact already exists (when
//! `skip_existing` is set), so a re-run over the same inputs does no work and
//! an interrupted run resumes from the last finished stage.
//!
//! Failures inside a stage are reported as
//! [`ProgressEvent::Error`](crate::progress::ProgressEvent::Error) and abandon
//! the item; the run continues. Only a failed duplicate copy is returned as an
//! error, which halts the whole run.

use crate::dedup::{ContentHash, DedupIndex};
use crate::error::{RipfixError, StageError, ToolError};
use crate::item::{Artifacts, WorkItem};
use crate::pipeline::tools::{Toolchain, PAGE_IMAGE_EXT};
use crate::progress::{Emitter, ItemFailure};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Everything the runner shares across items in one run.
pub struct RunContext {
    pub toolchain: Arc<dyn Toolchain>,
    pub dedup: Arc<DedupIndex>,
}

impl RunContext {
    pub fn new(toolchain: Arc<dyn Toolchain>, dedup: Arc<DedupIndex>) -> Self {
        Self { toolchain, dedup }
    }
}

/// Process one work item on behalf of worker `worker`.
///
/// Returns `Ok(())` for completed, skipped and failed items alike; failures
/// have already been reported on `events`. An `Err` is fatal to the run.
pub async fn run_item(
    ctx: Arc<RunContext>,
    worker: u64,
    item: WorkItem,
    events: Emitter,
) -> Result<(), RipfixError> {
    let artifacts = item.artifacts();
    events.message(format!(
        "[WORKER {worker}] Received '{}' (item {})",
        item.source.display(),
        item.id
    ));

    // ── Stage 1: reprocess pre-check ─────────────────────────────────────
    if item.reprocess && !artifacts.fixed.exists() && !artifacts.compressed.exists() {
        events.message(format!(
            "[WORKER {worker}] Reprocessing '{}' unneeded, as no fixed variant exists. Completed Work!",
            item.source.display()
        ));
        events.update(1);
        return Ok(());
    }

    let stages = Stages {
        toolchain: &ctx.toolchain,
        worker,
        item: &item,
        artifacts: &artifacts,
        events: &events,
    };
    if let Err(error) = stages.run().await {
        events.error(ItemFailure {
            worker,
            item: item.id.clone(),
            source: item.source.clone(),
            error,
        });
        return Ok(());
    }

    // ── Stage 6: duplicate-copy ──────────────────────────────────────────
    if item.dedupe {
        copy_to_duplicates(&ctx.dedup, worker, &item, &artifacts.product, &events).await?;
    }

    events.message(format!(
        "[WORKER {worker}] Completed Work! See '{}'",
        artifacts.product.display()
    ));
    events.update(1);
    Ok(())
}

/// Stages 2 to 5 for one item.
struct Stages<'a> {
    toolchain: &'a Arc<dyn Toolchain>,
    worker: u64,
    item: &'a WorkItem,
    artifacts: &'a Artifacts,
    events: &'a Emitter,
}

impl Stages<'_> {
    async fn run(&self) -> Result<(), StageError> {
        let item = self.item;
        let art = self.artifacts;
        let compress = !item.compress.is_none();

        // ── Stage 2: compressed early exit ───────────────────────────────
        if compress && item.skip_existing && art.compressed.exists() {
            self.say(format!(
                "Compress file '{}' already exists, skipping all stages",
                art.compressed.display()
            ));
            return Ok(());
        }

        // ── Stage 3: extract + recognize ─────────────────────────────────
        if item.skip_existing && art.fixed.exists() {
            self.say(format!(
                "{} found, skipping rasterize and recognize",
                art.fixed.display()
            ));
        } else {
            // Stage 5 lives in the guard: the scratch folder goes away on
            // every exit path from here on.
            let _scratch = ScratchGuard::new(&item.scratch, item.clean);
            self.extract_and_recognize().await?;
        }

        // ── Stage 4: compress ────────────────────────────────────────────
        if compress {
            if item.skip_existing && art.compressed.exists() {
                self.say(format!("{} found, skipping compress", art.compressed.display()));
            } else {
                self.say(format!(
                    "compress({}, {}, {})",
                    item.compress,
                    art.fixed.display(),
                    art.compressed.display()
                ));
                let (style, input, output) = (item.compress, art.fixed.clone(), art.compressed.clone());
                blocking(self.toolchain, move |t| t.compress(style, &input, &output))
                    .await
                    .map_err(|e| StageError::Compress {
                        style: item.compress.to_string(),
                        input: art.fixed.clone(),
                        output: art.compressed.clone(),
                        detail: e.to_string(),
                    })?;
            }
            if item.clean {
                remove_intermediate(&art.fixed);
            }
        }

        Ok(())
    }

    async fn extract_and_recognize(&self) -> Result<(), StageError> {
        let item = self.item;
        let art = self.artifacts;

        tokio::fs::create_dir_all(&item.scratch)
            .await
            .map_err(|e| StageError::ScratchDir {
                path: item.scratch.clone(),
                detail: e.to_string(),
            })?;

        self.say(format!(
            "rasterize({}, {})",
            item.source.display(),
            item.scratch.display()
        ));
        let (source, scratch) = (item.source.clone(), item.scratch.clone());
        blocking(self.toolchain, move |t| t.rasterize(&source, &scratch))
            .await
            .map_err(|e| StageError::Rasterize {
                source_path: item.source.clone(),
                scratch: item.scratch.clone(),
                detail: e.to_string(),
            })?;

        self.say("writing page list".to_string());
        let manifest = item.manifest_path();
        let scratch = item.scratch.clone();
        let list_path = manifest.clone();
        tokio::task::spawn_blocking(move || write_manifest(&scratch, &list_path))
            .await
            .map_err(|e| StageError::Manifest {
                path: manifest.clone(),
                detail: format!("task panicked: {e}"),
            })?
            .map_err(|e| StageError::Manifest {
                path: manifest.clone(),
                detail: e.to_string(),
            })?;

        self.say(format!(
            "recognize({}, {})",
            manifest.display(),
            art.stem.display()
        ));
        let (list_path, stem) = (manifest.clone(), art.stem.clone());
        blocking(self.toolchain, move |t| t.recognize(&list_path, &stem))
            .await
            .map_err(|e| StageError::Recognize {
                manifest,
                stem: art.stem.clone(),
                detail: e.to_string(),
            })?;

        Ok(())
    }

    fn say(&self, msg: String) {
        self.events.message(format!("[WORKER {}] {msg}", self.worker));
    }
}

/// Run a toolchain call on the blocking pool.
async fn blocking<F>(toolchain: &Arc<dyn Toolchain>, call: F) -> Result<(), ToolError>
where
    F: FnOnce(&dyn Toolchain) -> Result<(), ToolError> + Send + 'static,
{
    let toolchain = Arc::clone(toolchain);
    tokio::task::spawn_blocking(move || call(toolchain.as_ref()))
        .await
        .map_err(|e| ToolError::Other {
            tool: "toolchain".into(),
            detail: format!("task panicked: {e}"),
        })?
}

/// Write the sorted list of page images in `scratch` to `manifest`, one path
/// per line.
fn write_manifest(scratch: &Path, manifest: &Path) -> std::io::Result<()> {
    let mut pages = Vec::new();
    for entry in std::fs::read_dir(scratch)? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == PAGE_IMAGE_EXT) {
            pages.push(path);
        }
    }
    pages.sort();

    let mut out = std::io::BufWriter::new(std::fs::File::create(manifest)?);
    for page in &pages {
        writeln!(out, "{}", page.display())?;
    }
    out.flush()?;
    debug!("page list {} has {} entries", manifest.display(), pages.len());
    Ok(())
}

fn remove_intermediate(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("removed intermediate {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("could not remove intermediate {}: {}", path.display(), e),
    }
}

/// Removes the item's scratch folder when dropped, if cleaning is enabled.
struct ScratchGuard {
    path: PathBuf,
    clean: bool,
}

impl ScratchGuard {
    fn new(path: &Path, clean: bool) -> Self {
        Self {
            path: path.to_path_buf(),
            clean,
        }
    }
}

impl Drop for ScratchGuard {
    fn drop(&mut self) {
        if !self.clean {
            return;
        }
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => debug!("removed scratch {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("could not remove scratch {}: {}", self.path.display(), e),
        }
    }
}

/// Copy this item's product to the output name of every content-duplicate.
async fn copy_to_duplicates(
    index: &Arc<DedupIndex>,
    worker: u64,
    item: &WorkItem,
    product: &Path,
    events: &Emitter,
) -> Result<(), RipfixError> {
    let source = item.source.clone();
    let hash = tokio::task::spawn_blocking(move || ContentHash::of_file(&source))
        .await
        .map_err(|e| RipfixError::Internal(format!("hash task panicked: {e}")))?
        .map_err(|e| RipfixError::DuplicateResolution {
            source_path: item.source.clone(),
            detail: format!("hashing failed: {e}"),
        })?;

    for dupe in index.duplicates_of(&hash, &item.source) {
        let target = Artifacts::for_source(&dupe, &item.out_dir, item.compress).product;
        // Same file name in another folder: the product already serves both.
        if target == product {
            events.message(format!(
                "[WORKER {worker}] Duplicate copy for '{}' skipped, '{}' is already its product",
                dupe.display(),
                target.display()
            ));
            continue;
        }
        if item.skip_existing && target.exists() {
            events.message(format!(
                "[WORKER {worker}] Duplicate copy of '{}' to '{}' for '{}' skipped, as it exists",
                product.display(),
                target.display(),
                dupe.display()
            ));
            continue;
        }

        events.message(format!(
            "[WORKER {worker}] Duplicate copy of '{}' to '{}' for '{}'",
            product.display(),
            target.display(),
            dupe.display()
        ));
        let (from, to) = (product.to_path_buf(), target.clone());
        tokio::task::spawn_blocking(move || copy_preserving_mode(&from, &to))
            .await
            .map_err(|e| RipfixError::Internal(format!("copy task panicked: {e}")))?
            .map_err(|e| RipfixError::DuplicateResolution {
                source_path: dupe.clone(),
                detail: format!(
                    "copy {} -> {}: {e}",
                    product.display(),
                    target.display()
                ),
            })?;
    }
    Ok(())
}

/// Byte-copy `from` to `to` and give `to` the permission bits of `from`.
fn copy_preserving_mode(from: &Path, to: &Path) -> std::io::Result<u64> {
    let mut reader = std::fs::File::open(from)?;
    let permissions = reader.metadata()?.permissions();
    let mut writer = std::fs::File::create(to)?;
    let copied = std::io::copy(&mut reader, &mut writer)?;
    writer.sync_all()?;
    std::fs::set_permissions(to, permissions)?;
    Ok(copied)
}
