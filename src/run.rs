//! Run driver: the one entry point that wires every component together.
//!
//! ```text
//! validate env ─► build list ─► supervisor ─► run_item × N ─► join ─► summary
//!                     │                            │
//!                     └──────── progress channel ◄─┘──► sink
//! ```

use crate::config::RipfixConfig;
use crate::dedup::DedupIndex;
use crate::error::RipfixError;
use crate::item::WorkItem;
use crate::pipeline::list::ListBuilder;
use crate::pipeline::runner::{run_item, RunContext};
use crate::pipeline::tools::Toolchain;
use crate::progress::{self, RunSummary, SharedSink};
use crate::supervisor::Supervisor;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Process every input named by `config`.
///
/// Returns `Ok(RunSummary)` when the run finished, even if some items failed
/// (check `summary.failed`). Returns `Err` for startup failures and for
/// failures that halt the run, such as a failed duplicate copy.
///
/// # Example
///
/// ```rust,no_run
/// use ripfix::{run, ExternalTools, RipfixConfig, TracingSink};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = RipfixConfig::builder()
///         .input("scans/*.pdf")
///         .out_dir("ocr/")
///         .build()?;
///     let summary = run(&config, Arc::new(ExternalTools::default()), Arc::new(TracingSink)).await?;
///     eprintln!("{} done, {} failed", summary.completed, summary.failed);
///     Ok(())
/// }
/// ```
pub async fn run(
    config: &RipfixConfig,
    toolchain: Arc<dyn Toolchain>,
    sink: SharedSink,
) -> Result<RunSummary, RipfixError> {
    let started = Instant::now();
    info!(
        "Starting run: {} pattern(s), {} worker(s), compress={}",
        config.inputs.len(),
        config.max_workers,
        config.compress
    );

    // ── Step 1: Validate environment ─────────────────────────────────────
    check_out_dir(&config.out_dir).await?;
    toolchain.check(config.compress)?;

    let scratch_root = config.scratch_root();
    tokio::fs::create_dir_all(&scratch_root)
        .await
        .map_err(|e| RipfixError::ScratchRoot {
            path: scratch_root.clone(),
            source: e,
        })?;

    // ── Step 2: Progress channel ─────────────────────────────────────────
    let (events, rx) = progress::channel();
    let drain = progress::spawn_sink(rx, sink);

    // ── Step 3: Build the work list ──────────────────────────────────────
    let dedup = Arc::new(DedupIndex::new());
    let mut builder = ListBuilder::new().events(events.clone());
    if config.dedupe {
        builder = builder.dedup(Arc::clone(&dedup));
    }
    let patterns = config.inputs.clone();
    let listed = tokio::task::spawn_blocking(move || builder.build(&patterns))
        .await
        .map_err(|e| RipfixError::Internal(format!("list task panicked: {e}")))
        .and_then(|r| r);

    let list = match listed {
        Ok(list) => list,
        Err(e) => {
            drop(events);
            let _ = drain.await;
            remove_scratch_root(config, &scratch_root).await;
            return Err(e);
        }
    };
    info!("{} file(s) to process", list.len());
    if config.dedupe {
        debug!("{} duplicate(s) set aside", dedup.duplicate_count());
    }

    // ── Step 4: Hand items to the workers ────────────────────────────────
    let ctx = Arc::new(RunContext::new(toolchain, dedup));
    let mut supervisor = Supervisor::start(config.max_workers, events.clone(), {
        let ctx = Arc::clone(&ctx);
        move |worker, item, events| run_item(Arc::clone(&ctx), worker, item, events)
    });

    let pid = std::process::id();
    for path in list {
        let item = WorkItem::new(path, config, pid);
        if supervisor.submit(item).await.is_err() {
            warn!("run halted, not submitting further items");
            break;
        }
    }
    supervisor.finish();

    // ── Step 5: Join ─────────────────────────────────────────────────────
    let outcome = supervisor.wait().await;
    drop(events);
    let mut summary = drain
        .await
        .map_err(|e| RipfixError::Internal(format!("progress sink panicked: {e}")))?;
    remove_scratch_root(config, &scratch_root).await;
    outcome?;

    summary.duration_ms = started.elapsed().as_millis() as u64;
    info!(
        "Run complete: {} completed, {} failed in {}ms",
        summary.completed, summary.failed, summary.duration_ms
    );
    Ok(summary)
}

async fn check_out_dir(dir: &Path) -> Result<(), RipfixError> {
    match tokio::fs::metadata(dir).await {
        Ok(meta) if meta.is_dir() => Ok(()),
        _ => Err(RipfixError::OutputNotDirectory {
            path: dir.to_path_buf(),
        }),
    }
}

async fn remove_scratch_root(config: &RipfixConfig, root: &Path) {
    if !config.clean {
        return;
    }
    match tokio::fs::remove_dir_all(root).await {
        Ok(()) => debug!("removed scratch root {}", root.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("could not remove scratch root {}: {}", root.display(), e),
    }
}
