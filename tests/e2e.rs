//! End-to-end tests for ripfix.
//!
//! Every test drives a whole run through a fake [`Toolchain`] that writes
//! plausible files, counts invocations and measures how many documents are
//! in flight at once. No external binaries are needed.
//!
//! Run with:
//!   cargo test --test e2e -- --nocapture

use ripfix::pipeline::runner::{run_item, RunContext};
use ripfix::{
    run, CompressStyle, DedupIndex, ItemFailure, ProgressSink, RipfixConfig, RipfixError,
    Supervisor, ToolError, Toolchain, WorkItem,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Route library logs to the test harness; `RUST_LOG=debug` shows stages.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Fake collaborators. Rasterize sleeps so runs overlap.
#[derive(Default)]
struct FakeTools {
    rasterized: AtomicUsize,
    recognized: AtomicUsize,
    compressed: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    delay_ms: u64,
    /// Sources whose file name contains this fail at rasterize.
    fail_marker: Option<&'static str>,
    missing_tool: Option<&'static str>,
    /// Permission bits given to every recognized product.
    product_mode: Option<u32>,
}

impl FakeTools {
    fn slow(delay_ms: u64) -> Arc<Self> {
        Arc::new(Self {
            delay_ms,
            ..Self::default()
        })
    }

    fn calls(&self) -> usize {
        self.rasterized.load(Ordering::SeqCst)
            + self.recognized.load(Ordering::SeqCst)
            + self.compressed.load(Ordering::SeqCst)
    }
}

fn io_err(e: std::io::Error) -> ToolError {
    ToolError::Other {
        tool: "fake".into(),
        detail: e.to_string(),
    }
}

impl Toolchain for FakeTools {
    fn rasterize(&self, source: &Path, scratch: &Path) -> Result<(), ToolError> {
        self.rasterized.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(self.delay_ms));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let name = source.file_name().unwrap_or_default().to_string_lossy();
        if let Some(marker) = self.fail_marker {
            if name.contains(marker) {
                return Err(ToolError::Exit {
                    tool: "pdftoppm".into(),
                    status: "exit status: 99".into(),
                });
            }
        }
        let body = fs::read(source).map_err(io_err)?;
        fs::write(scratch.join("page-1.tif"), body).map_err(io_err)
    }

    fn recognize(&self, manifest: &Path, stem: &Path) -> Result<(), ToolError> {
        self.recognized.fetch_add(1, Ordering::SeqCst);
        let list = fs::read_to_string(manifest).map_err(io_err)?;
        let mut out = b"%PDF-ocr\n".to_vec();
        for page in list.lines() {
            out.extend(fs::read(page).map_err(io_err)?);
        }
        let product = stem.with_extension("pdf");
        fs::write(&product, out).map_err(io_err)?;
        #[cfg(unix)]
        if let Some(mode) = self.product_mode {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&product, fs::Permissions::from_mode(mode)).map_err(io_err)?;
        }
        Ok(())
    }

    fn compress(&self, style: CompressStyle, input: &Path, output: &Path) -> Result<(), ToolError> {
        self.compressed.fetch_add(1, Ordering::SeqCst);
        let mut body = fs::read(input).map_err(io_err)?;
        body.extend_from_slice(style.as_str().as_bytes());
        fs::write(output, body).map_err(io_err)
    }

    fn check(&self, _style: CompressStyle) -> Result<(), RipfixError> {
        match self.missing_tool {
            Some(tool) => Err(RipfixError::ToolMissing { tool: tool.into() }),
            None => Ok(()),
        }
    }
}

/// Records everything the run reports.
#[derive(Default)]
struct Recorder {
    messages: Mutex<Vec<String>>,
    failures: Mutex<Vec<ItemFailure>>,
}

impl ProgressSink for Recorder {
    fn on_message(&self, msg: &str) {
        self.messages.lock().unwrap().push(msg.to_string());
    }

    fn on_error(&self, failure: &ItemFailure) {
        self.failures.lock().unwrap().push(failure.clone());
    }
}

impl Recorder {
    fn completions(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.contains("Completed Work! See"))
            .cloned()
            .collect()
    }
}

struct Workspace {
    _root: TempDir,
    input: PathBuf,
    out: PathBuf,
    temp: PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let root = TempDir::new().unwrap();
        let input = root.path().join("in");
        let out = root.path().join("out");
        let temp = root.path().join("tmp");
        for d in [&input, &out, &temp] {
            fs::create_dir(d).unwrap();
        }
        Self {
            _root: root,
            input,
            out,
            temp,
        }
    }

    fn pdf(&self, name: &str, body: &str) -> PathBuf {
        let p = self.input.join(name);
        fs::write(&p, body).unwrap();
        p
    }

    fn glob(&self) -> String {
        self.input.join("*.pdf").to_string_lossy().into_owned()
    }

    fn config(&self) -> ripfix::RipfixConfigBuilder {
        RipfixConfig::builder()
            .input(self.glob())
            .out_dir(&self.out)
            .temp_dir(&self.temp)
    }

    fn product(&self, name: &str) -> PathBuf {
        self.out.join(name)
    }
}

// ── Concurrency ──────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_in_flight_never_exceeds_max_workers() {
    init_tracing();
    let ws = Workspace::new();
    for i in 0..12 {
        ws.pdf(&format!("doc{i:02}.pdf"), &format!("body {i}"));
    }
    let tools = FakeTools::slow(30);
    let config = ws.config().max_workers(3).build().unwrap();

    let summary = run(&config, tools.clone(), Arc::new(Recorder::default()))
        .await
        .unwrap();

    assert_eq!(summary.completed, 12);
    assert_eq!(summary.failed, 0);
    let peak = tools.peak.load(Ordering::SeqCst);
    assert!(peak <= 3, "peak in flight was {peak}");
    assert!(peak >= 2, "expected overlap, peak was {peak}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_single_worker_is_sequential() {
    let ws = Workspace::new();
    for i in 0..4 {
        ws.pdf(&format!("doc{i}.pdf"), "x");
    }
    let tools = FakeTools::slow(10);
    let config = ws.config().max_workers(1).dedupe(false).build().unwrap();

    let summary = run(&config, tools.clone(), Arc::new(Recorder::default()))
        .await
        .unwrap();
    assert_eq!(summary.completed, 4);
    assert_eq!(tools.peak.load(Ordering::SeqCst), 1);
}

// ── Two-document scenario ────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_two_documents_two_workers() {
    init_tracing();
    let ws = Workspace::new();
    ws.pdf("a.pdf", "A");
    ws.pdf("b.pdf", "B");
    let tools = FakeTools::slow(5);
    let recorder = Arc::new(Recorder::default());
    let config = ws.config().max_workers(2).build().unwrap();

    let summary = run(&config, tools.clone(), recorder.clone()).await.unwrap();

    let done = recorder.completions();
    assert_eq!(done.len(), 2, "got: {done:?}");
    assert!(done.iter().any(|m| m.contains("a_fixed.pdf")));
    assert!(done.iter().any(|m| m.contains("b_fixed.pdf")));
    assert!(recorder.failures.lock().unwrap().is_empty());
    assert_eq!(summary.estimated, Some(2));
    assert_eq!(summary.completed, 2);
    assert!(ws.product("a_fixed.pdf").exists());
    assert!(ws.product("b_fixed.pdf").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_permits_restored_after_work() {
    let ws = Workspace::new();
    let a = ws.pdf("a.pdf", "A");
    let b = ws.pdf("b.pdf", "B");
    let config = ws.config().max_workers(2).build().unwrap();
    fs::create_dir_all(config.scratch_root()).unwrap();

    let ctx = Arc::new(RunContext::new(FakeTools::slow(5), Arc::new(DedupIndex::new())));
    let (events, _rx) = ripfix::progress::channel();
    let mut sup = Supervisor::start(2, events, {
        let ctx = Arc::clone(&ctx);
        move |worker, item, events| run_item(Arc::clone(&ctx), worker, item, events)
    });
    assert_eq!(sup.capacity(), 2);

    sup.submit(WorkItem::new(a, &config, 1)).await.unwrap();
    sup.submit(WorkItem::new(b, &config, 1)).await.unwrap();
    sup.finish();

    tokio::time::timeout(Duration::from_secs(5), async {
        while sup.available_permits() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("permits never came back");
    assert_eq!(sup.available_permits(), 2);
    sup.wait().await.unwrap();

    assert!(ws.product("a_fixed.pdf").exists());
    assert!(ws.product("b_fixed.pdf").exists());
}

// ── Idempotence ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_second_run_is_a_noop() {
    let ws = Workspace::new();
    ws.pdf("a.pdf", "A");
    ws.pdf("b.pdf", "B");
    let config = ws.config().compress(CompressStyle::Ebook).clean(false).build().unwrap();

    let first = FakeTools::slow(0);
    run(&config, first.clone(), Arc::new(Recorder::default()))
        .await
        .unwrap();
    assert_eq!(first.compressed.load(Ordering::SeqCst), 2);
    let before = fs::read(ws.product("a_fixed_ebook.pdf")).unwrap();

    let second = FakeTools::slow(0);
    let summary = run(&config, second.clone(), Arc::new(Recorder::default()))
        .await
        .unwrap();

    assert_eq!(second.calls(), 0);
    assert_eq!(summary.completed, 2);
    assert_eq!(fs::read(ws.product("a_fixed_ebook.pdf")).unwrap(), before);
}

#[tokio::test]
async fn test_existing_product_skips_rasterize_and_recognize() {
    let ws = Workspace::new();
    ws.pdf("a.pdf", "A");
    fs::write(ws.product("a_fixed.pdf"), "already done").unwrap();
    let tools = FakeTools::slow(0);
    let recorder = Arc::new(Recorder::default());

    let summary = run(&ws.config().build().unwrap(), tools.clone(), recorder.clone())
        .await
        .unwrap();

    assert_eq!(tools.rasterized.load(Ordering::SeqCst), 0);
    assert_eq!(tools.recognized.load(Ordering::SeqCst), 0);
    assert_eq!(summary.completed, 1);
    assert_eq!(recorder.completions().len(), 1);
}

// ── Reprocess ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_reprocess_only_touches_existing_products() {
    let ws = Workspace::new();
    ws.pdf("old.pdf", "OLD");
    ws.pdf("new.pdf", "NEW");
    fs::write(ws.product("old_fixed.pdf"), "stale").unwrap();
    let tools = FakeTools::slow(0);
    let config = ws.config().reprocess(true).build().unwrap();
    assert!(!config.skip_existing);

    let summary = run(&config, tools.clone(), Arc::new(Recorder::default()))
        .await
        .unwrap();

    assert_eq!(summary.completed, 2);
    assert_eq!(tools.rasterized.load(Ordering::SeqCst), 1);
    assert!(!ws.product("new_fixed.pdf").exists());
    let redone = fs::read_to_string(ws.product("old_fixed.pdf")).unwrap();
    assert!(redone.contains("OLD"), "got: {redone}");
}

// ── Deduplication ────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_duplicates_processed_once_and_copied() {
    init_tracing();
    let ws = Workspace::new();
    ws.pdf("a.pdf", "alpha");
    ws.pdf("b.pdf", "twin");
    ws.pdf("c.pdf", "twin");
    let tools = FakeTools::slow(0);
    let recorder = Arc::new(Recorder::default());
    let config = ws.config().dedupe(true).max_workers(2).build().unwrap();

    let summary = run(&config, tools.clone(), recorder.clone()).await.unwrap();

    assert_eq!(summary.estimated, Some(2));
    assert_eq!(summary.completed, 2);
    assert_eq!(tools.rasterized.load(Ordering::SeqCst), 2);
    assert_eq!(
        fs::read(ws.product("b_fixed.pdf")).unwrap(),
        fs::read(ws.product("c_fixed.pdf")).unwrap()
    );
    let messages = recorder.messages.lock().unwrap();
    assert!(messages.iter().any(|m| m.contains("DUPE!")));
}

#[cfg(unix)]
#[tokio::test]
async fn test_duplicate_copy_keeps_permissions() {
    use std::os::unix::fs::PermissionsExt;

    let ws = Workspace::new();
    ws.pdf("b.pdf", "twin");
    ws.pdf("c.pdf", "twin");
    let config = ws.config().dedupe(true).build().unwrap();
    // Not a mode a freshly created file would get under any usual umask.
    let tools = Arc::new(FakeTools {
        product_mode: Some(0o640),
        ..FakeTools::default()
    });

    run(&config, tools.clone(), Arc::new(Recorder::default()))
        .await
        .unwrap();

    assert_eq!(tools.recognized.load(Ordering::SeqCst), 1);
    let mode = |p: PathBuf| fs::metadata(p).unwrap().permissions().mode() & 0o777;
    assert_eq!(mode(ws.product("b_fixed.pdf")), 0o640);
    assert_eq!(mode(ws.product("c_fixed.pdf")), 0o640);
}

#[tokio::test]
async fn test_duplicate_copy_failure_halts_run() {
    let ws = Workspace::new();
    ws.pdf("b.pdf", "twin");
    ws.pdf("c.pdf", "twin");
    // The twin's product name is taken by a directory, so the copy fails.
    fs::create_dir(ws.product("c_fixed.pdf")).unwrap();
    let config = ws.config().dedupe(true).skip_existing(false).build().unwrap();

    let err = run(&config, FakeTools::slow(0), Arc::new(Recorder::default()))
        .await
        .unwrap_err();
    assert!(matches!(err, RipfixError::DuplicateResolution { .. }), "got: {err:?}");
}

// ── Work list ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_overlapping_patterns_process_a_file_once() {
    let ws = Workspace::new();
    let a = ws.pdf("a.pdf", "A");
    let config = ws
        .config()
        .input(a.to_string_lossy())
        .max_workers(2)
        .build()
        .unwrap();
    let tools = FakeTools::slow(50);
    let recorder = Arc::new(Recorder::default());

    let summary = run(&config, tools.clone(), recorder.clone()).await.unwrap();

    assert_eq!(summary.estimated, Some(1));
    assert_eq!(summary.completed, 1);
    assert_eq!(tools.rasterized.load(Ordering::SeqCst), 1);
    assert_eq!(tools.peak.load(Ordering::SeqCst), 1);
    assert_eq!(recorder.completions().len(), 1);
}

#[tokio::test]
async fn test_prior_outputs_are_not_inputs() {
    let ws = Workspace::new();
    ws.pdf("a.pdf", "A");
    ws.pdf("a_fixed.pdf", "product from a previous run");
    ws.pdf("b_fixed_screen.pdf", "product from a previous run");
    let tools = FakeTools::slow(0);

    let summary = run(&ws.config().build().unwrap(), tools.clone(), Arc::new(Recorder::default()))
        .await
        .unwrap();

    assert_eq!(summary.estimated, Some(1));
    assert_eq!(tools.rasterized.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_empty_glob_is_an_empty_run() {
    let ws = Workspace::new();
    let tools = FakeTools::slow(0);

    let summary = run(&ws.config().build().unwrap(), tools.clone(), Arc::new(Recorder::default()))
        .await
        .unwrap();

    assert_eq!(summary.estimated, Some(0));
    assert_eq!(summary.completed, 0);
    assert_eq!(tools.calls(), 0);
}

#[tokio::test]
async fn test_missing_literal_input_is_fatal() {
    let ws = Workspace::new();
    let config = RipfixConfig::builder()
        .input(ws.input.join("ghost.pdf").to_string_lossy())
        .out_dir(&ws.out)
        .temp_dir(&ws.temp)
        .build()
        .unwrap();

    let err = run(&config, FakeTools::slow(0), Arc::new(Recorder::default()))
        .await
        .unwrap_err();
    assert!(matches!(err, RipfixError::InputNotFound { .. }), "got: {err:?}");
}

// ── Failures ─────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_item_failure_does_not_stop_the_run() {
    init_tracing();
    let ws = Workspace::new();
    ws.pdf("good1.pdf", "1");
    ws.pdf("bad.pdf", "x");
    ws.pdf("good2.pdf", "2");
    let tools = Arc::new(FakeTools {
        fail_marker: Some("bad"),
        ..FakeTools::default()
    });
    let recorder = Arc::new(Recorder::default());

    let summary = run(&ws.config().max_workers(2).build().unwrap(), tools, recorder.clone())
        .await
        .unwrap();

    assert_eq!(summary.completed, 2);
    assert_eq!(summary.failed, 1);
    let failures = recorder.failures.lock().unwrap();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].source.ends_with("bad.pdf"));
    assert_eq!(failures[0].error.stage(), ripfix::Stage::Rasterize);
    assert!(!ws.product("bad_fixed.pdf").exists());
}

#[tokio::test]
async fn test_missing_tool_is_fatal_before_work() {
    let ws = Workspace::new();
    ws.pdf("a.pdf", "A");
    let tools = Arc::new(FakeTools {
        missing_tool: Some("tesseract"),
        ..FakeTools::default()
    });

    let err = run(&ws.config().build().unwrap(), tools.clone(), Arc::new(Recorder::default()))
        .await
        .unwrap_err();
    assert!(matches!(err, RipfixError::ToolMissing { .. }), "got: {err:?}");
    assert_eq!(tools.calls(), 0);
}

#[tokio::test]
async fn test_output_must_be_a_directory() {
    let ws = Workspace::new();
    let file = ws.pdf("a.pdf", "A");
    let config = ws.config().out_dir(&file).build().unwrap();

    let err = run(&config, FakeTools::slow(0), Arc::new(Recorder::default()))
        .await
        .unwrap_err();
    assert!(matches!(err, RipfixError::OutputNotDirectory { .. }), "got: {err:?}");
}

// ── Scratch cleanup ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_clean_removes_scratch_on_success_and_failure() {
    let ws = Workspace::new();
    ws.pdf("good.pdf", "1");
    ws.pdf("bad.pdf", "x");
    let tools = Arc::new(FakeTools {
        fail_marker: Some("bad"),
        ..FakeTools::default()
    });
    let config = ws.config().build().unwrap();

    run(&config, tools, Arc::new(Recorder::default())).await.unwrap();

    assert!(!config.scratch_root().exists());
}

#[tokio::test]
async fn test_no_clean_keeps_scratch_and_page_lists() {
    let ws = Workspace::new();
    ws.pdf("good.pdf", "1");
    ws.pdf("bad.pdf", "x");
    let tools = Arc::new(FakeTools {
        fail_marker: Some("bad"),
        ..FakeTools::default()
    });
    let config = ws.config().clean(false).build().unwrap();

    run(&config, tools, Arc::new(Recorder::default())).await.unwrap();

    let scratch: Vec<PathBuf> = fs::read_dir(config.scratch_root())
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(scratch.len(), 2, "one scratch folder per item: {scratch:?}");
    let lists = scratch
        .iter()
        .flat_map(|d| fs::read_dir(d).unwrap())
        .filter(|e| {
            e.as_ref()
                .map(|e| e.path().extension().is_some_and(|x| x == "lst"))
                .unwrap_or(false)
        })
        .count();
    assert_eq!(lists, 1, "only the good item got as far as its page list");
}

#[tokio::test]
async fn test_compress_clean_drops_intermediate() {
    let ws = Workspace::new();
    ws.pdf("a.pdf", "A");
    let tools = FakeTools::slow(0);
    let config = ws.config().compress(CompressStyle::Screen).build().unwrap();

    run(&config, tools.clone(), Arc::new(Recorder::default()))
        .await
        .unwrap();

    assert!(ws.product("a_fixed_screen.pdf").exists());
    assert!(!ws.product("a_fixed.pdf").exists());
    assert_eq!(tools.compressed.load(Ordering::SeqCst), 1);
}
