//! CLI binary for ripfix.
//!
//! A thin shim over the library crate that maps CLI flags to `RipfixConfig`,
//! holds the single-instance lock and renders progress.

use anyhow::{Context, Result};
use clap::{ArgAction, CommandFactory, Parser};
use indicatif::{ProgressBar, ProgressStyle};
use ripfix::lock::{default_lock_path, InstanceLock};
use ripfix::{
    run, CompressStyle, ExternalTools, ItemFailure, ProgressSink, RipfixConfig, TracingSink,
};
use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── Progress sink ────────────────────────────────────────────────────────────

/// Terminal sink: status lines go to the tracing subscriber, counts drive an
/// optional indicatif bar.
struct CliSink {
    bar: Option<ProgressBar>,
}

impl CliSink {
    fn new(show_bar: bool, initial_len: u64) -> Arc<Self> {
        let bar = show_bar.then(|| {
            let bar = ProgressBar::new(initial_len);
            bar.set_style(
                ProgressStyle::with_template(
                    "{spinner:.cyan} {prefix:.bold}  \
                     [{bar:42.green/238}] {pos:>4}/{len} PDFs  \
                     ⏱ {elapsed_precise}  ETA {eta_precise}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▉▊▋▌▍▎▏  ")
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]),
            );
            bar.set_prefix("Ripping");
            bar.enable_steady_tick(Duration::from_millis(80));
            bar
        });
        Arc::new(Self { bar })
    }

    fn finish(&self) {
        if let Some(ref bar) = self.bar {
            bar.finish_and_clear();
        }
    }
}

impl ProgressSink for CliSink {
    fn on_message(&self, msg: &str) {
        TracingSink.on_message(msg);
    }

    fn on_update(&self, n: u64) {
        if let Some(ref bar) = self.bar {
            bar.inc(n);
        }
    }

    fn on_estimate(&self, total: u64) {
        if let Some(ref bar) = self.bar {
            bar.set_length(total);
            bar.reset_eta();
        }
    }

    fn on_error(&self, failure: &ItemFailure) {
        match self.bar {
            Some(ref bar) => bar.suspend(|| TracingSink.on_error(failure)),
            None => TracingSink.on_error(failure),
        }
    }
}

// ── CLI ──────────────────────────────────────────────────────────────────────

const AFTER_HELP: &str = r#"EXAMPLES:
  # OCR every scan in a folder into ./ocr
  ripfix -p 'scans/*.pdf' -o ocr/

  # Eight at a time, compressed for e-readers, with a progress bar
  ripfix -p 'scans/*.pdf' -o ocr/ -m 8 -c ebook --bar

  # Keep scratch images around for inspection
  ripfix -p scan.pdf --clean=false --debug

  # Only redo documents that already have a product
  ripfix -p 'scans/*.pdf' -o ocr/ --reprocess

  # Process identical scans once, copy the result to the others
  ripfix -p 'a/*.pdf,b/*.pdf' --dupes

PRODUCTS:
  <out>/<name>_fixed.pdf           OCR'd PDF
  <out>/<name>_fixed_<style>.pdf   compressed OCR'd PDF (--compress)

  Inputs whose name contains `_fixed` are never processed, so it is safe to
  glob over the output folder.

REQUIRED TOOLS:
  pdftoppm   (poppler-utils)   always
  tesseract                    always
  ps2pdf     (ghostscript)     with --compress ebook|screen
"#;

#[derive(Parser, Debug)]
#[command(
    name = "ripfix",
    version,
    about = "OCR scanned PDFs in parallel: pdftoppm → tesseract → ps2pdf",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// PDF paths or glob patterns. Repeatable and comma separated.
    #[arg(short, long = "pdfs", value_delimiter = ',', env = "RIPFIX_PDFS")]
    pdfs: Vec<String>,

    /// Folder the products are written to.
    #[arg(short, long, env = "RIPFIX_OUT", default_value = "./")]
    out: PathBuf,

    /// Folder for scratch space. Defaults to the system temp folder.
    #[arg(short, long, env = "RIPFIX_TEMP")]
    temp: Option<PathBuf>,

    /// Maximum number of PDFs processed at once. Defaults to the CPU count.
    #[arg(short, long, env = "RIPFIX_MAX")]
    max: Option<usize>,

    /// Remove scratch folders and intermediates when done.
    #[arg(long, default_value_t = true, num_args = 0..=1, default_missing_value = "true",
          action = ArgAction::Set)]
    clean: bool,

    /// Compression target: none (300 DPI), ebook (150 DPI) or screen (72 DPI).
    #[arg(short, long, value_enum, default_value = "none", env = "RIPFIX_COMPRESS")]
    compress: CompressArg,

    /// Skip any stage whose product already exists.
    #[arg(long, default_value_t = true, num_args = 0..=1, default_missing_value = "true",
          action = ArgAction::Set)]
    skip: bool,

    /// Only redo PDFs that already have a product. Disables --skip.
    #[arg(long)]
    reprocess: bool,

    /// Lock file guarding against concurrent runs. Default: <temp>/ripfix.lock
    #[arg(long)]
    flock: Option<PathBuf>,

    #[arg(long, hide = true)]
    ignore_flock: bool,

    /// Show a progress bar and only print errors to the screen.
    #[arg(short, long)]
    bar: bool,

    /// Send normal logging to this file (appended) instead of the screen.
    #[arg(short, long, env = "RIPFIX_LOG")]
    log: Option<PathBuf>,

    /// Debug logging. Disables --bar.
    #[arg(long)]
    debug: bool,

    /// Hash every input and process identical files only once.
    #[arg(long)]
    dupes: bool,

    /// Print the run summary as JSON on stdout.
    #[arg(long)]
    json: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum CompressArg {
    None,
    Ebook,
    Screen,
}

impl From<CompressArg> for CompressStyle {
    fn from(v: CompressArg) -> Self {
        match v {
            CompressArg::None => CompressStyle::None,
            CompressArg::Ebook => CompressStyle::Ebook,
            CompressArg::Screen => CompressStyle::Screen,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.pdfs.is_empty() {
        Cli::command().print_help()?;
        return Ok(());
    }

    // ── Logging setup ────────────────────────────────────────────────────
    let show_bar = cli.bar && !cli.debug;
    init_logging(&cli, show_bar)?;

    // ── Configuration ────────────────────────────────────────────────────
    let config = build_config(&cli)?;

    // ── Single-instance lock ─────────────────────────────────────────────
    let _lock = if cli.ignore_flock {
        None
    } else {
        let path = cli
            .flock
            .clone()
            .unwrap_or_else(|| default_lock_path(&config.temp_dir));
        Some(InstanceLock::acquire(&path).context("Could not take the instance lock")?)
    };

    // ── Run ──────────────────────────────────────────────────────────────
    let sink = CliSink::new(show_bar, config.inputs.len() as u64);
    let result = run(&config, Arc::new(ExternalTools::default()), sink.clone()).await;
    sink.finish();
    let summary = result.context("Run failed")?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("Failed to serialise summary")?
        );
    } else if summary.failed == 0 {
        eprintln!(
            "{} {} PDF(s) done",
            green("✔"),
            bold(&summary.completed.to_string())
        );
    } else {
        eprintln!(
            "{} {} PDF(s) done, {} failed",
            red("✘"),
            bold(&summary.completed.to_string()),
            red(&summary.failed.to_string())
        );
    }

    if summary.failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn init_logging(cli: &Cli, show_bar: bool) -> Result<()> {
    // With the bar on, the screen only gets errors unless logs go to a file.
    let level = if cli.debug {
        "debug"
    } else if show_bar && cli.log.is_none() {
        "error"
    } else {
        "info"
    };

    let writer = match cli.log {
        Some(ref path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Could not open logfile {} for append", path.display()))?;
            BoxMakeWriter::new(Mutex::new(file))
        }
        None => BoxMakeWriter::new(io::stderr),
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_ansi(cli.log.is_none())
        .with_writer(writer)
        .init();
    Ok(())
}

fn build_config(cli: &Cli) -> Result<RipfixConfig> {
    let mut builder = RipfixConfig::builder()
        .inputs(cli.pdfs.iter().cloned())
        .out_dir(&cli.out)
        .compress(cli.compress.into())
        .skip_existing(cli.skip)
        .reprocess(cli.reprocess)
        .clean(cli.clean)
        .dedupe(cli.dupes);

    if let Some(ref temp) = cli.temp {
        builder = builder.temp_dir(temp);
    }
    if let Some(max) = cli.max {
        builder = builder.max_workers(max);
    }

    builder.build().context("Invalid configuration")
}
