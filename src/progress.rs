//! Progress events emitted by workers and the sink that consumes them.
//!
//! Workers never render anything. They push [`ProgressEvent`]s into an
//! unbounded channel and a single drain task ([`spawn_sink`]) forwards each
//! event to a [`ProgressSink`] and tallies a [`RunSummary`]. The channel is
//! unbounded so a slow terminal can never stall a worker.
//!
//! Events from different workers interleave freely; the events of one worker
//! arrive in the order it sent them.
//!
//! # Example
//!
//! ```rust
//! use ripfix::progress::ProgressSink;
//! use std::sync::atomic::{AtomicU64, Ordering};
//!
//! struct Counter(AtomicU64);
//!
//! impl ProgressSink for Counter {
//!     fn on_update(&self, n: u64) {
//!         self.0.fetch_add(n, Ordering::SeqCst);
//!     }
//! }
//! ```

use crate::error::StageError;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// One event on the progress channel.
#[derive(Debug, Clone, Serialize)]
pub enum ProgressEvent {
    /// Human-readable status line.
    Message(String),
    /// `n` work units finished (successfully or as a no-op skip).
    Update(u64),
    /// Revised expected total of work units.
    Estimate(u64),
    /// A work item failed and was abandoned.
    Error(ItemFailure),
}

/// Context attached to a per-item failure.
#[derive(Debug, Clone, Serialize)]
pub struct ItemFailure {
    pub worker: u64,
    pub item: String,
    pub source: PathBuf,
    pub error: StageError,
}

impl std::fmt::Display for ItemFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[WORKER {}] item {} ({}) failed at {}: {}",
            self.worker,
            self.item,
            self.source.display(),
            self.error.stage(),
            self.error
        )
    }
}

/// Sending half of the progress channel.
///
/// Cheap to clone; every worker holds one. Sends never block and are dropped
/// silently once the sink has gone away.
#[derive(Debug, Clone)]
pub struct Emitter {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl Emitter {
    pub fn message(&self, msg: impl Into<String>) {
        self.send(ProgressEvent::Message(msg.into()));
    }

    pub fn update(&self, n: u64) {
        self.send(ProgressEvent::Update(n));
    }

    pub fn estimate(&self, total: u64) {
        self.send(ProgressEvent::Estimate(total));
    }

    pub fn error(&self, failure: ItemFailure) {
        self.send(ProgressEvent::Error(failure));
    }

    pub fn send(&self, event: ProgressEvent) {
        let _ = self.tx.send(event);
    }
}

/// Create a progress channel.
pub fn channel() -> (Emitter, mpsc::UnboundedReceiver<ProgressEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Emitter { tx }, rx)
}

/// Receives progress events for rendering.
///
/// Called from a single drain task, one event at a time. All methods default
/// to no-ops so implementations only override what they render.
pub trait ProgressSink: Send + Sync {
    fn on_message(&self, msg: &str) {
        let _ = msg;
    }

    fn on_update(&self, n: u64) {
        let _ = n;
    }

    fn on_estimate(&self, total: u64) {
        let _ = total;
    }

    fn on_error(&self, failure: &ItemFailure) {
        let _ = failure;
    }
}

/// Discards every event.
pub struct NoopSink;

impl ProgressSink for NoopSink {}

/// Renders events as `tracing` records: messages at INFO, failures at ERROR.
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn on_message(&self, msg: &str) {
        info!("{msg}");
    }

    fn on_error(&self, failure: &ItemFailure) {
        error!(
            worker = failure.worker,
            item = %failure.item,
            stage = %failure.error.stage(),
            "{failure}"
        );
    }
}

/// Convenience alias for a shared sink.
pub type SharedSink = Arc<dyn ProgressSink>;

/// Totals accumulated while draining the progress channel.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    /// Last total-count estimate received, if any.
    pub estimated: Option<u64>,
    /// Work units reported complete.
    pub completed: u64,
    /// Items abandoned after an error.
    pub failed: u64,
    pub errors: Vec<ItemFailure>,
    /// Wall-clock time of the whole run, filled in by [`crate::run()`].
    pub duration_ms: u64,
}

impl RunSummary {
    fn record(&mut self, event: &ProgressEvent) {
        match event {
            ProgressEvent::Message(_) => {}
            ProgressEvent::Update(n) => self.completed += n,
            ProgressEvent::Estimate(total) => self.estimated = Some(*total),
            ProgressEvent::Error(failure) => {
                self.failed += 1;
                self.errors.push(failure.clone());
            }
        }
    }
}

/// Drain `rx` into `sink` until every [`Emitter`] is dropped.
///
/// The returned task resolves to the run's [`RunSummary`].
pub fn spawn_sink(
    mut rx: mpsc::UnboundedReceiver<ProgressEvent>,
    sink: SharedSink,
) -> JoinHandle<RunSummary> {
    tokio::spawn(async move {
        let mut summary = RunSummary::default();
        while let Some(event) = rx.recv().await {
            match &event {
                ProgressEvent::Message(msg) => sink.on_message(msg),
                ProgressEvent::Update(n) => sink.on_update(*n),
                ProgressEvent::Estimate(total) => sink.on_estimate(*total),
                ProgressEvent::Error(failure) => sink.on_error(failure),
            }
            summary.record(&event);
        }
        summary
    })
}
