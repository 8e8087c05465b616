//! Bounded worker pool: at most N work items in flight at any moment.
//!
//! ```text
//!   driver ──submit──▶ [work channel] ──▶ worker 1 ──▶ handler(item)
//!                                     ──▶ worker 2 ──▶ handler(item)
//!                                     ──▶ …  (≤ N, one permit each)
//! ```
//!
//! The control loop waits for a free permit and launches a worker for it.
//! Launching consumes a *slot*, not an item: a worker then waits for the next
//! item or for the work channel to close. Each worker handles at most one
//! item and exits, dropping its permit so the loop can reuse the slot. More
//! workers than items is fine; the surplus see the closed channel and leave.
//!
//! Hand-off is a rendezvous: [`Supervisor::submit`] returns only once a
//! worker has taken ownership of the item. "No more work" is the closing of
//! the work channel (see [`Supervisor::finish`]), so by the time it fires
//! every submitted item already belongs to a worker and none can be lost.
//!
//! A handler that returns an error, or panics, halts the job: no further
//! workers or items start, in-flight items run to completion, and
//! [`Supervisor::wait`] returns the first such error.

use crate::error::RipfixError;
use crate::progress::Emitter;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot, watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// A one-shot broadcast flag.
#[derive(Debug)]
struct Signal {
    tx: watch::Sender<bool>,
}

impl Signal {
    fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    fn fire(&self) {
        self.tx.send_replace(true);
    }

    fn is_fired(&self) -> bool {
        *self.tx.borrow()
    }

    async fn fired(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|fired| *fired).await;
    }
}

/// Records the first run-fatal error and wakes everyone waiting on it.
#[derive(Debug)]
struct Halt {
    signal: Signal,
    error: Mutex<Option<RipfixError>>,
}

impl Halt {
    fn new() -> Self {
        Self {
            signal: Signal::new(),
            error: Mutex::new(None),
        }
    }

    fn trip(&self, err: RipfixError) {
        error!("halting run: {err}");
        if let Ok(mut slot) = self.error.lock() {
            slot.get_or_insert(err);
        }
        self.signal.fire();
    }

    fn take(&self) -> Option<RipfixError> {
        self.error.lock().ok().and_then(|mut slot| slot.take())
    }
}

/// An item in transit plus the worker's receipt for it.
type Handoff<T> = (T, oneshot::Sender<()>);

type WorkQueue<T> = Arc<tokio::sync::Mutex<mpsc::Receiver<Handoff<T>>>>;

/// Handle to a running worker pool processing items of type `T`.
pub struct Supervisor<T> {
    permits: Arc<Semaphore>,
    capacity: usize,
    work_tx: Option<mpsc::Sender<Handoff<T>>>,
    done: Arc<Signal>,
    halt: Arc<Halt>,
    control: JoinHandle<()>,
}

impl<T: Send + 'static> Supervisor<T> {
    /// Start the control loop with `max_workers` slots.
    ///
    /// `handler(worker_id, item, events)` runs once per item on its own
    /// Tokio task. Returning `Err` halts the job.
    pub fn start<F, Fut>(max_workers: usize, events: Emitter, handler: F) -> Self
    where
        F: Fn(u64, T, Emitter) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), RipfixError>> + Send + 'static,
    {
        let capacity = max_workers.max(1);
        let permits = Arc::new(Semaphore::new(capacity));
        let (work_tx, work_rx) = mpsc::channel::<Handoff<T>>(1);
        let queue = Arc::new(tokio::sync::Mutex::new(work_rx));
        let done = Arc::new(Signal::new());
        let halt = Arc::new(Halt::new());
        let handler = Arc::new(handler);

        let control = tokio::spawn(control_loop(
            Arc::clone(&permits),
            queue,
            Arc::clone(&done),
            Arc::clone(&halt),
            events,
            handler,
        ));

        Self {
            permits,
            capacity,
            work_tx: Some(work_tx),
            done,
            halt,
            control,
        }
    }

    /// Hand one item to the pool, waiting until a worker owns it.
    ///
    /// Returns [`RipfixError::Halted`] if the job stopped on a fatal error;
    /// the error itself is reported by [`Supervisor::wait`].
    pub async fn submit(&self, item: T) -> Result<(), RipfixError> {
        let tx = self
            .work_tx
            .as_ref()
            .ok_or_else(|| RipfixError::Internal("work submitted after finish".into()))?;
        let (receipt_tx, receipt_rx) = oneshot::channel();

        let handoff = async {
            tx.send((item, receipt_tx))
                .await
                .map_err(|_| RipfixError::Halted)?;
            receipt_rx.await.map_err(|_| RipfixError::Halted)
        };

        tokio::select! {
            biased;
            _ = self.halt.signal.fired() => Err(RipfixError::Halted),
            taken = handoff => taken,
        }
    }

    /// Signal that no more work will be submitted.
    ///
    /// Idle workers exit once the channel drains; the control loop stops
    /// launching new ones.
    pub fn finish(&mut self) {
        self.work_tx.take();
        self.done.fire();
    }

    /// Number of slots currently free.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Configured number of slots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Join barrier: finish, then block until every slot is free again.
    pub async fn wait(mut self) -> Result<(), RipfixError> {
        self.finish();

        (&mut self.control)
            .await
            .map_err(|e| RipfixError::Internal(format!("supervisor task failed: {e}")))?;

        let all = self
            .permits
            .acquire_many(self.capacity as u32)
            .await
            .map_err(|e| RipfixError::Internal(format!("permit pool closed: {e}")))?;
        drop(all);
        debug!("all {} worker slots free", self.capacity);

        match self.halt.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

async fn control_loop<T, F, Fut>(
    permits: Arc<Semaphore>,
    queue: WorkQueue<T>,
    done: Arc<Signal>,
    halt: Arc<Halt>,
    events: Emitter,
    handler: Arc<F>,
) where
    T: Send + 'static,
    F: Fn(u64, T, Emitter) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), RipfixError>> + Send + 'static,
{
    let mut next_id: u64 = 0;
    loop {
        let permit = tokio::select! {
            biased;
            _ = done.fired() => break,
            _ = halt.signal.fired() => break,
            permit = Arc::clone(&permits).acquire_owned() => match permit {
                Ok(p) => p,
                Err(_) => break,
            },
        };

        if done.is_fired() || halt.signal.is_fired() {
            break;
        }

        next_id += 1;
        tokio::spawn(worker(
            next_id,
            permit,
            Arc::clone(&queue),
            Arc::clone(&halt),
            events.clone(),
            Arc::clone(&handler),
        ));
    }
    debug!("supervisor stopped after launching {next_id} workers");
}

async fn worker<T, F, Fut>(
    id: u64,
    permit: OwnedSemaphorePermit,
    queue: WorkQueue<T>,
    halt: Arc<Halt>,
    events: Emitter,
    handler: Arc<F>,
) where
    T: Send + 'static,
    F: Fn(u64, T, Emitter) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), RipfixError>> + Send + 'static,
{
    // Dropped on every exit path, panics included.
    let _permit = permit;
    events.message(format!("[WORKER {id}] started"));

    let item = tokio::select! {
        biased;
        _ = halt.signal.fired() => None,
        item = async { queue.lock().await.recv().await } => item,
    };

    let Some((item, receipt)) = item else {
        debug!("[WORKER {id}] no more work, exiting");
        return;
    };
    let _ = receipt.send(());

    match tokio::spawn(handler(id, item, events)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => halt.trip(e),
        Err(join) => halt.trip(RipfixError::Internal(format!(
            "[WORKER {id}] work panicked: {join}"
        ))),
    }
    debug!("[WORKER {id}] exiting");
}
