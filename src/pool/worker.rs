//! Long-lived consumer loop: fetch, execute, report.
//!
//! A worker owns nothing but its loop. It pulls items from the scheduler,
//! runs the user closure with its own cancellation token (a child of the
//! pool root), and reports every completion to the metrics sink. A failing
//! or panicking closure never kills the worker.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::item::WorkItem;
use super::scheduler::{Fetched, Scheduler};
use crate::metrics::SinkHandle;

/// Delay before re-polling after a spurious empty fetch.
const EMPTY_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Stable per-pool worker identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(pub(crate) u64);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Handle to a spawned worker, owned exclusively by the pool.
pub(crate) struct Worker {
    id: WorkerId,
    cancel: CancellationToken,
    last_active: Arc<Mutex<Instant>>,
    handle: JoinHandle<()>,
}

/// Spawn a worker loop under `parent` cancellation. The returned handle is
/// the only way to observe or stop the worker.
pub(crate) fn spawn_worker(
    id: WorkerId,
    scheduler: Arc<Scheduler>,
    sink: SinkHandle,
    parent: &CancellationToken,
) -> Worker {
    let cancel = parent.child_token();
    let last_active = Arc::new(Mutex::new(Instant::now()));
    let handle = tokio::spawn(worker_loop(
        id,
        scheduler,
        sink,
        cancel.clone(),
        Arc::clone(&last_active),
    ));
    Worker {
        id,
        cancel,
        last_active,
        handle,
    }
}

impl Worker {
    pub(crate) fn id(&self) -> WorkerId {
        self.id
    }

    /// Time since the worker last dequeued an item.
    pub(crate) fn idle_for(&self) -> Duration {
        self.last_active.lock().unwrap().elapsed()
    }

    /// Signal cooperative shutdown without waiting. Idempotent.
    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Signal shutdown and await loop termination.
    pub(crate) async fn stop(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
    }

    /// Await loop termination of an already-cancelled worker.
    pub(crate) async fn join(self) {
        let _ = self.handle.await;
    }
}

async fn worker_loop(
    id: WorkerId,
    scheduler: Arc<Scheduler>,
    sink: SinkHandle,
    cancel: CancellationToken,
    last_active: Arc<Mutex<Instant>>,
) {
    tracing::debug!(worker = %id, "worker started");
    loop {
        match scheduler.fetch_next(&cancel).await {
            Fetched::Cancelled => break,
            Fetched::Empty => {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(EMPTY_RETRY_DELAY) => {}
                }
            }
            Fetched::Item(item) => {
                *last_active.lock().unwrap() = Instant::now();
                execute(&sink, &cancel, item).await;
            }
        }
    }
    tracing::debug!(worker = %id, "worker stopped");
}

/// Run one item to completion and report it. An `Err` return, a panic,
/// and a cancellation the closure chose to observe are all recorded as
/// `succeeded = false`; none of them propagate. No retry is
/// performed here: retry policy belongs to the caller.
async fn execute(sink: &SinkHandle, cancel: &CancellationToken, item: WorkItem) {
    let item_id = item.id();
    let priority = item.priority();
    let started = Instant::now();

    let outcome = AssertUnwindSafe(item.into_future(cancel.clone()))
        .catch_unwind()
        .await;
    let succeeded = matches!(outcome, Ok(Ok(())));

    match &outcome {
        Ok(Ok(())) => {}
        Ok(Err(error)) => {
            tracing::debug!(item = %item_id, %priority, %error, "task failed");
        }
        Err(_) => {
            tracing::warn!(item = %item_id, %priority, "task panicked");
        }
    }

    sink.task_completed(item_id, priority, started.elapsed(), succeeded);
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
