//! Pool lifecycle and the periodic management (autoscaling) loop.
//!
//! The pool owns every worker and the management task. Lifecycle is a
//! one-way state machine: Created → Running → Draining → Stopped. `stop`
//! drains cooperatively: in-flight closures observe cancellation, queued
//! items that never ran are dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::item::WorkItem;
use super::queue::{BacklogSnapshot, PriorityQueueSet};
use super::scheduler::Scheduler;
use super::worker::{spawn_worker, Worker, WorkerId};
use crate::config::PoolConfig;
use crate::metrics::{MetricsSink, NullSink, SinkHandle};

// Lifecycle phases. Transitions are one-way; re-starting a stopped pool is
// rejected.
const PHASE_CREATED: u8 = 0;
const PHASE_RUNNING: u8 = 1;
const PHASE_DRAINING: u8 = 2;
const PHASE_STOPPED: u8 = 3;

/// Errors surfaced by [`Pool::start`].
#[derive(Debug, Error)]
pub enum StartError {
    #[error("invalid configuration: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("pool already started")]
    AlreadyStarted,
}

/// Errors surfaced by [`Pool::enqueue`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnqueueError {
    #[error("pool has not been started")]
    NotStarted,

    #[error("rejected, pool stopping")]
    Stopping,
}

struct WorkerSet {
    live: HashMap<WorkerId, Worker>,
    /// Reclaimed workers that may still be finishing an item. Drained
    /// opportunistically each tick and fully at stop.
    retired: Vec<Worker>,
}

struct Shared {
    config: PoolConfig,
    queues: Arc<PriorityQueueSet>,
    scheduler: Arc<Scheduler>,
    sink: SinkHandle,
    root: CancellationToken,
    phase: AtomicU8,
    next_worker_id: AtomicU64,
    workers: Mutex<WorkerSet>,
    management: Mutex<Option<JoinHandle<()>>>,
    stopped: Notify,
}

/// Auto-scaling priority worker pool.
///
/// All state lives under the instance; multiple independent pools in one
/// process do not interfere. The handle is cheap to clone.
#[derive(Clone)]
pub struct Pool {
    shared: Arc<Shared>,
}

impl Pool {
    /// Create a pool with no metrics sink.
    pub fn new(config: PoolConfig) -> Self {
        Self::with_sink(config, Arc::new(NullSink))
    }

    /// Create a pool that reports events to `sink`.
    pub fn with_sink(config: PoolConfig, sink: Arc<dyn MetricsSink>) -> Self {
        let queues = Arc::new(PriorityQueueSet::new());
        let sink = SinkHandle::new(sink);
        let scheduler = Arc::new(Scheduler::new(Arc::clone(&queues), &config, sink.clone()));
        Self {
            shared: Arc::new(Shared {
                config,
                queues,
                scheduler,
                sink,
                root: CancellationToken::new(),
                phase: AtomicU8::new(PHASE_CREATED),
                next_worker_id: AtomicU64::new(0),
                workers: Mutex::new(WorkerSet {
                    live: HashMap::new(),
                    retired: Vec::new(),
                }),
                management: Mutex::new(None),
                stopped: Notify::new(),
            }),
        }
    }

    /// Validate configuration, spawn the minimum worker set, and launch the
    /// management loop. Safe to call once; a second call fails.
    pub async fn start(&self) -> Result<(), StartError> {
        self.shared.config.validate()?;

        if self
            .shared
            .phase
            .compare_exchange(
                PHASE_CREATED,
                PHASE_RUNNING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Err(StartError::AlreadyStarted);
        }

        {
            let mut workers = self.shared.workers.lock().await;
            for _ in 0..self.shared.config.min_workers {
                spawn_one(&self.shared, &mut workers);
            }
        }

        let shared = Arc::clone(&self.shared);
        *self.shared.management.lock().await = Some(tokio::spawn(management_loop(shared)));

        tracing::info!(
            min_workers = self.shared.config.min_workers,
            max_workers = self.shared.config.max_workers,
            "pool started"
        );
        Ok(())
    }

    /// Route an item to its priority queue.
    ///
    /// Fails only on lifecycle grounds; the queues themselves are unbounded
    /// and never reject.
    pub async fn enqueue(&self, item: WorkItem) -> Result<(), EnqueueError> {
        match self.shared.phase.load(Ordering::Acquire) {
            PHASE_CREATED => Err(EnqueueError::NotStarted),
            PHASE_RUNNING => {
                let id = item.id();
                let priority = item.priority();
                // Queued is reported before the item is dequeuable so the
                // event always precedes the matching dequeue.
                self.shared.sink.task_queued(id, priority);
                self.shared.queues.enqueue(item).await;
                Ok(())
            }
            _ => Err(EnqueueError::Stopping),
        }
    }

    /// Stop the pool: cancel the management loop and every worker, then
    /// await drain. Idempotent: concurrent and repeated calls all return
    /// once shutdown completes. Items still queued are dropped.
    pub async fn stop(&self) {
        loop {
            match self.shared.phase.compare_exchange(
                PHASE_RUNNING,
                PHASE_DRAINING,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(PHASE_CREATED) => {
                    // Never started: nothing to drain.
                    if self
                        .shared
                        .phase
                        .compare_exchange(
                            PHASE_CREATED,
                            PHASE_STOPPED,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                    {
                        self.shared.stopped.notify_waiters();
                        return;
                    }
                    // Lost the race to a concurrent start/stop; re-examine.
                }
                Err(PHASE_DRAINING) => {
                    self.await_stopped().await;
                    return;
                }
                Err(_) => return, // already stopped
            }
        }

        self.shared.root.cancel();

        if let Some(handle) = self.shared.management.lock().await.take() {
            let _ = handle.await;
        }

        let mut workers = self.shared.workers.lock().await;
        for (_, worker) in workers.live.drain() {
            let id = worker.id();
            worker.stop().await;
            self.shared.sink.worker_destroyed(id);
        }
        for worker in workers.retired.drain(..) {
            worker.join().await;
        }
        drop(workers);

        self.shared.phase.store(PHASE_STOPPED, Ordering::Release);
        self.shared.stopped.notify_waiters();
        tracing::info!("pool stopped");
    }

    /// Instantaneous per-priority backlog counts. Pure read.
    pub fn backlog_snapshot(&self) -> BacklogSnapshot {
        self.shared.queues.snapshot()
    }

    /// Number of live workers.
    pub async fn worker_count(&self) -> usize {
        self.shared.workers.lock().await.live.len()
    }

    async fn await_stopped(&self) {
        loop {
            let notified = self.shared.stopped.notified();
            if self.shared.phase.load(Ordering::Acquire) == PHASE_STOPPED {
                return;
            }
            notified.await;
        }
    }
}

fn spawn_one(shared: &Arc<Shared>, workers: &mut WorkerSet) {
    let id = WorkerId(shared.next_worker_id.fetch_add(1, Ordering::Relaxed));
    let worker = spawn_worker(
        id,
        Arc::clone(&shared.scheduler),
        shared.sink.clone(),
        &shared.root,
    );
    shared.sink.worker_created(id);
    workers.live.insert(id, worker);
}

/// Desired worker count for a given backlog: one worker per
/// `backlog_per_worker` waiting items, clamped to the configured bounds.
fn desired_workers(config: &PoolConfig, total_backlog: usize) -> usize {
    total_backlog
        .div_ceil(config.backlog_per_worker.max(1))
        .clamp(config.min_workers, config.max_workers)
}

async fn management_loop(shared: Arc<Shared>) {
    let mut tick = tokio::time::interval(shared.config.management_interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            () = shared.root.cancelled() => break,
            _ = tick.tick() => run_tick(&shared).await,
        }
    }
    tracing::debug!("management loop stopped");
}

/// One management tick: observe backlog, reconcile the live set toward the
/// desired count. Anomalies are logged, never propagated; autoscaler
/// liveness outranks any single tick.
async fn run_tick(shared: &Arc<Shared>) {
    let snapshot = shared.queues.snapshot();
    shared.sink.backlog_snapshot(&snapshot);

    let desired = desired_workers(&shared.config, snapshot.total());

    let mut workers = shared.workers.lock().await;
    reap_retired(&mut workers).await;
    let current = workers.live.len();

    if desired > current {
        scale_out(shared, &mut workers, current, desired, snapshot.total());
    } else if desired < current {
        scale_in(shared, &mut workers, current, desired);
    }
}

/// Await retired workers whose loops have already exited, so the retired
/// list cannot grow without bound between stops.
async fn reap_retired(workers: &mut WorkerSet) {
    let mut index = 0;
    while index < workers.retired.len() {
        if workers.retired[index].is_finished() {
            let worker = workers.retired.swap_remove(index);
            worker.join().await;
        } else {
            index += 1;
        }
    }
}

fn scale_out(
    shared: &Arc<Shared>,
    workers: &mut WorkerSet,
    current: usize,
    desired: usize,
    backlog: usize,
) {
    for _ in current..desired {
        spawn_one(shared, workers);
    }
    shared.sink.scale_event(current, desired);
    tracing::debug!(old = current, new = desired, backlog, "scaled out");
}

/// Reclaim idle workers, oldest last-active first. Cooperative: a reclaimed
/// worker may still finish the item it already picked up, so counts shrink
/// eventually, not instantly.
fn scale_in(shared: &Arc<Shared>, workers: &mut WorkerSet, current: usize, desired: usize) {
    let mut idle: Vec<(WorkerId, std::time::Duration)> = workers
        .live
        .values()
        .map(|w| (w.id(), w.idle_for()))
        .filter(|(_, idle_for)| *idle_for > shared.config.idle_timeout)
        .collect();
    idle.sort_by(|a, b| b.1.cmp(&a.1));

    let excess = current - desired;
    let mut reclaimed = 0;
    for (id, _) in idle.into_iter().take(excess) {
        let Some(worker) = workers.live.remove(&id) else {
            continue;
        };
        worker.cancel();
        workers.retired.push(worker);
        shared.sink.worker_destroyed(id);
        reclaimed += 1;
    }

    if reclaimed > 0 {
        shared.sink.scale_event(current, current - reclaimed);
        tracing::debug!(old = current, new = current - reclaimed, "scaled in");
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
