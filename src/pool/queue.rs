//! Per-priority FIFO lanes with backlog counters and wake-any notification.
//!
//! One unbounded lane per priority keeps enqueue contention isolated and
//! preserves FIFO within a level. A single [`Notify`] protects the whole set:
//! consumers that find every lane empty park on it and are woken when any
//! lane gains an item.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;

use super::item::{WorkItem, WorkPriority};

/// Instantaneous per-priority backlog counts.
///
/// Best-effort-consistent: a reader may miss enqueues or dequeues in flight,
/// but counts are never negative and never unboundedly stale.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BacklogSnapshot {
    pub high: usize,
    pub normal: usize,
    pub low: usize,
}

impl BacklogSnapshot {
    /// Total items waiting across all priorities.
    pub fn total(&self) -> usize {
        self.high + self.normal + self.low
    }

    /// Count for a single priority.
    pub fn get(&self, priority: WorkPriority) -> usize {
        match priority {
            WorkPriority::High => self.high,
            WorkPriority::Normal => self.normal,
            WorkPriority::Low => self.low,
        }
    }
}

/// Outcome of waiting for work to appear.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitOutcome {
    /// At least one lane (probably) became non-empty.
    Notified,
    /// The pool is stopping.
    Cancelled,
}

struct Lane {
    items: Mutex<VecDeque<WorkItem>>,
    backlog: AtomicUsize,
}

impl Lane {
    fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            backlog: AtomicUsize::new(0),
        }
    }
}

/// The set of priority lanes shared by producers, workers, and the
/// management loop.
pub(crate) struct PriorityQueueSet {
    lanes: [Lane; WorkPriority::ALL.len()],
    notify: Notify,
}

impl PriorityQueueSet {
    pub(crate) fn new() -> Self {
        Self {
            lanes: std::array::from_fn(|_| Lane::new()),
            notify: Notify::new(),
        }
    }

    fn lane(&self, priority: WorkPriority) -> &Lane {
        &self.lanes[priority.index()]
    }

    /// Append an item to its priority lane. Never blocks beyond the lane
    /// lock and never fails; lifecycle rejection happens at the pool layer.
    ///
    /// The backlog counter is incremented before the item becomes
    /// dequeuable-observable (both happen under the lane lock).
    pub(crate) async fn enqueue(&self, item: WorkItem) {
        let lane = self.lane(item.priority());
        let mut items = lane.items.lock().await;
        lane.backlog.fetch_add(1, Ordering::Release);
        items.push_back(item);
        drop(items);

        self.notify.notify_one();
    }

    /// Non-blocking take from one lane. Decrements the counter after the
    /// item is removed.
    pub(crate) async fn try_take(&self, priority: WorkPriority) -> Option<WorkItem> {
        let lane = self.lane(priority);
        let mut items = lane.items.lock().await;
        let item = items.pop_front()?;
        lane.backlog.fetch_sub(1, Ordering::Release);
        Some(item)
    }

    /// Age of the oldest waiting item in a lane, or `None` when empty.
    pub(crate) async fn head_age(&self, priority: WorkPriority) -> Option<Duration> {
        let lane = self.lane(priority);
        let items = lane.items.lock().await;
        items.front().map(WorkItem::queued_for)
    }

    /// Lock-free read of every backlog counter.
    pub(crate) fn snapshot(&self) -> BacklogSnapshot {
        BacklogSnapshot {
            high: self.backlog(WorkPriority::High),
            normal: self.backlog(WorkPriority::Normal),
            low: self.backlog(WorkPriority::Low),
        }
    }

    pub(crate) fn backlog(&self, priority: WorkPriority) -> usize {
        self.lane(priority).backlog.load(Ordering::Acquire)
    }

    /// Park until any lane gains an item or the pool stops.
    ///
    /// A wake-up is a hint, not a guarantee: a racing consumer may have
    /// drained the lane already, so callers re-try a non-blocking take and
    /// treat a miss as benign.
    pub(crate) async fn wait_any(&self, cancel: &CancellationToken) -> WaitOutcome {
        tokio::select! {
            biased;
            () = cancel.cancelled() => WaitOutcome::Cancelled,
            () = self.notify.notified() => WaitOutcome::Notified,
        }
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
