//! Weighted fair queue selection with aging.
//!
//! Each fetch computes an effective weight per priority (the configured
//! base weight plus an aging bias that grows with the age of the lane's
//! oldest waiting item) and attempts a non-blocking take in descending
//! weight order. The bias guarantees liveness: a lane whose base weight is
//! the minimum still wins selection once it has waited long enough.
//!
//! Strict high-before-low draining is deliberately avoided; it would starve
//! low-priority lanes under sustained high-priority load.

use std::cmp::Ordering;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::item::{WorkItem, WorkPriority};
use super::queue::{PriorityQueueSet, WaitOutcome};
use crate::config::{PoolConfig, PriorityWeights};
use crate::metrics::SinkHandle;

/// Result of one scheduling decision. Never an error: empty and cancelled
/// are ordinary outcomes the worker loop handles.
pub(crate) enum Fetched {
    Item(WorkItem),
    /// All lanes were empty after a wake-up (a racing consumer won).
    Empty,
    /// The pool is stopping.
    Cancelled,
}

pub(crate) struct Scheduler {
    queues: Arc<PriorityQueueSet>,
    weights: PriorityWeights,
    aging_factor: f64,
    sink: SinkHandle,
}

impl Scheduler {
    pub(crate) fn new(queues: Arc<PriorityQueueSet>, config: &PoolConfig, sink: SinkHandle) -> Self {
        Self {
            queues,
            weights: config.weights,
            aging_factor: config.aging_factor,
            sink,
        }
    }

    /// Select the next item across all lanes.
    ///
    /// Two-phase take: a non-blocking weighted attempt, then a parked wait
    /// for any lane to fill, then one more attempt. A miss after the wait is
    /// reported as [`Fetched::Empty`] and the caller retries after a short
    /// delay.
    pub(crate) async fn fetch_next(&self, cancel: &CancellationToken) -> Fetched {
        if cancel.is_cancelled() {
            return Fetched::Cancelled;
        }

        if let Some(item) = self.take_weighted().await {
            return Fetched::Item(item);
        }

        match self.queues.wait_any(cancel).await {
            WaitOutcome::Cancelled => Fetched::Cancelled,
            WaitOutcome::Notified => match self.take_weighted().await {
                Some(item) => Fetched::Item(item),
                None => Fetched::Empty,
            },
        }
    }

    /// One non-blocking pass: order lanes by descending effective weight
    /// and take from the first that yields.
    async fn take_weighted(&self) -> Option<WorkItem> {
        let mut ranked: Vec<(WorkPriority, f64)> = Vec::with_capacity(WorkPriority::ALL.len());
        for priority in WorkPriority::ALL {
            ranked.push((priority, self.effective_weight(priority).await));
        }
        // Stable sort over the descending-priority table: equal weights
        // keep natural priority order, so higher priority wins ties.
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

        for (priority, _weight) in ranked {
            if let Some(item) = self.queues.try_take(priority).await {
                self.sink
                    .task_dequeued(item.id(), item.priority(), item.queued_for());
                return Some(item);
            }
        }
        None
    }

    /// Base weight plus aging bias. The bias is zero for an empty lane and
    /// `aging_factor × head_age_seconds` otherwise.
    async fn effective_weight(&self, priority: WorkPriority) -> f64 {
        let base = f64::from(self.weights.base(priority));
        match self.queues.head_age(priority).await {
            Some(age) => base + self.aging_factor * age.as_secs_f64(),
            None => base,
        }
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
