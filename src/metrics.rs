//! Observation surface: lifecycle, queue, and completion events.
//!
//! The pool pushes events into a [`MetricsSink`]; it never reads one back,
//! so sinks stay pure observers and can be composed or replaced without
//! affecting scheduling. Sinks are expected to return quickly; a slow sink
//! degrades throughput but cannot corrupt pool state.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use crate::pool::{BacklogSnapshot, WorkItemId, WorkPriority, WorkerId};

/// Receiver for pool events. Every method has a no-op default, so a sink
/// implements only what it cares about.
pub trait MetricsSink: Send + Sync {
    /// A worker joined the live set.
    fn worker_created(&self, worker: WorkerId) {
        let _ = worker;
    }

    /// A worker left the live set (reclaimed or stopped).
    fn worker_destroyed(&self, worker: WorkerId) {
        let _ = worker;
    }

    /// An item was accepted into its priority queue.
    fn task_queued(&self, item: WorkItemId, priority: WorkPriority) {
        let _ = (item, priority);
    }

    /// An item was selected by the scheduler after waiting `waited`.
    fn task_dequeued(&self, item: WorkItemId, priority: WorkPriority, waited: Duration) {
        let _ = (item, priority, waited);
    }

    /// An item's closure finished, successfully or not.
    fn task_completed(
        &self,
        item: WorkItemId,
        priority: WorkPriority,
        duration: Duration,
        succeeded: bool,
    ) {
        let _ = (item, priority, duration, succeeded);
    }

    /// The management loop changed the worker count.
    fn scale_event(&self, old_count: usize, new_count: usize) {
        let _ = (old_count, new_count);
    }

    /// Periodic backlog observation from the management loop.
    fn backlog_snapshot(&self, snapshot: &BacklogSnapshot) {
        let _ = snapshot;
    }
}

/// Sink that ignores every event. Used when no sink is supplied.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl MetricsSink for NullSink {}

/// Internal dispatch handle. Isolates the pool from sink faults: a sink
/// that panics loses the event, nothing else.
#[derive(Clone)]
pub(crate) struct SinkHandle {
    sink: Arc<dyn MetricsSink>,
}

impl SinkHandle {
    pub(crate) fn new(sink: Arc<dyn MetricsSink>) -> Self {
        Self { sink }
    }

    fn dispatch(&self, event: &'static str, f: impl FnOnce(&dyn MetricsSink)) {
        if catch_unwind(AssertUnwindSafe(|| f(self.sink.as_ref()))).is_err() {
            tracing::warn!(event, "metrics sink panicked; event dropped");
        }
    }

    pub(crate) fn worker_created(&self, worker: WorkerId) {
        self.dispatch("worker_created", |s| s.worker_created(worker));
    }

    pub(crate) fn worker_destroyed(&self, worker: WorkerId) {
        self.dispatch("worker_destroyed", |s| s.worker_destroyed(worker));
    }

    pub(crate) fn task_queued(&self, item: WorkItemId, priority: WorkPriority) {
        self.dispatch("task_queued", |s| s.task_queued(item, priority));
    }

    pub(crate) fn task_dequeued(&self, item: WorkItemId, priority: WorkPriority, waited: Duration) {
        self.dispatch("task_dequeued", |s| s.task_dequeued(item, priority, waited));
    }

    pub(crate) fn task_completed(
        &self,
        item: WorkItemId,
        priority: WorkPriority,
        duration: Duration,
        succeeded: bool,
    ) {
        self.dispatch("task_completed", |s| {
            s.task_completed(item, priority, duration, succeeded);
        });
    }

    pub(crate) fn scale_event(&self, old_count: usize, new_count: usize) {
        self.dispatch("scale_event", |s| s.scale_event(old_count, new_count));
    }

    pub(crate) fn backlog_snapshot(&self, snapshot: &BacklogSnapshot) {
        self.dispatch("backlog_snapshot", |s| s.backlog_snapshot(snapshot));
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Event-recording sink shared by the scheduler, worker, and manager
    //! tests.

    use std::sync::Mutex;

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    pub(crate) enum Event {
        WorkerCreated(WorkerId),
        WorkerDestroyed(WorkerId),
        TaskQueued(WorkItemId, WorkPriority),
        TaskDequeued(WorkItemId, WorkPriority),
        TaskCompleted {
            item: WorkItemId,
            succeeded: bool,
        },
        Scale {
            old: usize,
            new: usize,
        },
        Backlog(BacklogSnapshot),
    }

    #[derive(Default)]
    pub(crate) struct RecordingSink {
        events: Mutex<Vec<Event>>,
    }

    impl RecordingSink {
        pub(crate) fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub(crate) fn events(&self) -> Vec<Event> {
            self.events.lock().unwrap().clone()
        }

        pub(crate) fn completed(&self) -> Vec<(WorkItemId, bool)> {
            self.events()
                .into_iter()
                .filter_map(|e| match e {
                    Event::TaskCompleted { item, succeeded } => Some((item, succeeded)),
                    _ => None,
                })
                .collect()
        }

        fn push(&self, event: Event) {
            self.events.lock().unwrap().push(event);
        }
    }

    impl MetricsSink for RecordingSink {
        fn worker_created(&self, worker: WorkerId) {
            self.push(Event::WorkerCreated(worker));
        }

        fn worker_destroyed(&self, worker: WorkerId) {
            self.push(Event::WorkerDestroyed(worker));
        }

        fn task_queued(&self, item: WorkItemId, priority: WorkPriority) {
            self.push(Event::TaskQueued(item, priority));
        }

        fn task_dequeued(&self, item: WorkItemId, priority: WorkPriority, _waited: Duration) {
            self.push(Event::TaskDequeued(item, priority));
        }

        fn task_completed(
            &self,
            item: WorkItemId,
            _priority: WorkPriority,
            _duration: Duration,
            succeeded: bool,
        ) {
            self.push(Event::TaskCompleted { item, succeeded });
        }

        fn scale_event(&self, old_count: usize, new_count: usize) {
            self.push(Event::Scale {
                old: old_count,
                new: new_count,
            });
        }

        fn backlog_snapshot(&self, snapshot: &BacklogSnapshot) {
            self.push(Event::Backlog(*snapshot));
        }
    }

    /// Sink that panics on every completion, for fault-isolation tests.
    pub(crate) struct PanickingSink;

    impl MetricsSink for PanickingSink {
        fn task_completed(
            &self,
            _item: WorkItemId,
            _priority: WorkPriority,
            _duration: Duration,
            _succeeded: bool,
        ) {
            panic!("sink fault injected");
        }
    }
}
