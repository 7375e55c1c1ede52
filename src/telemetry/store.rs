//! In-memory metrics store and the sink adapter that feeds it.
//!
//! [`MetricsStore`] is a thread-safe bag of counters, gauges, and summary
//! statistics with serializable snapshots. [`StoreSink`] implements
//! [`MetricsSink`] on top of it, turning pool events into named metrics a
//! host can export however it likes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::metrics::MetricsSink;
use crate::pool::{BacklogSnapshot, WorkItemId, WorkPriority, WorkerId};

/// Snapshot of all metrics at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub counters: HashMap<String, u64>,
    pub gauges: HashMap<String, f64>,
    pub summaries: HashMap<String, SummaryStats>,
}

/// Count / sum / min / max summary of an observed series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryStats {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
}

impl SummaryStats {
    /// Mean of the observed values, or 0 for an empty series.
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

/// Lock-free aggregation cell. f64 values live as bit patterns in atomics
/// so observation never takes a lock.
struct SummaryCell {
    count: AtomicU64,
    sum: AtomicU64,
    min: AtomicU64,
    max: AtomicU64,
}

impl SummaryCell {
    fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            sum: AtomicU64::new(f64::to_bits(0.0)),
            min: AtomicU64::new(f64::to_bits(f64::MAX)),
            max: AtomicU64::new(f64::to_bits(f64::MIN)),
        }
    }

    fn observe(&self, value: f64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        Self::update(&self.sum, |current| current + value);
        Self::update(&self.min, |current| current.min(value));
        Self::update(&self.max, |current| current.max(value));
    }

    fn update(cell: &AtomicU64, f: impl Fn(f64) -> f64) {
        let _ = cell.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
            Some(f64::to_bits(f(f64::from_bits(bits))))
        });
    }

    fn stats(&self) -> SummaryStats {
        let count = self.count.load(Ordering::Relaxed);
        SummaryStats {
            count,
            sum: f64::from_bits(self.sum.load(Ordering::Relaxed)),
            min: if count == 0 {
                0.0
            } else {
                f64::from_bits(self.min.load(Ordering::Relaxed))
            },
            max: if count == 0 {
                0.0
            } else {
                f64::from_bits(self.max.load(Ordering::Relaxed))
            },
        }
    }
}

/// Thread-safe metrics store.
#[derive(Default)]
pub struct MetricsStore {
    counters: RwLock<HashMap<String, AtomicU64>>,
    gauges: RwLock<HashMap<String, AtomicU64>>,
    summaries: RwLock<HashMap<String, SummaryCell>>,
}

impl MetricsStore {
    /// Create a new empty metrics store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment a counter by the given value.
    pub fn increment_counter(&self, name: &str, value: u64) {
        let counters = self.counters.read().unwrap();
        if let Some(counter) = counters.get(name) {
            counter.fetch_add(value, Ordering::Relaxed);
            return;
        }
        drop(counters);

        let mut counters = self.counters.write().unwrap();
        counters
            .entry(name.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(value, Ordering::Relaxed);
    }

    /// Set a gauge to the given value.
    pub fn set_gauge(&self, name: &str, value: f64) {
        let gauges = self.gauges.read().unwrap();
        if let Some(gauge) = gauges.get(name) {
            gauge.store(f64::to_bits(value), Ordering::Relaxed);
            return;
        }
        drop(gauges);

        let mut gauges = self.gauges.write().unwrap();
        gauges
            .entry(name.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .store(f64::to_bits(value), Ordering::Relaxed);
    }

    /// Record one observation into a summary series.
    pub fn observe(&self, name: &str, value: f64) {
        let summaries = self.summaries.read().unwrap();
        if let Some(cell) = summaries.get(name) {
            cell.observe(value);
            return;
        }
        drop(summaries);

        let mut summaries = self.summaries.write().unwrap();
        summaries
            .entry(name.to_string())
            .or_insert_with(SummaryCell::new)
            .observe(value);
    }

    /// Read a single counter (0 when never incremented).
    pub fn counter(&self, name: &str) -> u64 {
        self.counters
            .read()
            .unwrap()
            .get(name)
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }

    /// Read a single gauge, if ever set.
    pub fn gauge(&self, name: &str) -> Option<f64> {
        self.gauges
            .read()
            .unwrap()
            .get(name)
            .map(|g| f64::from_bits(g.load(Ordering::Relaxed)))
    }

    /// Take a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: self
                .counters
                .read()
                .unwrap()
                .iter()
                .map(|(k, v)| (k.clone(), v.load(Ordering::Relaxed)))
                .collect(),
            gauges: self
                .gauges
                .read()
                .unwrap()
                .iter()
                .map(|(k, v)| (k.clone(), f64::from_bits(v.load(Ordering::Relaxed))))
                .collect(),
            summaries: self
                .summaries
                .read()
                .unwrap()
                .iter()
                .map(|(k, v)| (k.clone(), v.stats()))
                .collect(),
        }
    }
}

/// Metric names emitted by [`StoreSink`].
mod names {
    pub const TASKS_QUEUED: &str = "tasks.queued";
    pub const TASKS_DEQUEUED: &str = "tasks.dequeued";
    pub const TASKS_OK: &str = "tasks.completed.ok";
    pub const TASKS_FAILED: &str = "tasks.completed.failed";
    pub const WORKERS_CREATED: &str = "workers.created";
    pub const WORKERS_DESTROYED: &str = "workers.destroyed";
    pub const WORKERS_LIVE: &str = "workers.live";
    pub const SCALE_EVENTS: &str = "scale.events";
    pub const TASK_DURATION_MS: &str = "task.duration_ms";
    pub const TASK_WAIT_MS: &str = "task.wait_ms";
    pub const BACKLOG_TOTAL: &str = "backlog.total";
}

/// Sink that aggregates pool events into a [`MetricsStore`].
pub struct StoreSink {
    store: Arc<MetricsStore>,
}

impl StoreSink {
    pub fn new(store: Arc<MetricsStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<MetricsStore> {
        &self.store
    }
}

impl MetricsSink for StoreSink {
    fn worker_created(&self, _worker: WorkerId) {
        self.store.increment_counter(names::WORKERS_CREATED, 1);
    }

    fn worker_destroyed(&self, _worker: WorkerId) {
        self.store.increment_counter(names::WORKERS_DESTROYED, 1);
    }

    fn task_queued(&self, _item: WorkItemId, priority: WorkPriority) {
        self.store.increment_counter(names::TASKS_QUEUED, 1);
        self.store
            .increment_counter(&format!("{}.{priority}", names::TASKS_QUEUED), 1);
    }

    fn task_dequeued(&self, _item: WorkItemId, _priority: WorkPriority, waited: Duration) {
        self.store.increment_counter(names::TASKS_DEQUEUED, 1);
        self.store
            .observe(names::TASK_WAIT_MS, waited.as_secs_f64() * 1000.0);
    }

    fn task_completed(
        &self,
        _item: WorkItemId,
        _priority: WorkPriority,
        duration: Duration,
        succeeded: bool,
    ) {
        let name = if succeeded {
            names::TASKS_OK
        } else {
            names::TASKS_FAILED
        };
        self.store.increment_counter(name, 1);
        self.store
            .observe(names::TASK_DURATION_MS, duration.as_secs_f64() * 1000.0);
    }

    fn scale_event(&self, _old_count: usize, new_count: usize) {
        self.store.increment_counter(names::SCALE_EVENTS, 1);
        self.store.set_gauge(names::WORKERS_LIVE, new_count as f64);
    }

    fn backlog_snapshot(&self, snapshot: &BacklogSnapshot) {
        self.store
            .set_gauge(names::BACKLOG_TOTAL, snapshot.total() as f64);
        for priority in WorkPriority::ALL {
            self.store.set_gauge(
                &format!("backlog.{priority}"),
                snapshot.get(priority) as f64,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let store = MetricsStore::new();
        store.increment_counter("hits", 1);
        store.increment_counter("hits", 2);
        assert_eq!(store.counter("hits"), 3);
        assert_eq!(store.counter("never"), 0);
    }

    #[test]
    fn gauges_overwrite() {
        let store = MetricsStore::new();
        store.set_gauge("level", 4.0);
        store.set_gauge("level", 2.5);
        assert_eq!(store.gauge("level"), Some(2.5));
        assert_eq!(store.gauge("never"), None);
    }

    #[test]
    fn summaries_track_count_sum_min_max() {
        let store = MetricsStore::new();
        store.observe("latency", 10.0);
        store.observe("latency", 30.0);
        store.observe("latency", 20.0);

        let snapshot = store.snapshot();
        let stats = &snapshot.summaries["latency"];
        assert_eq!(stats.count, 3);
        assert!((stats.sum - 60.0).abs() < 1e-9);
        assert!((stats.min - 10.0).abs() < 1e-9);
        assert!((stats.max - 30.0).abs() < 1e-9);
        assert!((stats.mean() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn empty_summary_reports_zeros() {
        let cell = SummaryCell::new();
        let stats = cell.stats();
        assert_eq!(stats.count, 0);
        assert_eq!(stats.min, 0.0);
        assert_eq!(stats.max, 0.0);
        assert_eq!(stats.mean(), 0.0);
    }

    #[test]
    fn store_sink_translates_events() {
        let store = Arc::new(MetricsStore::new());
        let sink = StoreSink::new(Arc::clone(&store));

        let item = crate::pool::WorkItem::new(WorkPriority::High, |_| async { Ok(()) });
        sink.task_queued(item.id(), item.priority());
        sink.task_dequeued(item.id(), item.priority(), Duration::from_millis(5));
        sink.task_completed(item.id(), item.priority(), Duration::from_millis(12), true);
        sink.task_completed(item.id(), item.priority(), Duration::from_millis(3), false);
        sink.scale_event(1, 4);
        sink.backlog_snapshot(&BacklogSnapshot {
            high: 2,
            normal: 1,
            low: 0,
        });

        assert_eq!(store.counter("tasks.queued"), 1);
        assert_eq!(store.counter("tasks.queued.high"), 1);
        assert_eq!(store.counter("tasks.dequeued"), 1);
        assert_eq!(store.counter("tasks.completed.ok"), 1);
        assert_eq!(store.counter("tasks.completed.failed"), 1);
        assert_eq!(store.gauge("workers.live"), Some(4.0));
        assert_eq!(store.gauge("backlog.total"), Some(3.0));
        assert_eq!(store.gauge("backlog.high"), Some(2.0));

        let snapshot = store.snapshot();
        assert_eq!(snapshot.summaries["task.duration_ms"].count, 2);
        assert_eq!(snapshot.summaries["task.wait_ms"].count, 1);
    }
}
