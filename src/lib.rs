//! tidepool: an auto-scaling priority worker pool.
//!
//! The pool schedules in-memory work items across three priority classes
//! using weighted fair selection with aging: every queue has a base weight,
//! and a non-empty queue's weight grows with the age of its oldest waiting
//! item, so low-priority work is delayed but never starved. A management
//! loop watches the backlog and elastically grows the worker set up to a
//! configured maximum, reclaiming idle workers back down to the minimum.
//!
//! # Design
//!
//! - **Cooperative cancellation**: one root token per pool, one child per
//!   worker; closures receive the signal and are never forcibly aborted.
//! - **Failure isolation**: a closure that errors or panics is an
//!   unsuccessful completion, not a dead worker.
//! - **Pure observation**: metrics flow one way into a [`MetricsSink`];
//!   the pool never reads a sink to make decisions.
//! - **No globals**: all state lives under a [`Pool`] instance; independent
//!   pools in one process do not interfere.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tidepool::{Pool, PoolConfig, WorkItem, WorkPriority};
//!
//! # async fn demo() {
//! let pool = Pool::new(PoolConfig::default());
//! pool.start().await.unwrap();
//!
//! let item = WorkItem::new(WorkPriority::Normal, |cancel| async move {
//!     tokio::select! {
//!         () = cancel.cancelled() => {}
//!         () = tokio::time::sleep(std::time::Duration::from_millis(50)) => {}
//!     }
//!     Ok(())
//! });
//! pool.enqueue(item).await.unwrap();
//!
//! pool.stop().await;
//! # }
//! ```

pub mod config;
pub mod metrics;
pub mod pool;
pub mod telemetry;

pub use config::{ConfigError, PoolConfig, PriorityWeights};
pub use metrics::{MetricsSink, NullSink};
pub use pool::{
    BacklogSnapshot, BoxError, EnqueueError, Pool, StartError, TaskResult, WorkItem, WorkItemId,
    WorkPriority, WorkerId,
};
