//! Telemetry for the pool: structured logging and an in-memory metrics
//! store with a sink adapter.
//!
//! Everything here is host-facing convenience; the pool core only ever
//! talks to the [`MetricsSink`](crate::metrics::MetricsSink) trait.

mod logging;
mod store;

pub use logging::{init_logging, LogConfig, LogError, LogFormat};
pub use store::{MetricsSnapshot, MetricsStore, StoreSink, SummaryStats};
