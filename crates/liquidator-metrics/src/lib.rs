//! liquidator-metrics: pipeline health figures for each block.
//!
//! # Architecture
//!
//! ```text
//! workers ──INCRBY──▶ Cache ──get/delete──▶ MetricsAggregator
//!                                                 │ Vec<Metric>
//!                                                 ▼
//!                 MetricsReporter ──mpsc──▶ ReportWorker ──▶ MetricsSink
//!                                                              ├── DatadogSink
//!                                                              ├── LogSink
//!                                                              └── MemorySink
//! ```
//!
//! Cumulative counters are left in the cache; per-block counters are
//! deleted as soon as they are read so the next block starts from zero.

pub mod aggregator;
pub mod error;
pub mod reporter;
pub mod sink;

pub use aggregator::{MetricsAggregator, scaler_count_metric};
pub use error::{MetricsError, MetricsResult};
pub use reporter::{MetricsReporter, ReportWorker};
pub use sink::{DatadogSink, LogSink, MemorySink, MetricsSink};
