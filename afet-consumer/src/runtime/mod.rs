//! Consumer group runtime: session loop, per-partition workers, counters

pub mod group;
pub mod metrics;
pub mod router;

pub use group::{wait_until_ready, ConsumerGroup};
pub use metrics::{ConsumerMetrics, MetricsSnapshot};
pub use router::{PartitionRouter, RetryPolicy, WORKER_QUEUE_DEPTH};
