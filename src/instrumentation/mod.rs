//! Runtime instrumentation of the reader process.

pub mod metrics;

pub use metrics::{ChannelSnapshot, MetricsSnapshot, ProcessMetrics, SinkChannel, SinkStats};
