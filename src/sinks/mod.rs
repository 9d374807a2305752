//! # Measurement Sinks
//!
//! Everything that receives the registry after a decoded frame: the console
//! table, the MQTT broker, InfluxDB and the Prometheus exporter. A sink only
//! reports success or failure; it never fails the read cycle.
//!
//! Dispatch runs in two passes. Every sink publishes first, and outcomes of
//! sinks bound to a [`SinkChannel`] are recorded in the process metrics.
//! Then every sink reports the metrics, which therefore include the current
//! cycle.

pub mod console;
pub mod influx;
pub mod mqtt;
pub mod prometheus;

use crate::instrumentation::metrics::{ProcessMetrics, SinkChannel};
use crate::registry::MeasurementRegistry;
use log::{debug, warn};

pub use console::ConsoleSink;
pub use influx::{InfluxSink, InfluxSinkConfig, InfluxVersion};
pub use mqtt::{MqttSink, MqttSinkConfig};
pub use prometheus::{PrometheusExporter, PrometheusSinkConfig};

/// Receiver of decoded measurements
#[async_trait::async_trait]
pub trait Sink: Send {
    /// Short name for log messages
    fn name(&self) -> &'static str;

    /// Process-metrics channel fed by the outcome of [`publish`](Self::publish)
    fn channel(&self) -> Option<SinkChannel> {
        None
    }

    /// Hand over the registry after a successful decode.
    async fn publish(&mut self, registry: &MeasurementRegistry) -> bool;

    /// Export the process metrics.
    async fn report_metrics(&mut self, _metrics: &ProcessMetrics) -> bool {
        true
    }
}

/// Outcome of one dispatch for one sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkOutcome {
    pub sink: &'static str,
    pub published: bool,
    pub metrics_reported: bool,
}

/// Hand the registry and the process metrics to every sink.
pub async fn dispatch(
    sinks: &mut [Box<dyn Sink>],
    registry: &MeasurementRegistry,
    metrics: &ProcessMetrics,
) -> Vec<SinkOutcome> {
    let mut outcomes = Vec::with_capacity(sinks.len());

    for sink in sinks.iter_mut() {
        let published = sink.publish(registry).await;
        if !published {
            warn!("Sink {} failed to publish measurements", sink.name());
        }
        if let Some(channel) = sink.channel() {
            metrics.record(channel, published);
        }
        outcomes.push(SinkOutcome {
            sink: sink.name(),
            published,
            metrics_reported: false,
        });
    }

    for (sink, outcome) in sinks.iter_mut().zip(outcomes.iter_mut()) {
        outcome.metrics_reported = sink.report_metrics(metrics).await;
        if !outcome.metrics_reported {
            warn!("Sink {} failed to report process metrics", sink.name());
        }
    }

    debug!("Dispatched measurements to {} sinks", outcomes.len());
    outcomes
}
