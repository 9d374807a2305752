//! # Prometheus Exporter
//!
//! Serves `/metrics` over HTTP. Measurement gauges are named by the entry's
//! short name and registered on their first update; the `smartmeter_app_*`
//! gauges mirror the process metrics.

use super::Sink;
use crate::constants::NET_POWER_NAME;
use crate::error::MeterError;
use crate::instrumentation::metrics::{ProcessMetrics, SinkChannel};
use crate::registry::MeasurementRegistry;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use log::{error, info};
use prometheus::{Encoder, Gauge, Registry, TextEncoder};
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::task::JoinHandle;

/// Exporter settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrometheusSinkConfig {
    pub port: u16,
    pub expose_values: bool,
    pub expose_metrics: bool,
}

#[derive(Clone)]
struct ChannelGauges {
    write_success: Gauge,
    write_failures: Gauge,
    write_successes: Gauge,
}

#[derive(Clone)]
struct AppGauges {
    uptime: Gauge,
    serial_restarts: Gauge,
    channels: Vec<(SinkChannel, ChannelGauges)>,
}

impl AppGauges {
    fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let gauge = |name: String, help: &str| -> Result<Gauge, prometheus::Error> {
            let gauge = Gauge::new(name, help)?;
            registry.register(Box::new(gauge.clone()))?;
            Ok(gauge)
        };

        let mut channels = Vec::new();
        for channel in SinkChannel::ALL {
            let label = channel.label();
            channels.push((
                channel,
                ChannelGauges {
                    write_success: gauge(
                        format!("smartmeter_app_{}_write_success", label),
                        "Status of the last write (1 for success, 0 for failure).",
                    )?,
                    write_failures: gauge(
                        format!("smartmeter_app_{}_write_failures_total", label),
                        "Total number of failed writes.",
                    )?,
                    write_successes: gauge(
                        format!("smartmeter_app_{}_write_successes_total", label),
                        "Total number of successful writes.",
                    )?,
                },
            ));
        }

        Ok(Self {
            uptime: gauge(
                "smartmeter_app_uptime_seconds".into(),
                "Application uptime in seconds.",
            )?,
            serial_restarts: gauge(
                "smartmeter_app_serial_restarts_total".into(),
                "Total number of serial connection restarts.",
            )?,
            channels,
        })
    }

    fn update(&self, metrics: &ProcessMetrics) {
        self.uptime.set(metrics.uptime().as_secs_f64());
        self.serial_restarts.set(metrics.serial_restarts() as f64);
        for (channel, gauges) in &self.channels {
            let stats = metrics.stats(*channel);
            gauges.write_success.set(if stats.last_success() { 1.0 } else { 0.0 });
            gauges.write_failures.set(stats.failures() as f64);
            gauges.write_successes.set(stats.successes() as f64);
        }
    }
}

/// Prometheus sink with its own HTTP server task.
pub struct PrometheusExporter {
    config: PrometheusSinkConfig,
    registry: Registry,
    app: AppGauges,
    values: HashMap<&'static str, Gauge>,
    local_addr: SocketAddr,
    server: JoinHandle<()>,
}

impl PrometheusExporter {
    /// Bind `0.0.0.0:<port>` and start serving; a bind failure is fatal.
    pub async fn start(config: PrometheusSinkConfig) -> Result<Self, MeterError> {
        Self::start_on(SocketAddr::from(([0, 0, 0, 0], config.port)), config).await
    }

    pub async fn start_on(addr: SocketAddr, config: PrometheusSinkConfig) -> Result<Self, MeterError> {
        let sink_error = |reason: String| MeterError::Sink {
            sink: "prometheus",
            reason,
        };

        let registry = Registry::new();
        let app = AppGauges::register(&registry).map_err(|e| sink_error(format!("metrics init error: {}", e)))?;

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| sink_error(format!("failed to bind {}: {}", addr, e)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| sink_error(e.to_string()))?;

        let router = Router::new()
            .route("/metrics", get(serve_metrics))
            .with_state(registry.clone());
        let server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                error!("Prometheus server stopped: {}", e);
            }
        });
        info!("Prometheus metrics server started on {}", local_addr);

        Ok(Self {
            config,
            registry,
            app,
            values: HashMap::new(),
            local_addr,
            server,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Text exposition of all registered metrics
    pub fn encode_text(&self) -> String {
        encode(&self.registry)
    }

    fn set_value(&mut self, name: &'static str, help: &str, value: f64) {
        if let Some(gauge) = self.values.get(name) {
            gauge.set(value);
            return;
        }
        let registered = Gauge::new(name, help).and_then(|gauge| {
            self.registry.register(Box::new(gauge.clone()))?;
            Ok(gauge)
        });
        match registered {
            Ok(gauge) => {
                gauge.set(value);
                self.values.insert(name, gauge);
            }
            Err(e) => error!("Failed to register gauge {}: {}", name, e),
        }
    }
}

impl Drop for PrometheusExporter {
    fn drop(&mut self) {
        self.server.abort();
    }
}

#[async_trait::async_trait]
impl Sink for PrometheusExporter {
    fn name(&self) -> &'static str {
        "prometheus"
    }

    async fn publish(&mut self, registry: &MeasurementRegistry) -> bool {
        if !self.config.expose_values {
            return true;
        }
        for entry in registry {
            self.set_value(entry.short_name(), entry.long_name(), entry.display());
        }
        self.set_value(NET_POWER_NAME, "Wirkleistung Gesamt", registry.net_active_power());
        true
    }

    async fn report_metrics(&mut self, metrics: &ProcessMetrics) -> bool {
        if self.config.expose_metrics {
            self.app.update(metrics);
        }
        true
    }
}

fn encode(registry: &Registry) -> String {
    let mut buf = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&registry.gather(), &mut buf) {
        return format!("error encoding metrics: {}", e);
    }
    String::from_utf8(buf).unwrap_or_default()
}

async fn serve_metrics(State(registry): State<Registry>) -> impl IntoResponse {
    ([(CONTENT_TYPE, TextEncoder::new().format_type().to_string())], encode(&registry))
}
