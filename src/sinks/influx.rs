//! # InfluxDB Sink
//!
//! Writes the measurements in line protocol over the HTTP API, with one
//! nanosecond timestamp per cycle:
//!
//! ```text
//! Wirkenergie Bezug=12.345,Lieferung=0.5 1710506045000000000
//! Momentanleistung Bezug=850,Lieferung=0,Gesamt=850 1710506045000000000
//! ```
//!
//! Version 1 servers take `/write?db=` with basic auth, versions 2 and 3
//! take `/api/v2/write?org=&bucket=` with token auth. The bucket is the
//! configured database name.

use super::Sink;
use crate::constants::INFLUX_WRITE_TIMEOUT;
use crate::error::MeterError;
use crate::instrumentation::metrics::{ProcessMetrics, SinkChannel};
use crate::registry::MeasurementRegistry;
use log::{debug, error};
use reqwest::header::AUTHORIZATION;
use std::fmt::Write as _;

/// InfluxDB HTTP API generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfluxVersion {
    V1,
    V2,
    V3,
}

impl TryFrom<u8> for InfluxVersion {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(InfluxVersion::V1),
            2 => Ok(InfluxVersion::V2),
            3 => Ok(InfluxVersion::V3),
            other => Err(other),
        }
    }
}

/// Server and write settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfluxSinkConfig {
    pub host: String,
    pub port: u16,
    pub version: InfluxVersion,
    /// Database (v1) or bucket (v2/v3)
    pub database: String,
    pub organization: String,
    pub username: Option<String>,
    /// Password (v1) or API token (v2/v3)
    pub password: Option<String>,
    pub send_values: bool,
    pub send_metrics: bool,
}

/// InfluxDB writer bound to the time-series channel.
pub struct InfluxSink {
    client: reqwest::Client,
    config: InfluxSinkConfig,
}

impl InfluxSink {
    pub fn new(config: InfluxSinkConfig) -> Result<Self, MeterError> {
        let client = reqwest::Client::builder()
            .timeout(INFLUX_WRITE_TIMEOUT)
            .build()
            .map_err(|e| MeterError::Sink {
                sink: "influxdb",
                reason: e.to_string(),
            })?;
        Ok(Self { client, config })
    }

    /// Endpoint for the configured API version
    pub fn write_url(&self) -> String {
        let path = match self.config.version {
            InfluxVersion::V1 => "write",
            InfluxVersion::V2 | InfluxVersion::V3 => "api/v2/write",
        };
        format!("http://{}:{}/{}", self.config.host, self.config.port, path)
    }

    async fn write(&self, body: String) -> Result<(), reqwest::Error> {
        let config = &self.config;
        let mut request = self.client.post(self.write_url()).body(body);

        request = match config.version {
            InfluxVersion::V1 => {
                let request = request.query(&[("db", config.database.as_str()), ("precision", "ns")]);
                match &config.username {
                    Some(user) => request.basic_auth(user, config.password.as_ref()),
                    None => request,
                }
            }
            InfluxVersion::V2 | InfluxVersion::V3 => {
                let request = request.query(&[
                    ("org", config.organization.as_str()),
                    ("bucket", config.database.as_str()),
                    ("precision", "ns"),
                ]);
                match &config.password {
                    Some(token) => request.header(AUTHORIZATION, format!("Token {}", token)),
                    None => request,
                }
            }
        };

        request.send().await?.error_for_status()?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Sink for InfluxSink {
    fn name(&self) -> &'static str {
        "influxdb"
    }

    fn channel(&self) -> Option<SinkChannel> {
        self.config.send_values.then_some(SinkChannel::TimeSeries)
    }

    async fn publish(&mut self, registry: &MeasurementRegistry) -> bool {
        if !self.config.send_values {
            return true;
        }
        match self.write(value_lines(registry, now_nanos())).await {
            Ok(()) => {
                debug!("Wrote measurements to InfluxDB");
                true
            }
            Err(e) => {
                error!("Failed to write measurements to InfluxDB: {}", e);
                false
            }
        }
    }

    async fn report_metrics(&mut self, metrics: &ProcessMetrics) -> bool {
        if !self.config.send_metrics {
            return true;
        }
        match self.write(metrics_line(metrics, now_nanos())).await {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to write app metrics to InfluxDB: {}", e);
                false
            }
        }
    }
}

fn now_nanos() -> i64 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
}

/// Line-protocol body of the measurement points.
pub fn value_lines(registry: &MeasurementRegistry, timestamp_ns: i64) -> String {
    let v = |short: &str| registry.display_of(short);
    let points: [(&str, Vec<(&str, f64)>); 5] = [
        ("Wirkenergie", vec![("Bezug", v("WirkenergieP")), ("Lieferung", v("WirkenergieN"))]),
        (
            "Momentanleistung",
            vec![
                ("Bezug", v("MomentanleistungP")),
                ("Lieferung", v("MomentanleistungN")),
                ("Gesamt", registry.net_active_power()),
            ],
        ),
        ("Spannung", vec![("L1", v("SpannungL1")), ("L2", v("SpannungL2")), ("L3", v("SpannungL3"))]),
        ("Strom", vec![("L1", v("StromL1")), ("L2", v("StromL2")), ("L3", v("StromL3"))]),
        ("Leistungsfaktor", vec![("value", v("Leistungsfaktor"))]),
    ];

    let mut body = String::new();
    for (measurement, fields) in points {
        let fields: Vec<String> = fields.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        let _ = writeln!(body, "{} {} {}", measurement, fields.join(","), timestamp_ns);
    }
    body
}

/// Line-protocol `app_metrics` point; counters are written as integers.
pub fn metrics_line(metrics: &ProcessMetrics, timestamp_ns: i64) -> String {
    let mut fields = vec![
        format!("uptime_seconds={}", metrics.uptime().as_secs_f64()),
        format!("serial_restarts={}i", metrics.serial_restarts()),
    ];
    for channel in SinkChannel::ALL {
        let stats = metrics.stats(channel);
        let label = channel.label();
        fields.push(format!("{}_last_success={}i", label, u8::from(stats.last_success())));
        fields.push(format!("{}_failures={}i", label, stats.failures()));
        fields.push(format!("{}_successes={}i", label, stats.successes()));
    }
    format!("app_metrics {} {}\n", fields.join(","), timestamp_ns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Query, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::Router;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    type Captured = Arc<Mutex<Vec<(HashMap<String, String>, Option<String>, String)>>>;

    async fn record(
        State(captured): State<Captured>,
        Query(query): Query<HashMap<String, String>>,
        headers: HeaderMap,
        body: String,
    ) -> StatusCode {
        let auth = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        captured.lock().unwrap().push((query, auth, body));
        StatusCode::NO_CONTENT
    }

    async fn fake_server() -> (u16, Captured) {
        let captured: Captured = Arc::default();
        let app = Router::new()
            .route("/write", post(record))
            .route("/api/v2/write", post(record))
            .with_state(Arc::clone(&captured));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (port, captured)
    }

    fn config(port: u16, version: InfluxVersion) -> InfluxSinkConfig {
        InfluxSinkConfig {
            host: "127.0.0.1".into(),
            port,
            version,
            database: "smartmeter".into(),
            organization: "home".into(),
            username: Some("reader".into()),
            password: Some("s3cret".into()),
            send_values: true,
            send_metrics: true,
        }
    }

    #[test]
    fn test_value_lines() {
        let mut registry = MeasurementRegistry::new();
        registry.set(&"0100010700FF".parse().unwrap(), 850);
        registry.set(&"0100020700FF".parse().unwrap(), 50);

        let body = value_lines(&registry, 42);
        let lines: Vec<&str> = body.lines().collect();

        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], "Wirkenergie Bezug=0,Lieferung=0 42");
        assert_eq!(lines[1], "Momentanleistung Bezug=850,Lieferung=50,Gesamt=800 42");
        assert_eq!(lines[4], "Leistungsfaktor value=0 42");
    }

    #[test]
    fn test_metrics_line() {
        let metrics = ProcessMetrics::new();
        metrics.inc_serial_restarts();
        metrics.record(SinkChannel::MessageBus, false);

        let line = metrics_line(&metrics, 7);

        assert!(line.starts_with("app_metrics uptime_seconds="));
        assert!(line.contains(",serial_restarts=1i,"));
        assert!(line.contains("mqtt_last_success=0i,mqtt_failures=1i,mqtt_successes=0i"));
        assert!(line.contains("influxdb_last_success=1i"));
        assert!(line.ends_with(" 7\n"));
    }

    #[test]
    fn test_write_url_per_version() {
        let v1 = InfluxSink::new(config(8086, InfluxVersion::V1)).unwrap();
        let v3 = InfluxSink::new(config(8086, InfluxVersion::V3)).unwrap();
        assert_eq!(v1.write_url(), "http://127.0.0.1:8086/write");
        assert_eq!(v3.write_url(), "http://127.0.0.1:8086/api/v2/write");
        assert_eq!(InfluxVersion::try_from(4), Err(4));
    }

    #[test]
    fn test_channel_only_when_sending_values() {
        let mut cfg = config(8086, InfluxVersion::V2);
        cfg.send_values = false;
        assert_eq!(InfluxSink::new(cfg).unwrap().channel(), None);
    }

    #[tokio::test]
    async fn test_v2_write_uses_token() {
        let (port, captured) = fake_server().await;
        let mut sink = InfluxSink::new(config(port, InfluxVersion::V2)).unwrap();

        assert!(sink.publish(&MeasurementRegistry::new()).await);

        let captured = captured.lock().unwrap();
        let (query, auth, body) = &captured[0];
        assert_eq!(query.get("bucket").map(String::as_str), Some("smartmeter"));
        assert_eq!(query.get("org").map(String::as_str), Some("home"));
        assert_eq!(auth.as_deref(), Some("Token s3cret"));
        assert!(body.starts_with("Wirkenergie "));
    }

    #[tokio::test]
    async fn test_v1_write_uses_basic_auth() {
        let (port, captured) = fake_server().await;
        let mut sink = InfluxSink::new(config(port, InfluxVersion::V1)).unwrap();

        assert!(sink.report_metrics(&ProcessMetrics::new()).await);

        let captured = captured.lock().unwrap();
        let (query, auth, body) = &captured[0];
        assert_eq!(query.get("db").map(String::as_str), Some("smartmeter"));
        assert!(auth.as_deref().unwrap().starts_with("Basic "));
        assert!(body.starts_with("app_metrics "));
    }

    #[tokio::test]
    async fn test_unreachable_server_fails() {
        let mut sink = InfluxSink::new(config(1, InfluxVersion::V2)).unwrap();
        assert!(!sink.publish(&MeasurementRegistry::new()).await);
    }
}
