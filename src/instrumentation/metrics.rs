//! # Process Metrics
//!
//! Health counters of the running reader: uptime, serial restarts and the
//! outcome of every write to the message bus and the time-series database.
//!
//! The acquisition task is the only writer. Exporters hold the same
//! `Arc<ProcessMetrics>` and read each field independently, so a reader may
//! observe a success counter one cycle ahead of its failure counter. That is
//! acceptable for monitoring output.
//!
//! ```rust
//! use smartmeter_rs::instrumentation::metrics::{ProcessMetrics, SinkChannel};
//!
//! let metrics = ProcessMetrics::new();
//! metrics.record(SinkChannel::MessageBus, false);
//! assert_eq!(metrics.stats(SinkChannel::MessageBus).failures(), 1);
//! assert!(!metrics.stats(SinkChannel::MessageBus).last_success());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Sink channels whose write outcomes are tracked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkChannel {
    /// MQTT broker
    MessageBus,
    /// InfluxDB
    TimeSeries,
}

impl SinkChannel {
    pub const ALL: [SinkChannel; 2] = [SinkChannel::MessageBus, SinkChannel::TimeSeries];

    /// Label used in exported metric names
    pub fn label(&self) -> &'static str {
        match self {
            SinkChannel::MessageBus => "mqtt",
            SinkChannel::TimeSeries => "influxdb",
        }
    }
}

impl fmt::Display for SinkChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Write outcome counters of one channel
#[derive(Debug)]
pub struct SinkStats {
    successes: AtomicU64,
    failures: AtomicU64,
    last_success: AtomicBool,
}

impl Default for SinkStats {
    fn default() -> Self {
        Self {
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            last_success: AtomicBool::new(true),
        }
    }
}

impl SinkStats {
    fn record(&self, ok: bool) {
        if ok {
            self.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        self.last_success.store(ok, Ordering::Relaxed);
    }

    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Outcome of the most recent write, `true` before the first one
    pub fn last_success(&self) -> bool {
        self.last_success.load(Ordering::Relaxed)
    }
}

/// Counters shared between the acquisition task and the exporters.
#[derive(Debug)]
pub struct ProcessMetrics {
    started: Instant,
    serial_restarts: AtomicU64,
    message_bus: SinkStats,
    time_series: SinkStats,
}

impl Default for ProcessMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessMetrics {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            serial_restarts: AtomicU64::new(0),
            message_bus: SinkStats::default(),
            time_series: SinkStats::default(),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn inc_serial_restarts(&self) {
        self.serial_restarts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn serial_restarts(&self) -> u64 {
        self.serial_restarts.load(Ordering::Relaxed)
    }

    /// Record the outcome of one write on `channel`.
    pub fn record(&self, channel: SinkChannel, ok: bool) {
        self.stats(channel).record(ok);
    }

    pub fn stats(&self, channel: SinkChannel) -> &SinkStats {
        match channel {
            SinkChannel::MessageBus => &self.message_bus,
            SinkChannel::TimeSeries => &self.time_series,
        }
    }

    /// Point-in-time copy for serialization and export.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let channel = |c: SinkChannel| {
            let stats = self.stats(c);
            ChannelSnapshot {
                channel: c,
                successes: stats.successes(),
                failures: stats.failures(),
                last_success: stats.last_success(),
            }
        };
        MetricsSnapshot {
            uptime_secs: self.uptime().as_secs_f64(),
            serial_restarts: self.serial_restarts(),
            channels: SinkChannel::ALL.iter().map(|&c| channel(c)).collect(),
        }
    }
}

/// Copy of one channel's counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSnapshot {
    pub channel: SinkChannel,
    pub successes: u64,
    pub failures: u64,
    pub last_success: bool,
}

/// Copy of all process metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: f64,
    pub serial_restarts: u64,
    pub channels: Vec<ChannelSnapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_initial_state() {
        let metrics = ProcessMetrics::new();
        assert_eq!(metrics.serial_restarts(), 0);
        for channel in SinkChannel::ALL {
            let stats = metrics.stats(channel);
            assert_eq!(stats.successes(), 0);
            assert_eq!(stats.failures(), 0);
            assert!(stats.last_success());
        }
    }

    #[test]
    fn test_channels_are_independent() {
        let metrics = ProcessMetrics::new();
        metrics.record(SinkChannel::MessageBus, false);
        metrics.record(SinkChannel::TimeSeries, true);
        metrics.record(SinkChannel::TimeSeries, true);

        assert_eq!(metrics.stats(SinkChannel::MessageBus).failures(), 1);
        assert_eq!(metrics.stats(SinkChannel::MessageBus).successes(), 0);
        assert_eq!(metrics.stats(SinkChannel::TimeSeries).successes(), 2);
        assert!(metrics.stats(SinkChannel::TimeSeries).last_success());
    }

    #[test]
    fn test_last_success_follows_latest_outcome() {
        let metrics = ProcessMetrics::new();
        metrics.record(SinkChannel::MessageBus, false);
        metrics.record(SinkChannel::MessageBus, true);
        assert!(metrics.stats(SinkChannel::MessageBus).last_success());
    }

    #[test]
    fn test_shared_across_threads() {
        let metrics = Arc::new(ProcessMetrics::new());
        let writer = Arc::clone(&metrics);
        std::thread::spawn(move || {
            for _ in 0..10 {
                writer.inc_serial_restarts();
            }
        })
        .join()
        .unwrap();
        assert_eq!(metrics.serial_restarts(), 10);
    }

    #[test]
    fn test_snapshot_serializes() {
        let metrics = ProcessMetrics::new();
        metrics.inc_serial_restarts();
        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(json["serial_restarts"], 1);
        assert_eq!(json["channels"][0]["channel"], "message_bus");
        assert_eq!(json["channels"][1]["last_success"], true);
    }
}
