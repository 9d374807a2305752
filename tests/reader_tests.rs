//! End-to-end read cycles against the mock serial port.
//!
//! The clock is paused, so cooldowns and retry delays elapse instantly and
//! can be asserted on through `tokio::time::Instant`.

mod common;

use common::*;
use smartmeter_rs::meter::serial_mock::{MockPortOpener, MockSerialPort};
use smartmeter_rs::{
    MeasurementRegistry, MeterError, MeterReader, ProcessMetrics, Sink, SinkChannel, Transport,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Records the energy reading of every registry it is handed.
#[derive(Clone)]
struct RecordingSink {
    name: &'static str,
    channel: Option<SinkChannel>,
    succeed: bool,
    seen: Arc<Mutex<Vec<f64>>>,
}

impl RecordingSink {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            channel: None,
            succeed: true,
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn failing(name: &'static str, channel: SinkChannel) -> Self {
        Self {
            channel: Some(channel),
            succeed: false,
            ..Self::new(name)
        }
    }

    fn seen(&self) -> Vec<f64> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Sink for RecordingSink {
    fn name(&self) -> &'static str {
        self.name
    }

    fn channel(&self) -> Option<SinkChannel> {
        self.channel
    }

    async fn publish(&mut self, registry: &MeasurementRegistry) -> bool {
        self.seen
            .lock()
            .unwrap()
            .push(registry.display_of("WirkenergieP"));
        self.succeed
    }
}

fn setup() -> (MockSerialPort, MockPortOpener, MeterReader<MockPortOpener>) {
    let port = MockSerialPort::new();
    let opener = MockPortOpener::new(port.clone());
    let metrics = Arc::new(ProcessMetrics::new());
    let reader = MeterReader::new(
        Transport::new(opener.clone(), Arc::clone(&metrics)),
        decryptor(),
        MeasurementRegistry::new(),
        metrics,
    );
    (port, opener, reader)
}

#[tokio::test(start_paused = true)]
async fn test_cycle_dispatches_decoded_frame() {
    let (port, opener, mut reader) = setup();
    let sink = RecordingSink::new("recording");
    reader.add_sink(Box::new(sink.clone()));
    port.queue_rx_data(&meter_frame(1, &full_readings()));

    let report = reader.run_cycle().await.unwrap();

    assert_eq!(report.decoded.updated, 11);
    assert_eq!(report.decoded.invoke_id, 0x8000_0001);
    assert!(report.decoded.timestamp.is_some());
    assert_eq!(report.reconnects, 0);
    assert_eq!(report.sinks.len(), 1);
    assert!(report.sinks[0].published);
    assert!(report.sinks[0].metrics_reported);

    assert_eq!(sink.seen().len(), 1);
    assert!((sink.seen()[0] - 1234.567).abs() < 1e-9);
    assert_eq!(opener.open_attempts(), 1);
    assert_eq!(reader.metrics().serial_restarts(), 0);
    assert_eq!(port.pending_rx(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_bad_marker_reconnects_without_pause() {
    let (port, opener, mut reader) = setup();
    port.queue_rx_data(&noise());
    port.queue_rx_data(&meter_frame(2, &full_readings()));

    let start = Instant::now();
    let report = reader.run_cycle().await.unwrap();
    let elapsed = start.elapsed();

    assert_eq!(report.reconnects, 1);
    assert_eq!(reader.metrics().serial_restarts(), 1);
    assert_eq!(port.flush_count(), 1);
    assert_eq!(opener.open_attempts(), 2);
    assert!(elapsed >= Duration::from_millis(2500));
    assert!(elapsed < Duration::from_millis(3500));
}

#[tokio::test(start_paused = true)]
async fn test_decode_failure_reconnects_and_pauses() {
    let (port, _opener, mut reader) = setup();
    port.queue_rx_data(&sealed_frame(3, &[0x01, 0x02, 0x03, 0x04, 0x05, 0x06]));
    port.queue_rx_data(&meter_frame(4, &full_readings()));

    let start = Instant::now();
    let report = reader.run_cycle().await.unwrap();

    assert_eq!(report.reconnects, 1);
    assert_eq!(report.decoded.updated, 11);
    assert!(start.elapsed() >= Duration::from_millis(3500));
}

#[tokio::test(start_paused = true)]
async fn test_read_error_reconnects() {
    let (port, _opener, mut reader) = setup();
    port.set_next_error(std::io::Error::new(
        std::io::ErrorKind::BrokenPipe,
        "device disconnected",
    ));
    port.queue_rx_data(&meter_frame(5, &full_readings()));

    let report = reader.run_cycle().await.unwrap();
    assert_eq!(report.reconnects, 1);
    assert_eq!(reader.metrics().serial_restarts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_open_failures_are_retried() {
    let (port, opener, mut reader) = setup();
    opener.fail_next(2);
    port.queue_rx_data(&meter_frame(6, &full_readings()));

    let start = Instant::now();
    let report = reader.run_cycle().await.unwrap();

    assert_eq!(report.decoded.updated, 11);
    assert_eq!(opener.open_attempts(), 3);
    assert_eq!(reader.transport().open_failures(), 0);
    assert!(start.elapsed() >= Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn test_five_open_failures_end_the_reader() {
    let (port, opener, mut reader) = setup();
    opener.fail_next(5);
    port.queue_rx_data(&meter_frame(7, &full_readings()));

    let err = reader.run().await.unwrap_err();

    assert!(err.is_fatal());
    assert!(matches!(
        err,
        MeterError::OpenAttemptsExhausted { attempts: 5, .. }
    ));
    assert_eq!(opener.open_attempts(), 5);
    assert_eq!(port.pending_rx(), 282);
}

#[tokio::test(start_paused = true)]
async fn test_failing_sink_does_not_block_others() {
    let (port, _opener, mut reader) = setup();
    let broken = RecordingSink::failing("broken", SinkChannel::MessageBus);
    let healthy = RecordingSink::new("healthy");
    reader.add_sink(Box::new(broken.clone()));
    reader.add_sink(Box::new(healthy.clone()));
    port.queue_rx_data(&meter_frame(8, &full_readings()));

    let report = reader.run_cycle().await.unwrap();

    assert_eq!(report.sinks.len(), 2);
    assert!(!report.sinks[0].published);
    assert!(report.sinks[1].published);
    assert_eq!(broken.seen().len(), 1);
    assert_eq!(healthy.seen().len(), 1);

    let stats = reader.metrics().stats(SinkChannel::MessageBus);
    assert_eq!(stats.failures(), 1);
    assert!(!stats.last_success());
    assert_eq!(reader.metrics().stats(SinkChannel::TimeSeries).failures(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_registry_persists_across_cycles() {
    let (port, _opener, mut reader) = setup();
    let sink = RecordingSink::new("recording");
    reader.add_sink(Box::new(sink.clone()));
    port.queue_rx_data(&meter_frame(9, &full_readings()));
    port.queue_rx_data(&meter_frame(10, &[(ENERGY_IN, 1_234_999)]));

    reader.run_cycle().await.unwrap();
    reader.run_cycle().await.unwrap();

    let seen = sink.seen();
    assert_eq!(seen.len(), 2);
    assert!((seen[1] - 1234.999).abs() < 1e-9);
    assert!((reader.registry().display_of("SpannungL3") - 231.0).abs() < 1e-9);
}
