//! # smartmeter-rs - Reader for DLMS/COSEM smart meter push frames
//!
//! Smart meters with a customer interface push an AES-GCM encrypted DLMS
//! data-notification over an M-Bus style serial link every few seconds.
//! This crate reads those frames, decrypts and decodes them into a registry
//! of named, unit-scaled measurements, and hands the registry to sinks.
//!
//! ## Features
//!
//! - Serial transport with resynchronisation and bounded open retries
//! - M-Bus wrapper frame validation
//! - AES-GCM keystream decryption with 128, 192 and 256 bit keys
//! - A-XDR data-notification decoding into OBIS/value pairs
//! - Console, MQTT, InfluxDB and Prometheus sinks
//! - JSON configuration and `env_logger` based logging
//!
//! ## Usage
//!
//! ```rust
//! use smartmeter_rs::{decode_into, Decryptor, MeasurementRegistry, MeterKey};
//!
//! let decryptor = Decryptor::new(MeterKey::from_hex("000102030405060708090A0B0C0D0E0F").unwrap());
//! let title = [0x4B, 0x46, 0x4D, 0x10, 0x20, 0x00, 0x00, 0x01];
//! let counter = [0x00, 0x00, 0x00, 0x01];
//!
//! // data-notification: 0100010800FF = 12345
//! let apdu = [
//!     0x0F, 0x80, 0x00, 0x00, 0x01, 0x00, 0x02, 0x02, 0x09, 0x06, 0x01, 0x00, 0x01, 0x08,
//!     0x00, 0xFF, 0x06, 0x00, 0x00, 0x30, 0x39,
//! ];
//! let ciphertext = decryptor.encrypt(&title, &counter, &apdu).unwrap();
//!
//! let mut registry = MeasurementRegistry::new();
//! let plaintext = decryptor.decrypt(&title, &counter, &ciphertext).unwrap();
//! decode_into(&plaintext, &mut registry).unwrap();
//! assert!((registry.display_of("WirkenergieP") - 12.345).abs() < 1e-9);
//! ```

pub mod config;
pub mod constants;
pub mod dlms;
pub mod error;
pub mod instrumentation;
pub mod logging;
pub mod meter;
pub mod meter_reader;
pub mod registry;
pub mod sinks;
pub mod util;

pub use crate::config::{Config, ConfigError};
pub use crate::error::MeterError;
pub use crate::logging::init_logger;

// Core pipeline
pub use dlms::{decode_into, ApduError, CryptoError, Decryptor, MeterKey, ObisCode};
pub use instrumentation::{ProcessMetrics, SinkChannel};
pub use meter::{parse_wrapper_frame, FrameError, SerialPortOpener, Transport, WrapperFrame};
pub use meter_reader::{CyclePhase, CycleReport, MeterReader};
pub use registry::{Measurement, MeasurementRegistry};

// Sinks
pub use sinks::{ConsoleSink, InfluxSink, MqttSink, PrometheusExporter, Sink};
