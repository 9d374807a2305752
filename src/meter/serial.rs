//! # Serial Transport
//!
//! Owns the serial handle to the meter's customer interface (8 data bits, no
//! parity, 1 stop bit) and turns link trouble into the retry policy of the
//! reader:
//!
//! - opening the device is retried, but five consecutive failures are fatal
//! - a read blocks until a full chunk has arrived, empty reads are retried
//! - after a bad frame the link is cooled down, flushed and reopened
//!
//! The device itself is reached through [`PortOpener`], so the real
//! `tokio-serial` port and [`MockSerialPort`](crate::meter::serial_mock::MockSerialPort)
//! are interchangeable.

use crate::constants::{
    EMPTY_READ_PAUSE, MAX_OPEN_ATTEMPTS, OPEN_RETRY_DELAY, READ_CHUNK_LEN, RECONNECT_COOLDOWN,
};
use crate::error::MeterError;
use crate::instrumentation::metrics::ProcessMetrics;
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::sleep;
use tokio_serial::SerialPortBuilderExt;

/// An open link to the meter
#[async_trait::async_trait]
pub trait SerialLink: AsyncRead + Unpin + Send {
    /// Discard output not yet transmitted.
    async fn flush_output(&mut self) -> Result<(), std::io::Error>;
}

#[async_trait::async_trait]
impl SerialLink for tokio_serial::SerialStream {
    async fn flush_output(&mut self) -> Result<(), std::io::Error> {
        tokio_serial::SerialPort::clear(self, tokio_serial::ClearBuffer::Output)
            .map_err(std::io::Error::from)
    }
}

/// Opens links to one device
#[async_trait::async_trait]
pub trait PortOpener: Send {
    type Link: SerialLink;

    async fn open(&mut self) -> Result<Self::Link, MeterError>;

    /// Device name for log messages
    fn port_name(&self) -> &str;
}

/// Serial configuration of the customer interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    pub port: String,
    pub baudrate: u32,
}

/// Opens the configured device through `tokio-serial`.
#[derive(Debug, Clone)]
pub struct SerialPortOpener {
    config: SerialConfig,
}

impl SerialPortOpener {
    pub fn new(config: SerialConfig) -> Self {
        Self { config }
    }
}

#[async_trait::async_trait]
impl PortOpener for SerialPortOpener {
    type Link = tokio_serial::SerialStream;

    async fn open(&mut self) -> Result<Self::Link, MeterError> {
        let port = tokio_serial::new(&self.config.port, self.config.baudrate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .open_native_async()?;
        Ok(port)
    }

    fn port_name(&self) -> &str {
        &self.config.port
    }
}

/// Link state and retry bookkeeping for one meter.
pub struct Transport<O: PortOpener> {
    opener: O,
    link: Option<O::Link>,
    open_failures: u32,
    metrics: Arc<ProcessMetrics>,
}

impl<O: PortOpener> Transport<O> {
    /// Create a transport; the device is opened on the first [`connect`](Self::connect) or read.
    pub fn new(opener: O, metrics: Arc<ProcessMetrics>) -> Self {
        Self {
            opener,
            link: None,
            open_failures: 0,
            metrics,
        }
    }

    pub fn is_open(&self) -> bool {
        self.link.is_some()
    }

    /// Consecutive failed open attempts since the last successful one
    pub fn open_failures(&self) -> u32 {
        self.open_failures
    }

    pub fn port_name(&self) -> &str {
        self.opener.port_name()
    }

    /// Open the device.
    ///
    /// A failure is returned as is until it is the fifth in a row, which
    /// yields the fatal [`MeterError::OpenAttemptsExhausted`].
    pub async fn connect(&mut self) -> Result<(), MeterError> {
        match self.opener.open().await {
            Ok(link) => {
                info!("Opened serial port {}", self.opener.port_name());
                self.link = Some(link);
                self.open_failures = 0;
                Ok(())
            }
            Err(e) => {
                self.open_failures += 1;
                error!(
                    "Failed to open serial port {}: {} (Attempt {}/{})",
                    self.opener.port_name(),
                    e,
                    self.open_failures,
                    MAX_OPEN_ATTEMPTS
                );
                if self.open_failures >= MAX_OPEN_ATTEMPTS {
                    error!(
                        "Failed to open serial port {} times in a row. Exiting.",
                        MAX_OPEN_ATTEMPTS
                    );
                    return Err(MeterError::OpenAttemptsExhausted {
                        port: self.opener.port_name().to_string(),
                        attempts: self.open_failures,
                    });
                }
                Err(e)
            }
        }
    }

    /// Read one chunk of [`READ_CHUNK_LEN`] bytes, opening the device first if needed.
    ///
    /// Returns a fatal error only when opening is exhausted. I/O errors on
    /// an open link are returned for the caller to reconnect.
    pub async fn read_frame(&mut self) -> Result<Vec<u8>, MeterError> {
        let mut buf = vec![0u8; READ_CHUNK_LEN];
        let mut filled = 0;

        while filled < READ_CHUNK_LEN {
            if self.link.is_none() {
                if let Err(e) = self.connect().await {
                    if e.is_fatal() {
                        return Err(e);
                    }
                    sleep(OPEN_RETRY_DELAY).await;
                    continue;
                }
            }
            let Some(link) = self.link.as_mut() else {
                continue;
            };

            let n = link.read(&mut buf[filled..]).await?;
            if n == 0 {
                sleep(EMPTY_READ_PAUSE).await;
                continue;
            }
            filled += n;
        }

        debug!("Read {} bytes from {}", filled, self.opener.port_name());
        Ok(buf)
    }

    /// Cool down, flush and reopen the link.
    ///
    /// Counts one serial restart. A failed reopen is only logged and leaves
    /// the transport closed; the error is returned only when it is fatal.
    pub async fn reconnect(&mut self) -> Result<(), MeterError> {
        self.metrics.inc_serial_restarts();
        sleep(RECONNECT_COOLDOWN).await;

        let Some(mut link) = self.link.take() else {
            return match self.connect().await {
                Err(e) if e.is_fatal() => Err(e),
                _ => Ok(()),
            };
        };

        if let Err(e) = link.flush_output().await {
            warn!("Failed to flush serial port {}: {}", self.opener.port_name(), e);
        }
        drop(link);

        match self.opener.open().await {
            Ok(link) => {
                debug!("Reopened serial port {}", self.opener.port_name());
                self.link = Some(link);
            }
            Err(e) => error!("Failed to reconnect serial port: {}", e),
        }
        Ok(())
    }
}
