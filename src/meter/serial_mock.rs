//! Mock serial port implementation for testing
//!
//! In-memory stand-in for the meter link. Tests queue the bytes the meter
//! would push, inject I/O errors and script failing open attempts through
//! [`MockPortOpener`].

use crate::error::MeterError;
use crate::meter::serial::{PortOpener, SerialLink};
use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Mock serial port; clones share their buffers
#[derive(Clone, Default)]
pub struct MockSerialPort {
    /// Data to be read from the port (incoming)
    rx_buffer: Arc<Mutex<VecDeque<u8>>>,
    /// Error returned by the next operation
    next_error: Arc<Mutex<Option<io::Error>>>,
    /// Number of output flushes
    flushes: Arc<Mutex<u32>>,
}

impl MockSerialPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue data to be read from the port
    pub fn queue_rx_data(&self, data: &[u8]) {
        lock(&self.rx_buffer).extend(data);
    }

    /// Bytes queued but not read yet
    pub fn pending_rx(&self) -> usize {
        lock(&self.rx_buffer).len()
    }

    /// Set an error to be returned on the next operation
    pub fn set_next_error(&self, error: io::Error) {
        *lock(&self.next_error) = Some(error);
    }

    pub fn flush_count(&self) -> u32 {
        *lock(&self.flushes)
    }
}

impl AsyncRead for MockSerialPort {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if let Some(error) = lock(&self.next_error).take() {
            return Poll::Ready(Err(error));
        }

        // An empty queue reads as zero bytes, like a port without traffic
        let mut rx = lock(&self.rx_buffer);
        let available = rx.len().min(buf.remaining());
        if available > 0 {
            let data: Vec<u8> = rx.drain(..available).collect();
            buf.put_slice(&data);
        }

        Poll::Ready(Ok(()))
    }
}

#[async_trait::async_trait]
impl SerialLink for MockSerialPort {
    async fn flush_output(&mut self) -> Result<(), io::Error> {
        *lock(&self.flushes) += 1;
        Ok(())
    }
}

/// Hands out clones of one [`MockSerialPort`], failing on demand.
#[derive(Clone)]
pub struct MockPortOpener {
    port: MockSerialPort,
    name: String,
    failures_left: Arc<Mutex<u32>>,
    attempts: Arc<Mutex<u32>>,
}

impl MockPortOpener {
    pub fn new(port: MockSerialPort) -> Self {
        Self {
            port,
            name: "/dev/mock0".to_string(),
            failures_left: Arc::new(Mutex::new(0)),
            attempts: Arc::new(Mutex::new(0)),
        }
    }

    /// Let the next `count` open attempts fail
    pub fn fail_next(&self, count: u32) {
        *lock(&self.failures_left) = count;
    }

    /// Open attempts made so far, failed ones included
    pub fn open_attempts(&self) -> u32 {
        *lock(&self.attempts)
    }

    pub fn port(&self) -> &MockSerialPort {
        &self.port
    }
}

#[async_trait::async_trait]
impl PortOpener for MockPortOpener {
    type Link = MockSerialPort;

    async fn open(&mut self) -> Result<Self::Link, MeterError> {
        *lock(&self.attempts) += 1;
        let mut failures_left = lock(&self.failures_left);
        if *failures_left > 0 {
            *failures_left -= 1;
            return Err(MeterError::SerialPortError(format!(
                "could not open {}: No such file or directory",
                self.name
            )));
        }
        Ok(self.port.clone())
    }

    fn port_name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[test]
    fn test_mock_serial_port_creation() {
        let port = MockSerialPort::new();
        assert_eq!(port.pending_rx(), 0);
        assert_eq!(port.flush_count(), 0);
    }

    #[tokio::test]
    async fn test_queue_and_read_data() {
        let mut port = MockSerialPort::new();
        port.queue_rx_data(&[0x68, 0x87, 0x87, 0x68]);

        let mut buf = [0u8; 8];
        let n = port.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &[0x68, 0x87, 0x87, 0x68]);
        assert_eq!(port.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_flush_output_keeps_queued_input() {
        let mut port = MockSerialPort::new();
        port.queue_rx_data(&[1, 2, 3]);

        port.flush_output().await.unwrap();
        port.clone().flush_output().await.unwrap();
        assert_eq!(port.flush_count(), 2);
        assert_eq!(port.pending_rx(), 3);
    }

    #[tokio::test]
    async fn test_injected_error() {
        let mut port = MockSerialPort::new();
        port.set_next_error(io::Error::new(io::ErrorKind::TimedOut, "timeout"));
        let mut buf = [0u8; 4];
        assert!(port.read(&mut buf).await.is_err());
        assert!(port.read(&mut buf).await.is_ok());
    }

    #[tokio::test]
    async fn test_opener_scripted_failures() {
        let mut opener = MockPortOpener::new(MockSerialPort::new());
        opener.fail_next(2);
        assert!(opener.open().await.is_err());
        assert!(opener.open().await.is_err());
        assert!(opener.open().await.is_ok());
        assert_eq!(opener.open_attempts(), 3);
    }
}
