//! # Meter Reader
//!
//! The acquisition loop. One cycle reads chunks from the transport until a
//! frame validates, decrypts and decodes, applies it to the registry and
//! dispatches the registry to the sinks:
//!
//! ```text
//! Await ──▶ Validate ──▶ Decrypt ──▶ Decode ──▶ Dispatch
//!   ▲           │           │          │
//!   │           ▼           ▼          ▼
//!   └──── Reconnect { pause: false | true }
//! ```
//!
//! A bad wrapper frame reconnects without extra pause. Decryption, decoding
//! and read errors reconnect and then pause for one second. Only exhausting
//! the open attempts ends the loop.

use crate::constants::RETRY_PAUSE;
use crate::dlms::apdu::{decode_into, DecodeSummary};
use crate::dlms::crypto::Decryptor;
use crate::error::MeterError;
use crate::instrumentation::metrics::ProcessMetrics;
use crate::meter::frame::parse_wrapper_frame;
use crate::meter::serial::{PortOpener, Transport};
use crate::registry::MeasurementRegistry;
use crate::sinks::{dispatch, Sink, SinkOutcome};
use crate::util::hex::encode_hex;
use crate::util::logging::{log_frame_hex, LogThrottle};
use log::{debug, error, info, trace, warn, Level};
use std::sync::Arc;
use tokio::time::sleep;

/// Resync warnings allowed per minute
const RESYNC_WARNINGS_PER_MINUTE: u32 = 5;

/// Steps of one read cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    /// Waiting for the next chunk from the link
    Await,
    /// Checking the wrapper frame
    Validate,
    /// Applying the keystream
    Decrypt,
    /// Walking the data-notification into the registry
    Decode,
    /// Handing the registry to the sinks
    Dispatch,
    /// Reopening the link, optionally followed by the retry pause
    Reconnect { pause: bool },
}

/// Result of a completed cycle
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub decoded: DecodeSummary,
    pub sinks: Vec<SinkOutcome>,
    /// Reconnects needed before a frame decoded
    pub reconnects: u32,
}

/// Encrypted payload and nonce parts copied out of a validated frame
struct SealedPayload {
    system_title: [u8; 8],
    frame_counter: [u8; 4],
    ciphertext: Vec<u8>,
}

/// Drives transport, decryption, decoding and dispatch for one meter.
pub struct MeterReader<O: PortOpener> {
    transport: Transport<O>,
    decryptor: Decryptor,
    registry: MeasurementRegistry,
    metrics: Arc<ProcessMetrics>,
    sinks: Vec<Box<dyn Sink>>,
    resync_throttle: LogThrottle,
}

impl<O: PortOpener> MeterReader<O> {
    pub fn new(
        transport: Transport<O>,
        decryptor: Decryptor,
        registry: MeasurementRegistry,
        metrics: Arc<ProcessMetrics>,
    ) -> Self {
        Self {
            transport,
            decryptor,
            registry,
            metrics,
            sinks: Vec::new(),
            resync_throttle: LogThrottle::new(60_000, RESYNC_WARNINGS_PER_MINUTE),
        }
    }

    /// Add a sink; sinks are dispatched in the order they were added.
    pub fn add_sink(&mut self, sink: Box<dyn Sink>) {
        info!("Sink {} enabled", sink.name());
        self.sinks.push(sink);
    }

    pub fn with_sink(mut self, sink: Box<dyn Sink>) -> Self {
        self.add_sink(sink);
        self
    }

    pub fn registry(&self) -> &MeasurementRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> &Arc<ProcessMetrics> {
        &self.metrics
    }

    pub fn transport(&self) -> &Transport<O> {
        &self.transport
    }

    /// Run cycles until a fatal error occurs.
    pub async fn run(&mut self) -> Result<(), MeterError> {
        loop {
            let report = self.run_cycle().await?;
            trace!("Cycle complete: {:?}", report);
        }
    }

    /// Run one cycle up to a dispatched frame.
    ///
    /// Every recoverable failure is handled inside the cycle. The only
    /// error returned is a fatal one from the transport.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, MeterError> {
        let mut phase = CyclePhase::Await;
        let mut raw: Vec<u8> = Vec::new();
        let mut sealed: Option<SealedPayload> = None;
        let mut plaintext: Option<Vec<u8>> = None;
        let mut decoded: Option<DecodeSummary> = None;
        let mut reconnects = 0;

        loop {
            trace!("Cycle phase {:?}", phase);
            phase = match phase {
                CyclePhase::Await => {
                    raw.clear();
                    match self.transport.read_frame().await {
                        Ok(chunk) => {
                            raw = chunk;
                            CyclePhase::Validate
                        }
                        Err(e) if e.is_fatal() => return Err(e),
                        Err(e) => {
                            self.log_failure(&e, &raw, None);
                            CyclePhase::Reconnect { pause: true }
                        }
                    }
                }

                CyclePhase::Validate => match parse_wrapper_frame(&raw) {
                    Ok(frame) => {
                        info!("Daten ok");
                        if frame.is_short() {
                            debug!(
                                "Frame announces {} ciphertext bytes, {} received",
                                frame.announced_ciphertext_len(),
                                frame.ciphertext.len()
                            );
                        }
                        debug!(
                            "System title {}, frame counter {}",
                            encode_hex(&frame.system_title),
                            frame.invocation_counter()
                        );
                        sealed = Some(SealedPayload {
                            system_title: frame.system_title,
                            frame_counter: frame.frame_counter,
                            ciphertext: frame.ciphertext.to_vec(),
                        });
                        CyclePhase::Decrypt
                    }
                    Err(e) => {
                        self.warn_resync(&MeterError::from(e));
                        log_frame_hex(Level::Debug, "Discarded serial data", &raw);
                        CyclePhase::Reconnect { pause: false }
                    }
                },

                CyclePhase::Decrypt => {
                    let result = match &sealed {
                        Some(payload) => self
                            .decryptor
                            .decrypt(&payload.system_title, &payload.frame_counter, &payload.ciphertext)
                            .map_err(MeterError::from),
                        None => Err(MeterError::Other("no validated frame to decrypt".into())),
                    };
                    match result {
                        Ok(apdu) => {
                            plaintext = Some(apdu);
                            CyclePhase::Decode
                        }
                        Err(e) => {
                            self.log_failure(&e, &raw, None);
                            CyclePhase::Reconnect { pause: true }
                        }
                    }
                }

                CyclePhase::Decode => {
                    let apdu = plaintext.as_deref().unwrap_or_default();
                    match decode_into(apdu, &mut self.registry) {
                        Ok(summary) => {
                            match summary.timestamp {
                                Some(ts) => debug!(
                                    "Notification {:#010x} from {} updated {} values",
                                    summary.invoke_id, ts, summary.updated
                                ),
                                None => debug!(
                                    "Notification {:#010x} updated {} values",
                                    summary.invoke_id, summary.updated
                                ),
                            }
                            decoded = Some(summary);
                            CyclePhase::Dispatch
                        }
                        Err(e) => {
                            self.log_failure(&MeterError::from(e), &raw, Some(apdu));
                            CyclePhase::Reconnect { pause: true }
                        }
                    }
                }

                CyclePhase::Dispatch => match decoded.take() {
                    Some(decoded) => {
                        let sinks = dispatch(&mut self.sinks, &self.registry, &self.metrics).await;
                        return Ok(CycleReport {
                            decoded,
                            sinks,
                            reconnects,
                        });
                    }
                    None => CyclePhase::Await,
                },

                CyclePhase::Reconnect { pause } => {
                    reconnects += 1;
                    self.transport.reconnect().await?;
                    if pause {
                        sleep(RETRY_PAUSE).await;
                    }
                    CyclePhase::Await
                }
            };
        }
    }

    fn warn_resync(&mut self, reason: &MeterError) {
        if self.resync_throttle.allow() {
            let suppressed = self.resync_throttle.take_suppressed();
            if suppressed > 0 {
                warn!("{}, restarting ({} similar warnings suppressed)", reason, suppressed);
            } else {
                warn!("{}, restarting", reason);
            }
        }
    }

    fn log_failure(&self, err: &MeterError, raw: &[u8], plaintext: Option<&[u8]>) {
        error!("Error in serial read loop: {}", err);
        if raw.is_empty() {
            error!("Original serial data: not available");
        } else {
            log_frame_hex(Level::Error, "Original serial data", raw);
        }
        match plaintext {
            Some(apdu) => log_frame_hex(Level::Error, "Decrypted APDU", apdu),
            None => error!("Decrypted APDU: not available"),
        }
    }
}
