//! # Meter Link
//!
//! Physical side of the customer interface: the serial transport with its
//! resynchronisation policy and the M-Bus wrapper frame around the encrypted
//! DLMS payload.

pub mod frame;
pub mod serial;
pub mod serial_mock;

pub use frame::{parse_wrapper_frame, FrameError, WrapperFrame};
pub use serial::{PortOpener, SerialConfig, SerialLink, SerialPortOpener, Transport};
