//! # Utility Modules
//!
//! Hex encoding/decoding and logging helpers shared by the link, protocol and
//! sink layers.

pub mod hex;
pub mod logging;

pub use hex::{decode_hex, encode_hex, encode_hex_upper, format_hex_compact};
pub use logging::{log_frame_hex, LogThrottle};
