//! # Hex Encoding/Decoding Utilities
//!
//! Hex is how the pre-shared key is configured, how OBIS codes are keyed in
//! the measurement registry and how raw frames end up in the logs.
//!
//! ```rust
//! use smartmeter_rs::util::hex::{decode_hex, encode_hex_upper, format_hex_compact};
//!
//! let obis = [0x01, 0x00, 0x01, 0x08, 0x00, 0xFF];
//! assert_eq!(encode_hex_upper(&obis), "0100010800FF");
//! assert_eq!(decode_hex("01 00 01 08 00 ff").unwrap(), obis);
//! assert_eq!(format_hex_compact(&[0x68, 0x87, 0x87, 0x68]), "68 87 87 68");
//! ```

use thiserror::Error;

/// Errors that can occur during hex operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HexError {
    #[error("Odd number of hex characters: {0}")]
    OddLength(usize),

    #[error("Empty hex string")]
    EmptyString,

    #[error("Hex decoding error: {0}")]
    DecodeError(String),
}

/// Encode bytes to lowercase hex string
pub fn encode_hex(data: &[u8]) -> String {
    hex::encode(data)
}

/// Encode bytes to uppercase hex string (the canonical OBIS rendering)
pub fn encode_hex_upper(data: &[u8]) -> String {
    hex::encode_upper(data)
}

/// Decode hex string to bytes
///
/// Accepts both uppercase and lowercase hex characters.
/// Whitespace is automatically stripped.
pub fn decode_hex(hex_str: &str) -> Result<Vec<u8>, HexError> {
    let cleaned: String = hex_str.chars().filter(|c| !c.is_whitespace()).collect();

    if cleaned.is_empty() {
        return Err(HexError::EmptyString);
    }
    if cleaned.len() % 2 != 0 {
        return Err(HexError::OddLength(cleaned.len()));
    }

    hex::decode(&cleaned).map_err(|e| HexError::DecodeError(e.to_string()))
}

/// Format hex data for compact display (useful for logs)
///
/// Formats data as "68 87 87 68" with spaces between bytes.
pub fn format_hex_compact(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
