//! OBIS object identifiers.
//!
//! An OBIS code names a metered quantity with six value groups `A-B:C.D.E*F`.
//! On the wire it travels as a 6-byte octet string; the registry keys it by
//! its 12-character upper-case hex rendering.

use crate::constants::OBIS_LEN;
use crate::util::hex::{decode_hex, encode_hex_upper};
use std::fmt;
use std::str::FromStr;

/// A 6-byte OBIS code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObisCode([u8; OBIS_LEN]);

impl ObisCode {
    pub const fn new(bytes: [u8; OBIS_LEN]) -> Self {
        Self(bytes)
    }

    /// Interpret an octet-string value; only 6-byte strings are OBIS codes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let array: [u8; OBIS_LEN] = bytes.try_into().ok()?;
        Some(Self(array))
    }

    pub fn as_bytes(&self) -> &[u8; OBIS_LEN] {
        &self.0
    }

    /// Dotted decimal form, e.g. `1.0.1.8.0.255`
    pub fn dotted(&self) -> String {
        self.0
            .iter()
            .map(|b| b.to_string())
            .collect::<Vec<_>>()
            .join(".")
    }
}

/// Canonical 12-character hex rendering, e.g. `0100010800FF`
impl fmt::Display for ObisCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&encode_hex_upper(&self.0))
    }
}

impl FromStr for ObisCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = decode_hex(s).map_err(|e| e.to_string())?;
        Self::from_slice(&bytes).ok_or_else(|| format!("OBIS code needs 6 bytes, got {}", bytes.len()))
    }
}
