//! # Wrapper Frame Codec
//!
//! The meter pushes its encrypted DLMS data-notification inside an M-Bus
//! long frame. This module validates the long-frame marker and slices the
//! fixed-offset header fields out of a raw read buffer, using `nom` for the
//! header walk.
//!
//! ```text
//! offset  size    field
//! 0       1       0x68
//! 1       1       length L
//! 2       1       L (repeated)
//! 3       1       0x68
//! 11      8       system title
//! 22      4       frame counter
//! 26      L-20    ciphertext
//! ```
//!
//! The offsets are those of the observed meter and are not negotiated. The
//! length byte is trusted as-is: a ciphertext range reaching past the buffer
//! is clamped, and the short payload is left for the decoder to reject.
//!
//! ```rust
//! use smartmeter_rs::meter::frame::parse_wrapper_frame;
//!
//! let mut buf = vec![0u8; 141];
//! buf[..4].copy_from_slice(&[0x68, 0x87, 0x87, 0x68]);
//! let frame = parse_wrapper_frame(&buf).unwrap();
//! assert_eq!(frame.length, 0x87);
//! assert_eq!(frame.ciphertext.len(), 0x87 - 20);
//! ```

use crate::constants::{
    CIPHERTEXT_END_BIAS, CIPHERTEXT_OFFSET, FRAME_COUNTER_LEN, FRAME_COUNTER_OFFSET,
    SYSTEM_TITLE_LEN, SYSTEM_TITLE_OFFSET, WRAPPER_START,
};
use crate::util::hex::format_hex_compact;
use nom::bytes::complete::take;
use nom::number::complete::be_u8;
use nom::IResult;
use thiserror::Error;

/// Reasons a read buffer is not a usable wrapper frame.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Bytes 0..4 are not `68 L L 68`; the reader is out of sync with the meter.
    #[error("wrong M-Bus start {}", format_hex_compact(.0))]
    BadMarker([u8; 4]),

    /// Not even the fixed header fits into the buffer.
    #[error("frame too short: {actual} bytes, header needs {needed}")]
    Truncated { actual: usize, needed: usize },
}

/// Header fields and ciphertext of one wrapper frame, borrowed from the read buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrapperFrame<'a> {
    /// The M-Bus length byte
    pub length: u8,
    /// Per-device identifier, first part of the nonce
    pub system_title: [u8; SYSTEM_TITLE_LEN],
    /// Invocation counter, second part of the nonce
    pub frame_counter: [u8; FRAME_COUNTER_LEN],
    /// Encrypted APDU
    pub ciphertext: &'a [u8],
}

impl WrapperFrame<'_> {
    /// Ciphertext length announced by the length byte.
    pub fn announced_ciphertext_len(&self) -> usize {
        (self.length as usize + CIPHERTEXT_END_BIAS).saturating_sub(CIPHERTEXT_OFFSET)
    }

    /// True when the buffer ended before the announced ciphertext did.
    pub fn is_short(&self) -> bool {
        self.ciphertext.len() < self.announced_ciphertext_len()
    }

    /// Frame counter as a number, for logging.
    pub fn invocation_counter(&self) -> u32 {
        u32::from_be_bytes(self.frame_counter)
    }
}

/// Checks the `68 L L 68` long-frame marker.
pub fn has_wrapper_marker(buf: &[u8]) -> bool {
    buf.len() >= 4 && buf[0] == WRAPPER_START && buf[1] == buf[2] && buf[3] == WRAPPER_START
}

/// Validates the marker and slices header fields and ciphertext out of `buf`.
pub fn parse_wrapper_frame(buf: &[u8]) -> Result<WrapperFrame<'_>, FrameError> {
    if buf.len() < 4 {
        return Err(FrameError::Truncated {
            actual: buf.len(),
            needed: CIPHERTEXT_OFFSET,
        });
    }
    if !has_wrapper_marker(buf) {
        return Err(FrameError::BadMarker([buf[0], buf[1], buf[2], buf[3]]));
    }

    let (_, (length, title, counter)) = parse_header(buf).map_err(|_| FrameError::Truncated {
        actual: buf.len(),
        needed: CIPHERTEXT_OFFSET,
    })?;

    let mut system_title = [0u8; SYSTEM_TITLE_LEN];
    system_title.copy_from_slice(title);
    let mut frame_counter = [0u8; FRAME_COUNTER_LEN];
    frame_counter.copy_from_slice(counter);

    let end = (length as usize + CIPHERTEXT_END_BIAS).min(buf.len());
    let ciphertext: &[u8] = if end > CIPHERTEXT_OFFSET {
        &buf[CIPHERTEXT_OFFSET..end]
    } else {
        &[]
    };

    Ok(WrapperFrame {
        length,
        system_title,
        frame_counter,
        ciphertext,
    })
}

/// Walks the fixed header up to the first ciphertext byte.
fn parse_header(input: &[u8]) -> IResult<&[u8], (u8, &[u8], &[u8])> {
    let (input, _start) = be_u8(input)?;
    let (input, length) = be_u8(input)?;
    let (input, _) = take(SYSTEM_TITLE_OFFSET - 2)(input)?;
    let (input, title) = take(SYSTEM_TITLE_LEN)(input)?;
    let (input, _) = take(FRAME_COUNTER_OFFSET - SYSTEM_TITLE_OFFSET - SYSTEM_TITLE_LEN)(input)?;
    let (input, counter) = take(FRAME_COUNTER_LEN)(input)?;
    Ok((input, (length, title, counter)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_with_length(length: u8, total: usize) -> Vec<u8> {
        let mut buf: Vec<u8> = (0..total).map(|i| i as u8).collect();
        buf[0] = 0x68;
        buf[1] = length;
        buf[2] = length;
        buf[3] = 0x68;
        buf
    }

    #[test]
    fn test_marker() {
        assert!(has_wrapper_marker(&[0x68, 0x87, 0x87, 0x68]));
        assert!(!has_wrapper_marker(&[0x68, 0x87, 0x86, 0x68]));
        assert!(!has_wrapper_marker(&[0x10, 0x87, 0x87, 0x68]));
        assert!(!has_wrapper_marker(&[0x68, 0x87, 0x87]));
    }

    #[test]
    fn test_header_fields() {
        let buf = frame_with_length(0x87, 141);
        let frame = parse_wrapper_frame(&buf).unwrap();
        assert_eq!(frame.system_title, [11, 12, 13, 14, 15, 16, 17, 18]);
        assert_eq!(frame.frame_counter, [22, 23, 24, 25]);
        assert_eq!(frame.ciphertext, &buf[26..141]);
        assert!(!frame.is_short());
        assert_eq!(frame.invocation_counter(), 0x16171819);
    }

    #[test]
    fn test_length_past_buffer_is_clamped() {
        let buf = frame_with_length(0xFA, 141);
        let frame = parse_wrapper_frame(&buf).unwrap();
        assert_eq!(frame.ciphertext.len(), 141 - 26);
        assert_eq!(frame.announced_ciphertext_len(), 0xFA - 20);
        assert!(frame.is_short());
    }

    #[test]
    fn test_small_length_gives_empty_ciphertext() {
        let buf = frame_with_length(10, 141);
        let frame = parse_wrapper_frame(&buf).unwrap();
        assert!(frame.ciphertext.is_empty());
    }

    #[test]
    fn test_bad_marker() {
        let mut buf = frame_with_length(0x87, 141);
        buf[3] = 0x16;
        assert_eq!(
            parse_wrapper_frame(&buf),
            Err(FrameError::BadMarker([0x68, 0x87, 0x87, 0x16]))
        );
    }

    #[test]
    fn test_truncated() {
        let buf = frame_with_length(0x87, 20);
        assert!(matches!(
            parse_wrapper_frame(&buf),
            Err(FrameError::Truncated { actual: 20, .. })
        ));
        assert!(matches!(
            parse_wrapper_frame(&[0x68]),
            Err(FrameError::Truncated { actual: 1, .. })
        ));
    }
}
