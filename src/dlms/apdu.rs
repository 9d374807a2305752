//! # Data-Notification Decoder
//!
//! Decodes the decrypted APDU pushed by the meter. The APDU is a DLMS
//! data-notification:
//!
//! ```text
//! 0F                      data-notification tag
//! 80 xx xx xx             long-invoke-id-and-priority (first byte 0x80)
//! 0C <12 bytes> | 00      date-time, length prefixed
//! <data>                  notification body, one A-XDR data item
//! ```
//!
//! The body is walked with `nom` and flattened into document order: an array
//! or structure contributes one container item followed by its children. The
//! meter lists its values as `octet-string(OBIS), value, ...`, so a known OBIS
//! code is paired with the item right after it. Bytes after the body are
//! ignored, since the ciphertext slice also covers the link trailer.

use crate::constants::{COSEM_DATE_TIME_LEN, DATA_NOTIFICATION_TAG};
use crate::dlms::obis::ObisCode;
use crate::registry::MeasurementRegistry;
use chrono::NaiveDateTime;
use nom::bytes::complete::take;
use nom::error::ErrorKind;
use nom::number::complete::{be_f32, be_f64, be_u16, be_u32, be_u64, be_u8};
use nom::IResult;
use thiserror::Error;

/// Containers nested deeper than this are rejected.
const MAX_NESTING: usize = 16;

/// Errors raised while decoding a decrypted APDU.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApduError {
    /// The payload does not start with the data-notification discriminator.
    #[error("not a data-notification: tag 0x{0:04x}, expected 0x0f80")]
    UnexpectedTag(u16),

    /// Fewer than two bytes were decrypted.
    #[error("APDU too short: {0} bytes")]
    TooShort(usize),

    /// The item walk met a type tag it cannot size.
    #[error("unsupported data type 0x{tag:02x} at byte {offset}")]
    UnsupportedType { tag: u8, offset: usize },

    /// The item walk met an invalid length or value.
    #[error("malformed APDU at byte {offset}")]
    Malformed { offset: usize },

    /// The payload ended inside an item, as when a telegram continues in a
    /// second M-Bus frame that is not part of the ciphertext.
    #[error("APDU ends inside an item at byte {offset}")]
    Truncated { offset: usize },

    /// Structures nested beyond the supported depth.
    #[error("data nested deeper than {0} levels")]
    TooDeep(usize),
}

/// One A-XDR data item of the notification body.
#[derive(Debug, Clone, PartialEq)]
pub enum DataItem {
    Null,
    Boolean(bool),
    BitString { bits: usize, bytes: Vec<u8> },
    /// integer, long, double-long, long64, carried as the unsigned value of
    /// their big-endian bytes
    Integer(u64),
    /// unsigned, long-unsigned, double-long-unsigned, long64-unsigned
    Unsigned(u64),
    Enum(u8),
    Bcd(u8),
    Float(f64),
    OctetString(Vec<u8>),
    VisibleString(Vec<u8>),
    Utf8String(Vec<u8>),
    DateTime(Vec<u8>),
    Date(Vec<u8>),
    Time(Vec<u8>),
    /// Array header with its element count; the elements follow
    Array(usize),
    /// Structure header with its member count; the members follow
    Structure(usize),
}

impl DataItem {
    /// Unsigned value of a numeric item; signed types are not sign-extended.
    pub fn as_unsigned(&self) -> Option<u64> {
        match self {
            DataItem::Integer(v) | DataItem::Unsigned(v) => Some(*v),
            DataItem::Enum(v) => Some(u64::from(*v)),
            _ => None,
        }
    }
}

/// A decoded data-notification.
#[derive(Debug, Clone, PartialEq)]
pub struct DataNotification {
    pub invoke_id: u32,
    /// Raw COSEM date-time from the header, if the meter sent one
    pub date_time: Option<Vec<u8>>,
    /// Body items in document order
    pub items: Vec<DataItem>,
}

impl DataNotification {
    /// Meter clock at the time of the push.
    pub fn timestamp(&self) -> Option<NaiveDateTime> {
        self.date_time.as_deref().and_then(cosem_date_time)
    }
}

/// Outcome of decoding one APDU into the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeSummary {
    pub invoke_id: u32,
    pub timestamp: Option<NaiveDateTime>,
    /// Registry entries updated from this APDU
    pub updated: usize,
}

/// Decode a decrypted APDU into its header fields and flattened body items.
pub fn decode_notification(apdu: &[u8]) -> Result<DataNotification, ApduError> {
    if apdu.len() < 2 {
        return Err(ApduError::TooShort(apdu.len()));
    }
    let tag = u16::from_be_bytes([apdu[0], apdu[1]]);
    if tag != DATA_NOTIFICATION_TAG {
        return Err(ApduError::UnexpectedTag(tag));
    }

    let mut walker = ItemWalker::new(apdu);
    let (input, invoke_id) = walker.lift(be_u32(&apdu[1..]))?;
    let (input, date_time_len) = walker.lift(be_u8(input))?;
    let (input, date_time) = walker.lift(take(date_time_len as usize)(input))?;
    let (_trailer, ()) = walker.item(input, 0)?;

    Ok(DataNotification {
        invoke_id,
        date_time: (!date_time.is_empty()).then(|| date_time.to_vec()),
        items: walker.items,
    })
}

/// Pair every known OBIS code with the numeric item that follows it.
///
/// Octet strings that are not known identifiers are skipped, as are known
/// identifiers whose next item is not numeric.
pub fn extract_readings(items: &[DataItem], registry: &MeasurementRegistry) -> Vec<(ObisCode, u64)> {
    let mut readings = Vec::new();
    for (i, item) in items.iter().enumerate() {
        let DataItem::OctetString(bytes) = item else {
            continue;
        };
        let Some(obis) = ObisCode::from_slice(bytes) else {
            continue;
        };
        if !registry.contains(&obis) {
            continue;
        }
        if let Some(value) = items.get(i + 1).and_then(DataItem::as_unsigned) {
            readings.push((obis, value));
        }
    }
    readings
}

/// Decode an APDU and store its readings.
///
/// The registry is only touched when the whole APDU decoded.
pub fn decode_into(apdu: &[u8], registry: &mut MeasurementRegistry) -> Result<DecodeSummary, ApduError> {
    let notification = decode_notification(apdu)?;
    let readings = extract_readings(&notification.items, registry);
    for (obis, value) in &readings {
        registry.set(obis, *value);
    }

    Ok(DecodeSummary {
        invoke_id: notification.invoke_id,
        timestamp: notification.timestamp(),
        updated: readings.len(),
    })
}

/// Decode a 12-byte COSEM date-time; unspecified fields fall back to zero.
pub fn cosem_date_time(bytes: &[u8]) -> Option<NaiveDateTime> {
    if bytes.len() != COSEM_DATE_TIME_LEN {
        return None;
    }
    let year = u16::from_be_bytes([bytes[0], bytes[1]]);
    if year == 0xFFFF {
        return None;
    }
    let field = |b: u8| if b == 0xFF { 0 } else { u32::from(b) };
    chrono::NaiveDate::from_ymd_opt(i32::from(year), u32::from(bytes[2]), u32::from(bytes[3]))?
        .and_hms_milli_opt(field(bytes[5]), field(bytes[6]), field(bytes[7]), field(bytes[8]) * 10)
}

type WalkResult<'a, T> = Result<(&'a [u8], T), ApduError>;

/// Flattens A-XDR items into document order.
struct ItemWalker<'a> {
    apdu: &'a [u8],
    items: Vec<DataItem>,
}

impl<'a> ItemWalker<'a> {
    fn new(apdu: &'a [u8]) -> Self {
        Self {
            apdu,
            items: Vec::new(),
        }
    }

    fn offset(&self, rest: &[u8]) -> usize {
        self.apdu.len() - rest.len()
    }

    /// Turn a nom result into a walk result carrying the failing offset.
    fn lift<T>(&self, result: IResult<&'a [u8], T>) -> WalkResult<'a, T> {
        result.map_err(|e| match e {
            nom::Err::Error(err) | nom::Err::Failure(err) if err.code == ErrorKind::Eof => {
                ApduError::Truncated {
                    offset: self.offset(err.input),
                }
            }
            nom::Err::Error(err) | nom::Err::Failure(err) => ApduError::Malformed {
                offset: self.offset(err.input),
            },
            nom::Err::Incomplete(_) => ApduError::Truncated {
                offset: self.apdu.len(),
            },
        })
    }

    /// A-XDR length: one byte below 0x80, else 0x8N followed by N bytes.
    fn length(&self, input: &'a [u8]) -> WalkResult<'a, usize> {
        let (input, first) = self.lift(be_u8(input))?;
        if first & 0x80 == 0 {
            return Ok((input, usize::from(first)));
        }
        let width = usize::from(first & 0x7F);
        if width == 0 || width > 4 {
            return Err(ApduError::Malformed {
                offset: self.offset(input) - 1,
            });
        }
        let (input, bytes) = self.lift(take(width)(input))?;
        let len = bytes.iter().fold(0usize, |acc, b| (acc << 8) | usize::from(*b));
        Ok((input, len))
    }

    fn octets(&self, input: &'a [u8]) -> WalkResult<'a, Vec<u8>> {
        let (input, len) = self.length(input)?;
        let (input, bytes) = self.lift(take(len)(input))?;
        Ok((input, bytes.to_vec()))
    }

    fn fixed(&self, input: &'a [u8], len: usize) -> WalkResult<'a, Vec<u8>> {
        let (input, bytes) = self.lift(take(len)(input))?;
        Ok((input, bytes.to_vec()))
    }

    fn item(&mut self, input: &'a [u8], depth: usize) -> WalkResult<'a, ()> {
        if depth > MAX_NESTING {
            return Err(ApduError::TooDeep(MAX_NESTING));
        }
        let tag_offset = self.offset(input);
        let (input, tag) = self.lift(be_u8(input))?;

        let (input, item) = match tag {
            0x00 => (input, DataItem::Null),
            0x01 | 0x02 => {
                let (mut input, count) = self.length(input)?;
                self.items.push(if tag == 0x01 {
                    DataItem::Array(count)
                } else {
                    DataItem::Structure(count)
                });
                for _ in 0..count {
                    let (rest, ()) = self.item(input, depth + 1)?;
                    input = rest;
                }
                return Ok((input, ()));
            }
            0x03 => {
                let (i, v) = self.lift(be_u8(input))?;
                (i, DataItem::Boolean(v != 0))
            }
            0x04 => {
                let (i, bits) = self.length(input)?;
                let (i, bytes) = self.fixed(i, bits.div_ceil(8))?;
                (i, DataItem::BitString { bits, bytes })
            }
            0x05 => {
                let (i, v) = self.lift(be_u32(input))?;
                (i, DataItem::Integer(u64::from(v)))
            }
            0x06 => {
                let (i, v) = self.lift(be_u32(input))?;
                (i, DataItem::Unsigned(u64::from(v)))
            }
            0x09 => {
                let (i, v) = self.octets(input)?;
                (i, DataItem::OctetString(v))
            }
            0x0A => {
                let (i, v) = self.octets(input)?;
                (i, DataItem::VisibleString(v))
            }
            0x0C => {
                let (i, v) = self.octets(input)?;
                (i, DataItem::Utf8String(v))
            }
            0x0D => {
                let (i, v) = self.lift(be_u8(input))?;
                (i, DataItem::Bcd(v))
            }
            0x0F => {
                let (i, v) = self.lift(be_u8(input))?;
                (i, DataItem::Integer(u64::from(v)))
            }
            0x10 => {
                let (i, v) = self.lift(be_u16(input))?;
                (i, DataItem::Integer(u64::from(v)))
            }
            0x11 => {
                let (i, v) = self.lift(be_u8(input))?;
                (i, DataItem::Unsigned(u64::from(v)))
            }
            0x12 => {
                let (i, v) = self.lift(be_u16(input))?;
                (i, DataItem::Unsigned(u64::from(v)))
            }
            0x14 => {
                let (i, v) = self.lift(be_u64(input))?;
                (i, DataItem::Integer(v))
            }
            0x15 => {
                let (i, v) = self.lift(be_u64(input))?;
                (i, DataItem::Unsigned(v))
            }
            0x16 => {
                let (i, v) = self.lift(be_u8(input))?;
                (i, DataItem::Enum(v))
            }
            0x17 => {
                let (i, v) = self.lift(be_f32(input))?;
                (i, DataItem::Float(f64::from(v)))
            }
            0x18 => {
                let (i, v) = self.lift(be_f64(input))?;
                (i, DataItem::Float(v))
            }
            0x19 => {
                let (i, v) = self.fixed(input, COSEM_DATE_TIME_LEN)?;
                (i, DataItem::DateTime(v))
            }
            0x1A => {
                let (i, v) = self.fixed(input, 5)?;
                (i, DataItem::Date(v))
            }
            0x1B => {
                let (i, v) = self.fixed(input, 4)?;
                (i, DataItem::Time(v))
            }
            other => {
                return Err(ApduError::UnsupportedType {
                    tag: other,
                    offset: tag_offset,
                })
            }
        };

        self.items.push(item);
        Ok((input, ()))
    }
}
