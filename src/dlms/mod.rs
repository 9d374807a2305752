//! # DLMS/COSEM
//!
//! Decryption and decoding of the data-notification the meter pushes:
//! AES-GCM keystream, the A-XDR item walk and OBIS identifiers.

pub mod apdu;
pub mod crypto;
pub mod obis;

pub use apdu::{decode_into, decode_notification, ApduError, DataItem, DataNotification, DecodeSummary};
pub use crypto::{CryptoError, Decryptor, MeterKey};
pub use obis::ObisCode;
