//! # DLMS Payload Decryption
//!
//! The meter encrypts each data-notification with AES-GCM under the
//! pre-shared customer-interface key. The 12-byte nonce is the system title
//! followed by the frame counter, both taken from the wrapper frame.
//!
//! Only the counter-mode half of GCM is applied here. The GHASH tag is not
//! verified, and the whole ciphertext slice (which on the wire also carries
//! link trailer bytes) is XORed with the keystream. A payload that decrypts to
//! garbage is caught afterwards by the data-notification tag check in
//! [`crate::dlms::apdu`].
//!
//! ```rust
//! use smartmeter_rs::dlms::crypto::{Decryptor, MeterKey};
//!
//! let key = MeterKey::from_hex("000102030405060708090A0B0C0D0E0F").unwrap();
//! let decryptor = Decryptor::new(key);
//! let title = [0x4B, 0x46, 0x4D, 0x10, 0x20, 0x00, 0x00, 0x01];
//! let counter = [0x00, 0x00, 0x00, 0x2A];
//!
//! let ciphertext = decryptor.encrypt(&title, &counter, &[0x0F, 0x80]).unwrap();
//! let plaintext = decryptor.decrypt(&title, &counter, &ciphertext).unwrap();
//! assert_eq!(plaintext, [0x0F, 0x80]);
//! ```

use crate::constants::{FRAME_COUNTER_LEN, SYSTEM_TITLE_LEN};
use crate::util::hex;
use aes::cipher::{BlockEncrypt, KeyInit};
use aes::{Aes128, Aes192, Aes256, Block};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// GCM nonce: system title followed by frame counter
pub type Nonce = [u8; SYSTEM_TITLE_LEN + FRAME_COUNTER_LEN];

/// Decryption errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CryptoError {
    #[error("Invalid key length: expected 16, 24 or 32 bytes, got {actual}")]
    InvalidKeyLength { actual: usize },

    #[error("Invalid key: {reason}")]
    InvalidKey { reason: String },
}

/// Pre-shared AES key of the customer interface.
///
/// The length is checked when the key is used, so a bad key costs one
/// dropped frame per cycle rather than a panic.
#[derive(Clone, PartialEq, Zeroize, ZeroizeOnDrop)]
pub struct MeterKey {
    bytes: Vec<u8>,
}

impl MeterKey {
    /// Create key from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            bytes: bytes.to_vec(),
        }
    }

    /// Create key from hex string
    pub fn from_hex(hex_str: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode_hex(hex_str).map_err(|e| CryptoError::InvalidKey {
            reason: e.to_string(),
        })?;
        Ok(Self { bytes })
    }

    /// Whether the key length selects one of the AES variants.
    pub fn has_valid_length(&self) -> bool {
        matches!(self.bytes.len(), 16 | 24 | 32)
    }

    /// Key length in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True for an empty key
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl std::fmt::Debug for MeterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MeterKey(<{} bytes redacted>)", self.bytes.len())
    }
}

/// Build the GCM nonce from the wrapper frame fields.
pub fn build_nonce(
    system_title: &[u8; SYSTEM_TITLE_LEN],
    frame_counter: &[u8; FRAME_COUNTER_LEN],
) -> Nonce {
    let mut nonce = [0u8; SYSTEM_TITLE_LEN + FRAME_COUNTER_LEN];
    nonce[..SYSTEM_TITLE_LEN].copy_from_slice(system_title);
    nonce[SYSTEM_TITLE_LEN..].copy_from_slice(frame_counter);
    nonce
}

/// AES block cipher for the key size in use
enum BlockCipher {
    Aes128(Aes128),
    Aes192(Aes192),
    Aes256(Aes256),
}

impl BlockCipher {
    fn new(key: &MeterKey) -> Result<Self, CryptoError> {
        let bytes = key.as_bytes();
        let invalid = |_| CryptoError::InvalidKeyLength {
            actual: bytes.len(),
        };
        match bytes.len() {
            16 => Aes128::new_from_slice(bytes).map(Self::Aes128).map_err(invalid),
            24 => Aes192::new_from_slice(bytes).map(Self::Aes192).map_err(invalid),
            32 => Aes256::new_from_slice(bytes).map(Self::Aes256).map_err(invalid),
            actual => Err(CryptoError::InvalidKeyLength { actual }),
        }
    }

    fn encrypt_block(&self, block: &mut Block) {
        match self {
            Self::Aes128(c) => c.encrypt_block(block),
            Self::Aes192(c) => c.encrypt_block(block),
            Self::Aes256(c) => c.encrypt_block(block),
        }
    }
}

/// Applies the AES-GCM keystream of the frame's nonce to its payload.
pub struct Decryptor {
    key: MeterKey,
}

impl Decryptor {
    pub fn new(key: MeterKey) -> Self {
        Self { key }
    }

    /// Decrypt a ciphertext slice; the result has the same length.
    pub fn decrypt(
        &self,
        system_title: &[u8; SYSTEM_TITLE_LEN],
        frame_counter: &[u8; FRAME_COUNTER_LEN],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        self.apply_keystream(&build_nonce(system_title, frame_counter), ciphertext)
    }

    /// Encrypt a plaintext the way the meter does, without appending a tag.
    pub fn encrypt(
        &self,
        system_title: &[u8; SYSTEM_TITLE_LEN],
        frame_counter: &[u8; FRAME_COUNTER_LEN],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        self.apply_keystream(&build_nonce(system_title, frame_counter), plaintext)
    }

    /// GCM counter mode: J0 = nonce || 1, data blocks start at inc32(J0).
    fn apply_keystream(&self, nonce: &Nonce, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let cipher = BlockCipher::new(&self.key)?;

        let mut counter = [0u8; 16];
        counter[..nonce.len()].copy_from_slice(nonce);
        counter[15] = 1;
        inc32(&mut counter);

        let mut result = Vec::with_capacity(data.len());
        for chunk in data.chunks(16) {
            let mut keystream = Block::clone_from_slice(&counter);
            cipher.encrypt_block(&mut keystream);

            result.extend(chunk.iter().zip(keystream.iter()).map(|(d, k)| d ^ k));

            inc32(&mut counter);
        }

        Ok(result)
    }
}

impl std::fmt::Debug for Decryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decryptor").field("key", &self.key).finish()
    }
}

/// Increment the low 32 bits of the counter block, wrapping.
fn inc32(counter: &mut [u8; 16]) {
    let low = u32::from_be_bytes([counter[12], counter[13], counter[14], counter[15]]);
    counter[12..].copy_from_slice(&low.wrapping_add(1).to_be_bytes());
}
