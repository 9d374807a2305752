//! Frame builders shared by the integration tests.
//!
//! Frames are built the way the meter builds them: a data-notification
//! APDU, encrypted with the AES-GCM keystream of title and counter, wrapped
//! into an M-Bus long frame and padded to one read chunk.

#![allow(dead_code)]

use smartmeter_rs::constants::{CIPHERTEXT_OFFSET, READ_CHUNK_LEN};
use smartmeter_rs::{Decryptor, MeterKey};

pub const KEY_HEX: &str = "36C66639E48A8CA4D6BC8B282A793BBB";

pub const SYSTEM_TITLE: [u8; 8] = [0x4B, 0x46, 0x4D, 0x10, 0x20, 0x01, 0x02, 0x03];

pub const ENERGY_IN: [u8; 6] = [1, 0, 1, 8, 0, 255];
pub const ENERGY_OUT: [u8; 6] = [1, 0, 2, 8, 0, 255];
pub const POWER_IN: [u8; 6] = [1, 0, 1, 7, 0, 255];
pub const POWER_OUT: [u8; 6] = [1, 0, 2, 7, 0, 255];
pub const VOLTAGE_L1: [u8; 6] = [1, 0, 32, 7, 0, 255];
pub const VOLTAGE_L2: [u8; 6] = [1, 0, 52, 7, 0, 255];
pub const VOLTAGE_L3: [u8; 6] = [1, 0, 72, 7, 0, 255];
pub const CURRENT_L1: [u8; 6] = [1, 0, 31, 7, 0, 255];
pub const CURRENT_L2: [u8; 6] = [1, 0, 51, 7, 0, 255];
pub const CURRENT_L3: [u8; 6] = [1, 0, 71, 7, 0, 255];
pub const POWER_FACTOR: [u8; 6] = [1, 0, 13, 7, 0, 255];

/// 2024-03-15 12:34:05.00 as COSEM date-time
pub const PUSH_TIME: [u8; 12] = [
    0x07, 0xE8, 0x03, 0x0F, 0x05, 0x0C, 0x22, 0x05, 0x00, 0x80, 0x00, 0x00,
];

/// One reading of every quantity, as a healthy three-phase meter reports it.
pub fn full_readings() -> Vec<([u8; 6], u64)> {
    vec![
        (ENERGY_IN, 1_234_567),
        (ENERGY_OUT, 89_012),
        (POWER_IN, 1520),
        (POWER_OUT, 0),
        (VOLTAGE_L1, 2301),
        (VOLTAGE_L2, 2298),
        (VOLTAGE_L3, 2310),
        (CURRENT_L1, 312),
        (CURRENT_L2, 105),
        (CURRENT_L3, 87),
        (POWER_FACTOR, 987),
    ]
}

pub fn key() -> MeterKey {
    MeterKey::from_hex(KEY_HEX).unwrap()
}

pub fn decryptor() -> Decryptor {
    Decryptor::new(key())
}

/// Notification body: one structure of OBIS/value pairs.
pub fn body(readings: &[([u8; 6], u64)]) -> Vec<u8> {
    let mut body = vec![0x02, (readings.len() * 2) as u8];
    for (obis, value) in readings {
        body.extend_from_slice(&[0x09, 0x06]);
        body.extend_from_slice(obis);
        body.push(0x06);
        body.extend_from_slice(&(*value as u32).to_be_bytes());
    }
    body
}

/// Data-notification with invoke id, push time and body.
pub fn notification(invoke_id: u32, readings: &[([u8; 6], u64)]) -> Vec<u8> {
    let mut apdu = vec![0x0F];
    apdu.extend_from_slice(&invoke_id.to_be_bytes());
    apdu.push(PUSH_TIME.len() as u8);
    apdu.extend_from_slice(&PUSH_TIME);
    apdu.extend_from_slice(&body(readings));
    apdu
}

/// M-Bus long frame around a ciphertext, padded to one read chunk.
pub fn wrap(system_title: &[u8; 8], frame_counter: &[u8; 4], ciphertext: &[u8]) -> Vec<u8> {
    let length = (ciphertext.len() + 20) as u8;
    let mut frame = vec![0x68, length, length, 0x68];
    frame.extend_from_slice(&[0x53, 0xFF, 0x00, 0x01, 0x67, 0xDB, 0x08]);
    frame.extend_from_slice(system_title);
    frame.extend_from_slice(&[0x81, 0xF8, 0x20]);
    frame.extend_from_slice(frame_counter);
    assert_eq!(frame.len(), CIPHERTEXT_OFFSET);
    frame.extend_from_slice(ciphertext);
    frame.push(0x16);
    frame.resize(READ_CHUNK_LEN, 0x00);
    frame
}

/// Encrypt a plaintext and wrap it, ready to be queued on a mock port.
pub fn sealed_frame(counter: u32, plaintext: &[u8]) -> Vec<u8> {
    let frame_counter = counter.to_be_bytes();
    let ciphertext = decryptor()
        .encrypt(&SYSTEM_TITLE, &frame_counter, plaintext)
        .unwrap();
    wrap(&SYSTEM_TITLE, &frame_counter, &ciphertext)
}

/// Encrypted frame carrying the given readings.
pub fn meter_frame(counter: u32, readings: &[([u8; 6], u64)]) -> Vec<u8> {
    sealed_frame(counter, &notification(0x8000_0000 | counter, readings))
}

/// A read chunk of line noise without the long-frame marker.
pub fn noise() -> Vec<u8> {
    (0..READ_CHUNK_LEN).map(|i| (i * 7 + 3) as u8).collect()
}
