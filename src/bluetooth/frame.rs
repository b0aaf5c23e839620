/// Battery monitor notification frame decoding
use thiserror::Error;

use crate::models::Reading;

// Frame layout constants
pub const FRAME_LEN: usize = 36;
pub const FRAME_MARKER: [u8; 2] = [0xFF, 0x55];

const VOLTAGE_OFFSET: usize = 4; // 24-bit, 0.1 V
const CURRENT_OFFSET: usize = 7; // 24-bit, 0.001 A
const CAPACITY_AH_OFFSET: usize = 10; // 24-bit, 0.01 Ah
const CAPACITY_WH_OFFSET: usize = 13; // 32-bit, 10 Wh
const TEMPERATURE_OFFSET: usize = 24; // 16-bit, unscaled

const VOLTAGE_STEP: f64 = 0.1;
const CURRENT_STEP: f64 = 0.001;
const CAPACITY_AH_STEP: f64 = 0.01;
const CAPACITY_WH_STEP: f64 = 10.0;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("unexpected frame length {0}, expected {}", FRAME_LEN)]
    Length(usize),
    #[error("unexpected frame marker {}", hex::encode(.0))]
    Marker([u8; 2]),
}

/// Decode one notification payload into a [`Reading`]
///
/// The frame is 36 bytes long and starts with `FF 55`. All fields are
/// big-endian unsigned integers at fixed offsets:
/// - Bytes 4-6: Voltage (0.1 V resolution)
/// - Bytes 7-9: Current (0.001 A resolution)
/// - Bytes 10-12: Capacity (0.01 Ah resolution)
/// - Bytes 13-16: Energy (10 Wh resolution, two 16-bit half-words)
/// - Bytes 24-25: Temperature (raw device units)
///
/// The trailing checksum byte is not verified.
pub fn decode(raw: &[u8]) -> Result<Reading, FrameError> {
    if raw.len() != FRAME_LEN {
        return Err(FrameError::Length(raw.len()));
    }
    if raw[..2] != FRAME_MARKER {
        return Err(FrameError::Marker([raw[0], raw[1]]));
    }

    Ok(Reading {
        voltage: be_u24(raw, VOLTAGE_OFFSET) as f64 * VOLTAGE_STEP,
        current: be_u24(raw, CURRENT_OFFSET) as f64 * CURRENT_STEP,
        temperature: be_u16(raw, TEMPERATURE_OFFSET) as f64,
        capacity_ah: be_u24(raw, CAPACITY_AH_OFFSET) as f64 * CAPACITY_AH_STEP,
        capacity_wh: be_u32(raw, CAPACITY_WH_OFFSET) as f64 * CAPACITY_WH_STEP,
    })
}

fn be_u16(data: &[u8], i: usize) -> u16 {
    u16::from_be_bytes([data[i], data[i + 1]])
}

fn be_u24(data: &[u8], i: usize) -> u32 {
    u32::from_be_bytes([0, data[i], data[i + 1], data[i + 2]])
}

fn be_u32(data: &[u8], i: usize) -> u32 {
    (be_u16(data, i) as u32) << 16 | be_u16(data, i + 2) as u32
}
