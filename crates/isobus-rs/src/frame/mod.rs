// crates/isobus-rs/src/frame/mod.rs
pub mod identifier;

pub use identifier::CanIdentifier;

use crate::hal::IsobusError;
use crate::types::{CAN_DATA_LENGTH, GLOBAL_ADDRESS, PADDING_BYTE};
use alloc::vec::Vec;

/// A classic CAN frame as exchanged with the hardware layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CanFrame {
    /// Raw identifier: 29 bits when `is_extended`, otherwise 11 bits.
    pub id: u32,
    pub data: [u8; CAN_DATA_LENGTH],
    /// Number of valid bytes in `data` (0-8).
    pub len: u8,
    pub is_extended: bool,
    /// Reception (or enqueue) time in microseconds.
    pub timestamp_us: u64,
}

impl CanFrame {
    /// Builds an extended frame carrying `payload`.
    pub fn new_extended(id: u32, payload: &[u8], timestamp_us: u64) -> Result<Self, IsobusError> {
        if payload.len() > CAN_DATA_LENGTH {
            return Err(IsobusError::InvalidFrame("payload exceeds 8 bytes"));
        }
        if id > 0x1FFF_FFFF {
            return Err(IsobusError::InvalidFrame("identifier exceeds 29 bits"));
        }
        let mut data = [0u8; CAN_DATA_LENGTH];
        data[..payload.len()].copy_from_slice(payload);
        Ok(Self {
            id,
            data,
            len: payload.len() as u8,
            is_extended: true,
            timestamp_us,
        })
    }

    /// Builds an extended frame from a J1939 identifier and a full 8-byte payload.
    pub fn from_identifier(identifier: &CanIdentifier, data: [u8; CAN_DATA_LENGTH], timestamp_us: u64) -> Self {
        Self {
            id: identifier.encode(),
            data,
            len: CAN_DATA_LENGTH as u8,
            is_extended: true,
            timestamp_us,
        }
    }

    pub fn payload(&self) -> &[u8] {
        let len = usize::from(self.len).min(CAN_DATA_LENGTH);
        &self.data[..len]
    }

    /// Decodes the J1939 identifier. Standard (11-bit) frames carry no J1939 content.
    pub fn identifier(&self) -> Option<CanIdentifier> {
        self.is_extended.then(|| CanIdentifier::decode(self.id))
    }
}

/// A complete parameter group, either from a single frame or reassembled
/// by the transport layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanMessage {
    pub pgn: u32,
    pub priority: u8,
    pub source: u8,
    /// `GLOBAL_ADDRESS` for broadcasts.
    pub destination: u8,
    pub data: Vec<u8>,
    pub timestamp_us: u64,
}

impl CanMessage {
    pub fn is_broadcast(&self) -> bool {
        self.destination == GLOBAL_ADDRESS
    }

    pub fn get_u8(&self, index: usize) -> Option<u8> {
        self.data.get(index).copied()
    }

    pub fn get_u16_le(&self, index: usize) -> Option<u16> {
        let bytes = self.data.get(index..index + 2)?;
        Some(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    pub fn get_u24_le(&self, index: usize) -> Option<u32> {
        let bytes = self.data.get(index..index + 3)?;
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0]))
    }

    pub fn get_i32_le(&self, index: usize) -> Option<i32> {
        let bytes = self.data.get(index..index + 4)?;
        Some(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

/// Copies `payload` into a padded 8-byte frame buffer.
pub fn padded(payload: &[u8]) -> [u8; CAN_DATA_LENGTH] {
    let mut data = [PADDING_BYTE; CAN_DATA_LENGTH];
    let len = payload.len().min(CAN_DATA_LENGTH);
    data[..len].copy_from_slice(&payload[..len]);
    data
}
