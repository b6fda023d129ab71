// crates/isobus-rs/src/types.rs

// --- Addressing (J1939-81, ISO 11783-5) ---

/// Source address used by a control function that has not (or cannot) claim an address.
pub const NULL_ADDRESS: u8 = 0xFE;

/// Destination address for broadcast (global) messages.
pub const GLOBAL_ADDRESS: u8 = 0xFF;

/// Highest address a control function may claim.
pub const MAX_CLAIMABLE_ADDRESS: u8 = 0xFD;

/// Lower bound of the self-configurable address range (ISO 11783-5, 4.4.2).
pub const ARBITRARY_ADDRESS_MIN: u8 = 128;

/// Upper bound of the self-configurable address range (ISO 11783-5, 4.4.2).
pub const ARBITRARY_ADDRESS_MAX: u8 = 247;

/// Returns true if `address` identifies a single control function on the bus.
pub const fn is_valid_address(address: u8) -> bool {
    address <= MAX_CLAIMABLE_ADDRESS
}

// --- CAN Frame Limits ---

/// Maximum payload of a classic CAN data frame.
pub const CAN_DATA_LENGTH: usize = 8;

/// Value used to fill unused bytes of a frame.
pub const PADDING_BYTE: u8 = 0xFF;

// --- Priorities (J1939-21, 5.2.1) ---

pub const PRIORITY_HIGHEST: u8 = 0;
pub const PRIORITY_PROCESS_DATA: u8 = 5;
pub const PRIORITY_DEFAULT: u8 = 6;
pub const PRIORITY_LOWEST: u8 = 7;

// --- Parameter Group Numbers ---

/// Process Data message used by all Task Controller traffic (ISO 11783-10).
pub const PGN_PROCESS_DATA: u32 = 0x00CB00;
/// Extended Transport Protocol, Data Transfer.
pub const PGN_ETP_DATA_TRANSFER: u32 = 0x00C700;
/// Extended Transport Protocol, Connection Management.
pub const PGN_ETP_CONNECTION_MANAGEMENT: u32 = 0x00C800;
/// Acknowledgement (J1939-21).
pub const PGN_ACKNOWLEDGE: u32 = 0x00E800;
/// Request for a parameter group (J1939-21).
pub const PGN_REQUEST: u32 = 0x00EA00;
/// Transport Protocol, Data Transfer.
pub const PGN_TP_DATA_TRANSFER: u32 = 0x00EB00;
/// Transport Protocol, Connection Management.
pub const PGN_TP_CONNECTION_MANAGEMENT: u32 = 0x00EC00;
/// Address Claimed / Cannot Claim (J1939-81).
pub const PGN_ADDRESS_CLAIM: u32 = 0x00EE00;
/// Working Set Master announcement (ISO 11783-7).
pub const PGN_WORKING_SET_MASTER: u32 = 0x00FE0D;
/// Language Command (ISO 11783-7).
pub const PGN_LANGUAGE_COMMAND: u32 = 0x00FE0F;

/// Returns true if the PGN is destination specific (PDU1 format, PF < 240).
pub const fn is_pdu1(pgn: u32) -> bool {
    ((pgn >> 8) & 0xFF) < 0xF0
}
