// crates/isobus-rs/src/frame/identifier.rs
use crate::types::{GLOBAL_ADDRESS, is_pdu1};

/// The fields of a 29-bit J1939 identifier.
///
/// (Reference: SAE J1939-21, Section 5.2)
///
/// | Bits  | Field                          |
/// |-------|--------------------------------|
/// | 26-28 | Priority                       |
/// | 24-25 | Extended data page, data page  |
/// | 16-23 | PDU format (PF)                |
/// | 8-15  | PDU specific (DA or GE)        |
/// | 0-7   | Source address                 |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanIdentifier {
    pub priority: u8,
    /// PGN with the PDU-specific byte cleared for PDU1 groups.
    pub pgn: u32,
    /// Destination address for PDU1 groups, `GLOBAL_ADDRESS` for PDU2.
    pub destination: u8,
    pub source: u8,
}

impl CanIdentifier {
    pub fn new(priority: u8, pgn: u32, destination: u8, source: u8) -> Self {
        let pgn = if is_pdu1(pgn) { pgn & 0x3FF00 } else { pgn & 0x3FFFF };
        let destination = if is_pdu1(pgn) { destination } else { GLOBAL_ADDRESS };
        Self {
            priority: priority & 0x07,
            pgn,
            destination,
            source,
        }
    }

    pub fn encode(&self) -> u32 {
        let priority = u32::from(self.priority & 0x07) << 26;
        let source = u32::from(self.source);
        if is_pdu1(self.pgn) {
            priority | ((self.pgn & 0x3FF00) << 8) | (u32::from(self.destination) << 8) | source
        } else {
            priority | ((self.pgn & 0x3FFFF) << 8) | source
        }
    }

    pub fn decode(raw: u32) -> Self {
        let priority = ((raw >> 26) & 0x07) as u8;
        let pdu_format = (raw >> 16) & 0xFF;
        let pdu_specific = ((raw >> 8) & 0xFF) as u8;
        let data_pages = (raw >> 24) & 0x03;
        let source = (raw & 0xFF) as u8;
        if pdu_format < 0xF0 {
            Self {
                priority,
                pgn: (data_pages << 16) | (pdu_format << 8),
                destination: pdu_specific,
                source,
            }
        } else {
            Self {
                priority,
                pgn: (data_pages << 16) | (pdu_format << 8) | u32::from(pdu_specific),
                destination: GLOBAL_ADDRESS,
                source,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PGN_ADDRESS_CLAIM, PGN_LANGUAGE_COMMAND, PGN_PROCESS_DATA};

    #[test]
    fn test_address_claim_identifier() {
        // Address claim broadcast from 0x85 at priority 6.
        let id = CanIdentifier::new(6, PGN_ADDRESS_CLAIM, GLOBAL_ADDRESS, 0x85);
        assert_eq!(id.encode(), 0x18EEFF85);
        assert_eq!(CanIdentifier::decode(0x18EEFF85), id);
    }

    #[test]
    fn test_destination_specific_identifier() {
        let id = CanIdentifier::decode(0x14CB80F7);
        assert_eq!(id.priority, 5);
        assert_eq!(id.pgn, PGN_PROCESS_DATA);
        assert_eq!(id.destination, 0x80);
        assert_eq!(id.source, 0xF7);
    }

    #[test]
    fn test_pdu2_ignores_destination() {
        let id = CanIdentifier::new(6, PGN_LANGUAGE_COMMAND, 0x80, 0x26);
        assert_eq!(id.destination, GLOBAL_ADDRESS);
        assert_eq!(id.encode(), 0x18FE0F26);
    }
}
