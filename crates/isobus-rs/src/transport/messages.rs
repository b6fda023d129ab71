// crates/isobus-rs/src/transport/messages.rs
//! Connection management messages of TP (J1939-21, 5.10.3) and ETP (ISO 11783-3, 5.11.5).

use crate::hal::IsobusError;
use crate::transport::{AbortReason, Protocol};
use crate::types::PADDING_BYTE;

const TP_REQUEST_TO_SEND: u8 = 0x10;
const TP_CLEAR_TO_SEND: u8 = 0x11;
const TP_END_OF_MESSAGE_ACK: u8 = 0x13;
const TP_BROADCAST_ANNOUNCE: u8 = 0x20;
const ETP_REQUEST_TO_SEND: u8 = 0x14;
const ETP_CLEAR_TO_SEND: u8 = 0x15;
const ETP_DATA_PACKET_OFFSET: u8 = 0x16;
const ETP_END_OF_MESSAGE_ACK: u8 = 0x17;
const CONNECTION_ABORT: u8 = 0xFF;

/// A decoded TP.CM or ETP.CM payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionManagement {
    /// `max_packets_per_cts` is only transmitted by TP; ETP receivers choose freely.
    RequestToSend { message_size: u32, total_packets: u32, max_packets_per_cts: u8, pgn: u32 },
    /// `packets == 0` asks the sender to hold the connection open.
    ClearToSend { packets: u8, next_packet: u32, pgn: u32 },
    DataPacketOffset { packets: u8, offset: u32, pgn: u32 },
    EndOfMessageAck { message_size: u32, total_packets: u32, pgn: u32 },
    BroadcastAnnounce { message_size: u32, total_packets: u32, pgn: u32 },
    Abort { reason: AbortReason, pgn: u32 },
}

impl ConnectionManagement {
    pub fn pgn(&self) -> u32 {
        match *self {
            Self::RequestToSend { pgn, .. }
            | Self::ClearToSend { pgn, .. }
            | Self::DataPacketOffset { pgn, .. }
            | Self::EndOfMessageAck { pgn, .. }
            | Self::BroadcastAnnounce { pgn, .. }
            | Self::Abort { pgn, .. } => pgn,
        }
    }

    pub fn encode(&self, protocol: Protocol) -> [u8; 8] {
        let mut out = [PADDING_BYTE; 8];
        let pgn = self.pgn().to_le_bytes();
        out[5..8].copy_from_slice(&pgn[..3]);
        match (*self, protocol) {
            (Self::RequestToSend { message_size, total_packets, max_packets_per_cts, .. }, Protocol::Tp) => {
                out[0] = TP_REQUEST_TO_SEND;
                out[1..3].copy_from_slice(&(message_size as u16).to_le_bytes());
                out[3] = total_packets as u8;
                out[4] = max_packets_per_cts;
            }
            (Self::RequestToSend { message_size, .. }, Protocol::Etp) => {
                out[0] = ETP_REQUEST_TO_SEND;
                out[1..5].copy_from_slice(&message_size.to_le_bytes());
            }
            (Self::ClearToSend { packets, next_packet, .. }, Protocol::Tp) => {
                out[0] = TP_CLEAR_TO_SEND;
                out[1] = packets;
                out[2] = next_packet as u8;
            }
            (Self::ClearToSend { packets, next_packet, .. }, Protocol::Etp) => {
                out[0] = ETP_CLEAR_TO_SEND;
                out[1] = packets;
                out[2..5].copy_from_slice(&next_packet.to_le_bytes()[..3]);
            }
            (Self::DataPacketOffset { packets, offset, .. }, _) => {
                out[0] = ETP_DATA_PACKET_OFFSET;
                out[1] = packets;
                out[2..5].copy_from_slice(&offset.to_le_bytes()[..3]);
            }
            (Self::EndOfMessageAck { message_size, total_packets, .. }, Protocol::Tp) => {
                out[0] = TP_END_OF_MESSAGE_ACK;
                out[1..3].copy_from_slice(&(message_size as u16).to_le_bytes());
                out[3] = total_packets as u8;
            }
            (Self::EndOfMessageAck { message_size, .. }, Protocol::Etp) => {
                out[0] = ETP_END_OF_MESSAGE_ACK;
                out[1..5].copy_from_slice(&message_size.to_le_bytes());
            }
            (Self::BroadcastAnnounce { message_size, total_packets, .. }, _) => {
                out[0] = TP_BROADCAST_ANNOUNCE;
                out[1..3].copy_from_slice(&(message_size as u16).to_le_bytes());
                out[3] = total_packets as u8;
            }
            (Self::Abort { reason, .. }, _) => {
                out[0] = CONNECTION_ABORT;
                out[1] = reason as u8;
            }
        }
        out
    }

    pub fn decode(protocol: Protocol, data: &[u8]) -> Result<Self, IsobusError> {
        if data.len() < 8 {
            return Err(IsobusError::BufferTooShort { expected: 8, actual: data.len() });
        }
        let pgn = u32::from_le_bytes([data[5], data[6], data[7], 0]);
        let u16_at = |i: usize| u32::from(u16::from_le_bytes([data[i], data[i + 1]]));
        let u24_at = |i: usize| u32::from_le_bytes([data[i], data[i + 1], data[i + 2], 0]);
        let u32_at = |i: usize| u32::from_le_bytes([data[i], data[i + 1], data[i + 2], data[i + 3]]);
        let message = match (data[0], protocol) {
            (TP_REQUEST_TO_SEND, Protocol::Tp) => Self::RequestToSend {
                message_size: u16_at(1),
                total_packets: u32::from(data[3]),
                max_packets_per_cts: data[4],
                pgn,
            },
            (ETP_REQUEST_TO_SEND, Protocol::Etp) => {
                let message_size = u32_at(1);
                Self::RequestToSend {
                    message_size,
                    total_packets: packet_count(message_size as usize) as u32,
                    max_packets_per_cts: PADDING_BYTE,
                    pgn,
                }
            }
            (TP_CLEAR_TO_SEND, Protocol::Tp) => Self::ClearToSend {
                packets: data[1],
                next_packet: u32::from(data[2]),
                pgn,
            },
            (ETP_CLEAR_TO_SEND, Protocol::Etp) => Self::ClearToSend {
                packets: data[1],
                next_packet: u24_at(2),
                pgn,
            },
            (ETP_DATA_PACKET_OFFSET, Protocol::Etp) => Self::DataPacketOffset {
                packets: data[1],
                offset: u24_at(2),
                pgn,
            },
            (TP_END_OF_MESSAGE_ACK, Protocol::Tp) => Self::EndOfMessageAck {
                message_size: u16_at(1),
                total_packets: u32::from(data[3]),
                pgn,
            },
            (ETP_END_OF_MESSAGE_ACK, Protocol::Etp) => {
                let message_size = u32_at(1);
                Self::EndOfMessageAck {
                    message_size,
                    total_packets: packet_count(message_size as usize) as u32,
                    pgn,
                }
            }
            (TP_BROADCAST_ANNOUNCE, Protocol::Tp) => Self::BroadcastAnnounce {
                message_size: u16_at(1),
                total_packets: u32::from(data[3]),
                pgn,
            },
            (CONNECTION_ABORT, _) => Self::Abort {
                reason: AbortReason::from(data[1]),
                pgn,
            },
            _ => return Err(IsobusError::InvalidFrame("unknown connection management control byte")),
        };
        Ok(message)
    }
}

/// Number of 7-byte data packets needed for `size` bytes.
pub fn packet_count(size: usize) -> usize {
    size.div_ceil(7)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PGN_PROCESS_DATA;

    #[test]
    fn test_tp_request_to_send_layout() {
        let rts = ConnectionManagement::RequestToSend {
            message_size: 23,
            total_packets: 4,
            max_packets_per_cts: 16,
            pgn: PGN_PROCESS_DATA,
        };
        let bytes = rts.encode(Protocol::Tp);
        assert_eq!(bytes, [0x10, 23, 0, 4, 16, 0x00, 0xCB, 0x00]);
        assert_eq!(ConnectionManagement::decode(Protocol::Tp, &bytes).unwrap(), rts);
    }

    #[test]
    fn test_etp_clear_to_send_uses_24_bit_packet_number() {
        let cts = ConnectionManagement::ClearToSend {
            packets: 255,
            next_packet: 0x01_0203,
            pgn: PGN_PROCESS_DATA,
        };
        let bytes = cts.encode(Protocol::Etp);
        assert_eq!(bytes, [0x15, 255, 0x03, 0x02, 0x01, 0x00, 0xCB, 0x00]);
        assert_eq!(ConnectionManagement::decode(Protocol::Etp, &bytes).unwrap(), cts);
    }

    #[test]
    fn test_abort_and_unknown_control_byte() {
        let bytes = [0xFF, 3, 0xFF, 0xFF, 0xFF, 0x00, 0xCB, 0x00];
        assert_eq!(
            ConnectionManagement::decode(Protocol::Tp, &bytes).unwrap(),
            ConnectionManagement::Abort { reason: AbortReason::Timeout, pgn: PGN_PROCESS_DATA }
        );
        // ETP control bytes are not valid on the TP channel.
        let bytes = [0x14, 0, 0, 0, 0, 0, 0, 0];
        assert!(ConnectionManagement::decode(Protocol::Tp, &bytes).is_err());
        assert!(ConnectionManagement::decode(Protocol::Tp, &bytes[..4]).is_err());
    }
}
