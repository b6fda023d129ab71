// crates/isobus-rs/src/transport/session.rs
use crate::frame::{CanFrame, CanIdentifier, CanMessage};
use crate::transport::Protocol;
use crate::transport::messages::{ConnectionManagement, packet_count};
use crate::types::{PADDING_BYTE, PRIORITY_LOWEST};
use alloc::vec;
use alloc::vec::Vec;

/// Bytes of payload carried by one data transfer packet.
pub const BYTES_PER_PACKET: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Transmit,
    Receive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Transmit: the RTS has not been sent yet.
    SendRequestToSend,
    /// Transmit: the BAM has not been sent yet.
    SendBroadcastAnnounce,
    /// Transmit: waiting for the receiver to open (or hold) a window.
    WaitForClearToSend,
    /// Transmit (ETP): a DPO must precede the next window.
    SendDataPacketOffset,
    /// Transmit: sending the packets of the current window.
    SendData,
    /// Transmit: all packets sent, waiting for EoMA.
    WaitForEndOfMessageAck,
    /// Receive (ETP): CTS sent, waiting for the sender's DPO.
    WaitForDataPacketOffset,
    /// Receive: waiting for the next data packet.
    WaitForData,
}

/// One TP or ETP connection, in either direction.
///
/// Packet numbers are absolute and 1-based. For ETP the wire sequence number
/// is relative to `offset`, the packet count preceding the current window.
#[derive(Debug, Clone)]
pub struct Session {
    pub protocol: Protocol,
    pub direction: Direction,
    pub broadcast: bool,
    pub pgn: u32,
    pub priority: u8,
    pub source: u8,
    pub destination: u8,
    pub data: Vec<u8>,
    pub total_packets: u32,
    pub state: SessionState,
    pub next_packet: u32,
    /// Last packet (inclusive) of the current window.
    pub window_end: u32,
    pub offset: u32,
    pub deadline_us: u64,
    pub retries_left: u8,
}

impl Session {
    #[allow(clippy::too_many_arguments)]
    pub fn new_transmit(
        protocol: Protocol,
        pgn: u32,
        priority: u8,
        source: u8,
        destination: u8,
        data: Vec<u8>,
        broadcast: bool,
        now_us: u64,
    ) -> Self {
        let total_packets = packet_count(data.len()) as u32;
        Self {
            protocol,
            direction: Direction::Transmit,
            broadcast,
            pgn,
            priority,
            source,
            destination,
            data,
            total_packets,
            state: if broadcast {
                SessionState::SendBroadcastAnnounce
            } else {
                SessionState::SendRequestToSend
            },
            next_packet: 1,
            window_end: 0,
            offset: 0,
            deadline_us: now_us,
            retries_left: 0,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn new_receive(
        protocol: Protocol,
        pgn: u32,
        priority: u8,
        source: u8,
        destination: u8,
        message_size: usize,
        broadcast: bool,
        retries: u8,
        now_us: u64,
    ) -> Self {
        Self {
            protocol,
            direction: Direction::Receive,
            broadcast,
            pgn,
            priority,
            source,
            destination,
            data: vec![0u8; message_size],
            total_packets: packet_count(message_size) as u32,
            state: SessionState::WaitForData,
            next_packet: 1,
            window_end: 0,
            offset: 0,
            deadline_us: now_us,
            retries_left: retries,
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Opens the next receive window and returns the CTS announcing it.
    pub fn open_window(&mut self, max_packets: u8) -> ConnectionManagement {
        let remaining = self.total_packets - self.next_packet + 1;
        let packets = remaining.min(u32::from(max_packets.max(1)));
        self.window_end = self.next_packet + packets - 1;
        self.state = match self.protocol {
            Protocol::Tp => SessionState::WaitForData,
            Protocol::Etp => SessionState::WaitForDataPacketOffset,
        };
        ConnectionManagement::ClearToSend {
            packets: packets as u8,
            next_packet: self.next_packet,
            pgn: self.pgn,
        }
    }

    /// Stores the payload of data packet `packet`.
    pub fn store_packet(&mut self, packet: u32, payload: &[u8]) {
        let start = (packet as usize - 1) * BYTES_PER_PACKET;
        let end = (start + BYTES_PER_PACKET).min(self.data.len());
        let len = (end - start).min(payload.len());
        self.data[start..start + len].copy_from_slice(&payload[..len]);
    }

    /// Builds the TP.DT/ETP.DT frame of `packet`.
    pub fn data_frame(&self, packet: u32, now_us: u64) -> CanFrame {
        let mut out = [PADDING_BYTE; 8];
        out[0] = (packet - self.offset) as u8;
        let start = (packet as usize - 1) * BYTES_PER_PACKET;
        let end = (start + BYTES_PER_PACKET).min(self.data.len());
        out[1..1 + end - start].copy_from_slice(&self.data[start..end]);
        self.frame(self.protocol.data_transfer_pgn(), self.source, self.destination, out, now_us)
    }

    /// Builds a connection management frame. Frames answering a received
    /// session travel in the opposite direction of the data.
    pub fn control_frame(&self, message: ConnectionManagement, now_us: u64) -> CanFrame {
        let data = message.encode(self.protocol);
        let (from, to) = match self.direction {
            Direction::Transmit => (self.source, self.destination),
            Direction::Receive => (self.destination, self.source),
        };
        self.frame(self.protocol.connection_management_pgn(), from, to, data, now_us)
    }

    fn frame(&self, pgn: u32, from: u8, to: u8, data: [u8; 8], now_us: u64) -> CanFrame {
        let id = CanIdentifier::new(PRIORITY_LOWEST, pgn, to, from);
        CanFrame::from_identifier(&id, data, now_us)
    }

    pub fn into_message(self, now_us: u64) -> CanMessage {
        CanMessage {
            pgn: self.pgn,
            priority: self.priority,
            source: self.source,
            destination: self.destination,
            data: self.data,
            timestamp_us: now_us,
        }
    }
}
