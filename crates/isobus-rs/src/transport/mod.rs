// crates/isobus-rs/src/transport/mod.rs
//! Multi-frame transport: TP (SAE J1939-21, 5.10) for up to 1785 bytes and
//! ETP (ISO 11783-3, 5.11) for up to 117 440 505 bytes.
//!
//! At most one session per direction exists for each pair of addresses.
//! Failures are reported as [`TransportEvent`]s; nothing is retried silently
//! apart from a bounded number of retransmission requests on the receive side.

pub mod messages;
pub mod session;

use crate::frame::{CanFrame, CanIdentifier, CanMessage};
use crate::hal::IsobusError;
use crate::types::{
    GLOBAL_ADDRESS, PGN_ETP_CONNECTION_MANAGEMENT, PGN_ETP_DATA_TRANSFER,
    PGN_TP_CONNECTION_MANAGEMENT, PGN_TP_DATA_TRANSFER,
};
use alloc::vec::Vec;
use core::fmt;
use log::{debug, info, trace, warn};
use messages::{ConnectionManagement, packet_count};
use session::{Direction, Session, SessionState};

/// Largest payload carried by TP (255 packets of 7 bytes).
pub const TP_MAX_SIZE: usize = 1785;
/// Largest payload carried by ETP (2^24 - 1 packets of 7 bytes).
pub const ETP_MAX_SIZE: usize = 117_440_505;

// --- Timeouts (J1939-21, 5.10.2.4) ---

/// Receiver: maximum gap between two data packets.
pub const T1_US: u64 = 750_000;
/// Receiver: maximum wait for data after sending a CTS.
pub const T2_US: u64 = 1_250_000;
/// Sender: maximum wait for CTS or EoMA after the last packet of a window.
pub const T3_US: u64 = 1_250_000;
/// Sender: maximum wait for the next CTS after a hold (CTS with zero packets).
pub const T4_US: u64 = 1_050_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tp,
    Etp,
}

impl Protocol {
    pub fn connection_management_pgn(self) -> u32 {
        match self {
            Protocol::Tp => PGN_TP_CONNECTION_MANAGEMENT,
            Protocol::Etp => PGN_ETP_CONNECTION_MANAGEMENT,
        }
    }

    pub fn data_transfer_pgn(self) -> u32 {
        match self {
            Protocol::Tp => PGN_TP_DATA_TRANSFER,
            Protocol::Etp => PGN_ETP_DATA_TRANSFER,
        }
    }
}

/// Connection abort reasons (J1939-21, Table 7 / ISO 11783-3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AbortReason {
    AlreadyInSession = 1,
    ResourcesNeeded = 2,
    Timeout = 3,
    ClearToSendWhileTransferInProgress = 4,
    MaxRetransmitRequestsReached = 5,
    UnexpectedDataTransfer = 6,
    BadSequenceNumber = 7,
    DuplicateSequenceNumber = 8,
    TotalMessageSizeTooBig = 9,
    UnexpectedDataPacketOffset = 10,
    DataPacketOffsetExceedsClearToSend = 11,
    BadDataPacketOffset = 12,
    Other = 250,
}

impl From<u8> for AbortReason {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::AlreadyInSession,
            2 => Self::ResourcesNeeded,
            3 => Self::Timeout,
            4 => Self::ClearToSendWhileTransferInProgress,
            5 => Self::MaxRetransmitRequestsReached,
            6 => Self::UnexpectedDataTransfer,
            7 => Self::BadSequenceNumber,
            8 => Self::DuplicateSequenceNumber,
            9 => Self::TotalMessageSizeTooBig,
            10 => Self::UnexpectedDataPacketOffset,
            11 => Self::DataPacketOffsetExceedsClearToSend,
            12 => Self::BadDataPacketOffset,
            _ => Self::Other,
        }
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::AlreadyInSession => "already in a connection managed session",
            Self::ResourcesNeeded => "system resources were needed for another task",
            Self::Timeout => "a timeout occurred",
            Self::ClearToSendWhileTransferInProgress => "CTS received while data transfer in progress",
            Self::MaxRetransmitRequestsReached => "maximum retransmit request limit reached",
            Self::UnexpectedDataTransfer => "unexpected data transfer packet",
            Self::BadSequenceNumber => "bad sequence number",
            Self::DuplicateSequenceNumber => "duplicate sequence number",
            Self::TotalMessageSizeTooBig => "total message size too big",
            Self::UnexpectedDataPacketOffset => "unexpected data packet offset",
            Self::DataPacketOffsetExceedsClearToSend => "data packet offset exceeds clear to send",
            Self::BadDataPacketOffset => "bad data packet offset",
            Self::Other => "other reason",
        };
        write!(f, "{} ({})", text, *self as u8)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportConfig {
    /// Maximum concurrent sessions, both directions combined.
    pub max_sessions: usize,
    /// Data packets a transmit session may emit per `update` call.
    pub frames_per_update: usize,
    /// Window size requested in each CTS.
    pub packets_per_clear_to_send: u8,
    /// Gap between broadcast data packets (50-200 ms per J1939-21).
    pub broadcast_packet_interval_us: u64,
    /// Retransmission requests allowed per receive session before aborting.
    pub max_retransmit_requests: u8,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_sessions: 8,
            frames_per_update: 16,
            packets_per_clear_to_send: 16,
            broadcast_packet_interval_us: 50_000,
            max_retransmit_requests: 2,
        }
    }
}

/// Outcome of a session, reported upward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    TransmitComplete { pgn: u32, source: u8, destination: u8 },
    TransmitFailed { pgn: u32, source: u8, destination: u8, reason: AbortReason },
    ReceiveFailed { pgn: u32, source: u8, destination: u8, reason: AbortReason },
}

#[derive(Debug, Default)]
pub struct TransportManager {
    config: TransportConfig,
    sessions: Vec<Session>,
    events: Vec<TransportEvent>,
}

impl TransportManager {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            sessions: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn is_transport_pgn(pgn: u32) -> bool {
        matches!(
            pgn,
            PGN_TP_CONNECTION_MANAGEMENT
                | PGN_TP_DATA_TRANSFER
                | PGN_ETP_CONNECTION_MANAGEMENT
                | PGN_ETP_DATA_TRANSFER
        )
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Returns true if a transmit session from `source` to `destination` is running.
    pub fn is_transmitting(&self, source: u8, destination: u8) -> bool {
        self.find(Direction::Transmit, source, destination).is_some()
    }

    /// Takes the session outcomes recorded since the last call.
    pub fn drain_events(&mut self) -> Vec<TransportEvent> {
        core::mem::take(&mut self.events)
    }

    /// Starts sending `data` (more than 8 bytes). The protocol is chosen from
    /// the payload size and whether the destination is global.
    pub fn send(
        &mut self,
        pgn: u32,
        priority: u8,
        source: u8,
        destination: u8,
        data: Vec<u8>,
        now_us: u64,
    ) -> Result<(), IsobusError> {
        let size = data.len();
        if size <= 8 {
            return Err(IsobusError::InvalidFrame("payload fits a single frame"));
        }
        let broadcast = destination == GLOBAL_ADDRESS;
        let protocol = match size {
            _ if size <= TP_MAX_SIZE => Protocol::Tp,
            _ if !broadcast && size <= ETP_MAX_SIZE => Protocol::Etp,
            _ => return Err(IsobusError::PayloadTooLarge(size)),
        };
        if self.find(Direction::Transmit, source, destination).is_some() {
            return Err(IsobusError::TransportBusy(source, destination));
        }
        if self.sessions.len() >= self.config.max_sessions {
            return Err(IsobusError::NoTransportSessionAvailable);
        }
        debug!(
            "Starting {:?} transmit of PGN {:#07x} ({} bytes) {:#04x} -> {:#04x}",
            protocol, pgn, size, source, destination
        );
        self.sessions.push(Session::new_transmit(
            protocol, pgn, priority, source, destination, data, broadcast, now_us,
        ));
        Ok(())
    }

    /// Aborts every transmit session between the two addresses.
    pub fn abort_transmit(&mut self, source: u8, destination: u8, reason: AbortReason, now_us: u64, tx: &mut Vec<CanFrame>) {
        while let Some(index) = self.find(Direction::Transmit, source, destination) {
            self.abort(index, reason, now_us, tx);
        }
    }

    /// Processes a TP/ETP frame addressed to us (or broadcast) and returns a
    /// message once it is completely reassembled.
    pub fn process_frame(
        &mut self,
        id: &CanIdentifier,
        data: &[u8],
        now_us: u64,
        tx: &mut Vec<CanFrame>,
    ) -> Option<CanMessage> {
        match id.pgn {
            PGN_TP_CONNECTION_MANAGEMENT => self.process_control(Protocol::Tp, id, data, now_us, tx),
            PGN_ETP_CONNECTION_MANAGEMENT => self.process_control(Protocol::Etp, id, data, now_us, tx),
            PGN_TP_DATA_TRANSFER => return self.process_data(Protocol::Tp, id, data, now_us, tx),
            PGN_ETP_DATA_TRANSFER => return self.process_data(Protocol::Etp, id, data, now_us, tx),
            _ => {}
        }
        None
    }

    /// Services timeouts and emits pending connection management and data frames.
    pub fn update(&mut self, now_us: u64, tx: &mut Vec<CanFrame>) {
        let mut index = 0;
        while index < self.sessions.len() {
            if self.update_session(index, now_us, tx) {
                index += 1;
            }
        }
    }

    /// Returns false if the session at `index` was removed.
    fn update_session(&mut self, index: usize, now_us: u64, tx: &mut Vec<CanFrame>) -> bool {
        let frames_per_update = self.config.frames_per_update.max(1);
        let interval = self.config.broadcast_packet_interval_us;
        let session = &mut self.sessions[index];
        match session.state {
            SessionState::SendRequestToSend => {
                let rts = ConnectionManagement::RequestToSend {
                    message_size: session.size() as u32,
                    total_packets: session.total_packets,
                    max_packets_per_cts: 0xFF,
                    pgn: session.pgn,
                };
                tx.push(session.control_frame(rts, now_us));
                session.state = SessionState::WaitForClearToSend;
                session.deadline_us = now_us + T3_US;
            }
            SessionState::SendBroadcastAnnounce => {
                let bam = ConnectionManagement::BroadcastAnnounce {
                    message_size: session.size() as u32,
                    total_packets: session.total_packets,
                    pgn: session.pgn,
                };
                tx.push(session.control_frame(bam, now_us));
                session.window_end = session.total_packets;
                session.state = SessionState::SendData;
                session.deadline_us = now_us + interval;
            }
            SessionState::SendDataPacketOffset => {
                let dpo = ConnectionManagement::DataPacketOffset {
                    packets: (session.window_end - session.next_packet + 1) as u8,
                    offset: session.offset,
                    pgn: session.pgn,
                };
                tx.push(session.control_frame(dpo, now_us));
                session.state = SessionState::SendData;
            }
            SessionState::SendData if session.broadcast => {
                if now_us >= session.deadline_us {
                    tx.push(session.data_frame(session.next_packet, now_us));
                    session.next_packet += 1;
                    session.deadline_us = now_us + interval;
                    if session.next_packet > session.total_packets {
                        self.finish_transmit(index);
                        return false;
                    }
                }
            }
            SessionState::SendData => {
                let mut sent = 0;
                while sent < frames_per_update && session.next_packet <= session.window_end {
                    tx.push(session.data_frame(session.next_packet, now_us));
                    session.next_packet += 1;
                    sent += 1;
                }
                if session.next_packet > session.window_end {
                    session.state = if session.window_end >= session.total_packets {
                        SessionState::WaitForEndOfMessageAck
                    } else {
                        SessionState::WaitForClearToSend
                    };
                    session.deadline_us = now_us + T3_US;
                }
            }
            SessionState::WaitForClearToSend
            | SessionState::WaitForEndOfMessageAck
            | SessionState::WaitForDataPacketOffset
            | SessionState::WaitForData => {
                if now_us >= session.deadline_us {
                    warn!(
                        "Transport session for PGN {:#07x} {:#04x} -> {:#04x} timed out in {:?}",
                        session.pgn, session.source, session.destination, session.state
                    );
                    self.abort(index, AbortReason::Timeout, now_us, tx);
                    return false;
                }
            }
        }
        true
    }

    fn process_control(&mut self, protocol: Protocol, id: &CanIdentifier, data: &[u8], now_us: u64, tx: &mut Vec<CanFrame>) {
        let message = match ConnectionManagement::decode(protocol, data) {
            Ok(message) => message,
            Err(e) => {
                debug!("Dropping {:?} connection management frame from {:#04x}: {}", protocol, id.source, e);
                return;
            }
        };
        trace!("{:?} CM from {:#04x}: {:?}", protocol, id.source, message);
        match message {
            ConnectionManagement::RequestToSend { message_size, total_packets, max_packets_per_cts, pgn } => {
                self.on_request_to_send(protocol, id, message_size as usize, total_packets, max_packets_per_cts, pgn, now_us, tx);
            }
            ConnectionManagement::BroadcastAnnounce { message_size, total_packets, pgn } => {
                self.on_broadcast_announce(id, message_size as usize, total_packets, pgn, now_us);
            }
            ConnectionManagement::ClearToSend { packets, next_packet, pgn } => {
                self.on_clear_to_send(protocol, id, packets, next_packet, pgn, now_us, tx);
            }
            ConnectionManagement::DataPacketOffset { packets, offset, pgn } => {
                self.on_data_packet_offset(id, packets, offset, pgn, now_us, tx);
            }
            ConnectionManagement::EndOfMessageAck { pgn, .. } => {
                match self.find(Direction::Transmit, id.destination, id.source) {
                    Some(index) if self.sessions[index].pgn == pgn => {
                        if self.sessions[index].state == SessionState::WaitForEndOfMessageAck {
                            self.finish_transmit(index);
                        } else {
                            debug!("Ignoring early EoMA from {:#04x}", id.source);
                        }
                    }
                    _ => trace!("EoMA from {:#04x} without a session", id.source),
                }
            }
            ConnectionManagement::Abort { reason, pgn } => {
                // An abort may close our transmit session or the peer's transmit to us.
                let index = self
                    .find(Direction::Transmit, id.destination, id.source)
                    .filter(|i| self.sessions[*i].pgn == pgn)
                    .or_else(|| {
                        self.find(Direction::Receive, id.source, id.destination)
                            .filter(|i| self.sessions[*i].pgn == pgn)
                    });
                if let Some(index) = index {
                    warn!("Peer {:#04x} aborted PGN {:#07x}: {}", id.source, pgn, reason);
                    let session = self.sessions.remove(index);
                    self.push_failure(&session, reason);
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn on_request_to_send(
        &mut self,
        protocol: Protocol,
        id: &CanIdentifier,
        size: usize,
        total_packets: u32,
        max_packets_per_cts: u8,
        pgn: u32,
        now_us: u64,
        tx: &mut Vec<CanFrame>,
    ) {
        if id.destination == GLOBAL_ADDRESS {
            debug!("Ignoring RTS sent to the global address by {:#04x}", id.source);
            return;
        }
        // Receive sessions are keyed by (sender, receiver); replies go back to the sender.
        let reject = |reason: AbortReason, tx: &mut Vec<CanFrame>| {
            let reply = CanIdentifier::new(
                crate::types::PRIORITY_LOWEST,
                protocol.connection_management_pgn(),
                id.source,
                id.destination,
            );
            let data = ConnectionManagement::Abort { reason, pgn }.encode(protocol);
            tx.push(CanFrame::from_identifier(&reply, data, now_us));
        };

        if self.find(Direction::Receive, id.source, id.destination).is_some() {
            warn!("Rejecting RTS from {:#04x}: session already active", id.source);
            reject(AbortReason::AlreadyInSession, tx);
            return;
        }
        let size_ok = match protocol {
            Protocol::Tp => size > 8 && size <= TP_MAX_SIZE && total_packets as usize == packet_count(size),
            Protocol::Etp => size > TP_MAX_SIZE && size <= ETP_MAX_SIZE,
        };
        if !size_ok {
            warn!("Rejecting RTS from {:#04x}: invalid size {}", id.source, size);
            reject(AbortReason::TotalMessageSizeTooBig, tx);
            return;
        }
        if self.sessions.len() >= self.config.max_sessions {
            warn!("Rejecting RTS from {:#04x}: no free session", id.source);
            reject(AbortReason::ResourcesNeeded, tx);
            return;
        }

        let mut session = Session::new_receive(
            protocol,
            pgn,
            id.priority,
            id.source,
            id.destination,
            size,
            false,
            self.config.max_retransmit_requests,
            now_us,
        );
        let window = match protocol {
            Protocol::Tp => self.config.packets_per_clear_to_send.min(max_packets_per_cts),
            Protocol::Etp => self.config.packets_per_clear_to_send,
        };
        let cts = session.open_window(window);
        tx.push(session.control_frame(cts, now_us));
        session.deadline_us = now_us + T2_US;
        debug!("Accepted {:?} RTS from {:#04x} for PGN {:#07x} ({} bytes)", protocol, id.source, pgn, size);
        self.sessions.push(session);
    }

    fn on_broadcast_announce(&mut self, id: &CanIdentifier, size: usize, total_packets: u32, pgn: u32, now_us: u64) {
        if id.destination != GLOBAL_ADDRESS {
            debug!("Ignoring BAM with destination {:#04x}", id.destination);
            return;
        }
        if size <= 8 || size > TP_MAX_SIZE || total_packets as usize != packet_count(size) {
            debug!("Ignoring BAM from {:#04x} with invalid size {}", id.source, size);
            return;
        }
        // A new announcement from the same sender replaces the previous one.
        if let Some(index) = self.find(Direction::Receive, id.source, GLOBAL_ADDRESS) {
            debug!("BAM from {:#04x} replaces an unfinished broadcast", id.source);
            self.sessions.remove(index);
        }
        if self.sessions.len() >= self.config.max_sessions {
            warn!("Dropping BAM from {:#04x}: no free session", id.source);
            return;
        }
        let mut session = Session::new_receive(
            Protocol::Tp, pgn, id.priority, id.source, GLOBAL_ADDRESS, size, true, 0, now_us,
        );
        session.window_end = session.total_packets;
        session.deadline_us = now_us + T1_US;
        self.sessions.push(session);
    }

    #[allow(clippy::too_many_arguments)]
    fn on_clear_to_send(
        &mut self,
        protocol: Protocol,
        id: &CanIdentifier,
        packets: u8,
        next_packet: u32,
        pgn: u32,
        now_us: u64,
        tx: &mut Vec<CanFrame>,
    ) {
        let Some(index) = self
            .find(Direction::Transmit, id.destination, id.source)
            .filter(|i| self.sessions[*i].protocol == protocol && self.sessions[*i].pgn == pgn)
        else {
            trace!("CTS from {:#04x} without a session", id.source);
            return;
        };
        let session = &mut self.sessions[index];
        match session.state {
            SessionState::WaitForClearToSend | SessionState::WaitForEndOfMessageAck => {}
            SessionState::SendData | SessionState::SendDataPacketOffset => {
                self.abort(index, AbortReason::ClearToSendWhileTransferInProgress, now_us, tx);
                return;
            }
            _ => return,
        }
        if packets == 0 {
            trace!("Receiver {:#04x} holds the connection", id.source);
            session.state = SessionState::WaitForClearToSend;
            session.deadline_us = now_us + T4_US;
            return;
        }
        if next_packet == 0 || next_packet > session.total_packets {
            self.abort(index, AbortReason::BadSequenceNumber, now_us, tx);
            return;
        }
        session.next_packet = next_packet;
        session.window_end = (next_packet + u32::from(packets) - 1).min(session.total_packets);
        session.state = match protocol {
            Protocol::Tp => SessionState::SendData,
            Protocol::Etp => {
                session.offset = next_packet - 1;
                SessionState::SendDataPacketOffset
            }
        };
    }

    fn on_data_packet_offset(&mut self, id: &CanIdentifier, packets: u8, offset: u32, pgn: u32, now_us: u64, tx: &mut Vec<CanFrame>) {
        let Some(index) = self
            .find(Direction::Receive, id.source, id.destination)
            .filter(|i| self.sessions[*i].protocol == Protocol::Etp && self.sessions[*i].pgn == pgn)
        else {
            return;
        };
        let session = &mut self.sessions[index];
        if session.state != SessionState::WaitForDataPacketOffset {
            self.abort(index, AbortReason::UnexpectedDataPacketOffset, now_us, tx);
            return;
        }
        if offset + 1 != session.next_packet {
            self.abort(index, AbortReason::BadDataPacketOffset, now_us, tx);
            return;
        }
        if offset + u32::from(packets) > session.window_end {
            self.abort(index, AbortReason::DataPacketOffsetExceedsClearToSend, now_us, tx);
            return;
        }
        session.offset = offset;
        session.state = SessionState::WaitForData;
        session.deadline_us = now_us + T1_US;
    }

    fn process_data(
        &mut self,
        protocol: Protocol,
        id: &CanIdentifier,
        data: &[u8],
        now_us: u64,
        tx: &mut Vec<CanFrame>,
    ) -> Option<CanMessage> {
        if data.is_empty() {
            return None;
        }
        let index = self
            .find(Direction::Receive, id.source, id.destination)
            .filter(|i| self.sessions[*i].protocol == protocol)?;
        let window = self.config.packets_per_clear_to_send;
        let session = &mut self.sessions[index];

        if session.state != SessionState::WaitForData {
            self.abort(index, AbortReason::UnexpectedDataTransfer, now_us, tx);
            return None;
        }

        let packet = u32::from(data[0]) + session.offset;
        if packet == session.next_packet {
            session.store_packet(packet, &data[1..]);
            session.next_packet += 1;
            session.deadline_us = now_us + T1_US;

            if session.next_packet > session.total_packets {
                let session = self.sessions.remove(index);
                if !session.broadcast {
                    let eoma = ConnectionManagement::EndOfMessageAck {
                        message_size: session.size() as u32,
                        total_packets: session.total_packets,
                        pgn: session.pgn,
                    };
                    tx.push(session.control_frame(eoma, now_us));
                }
                info!(
                    "Received PGN {:#07x} ({} bytes) from {:#04x}",
                    session.pgn,
                    session.size(),
                    session.source
                );
                return Some(session.into_message(now_us));
            }
            if !session.broadcast && session.next_packet > session.window_end {
                let cts = session.open_window(window);
                tx.push(session.control_frame(cts, now_us));
                session.deadline_us = now_us + T2_US;
            }
            return None;
        }

        if session.broadcast {
            warn!("Broadcast from {:#04x} lost packet {}, dropping it", session.source, session.next_packet);
            let session = self.sessions.remove(index);
            self.push_failure(&session, AbortReason::BadSequenceNumber);
            return None;
        }
        if packet < session.next_packet {
            self.abort(index, AbortReason::DuplicateSequenceNumber, now_us, tx);
            return None;
        }
        if session.retries_left == 0 {
            self.abort(index, AbortReason::MaxRetransmitRequestsReached, now_us, tx);
            return None;
        }
        session.retries_left -= 1;
        warn!(
            "Expected packet {} from {:#04x} but got {}, requesting retransmission ({} left)",
            session.next_packet, session.source, packet, session.retries_left
        );
        let cts = ConnectionManagement::ClearToSend {
            packets: (session.window_end - session.next_packet + 1) as u8,
            next_packet: session.next_packet,
            pgn: session.pgn,
        };
        if session.protocol == Protocol::Etp {
            session.state = SessionState::WaitForDataPacketOffset;
        }
        tx.push(session.control_frame(cts, now_us));
        session.deadline_us = now_us + T2_US;
        None
    }

    fn finish_transmit(&mut self, index: usize) {
        let session = self.sessions.remove(index);
        info!(
            "Transmitted PGN {:#07x} ({} bytes) {:#04x} -> {:#04x}",
            session.pgn,
            session.size(),
            session.source,
            session.destination
        );
        self.events.push(TransportEvent::TransmitComplete {
            pgn: session.pgn,
            source: session.source,
            destination: session.destination,
        });
    }

    /// Closes the session, telling the peer unless the session is a broadcast.
    fn abort(&mut self, index: usize, reason: AbortReason, now_us: u64, tx: &mut Vec<CanFrame>) {
        let session = self.sessions.remove(index);
        if !session.broadcast {
            let abort = ConnectionManagement::Abort { reason, pgn: session.pgn };
            tx.push(session.control_frame(abort, now_us));
        }
        warn!(
            "Aborted {:?} session for PGN {:#07x} {:#04x} -> {:#04x}: {}",
            session.protocol, session.pgn, session.source, session.destination, reason
        );
        self.push_failure(&session, reason);
    }

    fn push_failure(&mut self, session: &Session, reason: AbortReason) {
        let event = match session.direction {
            Direction::Transmit => TransportEvent::TransmitFailed {
                pgn: session.pgn,
                source: session.source,
                destination: session.destination,
                reason,
            },
            Direction::Receive => TransportEvent::ReceiveFailed {
                pgn: session.pgn,
                source: session.source,
                destination: session.destination,
                reason,
            },
        };
        self.events.push(event);
    }

    fn find(&self, direction: Direction, source: u8, destination: u8) -> Option<usize> {
        self.sessions.iter().position(|s| {
            s.direction == direction && s.source == source && s.destination == destination
        })
    }
}
