// crates/isobus-rs/src/network.rs
//! The network manager: one owned context that connects the frame layer,
//! the control function registry, the transport sessions and the PGN callbacks.
//!
//! Nothing in here blocks. Received frames are queued by `process_rx_frame`
//! and handled by the next `update`, which is also the only place timers
//! advance. A stalled `update` is a stalled protocol.

use crate::callbacks::{CallbackHandle, PgnCallback, PgnCallbackRegistry};
use crate::control_function::{
    AddressChange, ControlFunction, ControlFunctionHandle, ControlFunctionKind,
    ControlFunctionRegistry,
};
use crate::frame::{CanFrame, CanIdentifier, CanMessage};
use crate::hal::{CanInterface, IsobusError};
use crate::name::{Name, NameFilter};
use crate::transport::{AbortReason, TransportConfig, TransportEvent, TransportManager};
use crate::types::{GLOBAL_ADDRESS, PGN_ADDRESS_CLAIM, PGN_REQUEST};
use alloc::collections::VecDeque;
use alloc::vec::Vec;
use log::{debug, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkConfig {
    /// Concurrent TP/ETP sessions, both directions combined.
    pub max_transport_sessions: usize,
    /// Data packets one transport session may emit per `update`.
    pub frames_per_update: usize,
    /// Window size announced in each CTS.
    pub packets_per_clear_to_send: u8,
    /// Gap between broadcast (BAM) data packets.
    pub broadcast_packet_interval_us: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            max_transport_sessions: 8,
            frames_per_update: 16,
            packets_per_clear_to_send: 16,
            broadcast_packet_interval_us: 50_000,
        }
    }
}

impl NetworkConfig {
    fn transport(&self) -> TransportConfig {
        TransportConfig {
            max_sessions: self.max_transport_sessions,
            frames_per_update: self.frames_per_update,
            packets_per_clear_to_send: self.packets_per_clear_to_send,
            broadcast_packet_interval_us: self.broadcast_packet_interval_us,
            ..TransportConfig::default()
        }
    }
}

/// Something the application (or a TC client) may need to react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkEvent {
    /// A message for one of our internal control functions, or a broadcast.
    MessageReceived(CanMessage),
    /// A multi-frame transmission finished.
    TransmitComplete { pgn: u32, source: u8, destination: u8 },
    /// A multi-frame transmission was aborted.
    TransmitFailed { pgn: u32, source: u8, destination: u8, reason: AbortReason },
    /// A multi-frame reception was aborted.
    ReceiveFailed { pgn: u32, source: u8, destination: u8, reason: AbortReason },
    /// A control function went online, moved or went offline.
    AddressChanged(AddressChange),
}

impl From<TransportEvent> for NetworkEvent {
    fn from(event: TransportEvent) -> Self {
        match event {
            TransportEvent::TransmitComplete { pgn, source, destination } => {
                Self::TransmitComplete { pgn, source, destination }
            }
            TransportEvent::TransmitFailed { pgn, source, destination, reason } => {
                Self::TransmitFailed { pgn, source, destination, reason }
            }
            TransportEvent::ReceiveFailed { pgn, source, destination, reason } => {
                Self::ReceiveFailed { pgn, source, destination, reason }
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct NetworkManager {
    registry: ControlFunctionRegistry,
    transport: TransportManager,
    callbacks: PgnCallbackRegistry,
    rx_queue: VecDeque<CanFrame>,
    tx_queue: Vec<CanFrame>,
    events: Vec<NetworkEvent>,
}

impl NetworkManager {
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            registry: ControlFunctionRegistry::new(),
            transport: TransportManager::new(config.transport()),
            callbacks: PgnCallbackRegistry::default(),
            rx_queue: VecDeque::new(),
            tx_queue: Vec::new(),
            events: Vec::new(),
        }
    }

    // --- Control functions ---

    /// Registers an internal control function; it starts claiming on the next `update`.
    pub fn register_internal_control_function(
        &mut self,
        name: Name,
        preferred_address: u8,
    ) -> Result<ControlFunctionHandle, IsobusError> {
        let handle = self.registry.register_internal(name, preferred_address)?;
        debug!(
            "Registered internal control function {:#018x} preferring {:#04x}",
            name.full_name(),
            preferred_address
        );
        Ok(handle)
    }

    pub fn register_partnered_control_function(&mut self, filters: Vec<NameFilter>) -> ControlFunctionHandle {
        self.registry.register_partner(filters)
    }

    /// Releases a control function. Transmissions from an internal one are aborted first.
    pub fn remove_control_function(&mut self, handle: ControlFunctionHandle, now_us: u64) -> Result<ControlFunction, IsobusError> {
        if let Some(cf) = self.registry.get(handle) {
            if cf.kind() == ControlFunctionKind::Internal {
                if let Some(source) = cf.address() {
                    for destination in 0..=GLOBAL_ADDRESS {
                        if self.transport.is_transmitting(source, destination) {
                            self.transport.abort_transmit(source, destination, AbortReason::Other, now_us, &mut self.tx_queue);
                        }
                    }
                }
            }
        }
        self.registry.remove(handle)
    }

    pub fn control_function(&self, handle: ControlFunctionHandle) -> Option<&ControlFunction> {
        self.registry.get(handle)
    }

    pub fn address_of(&self, handle: ControlFunctionHandle) -> Option<u8> {
        self.registry.address_of(handle)
    }

    pub fn resolve_address(&self, address: u8) -> Option<ControlFunctionHandle> {
        self.registry.resolve_address(address)
    }

    // --- Callbacks ---

    pub fn add_pgn_callback(
        &mut self,
        pgn: u32,
        destination: Option<ControlFunctionHandle>,
        callback: PgnCallback,
    ) -> CallbackHandle {
        self.callbacks.add(pgn, destination, callback)
    }

    pub fn remove_pgn_callback(&mut self, handle: CallbackHandle) -> bool {
        self.callbacks.remove(handle)
    }

    // --- Frame path ---

    /// Queues a frame received from the bus. Handling happens in `update`.
    pub fn process_rx_frame(&mut self, frame: CanFrame) {
        self.rx_queue.push_back(frame);
    }

    /// Sends `data` from the internal control function `source`.
    ///
    /// `destination = None` broadcasts. Payloads longer than 8 bytes open a
    /// TP, BAM or ETP session whose outcome is reported by a later event.
    pub fn send_message(
        &mut self,
        pgn: u32,
        data: &[u8],
        source: ControlFunctionHandle,
        destination: Option<ControlFunctionHandle>,
        priority: u8,
        now_us: u64,
    ) -> Result<(), IsobusError> {
        let source_cf = self
            .registry
            .get(source)
            .ok_or(IsobusError::UnknownControlFunction(source))?;
        if source_cf.kind() != ControlFunctionKind::Internal {
            return Err(IsobusError::UnknownControlFunction(source));
        }
        let source_address = source_cf.address().ok_or(IsobusError::AddressNotClaimed(source))?;
        let destination_address = match destination {
            None => GLOBAL_ADDRESS,
            Some(handle) => self
                .registry
                .address_of(handle)
                .ok_or(IsobusError::AddressNotClaimed(handle))?,
        };

        if data.len() > 8 {
            return self.transport.send(pgn, priority, source_address, destination_address, data.to_vec(), now_us);
        }
        let id = CanIdentifier::new(priority, pgn, destination_address, source_address);
        let frame = CanFrame::new_extended(id.encode(), data, now_us)?;
        trace!("TX {:#010x} {:02x?}", frame.id, frame.payload());
        self.tx_queue.push(frame);
        Ok(())
    }

    /// Returns true while a multi-frame transmission between the two is running.
    pub fn is_transmitting(&self, source: ControlFunctionHandle, destination: ControlFunctionHandle) -> bool {
        match (self.address_of(source), self.address_of(destination)) {
            (Some(s), Some(d)) => self.transport.is_transmitting(s, d),
            _ => false,
        }
    }

    /// Aborts a multi-frame transmission from `source` to `destination`.
    pub fn abort_transport(&mut self, source: ControlFunctionHandle, destination: ControlFunctionHandle, now_us: u64) {
        if let (Some(s), Some(d)) = (self.address_of(source), self.address_of(destination)) {
            self.transport.abort_transmit(s, d, AbortReason::Other, now_us, &mut self.tx_queue);
        }
    }

    /// Handles queued frames, runs address claiming and transport timers, and
    /// returns everything that happened since the previous call.
    pub fn update(&mut self, now_us: u64) -> Vec<NetworkEvent> {
        while let Some(frame) = self.rx_queue.pop_front() {
            self.handle_frame(&frame, now_us);
        }
        self.registry.update(now_us, &mut self.tx_queue);
        self.transport.update(now_us, &mut self.tx_queue);

        for event in self.transport.drain_events() {
            self.events.push(event.into());
        }
        for change in self.registry.drain_changes() {
            self.on_address_change(&change, now_us);
            self.events.push(NetworkEvent::AddressChanged(change));
        }
        core::mem::take(&mut self.events)
    }

    /// Takes the frames waiting for transmission.
    pub fn take_tx_frames(&mut self) -> Vec<CanFrame> {
        core::mem::take(&mut self.tx_queue)
    }

    /// Writes pending frames to `interface` in order. On error the unsent
    /// frames stay queued.
    pub fn flush<I: CanInterface + ?Sized>(&mut self, interface: &mut I) -> Result<usize, IsobusError> {
        let frames = core::mem::take(&mut self.tx_queue);
        for (sent, frame) in frames.iter().enumerate() {
            if let Err(e) = interface.send_frame(frame) {
                let mut unsent = frames[sent..].to_vec();
                unsent.append(&mut self.tx_queue);
                self.tx_queue = unsent;
                return Err(e);
            }
        }
        Ok(frames.len())
    }

    /// Reads every pending frame from `interface` into the receive queue.
    pub fn poll<I: CanInterface + ?Sized>(&mut self, interface: &mut I) -> Result<usize, IsobusError> {
        let mut count = 0;
        while let Some(frame) = interface.receive_frame()? {
            self.process_rx_frame(frame);
            count += 1;
        }
        Ok(count)
    }

    fn handle_frame(&mut self, frame: &CanFrame, now_us: u64) {
        let Some(id) = frame.identifier() else {
            trace!("Ignoring standard frame {:#05x}", frame.id);
            return;
        };
        let data = frame.payload();

        if id.pgn == PGN_ADDRESS_CLAIM {
            let Ok(bytes) = <[u8; 8]>::try_from(data) else {
                debug!("Dropping address claim from {:#04x} with {} bytes", id.source, data.len());
                return;
            };
            self.registry
                .process_address_claim(Name::from_le_bytes(bytes), id.source, now_us, &mut self.tx_queue);
            return;
        }

        if !self.registry.accepts_destination(id.destination) {
            return;
        }

        if TransportManager::is_transport_pgn(id.pgn) {
            if let Some(message) = self.transport.process_frame(&id, data, now_us, &mut self.tx_queue) {
                self.deliver(message);
            }
            return;
        }

        let message = CanMessage {
            pgn: id.pgn,
            priority: id.priority,
            source: id.source,
            destination: id.destination,
            data: data.to_vec(),
            timestamp_us: frame.timestamp_us,
        };
        if message.pgn == PGN_REQUEST && message.get_u24_le(0) == Some(PGN_ADDRESS_CLAIM) {
            self.registry
                .process_request_for_claim(id.destination, now_us, &mut self.tx_queue);
        }
        self.deliver(message);
    }

    fn deliver(&mut self, message: CanMessage) {
        let destination = if message.is_broadcast() {
            None
        } else {
            self.registry.internal_at(message.destination)
        };
        self.callbacks.dispatch(&message, destination);
        self.events.push(NetworkEvent::MessageReceived(message));
    }

    /// Sessions with an address that just went away cannot complete.
    fn on_address_change(&mut self, change: &AddressChange, now_us: u64) {
        if change.previous == crate::types::NULL_ADDRESS || change.kind != ControlFunctionKind::Internal {
            return;
        }
        for destination in 0..=GLOBAL_ADDRESS {
            if self.transport.is_transmitting(change.previous, destination) {
                warn!(
                    "Internal control function left {:#04x}, aborting transmission to {:#04x}",
                    change.previous, destination
                );
                self.transport
                    .abort_transmit(change.previous, destination, AbortReason::Other, now_us, &mut self.tx_queue);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::name::FunctionCode;
    use crate::types::{PGN_PROCESS_DATA, PRIORITY_PROCESS_DATA};
    use alloc::sync::Arc;
    use core::sync::atomic::{AtomicUsize, Ordering};

    fn implement_name() -> Name {
        let mut name = Name::default();
        name.set_arbitrary_address_capable(true);
        name.set_industry_group(2).unwrap();
        name.set_function_code(FunctionCode::RateControl as u8).unwrap();
        name.set_identity_number(2).unwrap();
        name.set_manufacturer_code(64).unwrap();
        name
    }

    fn tc_name() -> Name {
        let mut name = Name::default();
        name.set_industry_group(2).unwrap();
        name.set_function_code(FunctionCode::TaskController as u8).unwrap();
        name.set_identity_number(99).unwrap();
        name
    }

    fn claim_frame(name: Name, address: u8) -> CanFrame {
        crate::control_function::address_claim::address_claim_frame(&name, address, 0)
    }

    /// Runs `update` until the internal control function has its address.
    fn online_manager() -> (NetworkManager, ControlFunctionHandle, ControlFunctionHandle) {
        let mut manager = NetworkManager::new(NetworkConfig::default());
        let internal = manager.register_internal_control_function(implement_name(), 0x80).unwrap();
        let partner = manager.register_partnered_control_function(alloc::vec![NameFilter::task_controller()]);
        let mut now = 0;
        while manager.address_of(internal).is_none() {
            manager.update(now);
            now += 10_000;
            assert!(now < 2_000_000, "address claim did not finish");
        }
        manager.take_tx_frames();
        manager.process_rx_frame(claim_frame(tc_name(), 0xF7));
        let events = manager.update(now);
        assert!(events.iter().any(|e| matches!(e, NetworkEvent::AddressChanged(c) if c.handle == partner && c.is_online())));
        (manager, internal, partner)
    }

    #[test]
    fn test_send_requires_claimed_address() {
        let mut manager = NetworkManager::new(NetworkConfig::default());
        let internal = manager.register_internal_control_function(implement_name(), 0x80).unwrap();
        assert_eq!(
            manager.send_message(PGN_PROCESS_DATA, &[0; 8], internal, None, PRIORITY_PROCESS_DATA, 0),
            Err(IsobusError::AddressNotClaimed(internal))
        );
    }

    #[test]
    fn test_single_frame_send_to_partner() {
        let (mut manager, internal, partner) = online_manager();
        manager
            .send_message(PGN_PROCESS_DATA, &[1, 2, 3, 4, 5, 6, 7, 8], internal, Some(partner), PRIORITY_PROCESS_DATA, 0)
            .unwrap();
        let frames = manager.take_tx_frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].id, 0x14CBF780);
        assert_eq!(frames[0].payload(), &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_frames_for_other_nodes_are_filtered() {
        let (mut manager, internal, _) = online_manager();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        manager.add_pgn_callback(
            PGN_PROCESS_DATA,
            Some(internal),
            alloc::boxed::Box::new(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            }),
        );

        // Addressed to us, then to some other node.
        manager.process_rx_frame(CanFrame::new_extended(0x14CB80F7, &[0x03, 0, 0x21, 0x01, 1, 0, 0, 0], 0).unwrap());
        manager.process_rx_frame(CanFrame::new_extended(0x14CB81F7, &[0x03, 0, 0x21, 0x01, 1, 0, 0, 0], 0).unwrap());
        let events = manager.update(3_000_000);
        let received: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, NetworkEvent::MessageReceived(_)))
            .collect();
        assert_eq!(received.len(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_request_for_claim_is_answered() {
        let (mut manager, _, _) = online_manager();
        manager.process_rx_frame(CanFrame::new_extended(0x18EAFFF7, &[0x00, 0xEE, 0x00], 0).unwrap());
        let events = manager.update(3_000_000);
        let frames = manager.take_tx_frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].id, 0x18EEFF80);
        assert_eq!(Name::from_le_bytes(frames[0].data), implement_name());
        // The request itself is still delivered to the application.
        assert!(events.iter().any(|e| matches!(e, NetworkEvent::MessageReceived(m) if m.pgn == PGN_REQUEST)));
    }

    #[test]
    fn test_partner_going_offline_is_reported() {
        let (mut manager, _, partner) = online_manager();
        manager.process_rx_frame(claim_frame(tc_name(), crate::types::NULL_ADDRESS));
        let events = manager.update(3_000_000);
        assert!(events.iter().any(|e| matches!(e, NetworkEvent::AddressChanged(c) if c.handle == partner && c.is_offline())));
        assert!(manager.address_of(partner).is_none());
    }

    #[test]
    fn test_flush_keeps_unsent_frames() {
        struct FailingInterface {
            accepted: usize,
        }
        impl CanInterface for FailingInterface {
            fn send_frame(&mut self, _frame: &CanFrame) -> Result<(), IsobusError> {
                if self.accepted == 1 {
                    return Err(IsobusError::Io(alloc::string::String::from("bus off")));
                }
                self.accepted += 1;
                Ok(())
            }
            fn receive_frame(&mut self) -> Result<Option<CanFrame>, IsobusError> {
                Ok(None)
            }
        }

        let (mut manager, internal, _) = online_manager();
        for _ in 0..3 {
            manager
                .send_message(PGN_PROCESS_DATA, &[0; 8], internal, None, PRIORITY_PROCESS_DATA, 0)
                .unwrap();
        }
        let mut interface = FailingInterface { accepted: 0 };
        assert!(manager.flush(&mut interface).is_err());
        assert_eq!(manager.take_tx_frames().len(), 2);
    }
}
