// crates/isobus-rs-linux/src/lib.rs
#![cfg(target_os = "linux")]

use isobus_rs::{CanFrame, CanInterface, IsobusError};
use log::{trace, warn};
use socketcan::{
    CanFrame as SocketCanFrame, CanSocket, EmbeddedFrame, ExtendedId, Frame, Socket, SocketOptions, StandardId,
};
use std::io;
use std::time::{Duration, Instant};

/// Mask of the identifier bits in a raw SocketCAN ID.
const EXTENDED_ID_MASK: u32 = 0x1FFF_FFFF;
const STANDARD_ID_MASK: u32 = 0x7FF;

/// A classic CAN interface (e.g. `can0`, `vcan0`) opened through SocketCAN.
pub struct SocketCanInterface {
    socket: CanSocket,
    interface_name: String,
    /// Received frames are stamped relative to this instant.
    epoch: Instant,
}

impl SocketCanInterface {
    /// Opens `interface_name` with a short read timeout so that
    /// `receive_frame` returns regularly when the bus is idle.
    pub fn open(interface_name: &str) -> Result<Self, IsobusError> {
        let socket = CanSocket::open(interface_name)
            .map_err(|e| IsobusError::Io(format!("Cannot open '{}': {}", interface_name, e)))?;
        let interface = Self {
            socket,
            interface_name: interface_name.to_string(),
            epoch: Instant::now(),
        };
        interface.set_read_timeout(Duration::from_millis(10))?;
        Ok(interface)
    }

    pub fn interface_name(&self) -> &str {
        &self.interface_name
    }

    /// Sets how long `receive_frame` blocks when no frame is pending.
    pub fn set_read_timeout(&self, timeout: Duration) -> Result<(), IsobusError> {
        self.socket
            .set_read_timeout(timeout)
            .map_err(|e| IsobusError::Io(format!("Failed to set read timeout: {}", e)))
    }

    /// Switches between blocking reads (with timeout) and polling reads.
    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<(), IsobusError> {
        self.socket
            .set_nonblocking(nonblocking)
            .map_err(|e| IsobusError::Io(format!("Failed to set non-blocking mode: {}", e)))
    }

    /// Controls whether frames sent here are echoed to other sockets on this host.
    ///
    /// A process that receives on a second socket of the same interface should
    /// disable this on its transmit socket, or it reads back its own claims.
    pub fn set_loopback(&self, enabled: bool) -> Result<(), IsobusError> {
        self.socket
            .set_loopback(enabled)
            .map_err(|e| IsobusError::Io(format!("Failed to set loopback: {}", e)))
    }

    fn now_us(&self) -> u64 {
        self.epoch.elapsed().as_micros() as u64
    }
}

fn to_socketcan(frame: &CanFrame) -> Result<SocketCanFrame, IsobusError> {
    let payload = frame.payload();
    let converted = if frame.is_extended {
        ExtendedId::new(frame.id).and_then(|id| SocketCanFrame::new(id, payload))
    } else {
        u16::try_from(frame.id)
            .ok()
            .and_then(StandardId::new)
            .and_then(|id| SocketCanFrame::new(id, payload))
    };
    converted.ok_or(IsobusError::InvalidFrame("identifier or payload not representable"))
}

fn from_socketcan(frame: &SocketCanFrame, timestamp_us: u64) -> Result<CanFrame, IsobusError> {
    if frame.is_extended() {
        CanFrame::new_extended(frame.raw_id() & EXTENDED_ID_MASK, frame.data(), timestamp_us)
    } else {
        let mut standard = CanFrame::new_extended(frame.raw_id() & STANDARD_ID_MASK, frame.data(), timestamp_us)?;
        standard.is_extended = false;
        Ok(standard)
    }
}

impl CanInterface for SocketCanInterface {
    fn send_frame(&mut self, frame: &CanFrame) -> Result<(), IsobusError> {
        let socketcan_frame = to_socketcan(frame)?;
        self.socket
            .write_frame(&socketcan_frame)
            .map_err(|e| IsobusError::Io(format!("SocketCAN transmit error: {}", e)))?;
        trace!("Sent CAN frame: ID={:#010X}, len={}", frame.id, frame.len);
        Ok(())
    }

    fn receive_frame(&mut self) -> Result<Option<CanFrame>, IsobusError> {
        loop {
            let frame = match self.socket.read_frame() {
                Ok(frame) => frame,
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                    return Ok(None);
                }
                Err(e) => return Err(IsobusError::Io(format!("SocketCAN receive error: {}", e))),
            };
            match frame {
                // Error frames carry controller status, not J1939 traffic.
                SocketCanFrame::Error(_) => {
                    warn!("CAN error frame on '{}': {:#010X}", self.interface_name, frame.raw_id());
                    continue;
                }
                SocketCanFrame::Remote(_) => continue,
                SocketCanFrame::Data(_) => {}
            }
            return from_socketcan(&frame, self.now_us()).map(Some);
        }
    }
}
