// crates/isobus-rs/tests/simulator/interface.rs
use isobus_rs::hal::{CanInterface, IsobusError};
use isobus_rs::CanFrame;
use std::collections::VecDeque;

/// A simulated CAN controller that buffers frames in memory.
pub struct SimulatedInterface {
    /// Incoming frames (from the bus to the node)
    rx_queue: VecDeque<CanFrame>,
    /// Outgoing frames (from the node to the bus)
    tx_queue: VecDeque<CanFrame>,
    /// While set, every transmission fails like a controller in bus-off.
    pub bus_off: bool,
}

impl SimulatedInterface {
    pub fn new() -> Self {
        Self {
            rx_queue: VecDeque::new(),
            tx_queue: VecDeque::new(),
            bus_off: false,
        }
    }

    /// Pushes a frame into the receive buffer (simulating arrival from the wire).
    pub fn push_rx(&mut self, frame: CanFrame) {
        self.rx_queue.push_back(frame);
    }

    /// Extracts all pending transmitted frames.
    pub fn take_tx_frames(&mut self) -> Vec<CanFrame> {
        self.tx_queue.drain(..).collect()
    }
}

impl CanInterface for SimulatedInterface {
    fn send_frame(&mut self, frame: &CanFrame) -> Result<(), IsobusError> {
        if self.bus_off {
            return Err(IsobusError::Io(String::from("bus off")));
        }
        self.tx_queue.push_back(*frame);
        Ok(())
    }

    fn receive_frame(&mut self) -> Result<Option<CanFrame>, IsobusError> {
        Ok(self.rx_queue.pop_front())
    }
}
