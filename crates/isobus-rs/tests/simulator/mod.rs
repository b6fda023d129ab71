// crates/isobus-rs/tests/simulator/mod.rs
#![allow(dead_code)]

pub mod ddop;
pub mod interface;
pub mod tc_server;

pub use interface::SimulatedInterface;
pub use tc_server::TaskControllerServer;

use isobus_rs::{CanFrame, NetworkConfig, NetworkEvent, NetworkManager, TaskControllerClient};
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

/// Simulation step used by the tests (10 ms, a typical ECU task period).
pub const TICK_US: u64 = 10_000;

/// A frame in flight on the virtual bus.
#[derive(Debug, Clone)]
pub struct Packet {
    pub frame: CanFrame,
    pub sender: usize,
}

/// A virtual CAN bus that manages time and frame delivery.
///
/// CAN is a broadcast medium: every frame reaches every node except its sender.
pub struct VirtualBus {
    /// Current simulation time in microseconds.
    current_time_us: u64,
    /// Map: node index -> frames waiting to be received
    inboxes: HashMap<usize, VecDeque<CanFrame>>,
    /// Trace of all frames sent on the bus (for assertions).
    pub history: Vec<Packet>,
}

impl VirtualBus {
    pub fn new() -> Self {
        Self {
            current_time_us: 0,
            inboxes: HashMap::new(),
            history: Vec::new(),
        }
    }

    /// Advances simulation time.
    pub fn tick(&mut self, duration_us: u64) {
        self.current_time_us += duration_us;
    }

    pub fn current_time(&self) -> u64 {
        self.current_time_us
    }

    /// Registers a node (creates an inbox) and returns its index.
    pub fn register_node(&mut self) -> usize {
        let index = self.inboxes.len();
        self.inboxes.insert(index, VecDeque::new());
        index
    }

    pub fn transmit(&mut self, sender: usize, mut frame: CanFrame) {
        frame.timestamp_us = self.current_time_us;
        self.history.push(Packet { frame, sender });
        for (node, inbox) in self.inboxes.iter_mut() {
            if *node != sender {
                inbox.push_back(frame);
            }
        }
    }

    pub fn receive(&mut self, node: usize) -> Option<CanFrame> {
        self.inboxes.get_mut(&node).and_then(VecDeque::pop_front)
    }

    /// Frames of `pgn` seen on the bus so far.
    pub fn frames_with_pgn(&self, pgn: u32) -> Vec<CanFrame> {
        self.history
            .iter()
            .filter(|p| p.frame.identifier().is_some_and(|id| id.pgn == pgn))
            .map(|p| p.frame)
            .collect()
    }
}

/// Whatever runs on top of a node's network manager.
pub trait Application {
    fn on_event(&mut self, event: &NetworkEvent, network: &mut NetworkManager, now_us: u64);
    fn update(&mut self, network: &mut NetworkManager, now_us: u64);
}

/// A bare node that only takes part in address claiming.
impl Application for () {
    fn on_event(&mut self, _event: &NetworkEvent, _network: &mut NetworkManager, _now_us: u64) {}
    fn update(&mut self, _network: &mut NetworkManager, _now_us: u64) {}
}

impl Application for TaskControllerClient {
    fn on_event(&mut self, event: &NetworkEvent, network: &mut NetworkManager, now_us: u64) {
        if !self.is_terminated() {
            self.process_event(event, network, now_us).unwrap();
        }
    }

    fn update(&mut self, network: &mut NetworkManager, now_us: u64) {
        if !self.is_terminated() {
            TaskControllerClient::update(self, network, now_us).unwrap();
        }
    }
}

/// Wraps a network manager, its simulated interface and the application on top.
pub struct NodeHarness<A: Application> {
    pub network: NetworkManager,
    pub interface: Rc<RefCell<SimulatedInterface>>,
    pub app: A,
    pub index: usize,
}

impl<A: Application> NodeHarness<A> {
    pub fn new(bus: &mut VirtualBus, network: NetworkManager, app: A) -> Self {
        Self {
            network,
            interface: Rc::new(RefCell::new(SimulatedInterface::new())),
            app,
            index: bus.register_node(),
        }
    }

    pub fn with_default_network(bus: &mut VirtualBus, app: A) -> Self {
        Self::new(bus, NetworkManager::new(NetworkConfig::default()), app)
    }

    /// Runs a single cycle of the node logic at the bus's current time.
    pub fn run_cycle(&mut self, bus: &mut VirtualBus) {
        let now = bus.current_time();

        // 1. Move frames from the bus into the interface, then into the stack
        while let Some(frame) = bus.receive(self.index) {
            self.interface.borrow_mut().push_rx(frame);
        }
        self.network.poll(&mut *self.interface.borrow_mut()).unwrap();

        // 2. Run the stack and the application
        for event in self.network.update(now) {
            self.app.on_event(&event, &mut self.network, now);
        }
        self.app.update(&mut self.network, now);

        // 3. Put whatever was produced on the bus. A bus-off interface keeps it queued.
        if self.network.flush(&mut *self.interface.borrow_mut()).is_ok() {
            for frame in self.interface.borrow_mut().take_tx_frames() {
                bus.transmit(self.index, frame);
            }
        }
    }
}
