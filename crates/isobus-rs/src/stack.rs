// crates/isobus-rs/src/stack.rs
//! Threaded driver for the stack.
//!
//! A hardware receive thread pushes frames into a [`FrameSender`]. One tick
//! thread calls [`IsobusStack::update`] or [`IsobusStack::update_and_flush`],
//! which drains the queue and services the network manager and every TC
//! client under a single lock. Application calls made through `with_network`
//! and `with_client` take the same lock, so they never interleave with a tick.

use crate::frame::CanFrame;
use crate::hal::{CanInterface, IsobusError};
use crate::network::{NetworkConfig, NetworkManager};
use crate::tc_client::TaskControllerClient;
use crossbeam_channel::{Receiver, Sender};
use log::{debug, info};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

/// Producer side of the receive queue. Cheap to clone and never blocks.
#[derive(Debug, Clone)]
pub struct FrameSender(Sender<CanFrame>);

impl FrameSender {
    pub fn push(&self, frame: CanFrame) -> Result<(), IsobusError> {
        self.0.send(frame).map_err(|_| IsobusError::QueueDisconnected)
    }
}

/// Identifies a TC client owned by an [`IsobusStack`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TcClientHandle(usize);

struct StackState {
    network: NetworkManager,
    clients: Vec<TaskControllerClient>,
}

impl StackState {
    /// One pass over the network and every live client.
    fn tick(&mut self, now_us: u64) -> Result<(), IsobusError> {
        let events = self.network.update(now_us);
        for client in self.clients.iter_mut().filter(|c| !c.is_terminated()) {
            for event in &events {
                client.process_event(event, &mut self.network, now_us)?;
            }
            client.update(&mut self.network, now_us)?;
        }
        Ok(())
    }
}

/// Process-wide owner of the network manager and its TC clients.
#[derive(Clone)]
pub struct IsobusStack {
    state: Arc<Mutex<StackState>>,
    rx: Receiver<CanFrame>,
    tx: Sender<CanFrame>,
    start: Instant,
}

impl core::fmt::Debug for IsobusStack {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IsobusStack")
            .field("queued_frames", &self.rx.len())
            .finish_non_exhaustive()
    }
}

impl IsobusStack {
    pub fn new(config: NetworkConfig) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self {
            state: Arc::new(Mutex::new(StackState {
                network: NetworkManager::new(config),
                clients: Vec::new(),
            })),
            rx,
            tx,
            start: Instant::now(),
        }
    }

    pub fn frame_sender(&self) -> FrameSender {
        FrameSender(self.tx.clone())
    }

    /// Microseconds since the stack was created; the clock `update_and_flush` uses.
    pub fn now_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }

    fn lock(&self) -> Result<MutexGuard<'_, StackState>, IsobusError> {
        self.state.lock().map_err(|_| IsobusError::PoisonedLock)
    }

    /// Runs `f` with exclusive access to the network manager.
    pub fn with_network<R>(&self, f: impl FnOnce(&mut NetworkManager) -> R) -> Result<R, IsobusError> {
        let mut state = self.lock()?;
        Ok(f(&mut state.network))
    }

    /// Hands a configured client to the stack.
    pub fn add_task_controller_client(&self, client: TaskControllerClient) -> Result<TcClientHandle, IsobusError> {
        let mut state = self.lock()?;
        state.clients.push(client);
        Ok(TcClientHandle(state.clients.len() - 1))
    }

    /// Runs `f` with exclusive access to a client and the network manager.
    pub fn with_client<R>(
        &self,
        handle: TcClientHandle,
        f: impl FnOnce(&mut TaskControllerClient, &mut NetworkManager) -> R,
    ) -> Result<R, IsobusError> {
        let mut guard = self.lock()?;
        let StackState { network, clients } = &mut *guard;
        let client = clients.get_mut(handle.0).ok_or(IsobusError::UnknownClient(handle.0))?;
        Ok(f(client, network))
    }

    /// Terminates a client. Safe to call from any thread while ticks are running.
    pub fn terminate_client(&self, handle: TcClientHandle) -> Result<(), IsobusError> {
        let now_us = self.now_us();
        self.with_client(handle, |client, network| client.terminate(network, now_us))??;
        info!("Task controller client {} terminated", handle.0);
        Ok(())
    }

    /// Drains received frames, ticks at `now_us` and returns the frames to transmit.
    pub fn update(&self, now_us: u64) -> Result<Vec<CanFrame>, IsobusError> {
        let mut state = self.lock()?;
        self.drain_queue(&mut state);
        state.tick(now_us)?;
        Ok(state.network.take_tx_frames())
    }

    /// Like `update` with the stack's own clock, then writes the frames to
    /// `interface`. Frames the interface refuses stay queued for the next call.
    pub fn update_and_flush<I: CanInterface + ?Sized>(&self, interface: &mut I) -> Result<usize, IsobusError> {
        let now_us = self.now_us();
        let mut state = self.lock()?;
        self.drain_queue(&mut state);
        state.tick(now_us)?;
        state.network.flush(interface)
    }

    fn drain_queue(&self, state: &mut StackState) {
        let mut count = 0;
        for frame in self.rx.try_iter() {
            state.network.process_rx_frame(frame);
            count += 1;
        }
        if count > 0 {
            debug!("Drained {} received frames", count);
        }
    }
}
