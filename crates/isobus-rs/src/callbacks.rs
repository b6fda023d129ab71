// crates/isobus-rs/src/callbacks.rs
//! Handler tables: per-DDI process data handlers for the TC client and
//! per-PGN message handlers for the network manager.
//!
//! Handlers run synchronously on the thread that calls `update`, so they must not block.

use crate::control_function::ControlFunctionHandle;
use crate::frame::CanMessage;
use alloc::boxed::Box;
use alloc::vec::Vec;

/// Called with `(element number, DDI, value)` for a value command.
/// Returns false if the value could not be applied.
pub type ValueCommandHandler = Box<dyn FnMut(u16, u16, i32) -> bool + Send>;

/// Called with `(element number, DDI)` for a value request.
/// Returns `None` if the value is not available.
pub type RequestValueHandler = Box<dyn FnMut(u16, u16) -> Option<i32> + Send>;

/// Called for every delivered message of a registered PGN.
pub type PgnCallback = Box<dyn FnMut(&CanMessage) + Send>;

/// Identifies a registered handler so it can be removed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CallbackHandle(u32);

/// Which DDIs a handler subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DdiFilter {
    Any,
    Ddi(u16),
}

impl DdiFilter {
    pub fn matches(self, ddi: u16) -> bool {
        match self {
            DdiFilter::Any => true,
            DdiFilter::Ddi(d) => d == ddi,
        }
    }
}

/// Ordered list of handlers keyed by DDI. Several handlers may share a DDI.
pub struct DdiDispatcher<H> {
    entries: Vec<(CallbackHandle, DdiFilter, H)>,
    next_handle: u32,
}

impl<H> Default for DdiDispatcher<H> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            next_handle: 0,
        }
    }
}

impl<H> core::fmt::Debug for DdiDispatcher<H> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DdiDispatcher")
            .field("handlers", &self.entries.len())
            .finish()
    }
}

impl<H> DdiDispatcher<H> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, filter: DdiFilter, handler: H) -> CallbackHandle {
        let handle = CallbackHandle(self.next_handle);
        self.next_handle = self.next_handle.wrapping_add(1);
        self.entries.push((handle, filter, handler));
        handle
    }

    pub fn remove(&mut self, handle: CallbackHandle) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(h, _, _)| *h != handle);
        before != self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns true if any handler subscribes to `ddi`.
    pub fn has_handler_for(&self, ddi: u16) -> bool {
        self.entries.iter().any(|(_, f, _)| f.matches(ddi))
    }

    /// Handlers subscribed to `ddi`, in registration order.
    pub fn handlers_for(&mut self, ddi: u16) -> impl Iterator<Item = &mut H> {
        self.entries
            .iter_mut()
            .filter(move |(_, f, _)| f.matches(ddi))
            .map(|(_, _, h)| h)
    }
}

impl DdiDispatcher<ValueCommandHandler> {
    /// Offers the value to every matching handler.
    /// Returns `None` without handlers, otherwise whether any handler accepted it.
    pub fn dispatch(&mut self, element_number: u16, ddi: u16, value: i32) -> Option<bool> {
        let mut handled = None;
        for handler in self.handlers_for(ddi) {
            let accepted = handler(element_number, ddi, value);
            handled = Some(handled.unwrap_or(false) || accepted);
        }
        handled
    }
}

impl DdiDispatcher<RequestValueHandler> {
    /// Asks matching handlers in order until one supplies the value.
    pub fn request(&mut self, element_number: u16, ddi: u16) -> Option<i32> {
        self.handlers_for(ddi)
            .find_map(|handler| handler(element_number, ddi))
    }
}

struct PgnEntry {
    handle: CallbackHandle,
    pgn: u32,
    destination: Option<ControlFunctionHandle>,
    callback: PgnCallback,
}

/// PGN-keyed message handlers of the network manager.
#[derive(Default)]
pub struct PgnCallbackRegistry {
    entries: Vec<PgnEntry>,
    next_handle: u32,
}

impl core::fmt::Debug for PgnCallbackRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PgnCallbackRegistry")
            .field("handlers", &self.entries.len())
            .finish()
    }
}

impl PgnCallbackRegistry {
    /// Registers `callback` for `pgn`. With `destination` set, only messages
    /// sent directly to that internal control function are delivered.
    pub fn add(&mut self, pgn: u32, destination: Option<ControlFunctionHandle>, callback: PgnCallback) -> CallbackHandle {
        let handle = CallbackHandle(self.next_handle);
        self.next_handle = self.next_handle.wrapping_add(1);
        self.entries.push(PgnEntry {
            handle,
            pgn,
            destination,
            callback,
        });
        handle
    }

    pub fn remove(&mut self, handle: CallbackHandle) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.handle != handle);
        before != self.entries.len()
    }

    /// Runs every callback matching the message. `destination` is the internal
    /// control function the message was addressed to, `None` for broadcasts.
    pub fn dispatch(&mut self, message: &CanMessage, destination: Option<ControlFunctionHandle>) -> usize {
        let mut invoked = 0;
        for entry in self.entries.iter_mut().filter(|e| e.pgn == message.pgn) {
            if entry.destination.is_some() && entry.destination != destination {
                continue;
            }
            (entry.callback)(message);
            invoked += 1;
        }
        invoked
    }
}
