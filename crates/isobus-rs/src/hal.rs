// crates/isobus-rs/src/hal.rs
use crate::control_function::ControlFunctionHandle;
use crate::frame::CanFrame;
use crate::name::NameField;
use crate::transport::AbortReason;
use alloc::string::String;
use alloc::vec::Vec;
use thiserror::Error;

/// Defines a portable, descriptive Error type for the ISOBUS stack.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IsobusError {
    /// The provided buffer is too small for the operation.
    #[error("Buffer is too short: expected {expected} bytes, got {actual}")]
    BufferTooShort { expected: usize, actual: usize },
    /// An underlying I/O error occurred in the hardware driver.
    #[error("An underlying I/O error occurred: {0}")]
    Io(String),
    /// A received frame is fundamentally invalid.
    #[error("Invalid CAN frame: {0}")]
    InvalidFrame(&'static str),
    /// A NAME field value does not fit in the field's bit width.
    #[error("Value {value:#x} does not fit in NAME field {field:?}")]
    InvalidNameField { field: NameField, value: u32 },
    /// The address is not a valid unicast address.
    #[error("Invalid address: {0:#04x}")]
    InvalidAddress(u8),
    /// Another internal control function already uses this NAME.
    #[error("An internal control function with NAME {0:#018x} already exists")]
    DuplicateName(u64),
    /// The handle does not refer to a registered control function.
    #[error("Unknown control function {0:?}")]
    UnknownControlFunction(ControlFunctionHandle),
    /// The control function has no address on the bus yet.
    #[error("Control function {0:?} has no claimed address")]
    AddressNotClaimed(ControlFunctionHandle),

    // --- Device Descriptor Object Pool ---
    /// An object with this ID already exists in the pool.
    #[error("Object ID {0} is already used in the pool")]
    DuplicateObjectId(u16),
    /// No object with this ID exists in the pool.
    #[error("Object ID {0} was not found in the pool")]
    ObjectNotFound(u16),
    /// The reserved NULL object ID was used for a real object.
    #[error("Object ID {0:#06x} is reserved")]
    ReservedObjectId(u16),
    /// A device element references an object that is not in the pool.
    #[error("Object {parent} references missing object {child}")]
    DanglingReference { parent: u16, child: u16 },
    /// An object is structurally invalid.
    #[error("Invalid object {object_id}: {reason}")]
    InvalidObject { object_id: u16, reason: &'static str },
    /// A designator exceeds the maximum encodable length.
    #[error("Designator of object {object_id} is {length} bytes long")]
    DesignatorTooLong { object_id: u16, length: usize },
    /// Binary pool data ended in the middle of a record.
    #[error("Object pool data is truncated")]
    TruncatedPoolData,
    /// Binary pool data contains an unknown object table tag.
    #[error("Unknown object table tag {0:?}")]
    UnknownObjectTag([u8; 3]),
    /// The pool does not fit into the largest transport session.
    #[error("Object pool of {0} bytes exceeds the transport limit")]
    PoolTooLarge(usize),
    /// One or more pool builder operations failed.
    #[error("Object pool construction failed with {} error(s)", .0.len())]
    PoolBuildFailed(Vec<IsobusError>),

    // --- Transport ---
    /// A payload exceeds the maximum transport length for its destination.
    #[error("Payload of {0} bytes is too large for the selected transport")]
    PayloadTooLarge(usize),
    /// A multi-frame session with the same peers is already active.
    #[error("A transport session from {0:#04x} to {1:#04x} is already active")]
    TransportBusy(u8, u8),
    /// The transport session limit is reached.
    #[error("No free transport session available")]
    NoTransportSessionAvailable,
    /// A transport session was aborted.
    #[error("Transport session aborted: {0}")]
    TransportAborted(AbortReason),

    // --- Task Controller Client Usage ---
    /// `initialize` was called on a session that is already running.
    #[error("The client is already initialized")]
    AlreadyInitialized,
    /// `initialize` was called before `configure`.
    #[error("The client has not been configured")]
    NotConfigured,
    /// `configure` or pool mutation was attempted while the session is running.
    #[error("The client cannot be reconfigured while initialized")]
    ConfigureWhileInitialized,
    /// The session was terminated and cannot be used again.
    #[error("The client has been terminated")]
    Terminated,
    /// A configuration value is out of range.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(&'static str),

    // --- Stack Driver ---
    /// A shared lock was poisoned by a panicking thread.
    #[error("A shared lock was poisoned")]
    PoisonedLock,
    /// The receive queue has no consumer left.
    #[error("The receive queue is disconnected")]
    QueueDisconnected,
    /// The handle does not refer to a client owned by the stack.
    #[error("Unknown task controller client handle {0}")]
    UnknownClient(usize),
}

/// Hardware Abstraction Layer (HAL) for CAN frame transmission.
///
/// This trait abstracts the physical sending and receiving of CAN frames,
/// enabling the core ISOBUS protocol logic to remain platform-agnostic (no_std).
pub trait CanInterface {
    /// Transmits a single frame on the bus.
    fn send_frame(&mut self, frame: &CanFrame) -> Result<(), IsobusError>;

    /// Attempts to receive a single frame.
    ///
    /// Returns `Ok(None)` when no frame is pending. Implementations should not
    /// block longer than their configured read timeout.
    fn receive_frame(&mut self) -> Result<Option<CanFrame>, IsobusError>;
}
