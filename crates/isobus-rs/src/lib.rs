#![cfg_attr(not(feature = "std"), no_std)]

// 'alloc' is used for dynamic allocation (e.g., Vec<u8> in reassembled messages)
extern crate alloc;

// --- Foundation Modules ---
pub mod types;
pub mod hal;
pub(crate) mod logging;
pub mod name;

// --- Data Link Layer (J1939-21) ---
pub mod frame;
pub mod transport;

// --- Network Management (J1939-81 / ISO 11783-5) ---
pub mod control_function;
pub mod callbacks;
pub mod network;

// --- Application Layer (ISO 11783-10) ---
pub mod ddop;
pub mod process_data;
pub mod tc_client;

#[cfg(feature = "std")]
pub mod stack;

// --- Top-level Exports ---
pub use hal::{CanInterface, IsobusError};
pub use name::{FunctionCode, Name, NameField, NameFilter};
pub use frame::{CanFrame, CanIdentifier, CanMessage};
pub use control_function::{AddressChange, ControlFunctionHandle, ControlFunctionKind};
pub use network::{NetworkConfig, NetworkEvent, NetworkManager};
pub use ddop::{DeviceDescriptorObjectPool, PoolBuilder};
pub use tc_client::{TaskControllerClient, TaskControllerClientConfig};
#[cfg(feature = "std")]
pub use stack::{FrameSender, IsobusStack, TcClientHandle};
