// crates/isobus-rs/src/control_function/address_claim.rs
//! Per-function address claim procedure for internal control functions.
//!
//! (Reference: ISO 11783-5, Section 4.4.3 / SAE J1939-81, Section 4.5)

use crate::frame::{CanFrame, CanIdentifier};
use crate::name::Name;
use crate::types::{GLOBAL_ADDRESS, NULL_ADDRESS, PGN_ADDRESS_CLAIM, PGN_REQUEST, PRIORITY_DEFAULT};

/// Time every claimant listens for competing claims after its request (250 ms).
pub const ADDRESS_CONTENTION_TIME_US: u64 = 250_000;

/// Unit of the pseudo-random transmit delay (0.6 ms).
const RANDOM_DELAY_STEP_US: u64 = 600;

/// Progress of an internal control function through the claim procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressClaimState {
    /// The procedure has not started yet.
    None,
    /// Waiting for the pseudo-random delay before the request for address claim.
    WaitForClaim,
    /// Request sent, collecting claims from the rest of the network.
    WaitForRequestContentionPeriod,
    /// An address is held.
    AddressClaimingComplete,
    /// No address could be obtained; the function must stay silent.
    UnableToClaim,
}

#[derive(Debug, Clone)]
pub struct AddressClaimer {
    pub(crate) state: AddressClaimState,
    pub(crate) preferred_address: u8,
    pub(crate) deadline_us: u64,
}

impl AddressClaimer {
    pub fn new(preferred_address: u8) -> Self {
        Self {
            state: AddressClaimState::None,
            preferred_address,
            deadline_us: 0,
        }
    }

    pub fn state(&self) -> AddressClaimState {
        self.state
    }

    pub fn preferred_address(&self) -> u8 {
        self.preferred_address
    }
}

/// Delay derived from the NAME so that identical devices powered up together
/// do not transmit in lockstep (0 to 153 ms).
pub fn random_transmit_delay_us(name: &Name) -> u64 {
    (name.full_name() & 0xFF) * RANDOM_DELAY_STEP_US
}

/// Request for Address Claimed, sent from the null address to everyone.
pub fn request_for_address_claim_frame(timestamp_us: u64) -> CanFrame {
    let id = CanIdentifier::new(PRIORITY_DEFAULT, PGN_REQUEST, GLOBAL_ADDRESS, NULL_ADDRESS);
    let pgn = PGN_ADDRESS_CLAIM.to_le_bytes();
    CanFrame {
        id: id.encode(),
        data: [pgn[0], pgn[1], pgn[2], 0, 0, 0, 0, 0],
        len: 3,
        is_extended: true,
        timestamp_us,
    }
}

/// Address Claimed message. With `NULL_ADDRESS` as source this is Cannot Claim Address.
pub fn address_claim_frame(name: &Name, address: u8, timestamp_us: u64) -> CanFrame {
    let id = CanIdentifier::new(PRIORITY_DEFAULT, PGN_ADDRESS_CLAIM, GLOBAL_ADDRESS, address);
    CanFrame::from_identifier(&id, name.to_le_bytes(), timestamp_us)
}
