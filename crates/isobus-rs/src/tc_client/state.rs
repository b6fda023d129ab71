// crates/isobus-rs/src/tc_client/state.rs
use crate::hal::IsobusError;
use crate::transport::AbortReason;
use core::fmt;

/// Session states of a Task Controller client (Reference: ISO 11783-10, Annex C).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// Not initialized, terminated, or failed.
    Disconnected,
    /// Waiting for a control function matching the TC filters to claim an address.
    WaitForPartnerTc,
    SendStatusRequest,
    /// Waiting for a TC status message.
    WaitForStatusResponse,
    RequestVersion,
    WaitForVersionResponse,
    RequestLanguage,
    /// Waiting for the TC's language command. A timeout is not fatal.
    WaitForLanguageResponse,
    RequestStructureLabel,
    WaitForStructureLabelResponse,
    RequestLocalizationLabel,
    WaitForLocalizationLabelResponse,
    SendDeleteObjectPool,
    WaitForDeleteObjectPoolResponse,
    SendRequestTransferObjectPool,
    WaitForRequestTransferObjectPoolResponse,
    /// Sending the serialized pool.
    UploadDdop,
    /// Waiting for the transport session carrying the pool to finish.
    WaitForDdopTransfer,
    /// Waiting for the TC's object pool transfer response.
    WaitForDdopAck,
    SendObjectPoolActivate,
    WaitForObjectPoolActivate,
    /// Steady state: process data exchange.
    ObjectPoolActive,
    Disconnecting,
    WaitForObjectPoolDeactivate,
}

impl State {
    /// Returns true once the TC is known to be present and talking to us.
    pub fn is_connected(self) -> bool {
        !matches!(
            self,
            State::Disconnected | State::WaitForPartnerTc | State::SendStatusRequest | State::WaitForStatusResponse
        )
    }

    /// The state to return to when a request sent in `self` went unanswered.
    pub(crate) fn retry_state(self) -> Option<State> {
        match self {
            State::WaitForStatusResponse => Some(State::SendStatusRequest),
            State::WaitForVersionResponse => Some(State::RequestVersion),
            State::WaitForStructureLabelResponse => Some(State::RequestStructureLabel),
            State::WaitForLocalizationLabelResponse => Some(State::RequestLocalizationLabel),
            State::WaitForDeleteObjectPoolResponse => Some(State::SendDeleteObjectPool),
            State::WaitForRequestTransferObjectPoolResponse => Some(State::SendRequestTransferObjectPool),
            State::WaitForDdopAck => Some(State::SendRequestTransferObjectPool),
            State::WaitForObjectPoolActivate => Some(State::SendObjectPoolActivate),
            _ => None,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Why a session ended in `Disconnected`.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionFailure {
    /// No answer in `state` after every retry.
    Timeout(State),
    /// The transport session carrying the pool was aborted.
    TransferFailed(AbortReason),
    /// The TC reported it cannot store a pool of this size.
    NotEnoughMemory,
    /// The TC rejected the transferred pool with these error bits.
    PoolTransferRejected(u8),
    /// The TC could not activate the pool.
    ActivationRejected {
        error_codes: u8,
        parent_object_id: u16,
        faulting_object_id: u16,
        pool_error_codes: u8,
    },
    /// The pool could not be serialized for the TC's version.
    InvalidPool(IsobusError),
}

impl fmt::Display for SessionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionFailure::Timeout(state) => write!(f, "no response from the TC in state {state}"),
            SessionFailure::TransferFailed(reason) => write!(f, "object pool transfer aborted: {reason}"),
            SessionFailure::NotEnoughMemory => write!(f, "TC has not enough memory for the object pool"),
            SessionFailure::PoolTransferRejected(code) => {
                write!(f, "TC rejected the object pool transfer (error {code:#04x})")
            }
            SessionFailure::ActivationRejected {
                error_codes,
                parent_object_id,
                faulting_object_id,
                pool_error_codes,
            } => write!(
                f,
                "TC rejected activation (error {error_codes:#04x}, object {faulting_object_id} in {parent_object_id}, pool error {pool_error_codes:#04x})"
            ),
            SessionFailure::InvalidPool(e) => write!(f, "object pool cannot be serialized: {e}"),
        }
    }
}
