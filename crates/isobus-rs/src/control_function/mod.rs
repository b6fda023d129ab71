// crates/isobus-rs/src/control_function/mod.rs
pub mod address_claim;

use crate::frame::CanFrame;
use crate::hal::IsobusError;
use crate::name::{Name, NameFilter};
use crate::types::{
    ARBITRARY_ADDRESS_MAX, ARBITRARY_ADDRESS_MIN, GLOBAL_ADDRESS, NULL_ADDRESS, is_valid_address,
};
use address_claim::{
    ADDRESS_CONTENTION_TIME_US, AddressClaimState, AddressClaimer, address_claim_frame,
    random_transmit_delay_us, request_for_address_claim_frame,
};
use alloc::collections::VecDeque;
use alloc::vec::Vec;
use log::{debug, info, trace, warn};

/// Upper bound on loopback claims resolved within one call, guarding against
/// two internal functions configured with the same NAME.
const MAX_LOOPBACK_ITERATIONS: usize = 64;

/// Stable reference to an entry of the [`ControlFunctionRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ControlFunctionHandle(pub(crate) usize);

impl ControlFunctionHandle {
    pub fn index(&self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlFunctionKind {
    /// Owned by this application; claims its own address.
    Internal,
    /// A remote peer the application cares about, recognized by NAME filters.
    Partnered,
    /// Any other control function seen on the bus.
    External,
}

/// Reported whenever a control function's source address changes.
/// `NULL_ADDRESS` on either side means "no address".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressChange {
    pub handle: ControlFunctionHandle,
    pub kind: ControlFunctionKind,
    pub previous: u8,
    pub current: u8,
}

impl AddressChange {
    pub fn is_online(&self) -> bool {
        self.previous == NULL_ADDRESS && self.current != NULL_ADDRESS
    }

    pub fn is_offline(&self) -> bool {
        self.current == NULL_ADDRESS
    }
}

#[derive(Debug, Clone)]
pub struct ControlFunction {
    kind: ControlFunctionKind,
    /// Unknown for a partner until a matching claim is seen.
    name: Option<Name>,
    address: u8,
    filters: Vec<NameFilter>,
    claimer: Option<AddressClaimer>,
}

impl ControlFunction {
    pub fn kind(&self) -> ControlFunctionKind {
        self.kind
    }

    pub fn name(&self) -> Option<Name> {
        self.name
    }

    /// The current source address, if one is held.
    pub fn address(&self) -> Option<u8> {
        is_valid_address(self.address).then_some(self.address)
    }

    pub fn filters(&self) -> &[NameFilter] {
        &self.filters
    }

    /// Claim procedure state, for internal control functions only.
    pub fn claim_state(&self) -> Option<AddressClaimState> {
        self.claimer.as_ref().map(AddressClaimer::state)
    }

    fn holds_claim(&self) -> bool {
        self.claim_state() == Some(AddressClaimState::AddressClaimingComplete)
    }
}

/// Tracks every known control function by NAME and address and runs the
/// claim procedure for the internal ones.
#[derive(Debug, Default)]
pub struct ControlFunctionRegistry {
    entries: Vec<Option<ControlFunction>>,
    changes: Vec<AddressChange>,
    /// Claims sent by internal functions, replayed to the other internal functions.
    loopback: VecDeque<(usize, Name, u8)>,
}

impl ControlFunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a control function this application claims an address for.
    pub fn register_internal(
        &mut self,
        name: Name,
        preferred_address: u8,
    ) -> Result<ControlFunctionHandle, IsobusError> {
        if !is_valid_address(preferred_address) {
            return Err(IsobusError::InvalidAddress(preferred_address));
        }
        let duplicate = self
            .iter()
            .any(|(_, cf)| cf.kind == ControlFunctionKind::Internal && cf.name == Some(name));
        if duplicate {
            return Err(IsobusError::DuplicateName(name.full_name()));
        }
        Ok(self.insert(ControlFunction {
            kind: ControlFunctionKind::Internal,
            name: Some(name),
            address: NULL_ADDRESS,
            filters: Vec::new(),
            claimer: Some(AddressClaimer::new(preferred_address)),
        }))
    }

    /// Registers a remote peer that binds to the first claim whose NAME passes `filters`.
    pub fn register_partner(&mut self, filters: Vec<NameFilter>) -> ControlFunctionHandle {
        self.insert(ControlFunction {
            kind: ControlFunctionKind::Partnered,
            name: None,
            address: NULL_ADDRESS,
            filters,
            claimer: None,
        })
    }

    /// Releases a control function. The handle becomes invalid.
    pub fn remove(&mut self, handle: ControlFunctionHandle) -> Result<ControlFunction, IsobusError> {
        self.entries
            .get_mut(handle.0)
            .and_then(Option::take)
            .ok_or(IsobusError::UnknownControlFunction(handle))
    }

    pub fn get(&self, handle: ControlFunctionHandle) -> Option<&ControlFunction> {
        self.entries.get(handle.0).and_then(Option::as_ref)
    }

    pub fn address_of(&self, handle: ControlFunctionHandle) -> Option<u8> {
        self.get(handle).and_then(ControlFunction::address)
    }

    /// Resolves a source address byte to the control function currently bound to it.
    pub fn resolve_address(&self, address: u8) -> Option<ControlFunctionHandle> {
        if !is_valid_address(address) {
            return None;
        }
        self.iter()
            .find(|(_, cf)| cf.address == address)
            .map(|(i, _)| ControlFunctionHandle(i))
    }

    /// Returns the internal control function holding `address`, if any.
    pub fn internal_at(&self, address: u8) -> Option<ControlFunctionHandle> {
        self.resolve_address(address)
            .filter(|h| self.get(*h).is_some_and(|cf| cf.kind == ControlFunctionKind::Internal))
    }

    /// Returns true if a frame sent to `destination` concerns this application.
    pub fn accepts_destination(&self, destination: u8) -> bool {
        destination == GLOBAL_ADDRESS || self.internal_at(destination).is_some()
    }

    /// Takes the address changes recorded since the last call.
    pub fn drain_changes(&mut self) -> Vec<AddressChange> {
        core::mem::take(&mut self.changes)
    }

    /// Handles an Address Claimed or Cannot Claim Address message received from the bus.
    pub fn process_address_claim(
        &mut self,
        name: Name,
        address: u8,
        now_us: u64,
        tx: &mut Vec<CanFrame>,
    ) {
        trace!("Address claim for {:#04x} by NAME {:#018x}", address, name.full_name());
        self.apply_claim(None, name, address, now_us, tx);
        self.run_loopback(now_us, tx);
    }

    /// Answers a Request for Address Claimed sent to `destination`.
    pub fn process_request_for_claim(&mut self, destination: u8, now_us: u64, tx: &mut Vec<CanFrame>) {
        for (_, cf) in self.iter() {
            let Some(claimer) = cf.claimer.as_ref() else { continue };
            let Some(name) = cf.name else { continue };
            if destination != GLOBAL_ADDRESS && destination != cf.address {
                continue;
            }
            match claimer.state {
                AddressClaimState::AddressClaimingComplete => {
                    tx.push(address_claim_frame(&name, cf.address, now_us));
                }
                AddressClaimState::UnableToClaim => {
                    tx.push(address_claim_frame(&name, NULL_ADDRESS, now_us));
                }
                _ => {}
            }
        }
    }

    /// Advances the claim procedure of every internal control function.
    pub fn update(&mut self, now_us: u64, tx: &mut Vec<CanFrame>) {
        for index in 0..self.entries.len() {
            let Some(cf) = self.entries[index].as_mut() else { continue };
            let Some(name) = cf.name else { continue };
            let Some(claimer) = cf.claimer.as_mut() else { continue };

            match claimer.state {
                AddressClaimState::None => {
                    claimer.deadline_us = now_us + random_transmit_delay_us(&name);
                    claimer.state = AddressClaimState::WaitForClaim;
                }
                AddressClaimState::WaitForClaim if now_us >= claimer.deadline_us => {
                    debug!("NAME {:#018x} requesting address claims", name.full_name());
                    tx.push(request_for_address_claim_frame(now_us));
                    claimer.deadline_us =
                        now_us + ADDRESS_CONTENTION_TIME_US + random_transmit_delay_us(&name);
                    claimer.state = AddressClaimState::WaitForRequestContentionPeriod;
                }
                AddressClaimState::WaitForRequestContentionPeriod if now_us >= claimer.deadline_us => {
                    let preferred = claimer.preferred_address;
                    self.finish_contention(index, name, preferred, now_us, tx);
                }
                _ => {}
            }
        }
        self.run_loopback(now_us, tx);
    }

    fn finish_contention(&mut self, index: usize, name: Name, preferred: u8, now_us: u64, tx: &mut Vec<CanFrame>) {
        let occupant_wins = self
            .iter()
            .filter(|(i, cf)| *i != index && cf.address == preferred)
            .any(|(_, cf)| cf.name.is_some_and(|other| other < name));

        if !occupant_wins {
            self.claim(index, name, preferred, now_us, tx);
        } else if name.arbitrary_address_capable() {
            match self.find_free_address(index) {
                Some(address) => self.claim(index, name, address, now_us, tx),
                None => self.give_up(index, name, now_us, tx),
            }
        } else {
            self.give_up(index, name, now_us, tx);
        }
    }

    fn claim(&mut self, index: usize, name: Name, address: u8, now_us: u64, tx: &mut Vec<CanFrame>) {
        info!("NAME {:#018x} claimed address {:#04x}", name.full_name(), address);
        if let Some(claimer) = self.entries[index].as_mut().and_then(|cf| cf.claimer.as_mut()) {
            claimer.state = AddressClaimState::AddressClaimingComplete;
        }
        self.set_address(index, address);
        tx.push(address_claim_frame(&name, address, now_us));
        self.loopback.push_back((index, name, address));
    }

    fn give_up(&mut self, index: usize, name: Name, now_us: u64, tx: &mut Vec<CanFrame>) {
        warn!("NAME {:#018x} is unable to claim an address", name.full_name());
        if let Some(claimer) = self.entries[index].as_mut().and_then(|cf| cf.claimer.as_mut()) {
            claimer.state = AddressClaimState::UnableToClaim;
        }
        self.set_address(index, NULL_ADDRESS);
        tx.push(address_claim_frame(&name, NULL_ADDRESS, now_us));
    }

    /// An internal function lost its address to a higher-priority NAME.
    fn lose_address(&mut self, index: usize, name: Name, now_us: u64, tx: &mut Vec<CanFrame>) {
        let Some(lost) = self.entries[index].as_ref().map(|cf| cf.address) else { return };
        warn!(
            "NAME {:#018x} lost address {:#04x} to a higher priority control function",
            name.full_name(),
            lost
        );
        // Release the address first so the free-address search can not return it.
        self.set_address(index, NULL_ADDRESS);
        if name.arbitrary_address_capable() {
            if let Some(address) = self.find_free_address(index) {
                self.claim(index, name, address, now_us, tx);
                return;
            }
        }
        self.give_up(index, name, now_us, tx);
    }

    fn apply_claim(&mut self, origin: Option<usize>, name: Name, address: u8, now_us: u64, tx: &mut Vec<CanFrame>) {
        if address == NULL_ADDRESS {
            let silent: Vec<usize> = self
                .iter()
                .filter(|(i, cf)| Some(*i) != origin && cf.kind != ControlFunctionKind::Internal)
                .filter(|(_, cf)| cf.name == Some(name))
                .map(|(i, _)| i)
                .collect();
            for index in silent {
                self.set_address(index, NULL_ADDRESS);
            }
            return;
        }
        if !is_valid_address(address) {
            debug!("Ignoring address claim for invalid address {:#04x}", address);
            return;
        }

        let claimant = match origin {
            Some(index) => index,
            None => self.find_or_bind(name),
        };

        // Internal functions holding the contested address either defend or yield.
        let contenders: Vec<(usize, Name)> = self
            .iter()
            .filter(|(i, cf)| Some(*i) != origin && cf.holds_claim() && cf.address == address)
            .filter_map(|(i, cf)| cf.name.map(|n| (i, n)))
            .collect();
        let mut claimant_lost = false;
        let mut beaten = Vec::new();
        for (index, own) in contenders {
            if own < name {
                debug!("Defending address {:#04x} against NAME {:#018x}", address, name.full_name());
                tx.push(address_claim_frame(&own, address, now_us));
                self.loopback.push_back((index, own, address));
                claimant_lost = true;
            } else if own > name {
                beaten.push((index, own));
            } else {
                warn!("Another device claims address {:#04x} with our own NAME", address);
            }
        }

        // Remote occupants of the address with lower priority are displaced.
        let occupants: Vec<(usize, Option<Name>)> = self
            .iter()
            .filter(|(i, cf)| *i != claimant && cf.kind != ControlFunctionKind::Internal)
            .filter(|(_, cf)| cf.address == address)
            .map(|(i, cf)| (i, cf.name))
            .collect();
        for (index, other) in occupants {
            match other {
                Some(other) if other < name => claimant_lost = true,
                _ => self.set_address(index, NULL_ADDRESS),
            }
        }

        if origin.is_none() {
            let address = if claimant_lost { NULL_ADDRESS } else { address };
            self.set_address(claimant, address);
        }

        // The winner now holds the address, so it is excluded from the new search.
        for (index, own) in beaten {
            self.lose_address(index, own, now_us, tx);
        }
    }

    /// Finds the entry for a remote NAME, binding a waiting partner or creating
    /// an external entry when it is seen for the first time.
    fn find_or_bind(&mut self, name: Name) -> usize {
        if let Some((index, _)) = self
            .iter()
            .find(|(_, cf)| cf.kind != ControlFunctionKind::Internal && cf.name == Some(name))
        {
            return index;
        }
        let partner = self
            .iter()
            .find(|(_, cf)| {
                cf.kind == ControlFunctionKind::Partnered
                    && cf.name.is_none()
                    && NameFilter::matches_all(&cf.filters, &name)
            })
            .map(|(i, _)| i);
        if let Some(index) = partner {
            info!("Partner {} bound to NAME {:#018x}", index, name.full_name());
            if let Some(cf) = self.entries[index].as_mut() {
                cf.name = Some(name);
            }
            return index;
        }
        self.insert(ControlFunction {
            kind: ControlFunctionKind::External,
            name: Some(name),
            address: NULL_ADDRESS,
            filters: Vec::new(),
            claimer: None,
        })
        .0
    }

    fn find_free_address(&self, requester: usize) -> Option<u8> {
        (ARBITRARY_ADDRESS_MIN..=ARBITRARY_ADDRESS_MAX).find(|candidate| {
            !self
                .iter()
                .any(|(i, cf)| i != requester && cf.address == *candidate)
        })
    }

    fn set_address(&mut self, index: usize, address: u8) {
        let Some(cf) = self.entries.get_mut(index).and_then(Option::as_mut) else { return };
        if cf.address == address {
            return;
        }
        let change = AddressChange {
            handle: ControlFunctionHandle(index),
            kind: cf.kind,
            previous: cf.address,
            current: address,
        };
        cf.address = address;
        self.changes.push(change);
    }

    fn run_loopback(&mut self, now_us: u64, tx: &mut Vec<CanFrame>) {
        let mut iterations = 0;
        while let Some((origin, name, address)) = self.loopback.pop_front() {
            iterations += 1;
            if iterations > MAX_LOOPBACK_ITERATIONS {
                warn!("Address arbitration did not settle, dropping pending loopback claims");
                self.loopback.clear();
                break;
            }
            // Skip stale entries: the origin may have lost the address meanwhile.
            let still_held = self
                .entries
                .get(origin)
                .and_then(Option::as_ref)
                .is_some_and(|cf| cf.holds_claim() && cf.address == address);
            if still_held {
                self.apply_claim(Some(origin), name, address, now_us, tx);
            }
        }
    }

    fn insert(&mut self, cf: ControlFunction) -> ControlFunctionHandle {
        self.entries.push(Some(cf));
        ControlFunctionHandle(self.entries.len() - 1)
    }

    fn iter(&self) -> impl Iterator<Item = (usize, &ControlFunction)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(i, cf)| cf.as_ref().map(|cf| (i, cf)))
    }
}
