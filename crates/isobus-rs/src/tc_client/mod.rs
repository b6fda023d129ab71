// crates/isobus-rs/src/tc_client/mod.rs
//! Task Controller client (Reference: ISO 11783-10).
//!
//! One `TaskControllerClient` binds an internal control function to one
//! partnered TC. It is driven entirely by `update` and `process_event`; a
//! stalled caller stalls the protocol.

pub mod measurement;
pub mod messages;
pub mod state;

pub use measurement::MeasurementTrigger;
pub use messages::{CLIENT_VERSION, DeviceDescriptorCommand, TcMessage, TcStatus, VersionInfo};
pub use state::{SessionFailure, State};

use crate::callbacks::{CallbackHandle, DdiDispatcher, DdiFilter, RequestValueHandler, ValueCommandHandler};
use crate::control_function::{AddressChange, ControlFunctionHandle};
use crate::ddop::{DEVICE_OBJECT_ID, DeviceDescriptorObjectPool};
use crate::frame::CanMessage;
use crate::hal::IsobusError;
use crate::logging::{SessionContext, ctx_debug, ctx_error, ctx_info, ctx_warn};
use crate::network::{NetworkEvent, NetworkManager};
use crate::process_data::{
    PDACK_COMMAND_NOT_SUPPORTED, PDACK_DDI_NOT_SUPPORTED, PDACK_INVALID_ELEMENT_NUMBER,
    PDACK_INVALID_OR_UNSUPPORTED_INTERVAL, PDACK_NO_ERROR, PDACK_NOT_SETTABLE,
    PDACK_TRIGGER_METHOD_NOT_SUPPORTED, ProcessDataCommand, ProcessDataMessage, ddi,
};
use crate::types::{
    GLOBAL_ADDRESS, PADDING_BYTE, PGN_LANGUAGE_COMMAND, PGN_PROCESS_DATA, PGN_REQUEST,
    PGN_WORKING_SET_MASTER, PRIORITY_DEFAULT, PRIORITY_PROCESS_DATA,
};
use alloc::boxed::Box;
use alloc::vec::Vec;
use measurement::MeasurementCommands;

/// Upper bound on state transitions taken in a single `update`.
const MAX_TRANSITIONS_PER_UPDATE: usize = 8;

/// Capabilities announced to the TC and session timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskControllerClientConfig {
    pub number_of_booms: u8,
    pub number_of_sections: u8,
    pub number_of_position_based_control_channels: u8,
    pub supports_documentation: bool,
    pub supports_tc_geo_without_position_based_control: bool,
    pub supports_tc_geo_with_position_based_control: bool,
    pub supports_peer_control_assignment: bool,
    pub supports_implement_section_control: bool,
    /// Time to wait for an answer before a request is repeated.
    pub request_timeout_us: u64,
    /// Repetitions of an unanswered request before the session fails.
    pub max_retries: u8,
    /// The TC is considered gone after this long without a status message.
    pub status_timeout_us: u64,
    /// Period of the client task message.
    pub status_interval_us: u64,
    /// Answer requests nobody handles with a value of 0 instead of a
    /// "DDI not supported" acknowledge.
    pub reply_zero_for_unhandled_requests: bool,
}

impl Default for TaskControllerClientConfig {
    fn default() -> Self {
        Self {
            number_of_booms: 1,
            number_of_sections: 1,
            number_of_position_based_control_channels: 1,
            supports_documentation: true,
            supports_tc_geo_without_position_based_control: false,
            supports_tc_geo_with_position_based_control: false,
            supports_peer_control_assignment: false,
            supports_implement_section_control: false,
            request_timeout_us: 2_000_000,
            max_retries: 3,
            status_timeout_us: 6_000_000,
            status_interval_us: 2_000_000,
            reply_zero_for_unhandled_requests: false,
        }
    }
}

impl TaskControllerClientConfig {
    /// Options byte of the version message.
    pub fn options(&self) -> u8 {
        [
            (self.supports_documentation, VersionInfo::OPTION_DOCUMENTATION),
            (
                self.supports_tc_geo_without_position_based_control,
                VersionInfo::OPTION_TC_GEO_WITHOUT_POSITION_BASED_CONTROL,
            ),
            (
                self.supports_tc_geo_with_position_based_control,
                VersionInfo::OPTION_TC_GEO_WITH_POSITION_BASED_CONTROL,
            ),
            (self.supports_peer_control_assignment, VersionInfo::OPTION_PEER_CONTROL_ASSIGNMENT),
            (self.supports_implement_section_control, VersionInfo::OPTION_IMPLEMENT_SECTION_CONTROL),
        ]
        .iter()
        .filter(|(enabled, _)| *enabled)
        .fold(0, |options, (_, bit)| options | bit)
    }

    pub fn validate(&self) -> Result<(), IsobusError> {
        if self.request_timeout_us == 0 || self.status_timeout_us == 0 {
            return Err(IsobusError::InvalidConfiguration("timeouts must be non-zero"));
        }
        if self.status_interval_us == 0 {
            return Err(IsobusError::InvalidConfiguration("status interval must be non-zero"));
        }
        if self.supports_implement_section_control && self.number_of_sections == 0 {
            return Err(IsobusError::InvalidConfiguration(
                "implement section control needs at least one section",
            ));
        }
        if self.supports_tc_geo_with_position_based_control && self.number_of_position_based_control_channels == 0 {
            return Err(IsobusError::InvalidConfiguration(
                "position based control needs at least one channel",
            ));
        }
        Ok(())
    }
}

fn trim_padding(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().rposition(|b| *b != PADDING_BYTE).map_or(0, |i| i + 1);
    &bytes[..end]
}

pub struct TaskControllerClient {
    partner: ControlFunctionHandle,
    internal: ControlFunctionHandle,
    local_address: Option<u8>,
    partner_address: Option<u8>,

    state: State,
    state_entered_us: u64,
    retries_left: u8,
    initialized: bool,
    terminated: bool,
    should_reset: bool,
    last_failure: Option<SessionFailure>,

    pool: Option<DeviceDescriptorObjectPool>,
    pool_data: Vec<u8>,
    config: TaskControllerClientConfig,

    value_handlers: DdiDispatcher<ValueCommandHandler>,
    request_handlers: DdiDispatcher<RequestValueHandler>,
    measurements: MeasurementCommands,
    pending_triggers: Vec<(u16, u16)>,
    distance_mm: u64,

    tc_version: Option<VersionInfo>,
    language_command: Option<Vec<u8>>,
    last_tc_status_us: Option<u64>,
    tc_task_active: bool,
    last_client_status_us: Option<u64>,
    working_set_announced: bool,
}

impl core::fmt::Debug for TaskControllerClient {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TaskControllerClient")
            .field("partner", &self.partner)
            .field("internal", &self.internal)
            .field("state", &self.state)
            .field("initialized", &self.initialized)
            .field("terminated", &self.terminated)
            .field("last_failure", &self.last_failure)
            .finish_non_exhaustive()
    }
}

impl TaskControllerClient {
    /// Creates an unconfigured client talking to `partner` as `internal`.
    pub fn new(partner: ControlFunctionHandle, internal: ControlFunctionHandle) -> Self {
        Self {
            partner,
            internal,
            local_address: None,
            partner_address: None,
            state: State::Disconnected,
            state_entered_us: 0,
            retries_left: 0,
            initialized: false,
            terminated: false,
            should_reset: false,
            last_failure: None,
            pool: None,
            pool_data: Vec::new(),
            config: TaskControllerClientConfig::default(),
            value_handlers: DdiDispatcher::new(),
            request_handlers: DdiDispatcher::new(),
            measurements: MeasurementCommands::default(),
            pending_triggers: Vec::new(),
            distance_mm: 0,
            tc_version: None,
            language_command: None,
            last_tc_status_us: None,
            tc_task_active: false,
            last_client_status_us: None,
            working_set_announced: false,
        }
    }

    // --- Lifecycle ---

    /// Sets the pool and capabilities. Only allowed while not initialized.
    pub fn configure(
        &mut self,
        pool: DeviceDescriptorObjectPool,
        config: TaskControllerClientConfig,
    ) -> Result<(), IsobusError> {
        self.ensure_alive()?;
        if self.initialized {
            return Err(IsobusError::ConfigureWhileInitialized);
        }
        config.validate()?;
        self.pool = Some(pool);
        self.config = config;
        Ok(())
    }

    /// Starts the session. With `should_reset`, a pool the TC already stores
    /// for this client is deleted and uploaded again even if its labels match.
    pub fn initialize(&mut self, should_reset: bool) -> Result<(), IsobusError> {
        self.ensure_alive()?;
        if self.initialized {
            return Err(IsobusError::AlreadyInitialized);
        }
        let pool = self.pool.as_ref().ok_or(IsobusError::NotConfigured)?;
        // Fails for dangling references and pools no transport can carry.
        pool.serialize()?;

        self.reset_session();
        self.initialized = true;
        self.should_reset = should_reset;
        self.last_failure = None;
        self.retries_left = self.config.max_retries;
        self.state = State::WaitForPartnerTc;
        Ok(())
    }

    /// Deactivates the pool if it is active and returns to `Disconnected`.
    /// The client can be initialized again afterwards.
    pub fn disconnect(&mut self, network: &mut NetworkManager, now_us: u64) -> Result<(), IsobusError> {
        self.ensure_alive()?;
        self.refresh_addresses(network);
        if !self.initialized {
            return Ok(());
        }
        if self.state == State::ObjectPoolActive {
            self.set_state(State::Disconnecting, now_us);
            self.run_state_machine(network, now_us);
        } else {
            network.abort_transport(self.internal, self.partner, now_us);
            self.finish_disconnect();
        }
        Ok(())
    }

    /// Ends the client for good. Any transfer in progress is aborted; every
    /// later call returns `IsobusError::Terminated`.
    pub fn terminate(&mut self, network: &mut NetworkManager, now_us: u64) -> Result<(), IsobusError> {
        self.ensure_alive()?;
        self.refresh_addresses(network);
        if self.state == State::ObjectPoolActive {
            self.send(network, &TcMessage::ObjectPoolActivate { activate: false }, now_us);
        }
        network.abort_transport(self.internal, self.partner, now_us);
        ctx_info!(self.context(), "Client terminated");

        self.reset_session();
        self.state = State::Disconnected;
        self.initialized = false;
        self.terminated = true;
        self.value_handlers = DdiDispatcher::new();
        self.request_handlers = DdiDispatcher::new();
        Ok(())
    }

    // --- Callbacks ---

    /// Registers a handler for value commands on every DDI.
    pub fn add_value_command_callback<F>(&mut self, callback: F) -> Result<CallbackHandle, IsobusError>
    where
        F: FnMut(u16, u16, i32) -> bool + Send + 'static,
    {
        self.ensure_alive()?;
        Ok(self.value_handlers.add(DdiFilter::Any, Box::new(callback)))
    }

    /// Registers a handler for value commands on `ddi` only.
    pub fn add_value_command_callback_for_ddi<F>(&mut self, ddi: u16, callback: F) -> Result<CallbackHandle, IsobusError>
    where
        F: FnMut(u16, u16, i32) -> bool + Send + 'static,
    {
        self.ensure_alive()?;
        Ok(self.value_handlers.add(DdiFilter::Ddi(ddi), Box::new(callback)))
    }

    pub fn remove_value_command_callback(&mut self, handle: CallbackHandle) -> bool {
        self.value_handlers.remove(handle)
    }

    /// Registers a handler that supplies values on every DDI.
    pub fn add_request_value_callback<F>(&mut self, callback: F) -> Result<CallbackHandle, IsobusError>
    where
        F: FnMut(u16, u16) -> Option<i32> + Send + 'static,
    {
        self.ensure_alive()?;
        Ok(self.request_handlers.add(DdiFilter::Any, Box::new(callback)))
    }

    /// Registers a handler that supplies values for `ddi` only.
    pub fn add_request_value_callback_for_ddi<F>(&mut self, ddi: u16, callback: F) -> Result<CallbackHandle, IsobusError>
    where
        F: FnMut(u16, u16) -> Option<i32> + Send + 'static,
    {
        self.ensure_alive()?;
        Ok(self.request_handlers.add(DdiFilter::Ddi(ddi), Box::new(callback)))
    }

    pub fn remove_request_value_callback(&mut self, handle: CallbackHandle) -> bool {
        self.request_handlers.remove(handle)
    }

    /// Sends the current value of `element_number`/`ddi` on the next update,
    /// if the pool is active then.
    pub fn on_value_changed_trigger(&mut self, element_number: u16, ddi: u16) -> Result<(), IsobusError> {
        self.ensure_alive()?;
        if !self.pending_triggers.contains(&(element_number, ddi)) {
            self.pending_triggers.push((element_number, ddi));
        }
        Ok(())
    }

    /// Feeds the distance used by distance interval measurements.
    pub fn report_distance_travelled(&mut self, distance_mm: u32) {
        self.distance_mm = self.distance_mm.saturating_add(u64::from(distance_mm));
    }

    // --- Accessors ---

    pub fn state(&self) -> State {
        self.state
    }

    /// True while the pool is active on the TC.
    pub fn is_connected(&self) -> bool {
        self.state == State::ObjectPoolActive
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Why the last session ended, cleared by `initialize`.
    pub fn last_failure(&self) -> Option<&SessionFailure> {
        self.last_failure.as_ref()
    }

    pub fn partner(&self) -> ControlFunctionHandle {
        self.partner
    }

    pub fn internal_control_function(&self) -> ControlFunctionHandle {
        self.internal
    }

    pub fn config(&self) -> &TaskControllerClientConfig {
        &self.config
    }

    /// Capabilities the TC reported in this session.
    pub fn task_controller_version(&self) -> Option<VersionInfo> {
        self.tc_version
    }

    /// Raw language command received from the TC.
    pub fn language_command(&self) -> Option<&[u8]> {
        self.language_command.as_deref()
    }

    /// True if the TC reports a task as running.
    pub fn is_task_active(&self) -> bool {
        self.tc_task_active
    }

    pub fn pool(&self) -> Option<&DeviceDescriptorObjectPool> {
        self.pool.as_ref()
    }

    /// Mutable pool access, only while the client is not initialized.
    pub fn pool_mut(&mut self) -> Result<&mut DeviceDescriptorObjectPool, IsobusError> {
        self.ensure_alive()?;
        if self.initialized {
            return Err(IsobusError::ConfigureWhileInitialized);
        }
        self.pool.as_mut().ok_or(IsobusError::NotConfigured)
    }

    // --- Driving ---

    /// Advances timers and sends whatever the current state requires.
    pub fn update(&mut self, network: &mut NetworkManager, now_us: u64) -> Result<(), IsobusError> {
        self.ensure_alive()?;
        self.refresh_addresses(network);
        if !self.initialized {
            return Ok(());
        }

        self.run_state_machine(network, now_us);
        self.check_timeout(now_us);

        if self.state == State::ObjectPoolActive {
            if !self.tc_status_is_recent(now_us) {
                ctx_warn!(self.context(), "Task controller status timed out, reconnecting");
                self.restart_session(network, now_us);
                self.run_state_machine(network, now_us);
                return Ok(());
            }
            self.service_measurements(network, now_us);
        }

        if self.state.is_connected() {
            let due = self
                .last_client_status_us
                .is_none_or(|last| now_us.saturating_sub(last) >= self.config.status_interval_us);
            if due {
                self.send_client_task(network, now_us);
            }
        }
        Ok(())
    }

    /// Consumes one event returned by `NetworkManager::update`.
    pub fn process_event(
        &mut self,
        event: &NetworkEvent,
        network: &mut NetworkManager,
        now_us: u64,
    ) -> Result<(), IsobusError> {
        self.ensure_alive()?;
        self.refresh_addresses(network);
        if !self.initialized {
            return Ok(());
        }

        match event {
            NetworkEvent::MessageReceived(message) => self.process_message(message, network, now_us),
            NetworkEvent::TransmitComplete {
                pgn,
                source,
                destination,
            } if self.is_pool_transfer(*pgn, *source, *destination) => {
                if self.state == State::WaitForDdopTransfer {
                    ctx_info!(
                        self.context(),
                        "Object pool of {} bytes transferred",
                        self.pool_data.len()
                    );
                    self.advance(State::WaitForDdopAck, now_us);
                }
            }
            NetworkEvent::TransmitFailed {
                pgn,
                source,
                destination,
                reason,
            } if self.is_pool_transfer(*pgn, *source, *destination) => {
                if self.state == State::WaitForDdopTransfer {
                    self.fail(SessionFailure::TransferFailed(*reason));
                }
            }
            NetworkEvent::AddressChanged(change)
                if change.handle == self.partner || change.handle == self.internal =>
            {
                self.on_address_change(change, network, now_us);
            }
            _ => {}
        }
        Ok(())
    }

    // --- State machine ---

    fn run_state_machine(&mut self, network: &mut NetworkManager, now_us: u64) {
        for _ in 0..MAX_TRANSITIONS_PER_UPDATE {
            let before = self.state;
            self.step(network, now_us);
            if self.state == before {
                break;
            }
        }
    }

    fn step(&mut self, network: &mut NetworkManager, now_us: u64) {
        match self.state {
            State::WaitForPartnerTc => {
                if self.local_address.is_some() && self.partner_address.is_some() {
                    ctx_info!(self.context(), "Task controller found");
                    self.advance(State::SendStatusRequest, now_us);
                }
            }
            State::SendStatusRequest => {
                if !self.working_set_announced {
                    // Single member working set (Reference: ISO 11783-7, Section 9.4).
                    let wsm = [1, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];
                    match network.send_message(PGN_WORKING_SET_MASTER, &wsm, self.internal, None, PRIORITY_DEFAULT, now_us) {
                        Ok(()) => self.working_set_announced = true,
                        Err(e) => ctx_warn!(self.context(), "Failed to announce working set: {}", e),
                    }
                }
                self.send_client_task(network, now_us);
                if self.tc_status_is_recent(now_us) {
                    self.advance(State::RequestVersion, now_us);
                } else {
                    self.set_state(State::WaitForStatusResponse, now_us);
                }
            }
            State::RequestVersion => {
                self.send(network, &TcMessage::RequestVersion, now_us);
                self.set_state(State::WaitForVersionResponse, now_us);
            }
            State::RequestLanguage => {
                let request = [
                    (PGN_LANGUAGE_COMMAND & 0xFF) as u8,
                    ((PGN_LANGUAGE_COMMAND >> 8) & 0xFF) as u8,
                    ((PGN_LANGUAGE_COMMAND >> 16) & 0xFF) as u8,
                ];
                if let Err(e) = network.send_message(
                    PGN_REQUEST,
                    &request,
                    self.internal,
                    Some(self.partner),
                    PRIORITY_DEFAULT,
                    now_us,
                ) {
                    ctx_warn!(self.context(), "Failed to request the language command: {}", e);
                }
                self.set_state(State::WaitForLanguageResponse, now_us);
            }
            State::RequestStructureLabel => {
                self.send(network, &TcMessage::RequestStructureLabel, now_us);
                self.set_state(State::WaitForStructureLabelResponse, now_us);
            }
            State::RequestLocalizationLabel => {
                self.send(network, &TcMessage::RequestLocalizationLabel, now_us);
                self.set_state(State::WaitForLocalizationLabelResponse, now_us);
            }
            State::SendDeleteObjectPool => {
                self.send(network, &TcMessage::DeleteObjectPool, now_us);
                self.set_state(State::WaitForDeleteObjectPoolResponse, now_us);
            }
            State::SendRequestTransferObjectPool => {
                let serialized = match &self.pool {
                    Some(pool) => pool.serialize(),
                    None => Err(IsobusError::NotConfigured),
                };
                match serialized {
                    Ok(data) => {
                        self.pool_data = data;
                        let pool_size = self.pool_data.len() as u32;
                        self.send(network, &TcMessage::RequestObjectPoolTransfer { pool_size }, now_us);
                        self.set_state(State::WaitForRequestTransferObjectPoolResponse, now_us);
                    }
                    Err(e) => self.fail(SessionFailure::InvalidPool(e)),
                }
            }
            State::UploadDdop => {
                let message = TcMessage::ObjectPoolTransfer(self.pool_data.clone()).encode();
                match network.send_message(
                    PGN_PROCESS_DATA,
                    &message,
                    self.internal,
                    Some(self.partner),
                    PRIORITY_PROCESS_DATA,
                    now_us,
                ) {
                    Ok(()) => {
                        ctx_info!(self.context(), "Uploading object pool ({} bytes)", self.pool_data.len());
                        self.set_state(State::WaitForDdopTransfer, now_us);
                    }
                    // Stays in UploadDdop; check_timeout gives up eventually.
                    Err(e) => ctx_warn!(self.context(), "Object pool upload not started: {}", e),
                }
            }
            State::SendObjectPoolActivate => {
                self.send(network, &TcMessage::ObjectPoolActivate { activate: true }, now_us);
                self.set_state(State::WaitForObjectPoolActivate, now_us);
            }
            State::Disconnecting => {
                self.send(network, &TcMessage::ObjectPoolActivate { activate: false }, now_us);
                self.set_state(State::WaitForObjectPoolDeactivate, now_us);
            }
            _ => {}
        }
    }

    fn check_timeout(&mut self, now_us: u64) {
        let timeout = match self.state {
            // The TC may need a while to parse a large pool.
            State::WaitForDdopAck => self.config.status_timeout_us,
            _ => self.config.request_timeout_us,
        };
        if now_us.saturating_sub(self.state_entered_us) < timeout {
            return;
        }

        match self.state {
            State::WaitForLanguageResponse => {
                ctx_warn!(self.context(), "No language command from the TC, continuing without it");
                self.advance(State::RequestStructureLabel, now_us);
            }
            State::WaitForObjectPoolDeactivate => {
                ctx_warn!(self.context(), "No deactivation response from the TC");
                self.finish_disconnect();
            }
            State::UploadDdop => self.fail(SessionFailure::Timeout(State::UploadDdop)),
            state => {
                if let Some(retry) = state.retry_state() {
                    self.retry_or_fail(retry, now_us);
                }
            }
        }
    }

    fn retry_or_fail(&mut self, retry: State, now_us: u64) {
        if self.retries_left == 0 {
            self.fail(SessionFailure::Timeout(self.state));
            return;
        }
        self.retries_left -= 1;
        ctx_warn!(
            self.context(),
            "No response in {}, retrying ({} retries left)",
            self.state,
            self.retries_left
        );
        self.set_state(retry, now_us);
    }

    fn set_state(&mut self, state: State, now_us: u64) {
        if self.state != state {
            ctx_debug!(self.context(), "{} -> {}", self.state, state);
        }
        self.state = state;
        self.state_entered_us = now_us;
    }

    /// Moves on after a response, restoring the retry budget.
    fn advance(&mut self, state: State, now_us: u64) {
        self.retries_left = self.config.max_retries;
        self.set_state(state, now_us);
    }

    fn fail(&mut self, failure: SessionFailure) {
        ctx_error!(self.context(), "Session failed: {}", failure);
        self.reset_session();
        self.state = State::Disconnected;
        self.initialized = false;
        self.last_failure = Some(failure);
    }

    fn finish_disconnect(&mut self) {
        ctx_info!(self.context(), "Disconnected from the task controller");
        self.reset_session();
        self.state = State::Disconnected;
        self.initialized = false;
    }

    /// Starts over from waiting for the TC, keeping the configuration.
    fn restart_session(&mut self, network: &mut NetworkManager, now_us: u64) {
        network.abort_transport(self.internal, self.partner, now_us);
        self.reset_session();
        self.advance(State::WaitForPartnerTc, now_us);
    }

    fn reset_session(&mut self) {
        self.pool_data.clear();
        self.measurements.clear();
        self.pending_triggers.clear();
        self.tc_version = None;
        self.last_client_status_us = None;
        self.working_set_announced = false;
    }

    fn on_address_change(&mut self, change: &AddressChange, network: &mut NetworkManager, now_us: u64) {
        if change.is_online() || matches!(self.state, State::Disconnected | State::WaitForPartnerTc) {
            return;
        }
        if change.handle == self.partner {
            if change.is_offline() {
                ctx_warn!(self.context(), "Task controller went offline");
                self.last_tc_status_us = None;
            } else {
                ctx_warn!(self.context(), "Task controller moved to {:#04x}", change.current);
            }
        } else {
            ctx_warn!(self.context(), "Lost our address {:#04x}", change.previous);
        }
        self.restart_session(network, now_us);
    }

    // --- Inbound messages ---

    fn process_message(&mut self, message: &CanMessage, network: &mut NetworkManager, now_us: u64) {
        if self.partner_address != Some(message.source) {
            return;
        }
        if message.destination != GLOBAL_ADDRESS && Some(message.destination) != self.local_address {
            return;
        }
        match message.pgn {
            PGN_LANGUAGE_COMMAND => {
                self.language_command = Some(message.data.clone());
                if self.state == State::WaitForLanguageResponse {
                    self.advance(State::RequestStructureLabel, now_us);
                }
            }
            PGN_PROCESS_DATA => match TcMessage::decode(&message.data) {
                Ok(tc_message) => self.process_tc_message(tc_message, network, now_us),
                Err(e) => ctx_debug!(self.context(), "Dropping malformed process data message: {}", e),
            },
            _ => {}
        }
    }

    fn process_tc_message(&mut self, message: TcMessage, network: &mut NetworkManager, now_us: u64) {
        match message {
            TcMessage::Status(status) => {
                self.last_tc_status_us = Some(now_us);
                self.tc_task_active = status.task_active();
                if self.state == State::WaitForStatusResponse {
                    self.advance(State::RequestVersion, now_us);
                }
            }
            TcMessage::RequestVersion => {
                let version = TcMessage::Version(self.version_info());
                self.send(network, &version, now_us);
            }
            TcMessage::Version(info) if self.state == State::WaitForVersionResponse => {
                ctx_info!(
                    self.context(),
                    "TC version {} with options {:#04x}, {} booms, {} sections, {} channels",
                    info.version,
                    info.options,
                    info.number_of_booms,
                    info.number_of_sections,
                    info.number_of_channels
                );
                self.tc_version = Some(info);
                if let Some(pool) = self.pool.as_mut() {
                    pool.set_task_controller_compatibility_level(info.version.min(CLIENT_VERSION));
                }
                self.advance(State::RequestLanguage, now_us);
            }
            TcMessage::StructureLabel { label, extended_label }
                if self.state == State::WaitForStructureLabelResponse =>
            {
                self.on_structure_label(label, &extended_label, now_us);
            }
            TcMessage::LocalizationLabel(label) if self.state == State::WaitForLocalizationLabelResponse => {
                let matches = label.is_some()
                    && self.pool.as_ref().and_then(|p| p.device()).map(|d| d.localization_label) == label;
                if matches {
                    ctx_info!(self.context(), "TC already stores this object pool");
                    self.advance(State::SendObjectPoolActivate, now_us);
                } else {
                    ctx_info!(self.context(), "Localization of the stored pool differs, replacing it");
                    self.advance(State::SendDeleteObjectPool, now_us);
                }
            }
            TcMessage::DeleteObjectPoolResponse { deleted, error_details }
                if self.state == State::WaitForDeleteObjectPoolResponse =>
            {
                if !deleted {
                    ctx_debug!(self.context(), "TC deleted no pool (error details {:#04x})", error_details);
                }
                self.advance(State::SendRequestTransferObjectPool, now_us);
            }
            TcMessage::RequestObjectPoolTransferResponse { enough_memory }
                if self.state == State::WaitForRequestTransferObjectPoolResponse =>
            {
                if enough_memory {
                    self.advance(State::UploadDdop, now_us);
                } else {
                    self.fail(SessionFailure::NotEnoughMemory);
                }
            }
            TcMessage::ObjectPoolTransferResponse { error_codes, .. }
                if matches!(self.state, State::WaitForDdopTransfer | State::WaitForDdopAck) =>
            {
                if error_codes == 0 {
                    self.advance(State::SendObjectPoolActivate, now_us);
                } else {
                    self.fail(SessionFailure::PoolTransferRejected(error_codes));
                }
            }
            TcMessage::ObjectPoolActivateResponse {
                error_codes,
                parent_object_id,
                faulting_object_id,
                pool_error_codes,
            } => match self.state {
                State::WaitForObjectPoolActivate if error_codes == 0 => {
                    ctx_info!(self.context(), "Object pool activated");
                    self.advance(State::ObjectPoolActive, now_us);
                }
                State::WaitForObjectPoolActivate => self.fail(SessionFailure::ActivationRejected {
                    error_codes,
                    parent_object_id,
                    faulting_object_id,
                    pool_error_codes,
                }),
                State::WaitForObjectPoolDeactivate => self.finish_disconnect(),
                _ => {}
            },
            TcMessage::ProcessData(pd) if self.state == State::ObjectPoolActive => {
                self.process_process_data(pd, network, now_us);
            }
            TcMessage::Acknowledge {
                element_number,
                ddi,
                error_codes,
                command,
            } if error_codes != PDACK_NO_ERROR => {
                ctx_warn!(
                    self.context(),
                    "TC reported error {:#04x} for {:?} on element {} DDI {}",
                    error_codes,
                    command,
                    element_number,
                    ddi
                );
            }
            other => ctx_debug!(self.context(), "Ignoring {:?} in state {}", other, self.state),
        }
    }

    fn on_structure_label(&mut self, label: Option<[u8; 7]>, extended_label: &[u8], now_us: u64) {
        let Some(device) = self.pool.as_ref().and_then(|p| p.device()) else {
            self.fail(SessionFailure::InvalidPool(IsobusError::ObjectNotFound(DEVICE_OBJECT_ID)));
            return;
        };
        let matches = label == Some(device.structure_label)
            && (extended_label.is_empty()
                || trim_padding(extended_label) == trim_padding(&device.extended_structure_label));

        match label {
            None => {
                ctx_info!(self.context(), "TC stores no pool for us");
                self.advance(State::SendRequestTransferObjectPool, now_us);
            }
            Some(_) if matches && !self.should_reset => self.advance(State::RequestLocalizationLabel, now_us),
            Some(_) => {
                ctx_info!(self.context(), "TC stores a different pool, deleting it");
                self.advance(State::SendDeleteObjectPool, now_us);
            }
        }
    }

    fn process_process_data(&mut self, message: ProcessDataMessage, network: &mut NetworkManager, now_us: u64) {
        let ProcessDataMessage {
            command,
            element_number,
            ddi,
            value,
        } = message;

        match command {
            ProcessDataCommand::RequestValue if ddi == ddi::REQUEST_DEFAULT_PROCESS_DATA => {
                let members = self.pool.as_ref().map(|p| p.default_set()).unwrap_or_default();
                for (element_number, ddi) in members {
                    self.answer_request(element_number, ddi, network, now_us);
                }
            }
            ProcessDataCommand::RequestValue => self.answer_request(element_number, ddi, network, now_us),
            ProcessDataCommand::Value => match self.value_handlers.dispatch(element_number, ddi, value) {
                Some(true) => {}
                Some(false) => ctx_warn!(
                    self.context(),
                    "Value {} for element {} DDI {} was rejected",
                    value,
                    element_number,
                    ddi
                ),
                None => ctx_debug!(
                    self.context(),
                    "No handler for value on element {} DDI {}",
                    element_number,
                    ddi
                ),
            },
            ProcessDataCommand::SetValueAndAcknowledge => {
                let error_codes = match self.value_handlers.dispatch(element_number, ddi, value) {
                    Some(true) => PDACK_NO_ERROR,
                    Some(false) => PDACK_NOT_SETTABLE,
                    None => PDACK_DDI_NOT_SUPPORTED,
                };
                self.send_acknowledge(element_number, ddi, error_codes, command, network, now_us);
            }
            _ => match MeasurementTrigger::from_command(command, value) {
                Some(trigger) => self.set_measurement(message, trigger, network, now_us),
                None => {
                    self.send_acknowledge(element_number, ddi, PDACK_COMMAND_NOT_SUPPORTED, command, network, now_us);
                }
            },
        }
    }

    fn set_measurement(
        &mut self,
        message: ProcessDataMessage,
        trigger: MeasurementTrigger,
        network: &mut NetworkManager,
        now_us: u64,
    ) {
        let ProcessDataMessage {
            command,
            element_number,
            ddi,
            value,
        } = message;
        let interval_command = matches!(
            command,
            ProcessDataCommand::MeasurementTimeInterval | ProcessDataCommand::MeasurementDistanceInterval
        );

        let error_codes = match &self.pool {
            _ if interval_command && value < 0 => PDACK_INVALID_OR_UNSUPPORTED_INTERVAL,
            Some(pool) if pool.element_by_number(element_number).is_none() => PDACK_INVALID_ELEMENT_NUMBER,
            Some(pool) => match pool.process_data_for(element_number, ddi) {
                None => PDACK_DDI_NOT_SUPPORTED,
                Some(dpd) if !dpd.trigger_methods.contains(trigger.trigger_method()) => {
                    PDACK_TRIGGER_METHOD_NOT_SUPPORTED
                }
                Some(_) => PDACK_NO_ERROR,
            },
            None => PDACK_DDI_NOT_SUPPORTED,
        };

        if error_codes != PDACK_NO_ERROR {
            self.send_acknowledge(element_number, ddi, error_codes, command, network, now_us);
            return;
        }
        ctx_debug!(
            self.context(),
            "Measurement {:?} for element {} DDI {}",
            trigger,
            element_number,
            ddi
        );
        self.measurements.set(element_number, ddi, trigger, now_us, self.distance_mm);
    }

    fn service_measurements(&mut self, network: &mut NetworkManager, now_us: u64) {
        let handlers = &mut self.request_handlers;
        let mut due = self
            .measurements
            .service(now_us, self.distance_mm, |element, ddi| handlers.request(element, ddi));

        for (element_number, ddi) in core::mem::take(&mut self.pending_triggers) {
            if let Some(value) = self.request_handlers.request(element_number, ddi) {
                due.push((element_number, ddi, value));
            }
        }
        for (element_number, ddi, value) in due {
            self.send_value(element_number, ddi, value, network, now_us);
        }
    }

    fn answer_request(&mut self, element_number: u16, ddi: u16, network: &mut NetworkManager, now_us: u64) {
        match self.request_handlers.request(element_number, ddi) {
            Some(value) => self.send_value(element_number, ddi, value, network, now_us),
            None if self.config.reply_zero_for_unhandled_requests => {
                self.send_value(element_number, ddi, 0, network, now_us);
            }
            None => self.send_acknowledge(
                element_number,
                ddi,
                PDACK_DDI_NOT_SUPPORTED,
                ProcessDataCommand::RequestValue,
                network,
                now_us,
            ),
        }
    }

    // --- Outbound messages ---

    fn version_info(&self) -> VersionInfo {
        VersionInfo {
            version: CLIENT_VERSION,
            boot_time_s: 0xFF,
            options: self.config.options(),
            number_of_booms: self.config.number_of_booms,
            number_of_sections: self.config.number_of_sections,
            number_of_channels: self.config.number_of_position_based_control_channels,
        }
    }

    fn send_client_task(&mut self, network: &mut NetworkManager, now_us: u64) {
        let message = TcMessage::ClientTask {
            task_active: self.tc_task_active,
        };
        self.send(network, &message, now_us);
        self.last_client_status_us = Some(now_us);
    }

    fn send_value(&self, element_number: u16, ddi: u16, value: i32, network: &mut NetworkManager, now_us: u64) {
        let message = ProcessDataMessage::new(ProcessDataCommand::Value, element_number, ddi, value);
        self.send(network, &TcMessage::ProcessData(message), now_us);
    }

    fn send_acknowledge(
        &self,
        element_number: u16,
        ddi: u16,
        error_codes: u8,
        command: ProcessDataCommand,
        network: &mut NetworkManager,
        now_us: u64,
    ) {
        let message = TcMessage::Acknowledge {
            element_number,
            ddi,
            error_codes,
            command,
        };
        self.send(network, &message, now_us);
    }

    /// Sends to the TC. A failed send is logged; the state timers recover from it.
    fn send(&self, network: &mut NetworkManager, message: &TcMessage, now_us: u64) {
        if let Err(e) = network.send_message(
            PGN_PROCESS_DATA,
            &message.encode(),
            self.internal,
            Some(self.partner),
            PRIORITY_PROCESS_DATA,
            now_us,
        ) {
            ctx_warn!(self.context(), "Failed to send {:?}: {}", message, e);
        }
    }

    // --- Helpers ---

    fn ensure_alive(&self) -> Result<(), IsobusError> {
        if self.terminated {
            return Err(IsobusError::Terminated);
        }
        Ok(())
    }

    fn refresh_addresses(&mut self, network: &NetworkManager) {
        self.local_address = network.address_of(self.internal);
        self.partner_address = network.address_of(self.partner);
    }

    fn tc_status_is_recent(&self, now_us: u64) -> bool {
        self.last_tc_status_us
            .is_some_and(|t| now_us.saturating_sub(t) < self.config.status_timeout_us)
    }

    fn is_pool_transfer(&self, pgn: u32, source: u8, destination: u8) -> bool {
        pgn == PGN_PROCESS_DATA && Some(source) == self.local_address && Some(destination) == self.partner_address
    }

    fn context(&self) -> SessionContext {
        SessionContext {
            component: "TC client",
            local_address: self.local_address,
            partner_address: self.partner_address,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ddop::{DeviceElementType, NULL_OBJECT_ID, PoolBuilder, ProcessDataProperties, TriggerMethods};
    use crate::frame::{CanFrame, CanIdentifier};
    use crate::name::{FunctionCode, Name, NameFilter};
    use crate::network::NetworkConfig;
    use alloc::sync::Arc;
    use alloc::vec;
    use core::sync::atomic::{AtomicI32, Ordering};

    const TC_ADDRESS: u8 = 0xF7;
    const LOCALIZATION: [u8; 7] = [b'e', b'n', 0x50, 0x00, 0x55, 0x55, 0xFF];

    fn implement_name() -> Name {
        let mut name = Name::default();
        name.set_arbitrary_address_capable(true);
        name.set_industry_group(2).unwrap();
        name.set_function_code(FunctionCode::RateControl as u8).unwrap();
        name.set_identity_number(2).unwrap();
        name.set_manufacturer_code(64).unwrap();
        name
    }

    fn tc_name() -> Name {
        let mut name = Name::default();
        name.set_industry_group(2).unwrap();
        name.set_function_code(FunctionCode::TaskController as u8).unwrap();
        name.set_identity_number(99).unwrap();
        name
    }

    fn test_pool() -> DeviceDescriptorObjectPool {
        let mut builder = PoolBuilder::new();
        builder
            .device("Sprayer", "1.0", "123", "SPR1", LOCALIZATION, &[], 0)
            .element("Sprayer", 0, 0, DeviceElementType::Device, 1)
            .process_data(
                "Setpoint Work State",
                ddi::SETPOINT_WORK_STATE,
                NULL_OBJECT_ID,
                ProcessDataProperties::SETTABLE,
                TriggerMethods::NONE,
                2,
            )
            .process_data(
                "Actual Work State",
                ddi::ACTUAL_WORK_STATE,
                NULL_OBJECT_ID,
                ProcessDataProperties::MEMBER_OF_DEFAULT_SET,
                TriggerMethods::ON_CHANGE | TriggerMethods::TIME_INTERVAL,
                3,
            )
            .children(1, &[2, 3]);
        builder.build().unwrap()
    }

    struct Fixture {
        network: NetworkManager,
        client: TaskControllerClient,
        now: u64,
    }

    impl Fixture {
        fn new(config: TaskControllerClientConfig) -> Self {
            let mut network = NetworkManager::new(NetworkConfig::default());
            let internal = network.register_internal_control_function(implement_name(), 0x80).unwrap();
            let partner = network.register_partnered_control_function(vec![NameFilter::task_controller()]);
            let mut now = 0;
            while network.address_of(internal).is_none() {
                network.update(now);
                now += 10_000;
            }
            network.take_tx_frames();
            network.process_rx_frame(crate::control_function::address_claim::address_claim_frame(
                &tc_name(),
                TC_ADDRESS,
                now,
            ));

            let mut client = TaskControllerClient::new(partner, internal);
            client.configure(test_pool(), config).unwrap();
            client.initialize(false).unwrap();
            let mut fixture = Self { network, client, now };
            fixture.step();
            fixture
        }

        /// One tick: network, events, client. Returns the frames sent.
        fn step(&mut self) -> Vec<CanFrame> {
            self.now += 10_000;
            for event in self.network.update(self.now) {
                self.client.process_event(&event, &mut self.network, self.now).unwrap();
            }
            self.client.update(&mut self.network, self.now).unwrap();
            self.network.take_tx_frames()
        }

        /// Delivers a process data message from the TC, then ticks.
        fn from_tc(&mut self, data: [u8; 8]) -> Vec<CanFrame> {
            let id = CanIdentifier::new(PRIORITY_PROCESS_DATA, PGN_PROCESS_DATA, 0x80, TC_ADDRESS);
            self.network.process_rx_frame(CanFrame::from_identifier(&id, data, self.now));
            self.step()
        }

        fn status(&mut self) -> Vec<CanFrame> {
            self.from_tc([0xFE, 0xFF, 0xFF, 0xFF, 0x00, 0xFF, 0xFF, 0xFF])
        }

        /// Runs the handshake with a TC that already stores the pool.
        fn activate(&mut self) {
            self.status();
            self.from_tc([0x10, 4, 0xFF, 0x1F, 0x00, 1, 16, 1]);
            let id = CanIdentifier::new(PRIORITY_DEFAULT, PGN_LANGUAGE_COMMAND, GLOBAL_ADDRESS, TC_ADDRESS);
            self.network
                .process_rx_frame(CanFrame::from_identifier(&id, [b'e', b'n', 0, 0, 0, 0, 0xFF, 0xFF], self.now));
            self.step();
            self.from_tc([0x11, b'S', b'P', b'R', b'1', b' ', b' ', b' ']);
            let mut localization = [0x31; 8];
            localization[1..].copy_from_slice(&LOCALIZATION);
            self.from_tc(localization);
            self.from_tc([0x91, 0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0x00, 0xFF]);
            assert_eq!(self.client.state(), State::ObjectPoolActive);
        }
    }

    fn process_data_payloads(frames: &[CanFrame]) -> Vec<Vec<u8>> {
        frames
            .iter()
            .filter(|f| f.identifier().is_some_and(|id| id.pgn == PGN_PROCESS_DATA))
            .map(|f| f.payload().to_vec())
            .collect()
    }

    #[test]
    fn test_usage_errors() {
        let mut network = NetworkManager::default();
        let internal = network.register_internal_control_function(implement_name(), 0x80).unwrap();
        let partner = network.register_partnered_control_function(vec![NameFilter::task_controller()]);
        let mut client = TaskControllerClient::new(partner, internal);

        assert_eq!(client.initialize(false), Err(IsobusError::NotConfigured));
        client.configure(test_pool(), TaskControllerClientConfig::default()).unwrap();
        client.initialize(false).unwrap();
        assert_eq!(client.initialize(false), Err(IsobusError::AlreadyInitialized));
        assert_eq!(
            client.configure(test_pool(), TaskControllerClientConfig::default()),
            Err(IsobusError::ConfigureWhileInitialized)
        );
        assert!(client.pool_mut().is_err());

        client.terminate(&mut network, 0).unwrap();
        assert_eq!(client.state(), State::Disconnected);
        assert_eq!(client.update(&mut network, 0), Err(IsobusError::Terminated));
        assert_eq!(client.initialize(false), Err(IsobusError::Terminated));
        assert_eq!(client.terminate(&mut network, 0), Err(IsobusError::Terminated));
        assert!(client.add_value_command_callback(|_, _, _| true).is_err());
    }

    #[test]
    fn test_initialize_rejects_dangling_pool() {
        let mut pool = test_pool();
        pool.add_reference_to_child_object(1, 77).unwrap();
        let mut client = TaskControllerClient::new(ControlFunctionHandle(1), ControlFunctionHandle(0));
        client.configure(pool, TaskControllerClientConfig::default()).unwrap();
        assert_eq!(
            client.initialize(false),
            Err(IsobusError::DanglingReference { parent: 1, child: 77 })
        );
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut client = TaskControllerClient::new(ControlFunctionHandle(1), ControlFunctionHandle(0));
        let config = TaskControllerClientConfig {
            supports_implement_section_control: true,
            number_of_sections: 0,
            ..TaskControllerClientConfig::default()
        };
        assert!(matches!(
            client.configure(test_pool(), config),
            Err(IsobusError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_status_starts_version_exchange() {
        let mut fixture = Fixture::new(TaskControllerClientConfig::default());
        assert_eq!(fixture.client.state(), State::WaitForStatusResponse);

        let frames = fixture.status();
        assert_eq!(fixture.client.state(), State::WaitForVersionResponse);
        assert_eq!(process_data_payloads(&frames), vec![vec![0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]]);

        // The TC may ask for our version at any time.
        let frames = fixture.from_tc([0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(
            process_data_payloads(&frames),
            vec![vec![0x10, CLIENT_VERSION, 0xFF, 0x01, 0x00, 1, 1, 1]]
        );
    }

    #[test]
    fn test_working_set_master_precedes_client_task() {
        let mut network = NetworkManager::default();
        let internal = network.register_internal_control_function(implement_name(), 0x80).unwrap();
        let partner = network.register_partnered_control_function(vec![NameFilter::task_controller()]);
        let mut now = 0;
        while network.address_of(internal).is_none() {
            network.update(now);
            now += 10_000;
        }
        network.take_tx_frames();
        network.process_rx_frame(crate::control_function::address_claim::address_claim_frame(&tc_name(), TC_ADDRESS, now));
        let mut client = TaskControllerClient::new(partner, internal);
        client.configure(test_pool(), TaskControllerClientConfig::default()).unwrap();
        client.initialize(false).unwrap();

        for event in network.update(now) {
            client.process_event(&event, &mut network, now).unwrap();
        }
        client.update(&mut network, now).unwrap();
        let frames = network.take_tx_frames();
        let pgns: Vec<u32> = frames.iter().filter_map(|f| f.identifier()).map(|id| id.pgn).collect();
        assert_eq!(pgns, vec![PGN_WORKING_SET_MASTER, PGN_PROCESS_DATA]);
        assert_eq!(frames[0].payload(), &[1, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(frames[1].payload(), &[0xFF, 0xFF, 0xFF, 0xFF, 0x00, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_matching_labels_skip_upload() {
        let mut fixture = Fixture::new(TaskControllerClientConfig::default());
        fixture.activate();
        assert_eq!(fixture.client.task_controller_version().map(|v| v.number_of_sections), Some(16));
        assert_eq!(fixture.client.language_command().map(|l| &l[..2]), Some(&b"en"[..]));
    }

    #[test]
    fn test_empty_tc_gets_pool_transfer_request() {
        let mut fixture = Fixture::new(TaskControllerClientConfig::default());
        fixture.status();
        fixture.from_tc([0x10, 4, 0xFF, 0x00, 0x00, 1, 1, 1]);
        // No language command: the client continues after the timeout.
        for _ in 0..210 {
            fixture.step();
        }
        assert_eq!(fixture.client.state(), State::WaitForStructureLabelResponse);

        let frames = fixture.from_tc([0x11, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(fixture.client.state(), State::WaitForRequestTransferObjectPoolResponse);
        let size = (test_pool().serialize().unwrap().len() as u32).to_le_bytes();
        assert_eq!(
            process_data_payloads(&frames),
            vec![vec![0x41, size[0], size[1], size[2], size[3], 0xFF, 0xFF, 0xFF]]
        );

        fixture.from_tc([0x51, 0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(fixture.client.state(), State::Disconnected);
        assert_eq!(fixture.client.last_failure(), Some(&SessionFailure::NotEnoughMemory));
    }

    #[test]
    fn test_set_value_and_acknowledge() {
        let mut fixture = Fixture::new(TaskControllerClientConfig::default());
        let seen = Arc::new(AtomicI32::new(-1));
        let s = seen.clone();
        fixture
            .client
            .add_value_command_callback_for_ddi(ddi::SETPOINT_WORK_STATE, move |element, _, value| {
                s.store(i32::from(element) * 100 + value, Ordering::SeqCst);
                true
            })
            .unwrap();
        fixture.activate();

        let set = ProcessDataMessage::new(ProcessDataCommand::SetValueAndAcknowledge, 0, ddi::SETPOINT_WORK_STATE, 1);
        let frames = fixture.from_tc(set.encode());
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(
            process_data_payloads(&frames),
            vec![vec![0x0D, 0x00, 0x21, 0x01, PDACK_NO_ERROR, 0xFA, 0xFF, 0xFF]]
        );

        // Nobody handles DDI 1.
        let set = ProcessDataMessage::new(ProcessDataCommand::SetValueAndAcknowledge, 0, 1, 5);
        let frames = fixture.from_tc(set.encode());
        assert_eq!(process_data_payloads(&frames)[0][4], PDACK_DDI_NOT_SUPPORTED);
    }

    #[test]
    fn test_unhandled_request_policy() {
        let mut fixture = Fixture::new(TaskControllerClientConfig::default());
        fixture.activate();
        let request = ProcessDataMessage::new(ProcessDataCommand::RequestValue, 0, ddi::ACTUAL_WORK_STATE, 0);
        let frames = fixture.from_tc(request.encode());
        assert_eq!(
            process_data_payloads(&frames),
            vec![acknowledge_payload(0, ddi::ACTUAL_WORK_STATE, PDACK_DDI_NOT_SUPPORTED, ProcessDataCommand::RequestValue)]
        );

        let mut fixture = Fixture::new(TaskControllerClientConfig {
            reply_zero_for_unhandled_requests: true,
            ..TaskControllerClientConfig::default()
        });
        fixture.activate();
        let frames = fixture.from_tc(request.encode());
        let value = ProcessDataMessage::new(ProcessDataCommand::Value, 0, ddi::ACTUAL_WORK_STATE, 0);
        assert_eq!(process_data_payloads(&frames), vec![value.encode().to_vec()]);
    }

    fn acknowledge_payload(element: u16, ddi: u16, error: u8, command: ProcessDataCommand) -> Vec<u8> {
        crate::process_data::acknowledge(element, ddi, error, command).to_vec()
    }

    #[test]
    fn test_default_set_and_measurements() {
        let mut fixture = Fixture::new(TaskControllerClientConfig::default());
        fixture
            .client
            .add_request_value_callback(|_, ddi| (ddi == ddi::ACTUAL_WORK_STATE).then_some(1))
            .unwrap();
        fixture.activate();

        let request = ProcessDataMessage::new(ProcessDataCommand::RequestValue, 0, ddi::REQUEST_DEFAULT_PROCESS_DATA, 0);
        let frames = fixture.from_tc(request.encode());
        let value = ProcessDataMessage::new(ProcessDataCommand::Value, 0, ddi::ACTUAL_WORK_STATE, 1);
        assert_eq!(process_data_payloads(&frames), vec![value.encode().to_vec()]);

        // Threshold triggers are not in the DPD's trigger methods.
        let threshold =
            ProcessDataMessage::new(ProcessDataCommand::MeasurementMinimumWithinThreshold, 0, ddi::ACTUAL_WORK_STATE, 0);
        let frames = fixture.from_tc(threshold.encode());
        assert_eq!(process_data_payloads(&frames)[0][4], PDACK_TRIGGER_METHOD_NOT_SUPPORTED);

        // Unknown element.
        let interval = ProcessDataMessage::new(ProcessDataCommand::MeasurementTimeInterval, 9, ddi::ACTUAL_WORK_STATE, 1000);
        let frames = fixture.from_tc(interval.encode());
        assert_eq!(process_data_payloads(&frames)[0][4], PDACK_INVALID_ELEMENT_NUMBER);

        let interval = ProcessDataMessage::new(ProcessDataCommand::MeasurementTimeInterval, 0, ddi::ACTUAL_WORK_STATE, 1000);
        let frames = fixture.from_tc(interval.encode());
        assert_eq!(process_data_payloads(&frames), vec![value.encode().to_vec()]);
        let mut sent = 0;
        for _ in 0..100 {
            sent += process_data_payloads(&fixture.step())
                .iter()
                .filter(|p| p[0] == ProcessDataCommand::Value as u8)
                .count();
        }
        assert_eq!(sent, 1);
    }

    #[test]
    fn test_status_timeout_reconnects() {
        let mut fixture = Fixture::new(TaskControllerClientConfig::default());
        fixture.activate();
        while fixture.client.state() == State::ObjectPoolActive {
            fixture.step();
            assert!(fixture.now < 10_000_000);
        }
        // The TC is still on the bus, so the client starts over right away.
        assert_eq!(fixture.client.state(), State::WaitForStatusResponse);
        assert!(fixture.client.last_failure().is_none());
    }

    #[test]
    fn test_disconnect_deactivates_pool() {
        let mut fixture = Fixture::new(TaskControllerClientConfig::default());
        fixture.activate();
        fixture.client.disconnect(&mut fixture.network, fixture.now).unwrap();
        assert_eq!(fixture.client.state(), State::WaitForObjectPoolDeactivate);
        let frames = fixture.network.take_tx_frames();
        assert_eq!(process_data_payloads(&frames)[0][..2], [0x81, 0x00]);

        fixture.from_tc([0x91, 0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0x00, 0xFF]);
        assert_eq!(fixture.client.state(), State::Disconnected);
        assert!(!fixture.client.is_initialized());
        fixture.client.initialize(false).unwrap();
    }
}
