// crates/isobus-rs/tests/simulator/tc_server.rs
//! A scripted Task Controller: enough of the server side of ISO 11783-10 to
//! take a client from address claim to an active pool.

use super::Application;
use isobus_rs::ddop::VERSION_4;
use isobus_rs::process_data::{ProcessDataCommand, ProcessDataMessage};
use isobus_rs::tc_client::{TcMessage, TcStatus, VersionInfo};
use isobus_rs::types::{
    PGN_LANGUAGE_COMMAND, PGN_PROCESS_DATA, PGN_REQUEST, PRIORITY_DEFAULT, PRIORITY_PROCESS_DATA,
};
use isobus_rs::{
    ControlFunctionHandle, DeviceDescriptorObjectPool, FunctionCode, Name, NameField, NameFilter,
    NetworkEvent, NetworkManager,
};

pub const TC_ADDRESS: u8 = 0xF7;
pub const STATUS_INTERVAL_US: u64 = 2_000_000;

pub fn tc_name() -> Name {
    let mut name = Name::default();
    name.set_industry_group(2).unwrap();
    name.set_function_code(FunctionCode::TaskController as u8).unwrap();
    name.set_identity_number(1).unwrap();
    name.set_manufacturer_code(1407).unwrap();
    name
}

pub struct TaskControllerServer {
    pub internal: ControlFunctionHandle,
    pub client: ControlFunctionHandle,

    // --- Script ---
    pub send_status: bool,
    pub version: VersionInfo,
    pub enough_memory: bool,
    pub activation_error: u8,
    pub task_active: bool,

    // --- Observed ---
    pub stored_pool: Option<DeviceDescriptorObjectPool>,
    pub pool_active: bool,
    pub pool_transfers: usize,
    pub deletions: usize,
    pub client_tasks: usize,
    pub client_version: Option<VersionInfo>,
    /// Value messages from the client.
    pub values: Vec<ProcessDataMessage>,
    /// Process data acknowledges from the client: (element, DDI, error codes).
    pub acknowledgements: Vec<(u16, u16, u8)>,

    last_status_us: Option<u64>,
    client_version_requested: bool,
}

impl TaskControllerServer {
    /// Registers the TC and a partner for any rate controller on `network`.
    pub fn register(network: &mut NetworkManager) -> Self {
        let internal = network.register_internal_control_function(tc_name(), TC_ADDRESS).unwrap();
        let client = network.register_partnered_control_function(vec![NameFilter::new(
            NameField::FunctionCode,
            FunctionCode::RateControl as u32,
        )]);
        Self {
            internal,
            client,
            send_status: true,
            version: VersionInfo {
                version: 4,
                boot_time_s: 0xFF,
                options: 0x1F,
                number_of_booms: 1,
                number_of_sections: 16,
                number_of_channels: 1,
            },
            enough_memory: true,
            activation_error: 0,
            task_active: false,
            stored_pool: None,
            pool_active: false,
            pool_transfers: 0,
            deletions: 0,
            client_tasks: 0,
            client_version: None,
            values: Vec::new(),
            acknowledgements: Vec::new(),
            last_status_us: None,
            client_version_requested: false,
        }
    }

    pub fn send_to_client(&self, network: &mut NetworkManager, message: &TcMessage, now_us: u64) {
        network
            .send_message(PGN_PROCESS_DATA, &message.encode(), self.internal, Some(self.client), PRIORITY_PROCESS_DATA, now_us)
            .unwrap();
    }

    pub fn send_process_data(
        &self,
        network: &mut NetworkManager,
        command: ProcessDataCommand,
        element_number: u16,
        ddi: u16,
        value: i32,
        now_us: u64,
    ) {
        let message = ProcessDataMessage::new(command, element_number, ddi, value);
        self.send_to_client(network, &TcMessage::ProcessData(message), now_us);
    }

    fn handle(&mut self, message: TcMessage, network: &mut NetworkManager, now_us: u64) {
        let reply = match message {
            TcMessage::RequestVersion => Some(TcMessage::Version(self.version)),
            TcMessage::Version(info) => {
                self.client_version = Some(info);
                None
            }
            TcMessage::RequestStructureLabel => {
                let device = self.stored_pool.as_ref().and_then(|p| p.device());
                Some(TcMessage::StructureLabel {
                    label: device.map(|d| d.structure_label),
                    extended_label: device.map(|d| d.extended_structure_label.clone()).unwrap_or_default(),
                })
            }
            TcMessage::RequestLocalizationLabel => {
                let device = self.stored_pool.as_ref().and_then(|p| p.device());
                Some(TcMessage::LocalizationLabel(device.map(|d| d.localization_label)))
            }
            TcMessage::DeleteObjectPool => {
                let deleted = self.stored_pool.take().is_some();
                self.pool_active = false;
                self.deletions += 1;
                Some(TcMessage::DeleteObjectPoolResponse {
                    deleted,
                    error_details: if deleted { 0x00 } else { 0x01 },
                })
            }
            TcMessage::RequestObjectPoolTransfer { .. } => Some(TcMessage::RequestObjectPoolTransferResponse {
                enough_memory: self.enough_memory,
            }),
            TcMessage::ObjectPoolTransfer(data) => {
                let pool_size = data.len() as u32;
                let error_codes = match DeviceDescriptorObjectPool::deserialize(&data, VERSION_4) {
                    Ok(pool) => {
                        self.stored_pool = Some(pool);
                        self.pool_transfers += 1;
                        0x00
                    }
                    Err(_) => 0x01,
                };
                Some(TcMessage::ObjectPoolTransferResponse { error_codes, pool_size })
            }
            TcMessage::ObjectPoolActivate { activate } => {
                let error_codes = match (activate, &self.stored_pool) {
                    (true, None) => 0x01,
                    (true, Some(_)) => self.activation_error,
                    (false, _) => 0x00,
                };
                self.pool_active = activate && error_codes == 0;
                Some(TcMessage::ObjectPoolActivateResponse {
                    error_codes,
                    parent_object_id: 0xFFFF,
                    faulting_object_id: 0xFFFF,
                    pool_error_codes: 0x00,
                })
            }
            TcMessage::ClientTask { .. } => {
                self.client_tasks += 1;
                None
            }
            TcMessage::Acknowledge {
                element_number,
                ddi,
                error_codes,
                ..
            } => {
                self.acknowledgements.push((element_number, ddi, error_codes));
                None
            }
            TcMessage::ProcessData(pd) if pd.command == ProcessDataCommand::Value => {
                self.values.push(pd);
                None
            }
            _ => None,
        };
        if let Some(reply) = reply {
            self.send_to_client(network, &reply, now_us);
        }
    }
}

impl Application for TaskControllerServer {
    fn on_event(&mut self, event: &NetworkEvent, network: &mut NetworkManager, now_us: u64) {
        let NetworkEvent::MessageReceived(message) = event else { return };
        if network.address_of(self.client) != Some(message.source) {
            return;
        }
        match message.pgn {
            PGN_REQUEST if message.get_u24_le(0) == Some(PGN_LANGUAGE_COMMAND) => {
                // Language, decimal/time format, date format, units
                let language = [b'e', b'n', 0b0101_0000, 0x00, 0b0101_0101, 0b0101_0101, 0xFF, 0xFF];
                network
                    .send_message(PGN_LANGUAGE_COMMAND, &language, self.internal, None, PRIORITY_DEFAULT, now_us)
                    .unwrap();
            }
            PGN_PROCESS_DATA => {
                if let Ok(tc_message) = TcMessage::decode(&message.data) {
                    self.handle(tc_message, network, now_us);
                }
            }
            _ => {}
        }
    }

    fn update(&mut self, network: &mut NetworkManager, now_us: u64) {
        if network.address_of(self.internal).is_none() {
            return;
        }
        let due = self
            .last_status_us
            .is_none_or(|last| now_us.saturating_sub(last) >= STATUS_INTERVAL_US);
        if self.send_status && due {
            let status = TcMessage::Status(TcStatus {
                status: u8::from(self.task_active),
                command_source_address: 0xFF,
                command: 0xFF,
            });
            network
                .send_message(PGN_PROCESS_DATA, &status.encode(), self.internal, None, PRIORITY_PROCESS_DATA, now_us)
                .unwrap();
            self.last_status_us = Some(now_us);
        }
        // Ask once for the client's capabilities, as a real TC does.
        if !self.client_version_requested && network.address_of(self.client).is_some() && self.client_tasks > 0 {
            self.send_to_client(network, &TcMessage::RequestVersion, now_us);
            self.client_version_requested = true;
        }
    }
}
