// crates/isobus-rs/src/tc_client/messages.rs
//! Process Data messages exchanged between a client and a Task Controller
//! outside plain value traffic (Reference: ISO 11783-10, Annex B).

use crate::hal::IsobusError;
use crate::process_data::{ProcessDataCommand, ProcessDataMessage};
use crate::types::PADDING_BYTE;
use alloc::vec;
use alloc::vec::Vec;

/// Version of ISO 11783-10 implemented by this client.
pub const CLIENT_VERSION: u8 = 4;

/// Sub-commands of the Device Descriptor command, stored in the upper nibble of byte 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DeviceDescriptorCommand {
    RequestStructureLabel = 0x0,
    StructureLabel = 0x1,
    RequestLocalizationLabel = 0x2,
    LocalizationLabel = 0x3,
    RequestObjectPoolTransfer = 0x4,
    RequestObjectPoolTransferResponse = 0x5,
    ObjectPoolTransfer = 0x6,
    ObjectPoolTransferResponse = 0x7,
    ObjectPoolActivateDeactivate = 0x8,
    ObjectPoolActivateDeactivateResponse = 0x9,
    DeleteObjectPool = 0xA,
    DeleteObjectPoolResponse = 0xB,
}

impl TryFrom<u8> for DeviceDescriptorCommand {
    type Error = IsobusError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0x0 => Self::RequestStructureLabel,
            0x1 => Self::StructureLabel,
            0x2 => Self::RequestLocalizationLabel,
            0x3 => Self::LocalizationLabel,
            0x4 => Self::RequestObjectPoolTransfer,
            0x5 => Self::RequestObjectPoolTransferResponse,
            0x6 => Self::ObjectPoolTransfer,
            0x7 => Self::ObjectPoolTransferResponse,
            0x8 => Self::ObjectPoolActivateDeactivate,
            0x9 => Self::ObjectPoolActivateDeactivateResponse,
            0xA => Self::DeleteObjectPool,
            0xB => Self::DeleteObjectPoolResponse,
            _ => return Err(IsobusError::InvalidFrame("unsupported device descriptor command")),
        })
    }
}

const fn device_descriptor(command: DeviceDescriptorCommand) -> u8 {
    ProcessDataCommand::DeviceDescriptor as u8 | ((command as u8) << 4)
}

/// Technical capabilities announced in a version message (Reference: ISO 11783-10, B.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionInfo {
    pub version: u8,
    /// Maximum boot time in seconds, 0xFF if not available.
    pub boot_time_s: u8,
    pub options: u8,
    pub number_of_booms: u8,
    pub number_of_sections: u8,
    pub number_of_channels: u8,
}

impl VersionInfo {
    pub const OPTION_DOCUMENTATION: u8 = 0x01;
    pub const OPTION_TC_GEO_WITHOUT_POSITION_BASED_CONTROL: u8 = 0x02;
    pub const OPTION_TC_GEO_WITH_POSITION_BASED_CONTROL: u8 = 0x04;
    pub const OPTION_PEER_CONTROL_ASSIGNMENT: u8 = 0x08;
    pub const OPTION_IMPLEMENT_SECTION_CONTROL: u8 = 0x10;

    pub fn supports(&self, option: u8) -> bool {
        self.options & option == option
    }
}

/// Status broadcast by a TC every 2 s (Reference: ISO 11783-10, B.15).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcStatus {
    pub status: u8,
    /// Client whose command the TC is executing.
    pub command_source_address: u8,
    pub command: u8,
}

impl TcStatus {
    pub fn task_active(&self) -> bool {
        self.status & 0x01 != 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TcMessage {
    RequestVersion,
    Version(VersionInfo),
    RequestStructureLabel,
    /// `None` if the TC has no pool stored for this client.
    StructureLabel {
        label: Option<[u8; 7]>,
        extended_label: Vec<u8>,
    },
    RequestLocalizationLabel,
    LocalizationLabel(Option<[u8; 7]>),
    RequestObjectPoolTransfer {
        pool_size: u32,
    },
    RequestObjectPoolTransferResponse {
        enough_memory: bool,
    },
    /// Serialized pool, without the command byte.
    ObjectPoolTransfer(Vec<u8>),
    ObjectPoolTransferResponse {
        error_codes: u8,
        pool_size: u32,
    },
    ObjectPoolActivate {
        activate: bool,
    },
    ObjectPoolActivateResponse {
        error_codes: u8,
        parent_object_id: u16,
        faulting_object_id: u16,
        pool_error_codes: u8,
    },
    DeleteObjectPool,
    DeleteObjectPoolResponse {
        deleted: bool,
        error_details: u8,
    },
    Status(TcStatus),
    /// Client task message sent by the client every 2 s.
    ClientTask {
        task_active: bool,
    },
    Acknowledge {
        element_number: u16,
        ddi: u16,
        error_codes: u8,
        command: ProcessDataCommand,
    },
    /// Value, request and measurement traffic.
    ProcessData(ProcessDataMessage),
}

fn label(bytes: &[u8]) -> Option<[u8; 7]> {
    let label: [u8; 7] = bytes.get(..7)?.try_into().ok()?;
    (label != [PADDING_BYTE; 7]).then_some(label)
}

impl TcMessage {
    pub fn encode(&self) -> Vec<u8> {
        use DeviceDescriptorCommand as Dd;

        let mut out = vec![PADDING_BYTE; 8];
        match self {
            TcMessage::RequestVersion => out[0] = ProcessDataCommand::TechnicalCapabilities as u8,
            TcMessage::Version(info) => {
                out.copy_from_slice(&[
                    ProcessDataCommand::TechnicalCapabilities as u8 | 0x10,
                    info.version,
                    info.boot_time_s,
                    info.options,
                    0x00,
                    info.number_of_booms,
                    info.number_of_sections,
                    info.number_of_channels,
                ]);
            }
            TcMessage::RequestStructureLabel => out[0] = device_descriptor(Dd::RequestStructureLabel),
            TcMessage::StructureLabel { label, extended_label } => {
                out[0] = device_descriptor(Dd::StructureLabel);
                if let Some(label) = label {
                    out[1..8].copy_from_slice(label);
                }
                out.extend_from_slice(extended_label);
            }
            TcMessage::RequestLocalizationLabel => out[0] = device_descriptor(Dd::RequestLocalizationLabel),
            TcMessage::LocalizationLabel(label) => {
                out[0] = device_descriptor(Dd::LocalizationLabel);
                if let Some(label) = label {
                    out[1..8].copy_from_slice(label);
                }
            }
            TcMessage::RequestObjectPoolTransfer { pool_size } => {
                out[0] = device_descriptor(Dd::RequestObjectPoolTransfer);
                out[1..5].copy_from_slice(&pool_size.to_le_bytes());
            }
            TcMessage::RequestObjectPoolTransferResponse { enough_memory } => {
                out[0] = device_descriptor(Dd::RequestObjectPoolTransferResponse);
                out[1] = if *enough_memory { 0 } else { 1 };
            }
            TcMessage::ObjectPoolTransfer(pool) => {
                out.clear();
                out.reserve(pool.len() + 1);
                out.push(device_descriptor(Dd::ObjectPoolTransfer));
                out.extend_from_slice(pool);
            }
            TcMessage::ObjectPoolTransferResponse { error_codes, pool_size } => {
                out[0] = device_descriptor(Dd::ObjectPoolTransferResponse);
                out[1] = *error_codes;
                out[2..6].copy_from_slice(&pool_size.to_le_bytes());
            }
            TcMessage::ObjectPoolActivate { activate } => {
                out[0] = device_descriptor(Dd::ObjectPoolActivateDeactivate);
                out[1] = if *activate { 0xFF } else { 0x00 };
            }
            TcMessage::ObjectPoolActivateResponse {
                error_codes,
                parent_object_id,
                faulting_object_id,
                pool_error_codes,
            } => {
                out[0] = device_descriptor(Dd::ObjectPoolActivateDeactivateResponse);
                out[1] = *error_codes;
                out[2..4].copy_from_slice(&parent_object_id.to_le_bytes());
                out[4..6].copy_from_slice(&faulting_object_id.to_le_bytes());
                out[6] = *pool_error_codes;
            }
            TcMessage::DeleteObjectPool => out[0] = device_descriptor(Dd::DeleteObjectPool),
            TcMessage::DeleteObjectPoolResponse { deleted, error_details } => {
                out[0] = device_descriptor(Dd::DeleteObjectPoolResponse);
                out[1] = if *deleted { 0 } else { 1 };
                out[2] = *error_details;
            }
            TcMessage::Status(status) => {
                out[0] = 0xF0 | ProcessDataCommand::StatusMessage as u8;
                out[4] = status.status;
                out[5] = status.command_source_address;
                out[6] = status.command;
            }
            TcMessage::ClientTask { task_active } => {
                out[4] = u8::from(*task_active);
                out[5..8].fill(0x00);
            }
            TcMessage::Acknowledge {
                element_number,
                ddi,
                error_codes,
                command,
            } => {
                out.copy_from_slice(&crate::process_data::acknowledge(
                    *element_number,
                    *ddi,
                    *error_codes,
                    *command,
                ));
            }
            TcMessage::ProcessData(message) => out.copy_from_slice(&message.encode()),
        }
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self, IsobusError> {
        use DeviceDescriptorCommand as Dd;

        if data.len() < 8 {
            return Err(IsobusError::BufferTooShort {
                expected: 8,
                actual: data.len(),
            });
        }
        let sub_command = data[0] >> 4;
        let u16_at = |i: usize| u16::from_le_bytes([data[i], data[i + 1]]);
        let u32_at = |i: usize| u32::from_le_bytes([data[i], data[i + 1], data[i + 2], data[i + 3]]);

        Ok(match ProcessDataCommand::from(data[0]) {
            ProcessDataCommand::TechnicalCapabilities => match sub_command {
                0x0 => TcMessage::RequestVersion,
                0x1 => TcMessage::Version(VersionInfo {
                    version: data[1],
                    boot_time_s: data[2],
                    options: data[3],
                    number_of_booms: data[5],
                    number_of_sections: data[6],
                    number_of_channels: data[7],
                }),
                _ => return Err(IsobusError::InvalidFrame("unsupported technical capabilities message")),
            },
            ProcessDataCommand::DeviceDescriptor => match Dd::try_from(sub_command)? {
                Dd::RequestStructureLabel => TcMessage::RequestStructureLabel,
                Dd::StructureLabel => TcMessage::StructureLabel {
                    label: label(&data[1..]),
                    extended_label: data[8..].to_vec(),
                },
                Dd::RequestLocalizationLabel => TcMessage::RequestLocalizationLabel,
                Dd::LocalizationLabel => TcMessage::LocalizationLabel(label(&data[1..])),
                Dd::RequestObjectPoolTransfer => TcMessage::RequestObjectPoolTransfer { pool_size: u32_at(1) },
                Dd::RequestObjectPoolTransferResponse => {
                    TcMessage::RequestObjectPoolTransferResponse { enough_memory: data[1] == 0 }
                }
                Dd::ObjectPoolTransfer => TcMessage::ObjectPoolTransfer(data[1..].to_vec()),
                Dd::ObjectPoolTransferResponse => TcMessage::ObjectPoolTransferResponse {
                    error_codes: data[1],
                    pool_size: u32_at(2),
                },
                Dd::ObjectPoolActivateDeactivate => TcMessage::ObjectPoolActivate { activate: data[1] == 0xFF },
                Dd::ObjectPoolActivateDeactivateResponse => TcMessage::ObjectPoolActivateResponse {
                    error_codes: data[1],
                    parent_object_id: u16_at(2),
                    faulting_object_id: u16_at(4),
                    pool_error_codes: data[6],
                },
                Dd::DeleteObjectPool => TcMessage::DeleteObjectPool,
                Dd::DeleteObjectPoolResponse => TcMessage::DeleteObjectPoolResponse {
                    deleted: data[1] == 0,
                    error_details: data[2],
                },
            },
            ProcessDataCommand::StatusMessage => TcMessage::Status(TcStatus {
                status: data[4],
                command_source_address: data[5],
                command: data[6],
            }),
            ProcessDataCommand::ClientTask => TcMessage::ClientTask {
                task_active: data[4] & 0x01 != 0,
            },
            ProcessDataCommand::ProcessDataAcknowledge => TcMessage::Acknowledge {
                element_number: u16::from(sub_command) | (u16::from(data[1]) << 4),
                ddi: u16_at(2),
                error_codes: data[4],
                command: ProcessDataCommand::from(data[5]),
            },
            _ => TcMessage::ProcessData(ProcessDataMessage::decode(data)?),
        })
    }
}
