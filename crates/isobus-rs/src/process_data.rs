// crates/isobus-rs/src/process_data.rs
//! Process Data message layout and the data dictionary entries used by section control.
//!
//! (Reference: ISO 11783-10, Section B.1 and ISO 11783-11)

use crate::hal::IsobusError;

/// Data Description Indices (ISO 11783-11) used by the stack and its demos.
pub mod ddi {
    pub const SETPOINT_VOLUME_PER_AREA_APPLICATION_RATE: u16 = 1;
    pub const ACTUAL_VOLUME_PER_AREA_APPLICATION_RATE: u16 = 2;
    pub const ACTUAL_WORKING_WIDTH: u16 = 67;
    pub const MAXIMUM_VOLUME_CONTENT: u16 = 71;
    pub const ACTUAL_VOLUME_CONTENT: u16 = 72;
    pub const TOTAL_AREA: u16 = 116;
    pub const EFFECTIVE_TOTAL_TIME: u16 = 119;
    pub const DEVICE_ELEMENT_OFFSET_X: u16 = 134;
    pub const DEVICE_ELEMENT_OFFSET_Y: u16 = 135;
    pub const DEVICE_ELEMENT_OFFSET_Z: u16 = 136;
    pub const ACTUAL_WORK_STATE: u16 = 141;
    pub const CONNECTOR_TYPE: u16 = 157;
    pub const PRESCRIPTION_CONTROL_STATE: u16 = 158;
    pub const SECTION_CONTROL_STATE: u16 = 160;
    /// First of 16 consecutive DDIs covering sections 1-256.
    pub const ACTUAL_CONDENSED_WORK_STATE_1_16: u16 = 161;
    pub const ACTUAL_CULTURAL_PRACTICE: u16 = 179;
    pub const SETPOINT_WORK_STATE: u16 = 289;
    /// First of 16 consecutive DDIs covering sections 1-256.
    pub const SETPOINT_CONDENSED_WORK_STATE_1_16: u16 = 290;
    pub const LIFETIME_APPLICATION_TOTAL_VOLUME: u16 = 325;
    /// Asks the client for every process data object of the default set.
    pub const REQUEST_DEFAULT_PROCESS_DATA: u16 = 0xDFFF;
}

/// The command nibble of a Process Data message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProcessDataCommand {
    TechnicalCapabilities = 0x0,
    DeviceDescriptor = 0x1,
    RequestValue = 0x2,
    Value = 0x3,
    MeasurementTimeInterval = 0x4,
    MeasurementDistanceInterval = 0x5,
    MeasurementMinimumWithinThreshold = 0x6,
    MeasurementMaximumWithinThreshold = 0x7,
    MeasurementChangeThreshold = 0x8,
    PeerControlAssignment = 0x9,
    SetValueAndAcknowledge = 0xA,
    Reserved1 = 0xB,
    Reserved2 = 0xC,
    ProcessDataAcknowledge = 0xD,
    StatusMessage = 0xE,
    ClientTask = 0xF,
}

impl From<u8> for ProcessDataCommand {
    fn from(value: u8) -> Self {
        match value & 0x0F {
            0x0 => Self::TechnicalCapabilities,
            0x1 => Self::DeviceDescriptor,
            0x2 => Self::RequestValue,
            0x3 => Self::Value,
            0x4 => Self::MeasurementTimeInterval,
            0x5 => Self::MeasurementDistanceInterval,
            0x6 => Self::MeasurementMinimumWithinThreshold,
            0x7 => Self::MeasurementMaximumWithinThreshold,
            0x8 => Self::MeasurementChangeThreshold,
            0x9 => Self::PeerControlAssignment,
            0xA => Self::SetValueAndAcknowledge,
            0xB => Self::Reserved1,
            0xC => Self::Reserved2,
            0xD => Self::ProcessDataAcknowledge,
            0xE => Self::StatusMessage,
            _ => Self::ClientTask,
        }
    }
}

// --- Process Data Acknowledge error bits (ISO 11783-10, B.14) ---

pub const PDACK_NO_ERROR: u8 = 0x00;
pub const PDACK_COMMAND_NOT_SUPPORTED: u8 = 0x01;
pub const PDACK_INVALID_ELEMENT_NUMBER: u8 = 0x02;
pub const PDACK_DDI_NOT_SUPPORTED: u8 = 0x04;
pub const PDACK_TRIGGER_METHOD_NOT_SUPPORTED: u8 = 0x08;
pub const PDACK_NOT_SETTABLE: u8 = 0x10;
pub const PDACK_INVALID_OR_UNSUPPORTED_INTERVAL: u8 = 0x20;
pub const PDACK_VALUE_NOT_CONFORMING: u8 = 0x40;
pub const PDACK_VALUE_OUT_OF_RANGE: u8 = 0x80;

/// Element numbers are 12 bits wide.
pub const MAX_ELEMENT_NUMBER: u16 = 0x0FFF;

/// A Process Data message addressing one DDI of one element.
///
/// | Byte | Content                                       |
/// |------|-----------------------------------------------|
/// | 0    | Command (bits 0-3), element number bits 0-3    |
/// | 1    | Element number bits 4-11                      |
/// | 2-3  | DDI                                           |
/// | 4-7  | Value                                         |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessDataMessage {
    pub command: ProcessDataCommand,
    pub element_number: u16,
    pub ddi: u16,
    pub value: i32,
}

impl ProcessDataMessage {
    pub fn new(command: ProcessDataCommand, element_number: u16, ddi: u16, value: i32) -> Self {
        Self {
            command,
            element_number: element_number & MAX_ELEMENT_NUMBER,
            ddi,
            value,
        }
    }

    pub fn encode(&self) -> [u8; 8] {
        let mut out = [0u8; 8];
        out[0] = (self.command as u8) | (((self.element_number & 0x0F) as u8) << 4);
        out[1] = (self.element_number >> 4) as u8;
        out[2..4].copy_from_slice(&self.ddi.to_le_bytes());
        out[4..8].copy_from_slice(&self.value.to_le_bytes());
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self, IsobusError> {
        if data.len() < 8 {
            return Err(IsobusError::BufferTooShort {
                expected: 8,
                actual: data.len(),
            });
        }
        Ok(Self {
            command: ProcessDataCommand::from(data[0]),
            element_number: u16::from(data[0] >> 4) | (u16::from(data[1]) << 4),
            ddi: u16::from_le_bytes([data[2], data[3]]),
            value: i32::from_le_bytes([data[4], data[5], data[6], data[7]]),
        })
    }
}

/// Builds a Process Data Acknowledge for `command` on `element_number`/`ddi`.
pub fn acknowledge(element_number: u16, ddi: u16, error_codes: u8, command: ProcessDataCommand) -> [u8; 8] {
    let element_number = element_number & MAX_ELEMENT_NUMBER;
    let ddi = ddi.to_le_bytes();
    [
        (ProcessDataCommand::ProcessDataAcknowledge as u8) | (((element_number & 0x0F) as u8) << 4),
        (element_number >> 4) as u8,
        ddi[0],
        ddi[1],
        error_codes,
        0xF0 | (command as u8),
        0xFF,
        0xFF,
    ]
}

// --- Condensed work state (ISO 11783-11, DDI 161-176 and 290-305) ---

/// Sections covered by one condensed work state value.
pub const SECTIONS_PER_CONDENSED_MESSAGE: usize = 16;

/// Two-bit state of one section in a condensed work state value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum SectionState {
    Off = 0b00,
    On = 0b01,
    Error = 0b10,
    #[default]
    NotInstalled = 0b11,
}

impl SectionState {
    fn from_bits(bits: u32) -> Self {
        match bits & 0b11 {
            0b00 => Self::Off,
            0b01 => Self::On,
            0b10 => Self::Error,
            _ => Self::NotInstalled,
        }
    }
}

impl From<bool> for SectionState {
    fn from(on: bool) -> Self {
        if on { Self::On } else { Self::Off }
    }
}

/// Packs up to 16 section states, first section in the lowest bits.
/// Missing sections are reported as not installed.
pub fn pack_condensed_work_state(sections: &[SectionState]) -> Result<u32, IsobusError> {
    if sections.len() > SECTIONS_PER_CONDENSED_MESSAGE {
        return Err(IsobusError::InvalidConfiguration(
            "a condensed work state holds at most 16 sections",
        ));
    }
    let mut value = u32::MAX;
    for (i, state) in sections.iter().enumerate() {
        value &= !(0b11 << (2 * i));
        value |= (*state as u32) << (2 * i);
    }
    Ok(value)
}

pub fn unpack_condensed_work_state(value: u32) -> [SectionState; SECTIONS_PER_CONDENSED_MESSAGE] {
    let mut sections = [SectionState::NotInstalled; SECTIONS_PER_CONDENSED_MESSAGE];
    for (i, section) in sections.iter_mut().enumerate() {
        *section = SectionState::from_bits(value >> (2 * i));
    }
    sections
}

/// Returns the index of the condensed block `ddi` belongs to, if it is a
/// condensed DDI starting at `first`.
pub fn condensed_block(ddi: u16, first: u16) -> Option<usize> {
    let block = ddi.checked_sub(first)?;
    (usize::from(block) < SECTIONS_PER_CONDENSED_MESSAGE).then_some(usize::from(block))
}
