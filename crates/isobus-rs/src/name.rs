// crates/isobus-rs/src/name.rs
//! The 64-bit J1939 NAME and the filters used to recognize partner control functions.
//!
//! (Reference: ISO 11783-5, Section 4.3 / SAE J1939-81, Section 4.1.1)
//!
//! Field setters reject values that do not fit into the field's bit width and
//! leave the NAME unchanged. `Name::new` accepts any raw 64-bit value.

use crate::hal::IsobusError;
use alloc::vec::Vec;

/// The individual fields of a NAME, from most to least significant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NameField {
    ArbitraryAddressCapable,
    IndustryGroup,
    DeviceClassInstance,
    DeviceClass,
    FunctionCode,
    FunctionInstance,
    EcuInstance,
    ManufacturerCode,
    IdentityNumber,
}

impl NameField {
    pub const ALL: [NameField; 9] = [
        NameField::ArbitraryAddressCapable,
        NameField::IndustryGroup,
        NameField::DeviceClassInstance,
        NameField::DeviceClass,
        NameField::FunctionCode,
        NameField::FunctionInstance,
        NameField::EcuInstance,
        NameField::ManufacturerCode,
        NameField::IdentityNumber,
    ];

    /// Returns `(bit offset, bit width)` of the field inside the 64-bit NAME.
    /// Bit 48 is reserved and always transmitted as zero.
    const fn layout(self) -> (u32, u32) {
        match self {
            NameField::IdentityNumber => (0, 21),
            NameField::ManufacturerCode => (21, 11),
            NameField::EcuInstance => (32, 3),
            NameField::FunctionInstance => (35, 5),
            NameField::FunctionCode => (40, 8),
            NameField::DeviceClass => (49, 7),
            NameField::DeviceClassInstance => (56, 4),
            NameField::IndustryGroup => (60, 3),
            NameField::ArbitraryAddressCapable => (63, 1),
        }
    }

    /// The largest value the field can hold.
    pub const fn max_value(self) -> u32 {
        let (_, width) = self.layout();
        ((1u64 << width) - 1) as u32
    }
}

/// Well-known function codes used on ISOBUS networks (ISO 11783-1, Annex B).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FunctionCode {
    Engine = 0,
    VirtualTerminal = 29,
    FileServer = 30,
    RateControl = 128,
    OperatorInterface = 129,
    TaskController = 130,
    PositionControl = 131,
    MachineControl = 132,
    TractorEcu = 134,
    SequenceControlMaster = 135,
}

/// A 64-bit ISO 11783 NAME.
///
/// Ordering is the unsigned comparison of the packed value. During address
/// arbitration the numerically smaller NAME has the higher priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Name(u64);

impl Name {
    /// Creates a NAME from its packed 64-bit representation.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the packed 64-bit value.
    pub const fn full_name(&self) -> u64 {
        self.0
    }

    /// Decodes a NAME from the 8-byte little-endian payload of an address claim.
    pub fn from_le_bytes(bytes: [u8; 8]) -> Self {
        Self(u64::from_le_bytes(bytes))
    }

    pub fn to_le_bytes(&self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    pub fn field(&self, field: NameField) -> u32 {
        let (shift, _) = field.layout();
        ((self.0 >> shift) & u64::from(field.max_value())) as u32
    }

    /// Writes a single field, rejecting values wider than the field.
    pub fn set_field(&mut self, field: NameField, value: u32) -> Result<(), IsobusError> {
        if value > field.max_value() {
            return Err(IsobusError::InvalidNameField { field, value });
        }
        let (shift, _) = field.layout();
        let mask = u64::from(field.max_value()) << shift;
        self.0 = (self.0 & !mask) | (u64::from(value) << shift);
        Ok(())
    }

    pub fn arbitrary_address_capable(&self) -> bool {
        self.field(NameField::ArbitraryAddressCapable) != 0
    }

    pub fn set_arbitrary_address_capable(&mut self, capable: bool) {
        // A one-bit field cannot overflow.
        let _ = self.set_field(NameField::ArbitraryAddressCapable, u32::from(capable));
    }

    pub fn industry_group(&self) -> u8 {
        self.field(NameField::IndustryGroup) as u8
    }

    pub fn set_industry_group(&mut self, value: u8) -> Result<(), IsobusError> {
        self.set_field(NameField::IndustryGroup, u32::from(value))
    }

    pub fn device_class_instance(&self) -> u8 {
        self.field(NameField::DeviceClassInstance) as u8
    }

    pub fn set_device_class_instance(&mut self, value: u8) -> Result<(), IsobusError> {
        self.set_field(NameField::DeviceClassInstance, u32::from(value))
    }

    pub fn device_class(&self) -> u8 {
        self.field(NameField::DeviceClass) as u8
    }

    pub fn set_device_class(&mut self, value: u8) -> Result<(), IsobusError> {
        self.set_field(NameField::DeviceClass, u32::from(value))
    }

    pub fn function_code(&self) -> u8 {
        self.field(NameField::FunctionCode) as u8
    }

    pub fn set_function_code(&mut self, value: u8) -> Result<(), IsobusError> {
        self.set_field(NameField::FunctionCode, u32::from(value))
    }

    pub fn function_instance(&self) -> u8 {
        self.field(NameField::FunctionInstance) as u8
    }

    pub fn set_function_instance(&mut self, value: u8) -> Result<(), IsobusError> {
        self.set_field(NameField::FunctionInstance, u32::from(value))
    }

    pub fn ecu_instance(&self) -> u8 {
        self.field(NameField::EcuInstance) as u8
    }

    pub fn set_ecu_instance(&mut self, value: u8) -> Result<(), IsobusError> {
        self.set_field(NameField::EcuInstance, u32::from(value))
    }

    pub fn manufacturer_code(&self) -> u16 {
        self.field(NameField::ManufacturerCode) as u16
    }

    pub fn set_manufacturer_code(&mut self, value: u16) -> Result<(), IsobusError> {
        self.set_field(NameField::ManufacturerCode, u32::from(value))
    }

    pub fn identity_number(&self) -> u32 {
        self.field(NameField::IdentityNumber)
    }

    pub fn set_identity_number(&mut self, value: u32) -> Result<(), IsobusError> {
        self.set_field(NameField::IdentityNumber, value)
    }
}

impl From<u64> for Name {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// Matches a NAME on the value of a single field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NameFilter {
    pub field: NameField,
    pub value: u32,
}

impl NameFilter {
    pub const fn new(field: NameField, value: u32) -> Self {
        Self { field, value }
    }

    /// Shorthand for the filter every Task Controller client uses to find its server.
    pub const fn task_controller() -> Self {
        Self::new(NameField::FunctionCode, FunctionCode::TaskController as u32)
    }

    pub fn matches(&self, name: &Name) -> bool {
        name.field(self.field) == self.value
    }

    /// Evaluates a filter set: filters on the same field are alternatives,
    /// filters on different fields must all be satisfied.
    ///
    /// An empty set matches nothing, so an unconfigured partner never binds.
    pub fn matches_all(filters: &[NameFilter], name: &Name) -> bool {
        if filters.is_empty() {
            return false;
        }
        let mut fields: Vec<NameField> = filters.iter().map(|f| f.field).collect();
        fields.sort_unstable();
        fields.dedup();
        fields.iter().all(|field| {
            filters
                .iter()
                .filter(|f| f.field == *field)
                .any(|f| f.matches(name))
        })
    }
}
