// crates/isobus-rs/src/ddop/object.rs
use crate::hal::IsobusError;
use alloc::string::String;
use alloc::vec::Vec;
use core::ops::BitOr;

/// Reserved object ID meaning "no object".
pub const NULL_OBJECT_ID: u16 = 0xFFFF;

/// Object ID of the single Device object of a pool.
pub const DEVICE_OBJECT_ID: u16 = 0;

/// Longest designator accepted by version 4 Task Controllers.
pub const MAX_DESIGNATOR_LENGTH: usize = 128;

/// Longest designator accepted by Task Controllers older than version 4.
pub const LEGACY_DESIGNATOR_LENGTH: usize = 32;

/// Length of the structure and localization labels.
pub const LABEL_LENGTH: usize = 7;

/// Kind of a device element (Reference: ISO 11783-10, Annex A.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DeviceElementType {
    Device = 1,
    Function = 2,
    Bin = 3,
    Section = 4,
    Unit = 5,
    Connector = 6,
    NavigationReference = 7,
}

impl TryFrom<u8> for DeviceElementType {
    type Error = IsobusError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Device),
            2 => Ok(Self::Function),
            3 => Ok(Self::Bin),
            4 => Ok(Self::Section),
            5 => Ok(Self::Unit),
            6 => Ok(Self::Connector),
            7 => Ok(Self::NavigationReference),
            _ => Err(IsobusError::InvalidFrame("unknown device element type")),
        }
    }
}

/// Property bits of a DeviceProcessData object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProcessDataProperties(pub u8);

impl ProcessDataProperties {
    pub const NONE: Self = Self(0);
    pub const MEMBER_OF_DEFAULT_SET: Self = Self(0x01);
    pub const SETTABLE: Self = Self(0x02);
    /// Version 4 only, mutually exclusive with `SETTABLE`.
    pub const CONTROL_SOURCE: Self = Self(0x04);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for ProcessDataProperties {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Trigger methods a DeviceProcessData object supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TriggerMethods(pub u8);

impl TriggerMethods {
    pub const NONE: Self = Self(0);
    pub const TIME_INTERVAL: Self = Self(0x01);
    pub const DISTANCE_INTERVAL: Self = Self(0x02);
    pub const THRESHOLD_LIMITS: Self = Self(0x04);
    pub const ON_CHANGE: Self = Self(0x08);
    pub const TOTAL: Self = Self(0x10);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for TriggerMethods {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// DVC: identity of the implement.
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub designator: String,
    pub software_version: String,
    pub serial_number: String,
    /// Changes whenever the pool structure changes.
    pub structure_label: [u8; LABEL_LENGTH],
    /// Language, units and formats the designators are written for.
    pub localization_label: [u8; LABEL_LENGTH],
    /// Only transmitted to version 4 Task Controllers.
    pub extended_structure_label: Vec<u8>,
    pub name: u64,
}

/// DET: a node of the implement's element tree.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceElement {
    pub object_id: u16,
    pub designator: String,
    pub element_type: DeviceElementType,
    pub element_number: u16,
    pub parent_object_id: u16,
    children: Vec<u16>,
}

impl DeviceElement {
    pub fn new(
        object_id: u16,
        designator: String,
        element_type: DeviceElementType,
        element_number: u16,
        parent_object_id: u16,
    ) -> Self {
        Self {
            object_id,
            designator,
            element_type,
            element_number,
            parent_object_id,
            children: Vec::new(),
        }
    }

    /// Appends a child reference. Existence is checked when the pool is validated.
    pub fn add_reference_to_child_object(&mut self, child_object_id: u16) {
        self.children.push(child_object_id);
    }

    pub fn remove_reference_to_child_object(&mut self, child_object_id: u16) -> bool {
        let before = self.children.len();
        self.children.retain(|&c| c != child_object_id);
        before != self.children.len()
    }

    pub fn children(&self) -> &[u16] {
        &self.children
    }
}

/// DPD: a process variable of an element.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceProcessData {
    pub object_id: u16,
    pub designator: String,
    pub ddi: u16,
    pub properties: ProcessDataProperties,
    pub trigger_methods: TriggerMethods,
    pub presentation_object_id: u16,
}

/// DPT: a fixed property of an element.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceProperty {
    pub object_id: u16,
    pub designator: String,
    pub ddi: u16,
    pub value: i32,
    pub presentation_object_id: u16,
}

/// DVP: how a value is shown to the operator (`(value + offset) * scale`).
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceValuePresentation {
    pub object_id: u16,
    pub designator: String,
    pub offset: i32,
    pub scale: f32,
    pub decimal_digits: u8,
}

/// One entry of a Device Descriptor Object Pool.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceObject {
    Device(Device),
    Element(DeviceElement),
    ProcessData(DeviceProcessData),
    Property(DeviceProperty),
    ValuePresentation(DeviceValuePresentation),
}

impl DeviceObject {
    pub fn object_id(&self) -> u16 {
        match self {
            Self::Device(_) => DEVICE_OBJECT_ID,
            Self::Element(o) => o.object_id,
            Self::ProcessData(o) => o.object_id,
            Self::Property(o) => o.object_id,
            Self::ValuePresentation(o) => o.object_id,
        }
    }

    pub fn designator(&self) -> &str {
        match self {
            Self::Device(o) => &o.designator,
            Self::Element(o) => &o.designator,
            Self::ProcessData(o) => &o.designator,
            Self::Property(o) => &o.designator,
            Self::ValuePresentation(o) => &o.designator,
        }
    }

    /// The three-character table ID that starts the binary record.
    pub fn table_id(&self) -> &'static [u8; 3] {
        match self {
            Self::Device(_) => b"DVC",
            Self::Element(_) => b"DET",
            Self::ProcessData(_) => b"DPD",
            Self::Property(_) => b"DPT",
            Self::ValuePresentation(_) => b"DVP",
        }
    }

    pub fn as_element(&self) -> Option<&DeviceElement> {
        match self {
            Self::Element(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_element_mut(&mut self) -> Option<&mut DeviceElement> {
        match self {
            Self::Element(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_process_data(&self) -> Option<&DeviceProcessData> {
        match self {
            Self::ProcessData(p) => Some(p),
            _ => None,
        }
    }

    /// Presentation object referenced by this object, if it can reference one.
    pub(crate) fn presentation_object_id(&self) -> Option<u16> {
        match self {
            Self::ProcessData(o) => Some(o.presentation_object_id),
            Self::Property(o) => Some(o.presentation_object_id),
            _ => None,
        }
    }
}
