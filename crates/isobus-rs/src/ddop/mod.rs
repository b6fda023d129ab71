// crates/isobus-rs/src/ddop/mod.rs
//! The Device Descriptor Object Pool (Reference: ISO 11783-10, Annex A and B).

mod builder;
mod codec;
mod object;

pub use builder::PoolBuilder;
pub use codec::VERSION_4;
pub use object::{
    DEVICE_OBJECT_ID, Device, DeviceElement, DeviceElementType, DeviceObject, DeviceProcessData,
    DeviceProperty, DeviceValuePresentation, LABEL_LENGTH, LEGACY_DESIGNATOR_LENGTH,
    MAX_DESIGNATOR_LENGTH, NULL_OBJECT_ID, ProcessDataProperties, TriggerMethods,
};

use crate::hal::IsobusError;
use crate::transport::ETP_MAX_SIZE;
use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use log::{debug, trace};

/// Space taken by the command byte that precedes the pool in a transfer message.
const TRANSFER_HEADER_LENGTH: usize = 1;

/// The implement's self-description.
///
/// Objects keep their insertion order, which is also the serialization order.
/// Lookups by object ID go through an index.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceDescriptorObjectPool {
    objects: Vec<DeviceObject>,
    index: BTreeMap<u16, usize>,
    task_controller_version: u8,
}

impl Default for DeviceDescriptorObjectPool {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceDescriptorObjectPool {
    /// Creates an empty pool targeting version 4 Task Controllers.
    pub fn new() -> Self {
        Self {
            objects: Vec::new(),
            index: BTreeMap::new(),
            task_controller_version: VERSION_4,
        }
    }

    /// Sets the TC version the serialized pool must be compatible with.
    pub fn set_task_controller_compatibility_level(&mut self, version: u8) {
        self.task_controller_version = version;
    }

    pub fn task_controller_compatibility_level(&self) -> u8 {
        self.task_controller_version
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_device(
        &mut self,
        designator: &str,
        software_version: &str,
        serial_number: &str,
        structure_label: &str,
        localization_label: [u8; LABEL_LENGTH],
        extended_structure_label: &[u8],
        name: u64,
    ) -> Result<(), IsobusError> {
        check_designator(DEVICE_OBJECT_ID, designator)?;
        check_designator(DEVICE_OBJECT_ID, software_version)?;
        check_designator(DEVICE_OBJECT_ID, serial_number)?;
        if structure_label.len() > LABEL_LENGTH {
            return Err(IsobusError::InvalidObject {
                object_id: DEVICE_OBJECT_ID,
                reason: "structure label longer than 7 bytes",
            });
        }
        if extended_structure_label.len() > 32 {
            return Err(IsobusError::InvalidObject {
                object_id: DEVICE_OBJECT_ID,
                reason: "extended structure label longer than 32 bytes",
            });
        }
        // Short labels are padded with spaces.
        let mut label = [b' '; LABEL_LENGTH];
        label[..structure_label.len()].copy_from_slice(structure_label.as_bytes());
        self.insert(DeviceObject::Device(Device {
            designator: designator.to_string(),
            software_version: software_version.to_string(),
            serial_number: serial_number.to_string(),
            structure_label: label,
            localization_label,
            extended_structure_label: extended_structure_label.to_vec(),
            name,
        }))
    }

    pub fn add_device_element(
        &mut self,
        designator: &str,
        element_number: u16,
        parent_object_id: u16,
        element_type: DeviceElementType,
        object_id: u16,
    ) -> Result<(), IsobusError> {
        check_designator(object_id, designator)?;
        if element_number > 4095 {
            return Err(IsobusError::InvalidObject {
                object_id,
                reason: "element number exceeds 12 bits",
            });
        }
        self.insert(DeviceObject::Element(DeviceElement::new(
            object_id,
            designator.to_string(),
            element_type,
            element_number,
            parent_object_id,
        )))
    }

    pub fn add_device_process_data(
        &mut self,
        designator: &str,
        ddi: u16,
        presentation_object_id: u16,
        properties: ProcessDataProperties,
        trigger_methods: TriggerMethods,
        object_id: u16,
    ) -> Result<(), IsobusError> {
        check_designator(object_id, designator)?;
        if properties.contains(ProcessDataProperties::SETTABLE | ProcessDataProperties::CONTROL_SOURCE) {
            return Err(IsobusError::InvalidObject {
                object_id,
                reason: "settable and control source are mutually exclusive",
            });
        }
        self.insert(DeviceObject::ProcessData(DeviceProcessData {
            object_id,
            designator: designator.to_string(),
            ddi,
            properties,
            trigger_methods,
            presentation_object_id,
        }))
    }

    pub fn add_device_property(
        &mut self,
        designator: &str,
        value: i32,
        ddi: u16,
        presentation_object_id: u16,
        object_id: u16,
    ) -> Result<(), IsobusError> {
        check_designator(object_id, designator)?;
        self.insert(DeviceObject::Property(DeviceProperty {
            object_id,
            designator: designator.to_string(),
            ddi,
            value,
            presentation_object_id,
        }))
    }

    pub fn add_device_value_presentation(
        &mut self,
        designator: &str,
        offset: i32,
        scale: f32,
        decimal_digits: u8,
        object_id: u16,
    ) -> Result<(), IsobusError> {
        check_designator(object_id, designator)?;
        if decimal_digits > 7 {
            return Err(IsobusError::InvalidObject {
                object_id,
                reason: "more than 7 decimal digits",
            });
        }
        self.insert(DeviceObject::ValuePresentation(DeviceValuePresentation {
            object_id,
            designator: designator.to_string(),
            offset,
            scale,
            decimal_digits,
        }))
    }

    /// Adds `child_object_id` to the children of element `parent_object_id`.
    /// The child does not have to exist yet; `validate` checks it.
    pub fn add_reference_to_child_object(&mut self, parent_object_id: u16, child_object_id: u16) -> Result<(), IsobusError> {
        let element = self
            .get_object_by_id_mut(parent_object_id)
            .ok_or(IsobusError::ObjectNotFound(parent_object_id))?
            .as_element_mut()
            .ok_or(IsobusError::InvalidObject {
                object_id: parent_object_id,
                reason: "only device elements have children",
            })?;
        element.add_reference_to_child_object(child_object_id);
        Ok(())
    }

    pub fn get_object_by_id(&self, object_id: u16) -> Option<&DeviceObject> {
        self.index.get(&object_id).map(|&i| &self.objects[i])
    }

    pub fn get_object_by_id_mut(&mut self, object_id: u16) -> Option<&mut DeviceObject> {
        let i = *self.index.get(&object_id)?;
        self.objects.get_mut(i)
    }

    pub fn get_object_by_index(&self, index: usize) -> Option<&DeviceObject> {
        self.objects.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeviceObject> {
        self.objects.iter()
    }

    /// Number of objects in the pool.
    pub fn size(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn clear(&mut self) {
        self.objects.clear();
        self.index.clear();
    }

    pub fn device(&self) -> Option<&Device> {
        match self.get_object_by_id(DEVICE_OBJECT_ID) {
            Some(DeviceObject::Device(device)) => Some(device),
            _ => None,
        }
    }

    /// Finds the element with the given element number.
    pub fn element_by_number(&self, element_number: u16) -> Option<&DeviceElement> {
        self.objects
            .iter()
            .filter_map(DeviceObject::as_element)
            .find(|e| e.element_number == element_number)
    }

    /// Finds the process data object with `ddi` among the children of element `element_number`.
    pub fn process_data_for(&self, element_number: u16, ddi: u16) -> Option<&DeviceProcessData> {
        let element = self.element_by_number(element_number)?;
        element
            .children()
            .iter()
            .filter_map(|&id| self.get_object_by_id(id)?.as_process_data())
            .find(|pd| pd.ddi == ddi)
    }

    /// Lists `(element number, DDI)` of every process data object in the default set.
    pub fn default_set(&self) -> Vec<(u16, u16)> {
        let mut members = Vec::new();
        for element in self.objects.iter().filter_map(DeviceObject::as_element) {
            for &child in element.children() {
                if let Some(pd) = self.get_object_by_id(child).and_then(DeviceObject::as_process_data) {
                    if pd.properties.contains(ProcessDataProperties::MEMBER_OF_DEFAULT_SET) {
                        members.push((element.element_number, pd.ddi));
                    }
                }
            }
        }
        members
    }

    /// Checks the object graph. Returns the first problem found.
    pub fn validate(&self) -> Result<(), IsobusError> {
        let mut errors = Vec::new();
        self.collect_errors(&mut errors);
        match errors.into_iter().next() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Records every structural problem of the pool.
    pub(crate) fn collect_errors(&self, errors: &mut Vec<IsobusError>) {
        if self.device().is_none() {
            errors.push(IsobusError::ObjectNotFound(DEVICE_OBJECT_ID));
        }
        for object in &self.objects {
            let id = object.object_id();
            if let Some(element) = object.as_element() {
                let parent_ok = element.parent_object_id == DEVICE_OBJECT_ID
                    || self
                        .get_object_by_id(element.parent_object_id)
                        .is_some_and(|p| p.as_element().is_some());
                if !parent_ok && element.element_type != DeviceElementType::Device {
                    errors.push(IsobusError::DanglingReference {
                        parent: id,
                        child: element.parent_object_id,
                    });
                }
                for &child in element.children() {
                    if self.get_object_by_id(child).is_none() {
                        errors.push(IsobusError::DanglingReference { parent: id, child });
                    }
                }
            }
            if let Some(presentation) = object.presentation_object_id() {
                let ok = presentation == NULL_OBJECT_ID
                    || matches!(
                        self.get_object_by_id(presentation),
                        Some(DeviceObject::ValuePresentation(_))
                    );
                if !ok {
                    errors.push(IsobusError::DanglingReference { parent: id, child: presentation });
                }
            }
        }
    }

    /// Serializes the pool for the configured TC version, validating it first.
    pub fn serialize(&self) -> Result<Vec<u8>, IsobusError> {
        self.validate()?;
        let mut out = Vec::new();
        for object in &self.objects {
            codec::encode_object(object, self.task_controller_version, &mut out);
        }
        if out.len() + TRANSFER_HEADER_LENGTH > ETP_MAX_SIZE {
            return Err(IsobusError::PoolTooLarge(out.len()));
        }
        debug!(
            "Serialized {} objects into {} bytes for TC version {}",
            self.objects.len(),
            out.len(),
            self.task_controller_version
        );
        Ok(out)
    }

    /// Parses a binary pool as produced for a TC of `version`.
    pub fn deserialize(data: &[u8], version: u8) -> Result<Self, IsobusError> {
        let mut pool = Self::new();
        pool.task_controller_version = version;
        let mut reader = codec::Reader::new(data);
        while !reader.is_empty() {
            let object = codec::decode_object(&mut reader, version)?;
            trace!("Decoded {} object {}", String::from_utf8_lossy(object.table_id()), object.object_id());
            pool.insert(object)?;
        }
        pool.validate()?;
        Ok(pool)
    }

    fn insert(&mut self, object: DeviceObject) -> Result<(), IsobusError> {
        let id = object.object_id();
        if id == NULL_OBJECT_ID {
            return Err(IsobusError::ReservedObjectId(id));
        }
        if self.index.contains_key(&id) {
            return Err(IsobusError::DuplicateObjectId(id));
        }
        self.index.insert(id, self.objects.len());
        self.objects.push(object);
        Ok(())
    }
}

fn check_designator(object_id: u16, designator: &str) -> Result<(), IsobusError> {
    if designator.len() > MAX_DESIGNATOR_LENGTH {
        return Err(IsobusError::DesignatorTooLong {
            object_id,
            length: designator.len(),
        });
    }
    Ok(())
}
