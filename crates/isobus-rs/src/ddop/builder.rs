// crates/isobus-rs/src/ddop/builder.rs
use super::{
    DeviceDescriptorObjectPool, DeviceElementType, LABEL_LENGTH, ProcessDataProperties,
    TriggerMethods,
};
use crate::hal::IsobusError;
use alloc::vec::Vec;
use log::error;

/// Builds a pool while recording every failed step.
///
/// Every call is attempted even after an earlier one failed, so `build`
/// reports all problems of a pool definition at once.
///
/// ```
/// use isobus_rs::ddop::{DeviceElementType, PoolBuilder, NULL_OBJECT_ID, ProcessDataProperties, TriggerMethods};
///
/// let mut builder = PoolBuilder::new();
/// builder
///     .device("Sprayer", "1.0", "1", "SPR1", *b"en\x50\x00\x55\x55\xff", &[], 0)
///     .element("Sprayer", 0, 0, DeviceElementType::Device, 1)
///     .process_data("Work State", 141, NULL_OBJECT_ID, ProcessDataProperties::NONE, TriggerMethods::ON_CHANGE, 2)
///     .child(1, 2);
/// let pool = builder.build().unwrap();
/// assert_eq!(pool.size(), 3);
/// ```
#[derive(Debug, Default)]
pub struct PoolBuilder {
    pool: DeviceDescriptorObjectPool,
    errors: Vec<IsobusError>,
}

impl PoolBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continues building on an existing pool.
    pub fn from_pool(pool: DeviceDescriptorObjectPool) -> Self {
        Self {
            pool,
            errors: Vec::new(),
        }
    }

    fn record(&mut self, result: Result<(), IsobusError>) -> &mut Self {
        if let Err(e) = result {
            self.errors.push(e);
        }
        self
    }

    #[allow(clippy::too_many_arguments)]
    pub fn device(
        &mut self,
        designator: &str,
        software_version: &str,
        serial_number: &str,
        structure_label: &str,
        localization_label: [u8; LABEL_LENGTH],
        extended_structure_label: &[u8],
        name: u64,
    ) -> &mut Self {
        let result = self.pool.add_device(
            designator,
            software_version,
            serial_number,
            structure_label,
            localization_label,
            extended_structure_label,
            name,
        );
        self.record(result)
    }

    pub fn element(
        &mut self,
        designator: &str,
        element_number: u16,
        parent_object_id: u16,
        element_type: DeviceElementType,
        object_id: u16,
    ) -> &mut Self {
        let result = self
            .pool
            .add_device_element(designator, element_number, parent_object_id, element_type, object_id);
        self.record(result)
    }

    pub fn process_data(
        &mut self,
        designator: &str,
        ddi: u16,
        presentation_object_id: u16,
        properties: ProcessDataProperties,
        trigger_methods: TriggerMethods,
        object_id: u16,
    ) -> &mut Self {
        let result = self.pool.add_device_process_data(
            designator,
            ddi,
            presentation_object_id,
            properties,
            trigger_methods,
            object_id,
        );
        self.record(result)
    }

    pub fn property(
        &mut self,
        designator: &str,
        value: i32,
        ddi: u16,
        presentation_object_id: u16,
        object_id: u16,
    ) -> &mut Self {
        let result = self
            .pool
            .add_device_property(designator, value, ddi, presentation_object_id, object_id);
        self.record(result)
    }

    pub fn value_presentation(
        &mut self,
        designator: &str,
        offset: i32,
        scale: f32,
        decimal_digits: u8,
        object_id: u16,
    ) -> &mut Self {
        let result = self
            .pool
            .add_device_value_presentation(designator, offset, scale, decimal_digits, object_id);
        self.record(result)
    }

    pub fn child(&mut self, parent_object_id: u16, child_object_id: u16) -> &mut Self {
        let result = self.pool.add_reference_to_child_object(parent_object_id, child_object_id);
        self.record(result)
    }

    pub fn children(&mut self, parent_object_id: u16, child_object_ids: &[u16]) -> &mut Self {
        for &child in child_object_ids {
            self.child(parent_object_id, child);
        }
        self
    }

    /// Returns the pool, or every error recorded while building and validating it.
    pub fn build(mut self) -> Result<DeviceDescriptorObjectPool, IsobusError> {
        self.pool.collect_errors(&mut self.errors);
        if self.errors.is_empty() {
            return Ok(self.pool);
        }
        for e in &self.errors {
            error!("Object pool definition error: {}", e);
        }
        Err(IsobusError::PoolBuildFailed(self.errors))
    }
}
