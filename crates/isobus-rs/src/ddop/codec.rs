// crates/isobus-rs/src/ddop/codec.rs
//! Binary object encoding (Reference: ISO 11783-10, Annex B.6 to B.10).
//!
//! All multi-byte fields are little-endian. Strings are prefixed by a one-byte length.

use super::object::{
    DEVICE_OBJECT_ID, Device, DeviceElement, DeviceElementType, DeviceObject, DeviceProcessData,
    DeviceProperty, DeviceValuePresentation, LABEL_LENGTH, LEGACY_DESIGNATOR_LENGTH,
    ProcessDataProperties, TriggerMethods,
};
use crate::hal::IsobusError;
use alloc::string::String;
use alloc::vec::Vec;
use log::warn;

/// First Task Controller version that accepts long designators and extended structure labels.
pub const VERSION_4: u8 = 4;

/// Cursor over binary pool data.
pub(super) struct Reader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> Reader<'a> {
    pub(super) fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    pub(super) fn is_empty(&self) -> bool {
        self.position >= self.data.len()
    }

    fn bytes(&mut self, count: usize) -> Result<&'a [u8], IsobusError> {
        let end = self
            .position
            .checked_add(count)
            .filter(|end| *end <= self.data.len())
            .ok_or(IsobusError::TruncatedPoolData)?;
        let slice = &self.data[self.position..end];
        self.position = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, IsobusError> {
        Ok(self.bytes(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, IsobusError> {
        let b = self.bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn i32(&mut self) -> Result<i32, IsobusError> {
        let b = self.bytes(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn f32(&mut self) -> Result<f32, IsobusError> {
        let b = self.bytes(4)?;
        Ok(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn label(&mut self) -> Result<[u8; LABEL_LENGTH], IsobusError> {
        let mut label = [0u8; LABEL_LENGTH];
        label.copy_from_slice(self.bytes(LABEL_LENGTH)?);
        Ok(label)
    }

    fn string(&mut self) -> Result<String, IsobusError> {
        let length = usize::from(self.u8()?);
        Ok(String::from_utf8_lossy(self.bytes(length)?).into_owned())
    }
}

/// Returns the longest prefix of `text` that fits the designator limit of `version`.
fn limit_designator<'t>(text: &'t str, object_id: u16, version: u8) -> &'t str {
    if version >= VERSION_4 || text.len() <= LEGACY_DESIGNATOR_LENGTH {
        return text;
    }
    let mut end = LEGACY_DESIGNATOR_LENGTH;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    warn!(
        "Designator of object {} truncated to {} bytes for a version {} Task Controller",
        object_id, end, version
    );
    &text[..end]
}

fn put_string(out: &mut Vec<u8>, text: &str) {
    out.push(text.len() as u8);
    out.extend_from_slice(text.as_bytes());
}

/// Appends the binary record of `object` as understood by a TC of `version`.
pub(super) fn encode_object(object: &DeviceObject, version: u8, out: &mut Vec<u8>) {
    let id = object.object_id();
    out.extend_from_slice(object.table_id());
    out.extend_from_slice(&id.to_le_bytes());
    put_string(out, limit_designator(object.designator(), id, version));
    match object {
        DeviceObject::Device(device) => {
            put_string(out, limit_designator(&device.software_version, id, version));
            out.extend_from_slice(&device.name.to_le_bytes());
            put_string(out, limit_designator(&device.serial_number, id, version));
            out.extend_from_slice(&device.structure_label);
            out.extend_from_slice(&device.localization_label);
            if version >= VERSION_4 {
                out.push(device.extended_structure_label.len() as u8);
                out.extend_from_slice(&device.extended_structure_label);
            }
        }
        DeviceObject::Element(element) => {
            out.push(element.element_type as u8);
            out.extend_from_slice(&element.element_number.to_le_bytes());
            out.extend_from_slice(&element.parent_object_id.to_le_bytes());
            out.extend_from_slice(&(element.children().len() as u16).to_le_bytes());
            for child in element.children() {
                out.extend_from_slice(&child.to_le_bytes());
            }
        }
        DeviceObject::ProcessData(pd) => {
            out.extend_from_slice(&pd.ddi.to_le_bytes());
            out.push(pd.properties.0);
            out.push(pd.trigger_methods.0);
            out.extend_from_slice(&pd.presentation_object_id.to_le_bytes());
        }
        DeviceObject::Property(property) => {
            out.extend_from_slice(&property.ddi.to_le_bytes());
            out.extend_from_slice(&property.value.to_le_bytes());
            out.extend_from_slice(&property.presentation_object_id.to_le_bytes());
        }
        DeviceObject::ValuePresentation(vp) => {
            out.extend_from_slice(&vp.offset.to_le_bytes());
            out.extend_from_slice(&vp.scale.to_le_bytes());
            out.push(vp.decimal_digits);
        }
    }
}

/// Decodes the next record. Field order mirrors `encode_object`.
pub(super) fn decode_object(reader: &mut Reader<'_>, version: u8) -> Result<DeviceObject, IsobusError> {
    let tag = reader.bytes(3)?;
    let tag = [tag[0], tag[1], tag[2]];
    let object_id = reader.u16()?;
    let designator = reader.string()?;
    let object = match &tag {
        b"DVC" => {
            if object_id != DEVICE_OBJECT_ID {
                return Err(IsobusError::InvalidObject {
                    object_id,
                    reason: "device object must have ID 0",
                });
            }
            let software_version = reader.string()?;
            let name = {
                let b = reader.bytes(8)?;
                u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
            };
            let serial_number = reader.string()?;
            let structure_label = reader.label()?;
            let localization_label = reader.label()?;
            let extended_structure_label = if version >= VERSION_4 {
                let length = usize::from(reader.u8()?);
                reader.bytes(length)?.to_vec()
            } else {
                Vec::new()
            };
            DeviceObject::Device(Device {
                designator,
                software_version,
                serial_number,
                structure_label,
                localization_label,
                extended_structure_label,
                name,
            })
        }
        b"DET" => {
            let element_type = DeviceElementType::try_from(reader.u8()?).map_err(|_| {
                IsobusError::InvalidObject { object_id, reason: "unknown element type" }
            })?;
            let element_number = reader.u16()?;
            let parent_object_id = reader.u16()?;
            let child_count = reader.u16()?;
            let mut element = DeviceElement::new(object_id, designator, element_type, element_number, parent_object_id);
            for _ in 0..child_count {
                element.add_reference_to_child_object(reader.u16()?);
            }
            DeviceObject::Element(element)
        }
        b"DPD" => DeviceObject::ProcessData(DeviceProcessData {
            object_id,
            designator,
            ddi: reader.u16()?,
            properties: ProcessDataProperties(reader.u8()?),
            trigger_methods: TriggerMethods(reader.u8()?),
            presentation_object_id: reader.u16()?,
        }),
        b"DPT" => DeviceObject::Property(DeviceProperty {
            object_id,
            designator,
            ddi: reader.u16()?,
            value: reader.i32()?,
            presentation_object_id: reader.u16()?,
        }),
        b"DVP" => DeviceObject::ValuePresentation(DeviceValuePresentation {
            object_id,
            designator,
            offset: reader.i32()?,
            scale: reader.f32()?,
            decimal_digits: reader.u8()?,
        }),
        _ => return Err(IsobusError::UnknownObjectTag(tag)),
    };
    Ok(object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;
    use alloc::vec;

    #[test]
    fn test_process_data_record_layout() {
        let object = DeviceObject::ProcessData(DeviceProcessData {
            object_id: 0x0102,
            designator: "Rate".to_string(),
            ddi: 0x0001,
            properties: ProcessDataProperties::SETTABLE,
            trigger_methods: TriggerMethods::ON_CHANGE,
            presentation_object_id: 0xFFFF,
        });
        let mut out = Vec::new();
        encode_object(&object, VERSION_4, &mut out);
        assert_eq!(
            out,
            vec![b'D', b'P', b'D', 0x02, 0x01, 4, b'R', b'a', b't', b'e', 0x01, 0x00, 0x02, 0x08, 0xFF, 0xFF]
        );
    }

    #[test]
    fn test_legacy_designator_truncation() {
        let long = "Section number one of the left wing boom";
        let object = DeviceObject::Element(DeviceElement::new(5, long.to_string(), DeviceElementType::Section, 3, 0));
        let mut out = Vec::new();
        encode_object(&object, 3, &mut out);
        assert_eq!(out[5] as usize, LEGACY_DESIGNATOR_LENGTH);

        let mut reader = Reader::new(&out);
        let decoded = decode_object(&mut reader, 3).unwrap();
        assert_eq!(decoded.designator(), &long[..LEGACY_DESIGNATOR_LENGTH]);
        assert!(reader.is_empty());
    }

    #[test]
    fn test_extended_label_depends_on_version() {
        let device = DeviceObject::Device(Device {
            designator: "Sprayer".to_string(),
            software_version: "1.0".to_string(),
            serial_number: "42".to_string(),
            structure_label: *b"SPRAY01",
            localization_label: [b'e', b'n', 0x50, 0x00, 0x55, 0x55, 0xFF],
            extended_structure_label: vec![1, 2, 3],
            name: 0xA00C_8100_0000_0002,
        });
        let mut v3 = Vec::new();
        encode_object(&device, 3, &mut v3);
        let mut v4 = Vec::new();
        encode_object(&device, VERSION_4, &mut v4);
        assert_eq!(v4.len(), v3.len() + 4);

        let decoded = decode_object(&mut Reader::new(&v4), VERSION_4).unwrap();
        assert_eq!(decoded, device);
    }

    #[test]
    fn test_truncated_record_is_rejected() {
        let object = DeviceObject::Property(DeviceProperty {
            object_id: 7,
            designator: "Width".to_string(),
            ddi: 67,
            value: 2134,
            presentation_object_id: 0xFFFF,
        });
        let mut out = Vec::new();
        encode_object(&object, VERSION_4, &mut out);
        for cut in 0..out.len() {
            let result = decode_object(&mut Reader::new(&out[..cut]), VERSION_4);
            assert_eq!(result, Err(IsobusError::TruncatedPoolData), "cut at {cut}");
        }
    }

    #[test]
    fn test_unknown_tag() {
        let data = [b'X', b'Y', b'Z', 0, 0, 0];
        assert_eq!(
            decode_object(&mut Reader::new(&data), VERSION_4),
            Err(IsobusError::UnknownObjectTag(*b"XYZ"))
        );
    }
}
