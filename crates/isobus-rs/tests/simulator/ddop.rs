// crates/isobus-rs/tests/simulator/ddop.rs
//! A 36.5 m (120 ft) sprayer with 16 sections and one liquid product, plus a
//! small model of the implement behind it.

use isobus_rs::ddop::{DeviceElementType, NULL_OBJECT_ID, ProcessDataProperties as Props, TriggerMethods as Trig};
use isobus_rs::process_data::{SectionState, ddi, pack_condensed_work_state, unpack_condensed_work_state};
use isobus_rs::{DeviceDescriptorObjectPool, FunctionCode, Name, PoolBuilder, TaskControllerClient};
use std::sync::{Arc, Mutex};

pub const NUMBER_OF_SECTIONS: u16 = 16;
pub const BOOM_WIDTH_MM: i32 = 36_576;
const SECTION_WIDTH_MM: i32 = BOOM_WIDTH_MM / NUMBER_OF_SECTIONS as i32;

/// English, decimal point, 12 hour time, ddmmyyyy, imperial units.
pub const LOCALIZATION: [u8; 7] = [b'e', b'n', 0b0101_0000, 0x00, 0b0101_0101, 0b0101_0101, 0xFF];

// Element numbers
pub const SPRAYER_ELEMENT: u16 = 0;
pub const BOOM_ELEMENT: u16 = 2;
pub const PRODUCT_ELEMENT: u16 = 3;
pub const FIRST_SECTION_ELEMENT: u16 = 4;

// Object IDs
const MAIN_ELEMENT: u16 = 1;
const DEVICE_ACTUAL_WORK_STATE: u16 = 2;
const REQUEST_DEFAULT_PROCESS_DATA: u16 = 3;
const DEVICE_TOTAL_TIME: u16 = 4;
const CONNECTOR: u16 = 5;
const CONNECTOR_X: u16 = 6;
const CONNECTOR_Y: u16 = 7;
const CONNECTOR_TYPE: u16 = 8;
const BOOM: u16 = 9;
const BOOM_X: u16 = 10;
const BOOM_Y: u16 = 11;
const BOOM_Z: u16 = 12;
const ACTUAL_WORKING_WIDTH: u16 = 13;
const SETPOINT_WORK_STATE: u16 = 14;
const AREA_TOTAL: u16 = 15;
const SECTION_CONTROL_STATE: u16 = 16;
const ACTUAL_CONDENSED_WORK_STATE: u16 = 17;
const SETPOINT_CONDENSED_WORK_STATE: u16 = 18;
const PRODUCT: u16 = 19;
const TANK_CAPACITY: u16 = 20;
const TANK_VOLUME: u16 = 21;
const LIFETIME_VOLUME: u16 = 22;
const PRESCRIPTION_CONTROL_STATE: u16 = 23;
const TARGET_RATE: u16 = 24;
const ACTUAL_RATE: u16 = 25;
const CULTURAL_PRACTICE: u16 = 26;
const SECTION: u16 = 100;
const SECTION_X: u16 = 200;
const SECTION_Y: u16 = 300;
const SECTION_WIDTH: u16 = 400;
const SHORT_WIDTH_PRESENTATION: u16 = 500;
const LONG_WIDTH_PRESENTATION: u16 = 501;
const AREA_PRESENTATION: u16 = 502;
const VOLUME_PRESENTATION: u16 = 503;
const TIME_PRESENTATION: u16 = 504;
const VOLUME_PER_AREA_PRESENTATION: u16 = 505;

/// NAME of the sprayer's rate controller.
pub fn sprayer_name(identity_number: u32) -> Name {
    let mut name = Name::default();
    name.set_arbitrary_address_capable(true);
    name.set_industry_group(2).unwrap();
    name.set_device_class(6).unwrap();
    name.set_function_code(FunctionCode::RateControl as u8).unwrap();
    name.set_identity_number(identity_number).unwrap();
    name.set_manufacturer_code(64).unwrap();
    name
}

pub fn sprayer_pool(name: &Name, structure_label: &str) -> DeviceDescriptorObjectPool {
    let on_change = Trig::ON_CHANGE;
    let on_change_or_time = Trig::ON_CHANGE | Trig::TIME_INTERVAL;
    let default_set = Props::MEMBER_OF_DEFAULT_SET;
    let settable = Props::MEMBER_OF_DEFAULT_SET | Props::SETTABLE;

    let mut b = PoolBuilder::new();
    b.device("Isobus UnitTest", "1.0.0", "123", structure_label, LOCALIZATION, &[], name.full_name())
        .element("Sprayer", SPRAYER_ELEMENT, 0, DeviceElementType::Device, MAIN_ELEMENT)
        .process_data("Actual Work State", ddi::ACTUAL_WORK_STATE, NULL_OBJECT_ID, default_set, on_change, DEVICE_ACTUAL_WORK_STATE)
        .process_data("Request Default PD", ddi::REQUEST_DEFAULT_PROCESS_DATA, NULL_OBJECT_ID, Props::NONE, Trig::TOTAL, REQUEST_DEFAULT_PROCESS_DATA)
        .process_data("Total Time", ddi::EFFECTIVE_TOTAL_TIME, TIME_PRESENTATION, settable, Trig::TOTAL, DEVICE_TOTAL_TIME)
        .children(MAIN_ELEMENT, &[DEVICE_ACTUAL_WORK_STATE, REQUEST_DEFAULT_PROCESS_DATA, DEVICE_TOTAL_TIME]);

    b.element("Connector", 1, MAIN_ELEMENT, DeviceElementType::Connector, CONNECTOR)
        .process_data("Connector X", ddi::DEVICE_ELEMENT_OFFSET_X, SHORT_WIDTH_PRESENTATION, Props::SETTABLE, Trig::NONE, CONNECTOR_X)
        .process_data("Connector Y", ddi::DEVICE_ELEMENT_OFFSET_Y, SHORT_WIDTH_PRESENTATION, Props::SETTABLE, Trig::NONE, CONNECTOR_Y)
        .property("Type", 9, ddi::CONNECTOR_TYPE, NULL_OBJECT_ID, CONNECTOR_TYPE)
        .children(CONNECTOR, &[CONNECTOR_X, CONNECTOR_Y, CONNECTOR_TYPE]);

    b.element("Boom", BOOM_ELEMENT, MAIN_ELEMENT, DeviceElementType::Function, BOOM)
        .property("Offset X", 0, ddi::DEVICE_ELEMENT_OFFSET_X, SHORT_WIDTH_PRESENTATION, BOOM_X)
        .property("Offset Y", 0, ddi::DEVICE_ELEMENT_OFFSET_Y, SHORT_WIDTH_PRESENTATION, BOOM_Y)
        .property("Offset Z", 0, ddi::DEVICE_ELEMENT_OFFSET_Z, SHORT_WIDTH_PRESENTATION, BOOM_Z)
        .process_data("Actual Working Width", ddi::ACTUAL_WORKING_WIDTH, LONG_WIDTH_PRESENTATION, default_set, on_change, ACTUAL_WORKING_WIDTH)
        .process_data("Setpoint Work State", ddi::SETPOINT_WORK_STATE, NULL_OBJECT_ID, settable, on_change, SETPOINT_WORK_STATE)
        .process_data("Area Total", ddi::TOTAL_AREA, AREA_PRESENTATION, default_set, Trig::TOTAL, AREA_TOTAL)
        .process_data("Section Control State", ddi::SECTION_CONTROL_STATE, NULL_OBJECT_ID, settable, on_change_or_time, SECTION_CONTROL_STATE)
        .process_data("Actual Work State 1-16", ddi::ACTUAL_CONDENSED_WORK_STATE_1_16, NULL_OBJECT_ID, default_set, on_change, ACTUAL_CONDENSED_WORK_STATE)
        .process_data("Setpoint Work State 1-16", ddi::SETPOINT_CONDENSED_WORK_STATE_1_16, NULL_OBJECT_ID, settable, on_change, SETPOINT_CONDENSED_WORK_STATE)
        .children(
            BOOM,
            &[
                BOOM_X,
                BOOM_Y,
                BOOM_Z,
                ACTUAL_WORKING_WIDTH,
                SETPOINT_WORK_STATE,
                AREA_TOTAL,
                SECTION_CONTROL_STATE,
                ACTUAL_CONDENSED_WORK_STATE,
                SETPOINT_CONDENSED_WORK_STATE,
            ],
        );

    b.element("Product", PRODUCT_ELEMENT, BOOM, DeviceElementType::Bin, PRODUCT)
        .process_data("Tank Capacity", ddi::MAXIMUM_VOLUME_CONTENT, VOLUME_PRESENTATION, default_set, on_change_or_time, TANK_CAPACITY)
        .process_data("Tank Volume", ddi::ACTUAL_VOLUME_CONTENT, VOLUME_PRESENTATION, settable, on_change_or_time, TANK_VOLUME)
        .process_data("Lifetime Total Volume", ddi::LIFETIME_APPLICATION_TOTAL_VOLUME, VOLUME_PRESENTATION, default_set, Trig::TOTAL, LIFETIME_VOLUME)
        .process_data("Rx Control State", ddi::PRESCRIPTION_CONTROL_STATE, NULL_OBJECT_ID, settable, on_change_or_time, PRESCRIPTION_CONTROL_STATE)
        .process_data("Target Rate", ddi::SETPOINT_VOLUME_PER_AREA_APPLICATION_RATE, VOLUME_PER_AREA_PRESENTATION, settable, on_change, TARGET_RATE)
        .process_data("Actual Rate", ddi::ACTUAL_VOLUME_PER_AREA_APPLICATION_RATE, VOLUME_PER_AREA_PRESENTATION, default_set, on_change_or_time, ACTUAL_RATE)
        .property("Operation Type", 3, ddi::ACTUAL_CULTURAL_PRACTICE, NULL_OBJECT_ID, CULTURAL_PRACTICE)
        .children(
            PRODUCT,
            &[TANK_CAPACITY, TANK_VOLUME, LIFETIME_VOLUME, PRESCRIPTION_CONTROL_STATE, CULTURAL_PRACTICE, TARGET_RATE, ACTUAL_RATE],
        );
    b.child(BOOM, PRODUCT);

    for i in 0..NUMBER_OF_SECTIONS {
        let offset_y = -BOOM_WIDTH_MM / 2 + i32::from(i) * SECTION_WIDTH_MM + SECTION_WIDTH_MM / 2;
        b.element(&format!("Section {i}"), FIRST_SECTION_ELEMENT + i, BOOM, DeviceElementType::Section, SECTION + i)
            .property("Offset X", -20, ddi::DEVICE_ELEMENT_OFFSET_X, LONG_WIDTH_PRESENTATION, SECTION_X + i)
            .property("Offset Y", offset_y, ddi::DEVICE_ELEMENT_OFFSET_Y, LONG_WIDTH_PRESENTATION, SECTION_Y + i)
            .property("Width", SECTION_WIDTH_MM, ddi::ACTUAL_WORKING_WIDTH, LONG_WIDTH_PRESENTATION, SECTION_WIDTH + i)
            .children(SECTION + i, &[SECTION_Y + i, SECTION_X + i, SECTION_WIDTH + i])
            .child(BOOM, SECTION + i);
    }

    b.value_presentation("mm", 0, 1.0, 0, SHORT_WIDTH_PRESENTATION)
        .value_presentation("m", 0, 0.001, 0, LONG_WIDTH_PRESENTATION)
        .value_presentation("m^2", 0, 1.0, 0, AREA_PRESENTATION)
        .value_presentation("L", 0, 0.001, 0, VOLUME_PRESENTATION)
        .value_presentation("minutes", 0, 1.0, 1, TIME_PRESENTATION)
        .value_presentation("L/ha", 0, 0.001, 1, VOLUME_PER_AREA_PRESENTATION);

    b.build().unwrap()
}

/// What the implement does with the commands it gets.
#[derive(Debug, Default)]
pub struct SprayerModel {
    pub sections: [bool; NUMBER_OF_SECTIONS as usize],
    pub target_rate: i32,
    pub work_state: bool,
}

impl SprayerModel {
    pub fn actual_rate(&self) -> i32 {
        if self.sections.iter().any(|on| *on) { self.target_rate } else { 0 }
    }

    pub fn value_command(&mut self, _element: u16, ddi: u16, value: i32) -> bool {
        match ddi {
            ddi::SETPOINT_CONDENSED_WORK_STATE_1_16 => {
                let states = unpack_condensed_work_state(value as u32);
                for (section, state) in self.sections.iter_mut().zip(states) {
                    *section = state == SectionState::On;
                }
            }
            ddi::SETPOINT_VOLUME_PER_AREA_APPLICATION_RATE => self.target_rate = value,
            ddi::SETPOINT_WORK_STATE => self.work_state = value == 1,
            _ => return false,
        }
        true
    }

    pub fn request_value(&self, _element: u16, ddi: u16) -> Option<i32> {
        Some(match ddi {
            ddi::MAXIMUM_VOLUME_CONTENT => 4_542_494,
            ddi::ACTUAL_VOLUME_CONTENT => 3_785_000,
            ddi::SECTION_CONTROL_STATE | ddi::PRESCRIPTION_CONTROL_STATE => 1,
            ddi::ACTUAL_CONDENSED_WORK_STATE_1_16 => {
                let states: Vec<SectionState> = self.sections.iter().map(|on| SectionState::from(*on)).collect();
                pack_condensed_work_state(&states).ok()? as i32
            }
            ddi::ACTUAL_VOLUME_PER_AREA_APPLICATION_RATE => self.actual_rate(),
            ddi::ACTUAL_WORK_STATE => i32::from(self.work_state),
            ddi::ACTUAL_WORKING_WIDTH => BOOM_WIDTH_MM,
            _ => return None,
        })
    }

    /// Registers the model's handlers on `client`.
    pub fn install(model: &Arc<Mutex<Self>>, client: &mut TaskControllerClient) {
        let m = model.clone();
        client
            .add_value_command_callback(move |element, ddi, value| m.lock().unwrap().value_command(element, ddi, value))
            .unwrap();
        let m = model.clone();
        client
            .add_request_value_callback(move |element, ddi| m.lock().unwrap().request_value(element, ddi))
            .unwrap();
    }
}
