// crates/isobus-rs-linux/demos/section_control_implement.rs
//! A sprayer rate controller with section control, connecting to whatever
//! Task Controller is on the bus.
//!
//! To run this demo on a virtual CAN bus:
//! 1. sudo modprobe vcan && sudo ip link add dev vcan0 type vcan && sudo ip link set up vcan0
//! 2. Start a Task Controller on vcan0.
//! 3. RUST_LOG=info cargo run -p isobus-rs-linux --example section_control_implement -- vcan0
//!
//! The implement uploads its pool, then logs every section and rate command it
//! receives. Ctrl+C deactivates the pool before exiting.

use isobus_rs::ddop::{DeviceElementType, NULL_OBJECT_ID, ProcessDataProperties as Props, TriggerMethods as Trig};
use isobus_rs::process_data::{SectionState, ddi, pack_condensed_work_state, unpack_condensed_work_state};
use isobus_rs::tc_client::State;
use isobus_rs::{
    DeviceDescriptorObjectPool, FunctionCode, IsobusError, IsobusStack, Name, NameFilter, NetworkConfig,
    PoolBuilder, TaskControllerClient, TaskControllerClientConfig,
};
use isobus_rs_linux::SocketCanInterface;
use log::{error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::{env, thread, time::Duration};

const PREFERRED_ADDRESS: u8 = 0x1C;
const TICK: Duration = Duration::from_millis(10);
const NUMBER_OF_SECTIONS: u16 = 16;
const SECTION_WIDTH_MM: i32 = 2286;

// Element numbers
const DEVICE_ELEMENT: u16 = 0;
const BOOM_ELEMENT: u16 = 1;
const PRODUCT_ELEMENT: u16 = 2;
const FIRST_SECTION_ELEMENT: u16 = 3;

/// What the sprayer hardware would do with the commands.
#[derive(Debug, Default)]
struct Sprayer {
    sections: [bool; NUMBER_OF_SECTIONS as usize],
    target_rate: i32,
    section_control_enabled: bool,
}

fn implement_name() -> Result<Name, IsobusError> {
    let mut name = Name::default();
    name.set_arbitrary_address_capable(true);
    name.set_industry_group(2)?;
    name.set_device_class(6)?;
    name.set_function_code(FunctionCode::RateControl as u8)?;
    name.set_identity_number(0x1234)?;
    name.set_manufacturer_code(1407)?;
    Ok(name)
}

fn sprayer_pool(name: &Name) -> Result<DeviceDescriptorObjectPool, IsobusError> {
    let settable = Props::MEMBER_OF_DEFAULT_SET | Props::SETTABLE;
    let on_change = Trig::ON_CHANGE | Trig::TIME_INTERVAL;
    let localization = [b'e', b'n', 0b0101_0000, 0x00, 0b0101_0101, 0b0101_0101, 0xFF];

    let mut b = PoolBuilder::new();
    b.device("Demo Sprayer", "1.0.0", "0001", "DEMO1", localization, &[], name.full_name())
        .element("Sprayer", DEVICE_ELEMENT, 0, DeviceElementType::Device, 1)
        .process_data("Actual Work State", ddi::ACTUAL_WORK_STATE, NULL_OBJECT_ID, Props::MEMBER_OF_DEFAULT_SET, Trig::ON_CHANGE, 2)
        .children(1, &[2]);

    b.element("Boom", BOOM_ELEMENT, 1, DeviceElementType::Function, 10)
        .property("Offset X", 0, ddi::DEVICE_ELEMENT_OFFSET_X, 500, 11)
        .process_data("Section Control State", ddi::SECTION_CONTROL_STATE, NULL_OBJECT_ID, settable, on_change, 12)
        .process_data("Actual Work State 1-16", ddi::ACTUAL_CONDENSED_WORK_STATE_1_16, NULL_OBJECT_ID, Props::MEMBER_OF_DEFAULT_SET, on_change, 13)
        .process_data("Setpoint Work State 1-16", ddi::SETPOINT_CONDENSED_WORK_STATE_1_16, NULL_OBJECT_ID, settable, Trig::ON_CHANGE, 14)
        .children(10, &[11, 12, 13, 14]);

    b.element("Product", PRODUCT_ELEMENT, 10, DeviceElementType::Bin, 20)
        .process_data("Target Rate", ddi::SETPOINT_VOLUME_PER_AREA_APPLICATION_RATE, 501, settable, Trig::ON_CHANGE, 21)
        .process_data("Actual Rate", ddi::ACTUAL_VOLUME_PER_AREA_APPLICATION_RATE, 501, Props::MEMBER_OF_DEFAULT_SET, on_change, 22)
        .children(20, &[21, 22]);
    b.child(10, 20);

    let total_width = SECTION_WIDTH_MM * i32::from(NUMBER_OF_SECTIONS);
    for i in 0..NUMBER_OF_SECTIONS {
        let object = 100 + i * 4;
        let offset_y = -total_width / 2 + i32::from(i) * SECTION_WIDTH_MM + SECTION_WIDTH_MM / 2;
        b.element(&format!("Section {i}"), FIRST_SECTION_ELEMENT + i, 10, DeviceElementType::Section, object)
            .property("Offset X", -500, ddi::DEVICE_ELEMENT_OFFSET_X, 500, object + 1)
            .property("Offset Y", offset_y, ddi::DEVICE_ELEMENT_OFFSET_Y, 500, object + 2)
            .property("Width", SECTION_WIDTH_MM, ddi::ACTUAL_WORKING_WIDTH, 500, object + 3)
            .children(object, &[object + 1, object + 2, object + 3])
            .child(10, object);
    }

    b.value_presentation("mm", 0, 1.0, 0, 500)
        .value_presentation("L/ha", 0, 0.001, 1, 501);
    b.build()
}

fn build_client(sprayer: &Arc<Mutex<Sprayer>>, stack: &IsobusStack) -> Result<TaskControllerClient, IsobusError> {
    let name = implement_name()?;
    let (internal, partner) = stack.with_network(|network| {
        let internal = network.register_internal_control_function(name, PREFERRED_ADDRESS)?;
        let partner = network.register_partnered_control_function(vec![NameFilter::task_controller()]);
        Ok::<_, IsobusError>((internal, partner))
    })??;

    let mut client = TaskControllerClient::new(partner, internal);
    let config = TaskControllerClientConfig {
        number_of_sections: NUMBER_OF_SECTIONS as u8,
        supports_implement_section_control: true,
        ..TaskControllerClientConfig::default()
    };
    client.configure(sprayer_pool(&name)?, config)?;

    let commands = sprayer.clone();
    client.add_value_command_callback(move |element, ddi, value| {
        let Ok(mut sprayer) = commands.lock() else { return false };
        match ddi {
            ddi::SETPOINT_CONDENSED_WORK_STATE_1_16 => {
                let states = unpack_condensed_work_state(value as u32);
                for (section, state) in sprayer.sections.iter_mut().zip(states) {
                    *section = state == SectionState::On;
                }
                info!("Sections: {:?}", sprayer.sections);
            }
            ddi::SETPOINT_VOLUME_PER_AREA_APPLICATION_RATE => {
                sprayer.target_rate = value;
                info!("Target rate: {:.1} L/ha", f64::from(value) * 0.001);
            }
            ddi::SECTION_CONTROL_STATE => {
                sprayer.section_control_enabled = value == 1;
                info!("Section control {}", if value == 1 { "enabled" } else { "disabled" });
            }
            _ => {
                warn!("Unhandled command for element {} DDI {}: {}", element, ddi, value);
                return false;
            }
        }
        true
    })?;

    let requests = sprayer.clone();
    client.add_request_value_callback(move |_element, ddi| {
        let sprayer = requests.lock().ok()?;
        match ddi {
            ddi::ACTUAL_WORK_STATE => Some(i32::from(sprayer.sections.iter().any(|on| *on))),
            ddi::SECTION_CONTROL_STATE => Some(i32::from(sprayer.section_control_enabled)),
            ddi::ACTUAL_CONDENSED_WORK_STATE_1_16 => {
                let states: Vec<SectionState> = sprayer.sections.iter().map(|on| SectionState::from(*on)).collect();
                pack_condensed_work_state(&states).ok().map(|v| v as i32)
            }
            ddi::ACTUAL_VOLUME_PER_AREA_APPLICATION_RATE => {
                Some(if sprayer.sections.iter().any(|on| *on) { sprayer.target_rate } else { 0 })
            }
            _ => None,
        }
    })?;

    client.initialize(false)?;
    Ok(client)
}

fn run(interface_name: &str) -> Result<(), IsobusError> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || r.store(false, Ordering::SeqCst))
        .map_err(|e| IsobusError::Io(format!("Cannot install Ctrl+C handler: {}", e)))?;

    let stack = IsobusStack::new(NetworkConfig::default());
    let sprayer = Arc::new(Mutex::new(Sprayer::default()));
    let client = stack.add_task_controller_client(build_client(&sprayer, &stack)?)?;

    // Receive on one socket, transmit on another.
    let mut rx_interface = SocketCanInterface::open(interface_name)?;
    let mut tx_interface = SocketCanInterface::open(interface_name)?;
    tx_interface.set_loopback(false)?;

    let frames = stack.frame_sender();
    let rx_running = running.clone();
    let rx_thread = thread::spawn(move || {
        use isobus_rs::CanInterface;
        while rx_running.load(Ordering::Relaxed) {
            match rx_interface.receive_frame() {
                Ok(Some(frame)) => {
                    if frames.push(frame).is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    error!("Receive failed: {}", e);
                    thread::sleep(Duration::from_millis(100));
                }
            }
        }
    });

    info!("Running on {}, press Ctrl+C to stop", interface_name);
    let mut last_state = State::Disconnected;
    while running.load(Ordering::Relaxed) {
        if let Err(e) = stack.update_and_flush(&mut tx_interface) {
            warn!("Tick failed: {}", e);
        }
        let state = stack.with_client(client, |c, _| c.state())?;
        if state != last_state {
            info!("Task controller client: {}", state);
            last_state = state;
        }
        thread::sleep(TICK);
    }

    info!("Shutting down");
    stack.terminate_client(client)?;
    // Let the deactivation go out.
    for _ in 0..10 {
        stack.update_and_flush(&mut tx_interface)?;
        thread::sleep(TICK);
    }
    let _ = rx_thread.join();
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let interface_name = env::args().nth(1).unwrap_or_else(|| "can0".to_string());
    if let Err(e) = run(&interface_name) {
        error!("{}", e);
        std::process::exit(1);
    }
}
