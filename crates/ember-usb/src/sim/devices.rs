//! Device models for the simulated bus: a hub, two boot HID devices and a
//! raw-descriptor gadget for malformed-device tests. Each model is a cheap
//! clone handle over shared state, so tests keep one clone to script the
//! device after handing another to the controller.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::port::{PortChange, PortStatus};
use crate::proto::{
    SetupPacket, DESC_CONFIGURATION, DESC_DEVICE, DESC_STRING, FEATURE_ENDPOINT_HALT,
    REQ_CLEAR_FEATURE, REQ_GET_CONFIGURATION, REQ_GET_DESCRIPTOR, REQ_GET_STATUS, REQ_SET_ADDRESS,
    REQ_SET_CONFIGURATION, REQ_SET_FEATURE,
};
use crate::sim::{SimDevice, SimPollResult, SimResponse};

const LANG_TABLE: [u8; 4] = [4, 0x03, 0x09, 0x04];

fn string_descriptor(text: &str) -> Vec<u8> {
    let mut bytes = vec![0, 0x03];
    for unit in text.encode_utf16() {
        bytes.extend_from_slice(&unit.to_le_bytes());
    }
    bytes[0] = bytes.len() as u8;
    bytes
}

// ---------------------------------------------------------------- keyboard

const KEYBOARD_DEVICE_DESC: [u8; 18] = [
    0x12, 0x01, 0x10, 0x01, 0x00, 0x00, 0x00, 0x08, 0x09, 0x12, 0x01, 0x24, 0x01, 0x00, 0x01,
    0x02, 0x00, 0x01,
];

const KEYBOARD_CONFIG_DESC: [u8; 34] = [
    // configuration, one interface
    0x09, 0x02, 34, 0x00, 0x01, 0x01, 0x00, 0xa0, 50,
    // interface: HID boot keyboard
    0x09, 0x04, 0x00, 0x00, 0x01, 0x03, 0x01, 0x01, 0x00,
    // HID class descriptor, skipped by the config walker
    0x09, 0x21, 0x11, 0x01, 0x00, 0x01, 0x22, 0x3f, 0x00,
    // interrupt IN endpoint
    0x07, 0x05, 0x81, 0x03, 0x08, 0x00, 0x0a,
];

#[derive(Default)]
struct KeyboardInner {
    address: u8,
    configured: u8,
    protocol: u8,
    idle: u8,
    modifiers: u8,
    pressed: Vec<u8>,
    pending: VecDeque<[u8; 8]>,
    ep_halted: bool,
    stall_next_interrupt: bool,
    fail_controls: u8,
}

impl KeyboardInner {
    /// Boot protocol report: modifiers, reserved, then up to six keycodes.
    /// More than six pressed reports ErrorRollOver in every slot.
    fn report(&self) -> [u8; 8] {
        let mut report = [0u8; 8];
        report[0] = self.modifiers;
        if self.pressed.len() > 6 {
            for slot in &mut report[2..8] {
                *slot = 0x01;
            }
        } else {
            for (i, key) in self.pressed.iter().enumerate() {
                report[2 + i] = *key;
            }
        }
        report
    }
}

/// Boot-protocol keyboard, full speed.
#[derive(Clone, Default)]
pub struct SimHidKeyboard {
    inner: Rc<RefCell<KeyboardInner>>,
}

impl SimHidKeyboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Presses a key by usage code. Modifier usages (0xe0..=0xe7) set the
    /// modifier byte instead of occupying a key slot.
    pub fn press(&self, usage: u8) {
        let mut inner = self.inner.borrow_mut();
        if (0xe0..=0xe7).contains(&usage) {
            inner.modifiers |= 1 << (usage - 0xe0);
        } else if !inner.pressed.contains(&usage) {
            inner.pressed.push(usage);
        }
        let report = inner.report();
        inner.pending.push_back(report);
    }

    pub fn release(&self, usage: u8) {
        let mut inner = self.inner.borrow_mut();
        if (0xe0..=0xe7).contains(&usage) {
            inner.modifiers &= !(1 << (usage - 0xe0));
        } else {
            inner.pressed.retain(|key| *key != usage);
        }
        let report = inner.report();
        inner.pending.push_back(report);
    }

    /// The next `n` control transfers go unanswered.
    pub fn fail_next_controls(&self, n: u8) {
        self.inner.borrow_mut().fail_controls = n;
    }

    /// The next interrupt service stalls and halts the endpoint until the
    /// host clears the halt.
    pub fn stall_next_interrupt(&self) {
        self.inner.borrow_mut().stall_next_interrupt = true;
    }

    pub fn protocol(&self) -> u8 {
        self.inner.borrow().protocol
    }

    pub fn idle(&self) -> u8 {
        self.inner.borrow().idle
    }
}

impl SimDevice for SimHidKeyboard {
    fn address(&self) -> u8 {
        self.inner.borrow().address
    }

    fn bus_reset(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.address = 0;
        inner.configured = 0;
        inner.ep_halted = false;
    }

    fn control(&self, setup: SetupPacket, _out_data: &[u8]) -> SimResponse {
        let mut inner = self.inner.borrow_mut();
        if inner.fail_controls > 0 {
            inner.fail_controls -= 1;
            return SimResponse::NoResponse;
        }
        match (setup.request_type, setup.request) {
            (0x80, REQ_GET_DESCRIPTOR) => match (setup.value >> 8) as u8 {
                DESC_DEVICE => SimResponse::Ack(KEYBOARD_DEVICE_DESC.to_vec()),
                DESC_CONFIGURATION => SimResponse::Ack(KEYBOARD_CONFIG_DESC.to_vec()),
                DESC_STRING => match setup.value as u8 {
                    0 => SimResponse::Ack(LANG_TABLE.to_vec()),
                    1 => SimResponse::Ack(string_descriptor("Acme Peripherals")),
                    2 => SimResponse::Ack(string_descriptor("Boot Keyboard")),
                    _ => SimResponse::Stall,
                },
                _ => SimResponse::Stall,
            },
            (0x00, REQ_SET_ADDRESS) => {
                inner.address = setup.value as u8;
                SimResponse::Ack(Vec::new())
            }
            (0x00, REQ_SET_CONFIGURATION) => {
                inner.configured = setup.value as u8;
                SimResponse::Ack(Vec::new())
            }
            (0x80, REQ_GET_CONFIGURATION) => SimResponse::Ack(vec![inner.configured]),
            (0x02, REQ_CLEAR_FEATURE) if setup.value == FEATURE_ENDPOINT_HALT => {
                inner.ep_halted = false;
                SimResponse::Ack(Vec::new())
            }
            // HID class requests.
            (0x21, 0x0a) => {
                inner.idle = (setup.value >> 8) as u8;
                SimResponse::Ack(Vec::new())
            }
            (0x21, 0x0b) => {
                inner.protocol = setup.value as u8;
                SimResponse::Ack(Vec::new())
            }
            (0xa1, 0x03) => SimResponse::Ack(vec![inner.protocol]),
            (0xa1, 0x01) => SimResponse::Ack(inner.report().to_vec()),
            _ => SimResponse::Stall,
        }
    }

    fn interrupt_in(&self, endpoint: u8, _max_len: usize) -> SimPollResult {
        let mut inner = self.inner.borrow_mut();
        if endpoint != 0x81 {
            return SimPollResult::Stall;
        }
        if inner.stall_next_interrupt {
            inner.stall_next_interrupt = false;
            inner.ep_halted = true;
            return SimPollResult::Stall;
        }
        if inner.ep_halted {
            return SimPollResult::Stall;
        }
        match inner.pending.pop_front() {
            Some(report) => SimPollResult::Data(report.to_vec()),
            None => SimPollResult::Nak,
        }
    }

    fn find_by_address(&self, address: u8) -> Option<Box<dyn SimDevice>> {
        (self.address() == address).then(|| Box::new(self.clone()) as Box<dyn SimDevice>)
    }
}

// ------------------------------------------------------------------- mouse

const MOUSE_DEVICE_DESC: [u8; 18] = [
    0x12, 0x01, 0x10, 0x01, 0x00, 0x00, 0x00, 0x08, 0x09, 0x12, 0x02, 0x24, 0x01, 0x00, 0x01,
    0x02, 0x00, 0x01,
];

const MOUSE_CONFIG_DESC: [u8; 34] = [
    0x09, 0x02, 34, 0x00, 0x01, 0x01, 0x00, 0xa0, 50,
    // interface: HID boot mouse
    0x09, 0x04, 0x00, 0x00, 0x01, 0x03, 0x01, 0x02, 0x00,
    0x09, 0x21, 0x11, 0x01, 0x00, 0x01, 0x22, 0x34, 0x00,
    0x07, 0x05, 0x81, 0x03, 0x04, 0x00, 0x0a,
];

#[derive(Default)]
struct MouseInner {
    address: u8,
    configured: u8,
    protocol: u8,
    idle: u8,
    pending: VecDeque<[u8; 3]>,
    fail_controls: u8,
}

/// Boot-protocol mouse, low speed like most of the breed.
#[derive(Clone, Default)]
pub struct SimHidMouse {
    inner: Rc<RefCell<MouseInner>>,
}

impl SimHidMouse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn motion(&self, buttons: u8, dx: i8, dy: i8) {
        self.inner
            .borrow_mut()
            .pending
            .push_back([buttons, dx as u8, dy as u8]);
    }

    pub fn fail_next_controls(&self, n: u8) {
        self.inner.borrow_mut().fail_controls = n;
    }

    pub fn protocol(&self) -> u8 {
        self.inner.borrow().protocol
    }
}

impl SimDevice for SimHidMouse {
    fn address(&self) -> u8 {
        self.inner.borrow().address
    }

    fn low_speed(&self) -> bool {
        true
    }

    fn bus_reset(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.address = 0;
        inner.configured = 0;
    }

    fn control(&self, setup: SetupPacket, _out_data: &[u8]) -> SimResponse {
        let mut inner = self.inner.borrow_mut();
        if inner.fail_controls > 0 {
            inner.fail_controls -= 1;
            return SimResponse::NoResponse;
        }
        match (setup.request_type, setup.request) {
            (0x80, REQ_GET_DESCRIPTOR) => match (setup.value >> 8) as u8 {
                DESC_DEVICE => SimResponse::Ack(MOUSE_DEVICE_DESC.to_vec()),
                DESC_CONFIGURATION => SimResponse::Ack(MOUSE_CONFIG_DESC.to_vec()),
                DESC_STRING => match setup.value as u8 {
                    0 => SimResponse::Ack(LANG_TABLE.to_vec()),
                    1 => SimResponse::Ack(string_descriptor("Acme Peripherals")),
                    2 => SimResponse::Ack(string_descriptor("Boot Mouse")),
                    _ => SimResponse::Stall,
                },
                _ => SimResponse::Stall,
            },
            (0x00, REQ_SET_ADDRESS) => {
                inner.address = setup.value as u8;
                SimResponse::Ack(Vec::new())
            }
            (0x00, REQ_SET_CONFIGURATION) => {
                inner.configured = setup.value as u8;
                SimResponse::Ack(Vec::new())
            }
            (0x80, REQ_GET_CONFIGURATION) => SimResponse::Ack(vec![inner.configured]),
            (0x21, 0x0a) => {
                inner.idle = (setup.value >> 8) as u8;
                SimResponse::Ack(Vec::new())
            }
            (0x21, 0x0b) => {
                inner.protocol = setup.value as u8;
                SimResponse::Ack(Vec::new())
            }
            (0xa1, 0x03) => SimResponse::Ack(vec![inner.protocol]),
            (0xa1, 0x01) => SimResponse::Ack(vec![0, 0, 0]),
            _ => SimResponse::Stall,
        }
    }

    fn interrupt_in(&self, endpoint: u8, _max_len: usize) -> SimPollResult {
        if endpoint != 0x81 {
            return SimPollResult::Stall;
        }
        match self.inner.borrow_mut().pending.pop_front() {
            Some(report) => SimPollResult::Data(report.to_vec()),
            None => SimPollResult::Nak,
        }
    }

    fn find_by_address(&self, address: u8) -> Option<Box<dyn SimDevice>> {
        (self.address() == address).then(|| Box::new(self.clone()) as Box<dyn SimDevice>)
    }
}

// --------------------------------------------------------------------- hub

const HUB_DEVICE_DESC: [u8; 18] = [
    0x12, 0x01, 0x10, 0x01, 0x09, 0x00, 0x00, 0x08, 0x09, 0x12, 0x00, 0x24, 0x01, 0x00, 0x00,
    0x01, 0x00, 0x01,
];

const HUB_CONFIG_DESC: [u8; 25] = [
    0x09, 0x02, 25, 0x00, 0x01, 0x01, 0x00, 0xe0, 0x32,
    // interface: hub class
    0x09, 0x04, 0x00, 0x00, 0x01, 0x09, 0x00, 0x00, 0x00,
    // status-change interrupt IN endpoint
    0x07, 0x05, 0x81, 0x03, 0x01, 0x00, 0xff,
];

/// Power-good time advertised in the hub descriptor, in 2 ms units.
const HUB_POWER_GOOD_2MS: u8 = 10;

/// How long a modelled port holds reset signalling before completing.
const HUB_PORT_RESET_MS: u64 = 50;

struct SimHubPort {
    device: Option<Box<dyn SimDevice>>,
    status: PortStatus,
    change: PortChange,
    reset_left_ms: Option<u64>,
}

struct HubInner {
    address: u8,
    configured: u8,
    ports: Vec<SimHubPort>,
    ep_halted: bool,
    stall_next_interrupt: bool,
    fail_controls: u8,
}

/// A hub with a scripted number of downstream ports. Port resets complete
/// [`HUB_PORT_RESET_MS`] of model time after they start.
#[derive(Clone)]
pub struct SimHub {
    inner: Rc<RefCell<HubInner>>,
}

impl SimHub {
    pub fn new(ports: u8) -> Self {
        let ports = (0..ports)
            .map(|_| SimHubPort {
                device: None,
                status: PortStatus::empty(),
                change: PortChange::empty(),
                reset_left_ms: None,
            })
            .collect();
        Self {
            inner: Rc::new(RefCell::new(HubInner {
                address: 0,
                configured: 0,
                ports,
                ep_halted: false,
                stall_next_interrupt: false,
                fail_controls: 0,
            })),
        }
    }

    pub fn attach(&self, port: u8, device: Box<dyn SimDevice>) {
        let low_speed = device.low_speed();
        let mut inner = self.inner.borrow_mut();
        let port = &mut inner.ports[port as usize];
        port.device = Some(device);
        port.status.insert(PortStatus::CONNECTION);
        port.status.set(PortStatus::LOW_SPEED, low_speed);
        port.status.remove(PortStatus::ENABLE);
        port.change.insert(PortChange::CONNECTION);
    }

    pub fn detach(&self, port: u8) {
        let mut inner = self.inner.borrow_mut();
        let port = &mut inner.ports[port as usize];
        port.device = None;
        port.status
            .remove(PortStatus::CONNECTION | PortStatus::ENABLE | PortStatus::LOW_SPEED);
        port.change.insert(PortChange::CONNECTION);
    }

    pub fn fail_next_controls(&self, n: u8) {
        self.inner.borrow_mut().fail_controls = n;
    }

    pub fn stall_next_interrupt(&self) {
        self.inner.borrow_mut().stall_next_interrupt = true;
    }

    pub fn port_powered(&self, port: u8) -> bool {
        self.inner.borrow().ports[port as usize]
            .status
            .contains(PortStatus::POWER)
    }
}

impl SimDevice for SimHub {
    fn address(&self) -> u8 {
        self.inner.borrow().address
    }

    fn bus_reset(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.address = 0;
        inner.configured = 0;
        inner.ep_halted = false;
    }

    fn tick_ms(&self, ms: u64) {
        let mut inner = self.inner.borrow_mut();
        for port in &mut inner.ports {
            if let Some(left) = port.reset_left_ms {
                if left <= ms {
                    port.reset_left_ms = None;
                    port.status.remove(PortStatus::RESET);
                    if port.status.contains(PortStatus::CONNECTION) {
                        port.status.insert(PortStatus::ENABLE);
                    }
                    port.change.insert(PortChange::RESET);
                } else {
                    port.reset_left_ms = Some(left - ms);
                }
            }
            if let Some(device) = &port.device {
                device.tick_ms(ms);
            }
        }
    }

    fn control(&self, setup: SetupPacket, _out_data: &[u8]) -> SimResponse {
        let mut inner = self.inner.borrow_mut();
        if inner.fail_controls > 0 {
            inner.fail_controls -= 1;
            return SimResponse::NoResponse;
        }
        match (setup.request_type, setup.request) {
            (0x80, REQ_GET_DESCRIPTOR) => match (setup.value >> 8) as u8 {
                DESC_DEVICE => SimResponse::Ack(HUB_DEVICE_DESC.to_vec()),
                DESC_CONFIGURATION => SimResponse::Ack(HUB_CONFIG_DESC.to_vec()),
                DESC_STRING => match setup.value as u8 {
                    0 => SimResponse::Ack(LANG_TABLE.to_vec()),
                    1 => SimResponse::Ack(string_descriptor("Generic Hub")),
                    _ => SimResponse::Stall,
                },
                _ => SimResponse::Stall,
            },
            (0x00, REQ_SET_ADDRESS) => {
                inner.address = setup.value as u8;
                SimResponse::Ack(Vec::new())
            }
            (0x00, REQ_SET_CONFIGURATION) => {
                inner.configured = setup.value as u8;
                SimResponse::Ack(Vec::new())
            }
            (0x80, REQ_GET_CONFIGURATION) => SimResponse::Ack(vec![inner.configured]),
            (0x02, REQ_CLEAR_FEATURE) if setup.value == FEATURE_ENDPOINT_HALT => {
                inner.ep_halted = false;
                SimResponse::Ack(Vec::new())
            }
            // Hub class: descriptor, hub status, port status and features.
            (0xa0, REQ_GET_DESCRIPTOR) if (setup.value >> 8) as u8 == 0x29 => {
                let ports = inner.ports.len() as u8;
                SimResponse::Ack(vec![
                    9,
                    0x29,
                    ports,
                    0x09,
                    0x00,
                    HUB_POWER_GOOD_2MS,
                    0x32,
                    0x00,
                    0xff,
                ])
            }
            (0xa0, REQ_GET_STATUS) => SimResponse::Ack(vec![0, 0, 0, 0]),
            (0xa3, REQ_GET_STATUS) => {
                let Some(port) = (setup.index as usize)
                    .checked_sub(1)
                    .and_then(|i| inner.ports.get(i))
                else {
                    return SimResponse::Stall;
                };
                let status = port.status.bits().to_le_bytes();
                let change = port.change.bits().to_le_bytes();
                SimResponse::Ack(vec![status[0], status[1], change[0], change[1]])
            }
            (0x23, REQ_SET_FEATURE) => {
                let Some(port) = (setup.index as usize)
                    .checked_sub(1)
                    .and_then(|i| inner.ports.get_mut(i))
                else {
                    return SimResponse::Stall;
                };
                match setup.value {
                    4 => {
                        if port.status.contains(PortStatus::CONNECTION) {
                            port.status.insert(PortStatus::RESET);
                            port.status.remove(PortStatus::ENABLE);
                            port.reset_left_ms = Some(HUB_PORT_RESET_MS);
                            if let Some(device) = &port.device {
                                device.bus_reset();
                            }
                        }
                    }
                    8 => {
                        port.status.insert(PortStatus::POWER);
                    }
                    2 => {
                        port.status.insert(PortStatus::SUSPEND);
                    }
                    _ => {}
                }
                SimResponse::Ack(Vec::new())
            }
            (0x23, REQ_CLEAR_FEATURE) => {
                let Some(port) = (setup.index as usize)
                    .checked_sub(1)
                    .and_then(|i| inner.ports.get_mut(i))
                else {
                    return SimResponse::Stall;
                };
                match setup.value {
                    1 => port.status.remove(PortStatus::ENABLE),
                    2 => port.status.remove(PortStatus::SUSPEND),
                    8 => port.status.remove(PortStatus::POWER),
                    16 => port.change.remove(PortChange::CONNECTION),
                    17 => port.change.remove(PortChange::ENABLE),
                    18 => port.change.remove(PortChange::SUSPEND),
                    19 => port.change.remove(PortChange::OVER_CURRENT),
                    20 => port.change.remove(PortChange::RESET),
                    _ => {}
                }
                SimResponse::Ack(Vec::new())
            }
            _ => SimResponse::Stall,
        }
    }

    fn interrupt_in(&self, endpoint: u8, max_len: usize) -> SimPollResult {
        let mut inner = self.inner.borrow_mut();
        if endpoint != 0x81 {
            return SimPollResult::Stall;
        }
        if inner.stall_next_interrupt {
            inner.stall_next_interrupt = false;
            inner.ep_halted = true;
            return SimPollResult::Stall;
        }
        if inner.ep_halted {
            return SimPollResult::Stall;
        }
        // Bit zero is the hub itself; port N reports on bit N.
        let mut bitmap = vec![0u8; max_len.max(1)];
        let mut any = false;
        for (i, port) in inner.ports.iter().enumerate() {
            if port.change.is_empty() {
                continue;
            }
            let bit = i + 1;
            if bit / 8 < bitmap.len() {
                bitmap[bit / 8] |= 1 << (bit % 8);
                any = true;
            }
        }
        if any {
            SimPollResult::Data(bitmap)
        } else {
            SimPollResult::Nak
        }
    }

    fn find_by_address(&self, address: u8) -> Option<Box<dyn SimDevice>> {
        if self.address() == address {
            return Some(Box::new(self.clone()));
        }
        let inner = self.inner.borrow();
        for port in &inner.ports {
            if !port.status.contains(PortStatus::ENABLE) {
                continue;
            }
            if let Some(device) = &port.device {
                if let Some(found) = device.find_by_address(address) {
                    return Some(found);
                }
            }
        }
        None
    }
}

// ------------------------------------------------------------------ gadget

#[derive(Default)]
struct GadgetInner {
    address: u8,
    configured: u8,
    device_desc: Vec<u8>,
    config_desc: Vec<u8>,
    fail_controls: u8,
}

/// A device that serves whatever descriptor bytes a test hands it. The tool
/// for malformed-descriptor and partial-enumeration scenarios.
#[derive(Clone, Default)]
pub struct SimGadget {
    inner: Rc<RefCell<GadgetInner>>,
}

impl SimGadget {
    pub fn new(device_desc: Vec<u8>, config_desc: Vec<u8>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(GadgetInner {
                device_desc,
                config_desc,
                ..GadgetInner::default()
            })),
        }
    }

    pub fn fail_next_controls(&self, n: u8) {
        self.inner.borrow_mut().fail_controls = n;
    }

    pub fn configured_value(&self) -> u8 {
        self.inner.borrow().configured
    }
}

impl SimDevice for SimGadget {
    fn address(&self) -> u8 {
        self.inner.borrow().address
    }

    fn bus_reset(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.address = 0;
        inner.configured = 0;
    }

    fn control(&self, setup: SetupPacket, _out_data: &[u8]) -> SimResponse {
        let mut inner = self.inner.borrow_mut();
        if inner.fail_controls > 0 {
            inner.fail_controls -= 1;
            return SimResponse::NoResponse;
        }
        match (setup.request_type, setup.request) {
            (0x80, REQ_GET_DESCRIPTOR) => match (setup.value >> 8) as u8 {
                DESC_DEVICE => SimResponse::Ack(inner.device_desc.clone()),
                DESC_CONFIGURATION => SimResponse::Ack(inner.config_desc.clone()),
                _ => SimResponse::Stall,
            },
            (0x00, REQ_SET_ADDRESS) => {
                inner.address = setup.value as u8;
                SimResponse::Ack(Vec::new())
            }
            (0x00, REQ_SET_CONFIGURATION) => {
                inner.configured = setup.value as u8;
                SimResponse::Ack(Vec::new())
            }
            _ => SimResponse::Stall,
        }
    }

    fn interrupt_in(&self, _endpoint: u8, _max_len: usize) -> SimPollResult {
        SimPollResult::Nak
    }

    fn find_by_address(&self, address: u8) -> Option<Box<dyn SimDevice>> {
        (self.address() == address).then(|| Box::new(self.clone()) as Box<dyn SimDevice>)
    }
}
