//! HID class-level requests shared by the boot drivers. Only the handful of
//! requests the boot protocol needs; report descriptors never get fetched
//! because the boot report layout is fixed by the class spec.

use ember_usb::{SetupPacket, DIR_IN, RECIP_INTERFACE, TYPE_CLASS};

pub(crate) const REQ_GET_PROTOCOL: u8 = 0x03;
pub(crate) const REQ_SET_IDLE: u8 = 0x0a;
pub(crate) const REQ_SET_PROTOCOL: u8 = 0x0b;

/// wValue for SET_PROTOCOL selecting the boot report layout.
pub(crate) const PROTOCOL_BOOT: u16 = 0;

/// Interface triple for boot devices: subclass says "boot capable",
/// protocol says which of the two fixed report layouts.
pub(crate) const SUBCLASS_BOOT: u8 = 0x01;
pub(crate) const PROTOCOL_KEYBOARD: u8 = 0x01;
pub(crate) const PROTOCOL_MOUSE: u8 = 0x02;

pub(crate) fn set_protocol(interface: u8, protocol: u16) -> SetupPacket {
    SetupPacket {
        request_type: TYPE_CLASS | RECIP_INTERFACE,
        request: REQ_SET_PROTOCOL,
        value: protocol,
        index: u16::from(interface),
        length: 0,
    }
}

pub(crate) fn get_protocol(interface: u8) -> SetupPacket {
    SetupPacket {
        request_type: DIR_IN | TYPE_CLASS | RECIP_INTERFACE,
        request: REQ_GET_PROTOCOL,
        value: 0,
        index: u16::from(interface),
        length: 1,
    }
}

/// Idle duration is in 4 ms units in the high byte; zero means "only report
/// on change", which is what a poll-driven host wants.
pub(crate) fn set_idle(interface: u8, duration_4ms: u8, report_id: u8) -> SetupPacket {
    SetupPacket {
        request_type: TYPE_CLASS | RECIP_INTERFACE,
        request: REQ_SET_IDLE,
        value: u16::from(duration_4ms) << 8 | u16::from(report_id),
        index: u16::from(interface),
        length: 0,
    }
}
