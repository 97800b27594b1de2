//! Devices whose configuration descriptors do not add up: missing interface
//! records, the zero-interface degenerate case and configurations that fail
//! to parse at all. Losing a later interface is survivable; a device that
//! cannot produce its first one never joins the tree.

use ember_platform::{DevicePath, ManualClock, RecordingSink, ReportCode};
use ember_usb::sim::{SimGadget, SimHostController};
use ember_usb::{BusConfig, DriverRegistry, UsbBus};

fn device_desc(num_configs: u8) -> Vec<u8> {
    vec![
        0x12, 0x01, 0x10, 0x01, 0x00, 0x00, 0x00, 0x08, 0x34, 0x12, 0x01, 0x00, 0x00, 0x01, 0,
        0, 0, num_configs,
    ]
}

/// Configuration header claiming `declared` interfaces, followed by the
/// given interface records.
fn config_desc(declared: u8, interfaces: &[&[u8]]) -> Vec<u8> {
    let mut bytes = vec![0x09, 0x02, 0, 0, declared, 0x01, 0x00, 0xa0, 50];
    for rec in interfaces {
        bytes.extend_from_slice(rec);
    }
    let total = bytes.len() as u16;
    bytes[2..4].copy_from_slice(&total.to_le_bytes());
    bytes
}

const VENDOR_INTERFACE_0: &[u8] = &[0x09, 0x04, 0x00, 0x00, 0x00, 0xff, 0x00, 0x00, 0x00];

fn boot(hc: &SimHostController, sink: &RecordingSink) -> UsbBus {
    UsbBus::start(
        Box::new(hc.clone()),
        DevicePath::pci(0, 3),
        DriverRegistry::new(),
        Box::new(sink.clone()),
        Box::new(hc.clock()),
        BusConfig::default(),
    )
    .unwrap()
}

#[test]
fn missing_later_interface_record_degrades_instead_of_failing() {
    let clock = ManualClock::new();
    let hc = SimHostController::new(1, clock.clone());
    let sink = RecordingSink::new();
    let gadget = SimGadget::new(device_desc(1), config_desc(2, &[VENDOR_INTERFACE_0]));
    hc.attach_root(0, Box::new(gadget.clone()));

    let mut bus = boot(&hc, &sink);
    clock.advance_us(1_000_000);
    bus.pump();

    // The device is up on its first interface; the declared-but-absent
    // second one is simply not published.
    let id = bus.root_child(0).expect("device enumerated");
    assert_eq!(bus.interface_handles(id).len(), 1);
    assert_eq!(gadget.configured_value(), 1);
    assert!(sink
        .codes()
        .contains(&ReportCode::DeviceAttach { port: 0, address: 2 }));
}

#[test]
fn zero_interface_configuration_still_publishes_slot_zero() {
    let clock = ManualClock::new();
    let hc = SimHostController::new(1, clock.clone());
    let sink = RecordingSink::new();
    let gadget = SimGadget::new(device_desc(1), config_desc(0, &[]));
    hc.attach_root(0, Box::new(gadget.clone()));

    let mut bus = boot(&hc, &sink);
    clock.advance_us(1_000_000);
    bus.pump();

    // The device itself occupies the one slot, interface number zero.
    let id = bus.root_child(0).expect("device enumerated");
    let handles = bus.interface_handles(id);
    assert_eq!(handles.len(), 1);
    assert!(bus.io_by_handle(handles[0]).is_ok());
    assert_eq!(gadget.configured_value(), 1);
}

#[test]
fn unparseable_configuration_fails_enumeration() {
    let clock = ManualClock::new();
    let hc = SimHostController::new(1, clock.clone());
    let sink = RecordingSink::new();
    // Framed as a config descriptor but with a zero-length record inside,
    // which the walker rejects.
    let mut broken = config_desc(1, &[VENDOR_INTERFACE_0]);
    broken[9] = 0;
    let gadget = SimGadget::new(device_desc(1), broken);
    hc.attach_root(0, Box::new(gadget.clone()));

    let mut bus = boot(&hc, &sink);
    clock.advance_us(1_000_000);
    bus.pump();

    assert!(bus.root_child(0).is_none());
    assert_eq!(bus.device_count(), 1);
    assert_eq!(bus.live_addresses(), 1);
    assert!(sink
        .codes()
        .contains(&ReportCode::EnumerationFailed { port: 0 }));
}
