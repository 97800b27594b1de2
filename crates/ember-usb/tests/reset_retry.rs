//! The one-retry policy for the initial descriptor probe: a device that
//! misses the first request gets exactly one more port reset, and a device
//! that keeps missing is reported and forgotten.

use ember_platform::{DevicePath, ManualClock, RecordingSink, ReportCode};
use ember_usb::sim::{SimGadget, SimHidKeyboard, SimHostController};
use ember_usb::{BusConfig, DriverRegistry, UsbBus};

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
fn one_missed_probe_earns_one_more_reset() {
    let clock = ManualClock::new();
    let hc = SimHostController::new(1, clock.clone());
    let sink = RecordingSink::new();
    let kbd = SimHidKeyboard::new();
    kbd.fail_next_controls(1);
    hc.attach_root(0, Box::new(kbd.clone()));

    let mut bus = boot(&hc, &sink);
    clock.advance_us(1_000_000);
    bus.pump();

    // Initial reset plus the retry reset, then a clean handshake.
    assert_eq!(hc.reset_count(0), 2);
    let id = bus.root_child(0).expect("retry succeeded");
    assert_eq!(bus.device_address(id), Some(2));
    assert!(sink
        .codes()
        .contains(&ReportCode::DeviceAttach { port: 0, address: 2 }));
}

#[test]
fn two_missed_probes_fail_the_port_without_leaking() {
    let clock = ManualClock::new();
    let hc = SimHostController::new(1, clock.clone());
    let sink = RecordingSink::new();
    let kbd = SimHidKeyboard::new();
    kbd.fail_next_controls(2);
    hc.attach_root(0, Box::new(kbd.clone()));

    let mut bus = boot(&hc, &sink);
    clock.advance_us(1_000_000);
    bus.pump();

    assert_eq!(hc.reset_count(0), 2);
    assert!(bus.root_child(0).is_none());
    assert_eq!(bus.device_count(), 1);
    // No address was ever assigned, so only the root's is live.
    assert_eq!(bus.live_addresses(), 1);
    assert!(sink
        .codes()
        .contains(&ReportCode::EnumerationFailed { port: 0 }));
}

#[test]
fn failure_after_addressing_returns_the_address_to_the_pool() {
    let clock = ManualClock::new();
    let hc = SimHostController::new(1, clock.clone());
    let sink = RecordingSink::new();

    // A device that probes and addresses cleanly, then turns out to
    // advertise no configurations at all (bNumConfigurations = 0).
    let device_desc = vec![
        0x12, 0x01, 0x10, 0x01, 0x00, 0x00, 0x00, 0x08, 0x34, 0x12, 0x01, 0x00, 0x00, 0x01, 0,
        0, 0, 0,
    ];
    let gadget = SimGadget::new(device_desc, Vec::new());
    hc.attach_root(0, Box::new(gadget.clone()));

    let mut bus = boot(&hc, &sink);
    clock.advance_us(1_000_000);
    bus.pump();

    assert!(bus.root_child(0).is_none());
    assert_eq!(bus.device_count(), 1);
    // The address assigned mid-handshake went back to the pool.
    assert_eq!(bus.live_addresses(), 1);
    assert!(sink
        .codes()
        .contains(&ReportCode::EnumerationFailed { port: 0 }));

    // Swap in a healthy device: it gets the recycled address.
    hc.detach_root(0);
    hc.attach_root(0, Box::new(SimHidKeyboard::new()));
    clock.advance_us(1_000_000);
    bus.pump();
    let id = bus.root_child(0).expect("replacement enumerated");
    assert_eq!(bus.device_address(id), Some(2));
}
