//! The whole stack in one piece: bus enumeration over the simulated
//! controller, boot HID drivers feeding the shared input queue, and the HII
//! database carrying configuration alongside a bus session.

use ember_hid::{InputEvent, KeyboardDriver, MouseDriver};
use ember_hii::{parse, HiiDatabase, PackageKind, PackageList};
use ember_platform::{
    DevicePath, EventQueue, Guid, ManualClock, RecordingSink, ReportCode,
};
use ember_usb::sim::{SimHidKeyboard, SimHidMouse, SimHostController, SimHub};
use ember_usb::{BusConfig, DriverRegistry, UsbBus};

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

fn input_registry(queue: &EventQueue<InputEvent>) -> DriverRegistry {
    let mut registry = DriverRegistry::new();
    registry.register(Box::new(KeyboardDriver::new(queue.sender())));
    registry.register(Box::new(MouseDriver::new(queue.sender())));
    registry
}

fn boot(hc: &SimHostController, registry: DriverRegistry, sink: &RecordingSink) -> UsbBus {
    UsbBus::start(
        Box::new(hc.clone()),
        DevicePath::pci(0, 3),
        registry,
        Box::new(sink.clone()),
        Box::new(hc.clock()),
        BusConfig::default(),
    )
    .unwrap()
}

#[test]
fn keyboard_behind_a_hub_types_into_the_shared_queue() {
    init_logging();
    let clock = ManualClock::new();
    let hc = SimHostController::new(2, clock.clone());

    let hub = SimHub::new(4);
    let kbd = SimHidKeyboard::new();
    hub.attach(0, Box::new(kbd.clone()));
    hc.attach_root(0, Box::new(hub.clone()));
    let mouse = SimHidMouse::new();
    hc.attach_root(1, Box::new(mouse.clone()));

    let queue = EventQueue::new();
    let sink = RecordingSink::new();
    let mut bus = boot(&hc, input_registry(&queue), &sink);

    // Root scan brings up the hub (address 2) and the mouse (address 3);
    // the hub's first status poll then surfaces the keyboard (address 4).
    clock.advance_us(1_000_000);
    bus.pump();
    clock.advance_us(200_000);
    bus.pump();

    let attaches: Vec<(u8, u8)> = sink
        .codes()
        .into_iter()
        .filter_map(|code| match code {
            ReportCode::DeviceAttach { port, address } => Some((port, address)),
            _ => None,
        })
        .collect();
    assert_eq!(attaches, vec![(0, 2), (1, 3), (0, 4)]);
    assert_eq!(bus.device_count(), 4);

    // One keystroke, then a mouse twitch, each delivered by its own pump.
    kbd.press(0x04);
    clock.advance_us(20_000);
    bus.pump();
    kbd.release(0x04);
    clock.advance_us(20_000);
    bus.pump();
    mouse.motion(0x02, -1, 7);
    clock.advance_us(20_000);
    bus.pump();

    let events = queue.drain();
    assert_eq!(events.len(), 3);
    assert!(matches!(events[0], InputEvent::Key(key) if key.usage == 0x04 && key.pressed));
    assert!(matches!(events[1], InputEvent::Key(key) if key.usage == 0x04 && !key.pressed));
    assert!(
        matches!(events[2], InputEvent::Mouse(report) if report.buttons == 0x02 && report.dx == -1 && report.dy == 7)
    );

    // Pulling the keyboard out of the hub stops its driver; the mouse keeps
    // reporting.
    hub.detach(0);
    clock.advance_us(200_000);
    bus.pump();
    assert_eq!(bus.device_count(), 3);

    kbd.press(0x05);
    clock.advance_us(20_000);
    bus.pump();
    assert!(queue.is_empty());

    mouse.motion(0x00, 3, 3);
    clock.advance_us(20_000);
    bus.pump();
    assert_eq!(queue.drain().len(), 1);
}

#[test]
fn platform_packages_outlive_a_bus_session() {
    init_logging();

    // The embedding installs its keyboard-layout packages before any
    // device shows up.
    let mut db = HiiDatabase::new();
    let notifies = EventQueue::new();
    db.register_package_notify(PackageKind::KeyboardLayout, notifies.sender());
    let layout = PackageList::new(Guid::new(0x4c41_594f, 0x0045, 0x4d42, *b"ember-kb"))
        .with_package(PackageKind::KeyboardLayout, vec![0x01, 0x00, 0x55, 0x53])
        .with_package(PackageKind::Strings, b"US layout".to_vec());
    let layout_handle = db.new_package_list(layout).unwrap();
    assert_eq!(notifies.drain().len(), 1);
    let before = db.export_package_lists(None).unwrap();

    // A full bus session runs next to the database.
    let clock = ManualClock::new();
    let hc = SimHostController::new(1, clock.clone());
    let kbd = SimHidKeyboard::new();
    hc.attach_root(0, Box::new(kbd.clone()));

    let queue = EventQueue::new();
    let sink = RecordingSink::new();
    let mut bus = boot(&hc, input_registry(&queue), &sink);
    clock.advance_us(1_000_000);
    bus.pump();

    kbd.press(0x1d);
    clock.advance_us(20_000);
    bus.pump();
    let events = queue.drain();
    assert!(matches!(events[..], [InputEvent::Key(key)] if key.usage == 0x1d && key.pressed));
    // The consumer that would translate that key finds the layout in place.
    assert_eq!(
        db.list_package_lists(Some(PackageKind::KeyboardLayout)),
        vec![layout_handle]
    );

    bus.stop();
    assert!(sink.codes().contains(&ReportCode::ControllerHalt));
    assert_eq!(hc.active_poll_count(), 0);

    // The session left no marks on the database.
    assert_eq!(db.export_package_lists(None).unwrap(), before);
    assert_eq!(parse(&before).unwrap().len(), 1);
}
