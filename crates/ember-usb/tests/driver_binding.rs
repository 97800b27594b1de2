//! The class-driver seam end to end: matching, binding, poll deliveries,
//! the error-retires-the-poll contract and disconnect-before-teardown.

use std::cell::RefCell;
use std::rc::Rc;

use ember_platform::{DevicePath, ManualClock, RecordingSink};
use ember_usb::sim::{SimHidKeyboard, SimHostController};
use ember_usb::{
    BusConfig, ClassDriver, DeviceDescriptor, DriverInstance, DriverRegistry, InterfaceDescriptor,
    Result, UsbBus, UsbError, UsbIo, USB_CLASS_HID,
};

#[derive(Debug, PartialEq, Eq)]
enum Event {
    Started { endpoint: u8 },
    Report(Vec<u8>),
    PollError,
    Stopped { handle_alive: bool },
}

#[derive(Clone, Default)]
struct Recorder {
    events: Rc<RefCell<Vec<Event>>>,
}

impl Recorder {
    fn take(&self) -> Vec<Event> {
        std::mem::take(&mut self.events.borrow_mut())
    }
}

struct TestDriver {
    log: Recorder,
    fail_start: bool,
}

impl ClassDriver for TestDriver {
    fn name(&self) -> &'static str {
        "test-hid"
    }

    fn supports(&self, _device: &DeviceDescriptor, interface: &InterfaceDescriptor) -> bool {
        interface.class == USB_CLASS_HID
    }

    fn start(&mut self, io: &mut UsbIo<'_>) -> Result<Box<dyn DriverInstance>> {
        if self.fail_start {
            return Err(UsbError::Device("declined for the test"));
        }
        let ep = io.interface_descriptor()?.endpoints[0];
        io.start_interrupt_poll(ep.address, ep.max_packet_size as usize, 10)?;
        self.log
            .events
            .borrow_mut()
            .push(Event::Started { endpoint: ep.address });
        Ok(Box::new(TestInstance { log: self.log.clone() }))
    }
}

struct TestInstance {
    log: Recorder,
}

impl DriverInstance for TestInstance {
    fn on_poll(&mut self, _io: &mut UsbIo<'_>, result: Result<Vec<u8>>) {
        let event = match result {
            Ok(data) => Event::Report(data),
            Err(_) => Event::PollError,
        };
        self.log.events.borrow_mut().push(event);
    }

    fn stop(&mut self, io: &mut UsbIo<'_>) {
        // The interface must still answer while the driver says goodbye.
        let handle_alive = io.device_descriptor().is_ok();
        self.log.events.borrow_mut().push(Event::Stopped { handle_alive });
    }
}

fn boot_with(drivers: DriverRegistry, hc: &SimHostController) -> UsbBus {
    UsbBus::start(
        Box::new(hc.clone()),
        DevicePath::pci(0, 3),
        drivers,
        Box::new(RecordingSink::new()),
        Box::new(hc.clock()),
        BusConfig::default(),
    )
    .unwrap()
}

#[test]
fn matching_driver_binds_and_receives_reports() {
    let clock = ManualClock::new();
    let hc = SimHostController::new(1, clock.clone());
    let kbd = SimHidKeyboard::new();
    hc.attach_root(0, Box::new(kbd.clone()));

    let log = Recorder::default();
    let mut registry = DriverRegistry::new();
    registry.register(Box::new(TestDriver { log: log.clone(), fail_start: false }));

    let mut bus = boot_with(registry, &hc);
    clock.advance_us(1_000_000);
    bus.pump();
    assert_eq!(log.take(), vec![Event::Started { endpoint: 0x81 }]);
    assert_eq!(hc.active_poll_count(), 1);

    kbd.press(0x04);
    clock.advance_us(20_000);
    bus.pump();
    let events = log.take();
    assert_eq!(events.len(), 1);
    match &events[0] {
        Event::Report(data) => {
            assert_eq!(data.len(), 8);
            assert_eq!(data[2], 0x04);
        }
        other => panic!("expected a report, got {other:?}"),
    }
}

#[test]
fn poll_error_is_delivered_once_and_retires_the_poll() {
    let clock = ManualClock::new();
    let hc = SimHostController::new(1, clock.clone());
    let kbd = SimHidKeyboard::new();
    hc.attach_root(0, Box::new(kbd.clone()));

    let log = Recorder::default();
    let mut registry = DriverRegistry::new();
    registry.register(Box::new(TestDriver { log: log.clone(), fail_start: false }));

    let mut bus = boot_with(registry, &hc);
    clock.advance_us(1_000_000);
    bus.pump();
    log.take();

    kbd.stall_next_interrupt();
    clock.advance_us(20_000);
    bus.pump();
    assert_eq!(log.take(), vec![Event::PollError]);
    // This instance does not restart its poll, so none stands afterwards.
    assert_eq!(hc.active_poll_count(), 0);

    // Later intervals deliver nothing further.
    clock.advance_us(100_000);
    bus.pump();
    assert!(log.take().is_empty());
}

#[test]
fn driver_is_stopped_before_its_interface_disappears() {
    let clock = ManualClock::new();
    let hc = SimHostController::new(1, clock.clone());
    let kbd = SimHidKeyboard::new();
    hc.attach_root(0, Box::new(kbd.clone()));

    let log = Recorder::default();
    let mut registry = DriverRegistry::new();
    registry.register(Box::new(TestDriver { log: log.clone(), fail_start: false }));

    let mut bus = boot_with(registry, &hc);
    clock.advance_us(1_000_000);
    bus.pump();
    log.take();

    hc.detach_root(0);
    clock.advance_us(1_000_000);
    bus.pump();

    // The standing poll fails first (the device no longer answers), then
    // the scan notices the disconnect and stops the driver while its
    // interface still resolves.
    assert_eq!(
        log.take(),
        vec![Event::PollError, Event::Stopped { handle_alive: true }]
    );
    assert_eq!(bus.device_count(), 1);
}

#[test]
fn failed_start_falls_through_to_the_next_registered_driver() {
    let clock = ManualClock::new();
    let hc = SimHostController::new(1, clock.clone());
    hc.attach_root(0, Box::new(SimHidKeyboard::new()));

    let first = Recorder::default();
    let second = Recorder::default();
    let mut registry = DriverRegistry::new();
    registry.register(Box::new(TestDriver { log: first.clone(), fail_start: true }));
    registry.register(Box::new(TestDriver { log: second.clone(), fail_start: false }));

    let mut bus = boot_with(registry, &hc);
    clock.advance_us(1_000_000);
    bus.pump();

    assert!(first.take().is_empty());
    assert_eq!(second.take(), vec![Event::Started { endpoint: 0x81 }]);
    assert_eq!(bus.device_count(), 2);
}
