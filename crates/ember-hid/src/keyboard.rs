//! Boot-protocol keyboard driver.
//!
//! Binds interfaces carrying the boot keyboard triple, forces the device
//! into the boot protocol and diffs the stream of fixed 8-byte reports into
//! per-key [`KeyEvent`]s. No layout translation happens here; consumers get
//! raw usage codes, with the modifier byte unpacked into the 0xE0..=0xE7
//! usages so every key travels the same way.

use ember_platform::EventSender;
use ember_usb::{
    ClassDriver, DataPhase, DeviceDescriptor, DriverInstance, InterfaceDescriptor, PollHandle,
    Result, SetupPacket, UsbError, UsbIo, CONTROL_TIMEOUT_MS, USB_CLASS_HID,
};

use crate::events::{InputEvent, KeyEvent};
use crate::proto;

/// Usages 0x01..=0x03 are the error sentinels of the boot layout. A report
/// with ErrorRollOver in the key slots is a phantom state: the device lost
/// track, so the report carries no usable transitions.
const USAGE_ERROR_ROLLOVER: u8 = 0x01;
const USAGE_ERROR_MAX: u8 = 0x03;

/// Bit N of the modifier byte is the key with usage `0xE0 + N`.
const USAGE_MODIFIER_BASE: u8 = 0xe0;

/// Factory for boot keyboard instances. Every instance it starts feeds the
/// same [`EventSender`], so one queue collects keys from however many
/// keyboards are plugged in.
pub struct KeyboardDriver {
    events: EventSender<InputEvent>,
}

impl KeyboardDriver {
    pub fn new(events: EventSender<InputEvent>) -> Self {
        Self { events }
    }
}

impl ClassDriver for KeyboardDriver {
    fn name(&self) -> &'static str {
        "boot-keyboard"
    }

    fn supports(&self, _device: &DeviceDescriptor, interface: &InterfaceDescriptor) -> bool {
        interface.class == USB_CLASS_HID
            && interface.subclass == proto::SUBCLASS_BOOT
            && interface.protocol == proto::PROTOCOL_KEYBOARD
    }

    fn start(&mut self, io: &mut UsbIo<'_>) -> Result<Box<dyn DriverInstance>> {
        let iface = io.interface_descriptor()?;
        io.control_transfer(
            proto::set_protocol(iface.interface_number, proto::PROTOCOL_BOOT),
            DataPhase::None,
            CONTROL_TIMEOUT_MS,
        )?;
        // Idle rate zero: report on change only, the poll does the pacing.
        io.control_transfer(
            proto::set_idle(iface.interface_number, 0, 0),
            DataPhase::None,
            CONTROL_TIMEOUT_MS,
        )?;

        let ep = iface
            .endpoints
            .iter()
            .copied()
            .find(|ep| ep.is_interrupt() && ep.is_in())
            .ok_or(UsbError::NotFound("interrupt IN endpoint"))?;
        let interval_ms = u32::from(ep.interval.max(1));
        let max_len = usize::from(ep.max_packet_size);
        let poll = io.start_interrupt_poll(ep.address, max_len, interval_ms)?;
        tracing::debug!(endpoint = ep.address, interval_ms, "boot keyboard bound");

        Ok(Box::new(KeyboardInstance {
            events: self.events.clone(),
            endpoint: ep.address,
            max_len,
            interval_ms,
            poll: Some(poll),
            last: [0; 8],
        }))
    }
}

struct KeyboardInstance {
    events: EventSender<InputEvent>,
    endpoint: u8,
    max_len: usize,
    interval_ms: u32,
    poll: Option<PollHandle>,
    /// Previous report, the baseline the next one is diffed against.
    last: [u8; 8],
}

impl KeyboardInstance {
    fn handle_report(&mut self, report: [u8; 8]) {
        if report[2..].contains(&USAGE_ERROR_ROLLOVER) {
            tracing::trace!("phantom keyboard report dropped");
            return;
        }
        let previous = std::mem::replace(&mut self.last, report);

        let changed = previous[0] ^ report[0];
        for bit in 0u8..8 {
            if changed & (1 << bit) != 0 {
                self.send_key(USAGE_MODIFIER_BASE + bit, report[0] & (1 << bit) != 0);
            }
        }
        for &usage in &previous[2..] {
            if usage > USAGE_ERROR_MAX && !report[2..].contains(&usage) {
                self.send_key(usage, false);
            }
        }
        for &usage in &report[2..] {
            if usage > USAGE_ERROR_MAX && !previous[2..].contains(&usage) {
                self.send_key(usage, true);
            }
        }
    }

    fn send_key(&self, usage: u8, pressed: bool) {
        self.events.send(InputEvent::Key(KeyEvent { usage, pressed }));
    }

    /// An error delivery means the poll was retired. A stalled endpoint
    /// usually just needs the halt cleared, so clear it and resubmit; if the
    /// device is truly gone the bus tears the interface down on its next
    /// scan and [`DriverInstance::stop`] cancels whatever we restarted.
    fn recover(&mut self, io: &mut UsbIo<'_>, err: &UsbError) {
        tracing::debug!(%err, "keyboard poll errored");
        if matches!(err, UsbError::Stall) {
            let clear = SetupPacket::clear_endpoint_halt(self.endpoint);
            if let Err(err) = io.control_transfer(clear, DataPhase::None, CONTROL_TIMEOUT_MS) {
                tracing::debug!(%err, "keyboard halt clear failed");
            }
        }
        match io.start_interrupt_poll(self.endpoint, self.max_len, self.interval_ms) {
            Ok(poll) => self.poll = Some(poll),
            Err(err) => tracing::warn!(%err, "keyboard poll not restarted"),
        }
    }
}

impl DriverInstance for KeyboardInstance {
    fn on_poll(&mut self, io: &mut UsbIo<'_>, result: Result<Vec<u8>>) {
        match result {
            Ok(data) => match <[u8; 8]>::try_from(data.as_slice()) {
                Ok(report) => self.handle_report(report),
                Err(_) => tracing::debug!(len = data.len(), "odd-length keyboard report dropped"),
            },
            Err(err) => {
                self.poll = None;
                self.recover(io, &err);
            }
        }
    }

    fn stop(&mut self, io: &mut UsbIo<'_>) {
        if let Some(poll) = self.poll.take() {
            if let Err(err) = io.stop_interrupt_poll(poll) {
                tracing::trace!(%err, "keyboard poll already retired at stop");
            }
        }
    }
}
