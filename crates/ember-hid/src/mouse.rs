//! Boot-protocol mouse driver. Simpler than the keyboard: every report is
//! already an event, so decoding is a straight field copy with the optional
//! fourth wheel byte defaulted to zero.

use ember_platform::EventSender;
use ember_usb::{
    ClassDriver, DataPhase, DeviceDescriptor, DriverInstance, InterfaceDescriptor, PollHandle,
    Result, SetupPacket, UsbError, UsbIo, CONTROL_TIMEOUT_MS, USB_CLASS_HID,
};

use crate::events::{InputEvent, MouseEvent};
use crate::proto;

pub struct MouseDriver {
    events: EventSender<InputEvent>,
}

impl MouseDriver {
    pub fn new(events: EventSender<InputEvent>) -> Self {
        Self { events }
    }
}

impl ClassDriver for MouseDriver {
    fn name(&self) -> &'static str {
        "boot-mouse"
    }

    fn supports(&self, _device: &DeviceDescriptor, interface: &InterfaceDescriptor) -> bool {
        interface.class == USB_CLASS_HID
            && interface.subclass == proto::SUBCLASS_BOOT
            && interface.protocol == proto::PROTOCOL_MOUSE
    }

    fn start(&mut self, io: &mut UsbIo<'_>) -> Result<Box<dyn DriverInstance>> {
        let iface = io.interface_descriptor()?;

        // Most boot mice come up in the boot protocol already; only push
        // them there when the device says otherwise.
        let mut current = [0u8; 1];
        io.control_transfer(
            proto::get_protocol(iface.interface_number),
            DataPhase::In(&mut current),
            CONTROL_TIMEOUT_MS,
        )?;
        if u16::from(current[0]) != proto::PROTOCOL_BOOT {
            io.control_transfer(
                proto::set_protocol(iface.interface_number, proto::PROTOCOL_BOOT),
                DataPhase::None,
                CONTROL_TIMEOUT_MS,
            )?;
        }
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
        tracing::debug!(endpoint = ep.address, interval_ms, "boot mouse bound");

        Ok(Box::new(MouseInstance {
            events: self.events.clone(),
            endpoint: ep.address,
            max_len,
            interval_ms,
            poll: Some(poll),
        }))
    }
}

/// Boot report: buttons, X delta, Y delta, then an optional wheel byte on
/// devices that extend the layout.
fn decode_report(data: &[u8]) -> Option<MouseEvent> {
    if data.len() < 3 {
        return None;
    }
    Some(MouseEvent {
        buttons: data[0],
        dx: data[1] as i8,
        dy: data[2] as i8,
        wheel: data.get(3).map_or(0, |&byte| byte as i8),
    })
}

struct MouseInstance {
    events: EventSender<InputEvent>,
    endpoint: u8,
    max_len: usize,
    interval_ms: u32,
    poll: Option<PollHandle>,
}

impl MouseInstance {
    fn recover(&mut self, io: &mut UsbIo<'_>, err: &UsbError) {
        tracing::debug!(%err, "mouse poll errored");
        if matches!(err, UsbError::Stall) {
            let clear = SetupPacket::clear_endpoint_halt(self.endpoint);
            if let Err(err) = io.control_transfer(clear, DataPhase::None, CONTROL_TIMEOUT_MS) {
                tracing::debug!(%err, "mouse halt clear failed");
            }
        }
        match io.start_interrupt_poll(self.endpoint, self.max_len, self.interval_ms) {
            Ok(poll) => self.poll = Some(poll),
            Err(err) => tracing::warn!(%err, "mouse poll not restarted"),
        }
    }
}

impl DriverInstance for MouseInstance {
    fn on_poll(&mut self, io: &mut UsbIo<'_>, result: Result<Vec<u8>>) {
        match result {
            Ok(data) => match decode_report(&data) {
                Some(event) => self.events.send(InputEvent::Mouse(event)),
                None => tracing::debug!(len = data.len(), "short mouse report dropped"),
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
                tracing::trace!(%err, "mouse poll already retired at stop");
            }
        }
    }
}
