//! Per-interface I/O: the capability a class driver works through. Every
//! call re-resolves the interface, so a surface outliving its device fails
//! cleanly instead of touching a recycled slot.

use crate::address::UsbAddress;
use crate::bus::{PollClient, UsbBus};
use crate::descriptor::{
    ConfigDescriptor, DeviceDescriptor, EndpointDescriptor, InterfaceDescriptor,
};
use crate::error::{Result, UsbError};
use crate::host::{DataPhase, PollHandle, Target};
use crate::proto::SetupPacket;
use crate::tree::{DeviceId, InterfaceKey, UsbDevice};

pub(crate) enum PipeKind {
    Bulk,
    Interrupt,
}

pub struct UsbIo<'a> {
    bus: &'a mut UsbBus,
    key: InterfaceKey,
}

impl<'a> UsbIo<'a> {
    pub(crate) fn new(bus: &'a mut UsbBus, key: InterfaceKey) -> Self {
        Self { bus, key }
    }

    pub fn key(&self) -> InterfaceKey {
        self.key
    }

    fn device(&self) -> Result<&UsbDevice> {
        self.bus
            .table
            .get(self.key.device)
            .ok_or(UsbError::NotFound("device"))
    }

    /// Endpoint lookup scoped to this interface.
    fn endpoint(&self, endpoint: u8) -> Result<EndpointDescriptor> {
        self.device()?
            .interface_descriptor(self.key.interface)
            .ok_or(UsbError::NotFound("interface descriptor"))?
            .endpoints
            .iter()
            .find(|ep| ep.address == endpoint)
            .copied()
            .ok_or(UsbError::InvalidParameter("endpoint not on this interface"))
    }

    pub fn device_descriptor(&self) -> Result<DeviceDescriptor> {
        self.device()?
            .descriptor
            .clone()
            .ok_or(UsbError::NotFound("device descriptor"))
    }

    pub fn active_config_descriptor(&self) -> Result<ConfigDescriptor> {
        self.device()?
            .active_config()
            .cloned()
            .ok_or(UsbError::NotFound("active configuration"))
    }

    pub fn interface_descriptor(&self) -> Result<InterfaceDescriptor> {
        self.device()?
            .interface_descriptor(self.key.interface)
            .cloned()
            .ok_or(UsbError::NotFound("interface descriptor"))
    }

    pub fn endpoint_descriptor(&self, index: u8) -> Result<EndpointDescriptor> {
        self.interface_descriptor()?
            .endpoints
            .get(index as usize)
            .copied()
            .ok_or(UsbError::NotFound("endpoint"))
    }

    pub fn supported_languages(&self) -> Result<Vec<u16>> {
        Ok(self.device()?.lang_ids.clone())
    }

    /// Live fetch; only the three standard strings are cached on the node.
    pub fn string_descriptor(&mut self, lang: u16, index: u8) -> Result<String> {
        self.bus.fetch_string(self.key.device, lang, index)
    }

    pub fn control_transfer(
        &mut self,
        setup: SetupPacket,
        data: DataPhase<'_>,
        timeout_ms: u32,
    ) -> Result<usize> {
        let target = self.bus.device_target(self.key.device)?;
        self.bus.hc.control_transfer(target, setup, data, timeout_ms)
    }

    pub fn bulk_transfer(&mut self, endpoint: u8, data: &mut [u8], timeout_ms: u32) -> Result<usize> {
        let ep = self.endpoint(endpoint)?;
        if !ep.is_bulk() {
            return Err(UsbError::InvalidParameter("not a bulk endpoint"));
        }
        self.bus
            .endpoint_transfer(self.key.device, ep, PipeKind::Bulk, data, timeout_ms)
    }

    pub fn sync_interrupt_transfer(
        &mut self,
        endpoint: u8,
        data: &mut [u8],
        timeout_ms: u32,
    ) -> Result<usize> {
        let ep = self.endpoint(endpoint)?;
        if !ep.is_interrupt() {
            return Err(UsbError::InvalidParameter("not an interrupt endpoint"));
        }
        self.bus
            .endpoint_transfer(self.key.device, ep, PipeKind::Interrupt, data, timeout_ms)
    }

    /// Standing periodic poll on an interrupt IN endpoint. Deliveries arrive
    /// through [`crate::driver::DriverInstance::on_poll`] during
    /// [`UsbBus::pump`].
    pub fn start_interrupt_poll(
        &mut self,
        endpoint: u8,
        max_len: usize,
        interval_ms: u32,
    ) -> Result<PollHandle> {
        let ep = self.endpoint(endpoint)?;
        if !ep.is_interrupt() || !ep.is_in() {
            return Err(UsbError::InvalidParameter("not an interrupt IN endpoint"));
        }
        let base = self.bus.device_target(self.key.device)?;
        let target = Target { max_packet: ep.max_packet_size, ..base };
        let handle = self
            .bus
            .hc
            .submit_interrupt_poll(target, ep.address, max_len, interval_ms)?;
        self.bus.polls.insert(handle, PollClient::Driver(self.key));
        Ok(handle)
    }

    pub fn stop_interrupt_poll(&mut self, handle: PollHandle) -> Result<()> {
        match self.bus.polls.remove(&handle) {
            Some(PollClient::Driver(key)) if key == self.key => {}
            Some(other) => {
                self.bus.polls.insert(handle, other);
                return Err(UsbError::InvalidParameter("poll not owned by this interface"));
            }
            None => return Err(UsbError::NotFound("poll")),
        }
        self.bus.hc.cancel_interrupt_poll(handle)
    }

    pub fn isochronous_transfer(&mut self, _endpoint: u8, _data: &mut [u8]) -> Result<usize> {
        Err(UsbError::Unsupported("isochronous transfers"))
    }

    pub fn async_isochronous_transfer(&mut self, _endpoint: u8, _data: &mut [u8]) -> Result<()> {
        Err(UsbError::Unsupported("isochronous transfers"))
    }

    /// Resets the parent port under the device, then restores its address
    /// and active configuration so standing state survives the reset. Not
    /// available on hub interfaces.
    pub fn port_reset(&mut self) -> Result<()> {
        let (is_hub, link, address, max_packet0, low_speed, config_value) = {
            let dev = self.device()?;
            let ctrl = dev
                .interface(self.key.interface)
                .ok_or(UsbError::NotFound("interface"))?;
            let link = dev
                .parent
                .ok_or(UsbError::InvalidParameter("root hub cannot be port reset"))?;
            let address = dev.address.ok_or(UsbError::Device("device has no address"))?;
            let config_value = dev
                .active_config()
                .map(|config| config.value)
                .ok_or(UsbError::Device("device not configured"))?;
            (ctrl.is_hub(), link, address, dev.max_packet0, dev.low_speed, config_value)
        };
        if is_hub {
            return Err(UsbError::InvalidParameter("port reset on a hub interface"));
        }

        let done = if link.device == self.bus.root {
            self.bus.reset_root_port(link.port)?
        } else {
            self.bus.reset_hub_port(link)?
        };
        if !done {
            return Err(UsbError::Device("port reset did not complete"));
        }

        // The device is back at the default address; re-address with the one
        // it already owns, then reactivate the configuration.
        let target = Target { address: 0, low_speed, max_packet: max_packet0 as u16 };
        let timeout = self.bus.config.control_timeout_ms;
        self.bus.hc.control_transfer(
            target,
            SetupPacket::set_address(address.get()),
            DataPhase::None,
            timeout,
        )?;
        self.bus.control_to(
            self.key.device,
            SetupPacket::set_configuration(config_value),
            DataPhase::None,
        )?;
        if let Some(dev) = self.bus.table.get_mut(self.key.device) {
            dev.toggles.clear();
        }
        Ok(())
    }
}

impl UsbBus {
    /// Data-pipe transfer with the per-endpoint toggle threaded through to
    /// the controller.
    pub(crate) fn endpoint_transfer(
        &mut self,
        id: DeviceId,
        ep: EndpointDescriptor,
        kind: PipeKind,
        data: &mut [u8],
        timeout_ms: u32,
    ) -> Result<usize> {
        let dev = self.table.get_mut(id).ok_or(UsbError::NotFound("device"))?;
        let target = Target {
            address: dev.address.map_or(0, UsbAddress::get),
            low_speed: dev.low_speed,
            max_packet: ep.max_packet_size,
        };
        let toggle = dev.toggles.entry(ep.address).or_insert(false);
        match kind {
            PipeKind::Bulk => self.hc.bulk_transfer(target, ep.address, toggle, data, timeout_ms),
            PipeKind::Interrupt => {
                self.hc
                    .sync_interrupt_transfer(target, ep.address, toggle, data, timeout_ms)
            }
        }
    }
}
