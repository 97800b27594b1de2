//! Bringing a freshly reset device from the default address to a fully
//! configured tree node: prefix probe, address assignment, descriptor
//! harvest, configuration activation and per-interface controller creation.

use crate::bus::UsbBus;
use crate::descriptor::{self, max_packet0_from_prefix, ConfigDescriptor, DeviceDescriptor};
use crate::error::{Result, UsbError};
use crate::host::DataPhase;
use crate::proto::{self, SetupPacket};
use crate::tree::{DeviceId, InterfaceController, InterfaceKey, ParentLink, UsbDevice};

const MAX_STRING_DESCRIPTOR_LEN: u16 = 255;

impl UsbBus {
    /// Runs the whole configuration handshake for the device behind a just
    /// reset port. On success the new node is in the table but not yet linked
    /// into the parent's child slot; the caller links and reports. On failure
    /// everything acquired along the way is released and the parent port is
    /// left untouched.
    pub(crate) fn configure_device(
        &mut self,
        link: ParentLink,
        low_speed: bool,
    ) -> Result<DeviceId> {
        let parent_path = self
            .table
            .get(link.device)
            .map(|dev| dev.path.clone())
            .ok_or(UsbError::NotFound("parent device"))?;
        let path = parent_path.child_usb(link.port, 0);

        let id = self.table.insert(UsbDevice::bare(path, low_speed, Some(link)));
        match self.run_handshake(id, link) {
            Ok(()) => Ok(id),
            Err(err) => {
                self.deconfigure_device(id);
                Err(err)
            }
        }
    }

    fn run_handshake(&mut self, id: DeviceId, link: ParentLink) -> Result<()> {
        // The device answers at the default address with an unknown endpoint
        // zero size, so the first read is capped at eight bytes. A failure or
        // a nonsense answer earns the port exactly one more reset.
        let max_packet0 = match self.fetch_descriptor_prefix(id) {
            Ok(mps) if mps != 0 => mps,
            first => {
                tracing::debug!(
                    port = link.port,
                    "descriptor prefix failed ({first:?}), resetting once more"
                );
                let recovered = if link.device == self.root {
                    self.reset_root_port(link.port)?
                } else {
                    self.reset_hub_port(link)?
                };
                if !recovered {
                    return Err(UsbError::Device("port reset for retry timed out"));
                }
                match self.fetch_descriptor_prefix(id) {
                    Ok(mps) if mps != 0 => mps,
                    Ok(_) => return Err(UsbError::Device("device reports zero max packet size")),
                    Err(err) => return Err(err),
                }
            }
        };
        if let Some(dev) = self.table.get_mut(id) {
            dev.max_packet0 = max_packet0;
        }

        let address = self
            .pool
            .allocate()
            .ok_or(UsbError::OutOfResources("address pool exhausted"))?;
        if let Err(err) = self.control_to(id, SetupPacket::set_address(address.get()), DataPhase::None)
        {
            self.pool.free(address);
            return Err(err);
        }
        // From here the address is owned by the node and freed by teardown.
        if let Some(dev) = self.table.get_mut(id) {
            dev.address = Some(address);
        }

        let device_desc = self.fetch_device_descriptor(id)?;
        let num_configs = device_desc.num_configs;
        if num_configs == 0 {
            return Err(UsbError::Device("device advertises no configurations"));
        }
        if let Some(dev) = self.table.get_mut(id) {
            dev.descriptor = Some(device_desc);
        }

        for index in 0..num_configs {
            let config = self.fetch_config_descriptor(id, index)?;
            if let Some(dev) = self.table.get_mut(id) {
                dev.configs.push(config);
            }
        }

        // First configuration wins, same as every firmware stack.
        let config_value = self
            .table
            .get(id)
            .and_then(|dev| dev.configs.first())
            .map(|config| config.value)
            .ok_or(UsbError::Device("no configuration to activate"))?;
        self.control_to(id, SetupPacket::set_configuration(config_value), DataPhase::None)?;
        if let Some(dev) = self.table.get_mut(id) {
            dev.active_config_index = Some(0);
            dev.configured = true;
        }

        self.fetch_strings(id);

        self.create_interfaces(id, link, config_value)
    }

    /// All interface controllers for the active configuration. The first
    /// interface is the device's face to the world; losing it fails the whole
    /// device, while later interfaces fail alone with a warning.
    fn create_interfaces(&mut self, id: DeviceId, link: ParentLink, config_value: u8) -> Result<()> {
        let declared = self
            .table
            .get(id)
            .and_then(UsbDevice::active_config)
            .map(|config| config.num_interfaces)
            .unwrap_or(0);
        // A configuration with no interfaces still publishes slot zero.
        let slots = declared.max(1);
        if let Some(dev) = self.table.get_mut(id) {
            dev.interfaces = (0..slots).map(|_| None).collect();
        }

        for slot in 0..slots {
            match self.create_interface(id, link, slot, config_value) {
                Ok(()) => {}
                Err(err) if slot == 0 => return Err(err),
                Err(err) => {
                    tracing::warn!(
                        port = link.port,
                        interface = slot,
                        "interface setup failed, continuing without it: {err}"
                    );
                }
            }
        }
        Ok(())
    }

    fn create_interface(
        &mut self,
        id: DeviceId,
        link: ParentLink,
        slot: u8,
        config_value: u8,
    ) -> Result<()> {
        let interface_number = {
            let dev = self.table.get(id).ok_or(UsbError::NotFound("device"))?;
            match dev.interface_descriptor(slot) {
                Some(desc) => desc.interface_number,
                // Only the degenerate zero-interface configuration may go
                // without a descriptor, and only for slot zero.
                None if slot == 0
                    && dev
                        .active_config()
                        .map_or(true, |config| config.interfaces.is_empty()) =>
                {
                    0
                }
                None => {
                    return Err(UsbError::Descriptor(
                        "configuration carries fewer interface records than it declares",
                    ))
                }
            }
        };

        let parent_path = self
            .table
            .get(link.device)
            .map(|dev| dev.path.clone())
            .ok_or(UsbError::NotFound("parent device"))?;
        let handle = self.handles.alloc();
        let controller = InterfaceController {
            interface_number,
            config_value,
            handle,
            path: parent_path.child_usb(link.port, interface_number),
            driver_attached: false,
            hub: None,
        };
        self.published
            .insert(handle, InterfaceKey { device: id, interface: slot });
        if let Some(dev) = self.table.get_mut(id) {
            dev.interfaces[slot as usize] = Some(controller);
        }
        Ok(())
    }

    /// First eight bytes of the device descriptor on the default pipe.
    fn fetch_descriptor_prefix(&mut self, id: DeviceId) -> Result<u8> {
        let mut buf = [0u8; 8];
        let n = self.control_to(
            id,
            SetupPacket::get_descriptor(proto::DESC_DEVICE, 0, 0, buf.len() as u16),
            DataPhase::In(&mut buf),
        )?;
        max_packet0_from_prefix(&buf[..n])
    }

    fn fetch_device_descriptor(&mut self, id: DeviceId) -> Result<DeviceDescriptor> {
        let mut buf = [0u8; 18];
        let n = self.control_to(
            id,
            SetupPacket::get_descriptor(proto::DESC_DEVICE, 0, 0, buf.len() as u16),
            DataPhase::In(&mut buf),
        )?;
        descriptor::parse_device(&buf[..n])
    }

    /// Two-phase configuration read: header first for the total length, then
    /// the whole blob including interfaces and endpoints.
    fn fetch_config_descriptor(&mut self, id: DeviceId, index: u8) -> Result<ConfigDescriptor> {
        let mut header = [0u8; 9];
        let n = self.control_to(
            id,
            SetupPacket::get_descriptor(proto::DESC_CONFIGURATION, index, 0, header.len() as u16),
            DataPhase::In(&mut header),
        )?;
        if n < 4 {
            return Err(UsbError::Descriptor("configuration header too short"));
        }
        let total = u16::from_le_bytes([header[2], header[3]]);
        if total < 9 {
            return Err(UsbError::Descriptor("configuration total length too short"));
        }

        let mut buf = vec![0u8; total as usize];
        let n = self.control_to(
            id,
            SetupPacket::get_descriptor(proto::DESC_CONFIGURATION, index, 0, total),
            DataPhase::In(&mut buf),
        )?;
        descriptor::parse_config(&buf[..n])
    }

    /// Language table and the three standard strings. Nothing here can fail
    /// the device; a string a device refuses to serve is simply absent.
    fn fetch_strings(&mut self, id: DeviceId) {
        let langs = match self.fetch_lang_ids(id) {
            Ok(langs) if !langs.is_empty() => langs,
            _ => return,
        };
        let lang = langs[0];
        if let Some(dev) = self.table.get_mut(id) {
            dev.lang_ids = langs;
        }

        let indexes = self
            .table
            .get(id)
            .and_then(|dev| dev.descriptor.as_ref())
            .map(|desc| {
                (
                    desc.manufacturer_index,
                    desc.product_index,
                    desc.serial_index,
                )
            });
        let Some((manufacturer, product, serial)) = indexes else {
            return;
        };

        if manufacturer != 0 {
            if let Ok(text) = self.fetch_string(id, lang, manufacturer) {
                if let Some(dev) = self.table.get_mut(id) {
                    dev.manufacturer = Some(text);
                }
            }
        }
        if product != 0 {
            if let Ok(text) = self.fetch_string(id, lang, product) {
                if let Some(dev) = self.table.get_mut(id) {
                    dev.product = Some(text);
                }
            }
        }
        if serial != 0 {
            if let Ok(text) = self.fetch_string(id, lang, serial) {
                if let Some(dev) = self.table.get_mut(id) {
                    dev.serial = Some(text);
                }
            }
        }
    }

    fn fetch_lang_ids(&mut self, id: DeviceId) -> Result<Vec<u16>> {
        let mut buf = [0u8; MAX_STRING_DESCRIPTOR_LEN as usize];
        let n = self.control_to(
            id,
            SetupPacket::get_descriptor(proto::DESC_STRING, 0, 0, MAX_STRING_DESCRIPTOR_LEN),
            DataPhase::In(&mut buf),
        )?;
        descriptor::parse_lang_ids(&buf[..n])
    }

    pub(crate) fn fetch_string(&mut self, id: DeviceId, lang: u16, index: u8) -> Result<String> {
        let mut buf = [0u8; MAX_STRING_DESCRIPTOR_LEN as usize];
        let n = self.control_to(
            id,
            SetupPacket::get_descriptor(proto::DESC_STRING, index, lang, MAX_STRING_DESCRIPTOR_LEN),
            DataPhase::In(&mut buf),
        )?;
        descriptor::parse_string(&buf[..n])
    }
}
