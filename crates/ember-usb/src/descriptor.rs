//! Descriptor leaf library: owned parse results for the standard descriptors
//! the bus core consumes, plus the buffer walkers that build them.
//!
//! Parsing is deliberately tolerant of what it does not understand (class and
//! vendor descriptors interleave freely inside a configuration buffer) and
//! strict about structure it relies on (lengths, types, ordering).

use crate::error::{Result, UsbError};
use crate::proto::{DESC_CONFIGURATION, DESC_DEVICE, DESC_ENDPOINT, DESC_INTERFACE, DESC_STRING};

pub const USB_CLASS_HID: u8 = 0x03;
pub const USB_CLASS_HUB: u8 = 0x09;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub usb_release: u16,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
    pub max_packet0: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    pub device_release: u16,
    pub manufacturer_index: u8,
    pub product_index: u8,
    pub serial_index: u8,
    pub num_configs: u8,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigDescriptor {
    pub value: u8,
    pub attributes: u8,
    pub max_power: u8,
    pub total_length: u16,
    /// Declared interface count. May exceed `interfaces.len()` on a
    /// misbehaving device; the configurator treats the difference as missing
    /// interfaces.
    pub num_interfaces: u8,
    pub interfaces: Vec<InterfaceDescriptor>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InterfaceDescriptor {
    pub interface_number: u8,
    pub alternate_setting: u8,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
    pub string_index: u8,
    pub endpoints: Vec<EndpointDescriptor>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EndpointDescriptor {
    pub address: u8,
    pub attributes: u8,
    pub max_packet_size: u16,
    pub interval: u8,
}

impl EndpointDescriptor {
    pub fn number(self) -> u8 {
        self.address & 0x0F
    }

    pub fn is_in(self) -> bool {
        self.address & 0x80 != 0
    }

    pub fn is_bulk(self) -> bool {
        self.attributes & 0x03 == 0x02
    }

    pub fn is_interrupt(self) -> bool {
        self.attributes & 0x03 == 0x03
    }
}

/// bMaxPacketSize0 out of the 8-byte descriptor prefix fetched while the
/// device still answers on address 0. Zero is returned as-is; the caller
/// decides whether that means "retry after reset".
pub fn max_packet0_from_prefix(bytes: &[u8]) -> Result<u8> {
    if bytes.len() < 8 {
        return Err(UsbError::Descriptor("device descriptor prefix too short"));
    }
    if bytes[1] != DESC_DEVICE {
        return Err(UsbError::Descriptor("prefix is not a device descriptor"));
    }
    Ok(bytes[7])
}

pub fn parse_device(bytes: &[u8]) -> Result<DeviceDescriptor> {
    if bytes.len() < 18 {
        return Err(UsbError::Descriptor("device descriptor too short"));
    }
    if bytes[0] < 18 || bytes[1] != DESC_DEVICE {
        return Err(UsbError::Descriptor("not a device descriptor"));
    }
    Ok(DeviceDescriptor {
        usb_release: u16::from_le_bytes([bytes[2], bytes[3]]),
        class: bytes[4],
        subclass: bytes[5],
        protocol: bytes[6],
        max_packet0: bytes[7],
        vendor_id: u16::from_le_bytes([bytes[8], bytes[9]]),
        product_id: u16::from_le_bytes([bytes[10], bytes[11]]),
        device_release: u16::from_le_bytes([bytes[12], bytes[13]]),
        manufacturer_index: bytes[14],
        product_index: bytes[15],
        serial_index: bytes[16],
        num_configs: bytes[17],
    })
}

/// Walks one full configuration buffer (the header plus everything
/// GET_DESCRIPTOR(CONFIGURATION) returned behind it).
///
/// Only alternate setting 0 of each interface is kept: preboot drivers never
/// select alternates, and the interface-controller array is sized from the
/// default setting.
pub fn parse_config(bytes: &[u8]) -> Result<ConfigDescriptor> {
    if bytes.len() < 9 {
        return Err(UsbError::Descriptor("config descriptor too short"));
    }
    if bytes[1] != DESC_CONFIGURATION {
        return Err(UsbError::Descriptor("not a config descriptor"));
    }
    let total_length = u16::from_le_bytes([bytes[2], bytes[3]]);
    let mut config = ConfigDescriptor {
        value: bytes[5],
        attributes: bytes[7],
        max_power: bytes[8],
        total_length,
        num_interfaces: bytes[4],
        interfaces: Vec::new(),
    };

    let end = bytes.len().min(total_length as usize);
    let mut offset = bytes[0] as usize;
    // Endpoints belong to the most recent interface record; None while inside
    // an alternate setting or before the first interface.
    let mut current: Option<usize> = None;

    while offset < end {
        if end - offset < 2 {
            return Err(UsbError::Descriptor("trailing bytes in config buffer"));
        }
        let len = bytes[offset] as usize;
        let kind = bytes[offset + 1];
        if len < 2 || offset + len > end {
            return Err(UsbError::Descriptor("descriptor overruns config buffer"));
        }
        match kind {
            DESC_INTERFACE if len >= 9 => {
                let rec = &bytes[offset..offset + 9];
                if rec[3] == 0 {
                    config.interfaces.push(InterfaceDescriptor {
                        interface_number: rec[2],
                        alternate_setting: rec[3],
                        class: rec[5],
                        subclass: rec[6],
                        protocol: rec[7],
                        string_index: rec[8],
                        endpoints: Vec::new(),
                    });
                    current = Some(config.interfaces.len() - 1);
                } else {
                    current = None;
                }
            }
            DESC_ENDPOINT if len >= 7 => {
                if let Some(iface) = current {
                    let rec = &bytes[offset..offset + 7];
                    config.interfaces[iface].endpoints.push(EndpointDescriptor {
                        address: rec[2],
                        attributes: rec[3],
                        max_packet_size: u16::from_le_bytes([rec[4], rec[5]]),
                        interval: rec[6],
                    });
                }
            }
            _ => {}
        }
        offset += len;
    }

    Ok(config)
}

/// String descriptor index 0: the supported language-ID table.
pub fn parse_lang_ids(bytes: &[u8]) -> Result<Vec<u16>> {
    if bytes.len() < 2 || bytes[1] != DESC_STRING {
        return Err(UsbError::Descriptor("not a string descriptor"));
    }
    let len = (bytes[0] as usize).min(bytes.len());
    let mut ids = Vec::with_capacity((len.saturating_sub(2)) / 2);
    let mut offset = 2;
    while offset + 1 < len {
        ids.push(u16::from_le_bytes([bytes[offset], bytes[offset + 1]]));
        offset += 2;
    }
    Ok(ids)
}

/// UTF-16LE string descriptor payload to a `String`, lossily.
pub fn parse_string(bytes: &[u8]) -> Result<String> {
    if bytes.len() < 2 || bytes[1] != DESC_STRING {
        return Err(UsbError::Descriptor("not a string descriptor"));
    }
    let len = (bytes[0] as usize).min(bytes.len());
    let units: Vec<u16> = bytes[2..len]
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    Ok(String::from_utf16_lossy(&units))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Boot keyboard configuration: config + interface + HID + interrupt
    // endpoint, 34 bytes total.
    const KEYBOARD_CONFIG: [u8; 34] = [
        9, 0x02, 34, 0, 1, 1, 0, 0xA0, 50, // config
        9, 0x04, 0, 0, 1, 0x03, 0x01, 0x01, 0, // interface 0, alt 0
        9, 0x21, 0x11, 0x01, 0, 1, 0x22, 63, 0, // HID class descriptor
        7, 0x05, 0x81, 0x03, 8, 0, 10, // interrupt IN endpoint
    ];

    #[test]
    fn config_walk_collects_interfaces_and_endpoints() {
        let config = parse_config(&KEYBOARD_CONFIG).unwrap();
        assert_eq!(config.value, 1);
        assert_eq!(config.num_interfaces, 1);
        assert_eq!(config.interfaces.len(), 1);

        let iface = &config.interfaces[0];
        assert_eq!(iface.class, USB_CLASS_HID);
        assert_eq!(iface.endpoints.len(), 1);

        let ep = iface.endpoints[0];
        assert_eq!(ep.address, 0x81);
        assert!(ep.is_interrupt());
        assert!(ep.is_in());
        assert_eq!(ep.number(), 1);
        assert_eq!(ep.max_packet_size, 8);
    }

    #[test]
    fn alternate_settings_are_skipped_with_their_endpoints() {
        let mut bytes = vec![
            9, 0x02, 41, 0, 1, 1, 0, 0xA0, 50, // config
            9, 0x04, 0, 0, 1, 0xFF, 0, 0, 0, // interface 0, alt 0
            7, 0x05, 0x81, 0x02, 64, 0, 0, // bulk endpoint for alt 0
            9, 0x04, 0, 1, 1, 0xFF, 0, 0, 0, // interface 0, alt 1
            7, 0x05, 0x82, 0x02, 0, 2, 0, // endpoint belonging to alt 1
        ];
        bytes[2] = bytes.len() as u8;
        let config = parse_config(&bytes).unwrap();
        assert_eq!(config.interfaces.len(), 1);
        assert_eq!(config.interfaces[0].endpoints.len(), 1);
        assert_eq!(config.interfaces[0].endpoints[0].address, 0x81);
    }

    #[test]
    fn zero_length_descriptor_is_an_error_not_a_hang() {
        let mut bytes = KEYBOARD_CONFIG.to_vec();
        bytes[9] = 0;
        assert!(matches!(
            parse_config(&bytes),
            Err(UsbError::Descriptor(_))
        ));
    }

    #[test]
    fn overrunning_descriptor_is_rejected() {
        let mut bytes = KEYBOARD_CONFIG.to_vec();
        bytes[27] = 60; // endpoint descriptor claims to extend past the buffer
        assert!(parse_config(&bytes).is_err());
    }

    #[test]
    fn device_descriptor_fields_round_trip() {
        let bytes = [
            18, 0x01, 0x00, 0x02, 0, 0, 0, 0x40, 0x34, 0x12, 0x01, 0x00, 0x00, 0x01, 1, 2, 0, 1,
        ];
        let desc = parse_device(&bytes).unwrap();
        assert_eq!(desc.usb_release, 0x0200);
        assert_eq!(desc.max_packet0, 0x40);
        assert_eq!(desc.vendor_id, 0x1234);
        assert_eq!(desc.product_id, 0x0001);
        assert_eq!(desc.num_configs, 1);
        assert_eq!(max_packet0_from_prefix(&bytes[..8]).unwrap(), 0x40);
    }

    #[test]
    fn language_table_and_strings_decode() {
        let langs = parse_lang_ids(&[4, 0x03, 0x09, 0x04]).unwrap();
        assert_eq!(langs, vec![0x0409]);

        let bytes = [10, 0x03, b'e', 0, b'm', 0, b'b', 0, b'r', 0];
        assert_eq!(parse_string(&bytes).unwrap(), "embr");
    }
}
