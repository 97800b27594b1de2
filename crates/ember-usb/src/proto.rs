//! Wire-level request vocabulary: the SETUP packet and the standard request
//! and descriptor-type codes. Class-specific codes live with their class
//! (hub requests in `hub`, HID requests in the HID driver crate).

pub const REQ_GET_STATUS: u8 = 0x00;
pub const REQ_CLEAR_FEATURE: u8 = 0x01;
pub const REQ_SET_FEATURE: u8 = 0x03;
pub const REQ_SET_ADDRESS: u8 = 0x05;
pub const REQ_GET_DESCRIPTOR: u8 = 0x06;
pub const REQ_GET_CONFIGURATION: u8 = 0x08;
pub const REQ_SET_CONFIGURATION: u8 = 0x09;

pub const DESC_DEVICE: u8 = 0x01;
pub const DESC_CONFIGURATION: u8 = 0x02;
pub const DESC_STRING: u8 = 0x03;
pub const DESC_INTERFACE: u8 = 0x04;
pub const DESC_ENDPOINT: u8 = 0x05;

pub const FEATURE_ENDPOINT_HALT: u16 = 0x0000;

// bmRequestType bits.
pub const DIR_IN: u8 = 0x80;
pub const TYPE_CLASS: u8 = 0x20;
pub const RECIP_DEVICE: u8 = 0x00;
pub const RECIP_INTERFACE: u8 = 0x01;
pub const RECIP_ENDPOINT: u8 = 0x02;
pub const RECIP_OTHER: u8 = 0x03;

/// The 8-byte SETUP stage of a control transfer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SetupPacket {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

impl SetupPacket {
    pub fn is_in(self) -> bool {
        self.request_type & DIR_IN != 0
    }

    pub fn get_descriptor(desc_type: u8, desc_index: u8, index: u16, length: u16) -> Self {
        Self {
            request_type: DIR_IN,
            request: REQ_GET_DESCRIPTOR,
            value: (desc_type as u16) << 8 | desc_index as u16,
            index,
            length,
        }
    }

    pub fn set_address(address: u8) -> Self {
        Self {
            request_type: 0x00,
            request: REQ_SET_ADDRESS,
            value: address as u16,
            index: 0,
            length: 0,
        }
    }

    pub fn set_configuration(value: u8) -> Self {
        Self {
            request_type: 0x00,
            request: REQ_SET_CONFIGURATION,
            value: value as u16,
            index: 0,
            length: 0,
        }
    }

    /// CLEAR_FEATURE(ENDPOINT_HALT), the stall-recovery request.
    pub fn clear_endpoint_halt(endpoint: u8) -> Self {
        Self {
            request_type: RECIP_ENDPOINT,
            request: REQ_CLEAR_FEATURE,
            value: FEATURE_ENDPOINT_HALT,
            index: endpoint as u16,
            length: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_descriptor_packs_type_and_index() {
        let setup = SetupPacket::get_descriptor(DESC_STRING, 2, 0x0409, 64);
        assert_eq!(setup.request_type, 0x80);
        assert_eq!(setup.request, REQ_GET_DESCRIPTOR);
        assert_eq!(setup.value, 0x0302);
        assert_eq!(setup.index, 0x0409);
        assert_eq!(setup.length, 64);
        assert!(setup.is_in());
    }

    #[test]
    fn clear_endpoint_halt_targets_the_endpoint() {
        let setup = SetupPacket::clear_endpoint_halt(0x81);
        assert_eq!(setup.request_type, RECIP_ENDPOINT);
        assert_eq!(setup.request, REQ_CLEAR_FEATURE);
        assert_eq!(setup.value, FEATURE_ENDPOINT_HALT);
        assert_eq!(setup.index, 0x0081);
        assert!(!setup.is_in());
    }
}
