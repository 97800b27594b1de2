//! Hub class support: the hub descriptor, port requests over the control
//! pipe and the bring-up sequence that turns a freshly configured hub-class
//! interface into a monitored branch of the tree.
//!
//! Ports are numbered from one on the wire but indexed from zero everywhere
//! in this crate; the conversion happens here, at request-encoding time, and
//! nowhere else.

use crate::bus::{PollClient, UsbBus};
use crate::error::{Result, UsbError};
use crate::host::DataPhase;
use crate::port::{PortFeature, PortState};
use crate::proto::{
    SetupPacket, DIR_IN, RECIP_DEVICE, RECIP_OTHER, REQ_CLEAR_FEATURE, REQ_GET_DESCRIPTOR,
    REQ_GET_STATUS, REQ_SET_FEATURE, TYPE_CLASS,
};
use crate::tree::{DeviceId, HubState, InterfaceKey, PortIndex};

pub const DESC_HUB: u8 = 0x29;

/// The fixed head of the hub class descriptor. The variable-length
/// DeviceRemovable and PortPwrCtrlMask tails are not kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubDescriptor {
    pub num_ports: u8,
    pub characteristics: u16,
    /// Milliseconds from port power-on to power-good, already scaled from
    /// the descriptor's 2 ms units.
    pub power_on_to_power_good_ms: u16,
    pub hub_current: u8,
}

pub fn parse_hub_descriptor(bytes: &[u8]) -> Result<HubDescriptor> {
    if bytes.len() < 7 {
        return Err(UsbError::Descriptor("hub descriptor too short"));
    }
    if bytes[1] != DESC_HUB {
        return Err(UsbError::Descriptor("not a hub descriptor"));
    }
    let num_ports = bytes[2];
    if num_ports == 0 {
        return Err(UsbError::Descriptor("hub reports zero ports"));
    }
    Ok(HubDescriptor {
        num_ports,
        characteristics: u16::from_le_bytes([bytes[3], bytes[4]]),
        power_on_to_power_good_ms: bytes[5] as u16 * 2,
        hub_current: bytes[6],
    })
}

fn hub_descriptor_request(length: u16) -> SetupPacket {
    SetupPacket {
        request_type: DIR_IN | TYPE_CLASS | RECIP_DEVICE,
        request: REQ_GET_DESCRIPTOR,
        value: (DESC_HUB as u16) << 8,
        index: 0,
        length,
    }
}

fn port_status_request(port: PortIndex) -> SetupPacket {
    SetupPacket {
        request_type: DIR_IN | TYPE_CLASS | RECIP_OTHER,
        request: REQ_GET_STATUS,
        value: 0,
        index: port as u16 + 1,
        length: 4,
    }
}

fn set_port_feature_request(port: PortIndex, feature: PortFeature) -> SetupPacket {
    SetupPacket {
        request_type: TYPE_CLASS | RECIP_OTHER,
        request: REQ_SET_FEATURE,
        value: feature.selector(),
        index: port as u16 + 1,
        length: 0,
    }
}

fn clear_port_feature_request(port: PortIndex, feature: PortFeature) -> SetupPacket {
    SetupPacket {
        request_type: TYPE_CLASS | RECIP_OTHER,
        request: REQ_CLEAR_FEATURE,
        value: feature.selector(),
        index: port as u16 + 1,
        length: 0,
    }
}

impl UsbBus {
    pub(crate) fn hub_port_state(&mut self, hub: DeviceId, port: PortIndex) -> Result<PortState> {
        let mut buf = [0u8; 4];
        let n = self.control_to(hub, port_status_request(port), DataPhase::In(&mut buf))?;
        if n < 4 {
            return Err(UsbError::Device("short hub port status"));
        }
        Ok(PortState::from_words(
            u16::from_le_bytes([buf[0], buf[1]]),
            u16::from_le_bytes([buf[2], buf[3]]),
        ))
    }

    pub(crate) fn hub_set_port_feature(
        &mut self,
        hub: DeviceId,
        port: PortIndex,
        feature: PortFeature,
    ) -> Result<()> {
        self.control_to(hub, set_port_feature_request(port, feature), DataPhase::None)?;
        Ok(())
    }

    pub(crate) fn hub_clear_port_feature(
        &mut self,
        hub: DeviceId,
        port: PortIndex,
        feature: PortFeature,
    ) -> Result<()> {
        self.control_to(hub, clear_port_feature_request(port, feature), DataPhase::None)?;
        Ok(())
    }

    /// Turns a configured hub-class interface into a live branch: read the
    /// hub descriptor, power every downstream port, wait out power-good,
    /// then start the status-change poll. The hub state is only installed
    /// once the poll stands, so a hub interface either monitors or is not a
    /// hub at all.
    pub(crate) fn configure_hub(&mut self, key: InterfaceKey) -> Result<()> {
        let mut buf = [0u8; 9];
        let n = self.control_to(key.device, hub_descriptor_request(9), DataPhase::In(&mut buf))?;
        let desc = parse_hub_descriptor(&buf[..n])?;

        let status_ep = self
            .table
            .get(key.device)
            .and_then(|dev| dev.interface_descriptor(key.interface))
            .and_then(|iface| {
                iface
                    .endpoints
                    .iter()
                    .find(|ep| ep.is_interrupt() && ep.is_in())
                    .copied()
            })
            .ok_or(UsbError::Descriptor("hub interface lacks a status-change endpoint"))?;

        for port in 0..desc.num_ports {
            self.hub_set_port_feature(key.device, port, PortFeature::Power)?;
        }
        // Ports are usable after twice the power-good time.
        self.stall_us(u64::from(desc.power_on_to_power_good_ms) * 2 * 1_000);

        let mut hub = HubState::new(desc.num_ports);
        hub.status_ep = Some(status_ep);
        if let Some(ctrl) = self
            .table
            .get_mut(key.device)
            .and_then(|dev| dev.interface_mut(key.interface))
        {
            ctrl.hub = Some(hub);
        } else {
            return Err(UsbError::NotFound("hub interface"));
        }

        if let Err(err) = self.submit_hub_poll(key) {
            if let Some(ctrl) = self
                .table
                .get_mut(key.device)
                .and_then(|dev| dev.interface_mut(key.interface))
            {
                ctrl.hub = None;
            }
            return Err(err);
        }

        tracing::debug!(ports = desc.num_ports, "hub online");
        Ok(())
    }

    /// Starts (or restarts) the standing status-change poll for a hub whose
    /// state is already installed.
    pub(crate) fn submit_hub_poll(&mut self, key: InterfaceKey) -> Result<()> {
        let target = self.device_target(key.device)?;
        let (endpoint, port_count) = {
            let hub = self
                .table
                .get(key.device)
                .and_then(|dev| dev.interface(key.interface))
                .and_then(|ctrl| ctrl.hub.as_ref())
                .ok_or(UsbError::NotFound("hub state"))?;
            let ep = hub
                .status_ep
                .ok_or(UsbError::Device("hub has no status endpoint"))?;
            (ep, hub.port_count())
        };

        // One bit per port plus bit zero for the hub itself.
        let max_len = (port_count as usize + 1 + 7) / 8;
        let interval = self.config.hub_poll_interval_ms;
        let handle = self
            .hc
            .submit_interrupt_poll(target, endpoint.address, max_len, interval)?;

        if let Some(hub) = self
            .table
            .get_mut(key.device)
            .and_then(|dev| dev.interface_mut(key.interface))
            .and_then(|ctrl| ctrl.hub.as_mut())
        {
            hub.poll = Some(handle);
        }
        self.polls.insert(handle, PollClient::Hub(key));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hub_descriptor_parses_and_scales_power_good() {
        let raw = [9, 0x29, 4, 0x09, 0x00, 25, 50, 0x00, 0xff];
        let desc = parse_hub_descriptor(&raw).unwrap();
        assert_eq!(desc.num_ports, 4);
        assert_eq!(desc.characteristics, 0x0009);
        assert_eq!(desc.power_on_to_power_good_ms, 50);
        assert_eq!(desc.hub_current, 50);
    }

    #[test]
    fn hub_descriptor_rejects_wrong_type_and_zero_ports() {
        let wrong_type = [9, 0x05, 4, 0, 0, 0, 0];
        assert!(parse_hub_descriptor(&wrong_type).is_err());
        let zero_ports = [9, 0x29, 0, 0, 0, 0, 0];
        assert!(parse_hub_descriptor(&zero_ports).is_err());
        assert!(parse_hub_descriptor(&[9, 0x29]).is_err());
    }

    #[test]
    fn port_requests_use_one_based_wire_numbers() {
        let status = port_status_request(0);
        assert_eq!(status.index, 1);
        assert_eq!(status.request_type, 0xa3);
        assert_eq!(status.length, 4);

        let set = set_port_feature_request(3, PortFeature::Reset);
        assert_eq!(set.index, 4);
        assert_eq!(set.request_type, 0x23);
        assert_eq!(set.value, 4);

        let clear = clear_port_feature_request(0, PortFeature::ConnectChange);
        assert_eq!(clear.index, 1);
        assert_eq!(clear.value, 16);
    }
}
