//! The device tree: an arena of device records addressed by generation-tagged
//! ids, with the hub topology expressed as child-slot arrays inside hub
//! interface controllers. Ids are plain values, so a record freed by teardown
//! leaves any stale id missing rather than dangling.

use std::collections::BTreeMap;

use ember_platform::{DevicePath, Handle};

use crate::address::UsbAddress;
use crate::descriptor::{
    ConfigDescriptor, DeviceDescriptor, EndpointDescriptor, InterfaceDescriptor, USB_CLASS_HUB,
};
use crate::host::PollHandle;

/// 0-based downstream-port index. The hub class wire speaks 1-based port
/// numbers; the conversion happens at the request-encoding boundary.
pub type PortIndex = u8;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct DeviceId {
    index: u32,
    generation: u32,
}

/// One interface of one device; what driver code holds to address it.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct InterfaceKey {
    pub device: DeviceId,
    /// Slot index into the device's interface-controller array.
    pub interface: u8,
}

/// Non-owning edge back to the parent hub: which device, which of its
/// interface controllers is the hub, which downstream port.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ParentLink {
    pub device: DeviceId,
    pub interface: u8,
    pub port: PortIndex,
}

/// Hub-specific half of an interface controller.
#[derive(Debug)]
pub struct HubState {
    /// Status-change interrupt endpoint; `None` for the root hub, whose
    /// changes are polled through the controller's port registers.
    pub status_ep: Option<EndpointDescriptor>,
    pub poll: Option<PollHandle>,
    /// Lowest changed port recorded by the last status-change report.
    pub pending_port: Option<PortIndex>,
    pub ports: Vec<Option<DeviceId>>,
}

impl HubState {
    pub fn new(port_count: u8) -> Self {
        Self {
            status_ep: None,
            poll: None,
            pending_port: None,
            ports: vec![None; port_count as usize],
        }
    }

    pub fn port_count(&self) -> u8 {
        self.ports.len() as u8
    }

    pub fn child(&self, port: PortIndex) -> Option<DeviceId> {
        self.ports.get(port as usize).copied().flatten()
    }
}

#[derive(Debug)]
pub struct InterfaceController {
    pub interface_number: u8,
    pub config_value: u8,
    pub handle: Handle,
    pub path: DevicePath,
    pub driver_attached: bool,
    /// Present exactly while this interface is a monitored hub.
    pub hub: Option<HubState>,
}

impl InterfaceController {
    pub fn is_hub(&self) -> bool {
        self.hub.is_some()
    }
}

#[derive(Debug)]
pub struct UsbDevice {
    pub path: DevicePath,
    pub address: Option<UsbAddress>,
    pub low_speed: bool,
    pub max_packet0: u8,
    pub configured: bool,
    pub descriptor: Option<DeviceDescriptor>,
    pub configs: Vec<ConfigDescriptor>,
    pub active_config_index: Option<usize>,
    pub lang_ids: Vec<u16>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial: Option<String>,
    /// Data toggle per endpoint address, for bulk/interrupt pipes.
    pub toggles: BTreeMap<u8, bool>,
    pub parent: Option<ParentLink>,
    pub interfaces: Vec<Option<InterfaceController>>,
}

impl UsbDevice {
    /// Bare device as first allocated by the enumeration engine: no address,
    /// max packet forced to the safe minimum until the descriptor prefix says
    /// otherwise.
    pub fn bare(path: DevicePath, low_speed: bool, parent: Option<ParentLink>) -> Self {
        Self {
            path,
            address: None,
            low_speed,
            max_packet0: 8,
            configured: false,
            descriptor: None,
            configs: Vec::new(),
            active_config_index: None,
            lang_ids: Vec::new(),
            manufacturer: None,
            product: None,
            serial: None,
            toggles: BTreeMap::new(),
            parent,
            interfaces: Vec::new(),
        }
    }

    pub fn active_config(&self) -> Option<&ConfigDescriptor> {
        self.configs.get(self.active_config_index?)
    }

    pub fn interface_descriptor(&self, slot: u8) -> Option<&InterfaceDescriptor> {
        self.active_config()?.interfaces.get(slot as usize)
    }

    pub fn interface(&self, slot: u8) -> Option<&InterfaceController> {
        self.interfaces.get(slot as usize)?.as_ref()
    }

    pub fn interface_mut(&mut self, slot: u8) -> Option<&mut InterfaceController> {
        self.interfaces.get_mut(slot as usize)?.as_mut()
    }

    /// Whether the interface descriptor in a slot is hub class.
    pub fn slot_is_hub_class(&self, slot: u8) -> bool {
        self.interface_descriptor(slot)
            .map(|iface| iface.class == USB_CLASS_HUB)
            .unwrap_or(false)
    }
}

struct TableSlot {
    generation: u32,
    device: Option<UsbDevice>,
}

/// Arena of device records. Removal bumps the slot generation, so ids held
/// past a teardown miss instead of resolving to the slot's next occupant.
#[derive(Default)]
pub struct DeviceTable {
    slots: Vec<TableSlot>,
    free: Vec<u32>,
    live: usize,
}

impl DeviceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, device: UsbDevice) -> DeviceId {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.device = Some(device);
            return DeviceId {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(TableSlot {
            generation: 0,
            device: Some(device),
        });
        DeviceId {
            index,
            generation: 0,
        }
    }

    pub fn remove(&mut self, id: DeviceId) -> Option<UsbDevice> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation || slot.device.is_none() {
            return None;
        }
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.live -= 1;
        slot.device.take()
    }

    pub fn get(&self, id: DeviceId) -> Option<&UsbDevice> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.device.as_ref()
    }

    pub fn get_mut(&mut self, id: DeviceId) -> Option<&mut UsbDevice> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.device.as_mut()
    }

    pub fn contains(&self, id: DeviceId) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }
}
