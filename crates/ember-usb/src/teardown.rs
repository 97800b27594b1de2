//! Recursive teardown. Every step is best effort: a half-dead device on the
//! way out must never stop the rest of the tree from being reclaimed.

use ember_platform::{ReportCode, Severity};

use crate::bus::UsbBus;
use crate::tree::{DeviceId, InterfaceKey};

impl UsbBus {
    /// Removes a device and everything behind it: hub children first, then
    /// attached drivers, then the interface handles, finally the node and its
    /// address. A stale or already removed id is a no-op.
    pub(crate) fn deconfigure_device(&mut self, id: DeviceId) {
        if !self.table.contains(id) {
            return;
        }
        let slots = self
            .table
            .get(id)
            .map(|dev| dev.interfaces.len() as u8)
            .unwrap_or(0);
        for slot in 0..slots {
            self.teardown_interface(id, slot);
        }

        let Some(dev) = self.table.remove(id) else {
            return;
        };
        if let Some(address) = dev.address {
            self.pool.free(address);
        }
        // Unlink from the parent's child slot, unless a replacement already
        // claimed it.
        if let Some(link) = dev.parent {
            if let Some(hub) = self
                .table
                .get_mut(link.device)
                .and_then(|parent| parent.interface_mut(link.interface))
                .and_then(|ctrl| ctrl.hub.as_mut())
            {
                if hub.child(link.port) == Some(id) {
                    hub.ports[link.port as usize] = None;
                }
            }
        }
    }

    fn teardown_interface(&mut self, id: DeviceId, slot: u8) {
        // A hub interface loses its monitoring first, then its subtree.
        let hub_parts = self
            .table
            .get(id)
            .and_then(|dev| dev.interface(slot))
            .and_then(|ctrl| ctrl.hub.as_ref())
            .map(|hub| (hub.poll, hub.ports.clone()));
        if let Some((poll, children)) = hub_parts {
            if let Some(handle) = poll {
                let _ = self.hc.cancel_interrupt_poll(handle);
                self.polls.remove(&handle);
            }
            for child in children.into_iter().flatten() {
                self.deconfigure_device(child);
            }
        }

        let attached = self
            .table
            .get(id)
            .and_then(|dev| dev.interface(slot))
            .map(|ctrl| ctrl.driver_attached)
            .unwrap_or(false);
        if attached {
            // The driver says goodbye while its handle still resolves.
            self.disconnect_driver(InterfaceKey { device: id, interface: slot });
        }

        if let Some(ctrl) = self
            .table
            .get_mut(id)
            .and_then(|dev| dev.interfaces.get_mut(slot as usize))
            .and_then(Option::take)
        {
            self.published.remove(&ctrl.handle);
        }
    }

    /// Detach used by the hotplug paths: teardown plus the unplug report.
    pub(crate) fn detach_subtree(&mut self, id: DeviceId) {
        let link = self.table.get(id).and_then(|dev| dev.parent);
        self.deconfigure_device(id);
        if let Some(link) = link {
            let path = self.port_path(link);
            self.report(path, Severity::Progress, ReportCode::DeviceDetach { port: link.port });
        }
    }
}
