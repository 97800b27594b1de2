//! Hotplug detection and recovery: the periodic root-port scan, status-change
//! reports from external hubs, the two port-reset protocols and the fallback
//! path when a hub's interrupt pipe fails.

use ember_platform::{ReportCode, Severity};

use crate::bus::{PollClient, UsbBus};
use crate::error::{Result, UsbError};
use crate::host::{DataPhase, PollCompletion, PollHandle};
use crate::port::PortFeature;
use crate::proto::SetupPacket;
use crate::tree::{DeviceId, InterfaceKey, ParentLink, PortIndex};

// Root-port reset: drive the reset line, let the bus recover, acknowledge the
// connect change, then enable.
const ROOT_RESET_HOLD_US: u64 = 200 * 1_000;
const ROOT_RESET_RECOVERY_US: u64 = 1_000;
const CONNECT_CLEAR_SETTLE_US: u64 = 500;
const ROOT_ENABLE_SETTLE_US: u64 = 1_000;

// Hub ports run the reset line themselves; software waits out the minimum
// then polls briefly for the completion bit.
const HUB_RESET_SETTLE_US: u64 = 50 * 1_000;
const HUB_RESET_POLL_INTERVAL_US: u64 = 1_000;
const HUB_RESET_POLL_LIMIT: u32 = 10;

impl UsbBus {
    /// Routes one drained interrupt completion to its owner.
    pub(crate) fn dispatch_completion(&mut self, completion: PollCompletion) {
        let Some(client) = self.polls.get(&completion.handle).copied() else {
            // Late delivery for a poll already cancelled.
            return;
        };
        match client {
            PollClient::Hub(key) => match completion.result {
                Ok(data) => self.on_hub_report(key, &data),
                Err(err) => self.on_hub_poll_error(key, completion.handle, err),
            },
            PollClient::Driver(key) => {
                if completion.result.is_err() {
                    // An error delivery retires the poll; resubmission is the
                    // driver's call.
                    self.polls.remove(&completion.handle);
                }
                self.dispatch_driver_poll(key, completion.result);
            }
        }
    }

    pub(crate) fn scan_root_ports(&mut self) {
        for port in 0..self.hc.root_port_count() {
            self.scan_root_port(port);
        }
    }

    fn scan_root_port(&mut self, port: PortIndex) {
        let Ok(state) = self.hc.root_port_state(port) else {
            return;
        };
        if !state.connect_changed() {
            return;
        }
        if self
            .hc
            .clear_root_port_feature(port, PortFeature::ConnectChange)
            .is_err()
        {
            return;
        }
        // Fresh read after the acknowledge; the connect bit decides attach
        // versus detach.
        let Ok(state) = self.hc.root_port_state(port) else {
            return;
        };
        let link = ParentLink { device: self.root, interface: 0, port };
        if state.is_connected() {
            self.handle_port_connect(link);
        } else {
            self.handle_port_disconnect(link);
            let _ = self
                .hc
                .clear_root_port_feature(port, PortFeature::EnableChange);
            // Informational only.
            let _ = self.hc.root_port_state(port);
        }
    }

    /// Shared attach path for root and hub ports: reset, re-check presence,
    /// configure, link and report.
    fn handle_port_connect(&mut self, link: ParentLink) {
        // A replug that beat the scan leaves a stale child on the port.
        if let Some(stale) = self.child_at(link) {
            self.detach_subtree(stale);
        }

        let reset_done = if link.device == self.root {
            self.reset_root_port(link.port)
        } else {
            self.reset_hub_port(link)
        };
        match reset_done {
            Ok(true) => {}
            // Reset never completed; the next change report retries.
            Ok(false) => return,
            Err(err) => {
                tracing::debug!(port = link.port, "port reset failed: {err}");
                return;
            }
        }

        let Ok(state) = self.port_state_at(link) else {
            return;
        };
        if !state.is_connected() {
            // Unplugged while the reset ran.
            return;
        }
        let low_speed = state.is_low_speed();

        match self.configure_device(link, low_speed) {
            Ok(id) => {
                self.link_child(link, id);
                let address = self.device_address(id).unwrap_or(0);
                let path = self.port_path(link);
                self.report(
                    path,
                    Severity::Progress,
                    ReportCode::DeviceAttach { port: link.port, address },
                );
                self.post_configure(id);
            }
            Err(err) => {
                tracing::warn!(port = link.port, "enumeration failed: {err}");
                let path = self.port_path(link);
                let code = match err {
                    UsbError::OutOfResources(_) => ReportCode::OutOfResources,
                    _ => ReportCode::EnumerationFailed { port: link.port },
                };
                self.report(path, Severity::Error, code);
            }
        }
    }

    fn handle_port_disconnect(&mut self, link: ParentLink) {
        if let Some(child) = self.child_at(link) {
            self.detach_subtree(child);
        }
    }

    /// Root ports: software owns the whole timing sequence. Infallible short
    /// of controller errors, hence always `Ok(true)`.
    pub(crate) fn reset_root_port(&mut self, port: PortIndex) -> Result<bool> {
        let path = self.path.child_usb(port, 0);
        self.report(path, Severity::Progress, ReportCode::PortReset { port });

        self.hc.set_root_port_feature(port, PortFeature::Reset)?;
        self.stall_us(ROOT_RESET_HOLD_US);
        self.hc.clear_root_port_feature(port, PortFeature::Reset)?;
        self.stall_us(ROOT_RESET_RECOVERY_US);

        self.hc
            .clear_root_port_feature(port, PortFeature::ConnectChange)?;
        self.stall_us(CONNECT_CLEAR_SETTLE_US);
        self.hc.set_root_port_feature(port, PortFeature::Enable)?;
        self.stall_us(ROOT_ENABLE_SETTLE_US);
        Ok(true)
    }

    /// Hub ports: the hub times the reset line itself and raises a
    /// reset-change bit when done. `Ok(false)` means the bit never showed up
    /// before the polls ran out; the port is left for a later retry.
    pub(crate) fn reset_hub_port(&mut self, link: ParentLink) -> Result<bool> {
        let path = self.port_path(link);
        self.report(path, Severity::Progress, ReportCode::PortReset { port: link.port });

        self.set_port_feature_at(link, PortFeature::Reset)?;
        self.stall_us(HUB_RESET_SETTLE_US);

        let mut completed = false;
        for _ in 0..HUB_RESET_POLL_LIMIT {
            let state = self.port_state_at(link)?;
            if state.reset_changed() {
                completed = true;
                break;
            }
            self.stall_us(HUB_RESET_POLL_INTERVAL_US);
        }
        if !completed {
            tracing::debug!(port = link.port, "hub port reset did not complete");
            return Ok(false);
        }

        self.clear_port_feature_at(link, PortFeature::ResetChange)?;
        let state = self.port_state_at(link)?;
        if state.enable_changed() {
            self.clear_port_feature_at(link, PortFeature::EnableChange)?;
        }
        Ok(true)
    }

    /// One status-change report from an external hub. Bit zero is the hub
    /// itself; the lowest set port bit wins and the rest stay pending in the
    /// hub's own change bits until the next report.
    fn on_hub_report(&mut self, key: InterfaceKey, data: &[u8]) {
        let Some(hub) = self
            .table
            .get_mut(key.device)
            .and_then(|dev| dev.interface_mut(key.interface))
            .and_then(|ctrl| ctrl.hub.as_mut())
        else {
            return;
        };
        let port_count = hub.port_count();

        let mut pending = None;
        for bit in 1..=port_count as usize {
            let set = data
                .get(bit / 8)
                .map_or(false, |byte| byte & (1 << (bit % 8)) != 0);
            if set {
                pending = Some((bit - 1) as PortIndex);
                break;
            }
        }
        let Some(port) = pending else {
            return;
        };
        hub.pending_port = Some(port);
        self.scan_hub_port(key);
    }

    /// Services the one port recorded by the last hub report: acknowledge
    /// every raised change bit with a fresh read after each clear, then run
    /// the attach or detach path if the connection changed.
    fn scan_hub_port(&mut self, key: InterfaceKey) {
        let pending = self
            .table
            .get_mut(key.device)
            .and_then(|dev| dev.interface_mut(key.interface))
            .and_then(|ctrl| ctrl.hub.as_mut())
            .and_then(|hub| hub.pending_port.take());
        let Some(port) = pending else {
            return;
        };
        let link = ParentLink { device: key.device, interface: key.interface, port };

        let Ok(mut state) = self.port_state_at(link) else {
            return;
        };
        let had_connect_change = state.connect_changed();

        for (raised, feature) in [
            (state.enable_changed(), PortFeature::EnableChange),
            (state.reset_changed(), PortFeature::ResetChange),
            (state.overcurrent_changed(), PortFeature::OverCurrentChange),
            (state.connect_changed(), PortFeature::ConnectChange),
        ] {
            if !raised {
                continue;
            }
            if self.clear_port_feature_at(link, feature).is_err() {
                return;
            }
            match self.port_state_at(link) {
                Ok(fresh) => state = fresh,
                Err(_) => return,
            }
        }

        if !had_connect_change {
            return;
        }
        if state.is_connected() {
            self.handle_port_connect(link);
        } else {
            self.handle_port_disconnect(link);
        }
    }

    /// A hub's interrupt pipe failed. Clear the stall if that is what it was,
    /// then decide between resubmitting (hub still on the bus) and tearing
    /// the subtree down (hub gone).
    fn on_hub_poll_error(&mut self, key: InterfaceKey, handle: PollHandle, err: UsbError) {
        self.polls.remove(&handle);
        let _ = self.hc.cancel_interrupt_poll(handle);
        if let Some(hub) = self
            .table
            .get_mut(key.device)
            .and_then(|dev| dev.interface_mut(key.interface))
            .and_then(|ctrl| ctrl.hub.as_mut())
        {
            hub.poll = None;
        } else {
            return;
        }
        tracing::warn!("hub status poll failed: {err}");

        if err == UsbError::Stall {
            if let Some(ep) = self
                .table
                .get(key.device)
                .and_then(|dev| dev.interface(key.interface))
                .and_then(|ctrl| ctrl.hub.as_ref())
                .and_then(|hub| hub.status_ep)
            {
                let _ = self.control_to(
                    key.device,
                    SetupPacket::clear_endpoint_halt(ep.address),
                    DataPhase::None,
                );
            }
        }

        if self.device_physically_present(key.device) {
            if let Err(err) = self.submit_hub_poll(key) {
                tracing::warn!("hub status poll could not be restarted: {err}");
            }
        } else {
            self.detach_subtree(key.device);
        }
    }

    /// Walks parent links to the root, checking the connect bit at every hop.
    /// A device with no parent is the root hub, which is always present.
    fn device_physically_present(&mut self, id: DeviceId) -> bool {
        let mut current = id;
        loop {
            let Some(link) = self.table.get(current).and_then(|dev| dev.parent) else {
                return true;
            };
            match self.port_state_at(link) {
                Ok(state) if state.is_connected() => current = link.device,
                _ => return false,
            }
        }
    }

    /// After a successful configure: offer every interface to the driver
    /// registry, and bring up hub bookkeeping for hub-class interfaces.
    pub(crate) fn post_configure(&mut self, id: DeviceId) {
        let slots = self
            .table
            .get(id)
            .map(|dev| dev.interfaces.len() as u8)
            .unwrap_or(0);
        for slot in 0..slots {
            if self
                .table
                .get(id)
                .and_then(|dev| dev.interface(slot))
                .is_none()
            {
                continue;
            }
            let key = InterfaceKey { device: id, interface: slot };
            self.connect_driver(key);
            let is_hub = self
                .table
                .get(id)
                .map(|dev| dev.slot_is_hub_class(slot))
                .unwrap_or(false);
            if is_hub {
                if let Err(err) = self.configure_hub(key) {
                    tracing::warn!(interface = slot, "hub bring-up failed: {err}");
                }
            }
        }
    }

    fn child_at(&self, link: ParentLink) -> Option<DeviceId> {
        self.table
            .get(link.device)?
            .interface(link.interface)?
            .hub
            .as_ref()?
            .child(link.port)
    }

    fn link_child(&mut self, link: ParentLink, id: DeviceId) {
        if let Some(hub) = self
            .table
            .get_mut(link.device)
            .and_then(|dev| dev.interface_mut(link.interface))
            .and_then(|ctrl| ctrl.hub.as_mut())
        {
            if let Some(slot) = hub.ports.get_mut(link.port as usize) {
                *slot = Some(id);
            }
        }
    }
}
