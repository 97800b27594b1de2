//! The bus controller: owns the host-controller capability, the address
//! pool, the device table and the root hub, and runs the whole stack from
//! [`UsbBus::pump`]. The enumeration, configuration, teardown and hub logic
//! live in their own modules as further `impl UsbBus` blocks.

use std::collections::BTreeMap;

use ember_platform::{
    Clock, DevicePath, Handle, HandleAllocator, PeriodicTimer, ReportCode, Severity, StatusRecord,
    StatusSink,
};

use crate::address::{AddressPool, UsbAddress};
use crate::descriptor::DeviceDescriptor;
use crate::driver::DriverRegistry;
use crate::error::{Result, UsbError};
use crate::host::{DataPhase, HcState, HostController, PollHandle, ResetMode, Target};
use crate::io::UsbIo;
use crate::port::{PortFeature, PortState};
use crate::proto::SetupPacket;
use crate::tree::{
    DeviceId, DeviceTable, HubState, InterfaceController, InterfaceKey, ParentLink, PortIndex,
    UsbDevice,
};

pub const CONTROL_TIMEOUT_MS: u32 = 3_000;
pub const ROOT_SCAN_PERIOD_US: u64 = 1_000_000;
pub const HUB_POLL_INTERVAL_MS: u32 = 100;

/// Timing knobs, defaulting to the values the enumeration protocol was tuned
/// for. Tests run the defaults against a manual clock.
#[derive(Clone, Copy, Debug)]
pub struct BusConfig {
    pub root_scan_period_us: u64,
    pub hub_poll_interval_ms: u32,
    pub control_timeout_ms: u32,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            root_scan_period_us: ROOT_SCAN_PERIOD_US,
            hub_poll_interval_ms: HUB_POLL_INTERVAL_MS,
            control_timeout_ms: CONTROL_TIMEOUT_MS,
        }
    }
}

/// Who a standing interrupt poll belongs to.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum PollClient {
    Hub(InterfaceKey),
    Driver(InterfaceKey),
}

pub struct UsbBus {
    pub(crate) hc: Box<dyn HostController>,
    pub(crate) clock: Box<dyn Clock>,
    pub(crate) config: BusConfig,
    pub(crate) path: DevicePath,
    pub(crate) sink: Box<dyn StatusSink>,
    pub(crate) pool: AddressPool,
    pub(crate) table: DeviceTable,
    pub(crate) root: DeviceId,
    pub(crate) drivers: DriverRegistry,
    pub(crate) handles: HandleAllocator,
    pub(crate) published: BTreeMap<Handle, InterfaceKey>,
    pub(crate) polls: BTreeMap<PollHandle, PollClient>,
    scan_timer: PeriodicTimer,
}

impl UsbBus {
    /// Brings the controller up and installs the root hub.
    ///
    /// Address 1 is reserved for the root before anything else can take it.
    /// Failure leaves no trace: every resource acquired on the way is local
    /// and unwinds with the partially built value.
    pub fn start(
        hc: Box<dyn HostController>,
        path: DevicePath,
        drivers: DriverRegistry,
        sink: Box<dyn StatusSink>,
        clock: Box<dyn Clock>,
        config: BusConfig,
    ) -> Result<UsbBus> {
        let root_ports = hc.root_port_count();

        let mut pool = AddressPool::new();
        let _ = pool.reserve(UsbAddress::ROOT_HUB);

        let mut handles = HandleAllocator::new();
        let mut published = BTreeMap::new();
        let mut table = DeviceTable::new();

        let mut root_dev = UsbDevice::bare(path.clone(), false, None);
        root_dev.address = Some(UsbAddress::ROOT_HUB);
        root_dev.configured = true;
        let root_handle = handles.alloc();
        let mut root_hub = HubState::new(root_ports);
        root_hub.status_ep = None;
        root_dev.interfaces = vec![Some(InterfaceController {
            interface_number: 0,
            config_value: 0,
            handle: root_handle,
            path: path.clone(),
            driver_attached: false,
            hub: Some(root_hub),
        })];
        let root = table.insert(root_dev);
        published.insert(root_handle, InterfaceKey { device: root, interface: 0 });

        let now = clock.now_us();
        let mut bus = UsbBus {
            hc,
            clock,
            config,
            path,
            sink,
            pool,
            table,
            root,
            drivers,
            handles,
            published,
            polls: BTreeMap::new(),
            scan_timer: PeriodicTimer::new(config.root_scan_period_us, now),
        };

        bus.report(bus.path.clone(), Severity::Progress, ReportCode::ControllerReset);
        if let Err(err) = bus.hc.reset(ResetMode::Global) {
            bus.report(bus.path.clone(), Severity::Error, ReportCode::ControllerReset);
            return Err(err);
        }

        bus.report(bus.path.clone(), Severity::Progress, ReportCode::ControllerEnable);
        if let Err(err) = bus.hc.set_state(HcState::Operational) {
            bus.report(bus.path.clone(), Severity::Error, ReportCode::ControllerEnable);
            return Err(err);
        }

        Ok(bus)
    }

    /// One turn of the dispatch loop: drain interrupt completions, then the
    /// root scan timer. All enumeration work happens inside this call.
    pub fn pump(&mut self) {
        for completion in self.hc.take_completions() {
            self.dispatch_completion(completion);
        }
        let now = self.clock.now_us();
        if self.scan_timer.due(now) {
            self.scan_root_ports();
        }
    }

    /// Tears down only the devices behind the named child handles. A handle
    /// names one interface; the device behind it goes down whole, siblings
    /// included.
    pub fn stop_children(&mut self, children: &[Handle]) -> Result<()> {
        for handle in children {
            let Some(key) = self.published.get(handle).copied() else {
                continue;
            };
            self.detach_subtree(key.device);
        }
        Ok(())
    }

    /// Full stop: halt the controller, then collapse the whole tree through
    /// the root. Consumes the bus; the scan timer dies with it.
    pub fn stop(mut self) {
        self.report(self.path.clone(), Severity::Progress, ReportCode::ControllerHalt);
        let _ = self.hc.set_state(HcState::Halted);
        let root = self.root;
        self.deconfigure_device(root);
    }

    pub fn root_id(&self) -> DeviceId {
        self.root
    }

    pub fn bus_path(&self) -> &DevicePath {
        &self.path
    }

    /// Borrow the per-interface I/O surface for a configured interface.
    pub fn io(&mut self, key: InterfaceKey) -> Result<UsbIo<'_>> {
        if self
            .table
            .get(key.device)
            .and_then(|dev| dev.interface(key.interface))
            .is_none()
        {
            return Err(UsbError::NotFound("interface"));
        }
        Ok(UsbIo::new(self, key))
    }

    pub fn io_by_handle(&mut self, handle: Handle) -> Result<UsbIo<'_>> {
        let key = self
            .published
            .get(&handle)
            .copied()
            .ok_or(UsbError::NotFound("handle"))?;
        self.io(key)
    }

    // Introspection, mostly for embedders walking the tree and for tests.

    pub fn device_count(&self) -> usize {
        self.table.len()
    }

    pub fn live_addresses(&self) -> usize {
        self.pool.live()
    }

    pub fn root_child(&self, port: PortIndex) -> Option<DeviceId> {
        self.child_of(self.root, port)
    }

    /// Child behind a device's first hub interface at the given port.
    pub fn child_of(&self, id: DeviceId, port: PortIndex) -> Option<DeviceId> {
        let dev = self.table.get(id)?;
        dev.interfaces
            .iter()
            .flatten()
            .find_map(|ctrl| ctrl.hub.as_ref())
            .and_then(|hub| hub.child(port))
    }

    pub fn device_address(&self, id: DeviceId) -> Option<u8> {
        self.table.get(id)?.address.map(UsbAddress::get)
    }

    pub fn device_descriptor_of(&self, id: DeviceId) -> Option<&DeviceDescriptor> {
        self.table.get(id)?.descriptor.as_ref()
    }

    pub fn device_product(&self, id: DeviceId) -> Option<&str> {
        self.table.get(id)?.product.as_deref()
    }

    pub fn interface_handles(&self, id: DeviceId) -> Vec<Handle> {
        self.table
            .get(id)
            .map(|dev| {
                dev.interfaces
                    .iter()
                    .flatten()
                    .map(|ctrl| ctrl.handle)
                    .collect()
            })
            .unwrap_or_default()
    }

    // Shared plumbing for the sibling impl blocks.

    pub(crate) fn report(&mut self, path: DevicePath, severity: Severity, code: ReportCode) {
        self.sink.report(StatusRecord {
            path,
            severity,
            code,
        });
    }

    pub(crate) fn stall_us(&mut self, us: u64) {
        self.clock.stall_us(us);
    }

    pub(crate) fn device_target(&self, id: DeviceId) -> Result<Target> {
        let dev = self.table.get(id).ok_or(UsbError::NotFound("device"))?;
        Ok(Target {
            address: dev.address.map_or(0, UsbAddress::get),
            low_speed: dev.low_speed,
            max_packet: dev.max_packet0 as u16,
        })
    }

    /// Control transfer on the device's default pipe, current address.
    pub(crate) fn control_to(
        &mut self,
        id: DeviceId,
        setup: SetupPacket,
        data: DataPhase<'_>,
    ) -> Result<usize> {
        let target = self.device_target(id)?;
        let timeout = self.config.control_timeout_ms;
        self.hc.control_transfer(target, setup, data, timeout)
    }

    /// Port state behind a parent link, root register file or hub class
    /// request as appropriate.
    pub(crate) fn port_state_at(&mut self, link: ParentLink) -> Result<PortState> {
        if link.device == self.root {
            self.hc.root_port_state(link.port)
        } else {
            self.hub_port_state(link.device, link.port)
        }
    }

    pub(crate) fn set_port_feature_at(
        &mut self,
        link: ParentLink,
        feature: PortFeature,
    ) -> Result<()> {
        if link.device == self.root {
            self.hc.set_root_port_feature(link.port, feature)
        } else {
            self.hub_set_port_feature(link.device, link.port, feature)
        }
    }

    pub(crate) fn clear_port_feature_at(
        &mut self,
        link: ParentLink,
        feature: PortFeature,
    ) -> Result<()> {
        if link.device == self.root {
            self.hc.clear_root_port_feature(link.port, feature)
        } else {
            self.hub_clear_port_feature(link.device, link.port, feature)
        }
    }

    /// Path of whatever sits at a port, for status records about it.
    pub(crate) fn port_path(&self, link: ParentLink) -> DevicePath {
        self.table
            .get(link.device)
            .map(|dev| dev.path.child_usb(link.port, 0))
            .unwrap_or_else(|| self.path.child_usb(link.port, 0))
    }
}
