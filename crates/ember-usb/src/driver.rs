//! The seam between the bus and class drivers. A [`ClassDriver`] is a
//! factory consulted per interface; a started [`DriverInstance`] then lives
//! until the interface disappears or the bus stops it.

use std::collections::BTreeMap;

use crate::bus::UsbBus;
use crate::descriptor::{DeviceDescriptor, InterfaceDescriptor};
use crate::error::Result;
use crate::io::UsbIo;
use crate::tree::InterfaceKey;

pub trait ClassDriver {
    fn name(&self) -> &'static str;

    /// Match on descriptors alone; no I/O happens at match time.
    fn supports(&self, device: &DeviceDescriptor, interface: &InterfaceDescriptor) -> bool;

    /// Binds to the interface. Drivers typically read class descriptors,
    /// push class requests and start an interrupt poll here. Failing leaves
    /// the interface free for the next candidate.
    fn start(&mut self, io: &mut UsbIo<'_>) -> Result<Box<dyn DriverInstance>>;
}

pub trait DriverInstance {
    /// One delivery from an interrupt poll this instance started. An `Err`
    /// delivery means the poll has been retired; restarting it is this
    /// instance's decision.
    fn on_poll(&mut self, io: &mut UsbIo<'_>, result: Result<Vec<u8>>);

    /// The interface is going away; the handle still resolves for final
    /// requests.
    fn stop(&mut self, io: &mut UsbIo<'_>);
}

/// Registered drivers plus the instances currently bound, keyed by
/// interface. Owned by the bus; embedders fill it before `UsbBus::start`.
#[derive(Default)]
pub struct DriverRegistry {
    drivers: Vec<Box<dyn ClassDriver>>,
    instances: BTreeMap<InterfaceKey, Box<dyn DriverInstance>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, driver: Box<dyn ClassDriver>) {
        self.drivers.push(driver);
    }

    pub fn bound_interfaces(&self) -> Vec<InterfaceKey> {
        self.instances.keys().copied().collect()
    }
}

// Driver dispatch. The registry is taken out of the bus for the duration of
// every driver call so the callback can borrow the bus through `UsbIo`.
impl UsbBus {
    pub(crate) fn connect_driver(&mut self, key: InterfaceKey) {
        let Some((device_desc, iface_desc)) = self.table.get(key.device).and_then(|dev| {
            let device = dev.descriptor.clone()?;
            let iface = dev.interface_descriptor(key.interface)?.clone();
            Some((device, iface))
        }) else {
            return;
        };

        let mut registry = std::mem::take(&mut self.drivers);
        let mut bound = None;
        for driver in registry.drivers.iter_mut() {
            if !driver.supports(&device_desc, &iface_desc) {
                continue;
            }
            let mut io = UsbIo::new(self, key);
            match driver.start(&mut io) {
                Ok(instance) => {
                    bound = Some((driver.name(), instance));
                    break;
                }
                Err(err) => {
                    tracing::debug!(driver = driver.name(), "driver declined interface: {err}");
                }
            }
        }
        if let Some((name, instance)) = bound {
            registry.instances.insert(key, instance);
            if let Some(ctrl) = self
                .table
                .get_mut(key.device)
                .and_then(|dev| dev.interface_mut(key.interface))
            {
                ctrl.driver_attached = true;
            }
            tracing::debug!(driver = name, "driver bound");
        }
        self.drivers = registry;
    }

    pub(crate) fn disconnect_driver(&mut self, key: InterfaceKey) {
        let mut registry = std::mem::take(&mut self.drivers);
        if let Some(mut instance) = registry.instances.remove(&key) {
            let mut io = UsbIo::new(self, key);
            instance.stop(&mut io);
        }
        self.drivers = registry;
        if let Some(ctrl) = self
            .table
            .get_mut(key.device)
            .and_then(|dev| dev.interface_mut(key.interface))
        {
            ctrl.driver_attached = false;
        }
    }

    pub(crate) fn dispatch_driver_poll(&mut self, key: InterfaceKey, result: Result<Vec<u8>>) {
        let mut registry = std::mem::take(&mut self.drivers);
        if let Some(instance) = registry.instances.get_mut(&key) {
            let mut io = UsbIo::new(self, key);
            instance.on_poll(&mut io, result);
        }
        self.drivers = registry;
    }
}
