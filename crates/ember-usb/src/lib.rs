//! USB bus enumeration and device-tree management for preboot firmware.
//!
//! The crate is built around one **bus controller** per host controller:
//!
//! - [`UsbBus`]: owns the [`HostController`] capability, the 7-bit
//!   [`AddressPool`], the device tree and the root hub, and drives
//!   everything from [`UsbBus::pump`]
//! - [`HostController`]: the seam a real or simulated controller plugs into
//! - [`ClassDriver`] / [`DriverInstance`]: how class drivers bind to the
//!   interfaces the bus publishes, doing I/O through [`UsbIo`]
//! - [`sim`]: a scripted controller and device models for tests
//!
//! Everything runs single threaded: transfers complete synchronously and
//! hotplug work happens inside `pump`, so no state is ever touched from two
//! places at once.

#![forbid(unsafe_code)]

mod address;
mod bus;
mod configure;
mod descriptor;
mod driver;
mod enumerate;
mod error;
mod host;
mod hub;
mod io;
mod port;
mod proto;
pub mod sim;
mod teardown;
mod tree;

pub use address::{AddressPool, UsbAddress};
pub use bus::{
    BusConfig, UsbBus, CONTROL_TIMEOUT_MS, HUB_POLL_INTERVAL_MS, ROOT_SCAN_PERIOD_US,
};
pub use descriptor::{
    ConfigDescriptor, DeviceDescriptor, EndpointDescriptor, InterfaceDescriptor, USB_CLASS_HID,
    USB_CLASS_HUB,
};
pub use driver::{ClassDriver, DriverInstance, DriverRegistry};
pub use error::{Result, UsbError};
pub use host::{
    DataPhase, HcState, HostController, PollCompletion, PollHandle, ResetMode, Target,
};
pub use hub::HubDescriptor;
pub use io::UsbIo;
pub use port::{PortChange, PortFeature, PortState, PortStatus};
pub use proto::{
    SetupPacket, DESC_CONFIGURATION, DESC_DEVICE, DESC_ENDPOINT, DESC_INTERFACE, DESC_STRING,
    DIR_IN, FEATURE_ENDPOINT_HALT, RECIP_DEVICE, RECIP_ENDPOINT, RECIP_INTERFACE, RECIP_OTHER,
    REQ_CLEAR_FEATURE, REQ_GET_CONFIGURATION, REQ_GET_DESCRIPTOR, REQ_GET_STATUS,
    REQ_SET_ADDRESS, REQ_SET_CONFIGURATION, REQ_SET_FEATURE, TYPE_CLASS,
};
pub use tree::{DeviceId, InterfaceKey, ParentLink, PortIndex};

#[cfg(test)]
mod proptests;
