//! The host-controller capability the bus core drives. Hardware drivers and
//! the software simulator both implement [`HostController`]; the core never
//! sees past this trait.

use crate::error::Result;
use crate::port::{PortFeature, PortState};
use crate::proto::SetupPacket;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResetMode {
    /// Bus-wide reset signalling on every port.
    Global,
    /// Controller-local reset, ports untouched.
    Controller,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HcState {
    Halted,
    Operational,
}

/// Data stage of a control transfer.
pub enum DataPhase<'a> {
    None,
    In(&'a mut [u8]),
    Out(&'a [u8]),
}

/// Per-transfer addressing: where the packets go and how they are paced.
/// Carried per call because one device's addressing changes mid-enumeration
/// (address 0 before SET_ADDRESS, a real address after).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Target {
    pub address: u8,
    pub low_speed: bool,
    pub max_packet: u16,
}

/// Identity of one standing interrupt poll.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct PollHandle(u32);

impl PollHandle {
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

/// One delivery from a standing interrupt poll, drained via
/// [`HostController::take_completions`].
#[derive(Debug)]
pub struct PollCompletion {
    pub handle: PollHandle,
    pub result: Result<Vec<u8>>,
}

/// Abstract host controller.
///
/// Transfers are synchronous: the controller busy-waits or polls internally
/// and returns the outcome. The one asynchronous surface is interrupt
/// polling: `submit_interrupt_poll` registers a standing periodic IN poll
/// whose deliveries accumulate until the owner drains them. A successful
/// delivery leaves the poll standing; an error delivery retires it, and the
/// owner must submit again if it wants more.
pub trait HostController {
    fn root_port_count(&self) -> u8;

    fn reset(&mut self, mode: ResetMode) -> Result<()>;

    fn set_state(&mut self, state: HcState) -> Result<()>;

    fn root_port_state(&mut self, port: u8) -> Result<PortState>;

    fn set_root_port_feature(&mut self, port: u8, feature: PortFeature) -> Result<()>;

    fn clear_root_port_feature(&mut self, port: u8, feature: PortFeature) -> Result<()>;

    /// Returns the number of data-stage bytes transferred.
    fn control_transfer(
        &mut self,
        target: Target,
        setup: SetupPacket,
        data: DataPhase<'_>,
        timeout_ms: u32,
    ) -> Result<usize>;

    /// `endpoint` carries the direction bit; `toggle` is the caller's
    /// per-endpoint data toggle, updated to reflect the bus state on return.
    fn bulk_transfer(
        &mut self,
        target: Target,
        endpoint: u8,
        toggle: &mut bool,
        data: &mut [u8],
        timeout_ms: u32,
    ) -> Result<usize>;

    fn sync_interrupt_transfer(
        &mut self,
        target: Target,
        endpoint: u8,
        toggle: &mut bool,
        data: &mut [u8],
        timeout_ms: u32,
    ) -> Result<usize>;

    fn submit_interrupt_poll(
        &mut self,
        target: Target,
        endpoint: u8,
        max_len: usize,
        interval_ms: u32,
    ) -> Result<PollHandle>;

    /// Retires a standing poll. Unknown handles are fine; cancelling after an
    /// error delivery already retired the poll must not fail.
    fn cancel_interrupt_poll(&mut self, handle: PollHandle) -> Result<()>;

    fn take_completions(&mut self) -> Vec<PollCompletion>;
}
