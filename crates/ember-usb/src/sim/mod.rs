//! A scripted host controller and device models for tests. The controller
//! routes transfers to attached [`SimDevice`] models, paces standing
//! interrupt polls off a shared [`ManualClock`], and logs every operation
//! so tests can assert on the exact wire conversation.

mod devices;

pub use devices::{SimGadget, SimHidKeyboard, SimHidMouse, SimHub};

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use ember_platform::{Clock, ManualClock};

use crate::error::{Result, UsbError};
use crate::host::{
    DataPhase, HcState, HostController, PollCompletion, PollHandle, ResetMode, Target,
};
use crate::port::{PortChange, PortFeature, PortState, PortStatus};
use crate::proto::SetupPacket;

/// Device-side answer to a control transfer.
pub enum SimResponse {
    /// Accepted; carries IN data for IN requests, empty otherwise.
    Ack(Vec<u8>),
    Stall,
    NoResponse,
}

/// Device-side answer to one interrupt IN service.
pub enum SimPollResult {
    Data(Vec<u8>),
    /// Nothing to report this interval.
    Nak,
    Stall,
    NoResponse,
}

/// A modelled device. Implementations are cheap handles over shared state so
/// tests keep a clone to drive the model after attaching it.
pub trait SimDevice {
    /// Current device address, 0 after reset.
    fn address(&self) -> u8;

    fn low_speed(&self) -> bool {
        false
    }

    /// Reset signalling reached the device: back to the default address.
    fn bus_reset(&self);

    /// Wall-clock advance, for models that time things (hub port resets).
    fn tick_ms(&self, _ms: u64) {}

    fn control(&self, setup: SetupPacket, out_data: &[u8]) -> SimResponse;

    fn interrupt_in(&self, endpoint: u8, max_len: usize) -> SimPollResult;

    /// Resolves an address to a device handle, recursing through enabled
    /// downstream ports for hubs.
    fn find_by_address(&self, address: u8) -> Option<Box<dyn SimDevice>>;
}

/// Everything the controller did, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HcOp {
    Reset(ResetMode),
    SetState(HcState),
    RootSetFeature { port: u8, feature: PortFeature },
    RootClearFeature { port: u8, feature: PortFeature },
    Control { address: u8, setup: SetupPacket },
    SubmitPoll { address: u8, endpoint: u8 },
    CancelPoll { handle: u32 },
}

struct SimRootPort {
    device: Option<Box<dyn SimDevice>>,
    status: PortStatus,
    change: PortChange,
}

struct PollReg {
    address: u8,
    endpoint: u8,
    max_len: usize,
    interval_ms: u32,
    next_due_ms: u64,
}

struct SimCore {
    state: HcState,
    ports: Vec<SimRootPort>,
    polls: BTreeMap<PollHandle, PollReg>,
    completions: VecDeque<PollCompletion>,
    next_poll: u32,
    last_tick_ms: u64,
    ops: Vec<HcOp>,
}

impl SimCore {
    fn route(&self, address: u8) -> Option<Box<dyn SimDevice>> {
        for port in &self.ports {
            if !port.status.contains(PortStatus::ENABLE) {
                continue;
            }
            if let Some(device) = &port.device {
                if let Some(found) = device.find_by_address(address) {
                    return Some(found);
                }
            }
        }
        None
    }
}

/// The simulated controller. Cloning shares the underlying state, so a test
/// clones before boxing one copy into the bus.
#[derive(Clone)]
pub struct SimHostController {
    core: Rc<RefCell<SimCore>>,
    clock: ManualClock,
}

impl SimHostController {
    pub fn new(root_ports: u8, clock: ManualClock) -> Self {
        let last_tick_ms = clock.now_us() / 1_000;
        let ports = (0..root_ports)
            .map(|_| SimRootPort {
                device: None,
                status: PortStatus::POWER,
                change: PortChange::empty(),
            })
            .collect();
        Self {
            core: Rc::new(RefCell::new(SimCore {
                state: HcState::Halted,
                ports,
                polls: BTreeMap::new(),
                completions: VecDeque::new(),
                next_poll: 1,
                last_tick_ms,
                ops: Vec::new(),
            })),
            clock,
        }
    }

    pub fn clock(&self) -> ManualClock {
        self.clock.clone()
    }

    /// Plugs a device model into a root port, latching the connect change.
    pub fn attach_root(&self, port: u8, device: Box<dyn SimDevice>) {
        let low_speed = device.low_speed();
        let mut core = self.core.borrow_mut();
        let port = &mut core.ports[port as usize];
        port.device = Some(device);
        port.status.insert(PortStatus::CONNECTION);
        port.status.set(PortStatus::LOW_SPEED, low_speed);
        port.status.remove(PortStatus::ENABLE);
        port.change.insert(PortChange::CONNECTION);
    }

    /// Pulls whatever is in the root port, latching the connect change.
    pub fn detach_root(&self, port: u8) {
        let mut core = self.core.borrow_mut();
        let port = &mut core.ports[port as usize];
        port.device = None;
        port.status
            .remove(PortStatus::CONNECTION | PortStatus::ENABLE | PortStatus::LOW_SPEED);
        port.change.insert(PortChange::CONNECTION);
    }

    pub fn ops(&self) -> Vec<HcOp> {
        self.core.borrow().ops.clone()
    }

    pub fn take_ops(&self) -> Vec<HcOp> {
        std::mem::take(&mut self.core.borrow_mut().ops)
    }

    /// Control setups sent to one address, for conversation-level asserts.
    pub fn controls_to(&self, address: u8) -> Vec<SetupPacket> {
        self.core
            .borrow()
            .ops
            .iter()
            .filter_map(|op| match op {
                HcOp::Control { address: a, setup } if *a == address => Some(*setup),
                _ => None,
            })
            .collect()
    }

    pub fn reset_count(&self, port: u8) -> usize {
        self.core
            .borrow()
            .ops
            .iter()
            .filter(|op| {
                matches!(
                    op,
                    HcOp::RootSetFeature { port: p, feature: PortFeature::Reset } if *p == port
                )
            })
            .count()
    }

    pub fn active_poll_count(&self) -> usize {
        self.core.borrow().polls.len()
    }

    /// Advances model time and services due polls. Runs at the head of every
    /// controller entry point so models see time move with the bus clock.
    fn sync(&self) {
        let now_ms = self.clock.now_us() / 1_000;

        {
            let mut core = self.core.borrow_mut();
            let elapsed = now_ms.saturating_sub(core.last_tick_ms);
            if elapsed > 0 {
                core.last_tick_ms = now_ms;
                for port in &core.ports {
                    if let Some(device) = &port.device {
                        device.tick_ms(elapsed);
                    }
                }
            }
        }

        // Due polls fire at most once per sync to keep tests deterministic
        // across large clock jumps.
        let due: Vec<(PollHandle, u8, u8, usize)> = {
            let mut core = self.core.borrow_mut();
            let mut due = Vec::new();
            for (handle, reg) in core.polls.iter_mut() {
                if reg.next_due_ms <= now_ms {
                    reg.next_due_ms = now_ms + reg.interval_ms as u64;
                    due.push((*handle, reg.address, reg.endpoint, reg.max_len));
                }
            }
            due
        };

        for (handle, address, endpoint, max_len) in due {
            let device = self.core.borrow().route(address);
            let outcome = match device {
                Some(device) => device.interrupt_in(endpoint, max_len),
                None => SimPollResult::NoResponse,
            };
            let mut core = self.core.borrow_mut();
            match outcome {
                SimPollResult::Nak => {}
                SimPollResult::Data(mut data) => {
                    data.truncate(max_len);
                    core.completions
                        .push_back(PollCompletion { handle, result: Ok(data) });
                }
                SimPollResult::Stall => {
                    core.polls.remove(&handle);
                    core.completions
                        .push_back(PollCompletion { handle, result: Err(UsbError::Stall) });
                }
                SimPollResult::NoResponse => {
                    core.polls.remove(&handle);
                    core.completions.push_back(PollCompletion {
                        handle,
                        result: Err(UsbError::NoResponse),
                    });
                }
            }
        }
    }

    fn require_running(&self) -> Result<()> {
        if self.core.borrow().state != HcState::Operational {
            return Err(UsbError::Device("controller not running"));
        }
        Ok(())
    }
}

impl HostController for SimHostController {
    fn root_port_count(&self) -> u8 {
        self.core.borrow().ports.len() as u8
    }

    fn reset(&mut self, mode: ResetMode) -> Result<()> {
        self.sync();
        let mut core = self.core.borrow_mut();
        core.ops.push(HcOp::Reset(mode));
        core.state = HcState::Halted;
        if mode == ResetMode::Global {
            for port in &mut core.ports {
                port.status.remove(PortStatus::ENABLE);
                if let Some(device) = &port.device {
                    device.bus_reset();
                    // Hardware re-reports a present connection after a bus
                    // reset, so a restarted driver rediscovers the device.
                    port.change.insert(PortChange::CONNECTION);
                }
            }
        }
        Ok(())
    }

    fn set_state(&mut self, state: HcState) -> Result<()> {
        self.sync();
        let mut core = self.core.borrow_mut();
        core.ops.push(HcOp::SetState(state));
        core.state = state;
        Ok(())
    }

    fn root_port_state(&mut self, port: u8) -> Result<PortState> {
        self.sync();
        let core = self.core.borrow();
        let port = core
            .ports
            .get(port as usize)
            .ok_or(UsbError::InvalidParameter("no such root port"))?;
        Ok(PortState { status: port.status, change: port.change })
    }

    fn set_root_port_feature(&mut self, port: u8, feature: PortFeature) -> Result<()> {
        self.sync();
        let mut core = self.core.borrow_mut();
        core.ops.push(HcOp::RootSetFeature { port, feature });
        let port = core
            .ports
            .get_mut(port as usize)
            .ok_or(UsbError::InvalidParameter("no such root port"))?;
        match feature {
            PortFeature::Reset => {
                port.status.insert(PortStatus::RESET);
                port.status.remove(PortStatus::ENABLE);
                if let Some(device) = &port.device {
                    device.bus_reset();
                }
            }
            PortFeature::Enable => {
                if port.status.contains(PortStatus::CONNECTION) {
                    port.status.insert(PortStatus::ENABLE);
                }
            }
            PortFeature::Power => {
                port.status.insert(PortStatus::POWER);
            }
            PortFeature::Suspend => {
                port.status.insert(PortStatus::SUSPEND);
            }
            _ => {}
        }
        Ok(())
    }

    fn clear_root_port_feature(&mut self, port: u8, feature: PortFeature) -> Result<()> {
        self.sync();
        let mut core = self.core.borrow_mut();
        core.ops.push(HcOp::RootClearFeature { port, feature });
        let port = core
            .ports
            .get_mut(port as usize)
            .ok_or(UsbError::InvalidParameter("no such root port"))?;
        match feature {
            PortFeature::Reset => port.status.remove(PortStatus::RESET),
            PortFeature::Enable => port.status.remove(PortStatus::ENABLE),
            PortFeature::Suspend => port.status.remove(PortStatus::SUSPEND),
            PortFeature::Power => port.status.remove(PortStatus::POWER),
            PortFeature::ConnectChange => port.change.remove(PortChange::CONNECTION),
            PortFeature::EnableChange => port.change.remove(PortChange::ENABLE),
            PortFeature::SuspendChange => port.change.remove(PortChange::SUSPEND),
            PortFeature::OverCurrentChange => port.change.remove(PortChange::OVER_CURRENT),
            PortFeature::ResetChange => port.change.remove(PortChange::RESET),
        }
        Ok(())
    }

    fn control_transfer(
        &mut self,
        target: Target,
        setup: SetupPacket,
        data: DataPhase<'_>,
        _timeout_ms: u32,
    ) -> Result<usize> {
        self.sync();
        self.require_running()?;
        self.core
            .borrow_mut()
            .ops
            .push(HcOp::Control { address: target.address, setup });

        let device = self
            .core
            .borrow()
            .route(target.address)
            .ok_or(UsbError::NoResponse)?;

        match data {
            DataPhase::None => match device.control(setup, &[]) {
                SimResponse::Ack(_) => Ok(0),
                SimResponse::Stall => Err(UsbError::Stall),
                SimResponse::NoResponse => Err(UsbError::NoResponse),
            },
            DataPhase::Out(buf) => match device.control(setup, buf) {
                SimResponse::Ack(_) => Ok(buf.len()),
                SimResponse::Stall => Err(UsbError::Stall),
                SimResponse::NoResponse => Err(UsbError::NoResponse),
            },
            DataPhase::In(buf) => match device.control(setup, &[]) {
                SimResponse::Ack(bytes) => {
                    let n = bytes.len().min(buf.len());
                    buf[..n].copy_from_slice(&bytes[..n]);
                    Ok(n)
                }
                SimResponse::Stall => Err(UsbError::Stall),
                SimResponse::NoResponse => Err(UsbError::NoResponse),
            },
        }
    }

    fn bulk_transfer(
        &mut self,
        target: Target,
        endpoint: u8,
        toggle: &mut bool,
        data: &mut [u8],
        _timeout_ms: u32,
    ) -> Result<usize> {
        self.sync();
        self.require_running()?;
        let device = self
            .core
            .borrow()
            .route(target.address)
            .ok_or(UsbError::NoResponse)?;
        if endpoint & 0x80 != 0 {
            match device.interrupt_in(endpoint, data.len()) {
                SimPollResult::Data(bytes) => {
                    let n = bytes.len().min(data.len());
                    data[..n].copy_from_slice(&bytes[..n]);
                    *toggle = !*toggle;
                    Ok(n)
                }
                SimPollResult::Nak => Err(UsbError::Timeout),
                SimPollResult::Stall => Err(UsbError::Stall),
                SimPollResult::NoResponse => Err(UsbError::NoResponse),
            }
        } else {
            // Models accept OUT data without inspecting it.
            *toggle = !*toggle;
            Ok(data.len())
        }
    }

    fn sync_interrupt_transfer(
        &mut self,
        target: Target,
        endpoint: u8,
        toggle: &mut bool,
        data: &mut [u8],
        timeout_ms: u32,
    ) -> Result<usize> {
        self.bulk_transfer(target, endpoint, toggle, data, timeout_ms)
    }

    fn submit_interrupt_poll(
        &mut self,
        target: Target,
        endpoint: u8,
        max_len: usize,
        interval_ms: u32,
    ) -> Result<PollHandle> {
        self.sync();
        self.require_running()?;
        let now_ms = self.clock.now_us() / 1_000;
        let mut core = self.core.borrow_mut();
        core.ops.push(HcOp::SubmitPoll { address: target.address, endpoint });
        let handle = PollHandle::new(core.next_poll);
        core.next_poll += 1;
        core.polls.insert(
            handle,
            PollReg {
                address: target.address,
                endpoint,
                max_len,
                interval_ms,
                next_due_ms: now_ms + interval_ms as u64,
            },
        );
        Ok(handle)
    }

    fn cancel_interrupt_poll(&mut self, handle: PollHandle) -> Result<()> {
        self.sync();
        let mut core = self.core.borrow_mut();
        core.ops.push(HcOp::CancelPoll { handle: handle.raw() });
        // Unknown handles are tolerated; cancel after retire is a no-op.
        core.polls.remove(&handle);
        Ok(())
    }

    fn take_completions(&mut self) -> Vec<PollCompletion> {
        self.sync();
        self.core.borrow_mut().completions.drain(..).collect()
    }
}
