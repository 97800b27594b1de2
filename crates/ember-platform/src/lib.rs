#![forbid(unsafe_code)]

//! Firmware-runtime plumbing shared by the ember driver stack.
//!
//! Preboot drivers run **single threaded**: a dispatcher fires timer and
//! completion callbacks one at a time and every callback runs to completion.
//! This crate provides the primitives that model ties together: a stallable
//! clock (deterministic in tests, monotonic on a host), a same-thread event
//! queue, handle and GUID value types, device-path identities, and the
//! structured status-report sink drivers use for their boot-time audit trail.

mod event;
mod guid;
mod handle;
mod path;
mod report;
mod time;

pub use event::{EventQueue, EventSender};
pub use guid::Guid;
pub use handle::{Handle, HandleAllocator};
pub use path::{DevicePath, PathNode};
pub use report::{LogSink, RecordingSink, ReportCode, Severity, StatusRecord, StatusSink};
pub use time::{Clock, ManualClock, MonotonicClock, PeriodicTimer};
