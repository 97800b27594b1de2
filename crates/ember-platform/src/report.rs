use std::cell::RefCell;
use std::rc::Rc;

use crate::path::DevicePath;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Severity {
    Progress,
    Error,
}

/// What happened, with enough structure for a POST display to act on it.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ReportCode {
    ControllerReset,
    ControllerEnable,
    ControllerHalt,
    PortReset { port: u8 },
    DeviceAttach { port: u8, address: u8 },
    DeviceDetach { port: u8 },
    EnumerationFailed { port: u8 },
    OutOfResources,
}

/// One entry in the boot-time audit trail: which device (by physical path),
/// how severe, and what happened.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct StatusRecord {
    pub path: DevicePath,
    pub severity: Severity,
    pub code: ReportCode,
}

/// Where drivers put their audit trail. The sink is supplied at driver start;
/// the core never talks to a concrete status-code taxonomy directly.
pub trait StatusSink {
    fn report(&mut self, record: StatusRecord);
}

/// Forwards records to `tracing`. Errors become warnings, progress is debug.
#[derive(Debug, Default)]
pub struct LogSink;

impl StatusSink for LogSink {
    fn report(&mut self, record: StatusRecord) {
        match record.severity {
            Severity::Progress => {
                tracing::debug!("{}: {:?}", record.path, record.code);
            }
            Severity::Error => {
                tracing::warn!("{}: {:?}", record.path, record.code);
            }
        }
    }
}

/// Captures records into a shared buffer; clones observe the same buffer, so
/// a test can keep one clone and hand the other to the driver under test.
#[derive(Clone, Debug, Default)]
pub struct RecordingSink {
    records: Rc<RefCell<Vec<StatusRecord>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<StatusRecord> {
        self.records.borrow().clone()
    }

    pub fn codes(&self) -> Vec<ReportCode> {
        self.records.borrow().iter().map(|r| r.code).collect()
    }
}

impl StatusSink for RecordingSink {
    fn report(&mut self, record: StatusRecord) {
        self.records.borrow_mut().push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_sink_clones_share_one_buffer() {
        let sink = RecordingSink::new();
        let mut handle: Box<dyn StatusSink> = Box::new(sink.clone());
        handle.report(StatusRecord {
            path: DevicePath::pci(0, 2),
            severity: Severity::Progress,
            code: ReportCode::ControllerReset,
        });
        assert_eq!(sink.codes(), vec![ReportCode::ControllerReset]);
    }
}
