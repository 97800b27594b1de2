use thiserror::Error;

pub type Result<T> = std::result::Result<T, UsbError>;

/// Unified error for the bus core and the host-controller capability.
///
/// The first group are wire-level transfer outcomes a controller can hand
/// back; the rest are bus-level conditions. `is_transfer_error` separates the
/// two for retry decisions.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum UsbError {
    #[error("endpoint stalled")]
    Stall,
    #[error("device not responding")]
    NoResponse,
    #[error("transfer timed out")]
    Timeout,
    #[error("endpoint had no data ready")]
    Nak,
    #[error("crc or bitstuff error")]
    Crc,
    #[error("device babbled past the end of the transfer")]
    Babble,

    #[error("malformed descriptor: {0}")]
    Descriptor(&'static str),
    #[error("out of resources: {0}")]
    OutOfResources(&'static str),
    #[error("device error: {0}")]
    Device(&'static str),
    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),
    #[error("unsupported: {0}")]
    Unsupported(&'static str),
    #[error("not found: {0}")]
    NotFound(&'static str),
}

impl UsbError {
    /// True for outcomes of a single transfer, as opposed to conditions the
    /// caller got itself into.
    pub fn is_transfer_error(self) -> bool {
        matches!(
            self,
            UsbError::Stall
                | UsbError::NoResponse
                | UsbError::Timeout
                | UsbError::Nak
                | UsbError::Crc
                | UsbError::Babble
        )
    }
}
