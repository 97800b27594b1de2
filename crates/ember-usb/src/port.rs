use bitflags::bitflags;

bitflags! {
    /// Current-state half of a port's 16-bit status word.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
    pub struct PortStatus: u16 {
        const CONNECTION = 1 << 0;
        const ENABLE = 1 << 1;
        const SUSPEND = 1 << 2;
        const OVER_CURRENT = 1 << 3;
        const RESET = 1 << 4;
        const POWER = 1 << 8;
        const LOW_SPEED = 1 << 9;
        const HIGH_SPEED = 1 << 10;
    }
}

bitflags! {
    /// Change half of the status word. A set bit means the matching state
    /// transitioned since software last cleared it; handling a change always
    /// ends with an explicit clear.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
    pub struct PortChange: u16 {
        const CONNECTION = 1 << 0;
        const ENABLE = 1 << 1;
        const SUSPEND = 1 << 2;
        const OVER_CURRENT = 1 << 3;
        const RESET = 1 << 4;
    }
}

/// Both halves of a port status read, with the predicates the enumeration
/// logic is written in terms of. Pure data; all the protocol state lives in
/// the hub or controller that reported it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct PortState {
    pub status: PortStatus,
    pub change: PortChange,
}

impl PortState {
    pub fn from_words(status: u16, change: u16) -> Self {
        Self {
            status: PortStatus::from_bits_truncate(status),
            change: PortChange::from_bits_truncate(change),
        }
    }

    pub fn is_connected(self) -> bool {
        self.status.contains(PortStatus::CONNECTION)
    }

    pub fn is_enabled(self) -> bool {
        self.status.contains(PortStatus::ENABLE)
    }

    pub fn is_suspended(self) -> bool {
        self.status.contains(PortStatus::SUSPEND)
    }

    pub fn is_in_reset(self) -> bool {
        self.status.contains(PortStatus::RESET)
    }

    pub fn is_powered(self) -> bool {
        self.status.contains(PortStatus::POWER)
    }

    pub fn is_low_speed(self) -> bool {
        self.status.contains(PortStatus::LOW_SPEED)
    }

    pub fn connect_changed(self) -> bool {
        self.change.contains(PortChange::CONNECTION)
    }

    pub fn enable_changed(self) -> bool {
        self.change.contains(PortChange::ENABLE)
    }

    pub fn suspend_changed(self) -> bool {
        self.change.contains(PortChange::SUSPEND)
    }

    pub fn overcurrent_changed(self) -> bool {
        self.change.contains(PortChange::OVER_CURRENT)
    }

    pub fn reset_changed(self) -> bool {
        self.change.contains(PortChange::RESET)
    }
}

/// Feature selectors for port set/clear-feature requests, with the hub-class
/// wire codes. Root-port implementations map these onto whatever their
/// register file uses.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PortFeature {
    Enable,
    Suspend,
    Reset,
    Power,
    ConnectChange,
    EnableChange,
    SuspendChange,
    OverCurrentChange,
    ResetChange,
}

impl PortFeature {
    pub fn selector(self) -> u16 {
        match self {
            PortFeature::Enable => 1,
            PortFeature::Suspend => 2,
            PortFeature::Reset => 4,
            PortFeature::Power => 8,
            PortFeature::ConnectChange => 16,
            PortFeature::EnableChange => 17,
            PortFeature::SuspendChange => 18,
            PortFeature::OverCurrentChange => 19,
            PortFeature::ResetChange => 20,
        }
    }
}
