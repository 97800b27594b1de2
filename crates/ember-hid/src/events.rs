//! Input events produced by the boot-protocol drivers. Deliberately raw:
//! usages and button bits straight off the wire, no layout translation.

/// One key transition. `usage` is the HID usage code from the boot report;
/// modifier keys arrive as their usage codes (0xE0..=0xE7), not as a
/// separate bitmask.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeyEvent {
    pub usage: u8,
    pub pressed: bool,
}

/// One mouse report: button bitmask plus signed deltas.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MouseEvent {
    pub buttons: u8,
    pub dx: i8,
    pub dy: i8,
    pub wheel: i8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputEvent {
    Key(KeyEvent),
    Mouse(MouseEvent),
}
