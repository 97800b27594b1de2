//! Boot-class HID drivers for the ember USB stack.
//!
//! Two class drivers that register into a
//! [`DriverRegistry`](ember_usb::DriverRegistry) before the bus starts:
//!
//! - [`KeyboardDriver`]: boot keyboards, 8-byte reports diffed into per-key
//!   press/release [`KeyEvent`]s
//! - [`MouseDriver`]: boot mice, each report decoded into a [`MouseEvent`]
//!
//! Both feed one [`EventQueue`](ember_platform::EventQueue) of
//! [`InputEvent`]s handed over at construction; the consumer drains it from
//! the same dispatch loop that pumps the bus. Only the fixed boot-protocol
//! report layouts are spoken here, so no report descriptor parsing and no
//! keymaps: translation to anything resembling a keystroke belongs to the
//! consumer.

#![forbid(unsafe_code)]

mod events;
mod keyboard;
mod mouse;
mod proto;

pub use events::{InputEvent, KeyEvent, MouseEvent};
pub use keyboard::KeyboardDriver;
pub use mouse::MouseDriver;
