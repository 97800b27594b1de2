use std::fmt;
use std::num::NonZeroU8;

/// Assigned 7-bit device address, 1..=127. Address 0 is the wire's
/// "not yet addressed" default and is deliberately unrepresentable here; a
/// device that has no address yet carries `None` instead.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct UsbAddress(NonZeroU8);

impl UsbAddress {
    /// Address 1, reserved for the bus's root hub.
    pub const ROOT_HUB: UsbAddress = UsbAddress(NonZeroU8::MIN);

    pub fn new(raw: u8) -> Option<UsbAddress> {
        if raw > 127 {
            return None;
        }
        NonZeroU8::new(raw).map(UsbAddress)
    }

    pub fn get(self) -> u8 {
        self.0.get()
    }
}

impl fmt::Display for UsbAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bitmap allocator for one bus's device addresses.
///
/// 128 bits; bit i set means address i is in use. Bit 0 is set permanently so
/// the unassigned marker can never be handed out.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct AddressPool {
    bits: [u8; 16],
}

impl AddressPool {
    pub fn new() -> Self {
        let mut bits = [0u8; 16];
        bits[0] = 0x01;
        Self { bits }
    }

    /// First free address, lowest first. `None` when all 127 are in use.
    pub fn allocate(&mut self) -> Option<UsbAddress> {
        for (byte_idx, byte) in self.bits.iter_mut().enumerate() {
            if *byte == 0xFF {
                continue;
            }
            let bit = byte.trailing_ones();
            *byte |= 1 << bit;
            return UsbAddress::new((byte_idx * 8) as u8 + bit as u8);
        }
        None
    }

    /// Marks a specific address used. False if it already was.
    pub fn reserve(&mut self, addr: UsbAddress) -> bool {
        let (byte, mask) = Self::slot(addr);
        if self.bits[byte] & mask != 0 {
            return false;
        }
        self.bits[byte] |= mask;
        true
    }

    /// Returns an address to the pool. Idempotent; freeing twice is a caller
    /// bug but not detectable here.
    pub fn free(&mut self, addr: UsbAddress) {
        let (byte, mask) = Self::slot(addr);
        self.bits[byte] &= !mask;
    }

    pub fn is_used(&self, addr: UsbAddress) -> bool {
        let (byte, mask) = Self::slot(addr);
        self.bits[byte] & mask != 0
    }

    /// Number of allocated addresses, the permanent address-0 marker excluded.
    pub fn live(&self) -> usize {
        let set: u32 = self.bits.iter().map(|b| b.count_ones()).sum();
        set as usize - 1
    }

    /// Exact bit pattern, for tests asserting the pool is restored.
    pub fn snapshot(&self) -> [u8; 16] {
        self.bits
    }

    fn slot(addr: UsbAddress) -> (usize, u8) {
        let raw = addr.get() as usize;
        (raw / 8, 1 << (raw % 8))
    }
}

impl Default for AddressPool {
    fn default() -> Self {
        Self::new()
    }
}
