use std::num::NonZeroU32;

/// Opaque identity published into the driver-model runtime for something other
/// code can open: a child controller, a protocol instance, a package list.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Handle(NonZeroU32);

impl Handle {
    pub fn as_u32(self) -> u32 {
        self.0.get()
    }
}

/// Monotonic handle issuer. Values are never reused, so a stale handle held
/// past teardown can only miss, not alias a newer object.
#[derive(Debug)]
pub struct HandleAllocator {
    next: NonZeroU32,
}

impl HandleAllocator {
    pub fn new() -> Self {
        Self {
            next: NonZeroU32::MIN,
        }
    }

    pub fn alloc(&mut self) -> Handle {
        let handle = Handle(self.next);
        self.next = self.next.checked_add(1).unwrap_or(NonZeroU32::MIN);
        handle
    }
}

impl Default for HandleAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_distinct_and_ordered() {
        let mut alloc = HandleAllocator::new();
        let a = alloc.alloc();
        let b = alloc.alloc();
        let c = alloc.alloc();
        assert!(a < b && b < c);
        assert_eq!(a.as_u32(), 1);
        assert_eq!(c.as_u32(), 3);
    }
}
