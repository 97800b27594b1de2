use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;

/// Monotonic microsecond clock with a busy-wait stall.
///
/// Enumeration sequences are full of fixed settle delays (port reset hold,
/// recovery stalls). Drivers express them through `stall_us` so a test clock
/// can complete them instantly while still observing the passage of time.
pub trait Clock {
    fn now_us(&self) -> u64;
    fn stall_us(&mut self, us: u64);
}

/// Deterministic clock for tests and the software host controller.
///
/// Clones share one counter, so a device model holding a clone observes the
/// stalls performed by the driver under test.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    now_us: Rc<Cell<u64>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes time forward without a stall, e.g. to make a periodic timer due.
    pub fn advance_us(&self, us: u64) {
        self.now_us.set(self.now_us.get().saturating_add(us));
    }
}

impl Clock for ManualClock {
    fn now_us(&self) -> u64 {
        self.now_us.get()
    }

    fn stall_us(&mut self, us: u64) {
        self.advance_us(us);
    }
}

/// Host-backed clock for running the stack outside a test.
#[derive(Clone, Debug)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_us(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_micros()).unwrap_or(u64::MAX)
    }

    fn stall_us(&mut self, us: u64) {
        std::thread::sleep(std::time::Duration::from_micros(us));
    }
}

/// Fixed-period timer polled from the dispatch loop.
///
/// `due` latches the next deadline relative to the observed `now`, so a late
/// poll fires once rather than replaying missed periods.
#[derive(Clone, Debug)]
pub struct PeriodicTimer {
    period_us: u64,
    next_due_us: u64,
}

impl PeriodicTimer {
    pub fn new(period_us: u64, now_us: u64) -> Self {
        Self {
            period_us,
            next_due_us: now_us.saturating_add(period_us),
        }
    }

    pub fn period_us(&self) -> u64 {
        self.period_us
    }

    pub fn due(&mut self, now_us: u64) -> bool {
        if now_us < self.next_due_us {
            return false;
        }
        self.next_due_us = now_us.saturating_add(self.period_us);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_clones_share_time() {
        let mut a = ManualClock::new();
        let b = a.clone();
        a.stall_us(250);
        assert_eq!(b.now_us(), 250);
        b.advance_us(50);
        assert_eq!(a.now_us(), 300);
    }

    #[test]
    fn periodic_timer_fires_once_per_period() {
        let mut timer = PeriodicTimer::new(1_000, 0);
        assert!(!timer.due(999));
        assert!(timer.due(1_000));
        assert!(!timer.due(1_500));
        assert!(timer.due(2_000));
    }

    #[test]
    fn periodic_timer_coalesces_missed_periods() {
        let mut timer = PeriodicTimer::new(1_000, 0);
        // Poll far past several deadlines: one firing, next deadline re-anchored.
        assert!(timer.due(10_000));
        assert!(!timer.due(10_500));
        assert!(timer.due(11_000));
    }
}
