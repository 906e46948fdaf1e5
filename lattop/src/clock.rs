//! Monotonic counter sources for sleep interval timing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::domain::Timestamp;

/// A monotonic counter read at every hook invocation. Must not block.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Process-local monotonic counter in nanoseconds since creation.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    #[must_use]
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    #[allow(clippy::cast_possible_truncation)]
    fn now(&self) -> Timestamp {
        Timestamp(self.origin.elapsed().as_nanos() as u64)
    }
}

/// Externally driven counter.
///
/// Clones share one reading, so a replay driver can hold a clone and set
/// the time before each hook it invokes on the engine.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    #[must_use]
    pub fn new(start: u64) -> Self {
        Self { now: Arc::new(AtomicU64::new(start)) }
    }

    pub fn set(&self, ts: u64) {
        self.now.store(ts, Ordering::Release);
    }

    pub fn advance(&self, delta: u64) {
        self.now.fetch_add(delta, Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.now.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_clones_share_reading() {
        let clock = ManualClock::new(100);
        let driver = clock.clone();
        driver.set(140);
        assert_eq!(clock.now(), Timestamp(140));
        driver.advance(10);
        assert_eq!(clock.now(), Timestamp(150));
    }

    #[test]
    fn test_monotonic_clock_never_goes_back() {
        let clock = MonotonicClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
