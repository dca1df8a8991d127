//! The monotonic clock collaborator (spec §6: "Monotonic clock: `now() -> u64` seconds").
//!
//! The storage engine never calls `SystemTime::now()` directly — every
//! expiry check and every relative-ttl normalization goes through a
//! `Clock`, so tests can advance time deterministically instead of
//! sleeping.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A monotonic source of "now", in seconds.
pub trait Clock: Send + Sync {
    /// Current time in seconds since an arbitrary, monotonic epoch.
    fn now(&self) -> u64;
}

/// Wall-clock based `Clock`, backed by `SystemTime`.
///
/// Not strictly monotonic across NTP step adjustments, but matches the
/// reference protocol's own `time()`-based expiry semantics, and a
/// connection's lifetime is far shorter than any realistic clock skew.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }
}

/// A manually-advanced clock for deterministic expiry tests.
#[derive(Debug, Default)]
pub struct FakeClock {
    secs: AtomicU64,
}

impl FakeClock {
    /// Create a fake clock starting at the given time.
    pub fn new(start_secs: u64) -> Self {
        Self {
            secs: AtomicU64::new(start_secs),
        }
    }

    /// Advance the clock by `delta` seconds.
    pub fn advance(&self, delta: u64) {
        self.secs.fetch_add(delta, Ordering::SeqCst);
    }

    /// Set the clock to an absolute time.
    pub fn set(&self, secs: u64) {
        self.secs.store(secs, Ordering::SeqCst);
    }
}

impl Clock for FakeClock {
    fn now(&self) -> u64 {
        self.secs.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_returns_nonzero_time() {
        let clock = SystemClock;
        assert!(clock.now() > 0);
    }

    #[test]
    fn fake_clock_starts_at_given_value() {
        let clock = FakeClock::new(1000);
        assert_eq!(clock.now(), 1000);
    }

    #[test]
    fn fake_clock_advances() {
        let clock = FakeClock::new(1000);
        clock.advance(30);
        assert_eq!(clock.now(), 1030);
    }

    #[test]
    fn fake_clock_set_overrides() {
        let clock = FakeClock::new(1000);
        clock.set(5);
        assert_eq!(clock.now(), 5);
    }
}
