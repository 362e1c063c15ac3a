//! Time source abstraction
//!
//! Settlement accrues charges from elapsed wall time, so the ledger reads
//! time through a [`Clock`] seam instead of calling `Utc::now()` directly.
//! Tests drive billing-interval scenarios with [`ManualClock`].

use crate::types::Timestamp;
use chrono::Utc;
use parking_lot::Mutex;

/// Time source for the metering ledger
pub trait Clock: Send + Sync {
    /// Current Unix timestamp in seconds
    fn now(&self) -> Timestamp;
}

/// Wall-clock time source
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now().timestamp()
    }
}

/// Manually advanced time source for deterministic tests
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Timestamp>,
}

impl ManualClock {
    /// Create a clock frozen at `start`
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move the clock forward by `secs`
    pub fn advance(&self, secs: i64) {
        *self.now.lock() += secs;
    }

    /// Set the clock to an absolute timestamp
    pub fn set(&self, timestamp: Timestamp) {
        *self.now.lock() = timestamp;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advance() {
        let clock = ManualClock::new(1000);
        assert_eq!(clock.now(), 1000);

        clock.advance(65);
        assert_eq!(clock.now(), 1065);

        clock.set(2000);
        assert_eq!(clock.now(), 2000);
    }

    #[test]
    fn test_system_clock_monotone_enough() {
        let clock = SystemClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
