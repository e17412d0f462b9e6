//! Monotonic millisecond time source.
//!
//! The scheduler never reads the wall clock: all scheduling arithmetic (arm
//! times, deltas, "is the existing timer due soon enough") is done in
//! monotonic milliseconds so that system clock adjustments never perturb
//! cadence.

use std::sync::OnceLock;
use std::time::Instant;

/// A source of monotonic millisecond timestamps.
///
/// Implementations must be monotonically non-decreasing for a given
/// process lifetime; they need not agree with wall-clock time.
pub trait Clock: Send + Sync {
    /// Current monotonic time, in milliseconds since some unspecified epoch.
    fn now_ms(&self) -> u64;
}

/// `Clock` backed by `std::time::Instant`, anchored the first time it's used.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    origin: OnceLock<Instant>,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: OnceLock::new(),
        }
    }

    fn origin(&self) -> Instant {
        *self.origin.get_or_init(Instant::now)
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        Instant::now()
            .saturating_duration_since(self.origin())
            .as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_clock_is_non_decreasing() {
        let clock = MonotonicClock::new();
        let a = clock.now_ms();
        let b = clock.now_ms();
        assert!(b >= a);
    }
}


//! Monotonic millisecond time source.
//!
//! The scheduler never reads the wall clock: all scheduling arithmetic (arm
//! times, deltas, "is the existing timer due soon enough") is done in
//! monotonic milliseconds so that system clock adjustments never perturb
//! cadence.

use std::sync::OnceLock;
use std::time::Instant;

/// A source of monotonic millisecond timestamps.
///
/// Implementations must be monotonically non-decreasing for a given
/// process lifetime; they need not agree with wall-clock time.
pub trait Clock: Send + Sync {
    /// Current monotonic time, in milliseconds since some unspecified epoch.
    fn now_ms(&self) -> u64;
}

/// `Clock` backed by `std::time::Instant`, anchored the first time it's used.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    origin: OnceLock<Instant>,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: OnceLock::new(),
        }
    }

    fn origin(&self) -> Instant {
        *self.origin.get_or_init(Instant::now)
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        Instant::now()
            .saturating_duration_since(self.origin())
            .as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_clock_is_non_decreasing() {
        let clock = MonotonicClock::new();
        let a = clock.now_ms();
        let b = clock.now_ms();
        assert!(b >= a);
    }
}


