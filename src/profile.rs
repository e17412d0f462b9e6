//! The active transmit profile, expressed as a triple of cadence timers.
//!
//! TPM only consumes evaluated timer values — parsing a transmit profile
//! configuration into a [`TimerTriple`] is out of scope for this crate (see
//! the PURPOSE & SCOPE non-goals). `ProfileTimers` is the seam: TPM holds a
//! `ProfileTimers` by reference rather than through process-wide static
//! state, so tests can drive the active triple deterministically.

use std::sync::{Arc, Mutex};

/// `[t0, t1, t2]` in milliseconds. `t0` governs the Normal cadence, `t1`
/// governs RealTime (and is the default scheduling delay), `t2` is
/// reserved. A negative `t0` means the profile prohibits Normal-latency
/// uploads entirely.
pub type TimerTriple = [i32; 3];

/// Supplies the currently active [`TimerTriple`] and tells TPM when it has
/// changed since the triple was last cached.
pub trait ProfileTimers: Send + Sync {
    /// True if the cached triple is stale and should be refetched via
    /// [`ProfileTimers::get_timers`].
    fn timers_required_update(&self) -> bool;

    /// Write the currently active triple into `out`.
    fn get_timers(&self, out: &mut TimerTriple);
}

/// A `ProfileTimers` whose triple is fixed for the lifetime of the
/// collaborator — the common case for a demo harness or a unit test, where
/// the transmit profile isn't expected to flip mid-run.
#[derive(Debug, Clone, Copy)]
pub struct StaticProfileTimers {
    triple: TimerTriple,
}

impl StaticProfileTimers {
    pub fn new(triple: TimerTriple) -> Self {
        Self { triple }
    }
}

impl ProfileTimers for StaticProfileTimers {
    fn timers_required_update(&self) -> bool {
        // The static collaborator never changes after construction, so it
        // only ever needs to be read once; callers still get a consistent
        // triple if they call get_timers() unconditionally on first use.
        false
    }

    fn get_timers(&self, out: &mut TimerTriple) {
        *out = self.triple;
    }
}

/// A `ProfileTimers` whose triple can be swapped at runtime — used by tests
/// that simulate a transmit-profile flip, and by a demo harness that wants
/// to react to a config push without restarting.
#[derive(Debug, Clone)]
pub struct DynamicProfileTimers {
    inner: Arc<Mutex<DynamicState>>,
}

#[derive(Debug)]
struct DynamicState {
    triple: TimerTriple,
    dirty: bool,
}

impl DynamicProfileTimers {
    pub fn new(triple: TimerTriple) -> Self {
        Self {
            inner: Arc::new(Mutex::new(DynamicState {
                triple,
                dirty: false,
            })),
        }
    }

    /// Replace the active triple and mark it dirty so the next
    /// `timers_required_update()` returns `true` exactly once.
    pub fn set_triple(&self, triple: TimerTriple) {
        let mut state = self.inner.lock().expect("profile timers mutex poisoned");
        state.triple = triple;
        state.dirty = true;
    }
}

impl ProfileTimers for DynamicProfileTimers {
    fn timers_required_update(&self) -> bool {
        self.inner.lock().expect("profile timers mutex poisoned").dirty
    }

    fn get_timers(&self, out: &mut TimerTriple) {
        let mut state = self.inner.lock().expect("profile timers mutex poisoned");
        *out = state.triple;
        state.dirty = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_timers_never_require_update() {
        let timers = StaticProfileTimers::new([4000, 2000, 4000]);
        assert!(!timers.timers_required_update());
        let mut out = [0; 3];
        timers.get_timers(&mut out);
        assert_eq!(out, [4000, 2000, 4000]);
    }

    #[test]
    fn dynamic_timers_signal_update_once() {
        let timers = DynamicProfileTimers::new([4000, 2000, 4000]);
        assert!(!timers.timers_required_update());
        timers.set_triple([-1, 1500, 4000]);
        assert!(timers.timers_required_update());
        let mut out = [0; 3];
        timers.get_timers(&mut out);
        assert_eq!(out, [-1, 1500, 4000]);
        assert!(!timers.timers_required_update());
    }
}
