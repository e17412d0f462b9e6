//! Stateful exponential-with-jitter retry delay generator.
//!
//! Policy strings have the shape `"E,<initial>,<cap>,<multiplier>,<jitter_step>"`,
//! e.g. `"E,3000,300000,2,1"`: exponential, starting at 3s, capped at 5min,
//! doubling each failure, with light jitter. `E` is the only policy kind
//! currently defined; unknown kinds and malformed strings are rejected by
//! [`Backoff::new_from_config`] rather than panicking, so a bad remote
//! config can never take down the upload pipeline — it just leaves the
//! previous, already-validated backoff running.

use rand::Rng;

const DEFAULT_BACKOFF_CONFIG: &str = "E,3000,300000,2,1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ExponentialPolicy {
    initial: u32,
    cap: u32,
    multiplier: u32,
    jitter_step: u32,
}

impl ExponentialPolicy {
    fn parse(spec: &str) -> Option<Self> {
        let mut parts = spec.split(',');
        let kind = parts.next()?.trim();
        if kind != "E" {
            return None;
        }
        let initial: u32 = parts.next()?.trim().parse().ok()?;
        let cap: u32 = parts.next()?.trim().parse().ok()?;
        let multiplier: u32 = parts.next()?.trim().parse().ok()?;
        let jitter_step: u32 = parts.next()?.trim().parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        if initial == 0 || cap == 0 || multiplier == 0 {
            return None;
        }
        Some(Self {
            initial,
            cap: cap.max(initial),
            multiplier,
            jitter_step,
        })
    }
}

/// Exponential-with-jitter backoff, reconfigurable at runtime from a policy
/// string without losing state on a rejected reconfiguration.
pub struct Backoff {
    policy: ExponentialPolicy,
    config: String,
    current: u32,
}

impl Backoff {
    /// Parse `spec` into a fresh `Backoff` at its initial delay. Returns
    /// `None` if `spec` does not parse, per §4.1 — callers should keep using
    /// whatever backoff they already have in that case.
    pub fn new_from_config(spec: &str) -> Option<Backoff> {
        let policy = ExponentialPolicy::parse(spec)?;
        Some(Backoff {
            current: policy.initial,
            policy,
            config: spec.to_string(),
        })
    }

    /// The default policy TPM starts with before any config is loaded.
    pub fn default_config() -> Backoff {
        Self::new_from_config(DEFAULT_BACKOFF_CONFIG).expect("default backoff config must parse")
    }

    /// Current delay in milliseconds, without advancing. Adds jitter on
    /// every read when `jitter_step > 0`, so two consecutive calls to
    /// `value()` without an intervening `advance()` may differ slightly.
    pub fn value(&self) -> u32 {
        self.with_jitter(self.current)
    }

    fn with_jitter(&self, base: u32) -> u32 {
        if self.policy.jitter_step == 0 {
            return base;
        }
        let max_jitter = (base as u64 * self.policy.jitter_step as u64 / 10).min(u32::MAX as u64);
        if max_jitter == 0 {
            return base;
        }
        let jitter = rand::thread_rng().gen_range(0..=max_jitter) as u32;
        base.saturating_add(jitter).min(self.policy.cap)
    }

    /// Advance to the next delay, saturating at the configured cap.
    pub fn advance(&mut self) {
        self.current = self
            .current
            .saturating_mul(self.policy.multiplier)
            .min(self.policy.cap);
    }

    /// Read the current (jittered) delay and advance in one step — the
    /// shape the Scheduler actually wants when reacting to a failure.
    pub fn advance_and_value(&mut self) -> u32 {
        let value = self.value();
        self.advance();
        value
    }

    /// Return to the initial delay.
    pub fn reset(&mut self) {
        self.current = self.policy.initial;
    }

    /// Attempt to replace the running policy with a newly parsed one.
    ///
    /// Returns `true` if `spec` parsed and was adopted (resetting the
    /// backoff to the new policy's initial delay); returns `false` and
    /// leaves state untouched otherwise. The caller is expected to log a
    /// warning on `false`, matching `checkBackoffConfigUpdate` in the
    /// source.
    pub fn reconfigure(&mut self, spec: &str) -> bool {
        if spec == self.config {
            return true;
        }
        match ExponentialPolicy::parse(spec) {
            Some(policy) => {
                self.policy = policy;
                self.config = spec.to_string();
                self.current = policy.initial;
                true
            }
            None => false,
        }
    }

    /// The policy string currently in effect.
    pub fn config(&self) -> &str {
        &self.config
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::default_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_spec() {
        let b = Backoff::new_from_config("E,3000,300000,2,1").unwrap();
        assert_eq!(b.value(), 3000);
    }

    #[test]
    fn rejects_invalid_spec() {
        assert!(Backoff::new_from_config("bogus").is_none());
        assert!(Backoff::new_from_config("E,0,100,2,1").is_none());
        assert!(Backoff::new_from_config("E,100,100").is_none());
    }

    #[test]
    fn advances_exponentially_without_jitter() {
        let mut b = Backoff::new_from_config("E,3000,300000,2,0").unwrap();
        assert_eq!(b.value(), 3000);
        b.advance();
        assert_eq!(b.value(), 6000);
        b.advance();
        assert_eq!(b.value(), 12000);
    }

    #[test]
    fn saturates_at_cap() {
        let mut b = Backoff::new_from_config("E,3000,10000,2,0").unwrap();
        b.advance(); // 6000
        b.advance(); // 12000 -> capped to 10000
        assert_eq!(b.value(), 10000);
        b.advance();
        assert_eq!(b.value(), 10000);
    }

    #[test]
    fn reset_returns_to_initial() {
        let mut b = Backoff::new_from_config("E,3000,300000,2,0").unwrap();
        b.advance();
        b.advance();
        assert_ne!(b.value(), 3000);
        b.reset();
        assert_eq!(b.value(), 3000);
    }

    #[test]
    fn advance_and_value_reads_before_advancing() {
        let mut b = Backoff::new_from_config("E,3000,300000,2,0").unwrap();
        assert_eq!(b.advance_and_value(), 3000);
        assert_eq!(b.advance_and_value(), 6000);
    }

    #[test]
    fn jitter_never_exceeds_ten_percent_of_cap_window() {
        let b = Backoff::new_from_config("E,3000,300000,2,1").unwrap();
        for _ in 0..100 {
            let v = b.value();
            assert!(v >= 3000);
            assert!(v <= 3000 + 300);
        }
    }

    #[test]
    fn reconfigure_rejects_bad_spec_and_keeps_state() {
        let mut b = Backoff::new_from_config("E,3000,300000,2,0").unwrap();
        b.advance();
        assert_eq!(b.value(), 6000);
        assert!(!b.reconfigure("nonsense"));
        assert_eq!(b.value(), 6000);
        assert_eq!(b.config(), "E,3000,300000,2,0");
    }

    #[test]
    fn reconfigure_accepts_good_spec_and_resets() {
        let mut b = Backoff::new_from_config("E,3000,300000,2,0").unwrap();
        b.advance();
        assert!(b.reconfigure("E,1000,60000,3,0"));
        assert_eq!(b.value(), 1000);
    }
}


//! Stateful exponential-with-jitter retry delay generator.
//!
//! Policy strings have the shape `"E,<initial>,<cap>,<multiplier>,<jitter_step>"`,
//! e.g. `"E,3000,300000,2,1"`: exponential, starting at 3s, capped at 5min,
//! doubling each failure, with light jitter. `E` is the only policy kind
//! currently defined; unknown kinds and malformed strings are rejected by
//! [`Backoff::new_from_config`] rather than panicking, so a bad remote
//! config can never take down the upload pipeline — it just leaves the
//! previous, already-validated backoff running.

use rand::Rng;

const DEFAULT_BACKOFF_CONFIG: &str = "E,3000,300000,2,1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ExponentialPolicy {
    initial: u32,
    cap: u32,
    multiplier: u32,
    jitter_step: u32,
}

impl ExponentialPolicy {
    fn parse(spec: &str) -> Option<Self> {
        let mut parts = spec.split(',');
        let kind = parts.next()?.trim();
        if kind != "E" {
            return None;
        }
        let initial: u32 = parts.next()?.trim().parse().ok()?;
        let cap: u32 = parts.next()?.trim().parse().ok()?;
        let multiplier: u32 = parts.next()?.trim().parse().ok()?;
        let jitter_step: u32 = parts.next()?.trim().parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        if initial == 0 || cap == 0 || multiplier == 0 {
            return None;
        }
        Some(Self {
            initial,
            cap: cap.max(initial),
            multiplier,
            jitter_step,
        })
    }
}

/// Exponential-with-jitter backoff, reconfigurable at runtime from a policy
/// string without losing state on a rejected reconfiguration.
pub struct Backoff {
    policy: ExponentialPolicy,
    config: String,
    current: u32,
}

impl Backoff {
    /// Parse `spec` into a fresh `Backoff` at its initial delay. Returns
    /// `None` if `spec` does not parse, per §4.1 — callers should keep using
    /// whatever backoff they already have in that case.
    pub fn new_from_config(spec: &str) -> Option<Backoff> {
        let policy = ExponentialPolicy::parse(spec)?;
        Some(Backoff {
            current: policy.initial,
            policy,
            config: spec.to_string(),
        })
    }

    /// The default policy TPM starts with before any config is loaded.
    pub fn default_config() -> Backoff {
        Self::new_from_config(DEFAULT_BACKOFF_CONFIG).expect("default backoff config must parse")
    }

    /// Current delay in milliseconds, without advancing. Adds jitter on
    /// every read when `jitter_step > 0`, so two consecutive calls to
    /// `value()` without an intervening `advance()` may differ slightly.
    pub fn value(&self) -> u32 {
        self.with_jitter(self.current)
    }

    fn with_jitter(&self, base: u32) -> u32 {
        if self.policy.jitter_step == 0 {
            return base;
        }
        let max_jitter = (base as u64 * self.policy.jitter_step as u64 / 10).min(u32::MAX as u64);
        if max_jitter == 0 {
            return base;
        }
        let jitter = rand::thread_rng().gen_range(0..=max_jitter) as u32;
        base.saturating_add(jitter).min(self.policy.cap)
    }

    /// Advance to the next delay, saturating at the configured cap.
    pub fn advance(&mut self) {
        self.current = self
            .current
            .saturating_mul(self.policy.multiplier)
            .min(self.policy.cap);
    }

    /// Read the current (jittered) delay and advance in one step — the
    /// shape the Scheduler actually wants when reacting to a failure.
    pub fn advance_and_value(&mut self) -> u32 {
        let value = self.value();
        self.advance();
        value
    }

    /// Return to the initial delay.
    pub fn reset(&mut self) {
        self.current = self.policy.initial;
    }

    /// Attempt to replace the running policy with a newly parsed one.
    ///
    /// Returns `true` if `spec` parsed and was adopted (resetting the
    /// backoff to the new policy's initial delay); returns `false` and
    /// leaves state untouched otherwise. The caller is expected to log a
    /// warning on `false`, matching `checkBackoffConfigUpdate` in the
    /// source.
    pub fn reconfigure(&mut self, spec: &str) -> bool {
        if spec == self.config {
            return true;
        }
        match ExponentialPolicy::parse(spec) {
            Some(policy) => {
                self.policy = policy;
                self.config = spec.to_string();
                self.current = policy.initial;
                true
            }
            None => false,
        }
    }

    /// The policy string currently in effect.
    pub fn config(&self) -> &str {
        &self.config
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::default_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_spec() {
        let b = Backoff::new_from_config("E,3000,300000,2,1").unwrap();
        assert_eq!(b.value(), 3000);
    }

    #[test]
    fn rejects_invalid_spec() {
        assert!(Backoff::new_from_config("bogus").is_none());
        assert!(Backoff::new_from_config("E,0,100,2,1").is_none());
        assert!(Backoff::new_from_config("E,100,100").is_none());
    }

    #[test]
    fn advances_exponentially_without_jitter() {
        let mut b = Backoff::new_from_config("E,3000,300000,2,0").unwrap();
        assert_eq!(b.value(), 3000);
        b.advance();
        assert_eq!(b.value(), 6000);
        b.advance();
        assert_eq!(b.value(), 12000);
    }

    #[test]
    fn saturates_at_cap() {
        let mut b = Backoff::new_from_config("E,3000,10000,2,0").unwrap();
        b.advance(); // 6000
        b.advance(); // 12000 -> capped to 10000
        assert_eq!(b.value(), 10000);
        b.advance();
        assert_eq!(b.value(), 10000);
    }

    #[test]
    fn reset_returns_to_initial() {
        let mut b = Backoff::new_from_config("E,3000,300000,2,0").unwrap();
        b.advance();
        b.advance();
        assert_ne!(b.value(), 3000);
        b.reset();
        assert_eq!(b.value(), 3000);
    }

    #[test]
    fn advance_and_value_reads_before_advancing() {
        let mut b = Backoff::new_from_config("E,3000,300000,2,0").unwrap();
        assert_eq!(b.advance_and_value(), 3000);
        assert_eq!(b.advance_and_value(), 6000);
    }

    #[test]
    fn jitter_never_exceeds_ten_percent_of_cap_window() {
        let b = Backoff::new_from_config("E,3000,300000,2,1").unwrap();
        for _ in 0..100 {
            let v = b.value();
            assert!(v >= 3000);
            assert!(v <= 3000 + 300);
        }
    }

    #[test]
    fn reconfigure_rejects_bad_spec_and_keeps_state() {
        let mut b = Backoff::new_from_config("E,3000,300000,2,0").unwrap();
        b.advance();
        assert_eq!(b.value(), 6000);
        assert!(!b.reconfigure("nonsense"));
        assert_eq!(b.value(), 6000);
        assert_eq!(b.config(), "E,3000,300000,2,0");
    }

    #[test]
    fn reconfigure_accepts_good_spec_and_resets() {
        let mut b = Backoff::new_from_config("E,3000,300000,2,0").unwrap();
        b.advance();
        assert!(b.reconfigure("E,1000,60000,3,0"));
        assert_eq!(b.value(), 1000);
    }
}


