//! Configuration keys TPM consumes (§6), plus the bandwidth-controller stub
//! and a validating constructor in the same shape as the source
//! repository's own `KeeperConfig::from_cli_and_deployment`.

use crate::events::EventLatency;
use crate::profile::TimerTriple;

/// Default scheduling delay before the active transmit profile has been
/// consulted, matching `DEFAULT_DELAY_SEND_HTTP` in the source.
pub const DEFAULT_TIMER_DELAY_MS: i32 = 2000;

/// Default backoff policy string, matching the source's hardcoded initial
/// `m_backoffConfig`.
pub const DEFAULT_BACKOFF_CONFIG: &str = "E,3000,300000,2,1";

/// Configuration TPM needs to run: the backpressure cap and the initial
/// backoff policy. The transmit profile itself is supplied separately via
/// a [`crate::profile::ProfileTimers`] collaborator, not through this
/// struct, since profile parsing is out of scope (§1).
#[derive(Debug, Clone)]
pub struct TpmConfig {
    /// Maximum number of upload attempts that may be in flight at once.
    pub max_pending_requests: u32,

    /// Policy string for the retry backoff; see [`crate::backoff::Backoff`].
    pub upload_retry_backoff_config: String,

    /// Latency TPM assumes is "currently running" before the first upload
    /// has ever been scheduled. The source defaults this to `RealTime`.
    pub initial_running_latency: EventLatency,
}

impl TpmConfig {
    /// Build a config, validating `max_pending_requests` and falling back
    /// to [`DEFAULT_BACKOFF_CONFIG`] with a warning if the supplied backoff
    /// spec doesn't parse.
    pub fn new(max_pending_requests: u32, upload_retry_backoff_config: impl Into<String>) -> Self {
        let max_pending_requests = if max_pending_requests == 0 {
            tracing::warn!("max_pending_requests must be >= 1; clamping to 1");
            1
        } else {
            max_pending_requests
        };

        let upload_retry_backoff_config = upload_retry_backoff_config.into();
        if crate::backoff::Backoff::new_from_config(&upload_retry_backoff_config).is_none() {
            tracing::warn!(
                config = %upload_retry_backoff_config,
                "upload_retry_backoff_config does not parse; falling back to default"
            );
            return Self {
                max_pending_requests,
                upload_retry_backoff_config: DEFAULT_BACKOFF_CONFIG.to_string(),
                initial_running_latency: EventLatency::RealTime,
            };
        }

        Self {
            max_pending_requests,
            upload_retry_backoff_config,
            initial_running_latency: EventLatency::RealTime,
        }
    }
}

impl Default for TpmConfig {
    fn default() -> Self {
        Self {
            max_pending_requests: 4,
            upload_retry_backoff_config: DEFAULT_BACKOFF_CONFIG.to_string(),
            initial_running_latency: EventLatency::RealTime,
        }
    }
}

/// Optional bandwidth-throttling collaborator (§1 non-goals; §9 open
/// question resolution). Compiled in, unlike the source's
/// `#ifdef ENABLE_BW_CONTROLLER`, but inert unless a host supplies one.
pub trait BandwidthController: Send + Sync {
    /// Bandwidth the controller is currently willing to grant, in bytes/sec.
    fn proposed_bandwidth_bps(&self) -> u32;

    /// Minimum bandwidth TPM should wait for before initiating an upload.
    fn minimum_bandwidth_bps(&self) -> u32;

    /// Whether there's currently enough bandwidth to proceed.
    fn has_sufficient_bandwidth(&self) -> bool {
        self.proposed_bandwidth_bps() >= self.minimum_bandwidth_bps()
    }
}

/// A named transmit profile resolved to a [`TimerTriple`], for use by the
/// demo harness's `--profile` flag. Profile parsing proper is out of
/// scope for this crate; this is just a few illustrative presets.
pub fn resolve_named_profile(name: &str) -> Option<TimerTriple> {
    match name {
        "realtime_only" => Some([-1, 1000, 4000]),
        "balanced" => Some([4000, 2000, 4000]),
        "normal_only" => Some([4000, 4000, 4000]),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_max_pending() {
        let cfg = TpmConfig::new(0, DEFAULT_BACKOFF_CONFIG);
        assert_eq!(cfg.max_pending_requests, 1);
    }

    #[test]
    fn falls_back_on_bad_backoff_spec() {
        let cfg = TpmConfig::new(4, "nonsense");
        assert_eq!(cfg.upload_retry_backoff_config, DEFAULT_BACKOFF_CONFIG);
    }

    #[test]
    fn named_profiles_resolve() {
        assert_eq!(resolve_named_profile("balanced"), Some([4000, 2000, 4000]));
        assert_eq!(resolve_named_profile("unknown"), None);
    }
}


//! Configuration keys TPM consumes (§6), plus the bandwidth-controller stub
//! and a validating constructor in the same shape as the source
//! repository's own `KeeperConfig::from_cli_and_deployment`.

use crate::events::EventLatency;
use crate::profile::TimerTriple;

/// Default scheduling delay before the active transmit profile has been
/// consulted, matching `DEFAULT_DELAY_SEND_HTTP` in the source.
pub const DEFAULT_TIMER_DELAY_MS: i32 = 2000;

/// Default backoff policy string, matching the source's hardcoded initial
/// `m_backoffConfig`.
pub const DEFAULT_BACKOFF_CONFIG: &str = "E,3000,300000,2,1";

/// Configuration TPM needs to run: the backpressure cap and the initial
/// backoff policy. The transmit profile itself is supplied separately via
/// a [`crate::profile::ProfileTimers`] collaborator, not through this
/// struct, since profile parsing is out of scope (§1).
#[derive(Debug, Clone)]
pub struct TpmConfig {
    /// Maximum number of upload attempts that may be in flight at once.
    pub max_pending_requests: u32,

    /// Policy string for the retry backoff; see [`crate::backoff::Backoff`].
    pub upload_retry_backoff_config: String,

    /// Latency TPM assumes is "currently running" before the first upload
    /// has ever been scheduled. The source defaults this to `RealTime`.
    pub initial_running_latency: EventLatency,
}

impl TpmConfig {
    /// Build a config, validating `max_pending_requests` and falling back
    /// to [`DEFAULT_BACKOFF_CONFIG`] with a warning if the supplied backoff
    /// spec doesn't parse.
    pub fn new(max_pending_requests: u32, upload_retry_backoff_config: impl Into<String>) -> Self {
        let max_pending_requests = if max_pending_requests == 0 {
            tracing::warn!("max_pending_requests must be >= 1; clamping to 1");
            1
        } else {
            max_pending_requests
        };

        let upload_retry_backoff_config = upload_retry_backoff_config.into();
        if crate::backoff::Backoff::new_from_config(&upload_retry_backoff_config).is_none() {
            tracing::warn!(
                config = %upload_retry_backoff_config,
                "upload_retry_backoff_config does not parse; falling back to default"
            );
            return Self {
                max_pending_requests,
                upload_retry_backoff_config: DEFAULT_BACKOFF_CONFIG.to_string(),
                initial_running_latency: EventLatency::RealTime,
            };
        }

        Self {
            max_pending_requests,
            upload_retry_backoff_config,
            initial_running_latency: EventLatency::RealTime,
        }
    }
}

impl Default for TpmConfig {
    fn default() -> Self {
        Self {
            max_pending_requests: 4,
            upload_retry_backoff_config: DEFAULT_BACKOFF_CONFIG.to_string(),
            initial_running_latency: EventLatency::RealTime,
        }
    }
}

/// Optional bandwidth-throttling collaborator (§1 non-goals; §9 open
/// question resolution). Compiled in, unlike the source's
/// `#ifdef ENABLE_BW_CONTROLLER`, but inert unless a host supplies one.
pub trait BandwidthController: Send + Sync {
    /// Bandwidth the controller is currently willing to grant, in bytes/sec.
    fn proposed_bandwidth_bps(&self) -> u32;

    /// Minimum bandwidth TPM should wait for before initiating an upload.
    fn minimum_bandwidth_bps(&self) -> u32;

    /// Whether there's currently enough bandwidth to proceed.
    fn has_sufficient_bandwidth(&self) -> bool {
        self.proposed_bandwidth_bps() >= self.minimum_bandwidth_bps()
    }
}

/// A named transmit profile resolved to a [`TimerTriple`], for use by the
/// demo harness's `--profile` flag. Profile parsing proper is out of
/// scope for this crate; this is just a few illustrative presets.
pub fn resolve_named_profile(name: &str) -> Option<TimerTriple> {
    match name {
        "realtime_only" => Some([-1, 1000, 4000]),
        "balanced" => Some([4000, 2000, 4000]),
        "normal_only" => Some([4000, 4000, 4000]),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_max_pending() {
        let cfg = TpmConfig::new(0, DEFAULT_BACKOFF_CONFIG);
        assert_eq!(cfg.max_pending_requests, 1);
    }

    #[test]
    fn falls_back_on_bad_backoff_spec() {
        let cfg = TpmConfig::new(4, "nonsense");
        assert_eq!(cfg.upload_retry_backoff_config, DEFAULT_BACKOFF_CONFIG);
    }

    #[test]
    fn named_profiles_resolve() {
        assert_eq!(resolve_named_profile("balanced"), Some([4000, 2000, 4000]));
        assert_eq!(resolve_named_profile("unknown"), None);
    }
}


