//! Core data model: latency/persistence classes, the event bag handed in by
//! producers, and the upload attempt record the Scheduler hands to the
//! packager.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Priority tier indicating how soon an event must leave the device.
///
/// Ordered: `Normal < CostDeferred < RealTime < Max`. The ordering is load
/// bearing — `on_event_arrived` compares against `RealTime` to decide
/// whether an event bypasses the timer entirely, and `schedule_upload`
/// clamps a requested latency up to `RealTime` when the profile suppresses
/// lower tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventLatency {
    Normal,
    CostDeferred,
    RealTime,
    Max,
}

/// Survivability tier for the on-disk event queue. TPM reads this field on
/// incoming events but never interprets or modifies it — it is opaque
/// payload carried through to the packager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventPersistence {
    Normal,
    Critical,
}

/// A record supplied by the event store when a new event is queued.
///
/// Modeled as an owned value rather than the source's raw-pointer-owned bag
/// (name, type, two property mappings) — see the design notes on why that
/// historical layout doesn't carry over.
#[derive(Debug, Clone)]
pub struct IncomingEventContext {
    pub name: String,
    pub latency: EventLatency,
    pub persistence: EventPersistence,
    /// Common-schema fields, the source's "Part B".
    pub part_b: HashMap<String, String>,
    /// Custom fields, the source's "Part C".
    pub part_c: HashMap<String, String>,
}

impl IncomingEventContext {
    pub fn new(name: impl Into<String>, latency: EventLatency) -> Self {
        Self {
            name: name.into(),
            latency,
            persistence: EventPersistence::Normal,
            part_b: HashMap::new(),
            part_c: HashMap::new(),
        }
    }
}

/// Process-unique identity for an upload attempt, used only for registry
/// membership (insert/remove), never for ordering or comparison with
/// timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UploadContextId(u64);

impl UploadContextId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        UploadContextId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw counter value, exposed only for hosts that want a cheap,
    /// non-cryptographic way to key off an upload attempt (e.g. the demo
    /// harness's synthetic pass/fail roll).
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

/// One upload attempt: created by the Scheduler, owned by the
/// `UploadRegistry` for the duration of the attempt, and destroyed once a
/// terminal outcome is reported back.
#[derive(Debug, Clone)]
pub struct UploadContext {
    id: UploadContextId,
    pub requested_min_latency: EventLatency,
}

impl UploadContext {
    pub(crate) fn new(requested_min_latency: EventLatency) -> Self {
        Self {
            id: UploadContextId::next(),
            requested_min_latency,
        }
    }

    pub fn id(&self) -> UploadContextId {
        self.id
    }
}
