//! Outbound collaborator seams: handing an armed upload to the packager,
//! and broadcasting debug events for observability.
//!
//! Neither the packager nor the downstream HTTP stage is implemented here —
//! both are out of scope per the PURPOSE & SCOPE non-goals. What TPM owns
//! is the seam: a `Packager` trait object it calls into, and a small set of
//! `DebugEventListener`s it fans a structured event out to on every
//! noteworthy transition.

use std::sync::{Arc, Mutex};

use crate::events::UploadContext;

/// Kind of debug event emitted by the Scheduler. Mirrors the source's
/// untyped `{ type, param1, param2 }` tuple, but as a closed enum so
/// listeners don't have to guess at the string vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugEventType {
    UploadScheduled,
    UploadCancelled,
    UploadInitiated,
    UploadFinished,
    BackoffReset,
    BackoffAdvanced,
    LifecycleStarted,
    LifecyclePaused,
    LifecycleStopping,
    LifecycleStopped,
}

/// A single debug event: kind plus two opaque numeric parameters whose
/// meaning depends on `kind` (e.g. for `UploadScheduled`,
/// `param1 = delay_ms` and `param2 = requested latency as an ordinal`).
#[derive(Debug, Clone, Copy)]
pub struct DebugEvent {
    pub kind: DebugEventType,
    pub param1: i64,
    pub param2: i64,
}

impl DebugEvent {
    pub fn new(kind: DebugEventType, param1: i64, param2: i64) -> Self {
        Self {
            kind,
            param1,
            param2,
        }
    }
}

/// Receives every [`DebugEvent`] the Scheduler emits. Dispatch happens
/// outside all of TPM's internal locks (§5), so a listener is free to do
/// its own locking or even block without risking a deadlock with the
/// scheduler or backoff mutex.
pub trait DebugEventListener: Send + Sync {
    fn on_debug_event(&self, event: DebugEvent);
}

/// Fans a [`DebugEvent`] out to every registered listener, and also emits a
/// `tracing` event at the same call site — the ambient logging this crate
/// carries regardless of whether any `DebugEventListener` is registered.
#[derive(Clone, Default)]
pub struct DebugEventBroadcaster {
    listeners: Arc<Mutex<Vec<Arc<dyn DebugEventListener>>>>,
}

impl DebugEventBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, listener: Arc<dyn DebugEventListener>) {
        self.listeners
            .lock()
            .expect("debug listener mutex poisoned")
            .push(listener);
    }

    pub fn emit(&self, event: DebugEvent) {
        tracing::trace!(kind = ?event.kind, param1 = event.param1, param2 = event.param2, "tpm debug event");
        let listeners = self.listeners.lock().expect("debug listener mutex poisoned").clone();
        for listener in listeners {
            listener.on_debug_event(event);
        }
    }
}

/// Receives upload contexts armed by the Scheduler and hands them off to
/// packaging/HTTP. Implementing this trait is the entire integration
/// surface a host application needs to provide to use TPM.
pub trait Packager: Send + Sync {
    fn initiate_upload(&self, ctx: UploadContext);
}

/// `Packager` that records every context it receives, for use in tests and
/// the demo harness.
#[derive(Clone, Default)]
pub struct RecordingPackager {
    received: Arc<Mutex<Vec<UploadContext>>>,
}

impl RecordingPackager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn received(&self) -> Vec<UploadContext> {
        self.received.lock().expect("recording packager mutex poisoned").clone()
    }
}

impl Packager for RecordingPackager {
    fn initiate_upload(&self, ctx: UploadContext) {
        self.received.lock().expect("recording packager mutex poisoned").push(ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder(Arc<Mutex<Vec<DebugEvent>>>);
    impl DebugEventListener for Recorder {
        fn on_debug_event(&self, event: DebugEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    #[test]
    fn broadcaster_fans_out_to_listeners() {
        let broadcaster = DebugEventBroadcaster::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        broadcaster.register(Arc::new(Recorder(seen.clone())));

        broadcaster.emit(DebugEvent::new(DebugEventType::UploadScheduled, 2000, 1));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].kind, DebugEventType::UploadScheduled);
    }
}
