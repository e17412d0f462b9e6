//! Transmission Policy Manager: the scheduling and retry-backoff core of a
//! client-side telemetry SDK's upload pipeline.
//!
//! This crate owns exactly one decision: *when* to hand the next batch of
//! queued events to a packager, and *how hard to back off* when an upload
//! attempt fails. It does not parse events, serialize batches, or speak
//! HTTP — those are the host application's job, reached through the
//! [`observer::Packager`] seam.
//!
//! Start with [`scheduler::Scheduler`]; [`config::TpmConfig`] builds one.

pub mod backoff;
pub mod clock;
pub mod config;
pub mod dispatcher;
pub mod events;
pub mod lifecycle;
pub mod observer;
pub mod profile;
pub mod registry;
pub mod scheduler;

pub use backoff::Backoff;
pub use clock::{Clock, MonotonicClock};
pub use config::{BandwidthController, TpmConfig};
pub use dispatcher::{TaskDispatcher, TaskHandle, TokioTaskDispatcher};
pub use events::{EventLatency, EventPersistence, IncomingEventContext, UploadContext, UploadContextId};
pub use lifecycle::LifecycleState;
pub use observer::{DebugEvent, DebugEventBroadcaster, DebugEventListener, DebugEventType, Packager, RecordingPackager};
pub use profile::{DynamicProfileTimers, ProfileTimers, StaticProfileTimers, TimerTriple};
pub use registry::UploadRegistry;
pub use scheduler::{LifecycleObserver, Scheduler};
