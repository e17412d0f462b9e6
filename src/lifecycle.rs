//! Lifecycle state machine (§4.7): `Paused -> Running -> Stopping -> Stopped`,
//! plus the `finish_all_uploads` convenience that drains without a full stop.
//!
//! Kept in its own `impl Scheduler` block, separate from `scheduler.rs`,
//! mirroring the split the component table draws between the Scheduler and
//! the Lifecycle manager even though both share the one struct and mutex.

use crate::observer::{DebugEvent, DebugEventType};
use crate::scheduler::Scheduler;

/// Where the Scheduler is in its start/pause/stop cycle.
///
/// A fresh `Scheduler` starts `Paused`: nothing is uploaded and incoming
/// events are dropped on the floor until a host calls `handle_start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Paused,
    Running,
    Stopping,
    Stopped,
}

impl Scheduler {
    /// Begin (or resume) normal operation. Clears `scheduled_upload_aborted`
    /// so a host that stopped and is now restarting can arm new uploads
    /// again (invariant 3 only forbids arming *between* `stop` and the next
    /// `start`, not forever).
    pub fn handle_start(&self) -> bool {
        {
            let mut state = self.state.lock().expect("scheduler mutex poisoned");
            state.lifecycle = LifecycleState::Running;
            state.scheduled_upload_aborted = false;
        }
        self.debug_events()
            .emit(DebugEvent::new(DebugEventType::LifecycleStarted, 0, 0));
        tracing::info!("tpm started");

        let proposed = self.calculate_new_priority();
        self.schedule_upload(1000, proposed, false);
        true
    }

    /// Suspend scheduling of new uploads. In-flight uploads are left to
    /// finish on their own; the already-armed timer (if any) will still
    /// fire but `upload_async` will see `Paused` and decline to start a new
    /// attempt (see `schedule_upload`/`upload_async` in `scheduler.rs`).
    pub fn handle_pause(&self) -> bool {
        {
            let mut state = self.state.lock().expect("scheduler mutex poisoned");
            state.lifecycle = LifecycleState::Paused;
        }
        self.debug_events()
            .emit(DebugEvent::new(DebugEventType::LifecyclePaused, 0, 0));
        tracing::info!("tpm paused");
        true
    }

    /// Pause, then wait for every in-flight upload to report a terminal
    /// outcome, without transitioning all the way to `Stopped`. Useful for
    /// a host that wants to flush before, say, a device going to sleep.
    pub async fn handle_finish_all_uploads(&self) {
        self.handle_pause();
        self.registry().drain_wait().await;
        self.notify_all_uploads_finished();
    }

    /// Stop for good: abort any future scheduling, cancel the pending timer,
    /// and wait for in-flight uploads to drain before transitioning to
    /// `Stopped`.
    pub async fn handle_stop(&self) -> bool {
        {
            let mut state = self.state.lock().expect("scheduler mutex poisoned");
            state.scheduled_upload_aborted = true;
            state.lifecycle = LifecycleState::Stopping;
        }
        self.cancel_scheduled_task();
        self.debug_events()
            .emit(DebugEvent::new(DebugEventType::LifecycleStopping, 0, 0));
        tracing::info!("tpm stopping");

        self.registry().drain_wait().await;

        {
            let mut state = self.state.lock().expect("scheduler mutex poisoned");
            state.lifecycle = LifecycleState::Stopped;
        }
        self.notify_all_uploads_finished();
        self.debug_events()
            .emit(DebugEvent::new(DebugEventType::LifecycleStopped, 0, 0));
        tracing::info!("tpm stopped");
        true
    }

    fn notify_all_uploads_finished(&self) {
        if let Some(observer) = &self.lifecycle_observer {
            observer.all_uploads_finished();
        }
    }
}
