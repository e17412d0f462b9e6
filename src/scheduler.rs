//! The decision core: when/whether to schedule the next upload, latency
//! selection, and the force/cancel semantics around a single outstanding
//! [`ScheduledUpload`](crate::events::UploadContext).
//!
//! Lifecycle transitions (`handle_start`/`handle_pause`/`handle_stop`/
//! `handle_finish_all_uploads`) live in [`crate::lifecycle`] as a separate
//! `impl Scheduler` block, matching the 30%/15% split the component table
//! draws between "Scheduler" and "Lifecycle" even though both operate on
//! the same struct and the same mutex.

use std::sync::{Arc, Mutex, Weak};

use crate::backoff::Backoff;
use crate::clock::Clock;
use crate::config::{BandwidthController, TpmConfig, DEFAULT_TIMER_DELAY_MS};
use crate::dispatcher::{TaskDispatcher, TaskHandle};
use crate::events::{EventLatency, IncomingEventContext, UploadContext};
use crate::lifecycle::LifecycleState;
use crate::observer::{DebugEvent, DebugEventBroadcaster, DebugEventType, Packager};
use crate::profile::{ProfileTimers, TimerTriple};
use crate::registry::UploadRegistry;

/// Notified once, exactly when `handle_stop`/`handle_finish_all_uploads`
/// observe the registry reaching empty. Optional — a host that doesn't
/// care about this notification can skip registering one.
pub trait LifecycleObserver: Send + Sync {
    fn all_uploads_finished(&self);
}

/// State guarded by the single scheduler mutex (§5): everything about the
/// one outstanding scheduled upload, the cached timer triple, and the
/// lifecycle state. Deliberately *not* `Clone` — every field here is only
/// ever read/written while the mutex is held.
pub(crate) struct SchedulerState {
    pub(crate) lifecycle: LifecycleState,
    pub(crate) is_upload_scheduled: bool,
    pub(crate) scheduled_upload_time: u64,
    pub(crate) running_latency: EventLatency,
    pub(crate) scheduled_upload_aborted: bool,
    pub(crate) timers: TimerTriple,
    pub(crate) timerdelay: i32,
    task_handle: TaskHandle,
}

/// The TPM decision core. Cheap to clone (it's handed around as `Arc`), but
/// there is ordinarily exactly one per telemetry client.
pub struct Scheduler {
    self_weak: Weak<Scheduler>,
    pub(crate) state: Mutex<SchedulerState>,
    backoff: Mutex<Backoff>,
    registry: Arc<UploadRegistry>,
    max_pending_requests: u32,
    clock: Arc<dyn Clock>,
    dispatcher: Arc<dyn TaskDispatcher>,
    profile_timers: Arc<dyn ProfileTimers>,
    packager: Arc<dyn Packager>,
    debug: DebugEventBroadcaster,
    bandwidth_controller: Option<Arc<dyn BandwidthController>>,
    pub(crate) lifecycle_observer: Option<Arc<dyn LifecycleObserver>>,
}

impl Scheduler {
    /// Build a Scheduler with no bandwidth controller and no lifecycle
    /// observer — the common case for a demo harness or a unit test.
    pub fn new(
        config: &TpmConfig,
        clock: Arc<dyn Clock>,
        dispatcher: Arc<dyn TaskDispatcher>,
        profile_timers: Arc<dyn ProfileTimers>,
        packager: Arc<dyn Packager>,
    ) -> Arc<Scheduler> {
        Self::with_collaborators(
            config,
            clock,
            dispatcher,
            profile_timers,
            packager,
            None,
            None,
        )
    }

    /// Build a Scheduler with every optional collaborator wired in.
    #[allow(clippy::too_many_arguments)]
    pub fn with_collaborators(
        config: &TpmConfig,
        clock: Arc<dyn Clock>,
        dispatcher: Arc<dyn TaskDispatcher>,
        profile_timers: Arc<dyn ProfileTimers>,
        packager: Arc<dyn Packager>,
        bandwidth_controller: Option<Arc<dyn BandwidthController>>,
        lifecycle_observer: Option<Arc<dyn LifecycleObserver>>,
    ) -> Arc<Scheduler> {
        let backoff = Backoff::new_from_config(&config.upload_retry_backoff_config)
            .unwrap_or_else(Backoff::default_config);
        let max_pending_requests = config.max_pending_requests;
        let registry = Arc::new(UploadRegistry::new(max_pending_requests));
        let initial_running_latency = config.initial_running_latency;

        // Seed the cached timer triple from the profile once up front: a
        // `ProfileTimers` whose triple never changes (e.g.
        // `StaticProfileTimers`) correctly never reports
        // `timers_required_update() == true`, so without this the cache
        // would sit at a meaningless placeholder forever.
        let mut initial_timers: TimerTriple = [0, DEFAULT_TIMER_DELAY_MS, 0];
        profile_timers.get_timers(&mut initial_timers);
        let initial_timerdelay = initial_timers[1];

        Arc::new_cyclic(|weak| Scheduler {
            self_weak: weak.clone(),
            state: Mutex::new(SchedulerState {
                lifecycle: LifecycleState::Paused,
                is_upload_scheduled: false,
                scheduled_upload_time: u64::MAX,
                running_latency: initial_running_latency,
                scheduled_upload_aborted: false,
                timers: initial_timers,
                timerdelay: initial_timerdelay,
                task_handle: TaskHandle::none(),
            }),
            backoff: Mutex::new(backoff),
            registry,
            max_pending_requests,
            clock,
            dispatcher,
            profile_timers,
            packager,
            debug: DebugEventBroadcaster::new(),
            bandwidth_controller,
            lifecycle_observer,
        })
    }

    /// The registry of in-flight upload attempts, exposed so hosts and
    /// tests can read `in_flight_count` without going through a handler.
    pub fn registry(&self) -> &Arc<UploadRegistry> {
        &self.registry
    }

    /// Number of upload attempts currently in flight.
    pub fn in_flight_count(&self) -> u32 {
        self.registry.count()
    }

    /// Whether an upload is currently armed and waiting to fire.
    pub fn is_upload_scheduled(&self) -> bool {
        self.state.lock().expect("scheduler mutex poisoned").is_upload_scheduled
    }

    /// Register a listener for TPM's debug-event stream.
    pub fn debug_events(&self) -> &DebugEventBroadcaster {
        &self.debug
    }

    pub(crate) fn lifecycle(&self) -> LifecycleState {
        self.state.lock().expect("scheduler mutex poisoned").lifecycle
    }

    fn update_timers_if_necessary_locked(&self, state: &mut SchedulerState) -> bool {
        let needs_update = self.profile_timers.timers_required_update();
        if needs_update {
            self.profile_timers.get_timers(&mut state.timers);
        }
        needs_update
    }

    fn priority_from_state(state: &SchedulerState) -> EventLatency {
        if state.timers[0] == state.timers[1] {
            EventLatency::Normal
        } else if state.timers[0] < 0 {
            EventLatency::RealTime
        } else if state.running_latency == EventLatency::RealTime {
            EventLatency::Normal
        } else {
            EventLatency::RealTime
        }
    }

    /// Reads the current timer triple and the last-running latency to pick
    /// the latency class the *next* scheduled upload should target (§4.6).
    pub fn calculate_new_priority(&self) -> EventLatency {
        let mut state = self.state.lock().expect("scheduler mutex poisoned");
        self.update_timers_if_necessary_locked(&mut state);
        Self::priority_from_state(&state)
    }

    /// Arm (or coalesce into) the single outstanding scheduled upload.
    ///
    /// See §4.4 for the decision order this follows step for step.
    pub fn schedule_upload(&self, delay_ms: i32, latency: EventLatency, force: bool) {
        let mut state = self.state.lock().expect("scheduler mutex poisoned");
        let mut pending_debug: Vec<DebugEvent> = Vec::new();

        if delay_ms < 0 || state.timerdelay < 0 {
            tracing::trace!(delay_ms, timerdelay = state.timerdelay, "profile prohibits upload; not scheduling");
            return;
        }
        if state.scheduled_upload_aborted {
            tracing::trace!("scheduled upload aborted; not scheduling");
            return;
        }
        if self.registry.count() >= self.max_pending_requests {
            tracing::trace!(
                count = self.registry.count(),
                cap = self.max_pending_requests,
                "maximum number of requests reached"
            );
            return;
        }
        if state.lifecycle == LifecycleState::Paused {
            tracing::trace!("paused, not uploading anything until resumed");
            return;
        }

        self.update_timers_if_necessary_locked(&mut state);
        let mut latency = latency;
        if state.timers[0] < 0 {
            // Low-priority disabled by profile.
            latency = latency.max(EventLatency::RealTime);
        }

        if !force && state.is_upload_scheduled {
            if state.running_latency > latency {
                // Allow lower-priority (normal) events to get through in the next batch.
                state.running_latency = latency;
            }
            let now = self.clock.now_ms();
            let delta = now.abs_diff(state.scheduled_upload_time);
            if delta <= delay_ms as u64 {
                tracing::trace!(delta, latency = ?state.running_latency, "existing timer due soon enough");
                return;
            }
        }

        if force || delay_ms == 0 {
            if Self::reset_scheduled_task(&mut state) {
                pending_debug.push(DebugEvent::new(DebugEventType::UploadCancelled, 0, 0));
            }
        }

        if !state.is_upload_scheduled {
            state.is_upload_scheduled = true;
            state.scheduled_upload_time = self.clock.now_ms().saturating_add(delay_ms as u64);
            state.running_latency = latency;

            pending_debug.push(DebugEvent::new(
                DebugEventType::UploadScheduled,
                delay_ms as i64,
                latency.ordinal(),
            ));
            tracing::trace!(delay_ms, latency = ?latency, "scheduling upload");

            let weak = self.self_weak.clone();
            state.task_handle = self.dispatcher.schedule(
                delay_ms,
                Box::new(move || {
                    if let Some(scheduler) = weak.upgrade() {
                        scheduler.upload_async(latency);
                    }
                }),
            );
        }

        // Drop the scheduler mutex before fanning out debug events: a
        // listener is documented (observer.rs) to be free to call back into
        // the Scheduler, which would deadlock against this same non-reentrant
        // mutex if it were still held.
        drop(state);
        for event in pending_debug {
            self.debug.emit(event);
        }
    }

    /// Cancel the currently armed task (if any) and clear the
    /// scheduled-upload bookkeeping. Returns whether a live task was
    /// actually cancelled.
    fn reset_scheduled_task(state: &mut SchedulerState) -> bool {
        let cancelled = state.task_handle.cancel();
        state.is_upload_scheduled = false;
        state.scheduled_upload_time = u64::MAX;
        cancelled
    }

    /// Cancel whatever task is currently armed, if any, and clear the
    /// scheduled-upload bookkeeping. Used by `handle_stop` (§4.7) so a
    /// dispatcher task armed before stop was called never fires afterward.
    pub(crate) fn cancel_scheduled_task(&self) {
        let cancelled = {
            let mut state = self.state.lock().expect("scheduler mutex poisoned");
            Self::reset_scheduled_task(&mut state)
        };
        if cancelled {
            self.debug.emit(DebugEvent::new(DebugEventType::UploadCancelled, 0, 0));
        }
    }

    fn upload_async(&self, latency: EventLatency) {
        let should_abort = {
            let mut state = self.state.lock().expect("scheduler mutex poisoned");
            state.is_upload_scheduled = false;
            state.scheduled_upload_time = u64::MAX;
            state.running_latency = latency;
            state.lifecycle == LifecycleState::Paused || state.scheduled_upload_aborted
        };
        if should_abort {
            tracing::trace!("paused or upload aborted: cancelling pending upload task");
            return;
        }

        if let Some(controller) = &self.bandwidth_controller {
            if !controller.has_sufficient_bandwidth() {
                tracing::info!(
                    proposed = controller.proposed_bandwidth_bps(),
                    minimum = controller.minimum_bandwidth_bps(),
                    "bandwidth controller proposed insufficient bandwidth; retrying later"
                );
                self.schedule_upload(1000, latency, false);
                return;
            }
        }

        let ctx = UploadContext::new(latency);
        self.debug.emit(DebugEvent::new(
            DebugEventType::UploadInitiated,
            latency.ordinal(),
            0,
        ));
        self.registry.add(ctx.clone());
        self.packager.initiate_upload(ctx);
    }

    /// `on_event_arrived` (§4.5): the entry point producers call every time
    /// a new event lands in the store.
    pub fn on_event_arrived(&self, event: IncomingEventContext) {
        if self.lifecycle() == LifecycleState::Paused {
            return;
        }

        if event.latency > EventLatency::RealTime {
            let ctx = UploadContext::new(event.latency);
            self.debug.emit(DebugEvent::new(
                DebugEventType::UploadInitiated,
                event.latency.ordinal(),
                1,
            ));
            self.registry.add(ctx.clone());
            self.packager.initiate_upload(ctx);
            return;
        }

        let needs_check = {
            let state = self.state.lock().expect("scheduler mutex poisoned");
            !state.is_upload_scheduled || self.profile_timers.timers_required_update()
        };
        if !needs_check {
            return;
        }

        let (timerdelay, proposed, force) = {
            let mut state = self.state.lock().expect("scheduler mutex poisoned");
            let mut force = false;
            if self.update_timers_if_necessary_locked(&mut state) {
                state.timerdelay = state.timers[1];
                force = true;
            }
            let proposed = Self::priority_from_state(&state);
            (state.timerdelay, proposed, force)
        };

        if timerdelay >= 0 {
            self.schedule_upload(timerdelay, proposed, force);
        }
    }

    fn reset_backoff(&self) {
        self.backoff.lock().expect("backoff mutex poisoned").reset();
    }

    fn increase_backoff(&self) -> u32 {
        self.backoff
            .lock()
            .expect("backoff mutex poisoned")
            .advance_and_value()
    }

    /// Replace the running backoff policy. Returns whether `spec` parsed
    /// and was adopted; a rejected spec leaves the current backoff
    /// untouched (§4.1). Config loading itself is out of scope for this
    /// crate — hosts call this when their own config layer observes a
    /// change to `upload_retry_backoff_config`.
    pub fn reconfigure_backoff(&self, spec: &str) -> bool {
        self.backoff.lock().expect("backoff mutex poisoned").reconfigure(spec)
    }

    fn finish_upload(&self, ctx: UploadContext, next_upload_in_ms: Option<i32>) {
        let removed = self.registry.remove(ctx.id());
        if !removed {
            tracing::warn!(ctx = ?ctx.id(), "removing non-existent ctx from active uploads");
            debug_assert!(removed, "terminal outcome for an unregistered upload context");
        }
        self.debug.emit(DebugEvent::new(
            DebugEventType::UploadFinished,
            ctx.requested_min_latency.ordinal(),
            next_upload_in_ms.unwrap_or(-1) as i64,
        ));

        if let Some(next) = next_upload_in_ms {
            let proposed = self.calculate_new_priority();
            self.schedule_upload(next, proposed, false);
        }
    }

    /// §4.8: queue had nothing to send.
    pub fn handle_nothing_to_upload(&self, ctx: UploadContext) {
        tracing::trace!("no stored events to send at the moment");
        self.reset_backoff();
        self.debug.emit(DebugEvent::new(DebugEventType::BackoffReset, 0, 0));
        if ctx.requested_min_latency == EventLatency::Normal {
            self.finish_upload(ctx, None);
        } else {
            let timerdelay = self.state.lock().expect("scheduler mutex poisoned").timerdelay;
            self.finish_upload(ctx, Some(timerdelay));
        }
    }

    /// §4.8: the packager failed to assemble a batch from the queue.
    pub fn handle_packaging_failed(&self, ctx: UploadContext) {
        let timerdelay = self.state.lock().expect("scheduler mutex poisoned").timerdelay;
        self.finish_upload(ctx, Some(timerdelay));
    }

    /// §4.8: the HTTP upload completed successfully.
    pub fn handle_events_upload_successful(&self, ctx: UploadContext) {
        self.reset_backoff();
        self.debug.emit(DebugEvent::new(DebugEventType::BackoffReset, 0, 0));
        self.finish_upload(ctx, Some(0));
    }

    /// §4.8: the endpoint rejected the batch (e.g. 4xx).
    pub fn handle_events_upload_rejected(&self, ctx: UploadContext) {
        let delay = self.increase_backoff();
        self.debug
            .emit(DebugEvent::new(DebugEventType::BackoffAdvanced, delay as i64, 0));
        self.finish_upload(ctx, Some(delay as i32));
    }

    /// §4.8: the transport failed (connection error, timeout, 5xx, ...).
    pub fn handle_events_upload_failed(&self, ctx: UploadContext) {
        let delay = self.increase_backoff();
        self.debug
            .emit(DebugEvent::new(DebugEventType::BackoffAdvanced, delay as i64, 0));
        self.finish_upload(ctx, Some(delay as i32));
    }

    /// §4.8: the host cancelled the attempt (e.g. caller-initiated abort).
    pub fn handle_events_upload_aborted(&self, ctx: UploadContext) {
        self.finish_upload(ctx, None);
    }
}

impl EventLatency {
    /// Stable small-integer encoding used only for [`DebugEvent`] params.
    pub fn ordinal(&self) -> i64 {
        *self as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MonotonicClock;
    use crate::config::TpmConfig;
    use crate::dispatcher::TokioTaskDispatcher;
    use crate::observer::RecordingPackager;
    use crate::profile::StaticProfileTimers;

    fn test_scheduler(max_pending: u32, timers: TimerTriple) -> (Arc<Scheduler>, RecordingPackager) {
        let config = TpmConfig::new(max_pending, "E,3000,300000,2,0");
        let packager = RecordingPackager::new();
        let scheduler = Scheduler::new(
            &config,
            Arc::new(MonotonicClock::new()),
            Arc::new(TokioTaskDispatcher::new()),
            Arc::new(StaticProfileTimers::new(timers)),
            Arc::new(packager.clone()),
        );
        (scheduler, packager)
    }

    #[test]
    fn paused_scheduler_discards_arrivals() {
        let (scheduler, packager) = test_scheduler(4, [4000, 2000, 4000]);
        scheduler.on_event_arrived(IncomingEventContext::new("x", EventLatency::Normal));
        assert_eq!(scheduler.in_flight_count(), 0);
        assert!(!scheduler.is_upload_scheduled());
        assert!(packager.received().is_empty());
    }

    // Every test below calls `handle_start`, which arms the single
    // outstanding scheduled upload through `TokioTaskDispatcher` — that
    // requires running inside a tokio runtime.

    #[tokio::test]
    async fn max_latency_bypasses_timer() {
        let (scheduler, packager) = test_scheduler(4, [4000, 2000, 4000]);
        scheduler.handle_start();
        scheduler.on_event_arrived(IncomingEventContext::new("x", EventLatency::Max));
        assert_eq!(packager.received().len(), 1);
        assert_eq!(
            packager.received()[0].requested_min_latency,
            EventLatency::Max
        );
    }

    #[tokio::test]
    async fn backpressure_blocks_new_schedule() {
        let (scheduler, _packager) = test_scheduler(1, [4000, 2000, 4000]);
        // Fill the single pending slot before the scheduler ever gets a
        // chance to arm anything.
        scheduler.registry().add(UploadContext::new(EventLatency::RealTime));
        assert_eq!(scheduler.in_flight_count(), 1);

        scheduler.handle_start();
        assert!(!scheduler.is_upload_scheduled());
    }

    #[tokio::test]
    async fn suppressed_normal_profile_lifts_latency() {
        let (scheduler, _packager) = test_scheduler(4, [-1, 1000, 4000]);
        scheduler.handle_start();
        assert_eq!(scheduler.calculate_new_priority(), EventLatency::RealTime);
    }

    #[tokio::test]
    async fn single_cadence_profile_always_normal() {
        let (scheduler, _packager) = test_scheduler(4, [4000, 4000, 4000]);
        scheduler.handle_start();
        assert_eq!(scheduler.calculate_new_priority(), EventLatency::Normal);
    }

    #[tokio::test]
    async fn backoff_escalates_on_repeated_failure() {
        let (scheduler, packager) = test_scheduler(4, [4000, 2000, 4000]);
        scheduler.handle_start();
        scheduler.on_event_arrived(IncomingEventContext::new("x", EventLatency::Max));
        let ctx = packager.received()[0].clone();

        scheduler.handle_events_upload_failed(ctx.clone());
        let first = scheduler.backoff.lock().unwrap().value();
        scheduler.handle_events_upload_failed(ctx);
        let second = scheduler.backoff.lock().unwrap().value();
        assert!(second >= first);
    }

    #[tokio::test(start_paused = true)]
    async fn forced_reschedule_while_armed_still_fires() {
        use crate::profile::DynamicProfileTimers;
        use std::time::Duration;

        let config = TpmConfig::new(4, "E,3000,300000,2,0");
        let packager = RecordingPackager::new();
        let timers = Arc::new(DynamicProfileTimers::new([4000, 2000, 4000]));
        let scheduler = Scheduler::new(
            &config,
            Arc::new(MonotonicClock::new()),
            Arc::new(TokioTaskDispatcher::new()),
            timers.clone(),
            Arc::new(packager.clone()),
        );

        // Arms the first scheduled upload (1000 ms out, not forced).
        scheduler.handle_start();
        assert!(scheduler.is_upload_scheduled());

        // A profile-timer refresh makes the next `on_event_arrived` call
        // `schedule_upload` with `force = true`, cancelling the armed task.
        timers.set_triple([4000, 1500, 4000]);
        scheduler.on_event_arrived(IncomingEventContext::new("x", EventLatency::Normal));
        assert!(scheduler.is_upload_scheduled());

        // If the forced cancel hadn't cleared `is_upload_scheduled`, the
        // re-arm guard would never fire and no task would ever run again.
        tokio::time::advance(Duration::from_millis(1600)).await;
        tokio::task::yield_now().await;
        assert_eq!(packager.received().len(), 1);
    }

    #[tokio::test]
    async fn success_resets_backoff() {
        let (scheduler, packager) = test_scheduler(4, [4000, 2000, 4000]);
        scheduler.handle_start();
        scheduler.on_event_arrived(IncomingEventContext::new("x", EventLatency::Max));
        let ctx = packager.received()[0].clone();
        scheduler.handle_events_upload_failed(ctx.clone());
        assert!(scheduler.backoff.lock().unwrap().value() > 3000);

        scheduler.on_event_arrived(IncomingEventContext::new("y", EventLatency::Max));
        let ctx2 = packager.received()[1].clone();
        scheduler.handle_events_upload_successful(ctx2);
        assert_eq!(scheduler.backoff.lock().unwrap().value(), 3000);
    }
}
