use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use eyre::{eyre, Result};
use tpm_core::{
    Backoff, DebugEvent, DebugEventListener, EventLatency, IncomingEventContext, MonotonicClock,
    RecordingPackager, Scheduler, StaticProfileTimers, TokioTaskDispatcher, TpmConfig,
};

/// Synthetic demo harness for the transmission policy manager: drives a
/// [`Scheduler`] against a fake event producer and a recording packager so
/// the scheduling/backoff behavior can be observed end to end without a
/// real event store or HTTP stack.
#[derive(Parser, Debug)]
#[command(
    name = "tpm-demo",
    version,
    about = "Drives the transmission policy manager against synthetic events"
)]
struct Args {
    /// Maximum number of upload attempts in flight at once.
    #[arg(long, default_value_t = 4)]
    max_pending_requests: u32,

    /// Retry backoff policy string, e.g. "E,3000,300000,2,1".
    #[arg(long, default_value = "E,3000,300000,2,1")]
    backoff: String,

    /// Named transmit profile to run under.
    #[arg(long, default_value = "balanced")]
    profile: String,

    /// Synthetic events generated per second.
    #[arg(long, default_value_t = 5)]
    event_rate: u64,

    /// Fraction (0-100) of synthetic uploads that should be rejected.
    #[arg(long, default_value_t = 0)]
    failure_rate_pct: u8,

    /// How long to run before stopping, in seconds.
    #[arg(long, default_value_t = 10)]
    run_seconds: u64,
}

struct LoggingDebugListener;

impl DebugEventListener for LoggingDebugListener {
    fn on_debug_event(&self, event: DebugEvent) {
        tracing::debug!(kind = ?event.kind, param1 = event.param1, param2 = event.param2, "debug event");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let timers = tpm_core::config::resolve_named_profile(&args.profile)
        .ok_or_else(|| eyre!("unknown profile '{}': try realtime_only, balanced, or normal_only", args.profile))?;

    let config = TpmConfig::new(args.max_pending_requests, args.backoff.clone());
    if config.upload_retry_backoff_config != args.backoff {
        tracing::warn!(requested = %args.backoff, "backoff spec rejected, running with default instead");
    }
    let _ = Backoff::new_from_config(&config.upload_retry_backoff_config);

    let packager = RecordingPackager::new();
    let scheduler = Scheduler::new(
        &config,
        Arc::new(MonotonicClock::new()),
        Arc::new(TokioTaskDispatcher::new()),
        Arc::new(StaticProfileTimers::new(timers)),
        Arc::new(packager.clone()),
    );
    scheduler.debug_events().register(Arc::new(LoggingDebugListener));

    scheduler.handle_start();
    tracing::info!(
        profile = %args.profile,
        max_pending_requests = args.max_pending_requests,
        backoff = %config.upload_retry_backoff_config,
        run_seconds = args.run_seconds,
        "tpm demo running"
    );

    let producer = {
        let scheduler = scheduler.clone();
        let event_rate = args.event_rate.max(1);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_millis((1000 / event_rate).max(1)));
            let mut counter: u64 = 0;
            loop {
                tick.tick().await;
                counter += 1;
                let latency = match counter % 20 {
                    0 => EventLatency::Max,
                    1..=4 => EventLatency::RealTime,
                    5..=9 => EventLatency::CostDeferred,
                    _ => EventLatency::Normal,
                };
                scheduler.on_event_arrived(IncomingEventContext::new(
                    format!("demo.event.{counter}"),
                    latency,
                ));
            }
        })
    };

    let resolver = {
        let scheduler = scheduler.clone();
        let packager = packager.clone();
        let failure_rate_pct = args.failure_rate_pct;
        tokio::spawn(async move {
            let mut seen = std::collections::HashSet::new();
            loop {
                tokio::time::sleep(Duration::from_millis(50)).await;
                for ctx in packager.received() {
                    if !seen.insert(ctx.id()) {
                        continue;
                    }
                    let roll = ctx.id().into_inner() % 100;
                    if (roll as u8) < failure_rate_pct {
                        scheduler.handle_events_upload_failed(ctx);
                    } else {
                        scheduler.handle_events_upload_successful(ctx);
                    }
                }
            }
        })
    };

    tokio::time::sleep(Duration::from_secs(args.run_seconds)).await;

    producer.abort();
    resolver.abort();
    scheduler.handle_stop().await;

    tracing::info!(
        uploads_observed = packager.received().len(),
        "tpm demo finished"
    );
    Ok(())
}


use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use eyre::{eyre, Result};
use tpm_core::{
    Backoff, DebugEvent, DebugEventListener, EventLatency, IncomingEventContext, MonotonicClock,
    RecordingPackager, Scheduler, StaticProfileTimers, TokioTaskDispatcher, TpmConfig,
};

/// Synthetic demo harness for the transmission policy manager: drives a
/// [`Scheduler`] against a fake event producer and a recording packager so
/// the scheduling/backoff behavior can be observed end to end without a
/// real event store or HTTP stack.
#[derive(Parser, Debug)]
#[command(
    name = "tpm-demo",
    version,
    about = "Drives the transmission policy manager against synthetic events"
)]
struct Args {
    /// Maximum number of upload attempts in flight at once.
    #[arg(long, default_value_t = 4)]
    max_pending_requests: u32,

    /// Retry backoff policy string, e.g. "E,3000,300000,2,1".
    #[arg(long, default_value = "E,3000,300000,2,1")]
    backoff: String,

    /// Named transmit profile to run under.
    #[arg(long, default_value = "balanced")]
    profile: String,

    /// Synthetic events generated per second.
    #[arg(long, default_value_t = 5)]
    event_rate: u64,

    /// Fraction (0-100) of synthetic uploads that should be rejected.
    #[arg(long, default_value_t = 0)]
    failure_rate_pct: u8,

    /// How long to run before stopping, in seconds.
    #[arg(long, default_value_t = 10)]
    run_seconds: u64,
}

struct LoggingDebugListener;

impl DebugEventListener for LoggingDebugListener {
    fn on_debug_event(&self, event: DebugEvent) {
        tracing::debug!(kind = ?event.kind, param1 = event.param1, param2 = event.param2, "debug event");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let timers = tpm_core::config::resolve_named_profile(&args.profile)
        .ok_or_else(|| eyre!("unknown profile '{}': try realtime_only, balanced, or normal_only", args.profile))?;

    let config = TpmConfig::new(args.max_pending_requests, args.backoff.clone());
    if config.upload_retry_backoff_config != args.backoff {
        tracing::warn!(requested = %args.backoff, "backoff spec rejected, running with default instead");
    }
    let _ = Backoff::new_from_config(&config.upload_retry_backoff_config);

    let packager = RecordingPackager::new();
    let scheduler = Scheduler::new(
        &config,
        Arc::new(MonotonicClock::new()),
        Arc::new(TokioTaskDispatcher::new()),
        Arc::new(StaticProfileTimers::new(timers)),
        Arc::new(packager.clone()),
    );
    scheduler.debug_events().register(Arc::new(LoggingDebugListener));

    scheduler.handle_start();
    tracing::info!(
        profile = %args.profile,
        max_pending_requests = args.max_pending_requests,
        backoff = %config.upload_retry_backoff_config,
        run_seconds = args.run_seconds,
        "tpm demo running"
    );

    let producer = {
        let scheduler = scheduler.clone();
        let event_rate = args.event_rate.max(1);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_millis((1000 / event_rate).max(1)));
            let mut counter: u64 = 0;
            loop {
                tick.tick().await;
                counter += 1;
                let latency = match counter % 20 {
                    0 => EventLatency::Max,
                    1..=4 => EventLatency::RealTime,
                    5..=9 => EventLatency::CostDeferred,
                    _ => EventLatency::Normal,
                };
                scheduler.on_event_arrived(IncomingEventContext::new(
                    format!("demo.event.{counter}"),
                    latency,
                ));
            }
        })
    };

    let resolver = {
        let scheduler = scheduler.clone();
        let packager = packager.clone();
        let failure_rate_pct = args.failure_rate_pct;
        tokio::spawn(async move {
            let mut seen = std::collections::HashSet::new();
            loop {
                tokio::time::sleep(Duration::from_millis(50)).await;
                for ctx in packager.received() {
                    if !seen.insert(ctx.id()) {
                        continue;
                    }
                    let roll = ctx.id().into_inner() % 100;
                    if (roll as u8) < failure_rate_pct {
                        scheduler.handle_events_upload_failed(ctx);
                    } else {
                        scheduler.handle_events_upload_successful(ctx);
                    }
                }
            }
        })
    };

    tokio::time::sleep(Duration::from_secs(args.run_seconds)).await;

    producer.abort();
    resolver.abort();
    scheduler.handle_stop().await;

    tracing::info!(
        uploads_observed = packager.received().len(),
        "tpm demo finished"
    );
    Ok(())
}


