//! Deferred, cancellable callback scheduling.
//!
//! TPM never blocks waiting for a timer; it hands a closure and a delay to a
//! `TaskDispatcher` and gets back a handle it can cancel if a newer decision
//! supersedes the pending one. The host runtime backing this crate is
//! `tokio`, so the only production implementation spawns onto the current
//! `tokio` runtime and sleeps for the requested delay.

use std::sync::Mutex;
use std::time::Duration;

use tokio::task::JoinHandle;

/// A callback scheduled for a single future firing.
///
/// Implementations are single-shot: each call to
/// [`TaskDispatcher::schedule`] arms exactly one callback. Dropping or
/// cancelling the returned [`TaskHandle`] guarantees the callback will not
/// start if it hasn't already.
pub trait TaskDispatcher: Send + Sync {
    /// Arms `callback` to run after `delay_ms` (clamped to zero if negative).
    fn schedule(&self, delay_ms: i32, callback: Box<dyn FnOnce() + Send>) -> TaskHandle;
}

/// A cancellable handle to a single scheduled callback.
///
/// Cancelling a handle whose callback has already started has no effect on
/// that in-progress invocation; it only prevents a *not-yet-started*
/// callback from starting. This matches the source's `cancelUploadTask`,
/// which races harmlessly against an in-flight `uploadAsync`.
pub struct TaskHandle {
    inner: Mutex<Option<JoinHandle<()>>>,
}

impl TaskHandle {
    fn new(join: JoinHandle<()>) -> Self {
        Self {
            inner: Mutex::new(Some(join)),
        }
    }

    /// A handle representing "nothing scheduled" — cancelling it is a no-op.
    pub fn none() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }

    /// Cancel the pending callback. Returns `true` if something was actually
    /// cancelled (as opposed to there being nothing scheduled, or the
    /// callback having already run).
    pub fn cancel(&self) -> bool {
        match self.inner.lock().expect("task handle mutex poisoned").take() {
            Some(join) => {
                join.abort();
                true
            }
            None => false,
        }
    }
}

/// [`TaskDispatcher`] that spawns onto the ambient `tokio` runtime.
#[derive(Debug, Default)]
pub struct TokioTaskDispatcher;

impl TokioTaskDispatcher {
    pub fn new() -> Self {
        Self
    }
}

impl TaskDispatcher for TokioTaskDispatcher {
    fn schedule(&self, delay_ms: i32, callback: Box<dyn FnOnce() + Send>) -> TaskHandle {
        let delay = Duration::from_millis(delay_ms.max(0) as u64);
        let join = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            callback();
        });
        TaskHandle::new(join)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn fires_after_delay() {
        let dispatcher = TokioTaskDispatcher::new();
        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = fired.clone();
        let _handle = dispatcher.schedule(
            50,
            Box::new(move || {
                fired2.store(true, Ordering::SeqCst);
            }),
        );

        tokio::time::advance(Duration::from_millis(10)).await;
        assert!(!fired.load(Ordering::SeqCst));

        tokio::time::advance(Duration::from_millis(60)).await;
        tokio::task::yield_now().await;
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_firing() {
        let dispatcher = TokioTaskDispatcher::new();
        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = fired.clone();
        let handle = dispatcher.schedule(
            50,
            Box::new(move || {
                fired2.store(true, Ordering::SeqCst);
            }),
        );
        assert!(handle.cancel());

        tokio::time::advance(Duration::from_millis(100)).await;
        tokio::task::yield_now().await;
        assert!(!fired.load(Ordering::SeqCst));
    }
}


//! Deferred, cancellable callback scheduling.
//!
//! TPM never blocks waiting for a timer; it hands a closure and a delay to a
//! `TaskDispatcher` and gets back a handle it can cancel if a newer decision
//! supersedes the pending one. The host runtime backing this crate is
//! `tokio`, so the only production implementation spawns onto the current
//! `tokio` runtime and sleeps for the requested delay.

use std::sync::Mutex;
use std::time::Duration;

use tokio::task::JoinHandle;

/// A callback scheduled for a single future firing.
///
/// Implementations are single-shot: each call to
/// [`TaskDispatcher::schedule`] arms exactly one callback. Dropping or
/// cancelling the returned [`TaskHandle`] guarantees the callback will not
/// start if it hasn't already.
pub trait TaskDispatcher: Send + Sync {
    /// Arms `callback` to run after `delay_ms` (clamped to zero if negative).
    fn schedule(&self, delay_ms: i32, callback: Box<dyn FnOnce() + Send>) -> TaskHandle;
}

/// A cancellable handle to a single scheduled callback.
///
/// Cancelling a handle whose callback has already started has no effect on
/// that in-progress invocation; it only prevents a *not-yet-started*
/// callback from starting. This matches the source's `cancelUploadTask`,
/// which races harmlessly against an in-flight `uploadAsync`.
pub struct TaskHandle {
    inner: Mutex<Option<JoinHandle<()>>>,
}

impl TaskHandle {
    fn new(join: JoinHandle<()>) -> Self {
        Self {
            inner: Mutex::new(Some(join)),
        }
    }

    /// A handle representing "nothing scheduled" — cancelling it is a no-op.
    pub fn none() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }

    /// Cancel the pending callback. Returns `true` if something was actually
    /// cancelled (as opposed to there being nothing scheduled, or the
    /// callback having already run).
    pub fn cancel(&self) -> bool {
        match self.inner.lock().expect("task handle mutex poisoned").take() {
            Some(join) => {
                join.abort();
                true
            }
            None => false,
        }
    }
}

/// [`TaskDispatcher`] that spawns onto the ambient `tokio` runtime.
#[derive(Debug, Default)]
pub struct TokioTaskDispatcher;

impl TokioTaskDispatcher {
    pub fn new() -> Self {
        Self
    }
}

impl TaskDispatcher for TokioTaskDispatcher {
    fn schedule(&self, delay_ms: i32, callback: Box<dyn FnOnce() + Send>) -> TaskHandle {
        let delay = Duration::from_millis(delay_ms.max(0) as u64);
        let join = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            callback();
        });
        TaskHandle::new(join)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn fires_after_delay() {
        let dispatcher = TokioTaskDispatcher::new();
        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = fired.clone();
        let _handle = dispatcher.schedule(
            50,
            Box::new(move || {
                fired2.store(true, Ordering::SeqCst);
            }),
        );

        tokio::time::advance(Duration::from_millis(10)).await;
        assert!(!fired.load(Ordering::SeqCst));

        tokio::time::advance(Duration::from_millis(60)).await;
        tokio::task::yield_now().await;
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_firing() {
        let dispatcher = TokioTaskDispatcher::new();
        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = fired.clone();
        let handle = dispatcher.schedule(
            50,
            Box::new(move || {
                fired2.store(true, Ordering::SeqCst);
            }),
        );
        assert!(handle.cancel());

        tokio::time::advance(Duration::from_millis(100)).await;
        tokio::task::yield_now().await;
        assert!(!fired.load(Ordering::SeqCst));
    }
}


