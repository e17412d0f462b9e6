//! Tracks the set of in-flight upload attempts, bounded by a configured cap.
//!
//! The registry owns each [`UploadContext`] for exactly the window between
//! "handed to the packager" and "terminal outcome reported back" — it does
//! not own the upload attempt's actual work (the HTTP round trip lives
//! entirely outside this crate).

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::Notify;

use crate::events::{UploadContext, UploadContextId};

/// Bounded set of in-flight [`UploadContext`]s.
///
/// `drain_wait` is signalled on every removal via a [`Notify`] rather than
/// a yield-spin loop — stop is rare enough that a spin loop would have been
/// acceptable, but a condition variable is simpler to reason about and
/// costs nothing extra here.
pub struct UploadRegistry {
    max_pending_requests: u32,
    inner: Mutex<HashMap<UploadContextId, UploadContext>>,
    drained: Notify,
}

impl UploadRegistry {
    pub fn new(max_pending_requests: u32) -> Self {
        Self {
            max_pending_requests: max_pending_requests.max(1),
            inner: Mutex::new(HashMap::new()),
            drained: Notify::new(),
        }
    }

    /// Number of upload attempts currently registered.
    pub fn count(&self) -> u32 {
        self.inner.lock().expect("registry mutex poisoned").len() as u32
    }

    /// Whether the configured cap has been reached — the Scheduler's
    /// backpressure check.
    pub fn is_full(&self) -> bool {
        self.count() >= self.max_pending_requests
    }

    /// Insert `ctx`. Returns `false` (and does not insert) if a context
    /// with the same id is already registered — this should be
    /// unreachable in practice since ids are process-unique, but the
    /// contract mirrors the source's `addUpload`, which can fail.
    pub fn add(&self, ctx: UploadContext) -> bool {
        let mut inner = self.inner.lock().expect("registry mutex poisoned");
        if inner.contains_key(&ctx.id()) {
            return false;
        }
        inner.insert(ctx.id(), ctx);
        true
    }

    /// Remove the context with the given id. Returns `true` if something
    /// was removed. Removing an id that isn't present is a logic error in
    /// the caller (see §4.8) but is not itself fatal here — the caller is
    /// responsible for asserting/logging.
    pub fn remove(&self, id: UploadContextId) -> bool {
        let removed = {
            let mut inner = self.inner.lock().expect("registry mutex poisoned");
            inner.remove(&id).is_some()
        };
        if removed && self.count() == 0 {
            self.drained.notify_waiters();
        }
        removed
    }

    /// Resolves once `count() == 0`. Used only while the lifecycle is
    /// `Stopping`.
    pub async fn drain_wait(&self) {
        loop {
            let notified = self.drained.notified();
            if self.count() == 0 {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventLatency;

    #[test]
    fn add_remove_tracks_count() {
        let reg = UploadRegistry::new(2);
        assert_eq!(reg.count(), 0);
        let ctx = UploadContext::new(EventLatency::Normal);
        let id = ctx.id();
        assert!(reg.add(ctx));
        assert_eq!(reg.count(), 1);
        assert!(reg.remove(id));
        assert_eq!(reg.count(), 0);
        assert!(!reg.remove(id));
    }

    #[test]
    fn is_full_respects_cap() {
        let reg = UploadRegistry::new(1);
        assert!(!reg.is_full());
        let ctx = UploadContext::new(EventLatency::RealTime);
        reg.add(ctx);
        assert!(reg.is_full());
    }

    #[tokio::test]
    async fn drain_wait_resolves_once_empty() {
        let reg = std::sync::Arc::new(UploadRegistry::new(4));
        let ctx = UploadContext::new(EventLatency::Normal);
        let id = ctx.id();
        reg.add(ctx);

        let reg2 = reg.clone();
        let waiter = tokio::spawn(async move {
            reg2.drain_wait().await;
        });

        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        reg.remove(id);
        waiter.await.unwrap();
    }
}
