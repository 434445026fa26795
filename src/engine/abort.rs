// src/engine/abort.rs

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

#[derive(Debug, Default)]
struct AbortState {
    requested: AtomicBool,
    notify: Notify,
}

/// External cancellation for a workflow run.
///
/// Cloning is cheap; every clone refers to the same flag. Once requested, an
/// abort cannot be withdrawn.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    inner: Arc<AbortState>,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that the run stops. Idempotent.
    pub fn abort(&self) {
        if !self.inner.requested.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_waiters();
        }
    }

    pub fn is_requested(&self) -> bool {
        self.inner.requested.load(Ordering::SeqCst)
    }

    /// Resolve once an abort has been requested.
    pub async fn requested(&self) {
        loop {
            // Register before checking the flag so a concurrent `abort()`
            // cannot slip between the check and the wait.
            let notified = self.inner.notify.notified();
            if self.is_requested() {
                return;
            }
            notified.await;
        }
    }
}
