//! Live session tracking.
//!
//! # Responsibilities
//! - Count live sessions per listener
//! - Let a stopping listener wait until every session has closed
//! - Keep the session gauges in step with the count

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

use crate::observability::metrics;

#[derive(Debug)]
struct Inner {
    listener: String,
    active: AtomicUsize,
    idle: Notify,
}

/// Tracks live sessions for graceful shutdown.
#[derive(Debug, Clone)]
pub struct SessionTracker {
    inner: Arc<Inner>,
}

impl SessionTracker {
    pub fn new(listener: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                listener: listener.into(),
                active: AtomicUsize::new(0),
                idle: Notify::new(),
            }),
        }
    }

    /// Record a new live session. Returns a guard that releases it on drop.
    pub fn track(&self) -> SessionGuard {
        self.inner.active.fetch_add(1, Ordering::SeqCst);
        metrics::record_session_started(&self.inner.listener);
        SessionGuard {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn active_count(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Wait until no session is live.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.active_count() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Guard that tracks one session's lifetime.
#[derive(Debug)]
pub struct SessionGuard {
    inner: Arc<Inner>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        metrics::record_session_ended(&self.inner.listener);
        if self.inner.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.idle.notify_waiters();
        }
    }
}
