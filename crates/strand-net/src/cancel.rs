//! Shared cancellation with run-once hooks.
//!
//! Each connection owns one [`Canceler`] cloned into its reader, writer
//! and close path. The first `cancel()` wins: hooks registered with
//! `on_cancel` run exactly once, then every pending and future
//! [`Canceler::canceled`] wait resolves.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

type Hook = Box<dyn FnOnce() + Send>;

/// A clonable cancellation handle.
#[derive(Clone)]
pub struct Canceler {
    inner: Arc<Inner>,
}

struct Inner {
    canceled: AtomicBool,
    notify: Notify,
    hooks: std::sync::Mutex<Vec<Hook>>,
}

impl Canceler {
    /// Create a fresh, untripped handle.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                canceled: AtomicBool::new(false),
                notify: Notify::new(),
                hooks: std::sync::Mutex::new(Vec::new()),
            }),
        }
    }

    /// Whether the handle has been tripped.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.inner.canceled.load(Ordering::Acquire)
    }

    /// Register a hook to run when the handle trips.
    ///
    /// Runs immediately when the handle is already tripped. Hooks run in
    /// registration order, on the task that calls [`Canceler::cancel`].
    pub fn on_cancel(&self, hook: impl FnOnce() + Send + 'static) {
        {
            let mut hooks = self.inner.hooks.lock().unwrap_or_else(|e| e.into_inner());
            if !self.is_canceled() {
                hooks.push(Box::new(hook));
                return;
            }
        }
        hook();
    }

    /// Trip the handle. Idempotent; only the first call runs the hooks.
    pub fn cancel(&self) {
        if self.inner.canceled.swap(true, Ordering::AcqRel) {
            return;
        }
        let hooks = {
            let mut hooks = self.inner.hooks.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *hooks)
        };
        for hook in hooks {
            hook();
        }
        self.inner.notify.notify_waiters();
    }

    /// Resolve once the handle trips; resolves immediately when it
    /// already has.
    pub async fn canceled(&self) {
        loop {
            if self.is_canceled() {
                return;
            }
            let notified = self.inner.notify.notified();
            if self.is_canceled() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for Canceler {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Canceler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Canceler")
            .field("canceled", &self.is_canceled())
            .finish()
    }
}
