//! Cancellation tokens that trigger a query's disposal.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use slab::Slab;

type Callback = Box<dyn FnOnce() + Send>;

/// A cancellation signal with registered callbacks.
///
/// Cancelling runs every registered callback once; callbacks registered after
/// cancellation run immediately. Clones share the same signal.
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

#[derive(Default)]
struct TokenInner {
    cancelled: AtomicBool,
    callbacks: Mutex<Slab<Callback>>,
}

/// Registration of a callback on a [`CancellationToken`].
#[derive(Debug)]
pub struct Registration {
    token: CancellationToken,
    slot: Option<usize>,
}

impl Registration {
    /// Remove the callback without running it.
    pub fn unregister(mut self) {
        // A cancelled token has already drained its callbacks.
        if self.token.is_cancelled() {
            return;
        }
        if let Some(slot) = self.slot.take() {
            self.token.inner.callbacks.lock().try_remove(slot);
        }
    }
}

impl CancellationToken {
    /// A token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true once cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Cancel and run registered callbacks. Returns false if already cancelled.
    pub fn cancel(&self) -> bool {
        if self.inner.cancelled.swap(true, Ordering::AcqRel) {
            return false;
        }
        let callbacks: Vec<Callback> = self.inner.callbacks.lock().drain().collect();
        for callback in callbacks {
            callback();
        }
        true
    }

    /// Number of callbacks waiting for cancellation.
    pub fn callback_count(&self) -> usize {
        self.inner.callbacks.lock().len()
    }

    /// Run `callback` on cancellation.
    pub fn on_cancel(&self, callback: impl FnOnce() + Send + 'static) -> Registration {
        if self.is_cancelled() {
            callback();
            return Registration {
                token: self.clone(),
                slot: None,
            };
        }
        let slot = self.inner.callbacks.lock().insert(Box::new(callback));
        // Cancelled between the check and the insert.
        if self.is_cancelled() {
            let callback = self.inner.callbacks.lock().try_remove(slot);
            if let Some(callback) = callback {
                callback();
            }
            return Registration {
                token: self.clone(),
                slot: None,
            };
        }
        Registration {
            token: self.clone(),
            slot: Some(slot),
        }
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .field("callbacks", &self.callback_count())
            .finish()
    }
}

/// Collects cleanup functions and runs them together.
///
/// Superseded by [`CancellationToken`]; queries accept both.
#[derive(Clone, Default)]
pub struct Disposer {
    token: CancellationToken,
}

impl Disposer {
    /// An empty disposer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a cleanup function.
    pub fn add(&self, cleanup: impl FnOnce() + Send + 'static) -> Registration {
        self.token.on_cancel(cleanup)
    }

    /// Run every cleanup function. Later calls do nothing.
    pub fn dispose(&self) {
        self.token.cancel();
    }

    /// Returns true once disposed.
    pub fn is_disposed(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl fmt::Debug for Disposer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disposer")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_callbacks_run_once() {
        let token = CancellationToken::new();
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let hits = hits.clone();
            let _ = token.on_cancel(move || {
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert!(token.cancel());
        assert!(!token.cancel());
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_late_registration_runs_immediately() {
        let token = CancellationToken::new();
        token.cancel();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let _ = token.on_cancel(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unregister_skips_callback() {
        let token = CancellationToken::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        token
            .on_cancel(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unregister();
        token.cancel();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unregister_after_cancel_is_harmless() {
        let token = CancellationToken::new();
        let registration = token.on_cancel(|| {});
        token.cancel();
        let late = token.on_cancel(|| {});
        registration.unregister();
        late.unregister();
        assert_eq!(token.callback_count(), 0);
    }

    #[test]
    fn test_disposer_runs_cleanups() {
        let disposer = Disposer::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        disposer.add(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        disposer.dispose();
        disposer.dispose();
        assert!(disposer.is_disposed());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
