//! Readiness signal between the detection thread and the consumer
//!
//! The detection thread flags readiness after queueing events; the consumer
//! either blocks in [`DescriptorNotifier::wait`] or registers a wake
//! callback for its own event loop. One arm yields at most one wakeup, so a
//! burst of events coalesces into a single drain.
//!
//! ```text
//! detection thread            notifier                 consumer
//!  push events ──► flag() ──► pending = true ──► wait() returns Ready
//!                                                   drain_and_apply():
//!                                                     take queue + clear()
//! ```
//!
//! The pending queue flags and clears readiness while holding its own lock,
//! so `pending` is set exactly when the queue is non-empty. A `Ready` wait
//! always has something to drain, and an event pushed during a drain is
//! either taken by it or flags readiness for the next wait.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Wake callback invoked from the notifying thread
pub type WakeCallback = Arc<dyn Fn() + Send + Sync>;

/// Result of waiting for readiness
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Events are queued; drain them
    Ready,
    TimedOut,
    /// The monitor stopped
    Closed,
}

#[derive(Default)]
struct NotifierState {
    pending: bool,
    armed: bool,
    closed: bool,
    callback: Option<WakeCallback>,
}

struct Inner {
    state: Mutex<NotifierState>,
    ready: Condvar,
}

/// Readiness signal the consumer's event loop can wait on
///
/// Clones share the same signal.
#[derive(Clone)]
pub struct DescriptorNotifier {
    inner: Arc<Inner>,
}

impl DescriptorNotifier {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(NotifierState::default()),
                ready: Condvar::new(),
            }),
        }
    }

    /// Register interest in the next readiness signal
    ///
    /// If events are already pending the wake callback fires right away.
    pub fn arm(&self) {
        let callback = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            state.armed = true;
            if state.pending {
                Self::take_callback(&mut state)
            } else {
                None
            }
        };
        if let Some(callback) = callback {
            callback();
        }
    }

    pub fn is_armed(&self) -> bool {
        self.inner.state.lock().armed
    }

    /// Whether events were flagged since the last drain
    pub fn is_pending(&self) -> bool {
        self.inner.state.lock().pending
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Register the wake callback used while armed, replacing any previous one
    ///
    /// The callback runs on whichever thread flags readiness and must not
    /// block or call back into the monitor.
    pub fn set_callback(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.inner.state.lock().callback = Some(Arc::new(callback));
    }

    pub fn clear_callback(&self) {
        self.inner.state.lock().callback = None;
    }

    /// Block until events are pending or the notifier closes
    pub fn wait(&self) -> WaitOutcome {
        let mut state = self.inner.state.lock();
        loop {
            if state.closed {
                return WaitOutcome::Closed;
            }
            if state.pending {
                state.armed = false;
                return WaitOutcome::Ready;
            }
            state.armed = true;
            self.inner.ready.wait(&mut state);
        }
    }

    /// Block until events are pending, the notifier closes, or `timeout` expires
    pub fn wait_timeout(&self, timeout: Duration) -> WaitOutcome {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        loop {
            if state.closed {
                return WaitOutcome::Closed;
            }
            if state.pending {
                state.armed = false;
                return WaitOutcome::Ready;
            }
            state.armed = true;
            if self.inner.ready.wait_until(&mut state, deadline).timed_out() {
                return if state.closed {
                    WaitOutcome::Closed
                } else if state.pending {
                    state.armed = false;
                    WaitOutcome::Ready
                } else {
                    WaitOutcome::TimedOut
                };
            }
        }
    }

    /// Flag readiness and wake waiters
    ///
    /// Returns the wake callback when armed; the caller runs it after
    /// releasing its own locks.
    pub(crate) fn flag(&self) -> Option<WakeCallback> {
        let mut state = self.inner.state.lock();
        if state.closed {
            return None;
        }
        state.pending = true;
        self.inner.ready.notify_all();
        if state.armed {
            Self::take_callback(&mut state)
        } else {
            None
        }
    }

    #[cfg(test)]
    pub(crate) fn notify(&self) {
        if let Some(callback) = self.flag() {
            callback();
        }
    }

    /// Reset readiness; called with the queue lock held while it is emptied
    pub(crate) fn clear(&self) {
        self.inner.state.lock().pending = false;
    }

    /// Wake every waiter with [`WaitOutcome::Closed`]
    pub(crate) fn close(&self) {
        let mut state = self.inner.state.lock();
        state.closed = true;
        state.pending = false;
        state.armed = false;
        self.inner.ready.notify_all();
    }

    pub(crate) fn reopen(&self) {
        self.inner.state.lock().closed = false;
    }

    /// Disarm and hand out the callback if one is registered
    fn take_callback(state: &mut NotifierState) -> Option<WakeCallback> {
        let callback = state.callback.clone()?;
        state.armed = false;
        Some(callback)
    }
}

impl Default for DescriptorNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DescriptorNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("DescriptorNotifier")
            .field("pending", &state.pending)
            .field("armed", &state.armed)
            .field("closed", &state.closed)
            .field("has_callback", &state.callback.is_some())
            .finish()
    }
}
