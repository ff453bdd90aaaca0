//! Handoff queue between producer threads and the consumer

use std::collections::VecDeque;

use board_source::{DeviceHandle, PlatformEvent};
use parking_lot::Mutex;

use crate::notifier::{DescriptorNotifier, WakeCallback};

/// Work item waiting for the next drain
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Pending {
    Event(PlatformEvent),
    /// A property changed off the consumer thread
    Refresh(DeviceHandle),
    SourceFailure(String),
}

/// Mutex-guarded FIFO written by the detection thread and property setters
///
/// The lock is held only for a push or for swapping the whole queue out.
/// Readiness is flagged and cleared under the same lock, so the notifier
/// reports pending exactly when the queue is non-empty.
#[derive(Debug)]
pub(crate) struct PendingQueue {
    items: Mutex<VecDeque<Pending>>,
    notifier: DescriptorNotifier,
}

impl PendingQueue {
    pub(crate) fn new(notifier: DescriptorNotifier) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            notifier,
        }
    }

    pub(crate) fn push(&self, item: Pending) {
        self.extend([item]);
    }

    pub(crate) fn extend(&self, items: impl IntoIterator<Item = Pending>) {
        if let Some(wake) = self.enqueue(items) {
            wake();
        }
    }

    /// Queue items and flag readiness, leaving the wake callback to the caller
    ///
    /// Used where the caller holds another lock that the callback must not
    /// run under.
    pub(crate) fn enqueue(
        &self,
        items: impl IntoIterator<Item = Pending>,
    ) -> Option<WakeCallback> {
        let mut queue = self.items.lock();
        let before = queue.len();
        queue.extend(items);
        if queue.len() == before {
            return None;
        }
        self.notifier.flag()
    }

    /// Take everything queued so far and clear readiness
    pub(crate) fn take_all(&self) -> VecDeque<Pending> {
        let mut queue = self.items.lock();
        self.notifier.clear();
        std::mem::take(&mut *queue)
    }

    pub(crate) fn len(&self) -> usize {
        self.items.lock().len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}
