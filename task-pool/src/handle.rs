//! Job completion handles
//!
//! Every submitted job gets a [`JobHandle`] backed by a shared completion
//! slot. The first outcome written to the slot wins: a job that finishes
//! after being abandoned by shutdown cannot overwrite `ShutdownTimeout`.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::PoolError;

/// Identifier assigned to each submitted job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub(crate) u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

enum Slot<T> {
    Pending,
    Ready(Result<T, PoolError>),
    Taken,
}

pub(crate) struct Completion<T> {
    slot: Mutex<Slot<T>>,
    ready: Condvar,
}

impl<T> Completion<T> {
    pub(crate) fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::Pending),
            ready: Condvar::new(),
        }
    }

    /// Store the outcome unless one was already stored
    pub(crate) fn complete(&self, outcome: Result<T, PoolError>) -> bool {
        let mut slot = self.slot.lock();
        if !matches!(*slot, Slot::Pending) {
            return false;
        }
        *slot = Slot::Ready(outcome);
        self.ready.notify_all();
        true
    }

    fn take(slot: &mut Slot<T>) -> Option<Result<T, PoolError>> {
        match std::mem::replace(slot, Slot::Taken) {
            Slot::Ready(outcome) => Some(outcome),
            other => {
                *slot = other;
                None
            }
        }
    }
}

/// Handle to the eventual result of a submitted job
///
/// Polling methods never block and are safe to call from an event loop.
/// The result can be taken exactly once.
pub struct JobHandle<T> {
    id: JobId,
    completion: Arc<Completion<T>>,
}

impl<T> JobHandle<T> {
    pub(crate) fn new(id: JobId, completion: Arc<Completion<T>>) -> Self {
        Self { id, completion }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    /// Whether an outcome is available (or was already taken)
    pub fn is_finished(&self) -> bool {
        !matches!(*self.completion.slot.lock(), Slot::Pending)
    }

    /// Take the outcome if it is ready
    pub fn try_take(&self) -> Option<Result<T, PoolError>> {
        let mut slot = self.completion.slot.lock();
        Completion::take(&mut slot)
    }

    /// Block until the outcome is ready or `timeout` expires
    ///
    /// Returns `None` on timeout or when the outcome was already taken.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T, PoolError>> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.completion.slot.lock();
        while matches!(*slot, Slot::Pending) {
            if self.completion.ready.wait_until(&mut slot, deadline).timed_out() {
                break;
            }
        }
        Completion::take(&mut slot)
    }

    /// Block until the outcome is ready
    pub fn wait(self) -> Result<T, PoolError> {
        let mut slot = self.completion.slot.lock();
        while matches!(*slot, Slot::Pending) {
            self.completion.ready.wait(&mut slot);
        }
        // Taken is only reachable through try_take/wait_timeout on this same handle
        Completion::take(&mut slot).unwrap_or(Err(PoolError::PoolShutDown))
    }
}

impl<T> fmt::Debug for JobHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle")
            .field("id", &self.id)
            .field("finished", &self.is_finished())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn handle_pair() -> (Arc<Completion<u32>>, JobHandle<u32>) {
        let completion = Arc::new(Completion::new());
        let handle = JobHandle::new(JobId(1), Arc::clone(&completion));
        (completion, handle)
    }

    #[test]
    fn test_first_outcome_wins() {
        let (completion, handle) = handle_pair();

        assert!(completion.complete(Err(PoolError::ShutdownTimeout)));
        assert!(!completion.complete(Ok(7)));

        assert_eq!(handle.try_take(), Some(Err(PoolError::ShutdownTimeout)));
    }

    #[test]
    fn test_try_take_only_once() {
        let (completion, handle) = handle_pair();
        assert!(handle.try_take().is_none());
        assert!(!handle.is_finished());

        completion.complete(Ok(3));
        assert!(handle.is_finished());
        assert_eq!(handle.try_take(), Some(Ok(3)));
        assert_eq!(handle.try_take(), None);
        assert!(handle.is_finished());
    }

    #[test]
    fn test_wait_timeout_expires() {
        let (_completion, handle) = handle_pair();
        let start = Instant::now();
        assert!(handle.wait_timeout(Duration::from_millis(30)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn test_wait_blocks_until_completed() {
        let (completion, handle) = handle_pair();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            completion.complete(Ok(42));
        });
        assert_eq!(handle.wait(), Ok(42));
    }

    #[test]
    fn test_job_id_display() {
        assert_eq!(JobId(12).to_string(), "job-12");
    }
}
