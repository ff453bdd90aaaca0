//! Handles for jobs submitted against a device

use std::fmt;
use std::time::Duration;

use board_source::DeviceHandle;
use task_pool::{JobHandle, JobId, PoolError};

use crate::error::TaskError;

/// Result of a device job as seen by the caller
pub type TaskResult<T> = std::result::Result<T, TaskError>;

/// Handle to a job submitted through [`Monitor::submit`](crate::Monitor::submit)
///
/// Safe to poll from the consumer thread. The outcome is either the job's
/// value, [`TaskError::DeviceGone`] when the device was removed before the
/// job started, or a pool error (cancelled, abandoned, panicked).
pub struct DeviceJob<T> {
    device: DeviceHandle,
    inner: JobHandle<TaskResult<T>>,
}

impl<T> DeviceJob<T> {
    pub(crate) fn new(device: DeviceHandle, inner: JobHandle<TaskResult<T>>) -> Self {
        Self { device, inner }
    }

    pub fn id(&self) -> JobId {
        self.inner.id()
    }

    /// Handle of the device the job was submitted for
    pub fn device(&self) -> DeviceHandle {
        self.device
    }

    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }

    /// Take the outcome if the job has finished
    pub fn try_take(&self) -> Option<TaskResult<T>> {
        self.inner.try_take().map(flatten)
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<TaskResult<T>> {
        self.inner.wait_timeout(timeout).map(flatten)
    }

    pub fn wait(self) -> TaskResult<T> {
        flatten(self.inner.wait())
    }
}

fn flatten<T>(outcome: Result<TaskResult<T>, PoolError>) -> TaskResult<T> {
    outcome.map_err(TaskError::from).and_then(|result| result)
}

impl<T> fmt::Debug for DeviceJob<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceJob")
            .field("id", &self.id())
            .field("device", &self.device)
            .field("finished", &self.is_finished())
            .finish()
    }
}
