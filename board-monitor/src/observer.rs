//! Row-level observers of the device registry
//!
//! Every mutation of the registry's ordered device list is reported to
//! observers as exactly one insert, update or remove keyed by row. Observers
//! run on the consumer thread, inside `drain_and_apply`.
//!
//! [`ChannelObserver`] forwards the same notifications into a channel so
//! another part of the application can consume them as a stream:
//!
//! ```rust,ignore
//! let changes = monitor.observe_channel();
//!
//! // Non-blocking, after each drain
//! for change in changes.try_iter() {
//!     println!("{:?}", change);
//! }
//!
//! // With timeout
//! if let Some(change) = changes.recv_timeout(Duration::from_secs(1)) {
//!     println!("{:?}", change);
//! }
//! ```

use std::sync::mpsc;
use std::time::Duration;

use crate::device::DeviceRef;
use crate::error::RegistryAnomaly;

/// Receives row-level notifications from the registry
pub trait RowObserver: Send {
    /// `device` now occupies `row`; later rows shifted down by one
    fn row_inserted(&mut self, row: usize, device: &DeviceRef);

    /// Fields of the device at `row` changed in place
    fn row_updated(&mut self, row: usize, device: &DeviceRef);

    /// `device` left `row`; later rows shifted up by one
    fn row_removed(&mut self, row: usize, device: &DeviceRef);

    fn anomaly(&mut self, anomaly: &RegistryAnomaly) {
        let _ = anomaly;
    }
}

/// One notification as a value
#[derive(Debug, Clone)]
pub enum RowChange {
    Inserted { row: usize, device: DeviceRef },
    Updated { row: usize, device: DeviceRef },
    Removed { row: usize, device: DeviceRef },
    Anomaly(RegistryAnomaly),
}

impl RowChange {
    pub fn row(&self) -> Option<usize> {
        match self {
            RowChange::Inserted { row, .. }
            | RowChange::Updated { row, .. }
            | RowChange::Removed { row, .. } => Some(*row),
            RowChange::Anomaly(_) => None,
        }
    }

    pub fn device(&self) -> Option<&DeviceRef> {
        match self {
            RowChange::Inserted { device, .. }
            | RowChange::Updated { device, .. }
            | RowChange::Removed { device, .. } => Some(device),
            RowChange::Anomaly(_) => None,
        }
    }
}

/// Observer that forwards notifications into a channel
///
/// Sending stops silently once the [`RowChangeIterator`] is dropped.
pub struct ChannelObserver {
    tx: mpsc::Sender<RowChange>,
}

impl ChannelObserver {
    pub fn new() -> (Self, RowChangeIterator) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, RowChangeIterator { rx })
    }

    fn forward(&self, change: RowChange) {
        if self.tx.send(change).is_err() {
            tracing::trace!("Row change receiver dropped");
        }
    }
}

impl RowObserver for ChannelObserver {
    fn row_inserted(&mut self, row: usize, device: &DeviceRef) {
        self.forward(RowChange::Inserted {
            row,
            device: DeviceRef::clone(device),
        });
    }

    fn row_updated(&mut self, row: usize, device: &DeviceRef) {
        self.forward(RowChange::Updated {
            row,
            device: DeviceRef::clone(device),
        });
    }

    fn row_removed(&mut self, row: usize, device: &DeviceRef) {
        self.forward(RowChange::Removed {
            row,
            device: DeviceRef::clone(device),
        });
    }

    fn anomaly(&mut self, anomaly: &RegistryAnomaly) {
        self.forward(RowChange::Anomaly(anomaly.clone()));
    }
}

/// Blocking iterator over row changes
///
/// Yields `None` from the blocking methods once the observer is gone, which
/// happens when the monitor is dropped.
pub struct RowChangeIterator {
    rx: mpsc::Receiver<RowChange>,
}

impl RowChangeIterator {
    /// Block until the next change is available
    pub fn recv(&self) -> Option<RowChange> {
        self.rx.recv().ok()
    }

    /// Block until the next change or timeout expires
    pub fn recv_timeout(&self, timeout: Duration) -> Option<RowChange> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Try to receive a change without blocking
    pub fn try_recv(&self) -> Option<RowChange> {
        self.rx.try_recv().ok()
    }

    /// Iterate over the changes currently available without blocking
    pub fn try_iter(&self) -> TryIter<'_> {
        TryIter { inner: self }
    }

    /// Iterate, waiting up to `timeout` for each change
    pub fn timeout_iter(&self, timeout: Duration) -> TimeoutIter<'_> {
        TimeoutIter {
            inner: self,
            timeout,
        }
    }
}

impl Iterator for RowChangeIterator {
    type Item = RowChange;

    fn next(&mut self) -> Option<Self::Item> {
        self.recv()
    }
}

/// Non-blocking iterator over currently available changes
pub struct TryIter<'a> {
    inner: &'a RowChangeIterator,
}

impl<'a> Iterator for TryIter<'a> {
    type Item = RowChange;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.try_recv()
    }
}

/// Blocking iterator with timeout
pub struct TimeoutIter<'a> {
    inner: &'a RowChangeIterator,
    timeout: Duration,
}

impl<'a> Iterator for TimeoutIter<'a> {
    type Item = RowChange;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.recv_timeout(self.timeout)
    }
}
