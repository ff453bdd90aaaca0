//! Read-only view of the device list for threads other than the consumer

use std::sync::Arc;

use board_source::DeviceHandle;
use parking_lot::RwLock;

use crate::device::{Device, DeviceRef};

/// Shared snapshot of the registry, republished after every drain
///
/// Cloning is cheap; all clones observe the same published list. A
/// snapshot taken with [`SharedDevices::snapshot`] never changes.
#[derive(Clone)]
pub struct SharedDevices {
    current: Arc<RwLock<Arc<[DeviceRef]>>>,
}

impl SharedDevices {
    pub(crate) fn new() -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::from(Vec::new()))),
        }
    }

    pub(crate) fn publish(&self, devices: &[DeviceRef]) {
        *self.current.write() = Arc::from(devices);
    }

    /// The most recently published device list
    pub fn snapshot(&self) -> Arc<[DeviceRef]> {
        Arc::clone(&self.current.read())
    }

    pub fn len(&self) -> usize {
        self.current.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.read().is_empty()
    }

    pub fn by_handle(&self, handle: DeviceHandle) -> Option<DeviceRef> {
        self.find(|device| device.handle() == handle)
    }

    /// First published device matching `predicate`
    pub fn find(&self, predicate: impl Fn(&Device) -> bool) -> Option<DeviceRef> {
        self.current
            .read()
            .iter()
            .find(|device| predicate(device))
            .cloned()
    }
}

impl std::fmt::Debug for SharedDevices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedDevices")
            .field("len", &self.len())
            .finish()
    }
}
