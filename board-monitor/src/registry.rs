//! Ordered device list with O(1) handle lookup
//!
//! The registry is the single-writer core of the monitor: it is only ever
//! touched from the consumer thread, through `&mut Monitor`. Each applied
//! event yields exactly one [`Mutation`] naming the row it affected, which
//! the monitor then forwards to observers.

use std::collections::HashMap;
use std::sync::Arc;

use board_source::{DeviceDescriptor, DeviceHandle, EventKind, PlatformEvent};

use crate::device::{Device, DeviceRef};
use crate::error::RegistryAnomaly;

/// A single change to the row sequence
#[derive(Debug, Clone)]
pub(crate) enum Mutation {
    Inserted(usize, DeviceRef),
    Updated(usize, DeviceRef),
    Removed(usize, DeviceRef),
}

#[derive(Debug, Default)]
pub(crate) struct Registry {
    devices: Vec<DeviceRef>,
    lookup: HashMap<DeviceHandle, usize>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn devices(&self) -> &[DeviceRef] {
        &self.devices
    }

    pub(crate) fn len(&self) -> usize {
        self.devices.len()
    }

    pub(crate) fn get(&self, row: usize) -> Option<&DeviceRef> {
        self.devices.get(row)
    }

    pub(crate) fn row_of(&self, handle: DeviceHandle) -> Option<usize> {
        self.lookup.get(&handle).copied()
    }

    /// Apply one platform event
    ///
    /// `build` creates the device for an Added event; it is only called
    /// when the handle is not already tracked.
    pub(crate) fn apply(
        &mut self,
        event: PlatformEvent,
        build: impl FnOnce(&DeviceDescriptor) -> Device,
    ) -> Result<Mutation, RegistryAnomaly> {
        match event {
            PlatformEvent::Added(descriptor) => {
                if self.lookup.contains_key(&descriptor.handle) {
                    return Err(RegistryAnomaly::DuplicateDevice {
                        handle: descriptor.handle,
                        identity: descriptor.identity,
                    });
                }
                let device = Arc::new(build(&descriptor));
                let row = self.devices.len();
                self.lookup.insert(descriptor.handle, row);
                self.devices.push(Arc::clone(&device));
                Ok(Mutation::Inserted(row, device))
            }
            PlatformEvent::Changed(descriptor) => {
                let row = self.tracked_row(descriptor.handle, EventKind::Changed)?;
                let device = Arc::clone(&self.devices[row]);
                device.apply_change(&descriptor);
                Ok(Mutation::Updated(row, device))
            }
            PlatformEvent::Removed(handle) => {
                let row = self.tracked_row(handle, EventKind::Removed)?;
                let device = self.remove_row(row);
                device.mark_removed();
                Ok(Mutation::Removed(row, device))
            }
        }
    }

    /// Report a property change on a tracked device
    ///
    /// Returns `None` when the device has been removed since the refresh
    /// was queued.
    pub(crate) fn refresh(&self, handle: DeviceHandle) -> Option<Mutation> {
        let row = self.row_of(handle)?;
        Some(Mutation::Updated(row, Arc::clone(&self.devices[row])))
    }

    /// Remove every device, last row first
    pub(crate) fn clear(&mut self) -> Vec<Mutation> {
        let mut removed = Vec::with_capacity(self.devices.len());
        while let Some(device) = self.devices.pop() {
            device.mark_removed();
            removed.push(Mutation::Removed(self.devices.len(), device));
        }
        self.lookup.clear();
        removed
    }

    fn tracked_row(&self, handle: DeviceHandle, kind: EventKind) -> Result<usize, RegistryAnomaly> {
        self.row_of(handle)
            .ok_or(RegistryAnomaly::UnknownDevice { handle, kind })
    }

    fn remove_row(&mut self, row: usize) -> DeviceRef {
        let device = self.devices.remove(row);
        self.lookup.remove(&device.handle());
        for later in &self.devices[row..] {
            if let Some(index) = self.lookup.get_mut(&later.handle()) {
                *index -= 1;
            }
        }
        device
    }

    /// Every lookup entry points at the row holding that handle
    #[cfg(test)]
    pub(crate) fn is_consistent(&self) -> bool {
        self.lookup.len() == self.devices.len()
            && self
                .devices
                .iter()
                .enumerate()
                .all(|(row, device)| self.lookup.get(&device.handle()) == Some(&row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::LifecycleState;
    use board_source::Capabilities;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn desc(raw: u64) -> DeviceDescriptor {
        let handle = DeviceHandle::new(raw);
        DeviceDescriptor::new(handle, format!("SN{}", raw), format!("usb-1-{}", raw))
            .with_model("Teensy")
    }

    fn apply(registry: &mut Registry, event: PlatformEvent) -> Result<Mutation, RegistryAnomaly> {
        registry.apply(event, Device::from_descriptor)
    }

    fn handles(registry: &Registry) -> Vec<u64> {
        registry.devices().iter().map(|d| d.handle().raw()).collect()
    }

    #[test]
    fn test_remove_shifts_later_rows() {
        let mut registry = Registry::new();
        for raw in 1..=4 {
            apply(&mut registry, PlatformEvent::Added(desc(raw))).unwrap();
        }

        let mutation = apply(&mut registry, PlatformEvent::Removed(DeviceHandle::new(2))).unwrap();
        assert!(matches!(
            mutation,
            Mutation::Removed(1, ref d) if d.lifecycle() == LifecycleState::Removed
        ));
        assert_eq!(handles(&registry), vec![1, 3, 4]);
        assert_eq!(registry.row_of(DeviceHandle::new(4)), Some(2));
        assert!(registry.is_consistent());
    }

    #[test]
    fn test_duplicate_added_is_rejected() {
        let mut registry = Registry::new();
        apply(&mut registry, PlatformEvent::Added(desc(1))).unwrap();

        let err = apply(&mut registry, PlatformEvent::Added(desc(1))).unwrap_err();
        assert!(matches!(
            err,
            RegistryAnomaly::DuplicateDevice { handle, .. } if handle == DeviceHandle::new(1)
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unknown_handles_are_rejected() {
        let mut registry = Registry::new();
        let err = apply(&mut registry, PlatformEvent::Changed(desc(9))).unwrap_err();
        assert_eq!(
            err,
            RegistryAnomaly::UnknownDevice {
                handle: DeviceHandle::new(9),
                kind: EventKind::Changed
            }
        );
        let err = apply(&mut registry, PlatformEvent::Removed(DeviceHandle::new(9))).unwrap_err();
        assert!(matches!(err, RegistryAnomaly::UnknownDevice { kind: EventKind::Removed, .. }));
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_changed_updates_in_place() {
        let mut registry = Registry::new();
        apply(&mut registry, PlatformEvent::Added(desc(1))).unwrap();
        let before = Arc::clone(&registry.devices()[0]);

        let changed = desc(1).with_capabilities(Capabilities::UPLOAD);
        let mutation = apply(&mut registry, PlatformEvent::Changed(changed)).unwrap();

        assert!(matches!(mutation, Mutation::Updated(0, _)));
        assert!(Arc::ptr_eq(&before, &registry.devices()[0]));
        assert!(before.is_upload_available());
    }

    #[test]
    fn test_refresh_ignores_removed_devices() {
        let mut registry = Registry::new();
        apply(&mut registry, PlatformEvent::Added(desc(1))).unwrap();
        assert!(matches!(registry.refresh(DeviceHandle::new(1)), Some(Mutation::Updated(0, _))));

        apply(&mut registry, PlatformEvent::Removed(DeviceHandle::new(1))).unwrap();
        assert!(registry.refresh(DeviceHandle::new(1)).is_none());
    }

    #[test]
    fn test_clear_reports_last_row_first() {
        let mut registry = Registry::new();
        for raw in 1..=3 {
            apply(&mut registry, PlatformEvent::Added(desc(raw))).unwrap();
        }

        let rows: Vec<(usize, u64)> = registry
            .clear()
            .into_iter()
            .map(|m| match m {
                Mutation::Removed(row, device) => (row, device.handle().raw()),
                other => panic!("unexpected {:?}", other),
            })
            .collect();

        assert_eq!(rows, vec![(2, 3), (1, 2), (0, 1)]);
        assert_eq!(registry.len(), 0);
        assert!(registry.is_consistent());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add(u64),
        Change(u64),
        Remove(u64),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u64..12).prop_map(Op::Add),
            (0u64..12).prop_map(Op::Change),
            (0u64..12).prop_map(Op::Remove),
        ]
    }

    proptest! {
        /// The lookup always mirrors the sequence and the live set matches a model
        #[test]
        fn prop_registry_tracks_live_handles(ops in prop::collection::vec(op_strategy(), 0..60)) {
            let mut registry = Registry::new();
            let mut model: Vec<u64> = Vec::new();

            for op in ops {
                let event = match op {
                    Op::Add(raw) => PlatformEvent::Added(desc(raw)),
                    Op::Change(raw) => PlatformEvent::Changed(desc(raw)),
                    Op::Remove(raw) => PlatformEvent::Removed(DeviceHandle::new(raw)),
                };
                let result = apply(&mut registry, event);

                match (&op, result) {
                    (Op::Add(raw), Ok(Mutation::Inserted(row, _))) => {
                        prop_assert!(!model.contains(raw));
                        prop_assert_eq!(row, model.len());
                        model.push(*raw);
                    }
                    (Op::Add(raw), Err(_)) => prop_assert!(model.contains(raw)),
                    (Op::Change(raw), Ok(Mutation::Updated(row, _))) => {
                        prop_assert_eq!(model[row], *raw);
                    }
                    (Op::Remove(raw), Ok(Mutation::Removed(row, _))) => {
                        prop_assert_eq!(model.remove(row), *raw);
                    }
                    (Op::Change(raw) | Op::Remove(raw), Err(_)) => {
                        prop_assert!(!model.contains(raw));
                    }
                    (op, other) => prop_assert!(false, "{:?} produced {:?}", op, other),
                }

                prop_assert!(registry.is_consistent());
                prop_assert_eq!(handles(&registry), model.clone());
            }

            let unique: HashSet<_> = model.iter().collect();
            prop_assert_eq!(unique.len(), registry.len());
        }
    }
}
