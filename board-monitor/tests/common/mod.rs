//! Shared helpers for monitor integration tests

#![allow(dead_code)]

use std::time::{Duration, Instant};

use board_monitor::{Monitor, RegistryAnomaly, RowChange, RowChangeIterator};
use board_source::{DeviceDescriptor, DeviceHandle, SimulatedSource, SourceController};

/// Row notification reduced to comparable values
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Note {
    Insert(usize, u64),
    Update(usize, u64),
    Remove(usize, u64),
    Anomaly(RegistryAnomaly),
}

impl From<RowChange> for Note {
    fn from(change: RowChange) -> Self {
        match change {
            RowChange::Inserted { row, device } => Note::Insert(row, device.handle().raw()),
            RowChange::Updated { row, device } => Note::Update(row, device.handle().raw()),
            RowChange::Removed { row, device } => Note::Remove(row, device.handle().raw()),
            RowChange::Anomaly(anomaly) => Note::Anomaly(anomaly),
        }
    }
}

pub fn board(raw: u64) -> DeviceDescriptor {
    DeviceDescriptor::new(DeviceHandle::new(raw), format!("SN{:05}", raw), format!("usb-1-{}", raw))
        .with_model("Teensy 3.2")
}

pub fn handle(raw: u64) -> DeviceHandle {
    DeviceHandle::new(raw)
}

/// A started monitor over a simulated source, with a change stream attached
pub fn started(max_tasks: usize) -> (Monitor, SourceController, RowChangeIterator) {
    let (source, controller) = SimulatedSource::new();
    let mut monitor = Monitor::new(source);
    let changes = monitor.observe_channel();
    monitor.start(max_tasks).unwrap();
    (monitor, controller, changes)
}

/// Drain until `count` notifications have been observed or five seconds pass
pub fn collect(monitor: &mut Monitor, changes: &RowChangeIterator, count: usize) -> Vec<Note> {
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut notes: Vec<Note> = Vec::new();

    while notes.len() < count && Instant::now() < deadline {
        monitor.wait_and_drain(Duration::from_millis(50));
        notes.extend(changes.try_iter().map(Note::from));
    }
    notes
}

/// Raw handles of the current rows, in row order
pub fn rows(monitor: &Monitor) -> Vec<u64> {
    monitor.devices().iter().map(|d| d.handle().raw()).collect()
}
