//! Row-level behaviour of the registry, driven through a simulated source

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use board_monitor::prelude::*;
use board_monitor::{DeviceDescriptor, DeviceHandle};
use board_source::EventKind;
use common::{board, collect, handle, rows, started, Note};
use proptest::prelude::*;

// ============================================================================
// Event application
// ============================================================================

#[test]
fn test_add_change_remove_scenario() {
    let (mut monitor, controller, changes) = started(2);

    controller.send_all([
        PlatformEvent::Added(board(1)),
        PlatformEvent::Added(board(2)),
        PlatformEvent::Changed(board(1).with_capabilities(Capabilities::UPLOAD)),
        PlatformEvent::Removed(handle(1)),
        PlatformEvent::Added(board(3)),
    ]);

    let notes = collect(&mut monitor, &changes, 5);
    assert_eq!(
        notes,
        vec![
            Note::Insert(0, 1),
            Note::Insert(1, 2),
            Note::Update(0, 1),
            Note::Remove(0, 1),
            Note::Insert(1, 3),
        ]
    );
    assert_eq!(rows(&monitor), vec![2, 3]);
    assert_eq!(monitor.row_of(handle(3)), Some(1));
    assert_eq!(monitor.row_of(handle(1)), None);
}

#[test]
fn test_duplicate_added_reports_anomaly() {
    let (mut monitor, controller, changes) = started(1);

    controller.add(board(1));
    controller.add(board(1).with_model("Teensy 4.1"));

    let notes = collect(&mut monitor, &changes, 2);
    assert_eq!(notes[0], Note::Insert(0, 1));
    assert!(matches!(
        &notes[1],
        Note::Anomaly(RegistryAnomaly::DuplicateDevice { handle, .. }) if handle.raw() == 1
    ));
    assert_eq!(monitor.device_count(), 1);
    assert_eq!(monitor.device_at(0).unwrap().model(), "Teensy 3.2");
}

#[test]
fn test_unknown_handles_report_anomalies() {
    let (mut monitor, controller, changes) = started(1);

    controller.change(board(8));
    controller.remove(handle(9));

    let notes = collect(&mut monitor, &changes, 2);
    assert_eq!(
        notes,
        vec![
            Note::Anomaly(RegistryAnomaly::UnknownDevice {
                handle: handle(8),
                kind: EventKind::Changed,
            }),
            Note::Anomaly(RegistryAnomaly::UnknownDevice {
                handle: handle(9),
                kind: EventKind::Removed,
            }),
        ]
    );
    assert_eq!(monitor.device_count(), 0);
}

#[test]
fn test_draining_empty_queue_is_a_no_op() {
    let (mut monitor, _controller, changes) = started(1);

    assert_eq!(monitor.drain_and_apply(), 0);
    assert_eq!(monitor.drain_and_apply(), 0);
    assert!(changes.try_recv().is_none());
}

#[test]
fn test_changed_event_keeps_identity() {
    let (mut monitor, controller, changes) = started(1);

    controller.add(board(1));
    let moved = DeviceDescriptor::new(handle(1), "OTHER", "usb-9-9").with_model("Teensy LC");
    controller.change(moved);
    collect(&mut monitor, &changes, 2);

    let device = monitor.device_at(0).unwrap();
    assert_eq!(device.serial_number(), "SN00001");
    assert_eq!(device.location(), "usb-1-1");
    assert_eq!(device.model(), "Teensy LC");
    assert_eq!(device.lifecycle(), LifecycleState::Changed);
}

#[test]
fn test_reconnection_creates_new_device() {
    let (mut monitor, controller, changes) = started(1);

    controller.add(board(1));
    collect(&mut monitor, &changes, 1);
    let first = Arc::clone(monitor.device_at(0).unwrap());

    controller.remove(handle(1));
    controller.add(DeviceDescriptor::new(handle(11), "SN00001", "usb-1-1"));
    collect(&mut monitor, &changes, 2);

    let second = monitor.device_at(0).unwrap();
    assert!(!Arc::ptr_eq(&first, second));
    assert_eq!(first.serial_number(), second.serial_number());
    assert!(!first.is_live());
    assert!(second.is_live());
}

#[test]
fn test_find_and_shared_snapshot() {
    let (mut monitor, controller, changes) = started(1);
    let shared = monitor.shared();

    controller.add(board(1));
    controller.add(board(2).with_capabilities(Capabilities::UPLOAD | Capabilities::RESET));
    collect(&mut monitor, &changes, 2);

    let bootloader = monitor.find(|d| d.is_upload_available()).unwrap();
    assert_eq!(bootloader.handle(), handle(2));
    assert!(monitor.find(|d| d.serial_number() == "missing").is_none());

    let reader = shared.clone();
    let seen = thread::spawn(move || {
        reader
            .snapshot()
            .iter()
            .map(|d| d.handle().raw())
            .collect::<Vec<_>>()
    })
    .join()
    .unwrap();
    assert_eq!(seen, vec![1, 2]);
}

// ============================================================================
// Properties
// ============================================================================

#[test]
fn test_property_set_off_thread_refreshes_row() {
    let (mut monitor, controller, changes) = started(1);

    controller.add(board(1));
    controller.add(board(2));
    collect(&mut monitor, &changes, 2);

    let second = Arc::clone(monitor.device_at(1).unwrap());
    thread::spawn(move || {
        assert!(second.set_property(Firmware::new("blink.hex")));
    })
    .join()
    .unwrap();

    assert_eq!(collect(&mut monitor, &changes, 1), vec![Note::Update(1, 2)]);
    assert_eq!(
        monitor.device_at(1).unwrap().property::<Firmware>(),
        Some(Firmware::new("blink.hex"))
    );
}

#[test]
fn test_property_set_on_consumer_reports_immediately() {
    let (mut monitor, controller, changes) = started(1);

    controller.add(board(1));
    collect(&mut monitor, &changes, 1);

    assert!(monitor.set_property(0, ResetAfter(true)));
    assert_eq!(changes.try_recv().map(Note::from), Some(Note::Update(0, 1)));

    assert!(!monitor.set_property(0, ResetAfter(true)));
    assert!(!monitor.set_property(3, ClearOnReset(true)));
    assert!(changes.try_recv().is_none());
    assert_eq!(monitor.pending_count(), 0);
}

#[test]
fn test_property_on_removed_device_does_not_refresh() {
    let (mut monitor, controller, changes) = started(1);

    controller.add(board(1));
    collect(&mut monitor, &changes, 1);
    let device = Arc::clone(monitor.device_at(0).unwrap());

    controller.remove(handle(1));
    collect(&mut monitor, &changes, 1);

    assert!(device.set_property(LastError("unplugged".to_string())));
    assert_eq!(monitor.pending_count(), 0);
}

// ============================================================================
// Notifier and stop
// ============================================================================

#[test]
fn test_every_ready_wakeup_has_work_to_drain() {
    const UPDATES: usize = 5000;

    let (mut monitor, controller, changes) = started(1);
    controller.add(board(1));
    assert_eq!(collect(&mut monitor, &changes, 1), vec![Note::Insert(0, 1)]);
    let device = monitor.device_at(0).unwrap().clone();
    let notifier = monitor.notifier();

    let producer = thread::spawn(move || {
        for i in 0..UPDATES {
            assert!(device.set_property(ResetAfter(i % 2 == 0)));
        }
    });

    let mut applied = 0;
    let mut empty_wakeups = 0;
    while applied < UPDATES {
        match notifier.wait_timeout(Duration::from_secs(2)) {
            WaitOutcome::Ready => {
                let drained = monitor.drain_and_apply();
                if drained == 0 {
                    empty_wakeups += 1;
                }
                applied += drained;
            }
            other => panic!("expected readiness, got {:?} after {} updates", other, applied),
        }
    }
    producer.join().unwrap();

    assert_eq!(empty_wakeups, 0);
    assert_eq!(applied, UPDATES);
    assert_eq!(monitor.pending_count(), 0);
    assert_eq!(notifier.wait_timeout(Duration::from_millis(20)), WaitOutcome::TimedOut);
}

#[test]
fn test_stop_leaves_no_refresh_behind() {
    let (mut monitor, controller, changes) = started(1);
    controller.add(board(1));
    assert_eq!(collect(&mut monitor, &changes, 1), vec![Note::Insert(0, 1)]);
    let device = monitor.device_at(0).unwrap().clone();

    // Keeps changing the property until the device is released by stop
    let writer = {
        let device = device.clone();
        thread::spawn(move || {
            let mut flip = false;
            while device.is_live() {
                flip = !flip;
                device.set_property(ResetAfter(flip));
            }
        })
    };
    thread::sleep(Duration::from_millis(20));

    monitor.stop();
    writer.join().unwrap();
    assert!(!device.is_live());
    assert_eq!(monitor.pending_count(), 0);

    let released: Vec<Note> = changes.try_iter().map(Note::from).collect();
    assert_eq!(released, vec![Note::Remove(0, 1)]);

    // A restart reusing the handle sees only its own events
    monitor.start(1).unwrap();
    controller.add(board(1));
    assert_eq!(collect(&mut monitor, &changes, 1), vec![Note::Insert(0, 1)]);
    monitor.wait_and_drain(Duration::from_millis(50));
    assert_eq!(changes.try_iter().count(), 0);
}

#[test]
fn test_wake_callback_fires_once_per_batch() {
    let (mut monitor, controller, _changes) = started(1);
    let notifier = monitor.notifier();

    let wakes = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&wakes);
    notifier.set_callback(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    notifier.arm();

    controller.add(board(1));
    controller.add(board(2));

    let deadline = Instant::now() + Duration::from_secs(2);
    while wakes.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    thread::sleep(Duration::from_millis(30));
    assert_eq!(wakes.load(Ordering::SeqCst), 1);

    // Drain everything, then re-arm for the next batch
    let deadline = Instant::now() + Duration::from_secs(2);
    while monitor.device_count() < 2 && Instant::now() < deadline {
        monitor.drain_and_apply();
        thread::sleep(Duration::from_millis(5));
    }
    notifier.arm();
    assert_eq!(wakes.load(Ordering::SeqCst), 1);

    controller.add(board(3));
    let deadline = Instant::now() + Duration::from_secs(2);
    while wakes.load(Ordering::SeqCst) < 2 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(wakes.load(Ordering::SeqCst), 2);
}

#[test]
fn test_stop_releases_devices_last_row_first() {
    let (mut monitor, controller, changes) = started(1);
    let shared = monitor.shared();

    for raw in 1..=3 {
        controller.add(board(raw));
    }
    collect(&mut monitor, &changes, 3);
    let first = Arc::clone(monitor.device_at(0).unwrap());

    let report = monitor.stop();
    assert_eq!(report.released_devices, 3);
    assert_eq!(
        changes.try_iter().map(Note::from).collect::<Vec<_>>(),
        vec![Note::Remove(2, 3), Note::Remove(1, 2), Note::Remove(0, 1)]
    );
    assert_eq!(monitor.device_count(), 0);
    assert!(shared.is_empty());
    assert!(!first.is_live());

    // Idempotent
    assert_eq!(monitor.stop(), StopReport::default());
}

#[test]
fn test_stop_discards_unprocessed_events() {
    let (mut monitor, controller, _changes) = started(1);

    controller.add(board(1));
    controller.add(board(2));
    let deadline = Instant::now() + Duration::from_secs(2);
    while monitor.pending_count() < 2 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }

    let report = monitor.stop();
    assert_eq!(report.discarded_events, 2);
    assert_eq!(report.released_devices, 0);
}

// ============================================================================
// Properties of arbitrary event sequences
// ============================================================================

#[derive(Debug, Clone)]
enum Op {
    Add(u64),
    Change(u64),
    Remove(u64),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0u64..8).prop_map(Op::Add),
        1 => (0u64..8).prop_map(Op::Change),
        2 => (0u64..8).prop_map(Op::Remove),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Every event yields exactly one notification, replaying the notifications
    /// reproduces `devices()`, and the count matches recognized adds minus removes
    #[test]
    fn prop_notifications_replay_to_devices(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let (mut monitor, controller, changes) = started(1);

        let mut live: Vec<u64> = Vec::new();
        let mut added = 0usize;
        let mut removed = 0usize;
        for op in &ops {
            match *op {
                Op::Add(raw) => {
                    if !live.contains(&raw) {
                        live.push(raw);
                        added += 1;
                    }
                    controller.add(board(raw));
                }
                Op::Change(raw) => {
                    controller.change(board(raw));
                }
                Op::Remove(raw) => {
                    if let Some(pos) = live.iter().position(|h| *h == raw) {
                        live.remove(pos);
                        removed += 1;
                    }
                    controller.remove(DeviceHandle::new(raw));
                }
            }
        }

        let notes = collect(&mut monitor, &changes, ops.len());
        prop_assert_eq!(notes.len(), ops.len());

        let mut replay: Vec<u64> = Vec::new();
        for note in &notes {
            match *note {
                Note::Insert(row, raw) => {
                    prop_assert_eq!(row, replay.len());
                    replay.insert(row, raw);
                }
                Note::Update(row, raw) => prop_assert_eq!(replay[row], raw),
                Note::Remove(row, raw) => prop_assert_eq!(replay.remove(row), raw),
                Note::Anomaly(_) => {}
            }
        }

        prop_assert_eq!(&replay, &rows(&monitor));
        prop_assert_eq!(&live, &rows(&monitor));
        prop_assert_eq!(monitor.device_count(), added - removed);
        for raw in &live {
            prop_assert!(monitor.row_of(DeviceHandle::new(*raw)).is_some());
        }
    }
}
