//! Hotplug Console - prints row-level board changes as they happen
//!
//! Without features, a scripted simulated source plugs, reboots and unplugs
//! a few boards. With `--features usb`, real Teensy boards are watched
//! through libusb for `BOARDWATCH_DEMO_SECS` seconds (default 30).
//!
//! Run: cargo run -p boardwatch-monitor --example hotplug_console
//!
//! With real boards and debug logs:
//!
//!   BOARDWATCH_LOG_MODE=development \
//!     cargo run -p boardwatch-monitor --example hotplug_console --features usb

use std::time::{Duration, Instant};

use board_monitor::prelude::*;
use board_monitor::{init_logging_from_env, MonitorConfig, PlatformSource};

/// Prints one line per row notification
struct ConsoleObserver;

impl RowObserver for ConsoleObserver {
    fn row_inserted(&mut self, row: usize, device: &DeviceRef) {
        println!(
            "+ [{}] {} at {} ({})",
            row,
            device.tag(),
            device.location(),
            device.capabilities().names().join(", ")
        );
    }

    fn row_updated(&mut self, row: usize, device: &DeviceRef) {
        let firmware = device
            .property::<Firmware>()
            .map(|f| f.0.display().to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "~ [{}] {} ({}) firmware: {}",
            row,
            device.tag(),
            device.capabilities().names().join(", "),
            firmware
        );
    }

    fn row_removed(&mut self, row: usize, device: &DeviceRef) {
        println!("- [{}] {}", row, device.tag());
    }

    fn anomaly(&mut self, anomaly: &RegistryAnomaly) {
        println!("! {}", anomaly);
    }
}

#[cfg(not(feature = "usb"))]
fn source() -> (impl PlatformSource, Duration) {
    use board_monitor::{DeviceDescriptor, DeviceHandle, Interface};
    use board_source::SimulatedSource;
    use std::thread;

    let (source, controller) = SimulatedSource::new();

    let running = |raw: u64, serial: &str| {
        DeviceDescriptor::new(DeviceHandle::new(raw), serial, format!("usb-1-{}", raw))
            .with_model("Teensy 3.6")
            .with_capabilities(Capabilities::UNIQUE | Capabilities::RUN)
            .with_interface(Interface::new(
                0,
                "Serial",
                format!("/dev/ttyACM{}", raw),
                Capabilities::SERIAL | Capabilities::REBOOT,
            ))
    };
    let bootloader = |raw: u64, serial: &str| {
        DeviceDescriptor::new(DeviceHandle::new(raw), serial, format!("usb-1-{}", raw))
            .with_model("Teensy 3.6")
            .with_capabilities(Capabilities::UNIQUE)
            .with_interface(Interface::new(
                0,
                "HalfKay",
                format!("/dev/hidraw{}", raw),
                Capabilities::UPLOAD | Capabilities::RESET,
            ))
    };

    thread::spawn(move || {
        let script = [
            PlatformEvent::Added(running(1, "1234567")),
            PlatformEvent::Added(running(2, "7654321")),
            PlatformEvent::Changed(bootloader(1, "1234567")),
            PlatformEvent::Changed(running(1, "1234567")),
            PlatformEvent::Removed(DeviceHandle::new(2)),
            PlatformEvent::Added(running(3, "7654321")),
        ];
        for event in script {
            thread::sleep(Duration::from_millis(300));
            if !controller.send(event) {
                break;
            }
        }
    });

    (source, Duration::from_secs(3))
}

#[cfg(feature = "usb")]
fn source() -> (impl PlatformSource, Duration) {
    let secs = std::env::var("BOARDWATCH_DEMO_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(30);
    (board_source::UsbSource::teensy(), Duration::from_secs(secs))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging_from_env()?;

    let config = MonitorConfig::from_env()?;
    let (source, run_for) = source();
    let mut monitor = Monitor::with_config(source, config)?;
    monitor.add_observer(ConsoleObserver);
    monitor.start_default()?;

    println!("Watching '{}' for {:?}", monitor.source_name(), run_for);

    let deadline = Instant::now() + run_for;
    let mut flashed = false;
    while Instant::now() < deadline {
        if monitor.wait_and_drain(Duration::from_millis(100)).is_none() {
            break;
        }

        // Queue a fake upload the first time a board is in its bootloader
        if !flashed {
            if let Some(board) = monitor.find(|d| d.is_upload_available()).cloned() {
                flashed = true;
                let job = monitor.submit(&board, Sequencing::Fifo, |device| {
                    device.set_property(Firmware::new("blink.hex"));
                    device.tag()
                })?;
                println!("  upload queued as {:?}", job.id());
            }
        }
    }

    let report = monitor.stop();
    println!("Stopped: {:?}", report);
    Ok(())
}
