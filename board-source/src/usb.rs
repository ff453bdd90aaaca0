//! libusb hotplug source
//!
//! Hotplug callbacks only record what happened; descriptors are read after
//! `handle_events` returns because libusb forbids synchronous transfers from
//! inside a callback.
//!
//! A Teensy switching between user code and its HalfKay bootloader leaves
//! the bus and re-enumerates on the same port. Departures are therefore
//! held for [`REBOOT_GRACE`]; an arrival at the same location within that
//! window is reported as `Changed` under the original handle, so the board
//! keeps its row and properties.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rusb::{Context, Device, Hotplug, HotplugBuilder, Registration, UsbContext};

use crate::error::{Result, SourceError};
use crate::event::{Capabilities, DeviceDescriptor, DeviceHandle, Interface, PlatformEvent};
use crate::source::{Batch, Interrupter, PlatformSource};

/// PJRC vendor id shared by every Teensy board
pub const TEENSY_VENDOR_ID: u16 = 0x16C0;

const HALFKAY_PRODUCT_ID: u16 = 0x0478;

/// How long a departed board may take to come back as the same board
pub const REBOOT_GRACE: Duration = Duration::from_secs(2);

/// Departed boards waiting to either come back or be reported removed
#[derive(Debug, Default)]
struct Reconnections {
    departed: HashMap<String, (DeviceHandle, Instant)>,
}

impl Reconnections {
    fn depart(&mut self, location: String, handle: DeviceHandle, now: Instant) {
        self.departed.insert(location, (handle, now + REBOOT_GRACE));
    }

    /// Handle of a board that left `location` within the grace window
    fn arrive(&mut self, location: &str) -> Option<DeviceHandle> {
        self.departed.remove(location).map(|(handle, _)| handle)
    }

    /// Boards whose grace window has run out, oldest first
    fn expired(&mut self, now: Instant) -> Vec<DeviceHandle> {
        let mut expired: Vec<(Instant, DeviceHandle)> = Vec::new();
        self.departed.retain(|_, (handle, deadline)| {
            if *deadline <= now {
                expired.push((*deadline, *handle));
                false
            } else {
                true
            }
        });
        expired.sort();
        expired.into_iter().map(|(_, handle)| handle).collect()
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.departed.values().map(|(_, deadline)| *deadline).min()
    }

    fn clear(&mut self) {
        self.departed.clear();
    }
}

enum Notice {
    Arrived(Device<Context>),
    Left { bus: u8, address: u8 },
}

struct HotplugRecorder {
    notices: Arc<Mutex<Vec<Notice>>>,
}

impl Hotplug<Context> for HotplugRecorder {
    fn device_arrived(&mut self, device: Device<Context>) {
        if let Ok(mut notices) = self.notices.lock() {
            notices.push(Notice::Arrived(device));
        }
    }

    fn device_left(&mut self, device: Device<Context>) {
        if let Ok(mut notices) = self.notices.lock() {
            notices.push(Notice::Left {
                bus: device.bus_number(),
                address: device.address(),
            });
        }
    }
}

/// Hotplug source backed by libusb
///
/// Boards already attached when the source opens are reported as `Added`
/// in the first batch. Removals are reported [`REBOOT_GRACE`] after the
/// board leaves the bus.
pub struct UsbSource {
    vendor_id: Option<u16>,
    context: Option<Context>,
    registration: Option<Registration<Context>>,
    notices: Arc<Mutex<Vec<Notice>>>,
    interrupted: Arc<AtomicBool>,
    handles: HashMap<(u8, u8), (DeviceHandle, String)>,
    reconnections: Reconnections,
    next_handle: u64,
}

impl UsbSource {
    /// Watch every USB device
    pub fn new() -> Self {
        Self {
            vendor_id: None,
            context: None,
            registration: None,
            notices: Arc::new(Mutex::new(Vec::new())),
            interrupted: Arc::new(AtomicBool::new(false)),
            handles: HashMap::new(),
            reconnections: Reconnections::default(),
            next_handle: 1,
        }
    }

    /// Watch Teensy boards only
    pub fn teensy() -> Self {
        Self::new().with_vendor_id(TEENSY_VENDOR_ID)
    }

    pub fn with_vendor_id(mut self, vendor_id: u16) -> Self {
        self.vendor_id = Some(vendor_id);
        self
    }

    fn take_notices(&self) -> Vec<Notice> {
        self.notices
            .lock()
            .map(|mut notices| std::mem::take(&mut *notices))
            .unwrap_or_default()
    }

    fn translate(&mut self, notices: Vec<Notice>) -> Vec<PlatformEvent> {
        let now = Instant::now();
        let mut events: Vec<PlatformEvent> = self
            .reconnections
            .expired(now)
            .into_iter()
            .map(PlatformEvent::Removed)
            .collect();

        for notice in notices {
            match notice {
                Notice::Arrived(device) => {
                    let key = (device.bus_number(), device.address());
                    let location = location_of(&device);
                    let returning = self.reconnections.arrive(&location);
                    let handle = match returning {
                        Some(handle) => handle,
                        None => {
                            self.next_handle += 1;
                            DeviceHandle::new(self.next_handle - 1)
                        }
                    };
                    match describe(&device, handle, &location) {
                        Some(descriptor) => {
                            self.handles.insert(key, (handle, location));
                            events.push(match returning {
                                Some(_) => PlatformEvent::Changed(descriptor),
                                None => PlatformEvent::Added(descriptor),
                            });
                        }
                        None => {
                            tracing::debug!("Skipping unreadable device at {}:{}", key.0, key.1);
                            if returning.is_some() {
                                events.push(PlatformEvent::Removed(handle));
                            }
                        }
                    }
                }
                Notice::Left { bus, address } => match self.handles.remove(&(bus, address)) {
                    Some((handle, location)) => self.reconnections.depart(location, handle, now),
                    None => tracing::debug!(
                        "Ignoring departure of untracked device {}:{}",
                        bus,
                        address
                    ),
                },
            }
        }
        events
    }
}

impl Default for UsbSource {
    fn default() -> Self {
        Self::new()
    }
}

impl PlatformSource for UsbSource {
    fn name(&self) -> &str {
        "libusb"
    }

    fn open(&mut self) -> Result<()> {
        if !rusb::has_hotplug() {
            return Err(SourceError::Unsupported);
        }

        let context = Context::new().map_err(|e| SourceError::Init {
            source_name: self.name().to_string(),
            reason: e.to_string(),
        })?;

        let recorder = HotplugRecorder {
            notices: Arc::clone(&self.notices),
        };

        let mut builder = HotplugBuilder::new();
        builder.enumerate(true);
        if let Some(vendor_id) = self.vendor_id {
            builder.vendor_id(vendor_id);
        }
        let registration = builder
            .register(&context, Box::new(recorder))
            .map_err(|e| SourceError::Init {
                source_name: self.name().to_string(),
                reason: format!("hotplug registration failed: {}", e),
            })?;

        self.interrupted.store(false, Ordering::SeqCst);
        self.context = Some(context);
        self.registration = Some(registration);

        tracing::info!("libusb hotplug source opened");
        Ok(())
    }

    fn next_batch(&mut self) -> Result<Batch> {
        let context = match &self.context {
            Some(context) => context.clone(),
            None => return Err(SourceError::NotOpen(self.name().to_string())),
        };

        loop {
            if self.interrupted.swap(false, Ordering::SeqCst) {
                return Ok(Batch::Interrupted);
            }

            let events = self.translate(self.take_notices());
            if !events.is_empty() {
                return Ok(Batch::Events(events));
            }

            // Wake up in time to report boards that did not come back
            let timeout = self
                .reconnections
                .next_deadline()
                .map(|deadline| deadline.saturating_duration_since(Instant::now()));
            match context.handle_events(timeout) {
                Ok(()) | Err(rusb::Error::Interrupted) => {}
                Err(e) => return Err(SourceError::Wait(e.to_string())),
            }
        }
    }

    fn interrupter(&self) -> Interrupter {
        let flag = Arc::clone(&self.interrupted);
        let context = self.context.clone();
        Interrupter::new(move || {
            flag.store(true, Ordering::SeqCst);
            if let Some(context) = &context {
                context.interrupt_handle_events();
            }
        })
    }

    fn close(&mut self) {
        if let (Some(context), Some(registration)) =
            (self.context.take(), self.registration.take())
        {
            context.unregister_callback(registration);
        }
        self.handles.clear();
        self.reconnections.clear();
        self.take_notices();
        tracing::info!("libusb hotplug source closed");
    }
}

impl Drop for UsbSource {
    fn drop(&mut self) {
        self.close();
    }
}

/// Physical port path, stable across re-enumeration on the same port
fn location_of(device: &Device<Context>) -> String {
    match device.port_numbers() {
        Ok(ports) if !ports.is_empty() => {
            let path: Vec<String> = ports.iter().map(|p| p.to_string()).collect();
            format!("usb-{}-{}", device.bus_number(), path.join("."))
        }
        _ => format!("usb-{}-{}", device.bus_number(), device.address()),
    }
}

/// Read what we can about a freshly attached device
fn describe(
    device: &Device<Context>,
    handle: DeviceHandle,
    location: &str,
) -> Option<DeviceDescriptor> {
    let descriptor = device.device_descriptor().ok()?;
    let (vendor_id, product_id) = (descriptor.vendor_id(), descriptor.product_id());

    let serial = device
        .open()
        .ok()
        .and_then(|h| h.read_serial_number_string_ascii(&descriptor).ok());

    let (model, mut capabilities) = classify(vendor_id, product_id);
    let serial_number = match serial {
        Some(serial) => {
            capabilities |= Capabilities::UNIQUE;
            serial
        }
        None => format!("{:04x}:{:04x}", vendor_id, product_id),
    };

    let mut result = DeviceDescriptor::new(handle, serial_number, location)
        .with_model(model)
        .with_capabilities(capabilities);

    if let Ok(config) = device.active_config_descriptor() {
        for interface in config.interfaces() {
            let Some(alt) = interface.descriptors().next() else {
                continue;
            };
            let (description, caps) = match alt.class_code() {
                0x02 | 0x0A => ("Serial", Capabilities::SERIAL | Capabilities::REBOOT),
                0x03 if product_id == HALFKAY_PRODUCT_ID => {
                    ("HalfKay Bootloader", Capabilities::UPLOAD | Capabilities::RESET)
                }
                0x03 => ("HID", Capabilities::RUN),
                _ => continue,
            };
            result = result.with_interface(Interface::new(
                interface.number(),
                description,
                format!("{}:{}", location, interface.number()),
                caps,
            ));
        }
    }

    Some(result)
}

/// Model name and base capabilities from the USB ids
fn classify(vendor_id: u16, product_id: u16) -> (String, Capabilities) {
    if vendor_id != TEENSY_VENDOR_ID {
        return (format!("{:04x}:{:04x}", vendor_id, product_id), Capabilities::empty());
    }
    match product_id {
        HALFKAY_PRODUCT_ID => (
            "Teensy (bootloader)".to_string(),
            Capabilities::UPLOAD | Capabilities::RESET,
        ),
        0x0483 | 0x0487 | 0x0489 => (
            "Teensy".to_string(),
            Capabilities::RUN | Capabilities::SERIAL | Capabilities::REBOOT,
        ),
        _ => ("Teensy".to_string(), Capabilities::RUN | Capabilities::REBOOT),
    }
}
