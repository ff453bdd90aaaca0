//! # boardwatch-source
//!
//! Platform event sources for the boardwatch device monitor.
//!
//! A source turns whatever the operating system offers for hotplug
//! notification into ordered batches of [`PlatformEvent`]s:
//!
//! ```text
//! kernel / libusb ──► PlatformSource::next_batch() ──► [Added, Changed, Removed, ...]
//! ```
//!
//! Two sources ship with the crate:
//!
//! - [`SimulatedSource`]: fed by hand through a [`SourceController`]
//! - `UsbSource` (feature `usb`): libusb hotplug callbacks via `rusb`
//!
//! ## Example
//!
//! ```rust
//! use board_source::{Batch, DeviceDescriptor, DeviceHandle, PlatformSource, SimulatedSource};
//!
//! let (mut source, controller) = SimulatedSource::new();
//! source.open().unwrap();
//!
//! controller.add(DeviceDescriptor::new(DeviceHandle::new(1), "12345", "usb-1-2"));
//!
//! match source.next_batch().unwrap() {
//!     Batch::Events(events) => assert_eq!(events.len(), 1),
//!     other => panic!("unexpected batch: {:?}", other),
//! }
//! ```

pub mod error;
pub mod event;
pub mod simulated;
pub mod source;

#[cfg(feature = "usb")]
pub mod usb;

pub use error::{Result, SourceError};
pub use event::{
    Capabilities, DeviceDescriptor, DeviceHandle, DeviceIdentity, EventKind, Interface,
    PlatformEvent,
};
pub use simulated::{SimulatedSource, SourceController};
pub use source::{Batch, Interrupter, PlatformSource};

#[cfg(feature = "usb")]
pub use usb::{UsbSource, REBOOT_GRACE};
