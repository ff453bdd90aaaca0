//! # boardwatch-monitor
//!
//! A thread-safe, row-observable registry of hotplugged boards.
//!
//! A background detection thread waits on a [`PlatformSource`] and queues
//! raw add/change/remove events. The consumer thread (a UI or control loop)
//! owns the [`Monitor`], waits on its [`DescriptorNotifier`] and calls
//! [`Monitor::drain_and_apply`], which applies the queued events to the
//! ordered device list and reports each change to [`RowObserver`]s as a
//! single row insert, update or remove.
//!
//! ```text
//! PlatformSource ──► detection thread ──► pending queue ──► notifier
//!                                                              │
//!        RowObserver ◄── drain_and_apply() ◄── consumer loop ◄─┘
//! ```
//!
//! Long-running work against a board (serial I/O, firmware transfer) goes
//! through [`Monitor::submit`], which runs it on a bounded task pool keyed by
//! device so jobs for one board stay in order.
//!
//! ## Example
//!
//! ```rust
//! use std::time::Duration;
//! use board_monitor::prelude::*;
//! use board_source::{DeviceDescriptor, DeviceHandle, SimulatedSource};
//!
//! let (source, controller) = SimulatedSource::new();
//! let mut monitor = Monitor::new(source);
//! let changes = monitor.observe_channel();
//! monitor.start(2).unwrap();
//!
//! let descriptor = DeviceDescriptor::new(DeviceHandle::new(7), "1234567", "usb-1-2");
//! controller.add(descriptor.with_model("Teensy 4.0"));
//! while monitor.device_count() == 0 {
//!     monitor.wait_and_drain(Duration::from_secs(1));
//! }
//!
//! match changes.try_recv() {
//!     Some(RowChange::Inserted { row, device }) => {
//!         assert_eq!(row, 0);
//!         assert_eq!(device.tag(), "1234567-Teensy 4.0");
//!     }
//!     other => panic!("unexpected change: {:?}", other),
//! }
//!
//! let board = monitor.device_at(0).unwrap().clone();
//! let job = monitor
//!     .submit(&board, Sequencing::Fifo, |device| device.serial_number().len())
//!     .unwrap();
//! assert_eq!(job.wait(), Ok(7));
//!
//! monitor.stop();
//! ```

pub mod config;
pub mod device;
pub mod error;
pub mod logging;
pub mod monitor;
pub mod notifier;
pub mod observer;
pub mod property;
pub mod snapshot;
pub mod task;

mod detection;
mod queue;
mod registry;

// ============================================================================
// Re-exports
// ============================================================================

pub use config::{MonitorConfig, MonitorConfigBuilder};
pub use device::{Device, DeviceRef, LifecycleState, WeakDevice};
pub use error::{ConfigError, MonitorError, RegistryAnomaly, Result, TaskError};
pub use monitor::{Monitor, StopReport};
pub use notifier::{DescriptorNotifier, WaitOutcome};
pub use observer::{ChannelObserver, RowChange, RowChangeIterator, RowObserver};
pub use property::{ClearOnReset, Firmware, LastError, Property, PropertyBag, ResetAfter};
pub use snapshot::SharedDevices;
pub use task::{DeviceJob, TaskResult};

pub use board_source::{
    Capabilities, DeviceDescriptor, DeviceHandle, DeviceIdentity, Interface, PlatformEvent,
    PlatformSource,
};
pub use task_pool::{PoolError, Sequencing};

pub use logging::{init_logging, init_logging_from_env, init_silent, LoggingError, LoggingMode};

// ============================================================================
// Prelude
// ============================================================================

/// Commonly used types for convenient importing
pub mod prelude {
    pub use crate::device::{Device, DeviceRef, LifecycleState};
    pub use crate::error::{MonitorError, RegistryAnomaly, TaskError};
    pub use crate::monitor::{Monitor, StopReport};
    pub use crate::notifier::WaitOutcome;
    pub use crate::observer::{RowChange, RowObserver};
    pub use crate::property::{ClearOnReset, Firmware, LastError, Property, ResetAfter};
    pub use board_source::{Capabilities, PlatformEvent};
    pub use task_pool::Sequencing;
}
