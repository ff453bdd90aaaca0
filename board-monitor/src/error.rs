//! Error types for boardwatch-monitor

use board_source::{DeviceHandle, DeviceIdentity, EventKind, SourceError};
use task_pool::PoolError;
use thiserror::Error;

/// Result type for monitor operations
pub type Result<T> = std::result::Result<T, MonitorError>;

/// Errors returned by [`Monitor`](crate::Monitor) lifecycle operations
#[derive(Error, Debug)]
pub enum MonitorError {
    /// `start` was called while the monitor is running
    #[error("Monitor is already started")]
    AlreadyStarted,

    /// The platform source could not be opened
    #[error("Platform source failed to initialize: {0}")]
    PlatformInit(#[source] SourceError),

    /// The source was lost when a previous detection thread panicked
    #[error("Platform source is no longer available")]
    SourceUnavailable,

    /// The detection thread could not be created
    #[error("Failed to spawn detection thread: {0}")]
    Spawn(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Irregularities found while applying platform events
///
/// Anomalies never stop processing. They are logged and forwarded to
/// every registered observer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryAnomaly {
    /// An Added event arrived for a handle that is already tracked
    #[error("Device {handle} ({identity}) is already tracked")]
    DuplicateDevice {
        handle: DeviceHandle,
        identity: DeviceIdentity,
    },

    /// A Changed or Removed event arrived for a handle that is not tracked
    #[error("Ignoring {kind} event for unknown device {handle}")]
    UnknownDevice { handle: DeviceHandle, kind: EventKind },

    /// The platform source reported an error while waiting for events
    #[error("Platform source failure: {0}")]
    SourceFailure(String),
}

/// Outcome of a device job that did not produce a value
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// The device was removed before the job started
    #[error("Device {0} is gone")]
    DeviceGone(DeviceHandle),

    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// Invalid configuration value
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value:?}")]
    InvalidEnv { name: &'static str, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to parse configuration JSON: {0}")]
    Json(#[from] serde_json::Error),
}
