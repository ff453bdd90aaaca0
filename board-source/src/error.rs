//! Error types for platform event sources

use thiserror::Error;

/// Errors raised by a [`PlatformSource`](crate::PlatformSource)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// The source could not be initialized (missing driver, no permissions, ...)
    #[error("Failed to initialize {source_name}: {reason}")]
    Init {
        source_name: String,
        reason: String,
    },

    /// Hotplug notifications are not available on this platform
    #[error("Hotplug detection is not supported on this platform")]
    Unsupported,

    /// `next_batch` was called before `open`
    #[error("Source {0} has not been opened")]
    NotOpen(String),

    /// Transient failure while waiting for platform events
    #[error("Platform wait failed: {0}")]
    Wait(String),
}

/// Result type for source operations
pub type Result<T> = std::result::Result<T, SourceError>;
