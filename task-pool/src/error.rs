use thiserror::Error;

/// Errors reported by the task pool or delivered through a job handle
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// The pool no longer accepts or runs jobs
    #[error("Task pool has been shut down")]
    PoolShutDown,

    /// The job was still running when the shutdown timeout elapsed
    #[error("Job abandoned after the shutdown timeout elapsed")]
    ShutdownTimeout,

    /// The job body panicked; the payload message is preserved when it is a string
    #[error("Job panicked: {0}")]
    Panicked(String),

    /// No worker thread could be started
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(String),
}

/// Result type for pool operations
pub type Result<T> = std::result::Result<T, PoolError>;
