//! Bounded Worker Pool for Device Jobs
//!
//! Runs blocking per-device work (serial I/O, firmware transfer) on a small
//! set of worker threads so neither the registry nor the consumer thread
//! ever blocks on it.
//!
//! # Features
//!
//! - **Bounded concurrency**: at most `max_tasks` jobs run at once, adjustable at runtime
//! - **Per-key FIFO**: jobs sharing a key run one at a time in submission order
//! - **Pollable handles**: results are taken with `try_take`, `wait` or `wait_timeout`
//! - **Bounded shutdown**: queued jobs are cancelled, running jobs get a deadline
//!
//! # Quick Start
//!
//! ```rust
//! use std::time::Duration;
//! use task_pool::{PoolError, Sequencing, TaskPool};
//!
//! let pool: TaskPool<&'static str> = TaskPool::new(2);
//!
//! let first = pool.submit("board-a", Sequencing::Fifo, || "erase").unwrap();
//! let second = pool.submit("board-a", Sequencing::Fifo, || "write").unwrap();
//!
//! assert_eq!(first.wait(), Ok("erase"));
//! assert_eq!(second.wait(), Ok("write"));
//!
//! pool.shutdown(Duration::from_secs(1));
//! assert_eq!(
//!     pool.submit("board-a", Sequencing::Fifo, || "late").unwrap_err(),
//!     PoolError::PoolShutDown
//! );
//! ```

pub mod error;
pub mod handle;
pub mod pool;

pub use error::{PoolError, Result};
pub use handle::{JobHandle, JobId};
pub use pool::{Sequencing, ShutdownReport, TaskPool};
