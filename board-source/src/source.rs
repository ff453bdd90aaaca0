//! The platform source contract
//!
//! A [`PlatformSource`] owns whatever native mechanism reports hotplug
//! activity (libusb hotplug callbacks, udev monitors, a test channel) and
//! turns it into batches of [`PlatformEvent`]s. The monitor drives it from a
//! dedicated detection thread:
//!
//! ```text
//! open() ──► next_batch() ──► next_batch() ──► ... ──► close()
//!                 ▲
//!                 └── Interrupter::interrupt() from any thread
//! ```

use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::event::PlatformEvent;

/// Outcome of one blocking wait on the platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Batch {
    /// One or more events, in the order the platform produced them
    Events(Vec<PlatformEvent>),
    /// The wait was cut short by an [`Interrupter`]
    Interrupted,
    /// The source will never produce events again
    Closed,
}

/// Wakes a source blocked in [`PlatformSource::next_batch`]
///
/// Cloneable and callable from any thread. Interrupting a source that is
/// not currently waiting makes its next wait return
/// [`Batch::Interrupted`] immediately.
#[derive(Clone)]
pub struct Interrupter {
    wake: Arc<dyn Fn() + Send + Sync>,
}

impl Interrupter {
    pub fn new(wake: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            wake: Arc::new(wake),
        }
    }

    pub fn interrupt(&self) {
        (self.wake)()
    }
}

impl fmt::Debug for Interrupter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interrupter").finish_non_exhaustive()
    }
}

/// A producer of raw device lifecycle events
///
/// Implementations block in `next_batch` on their native wait primitive.
/// They must deliver events for the same handle in production order and
/// must honor [`Interrupter::interrupt`] promptly.
pub trait PlatformSource: Send {
    /// Short name used in logs and errors
    fn name(&self) -> &str;

    /// Initialize the native mechanism
    ///
    /// Called once per monitor start, before the detection thread exists.
    /// Sources that enumerate already-attached boards report them as
    /// `Added` events from the first `next_batch` call.
    fn open(&mut self) -> Result<()>;

    /// Block until events are available, the source is interrupted, or it closes
    fn next_batch(&mut self) -> Result<Batch>;

    /// Handle that can wake a blocked `next_batch` from another thread
    fn interrupter(&self) -> Interrupter;

    /// Release native resources; the source may be opened again afterwards
    fn close(&mut self) {}
}

impl<S: PlatformSource + ?Sized> PlatformSource for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn open(&mut self) -> Result<()> {
        (**self).open()
    }

    fn next_batch(&mut self) -> Result<Batch> {
        (**self).next_batch()
    }

    fn interrupter(&self) -> Interrupter {
        (**self).interrupter()
    }

    fn close(&mut self) {
        (**self).close()
    }
}
