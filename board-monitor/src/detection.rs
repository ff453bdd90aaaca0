//! Background detection thread
//!
//! The thread blocks in [`PlatformSource::next_batch`], pushes whatever it
//! receives into the pending queue, which flags the notifier. It never touches
//! the registry. Source errors are queued as values and followed by a short
//! backoff so a failing source cannot spin.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use board_source::{Batch, Interrupter, PlatformSource};
use parking_lot::Mutex;

use crate::error::MonitorError;
use crate::queue::{Pending, PendingQueue};

pub(crate) type BoxedSource = Box<dyn PlatformSource>;

/// Holds the source while the thread is not using it
///
/// The thread takes the source out when it starts and puts it back before
/// exiting, so the monitor can reopen it on the next start.
pub(crate) type SourceSlot = Arc<Mutex<Option<BoxedSource>>>;

pub(crate) struct DetectionThread {
    handle: JoinHandle<()>,
    interrupter: Interrupter,
    shutdown: Arc<AtomicBool>,
    slot: SourceSlot,
}

struct DetectionContext {
    queue: Arc<PendingQueue>,
    shutdown: Arc<AtomicBool>,
    backoff: Duration,
}

impl DetectionThread {
    /// Start detecting on an opened source
    ///
    /// On failure the source is handed back, if the thread never took it,
    /// so the caller keeps ownership.
    pub(crate) fn spawn(
        source: BoxedSource,
        queue: Arc<PendingQueue>,
        backoff: Duration,
    ) -> Result<Self, (MonitorError, Option<BoxedSource>)> {
        let interrupter = source.interrupter();
        let shutdown = Arc::new(AtomicBool::new(false));
        let slot: SourceSlot = Arc::new(Mutex::new(Some(source)));

        let context = DetectionContext {
            queue,
            shutdown: Arc::clone(&shutdown),
            backoff,
        };
        let thread_slot = Arc::clone(&slot);

        let spawned = thread::Builder::new()
            .name("boardwatch-detect".to_string())
            .spawn(move || {
                let Some(mut source) = thread_slot.lock().take() else {
                    tracing::error!("Detection thread started without a source");
                    return;
                };
                run_detection(source.as_mut(), &context);
                *thread_slot.lock() = Some(source);
            });

        match spawned {
            Ok(handle) => Ok(Self {
                handle,
                interrupter,
                shutdown,
                slot,
            }),
            Err(e) => {
                let source = slot.lock().take();
                Err((MonitorError::Spawn(e.to_string()), source))
            }
        }
    }

    /// Stop the thread and recover the source
    ///
    /// Returns `None` if the thread panicked while holding the source.
    pub(crate) fn stop(self) -> Option<BoxedSource> {
        self.shutdown.store(true, Ordering::Release);
        self.interrupter.interrupt();
        self.handle.thread().unpark();

        if self.handle.join().is_err() {
            tracing::error!("Detection thread panicked");
        }
        self.slot.lock().take()
    }
}

fn run_detection(source: &mut dyn PlatformSource, context: &DetectionContext) {
    tracing::info!("Detection thread started on source '{}'", source.name());

    loop {
        if context.shutdown.load(Ordering::Acquire) {
            tracing::debug!("Detection thread received shutdown signal");
            break;
        }

        match source.next_batch() {
            Ok(Batch::Events(events)) => {
                if events.is_empty() {
                    continue;
                }
                tracing::debug!("Queueing {} platform events", events.len());
                context.queue.extend(events.into_iter().map(Pending::Event));
            }
            Ok(Batch::Interrupted) => continue,
            Ok(Batch::Closed) => {
                tracing::info!("Source '{}' closed, detection thread exiting", source.name());
                break;
            }
            Err(e) => {
                tracing::warn!("Source '{}' failed: {}", source.name(), e);
                context.queue.push(Pending::SourceFailure(e.to_string()));
                // Unparked early by stop
                thread::park_timeout(context.backoff);
            }
        }
    }

    source.close();
}
