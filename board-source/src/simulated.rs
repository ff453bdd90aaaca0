//! In-memory source driven through a [`SourceController`]
//!
//! Useful for tests, demos and for bridging boards that are discovered by
//! some other means. Events pushed through the controller are delivered by
//! `next_batch` in push order, coalesced into one batch when several are
//! already waiting.

use std::sync::mpsc;

use crate::error::{Result, SourceError};
use crate::event::{DeviceDescriptor, DeviceHandle, PlatformEvent};
use crate::source::{Batch, Interrupter, PlatformSource};

#[derive(Debug)]
enum Message {
    Event(PlatformEvent),
    Interrupt,
    Close,
}

/// A [`PlatformSource`] fed by hand
pub struct SimulatedSource {
    tx: mpsc::Sender<Message>,
    rx: mpsc::Receiver<Message>,
    open_error: Option<String>,
    opened: bool,
    /// Control message seen while collecting a batch, replayed on the next call
    deferred: Option<Batch>,
}

impl SimulatedSource {
    /// Create a source and the controller that feeds it
    pub fn new() -> (Self, SourceController) {
        Self::build(None)
    }

    /// Create a source whose `open` always fails with `reason`
    pub fn failing(reason: impl Into<String>) -> (Self, SourceController) {
        Self::build(Some(reason.into()))
    }

    fn build(open_error: Option<String>) -> (Self, SourceController) {
        let (tx, rx) = mpsc::channel();
        let controller = SourceController { tx: tx.clone() };
        let source = Self {
            tx,
            rx,
            open_error,
            opened: false,
            deferred: None,
        };
        (source, controller)
    }
}

impl PlatformSource for SimulatedSource {
    fn name(&self) -> &str {
        "simulated"
    }

    fn open(&mut self) -> Result<()> {
        if let Some(reason) = &self.open_error {
            return Err(SourceError::Init {
                source_name: self.name().to_string(),
                reason: reason.clone(),
            });
        }
        self.opened = true;
        Ok(())
    }

    fn next_batch(&mut self) -> Result<Batch> {
        if !self.opened {
            return Err(SourceError::NotOpen(self.name().to_string()));
        }
        if let Some(batch) = self.deferred.take() {
            return Ok(batch);
        }

        let mut events = match self.rx.recv() {
            Ok(Message::Event(event)) => vec![event],
            Ok(Message::Interrupt) => return Ok(Batch::Interrupted),
            Ok(Message::Close) | Err(_) => return Ok(Batch::Closed),
        };

        // Coalesce whatever else is already queued
        while let Ok(message) = self.rx.try_recv() {
            match message {
                Message::Event(event) => events.push(event),
                Message::Interrupt => {
                    self.deferred = Some(Batch::Interrupted);
                    break;
                }
                Message::Close => {
                    self.deferred = Some(Batch::Closed);
                    break;
                }
            }
        }

        Ok(Batch::Events(events))
    }

    fn interrupter(&self) -> Interrupter {
        let tx = self.tx.clone();
        Interrupter::new(move || {
            let _ = tx.send(Message::Interrupt);
        })
    }

    fn close(&mut self) {
        self.opened = false;
        if matches!(self.deferred, Some(Batch::Interrupted)) {
            self.deferred = None;
        }
    }
}

/// Feeds events into a [`SimulatedSource`]
///
/// All methods return `false` once the source has been dropped.
#[derive(Debug, Clone)]
pub struct SourceController {
    tx: mpsc::Sender<Message>,
}

impl SourceController {
    pub fn send(&self, event: PlatformEvent) -> bool {
        self.tx.send(Message::Event(event)).is_ok()
    }

    pub fn add(&self, descriptor: DeviceDescriptor) -> bool {
        self.send(PlatformEvent::Added(descriptor))
    }

    pub fn change(&self, descriptor: DeviceDescriptor) -> bool {
        self.send(PlatformEvent::Changed(descriptor))
    }

    pub fn remove(&self, handle: DeviceHandle) -> bool {
        self.send(PlatformEvent::Removed(handle))
    }

    /// Send several events back to back
    pub fn send_all(&self, events: impl IntoIterator<Item = PlatformEvent>) -> bool {
        events.into_iter().all(|event| self.send(event))
    }

    /// Make the source report [`Batch::Closed`]
    pub fn close(&self) -> bool {
        self.tx.send(Message::Close).is_ok()
    }
}
