//! The device monitor: lifecycle, drain and job submission
//!
//! [`Monitor`] is owned by the consumer thread. Its methods that mutate the
//! registry take `&mut self`, which is how the single-writer contract is
//! enforced: the detection thread and property setters can only push into
//! the pending queue.

use std::sync::Arc;
use std::time::Duration;

use board_source::{DeviceHandle, PlatformSource};
use task_pool::{PoolError, Sequencing, TaskPool};

use crate::config::MonitorConfig;
use crate::detection::{BoxedSource, DetectionThread};
use crate::device::{Device, DeviceRef, RefreshHook};
use crate::error::{MonitorError, RegistryAnomaly, Result, TaskError};
use crate::notifier::{DescriptorNotifier, WaitOutcome};
use crate::observer::{ChannelObserver, RowChangeIterator, RowObserver};
use crate::property::Property;
use crate::queue::{Pending, PendingQueue};
use crate::registry::{Mutation, Registry};
use crate::snapshot::SharedDevices;
use crate::task::DeviceJob;

/// Summary of what [`Monitor::stop`] tore down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StopReport {
    /// Queued events that were never applied
    pub discarded_events: usize,
    /// Devices removed from the registry (each reported via `row_removed`)
    pub released_devices: usize,
    /// Jobs cancelled before they started
    pub cancelled_jobs: usize,
    /// Jobs still running when the shutdown timeout elapsed
    pub abandoned_jobs: usize,
}

/// Thread-safe registry of attached boards
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use board_monitor::Monitor;
/// use board_source::{DeviceDescriptor, DeviceHandle, SimulatedSource};
///
/// let (source, controller) = SimulatedSource::new();
/// let mut monitor = Monitor::new(source);
/// monitor.start(2).unwrap();
///
/// controller.add(DeviceDescriptor::new(DeviceHandle::new(1), "1234567", "usb-1-2"));
///
/// while monitor.device_count() == 0 {
///     monitor.wait_and_drain(Duration::from_secs(1));
/// }
/// assert_eq!(monitor.device_at(0).unwrap().serial_number(), "1234567");
///
/// let report = monitor.stop();
/// assert_eq!(report.released_devices, 1);
/// ```
pub struct Monitor {
    config: MonitorConfig,
    source: Option<BoxedSource>,
    source_name: String,
    registry: Registry,
    queue: Arc<PendingQueue>,
    notifier: DescriptorNotifier,
    refresh: RefreshHook,
    observers: Vec<Box<dyn RowObserver>>,
    shared: SharedDevices,
    detection: Option<DetectionThread>,
    pool: Option<TaskPool<DeviceHandle>>,
    max_tasks: usize,
}

impl Monitor {
    /// Create a stopped monitor over `source` with default configuration
    pub fn new(source: impl PlatformSource + 'static) -> Self {
        Self::build(Box::new(source), MonitorConfig::default())
    }

    /// Create a stopped monitor with a validated configuration
    pub fn with_config(
        source: impl PlatformSource + 'static,
        config: MonitorConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(Box::new(source), config))
    }

    fn build(source: BoxedSource, config: MonitorConfig) -> Self {
        let notifier = DescriptorNotifier::new();
        let queue = Arc::new(PendingQueue::new(notifier.clone()));

        let refresh: RefreshHook = {
            let queue = Arc::clone(&queue);
            Arc::new(move |handle| queue.enqueue([Pending::Refresh(handle)]))
        };

        Self {
            max_tasks: config.max_tasks.max(1),
            source_name: source.name().to_string(),
            source: Some(source),
            config,
            registry: Registry::new(),
            queue,
            notifier,
            refresh,
            observers: Vec::new(),
            shared: SharedDevices::new(),
            detection: None,
            pool: None,
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Open the source, spawn the detection thread and bind a task pool
    pub fn start(&mut self, max_concurrent_tasks: usize) -> Result<()> {
        if self.is_running() {
            return Err(MonitorError::AlreadyStarted);
        }
        let mut source = self.source.take().ok_or(MonitorError::SourceUnavailable)?;

        if let Err(e) = source.open() {
            tracing::error!("Failed to open source '{}': {}", self.source_name, e);
            self.source = Some(source);
            return Err(MonitorError::PlatformInit(e));
        }

        self.notifier.reopen();
        let detection = DetectionThread::spawn(
            source,
            Arc::clone(&self.queue),
            self.config.source_error_backoff,
        );
        match detection {
            Ok(detection) => self.detection = Some(detection),
            Err((e, source)) => {
                if let Some(mut source) = source {
                    source.close();
                    self.source = Some(source);
                }
                return Err(e);
            }
        }

        self.max_tasks = max_concurrent_tasks.max(1);
        self.pool = Some(TaskPool::with_name("boardwatch", self.max_tasks));

        tracing::info!(
            "Monitor started on source '{}' with {} concurrent tasks",
            self.source_name,
            self.max_tasks
        );
        Ok(())
    }

    /// Start with the configured `max_tasks`
    pub fn start_default(&mut self) -> Result<()> {
        self.start(self.config.max_tasks)
    }

    /// Stop detection, shut the pool down and release every device
    ///
    /// Blocks until the detection thread has exited and running jobs have
    /// finished or the configured shutdown timeout elapsed. Every tracked
    /// device is reported through `row_removed`, last row first. Calling
    /// `stop` on a stopped monitor does nothing.
    pub fn stop(&mut self) -> StopReport {
        let Some(detection) = self.detection.take() else {
            return StopReport::default();
        };
        tracing::info!("Stopping monitor on source '{}'", self.source_name);

        self.source = detection.stop();
        if self.source.is_none() {
            tracing::warn!("Source '{}' was lost by the detection thread", self.source_name);
        }

        let mut report = StopReport::default();
        if let Some(pool) = self.pool.take() {
            let shutdown = pool.shutdown(self.config.shutdown_timeout);
            report.cancelled_jobs = shutdown.cancelled;
            report.abandoned_jobs = shutdown.abandoned;
            if !shutdown.is_clean() {
                tracing::warn!(
                    "{} jobs still running after {:?}",
                    shutdown.abandoned,
                    self.config.shutdown_timeout
                );
            }
        }

        self.notifier.close();
        for mutation in self.registry.clear() {
            self.dispatch(&mutation);
            report.released_devices += 1;
        }
        self.shared.publish(self.registry.devices());

        // Every device is marked removed now, so nothing can queue a refresh
        report.discarded_events = self
            .queue
            .take_all()
            .iter()
            .filter(|pending| !matches!(pending, Pending::Refresh(_)))
            .count();

        tracing::info!("Monitor stopped: {:?}", report);
        report
    }

    pub fn is_running(&self) -> bool {
        self.detection.is_some()
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    // ========================================================================
    // Drain
    // ========================================================================

    /// Apply every queued event and notify observers
    ///
    /// Returns the number of row mutations applied. Anomalies are logged and
    /// forwarded to observers but do not count.
    pub fn drain_and_apply(&mut self) -> usize {
        let pending = self.queue.take_all();
        if pending.is_empty() {
            return 0;
        }

        let mut applied = 0;
        for item in pending {
            let outcome = match item {
                Pending::Event(event) => {
                    tracing::debug!("Applying {} event for {}", event.kind(), event.handle());
                    let refresh = &self.refresh;
                    self.registry
                        .apply(event, |descriptor| {
                            Device::from_descriptor(descriptor).with_refresh(Arc::clone(refresh))
                        })
                        .map(Some)
                }
                Pending::Refresh(handle) => Ok(self.registry.refresh(handle)),
                Pending::SourceFailure(reason) => Err(RegistryAnomaly::SourceFailure(reason)),
            };

            match outcome {
                Ok(Some(mutation)) => {
                    self.dispatch(&mutation);
                    applied += 1;
                }
                Ok(None) => {}
                Err(anomaly) => self.report(anomaly),
            }
        }

        if applied > 0 {
            self.shared.publish(self.registry.devices());
        }
        applied
    }

    /// Wait up to `timeout` for readiness, then drain
    ///
    /// Returns `None` once the monitor has stopped, otherwise the number of
    /// mutations applied (zero on timeout).
    pub fn wait_and_drain(&mut self, timeout: Duration) -> Option<usize> {
        match self.notifier.wait_timeout(timeout) {
            WaitOutcome::Ready => Some(self.drain_and_apply()),
            WaitOutcome::TimedOut => Some(0),
            WaitOutcome::Closed => None,
        }
    }

    /// Number of items waiting for the next drain
    pub fn pending_count(&self) -> usize {
        self.queue.len()
    }

    /// Readiness signal for the consumer's event loop
    pub fn notifier(&self) -> DescriptorNotifier {
        self.notifier.clone()
    }

    // ========================================================================
    // Registry access
    // ========================================================================

    pub fn devices(&self) -> &[DeviceRef] {
        self.registry.devices()
    }

    pub fn device_count(&self) -> usize {
        self.registry.len()
    }

    pub fn device_at(&self, row: usize) -> Option<&DeviceRef> {
        self.registry.get(row)
    }

    pub fn row_of(&self, handle: DeviceHandle) -> Option<usize> {
        self.registry.row_of(handle)
    }

    /// First device matching `predicate`, in row order
    pub fn find(&self, predicate: impl Fn(&Device) -> bool) -> Option<&DeviceRef> {
        self.registry
            .devices()
            .iter()
            .find(|device| predicate(device))
    }

    /// Snapshot handle for threads other than the consumer
    pub fn shared(&self) -> SharedDevices {
        self.shared.clone()
    }

    /// Set a property on the device at `row` and report it immediately
    ///
    /// Returns whether the value changed; `false` as well when `row` is out
    /// of range.
    pub fn set_property<P: Property>(&mut self, row: usize, value: P) -> bool {
        let Some(device) = self.registry.get(row).cloned() else {
            return false;
        };
        let changed = device.store_property(value);
        if changed {
            tracing::debug!("Property {} changed on {}", P::KEY, device.handle());
            self.dispatch(&Mutation::Updated(row, device));
        }
        changed
    }

    // ========================================================================
    // Observers
    // ========================================================================

    pub fn add_observer(&mut self, observer: impl RowObserver + 'static) {
        self.observers.push(Box::new(observer));
    }

    /// Register a [`ChannelObserver`] and return its receiving end
    pub fn observe_channel(&mut self) -> RowChangeIterator {
        let (observer, changes) = ChannelObserver::new();
        self.add_observer(observer);
        changes
    }

    fn dispatch(&mut self, mutation: &Mutation) {
        for observer in &mut self.observers {
            match mutation {
                Mutation::Inserted(row, device) => observer.row_inserted(*row, device),
                Mutation::Updated(row, device) => observer.row_updated(*row, device),
                Mutation::Removed(row, device) => observer.row_removed(*row, device),
            }
        }
    }

    fn report(&mut self, anomaly: RegistryAnomaly) {
        tracing::warn!("{}", anomaly);
        for observer in &mut self.observers {
            observer.anomaly(&anomaly);
        }
    }

    // ========================================================================
    // Jobs
    // ========================================================================

    /// Run `job` on the task pool against `device`
    ///
    /// Jobs are keyed by the device handle, so FIFO jobs for one board run
    /// in submission order. The job holds only a weak reference until it
    /// starts; if the device was removed by then the outcome is
    /// [`TaskError::DeviceGone`].
    pub fn submit<T, F>(
        &self,
        device: &DeviceRef,
        sequencing: Sequencing,
        job: F,
    ) -> std::result::Result<DeviceJob<T>, TaskError>
    where
        T: Send + 'static,
        F: FnOnce(DeviceRef) -> T + Send + 'static,
    {
        let pool = self.pool.as_ref().ok_or(PoolError::PoolShutDown)?;
        let handle = device.handle();
        if !device.is_live() {
            return Err(TaskError::DeviceGone(handle));
        }

        let weak = Arc::downgrade(device);
        let inner = pool.submit(handle, sequencing, move || match weak.upgrade() {
            Some(device) if device.is_live() => Ok(job(device)),
            _ => Err(TaskError::DeviceGone(handle)),
        })?;

        tracing::debug!("Submitted {} for {} ({:?})", inner.id(), handle, sequencing);
        Ok(DeviceJob::new(handle, inner))
    }

    /// Change the job concurrency limit, live if running
    pub fn set_max_tasks(&mut self, max_tasks: usize) {
        self.max_tasks = max_tasks.max(1);
        if let Some(pool) = &self.pool {
            pool.set_max_tasks(self.max_tasks);
        }
    }

    pub fn max_tasks(&self) -> usize {
        self.max_tasks
    }

    /// Jobs currently executing on the pool
    pub fn running_tasks(&self) -> usize {
        self.pool.as_ref().map_or(0, TaskPool::running)
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("source", &self.source_name)
            .field("running", &self.is_running())
            .field("devices", &self.registry.len())
            .field("pending", &self.queue.len())
            .field("max_tasks", &self.max_tasks)
            .finish()
    }
}
