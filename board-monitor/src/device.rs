//! One attached board and its mutable state
//!
//! A [`Device`] is created when the registry applies an Added event and is
//! shared as a [`DeviceRef`] with observers, snapshots and in-flight jobs.
//! Its identity never changes; everything else lives behind a short-lived
//! lock and is updated in place by Changed events.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Instant;

use board_source::{Capabilities, DeviceDescriptor, DeviceHandle, DeviceIdentity, Interface};
use parking_lot::RwLock;

use crate::notifier::WakeCallback;
use crate::property::{Property, PropertyBag};

/// Shared reference to a device
pub type DeviceRef = Arc<Device>;

/// Non-owning reference used by jobs to check liveness
pub type WeakDevice = Weak<Device>;

/// Called with the device handle when a property changes off the consumer thread
///
/// Runs under the device's state lock; any wake callback it returns is
/// invoked after that lock is released.
pub(crate) type RefreshHook = Arc<dyn Fn(DeviceHandle) -> Option<WakeCallback> + Send + Sync>;

/// Lifecycle of a device as seen by the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Added,
    Changed,
    Removed,
}

#[derive(Debug)]
struct DeviceState {
    lifecycle: LifecycleState,
    model: String,
    capabilities: Capabilities,
    interfaces: Vec<Interface>,
    properties: PropertyBag,
}

/// A physical board tracked by the monitor
pub struct Device {
    handle: DeviceHandle,
    identity: DeviceIdentity,
    created_at: Instant,
    state: RwLock<DeviceState>,
    refresh: Option<RefreshHook>,
}

impl Device {
    /// Build a standalone device from a descriptor
    ///
    /// Devices created this way are not attached to a monitor, so property
    /// changes do not schedule a row refresh.
    pub fn from_descriptor(descriptor: &DeviceDescriptor) -> Self {
        Self {
            handle: descriptor.handle,
            identity: descriptor.identity.clone(),
            created_at: Instant::now(),
            state: RwLock::new(DeviceState {
                lifecycle: LifecycleState::Added,
                model: descriptor.model.clone(),
                capabilities: descriptor.capabilities,
                interfaces: descriptor.interfaces.clone(),
                properties: PropertyBag::new(),
            }),
            refresh: None,
        }
    }

    pub(crate) fn with_refresh(mut self, hook: RefreshHook) -> Self {
        self.refresh = Some(hook);
        self
    }

    pub fn handle(&self) -> DeviceHandle {
        self.handle
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn serial_number(&self) -> &str {
        &self.identity.serial_number
    }

    pub fn location(&self) -> &str {
        &self.identity.location
    }

    /// When the registry first saw this attachment
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn lifecycle(&self) -> LifecycleState {
        self.state.read().lifecycle
    }

    /// False once the device has been removed from the registry
    pub fn is_live(&self) -> bool {
        self.lifecycle() != LifecycleState::Removed
    }

    pub fn model(&self) -> String {
        self.state.read().model.clone()
    }

    /// Short label combining serial number and model, e.g. `1234567-Teensy 3.6`
    pub fn tag(&self) -> String {
        let state = self.state.read();
        if state.model.is_empty() {
            self.identity.serial_number.clone()
        } else {
            format!("{}-{}", self.identity.serial_number, state.model)
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        self.state.read().capabilities
    }

    pub fn has_capability(&self, capability: Capabilities) -> bool {
        self.capabilities().contains(capability)
    }

    pub fn is_upload_available(&self) -> bool {
        self.has_capability(Capabilities::UPLOAD)
    }

    pub fn is_reset_available(&self) -> bool {
        self.has_capability(Capabilities::RESET)
    }

    pub fn is_reboot_available(&self) -> bool {
        self.has_capability(Capabilities::REBOOT)
    }

    pub fn is_serial_available(&self) -> bool {
        self.has_capability(Capabilities::SERIAL)
    }

    pub fn interfaces(&self) -> Vec<Interface> {
        self.state.read().interfaces.clone()
    }

    pub fn property<P: Property>(&self) -> Option<P> {
        self.state.read().properties.get::<P>()
    }

    pub fn property_keys(&self) -> Vec<&'static str> {
        self.state.read().properties.keys()
    }

    /// Set a property from any thread
    ///
    /// When the value changes on a live device attached to a monitor, a
    /// refresh is queued and the next drain reports `row_updated` for the
    /// device's row. Returns whether the value changed.
    pub fn set_property<P: Property>(&self, value: P) -> bool {
        let wake = {
            let mut state = self.state.write();
            if !state.properties.set(value) {
                return false;
            }
            // Checked under the write lock so a concurrent removal cannot
            // slip between the liveness check and the push
            match &self.refresh {
                Some(refresh) if state.lifecycle != LifecycleState::Removed => {
                    tracing::debug!(
                        "Property {} changed on {}, queueing refresh",
                        P::KEY,
                        self.handle
                    );
                    refresh(self.handle)
                }
                _ => None,
            }
        };
        if let Some(wake) = wake {
            wake();
        }
        true
    }

    /// Set a property without scheduling a refresh
    pub(crate) fn store_property<P: Property>(&self, value: P) -> bool {
        self.state.write().properties.set(value)
    }

    /// Apply a Changed descriptor to the mutable fields
    pub(crate) fn apply_change(&self, descriptor: &DeviceDescriptor) {
        if descriptor.identity != self.identity {
            tracing::warn!(
                "Changed event for {} carries identity {}, keeping {}",
                self.handle,
                descriptor.identity,
                self.identity
            );
        }

        let mut state = self.state.write();
        state.lifecycle = LifecycleState::Changed;
        state.model = descriptor.model.clone();
        state.capabilities = descriptor.capabilities;
        state.interfaces = descriptor.interfaces.clone();
    }

    pub(crate) fn mark_removed(&self) {
        self.state.write().lifecycle = LifecycleState::Removed;
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("Device")
            .field("handle", &self.handle)
            .field("identity", &self.identity)
            .field("lifecycle", &state.lifecycle)
            .field("model", &state.model)
            .field("capabilities", &state.capabilities)
            .field("properties", &state.properties)
            .finish()
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.tag(), self.handle)
    }
}
