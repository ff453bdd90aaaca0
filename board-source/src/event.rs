//! Raw device lifecycle events produced by a platform source
//!
//! The platform collaborator reports boards through [`PlatformEvent`]s.
//! Added and Changed events carry a full [`DeviceDescriptor`]; Removed
//! events only carry the [`DeviceHandle`] of the board that went away.

use std::fmt;

use bitflags::bitflags;

/// Opaque platform-level identifier for one attached device instance
///
/// A handle is only stable while the device stays attached. Sources must
/// never hand out the same handle for two different attachments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceHandle(u64);

impl DeviceHandle {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Stable identity of a physical board: serial number plus location path
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceIdentity {
    pub serial_number: String,
    /// Physical port path, e.g. `usb-1-2.3`
    pub location: String,
}

impl DeviceIdentity {
    pub fn new(serial_number: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            serial_number: serial_number.into(),
            location: location.into(),
        }
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.serial_number, self.location)
    }
}

bitflags! {
    /// Operations a board currently supports
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Capabilities: u16 {
        /// The board reports a unique serial number
        const UNIQUE = 1 << 0;
        /// The board is running user code
        const RUN = 1 << 1;
        const UPLOAD = 1 << 2;
        const RESET = 1 << 3;
        const REBOOT = 1 << 4;
        const SERIAL = 1 << 5;
    }
}

impl Capabilities {
    const NAMES: [(Capabilities, &'static str); 6] = [
        (Capabilities::UNIQUE, "unique"),
        (Capabilities::RUN, "run"),
        (Capabilities::UPLOAD, "upload"),
        (Capabilities::RESET, "reset"),
        (Capabilities::REBOOT, "reboot"),
        (Capabilities::SERIAL, "serial"),
    ];

    /// Human-readable names of the set capabilities, in declaration order
    pub fn names(self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .filter(|(cap, _)| self.contains(*cap))
            .map(|(_, name)| *name)
            .collect()
    }
}

/// One USB interface exposed by a board
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interface {
    pub number: u8,
    pub description: String,
    /// OS path of the interface node (`/dev/ttyACM0`, `/dev/hidraw2`, ...)
    pub path: String,
    pub capabilities: Capabilities,
}

impl Interface {
    pub fn new(
        number: u8,
        description: impl Into<String>,
        path: impl Into<String>,
        capabilities: Capabilities,
    ) -> Self {
        Self {
            number,
            description: description.into(),
            path: path.into(),
            capabilities,
        }
    }
}

/// Everything the platform knows about an attached board
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub handle: DeviceHandle,
    pub identity: DeviceIdentity,
    pub model: String,
    pub capabilities: Capabilities,
    pub interfaces: Vec<Interface>,
}

impl DeviceDescriptor {
    pub fn new(
        handle: DeviceHandle,
        serial_number: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            handle,
            identity: DeviceIdentity::new(serial_number, location),
            model: String::new(),
            capabilities: Capabilities::empty(),
            interfaces: Vec::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Add an interface; its capabilities are merged into the board's set
    pub fn with_interface(mut self, interface: Interface) -> Self {
        self.capabilities |= interface.capabilities;
        self.interfaces.push(interface);
        self
    }
}

/// Kind of lifecycle transition, used for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Added,
    Changed,
    Removed,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Added => write!(f, "added"),
            EventKind::Changed => write!(f, "changed"),
            EventKind::Removed => write!(f, "removed"),
        }
    }
}

/// A raw lifecycle event from the platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformEvent {
    Added(DeviceDescriptor),
    Changed(DeviceDescriptor),
    Removed(DeviceHandle),
}

impl PlatformEvent {
    pub fn handle(&self) -> DeviceHandle {
        match self {
            PlatformEvent::Added(desc) | PlatformEvent::Changed(desc) => desc.handle,
            PlatformEvent::Removed(handle) => *handle,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            PlatformEvent::Added(_) => EventKind::Added,
            PlatformEvent::Changed(_) => EventKind::Changed,
            PlatformEvent::Removed(_) => EventKind::Removed,
        }
    }
}
