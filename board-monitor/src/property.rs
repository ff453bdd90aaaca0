//! Typed per-device properties with change detection
//!
//! Each board carries a [`PropertyBag`] of values set by the application:
//! firmware to upload, reset behaviour, the last error seen, and so on.
//! Properties are plain types implementing [`Property`], stored by type.
//!
//! # Example
//!
//! ```rust
//! use board_monitor::property::{Firmware, Property, PropertyBag};
//!
//! let mut bag = PropertyBag::new();
//! assert!(bag.set(Firmware::new("blink.hex")));
//! assert!(!bag.set(Firmware::new("blink.hex")));
//!
//! assert_eq!(bag.get::<Firmware>(), Some(Firmware::new("blink.hex")));
//! assert_eq!(bag.keys(), vec![Firmware::KEY]);
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::path::PathBuf;

/// Marker trait for values stored in a device's property bag
///
/// `PartialEq` drives change detection: setting an equal value is not a
/// change and does not refresh the device's row.
pub trait Property: Clone + Send + Sync + PartialEq + 'static {
    /// Unique key identifying this property type, used in logs and listings
    const KEY: &'static str;
}

/// Firmware image to upload to the board
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Firmware(pub PathBuf);

impl Firmware {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }
}

impl Property for Firmware {
    const KEY: &'static str = "firmware";
}

/// Reset the board once an upload completes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetAfter(pub bool);

impl Property for ResetAfter {
    const KEY: &'static str = "reset_after";
}

/// Clear buffered serial output when the board resets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClearOnReset(pub bool);

impl Property for ClearOnReset {
    const KEY: &'static str = "clear_on_reset";
}

/// Last error reported by a job running against the board
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastError(pub String);

impl Property for LastError {
    const KEY: &'static str = "last_error";
}

struct Entry {
    key: &'static str,
    value: Box<dyn Any + Send + Sync>,
}

/// Type-erased storage for one device's properties
#[derive(Default)]
pub struct PropertyBag {
    values: HashMap<TypeId, Entry>,
}

impl PropertyBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a property value by type
    pub fn get<P: Property>(&self) -> Option<P> {
        self.values
            .get(&TypeId::of::<P>())
            .and_then(|entry| entry.value.downcast_ref::<P>())
            .cloned()
    }

    /// Set a property value, returning whether the value changed
    pub fn set<P: Property>(&mut self, value: P) -> bool {
        let type_id = TypeId::of::<P>();
        let current = self
            .values
            .get(&type_id)
            .and_then(|entry| entry.value.downcast_ref::<P>());

        if current == Some(&value) {
            return false;
        }
        self.values.insert(
            type_id,
            Entry {
                key: P::KEY,
                value: Box::new(value),
            },
        );
        true
    }

    /// Remove a property, returning whether it existed
    pub fn remove<P: Property>(&mut self) -> bool {
        self.values.remove(&TypeId::of::<P>()).is_some()
    }

    pub fn contains<P: Property>(&self) -> bool {
        self.values.contains_key(&TypeId::of::<P>())
    }

    /// Keys of every stored property, sorted
    pub fn keys(&self) -> Vec<&'static str> {
        let mut keys: Vec<_> = self.values.values().map(|entry| entry.key).collect();
        keys.sort_unstable();
        keys
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl std::fmt::Debug for PropertyBag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertyBag")
            .field("keys", &self.keys())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_detects_changes() {
        let mut bag = PropertyBag::new();
        assert!(bag.set(ResetAfter(true)));
        assert!(!bag.set(ResetAfter(true)));
        assert!(bag.set(ResetAfter(false)));
        assert_eq!(bag.get::<ResetAfter>(), Some(ResetAfter(false)));
    }

    #[test]
    fn test_types_are_stored_independently() {
        let mut bag = PropertyBag::new();
        bag.set(ResetAfter(true));
        bag.set(ClearOnReset(false));
        bag.set(LastError("timeout".to_string()));

        assert_eq!(bag.len(), 3);
        assert_eq!(bag.get::<ResetAfter>(), Some(ResetAfter(true)));
        assert_eq!(bag.get::<ClearOnReset>(), Some(ClearOnReset(false)));
        assert_eq!(bag.keys(), vec!["clear_on_reset", "last_error", "reset_after"]);
        assert!(bag.get::<Firmware>().is_none());
    }

    #[test]
    fn test_remove() {
        let mut bag = PropertyBag::new();
        bag.set(Firmware::new("/tmp/a.hex"));
        assert!(bag.contains::<Firmware>());
        assert!(bag.remove::<Firmware>());
        assert!(!bag.remove::<Firmware>());
        assert!(bag.is_empty());
    }

    #[test]
    fn test_debug_lists_keys() {
        let mut bag = PropertyBag::new();
        bag.set(ResetAfter(true));
        assert_eq!(format!("{:?}", bag), "PropertyBag { keys: [\"reset_after\"] }");
    }
}
