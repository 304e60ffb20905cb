//! Sub-device directory keyed by (product id, device name)

use crate::protocol::messages::DeviceRecord;
use std::collections::HashMap;
use std::fmt;

/// Composite directory key
///
/// Kept as a pair so that `("ab", "c")` and `("a", "bc")` never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubdevKey {
    pub product_id: String,
    pub device_name: String,
}

impl SubdevKey {
    pub fn new(product_id: &str, device_name: &str) -> Self {
        Self {
            product_id: product_id.to_string(),
            device_name: device_name.to_string(),
        }
    }
}

impl fmt::Display for SubdevKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.product_id, self.device_name)
    }
}

/// Sub-device status as seen by callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubdevStatus {
    Online,
    Offline,
    Unknown,
    /// Not present in the directory; never stored
    NotExist,
}

/// One logical device behind the gateway connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubDevice {
    pub key: SubdevKey,
    pub status: SubdevStatus,
    /// Record sent in online/offline reports
    pub record: DeviceRecord,
}

impl SubDevice {
    pub fn new(key: SubdevKey, record: DeviceRecord) -> Self {
        Self {
            key,
            status: SubdevStatus::Offline,
            record,
        }
    }
}

#[derive(Debug, Default)]
pub struct SubdeviceDirectory {
    entries: HashMap<SubdevKey, SubDevice>,
}

impl SubdeviceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, product_id: &str, device_name: &str) -> Option<&SubDevice> {
        self.entries.get(&SubdevKey::new(product_id, device_name))
    }

    pub fn contains(&self, product_id: &str, device_name: &str) -> bool {
        self.get(product_id, device_name).is_some()
    }

    /// Status of an entry, or `NotExist` when absent
    pub fn status(&self, product_id: &str, device_name: &str) -> SubdevStatus {
        self.get(product_id, device_name)
            .map(|subdev| subdev.status)
            .unwrap_or(SubdevStatus::NotExist)
    }

    /// Update an existing entry; returns false when absent
    pub fn set_status(&mut self, product_id: &str, device_name: &str, status: SubdevStatus) -> bool {
        match self.entries.get_mut(&SubdevKey::new(product_id, device_name)) {
            Some(subdev) => {
                subdev.status = status;
                true
            }
            None => false,
        }
    }

    /// Insert or replace an entry, returning the previous one
    pub fn insert(&mut self, subdev: SubDevice) -> Option<SubDevice> {
        self.entries.insert(subdev.key.clone(), subdev)
    }

    /// Existing entry, or one built by `make` on first reference
    pub fn get_or_insert_with<F>(&mut self, product_id: &str, device_name: &str, make: F) -> &SubDevice
    where
        F: FnOnce(SubdevKey) -> SubDevice,
    {
        self.entries
            .entry(SubdevKey::new(product_id, device_name))
            .or_insert_with_key(|key| make(key.clone()))
    }

    pub fn remove(&mut self, product_id: &str, device_name: &str) -> Option<SubDevice> {
        self.entries.remove(&SubdevKey::new(product_id, device_name))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All keys, sorted
    pub fn keys(&self) -> Vec<SubdevKey> {
        let mut keys: Vec<SubdevKey> = self.entries.keys().cloned().collect();
        keys.sort();
        keys
    }
}
