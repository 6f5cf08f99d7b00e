//! Device model and the single-device manager.
//!
//! The transport layer proper is out of scope; sessions only need an opaque
//! "selected device" token. This module supplies the minimal model: one
//! always-online device with per-session selection snapshots.

use std::sync::Arc;

/// A device as reported by `host:devices`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub serial: String,
    /// `device`, `offline`, `recovery`, or `bootloader`.
    pub state: String,
    /// Key/value pairs shown by `host:devices-l`.
    pub properties: Vec<(String, String)>,
    /// Numeric id reported by `host:tport:*`.
    pub transport_id: u64,
}

impl Device {
    pub fn new(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            state: "device".into(),
            properties: Vec::new(),
            transport_id: 1,
        }
    }
}

impl Default for Device {
    fn default() -> Self {
        Self {
            serial: "radb-5554".into(),
            state: "device".into(),
            properties: vec![
                ("product".into(), "radb_product".into()),
                ("model".into(), "radb_model".into()),
                ("device".into(), "radb_device".into()),
                ("transport_id".into(), "1".into()),
            ],
            transport_id: 1,
        }
    }
}

/// Minimal device manager holding a single always-online device.
///
/// The router table is build-once and sessions only take snapshots, so the
/// manager is immutable after construction and needs no locking.
#[derive(Debug)]
pub struct SingleDeviceManager {
    device: Device,
}

pub type DeviceManagerHandle = Arc<SingleDeviceManager>;

impl SingleDeviceManager {
    pub fn new(device: Device) -> Self {
        Self { device }
    }

    pub fn list(&self) -> Vec<Device> {
        vec![self.device.clone()]
    }

    /// Resolve a selection request. `None` selects "any device"; a serial
    /// must match the attached device exactly.
    pub fn select(&self, serial: Option<&str>) -> Option<Device> {
        match serial {
            Some(s) if s != self.device.serial => None,
            _ => Some(self.device.clone()),
        }
    }
}

impl Default for SingleDeviceManager {
    fn default() -> Self {
        Self::new(Device::default())
    }
}
