use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::packet_decoder::{MODEL_KEY, SERIAL_KEY, SW_VERSION_KEYS};

/// Identity metadata for one meter, accumulated from full telegrams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// Source address packets are accepted from.
    pub host: IpAddr,
    /// Meter serial number, once one has been seen or seeded.
    pub serial: Option<String>,
    pub model: Option<String>,
    pub sw_version: Option<String>,
}

impl DeviceIdentity {
    /// Creates the identity for a new session, optionally seeded with the
    /// serial persisted in the host's configuration record.
    pub fn new(host: IpAddr, serial: Option<String>) -> Self {
        Self {
            host,
            serial,
            model: None,
            sw_version: None,
        }
    }

    /// Folds the identity fields of one telegram into this identity.
    ///
    /// The serial is only ever set once: the device registry keys off it, so
    /// a meter that later omits its serial (partial telegrams carry none)
    /// or reports a different one must not destabilise the unique ID. Model
    /// and firmware version are last-write-wins.
    ///
    /// Returns true if anything changed.
    pub fn apply_telegram(&mut self, fields: &Map<String, Value>) -> bool {
        let mut changed = false;

        if self.serial.is_none() {
            if let Some(serial) = fields.get(SERIAL_KEY).and_then(Value::as_str) {
                self.serial = Some(serial.to_owned());
                changed = true;
            }
        }

        if let Some(model) = fields.get(MODEL_KEY).and_then(Value::as_str) {
            if self.model.as_deref() != Some(model) {
                self.model = Some(model.to_owned());
                changed = true;
            }
        }

        for key in SW_VERSION_KEYS {
            if let Some(version) = fields.get(key).map(coerce_to_string) {
                if self.sw_version.as_deref() != Some(version.as_str()) {
                    self.sw_version = Some(version);
                    changed = true;
                }
                break;
            }
        }

        changed
    }

    /// The stable identifier for this device: serial when known, otherwise
    /// the network address.
    pub fn unique_id(&self) -> String {
        resolve_unique_id(self.serial.as_deref(), self.host)
    }
}

/// Result of one discovery or validation listen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub host: IpAddr,
    pub serial: Option<String>,
}

impl DiscoveredDevice {
    pub fn unique_id(&self) -> String {
        resolve_unique_id(self.serial.as_deref(), self.host)
    }
}

/// The persisted configuration shape the host stores per meter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigRecord {
    /// Caller-assigned stable key, derived via [`resolve_unique_id`].
    pub unique_id: String,
    pub host: IpAddr,
    pub serial: Option<String>,
}

/// Derives the stable unique ID for a device: serial if present, else the
/// network address. Applied identically at first setup and reconfiguration.
pub fn resolve_unique_id(serial: Option<&str>, host: IpAddr) -> String {
    match serial {
        Some(serial) => serial.to_owned(),
        None => host.to_string(),
    }
}

/// Firmware versions arrive as strings on most firmwares but as bare
/// numbers on some. Coerce to string so the identity stays uniform.
fn coerce_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
