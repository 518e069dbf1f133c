//! Device and tag configuration as delivered by the supervisory runtime.
//!
//! The runtime hands the adapter an already-validated configuration
//! snapshot; the adapter clones it at load/connect time so later external
//! mutation cannot race a running connection.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Configuration of one device instance.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DeviceConfig {
    pub id: String,
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub property: DeviceProperty,
    /// Tag table keyed by tag id (unique within the device).
    #[serde(default)]
    pub tags: BTreeMap<String, TagConfig>,
}

fn default_enabled() -> bool {
    true
}

/// Connection properties of the device.
///
/// `address` carries the target AMS net id, optionally as `host:port`.
/// `local` and `router` are optional endpoints in the same format.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct DeviceProperty {
    #[serde(default)]
    pub address: Option<String>,
    /// Target ADS port when not embedded in `address`.
    #[serde(default)]
    pub port: Option<u16>,
    /// Local AMS net id; needs a matching entry in the PLC route table.
    #[serde(default)]
    pub local: Option<String>,
    /// ADS router endpoint (the PLC ip address).
    #[serde(default)]
    pub router: Option<String>,
}

/// Logical data type of a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TagType {
    Number,
    Boolean,
    String,
}

/// Configuration of one logical tag.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TagConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Device-side symbol path, e.g. `"MAIN.counter"`. Several tags may
    /// share one address when they read sub-fields of a structured value.
    pub address: String,
    /// Sub-field key within a structured (JSON) payload delivered on the
    /// shared address. `None` means the whole payload is the raw value.
    #[serde(default)]
    pub mem_address: Option<String>,
    #[serde(rename = "type")]
    pub tag_type: TagType,
    /// Decimal digits to round a composed number to.
    #[serde(default)]
    pub format: Option<u8>,
    #[serde(default)]
    pub daq: DaqRule,
}

/// Persistence policy for one tag, evaluated on every polling tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct DaqRule {
    #[serde(default)]
    pub enabled: bool,
    /// Persist when the raw value changed since the last tick.
    #[serde(default, rename = "changed")]
    pub change_on_save: bool,
    /// Persist at least every `interval_ms`, 0 disables the interval rule.
    #[serde(default)]
    pub interval_ms: u64,
}
