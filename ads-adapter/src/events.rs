//! Outward event surface: connection status and value batches.
//!
//! Events are fire-and-forget over an unbounded channel; ordering is FIFO
//! within one device, nothing is guaranteed across devices. A closed
//! receiver (runtime gone) is silently tolerated.

use std::fmt;

use serde::Serialize;
use serde_json::Value;

/// Display status handed to the runtime: the device just connected.
pub const STATUS_CONNECT_OK: &str = "connect-ok";
/// The device was disconnected in an orderly way.
pub const STATUS_CONNECT_OFF: &str = "connect-off";
/// The transport reported a connect or runtime error.
pub const STATUS_CONNECT_ERROR: &str = "connect-error";
/// A connect attempt was dropped by the overload guard.
pub const STATUS_CONNECT_BUSY: &str = "connect-busy";
/// Connection data is missing, the connect attempt never started.
pub const STATUS_CONNECT_FAILED: &str = "connect-failed";

/// Lifecycle state of the device connection.
///
/// Driven both by adapter calls and by asynchronous transport events, so
/// it can change between any two observations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Externally visible cache entry for one tag.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagSnapshot {
    pub id: String,
    pub value: Value,
    pub changed: bool,
}

/// Sample forwarded to the persistence hook.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DaqSample {
    pub id: String,
    pub value: Value,
    /// Notification timestamp of the underlying raw value, ms since the
    /// unix epoch.
    pub timestamp: i64,
}

/// Event published to the runtime.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum DeviceEvent {
    /// `device-status:changed`
    StatusChanged { device: String, status: String },
    /// `device-value:changed`
    ValuesChanged {
        device: String,
        values: Vec<TagSnapshot>,
    },
}

/// Persistence hook bound by the runtime; receives the changed subset of
/// each polling tick together with the owning device's name.
pub trait DaqSink: Send + Sync {
    fn add_daq(&self, samples: Vec<DaqSample>, device: &str);
}

impl<F> DaqSink for F
where
    F: Fn(Vec<DaqSample>, &str) + Send + Sync,
{
    fn add_daq(&self, samples: Vec<DaqSample>, device: &str) {
        self(samples, device);
    }
}
