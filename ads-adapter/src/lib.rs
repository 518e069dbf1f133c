//! # ads-adapter
//!
//! Transport-agnostic device adapter bridging a TwinCAT ADS controller
//! into a supervisory runtime's tag model.
//!
//! The adapter owns the connection lifecycle, per-address change
//! notification subscriptions, a polling cycle that composes typed
//! values from raw ones, overload protection for overlapping async
//! operations, and status/value event emission. The wire protocol itself
//! lives behind the [`AdsTransport`] trait.
//!
//! ## Features
//! - `test-support`: Enables [`MockAdsTransport`] via `mockall`

mod address;
mod config;
mod device;
mod error;
mod events;
mod guard;
mod tags;
mod values;

pub mod transport;

// Stable public API
pub use address::{AmsAddress, ConnectOptions, Endpoint, DEFAULT_LOCAL_PORT, DEFAULT_ROUTER_PORT};
pub use config::{DaqRule, DeviceConfig, DeviceProperty, TagConfig, TagType};
pub use device::{AdsDevice, TagMeta, TagValue};
pub use error::{DeviceError, DeviceResult};
pub use guard::{GuardDecision, OverloadGuard, OVERLOAD_LIMIT};
pub use tags::{SubscriptionMap, Tag};
pub use values::{compose_value, raw_from_typed, should_persist};
pub use events::{
    ConnectionState, DaqSample, DaqSink, DeviceEvent, TagSnapshot, STATUS_CONNECT_BUSY,
    STATUS_CONNECT_ERROR, STATUS_CONNECT_FAILED, STATUS_CONNECT_OFF, STATUS_CONNECT_OK,
};
pub use transport::{
    AdsTransport, ConnectionInfo, RawWrite, TransportError, TransportEvent,
};

// Test support re-export
#[cfg(feature = "test-support")]
pub use transport::MockAdsTransport;
