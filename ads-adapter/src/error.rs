use thiserror::Error;

use crate::transport::TransportError;

/// Result type alias for adapter operations.
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Centralized error enum for the device adapter.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DeviceError {
    /// A required connection property is absent.
    ///
    /// Fatal for the connect attempt that raised it; reported outward via
    /// the `connect-failed` status, never retried by this layer.
    #[error("missing connection configuration: {0}")]
    MissingConfig(&'static str),

    /// The overload guard denied the operation because another one is
    /// still in flight. Transient; the caller is expected to retry on its
    /// next schedule tick.
    #[error("device busy, operation dropped")]
    Busy,

    /// Failure reported by the underlying transport.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// One or more address subscriptions failed after a successful
    /// connect. The connection itself is still usable.
    #[error("{failed} of {total} subscriptions failed")]
    SubscriptionPartial { failed: usize, total: usize },
}
