//! Transport capability contract.
//!
//! The wire protocol (framing, AMS routing, symbol handling) lives behind
//! this trait; the adapter only consumes the capabilities it needs.
//! Implementations deliver asynchronous connection events and change
//! notifications over the channel handed to [`AdsTransport::connect`].

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::address::{AmsAddress, ConnectOptions};

/// Raw value shape accepted by a symbol write.
#[derive(Debug, Clone, PartialEq)]
pub enum RawWrite {
    Number(f64),
    /// Booleans are actuated as integer `1`/`0`.
    Integer(i64),
    Text(String),
}

/// Information returned by a successful connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub target: AmsAddress,
}

/// Asynchronous event pushed by the transport.
///
/// Connection events may arrive at any time, independent of the call that
/// opened the connection.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected,
    Disconnected,
    Reconnecting,
    /// Transport-internal fault that did not close the connection.
    Fault(String),
    /// Change notification for a subscribed address.
    Notification {
        address: String,
        payload: serde_json::Value,
        /// Milliseconds since the unix epoch, device-side when available.
        timestamp: i64,
    },
}

/// Errors reported by transport operations.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("subscribe {address} failed: {reason}")]
    Subscribe { address: String, reason: String },

    #[error("write {address} failed: {reason}")]
    Write { address: String, reason: String },

    #[error("transport closed")]
    Closed,
}

/// Async trait for the device-side connection.
///
/// This is the seam the adapter is tested against. Implementations manage
/// their own interior state; all methods take `&self` so a hard
/// [`force_close`](AdsTransport::force_close) can run while another
/// operation is still pending.
#[cfg_attr(any(test, feature = "test-support"), mockall::automock)]
#[async_trait]
pub trait AdsTransport: Send + Sync {
    /// Open the connection described by `options`.
    ///
    /// Connection events and change notifications are delivered through
    /// `events` until the transport closes.
    ///
    /// # Errors
    /// Returns `Err` if the route cannot be established.
    async fn connect(
        &self,
        options: &ConnectOptions,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<ConnectionInfo, TransportError>;

    /// Close the connection.
    ///
    /// # Errors
    /// Returns `Err` if the close handshake fails; the adapter treats
    /// this as advisory.
    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Subscribe to change notifications for one device address.
    ///
    /// `interval` is a cycle-time hint, the device may coalesce.
    ///
    /// # Errors
    /// Returns `Err` if the symbol cannot be resolved or the notification
    /// handle cannot be created.
    async fn subscribe(&self, address: &str, interval: Duration) -> Result<(), TransportError>;

    /// Drop every active subscription.
    ///
    /// # Errors
    /// Returns `Err` if the device rejects the teardown.
    async fn unsubscribe_all(&self) -> Result<(), TransportError>;

    /// Write a raw value to a device symbol.
    ///
    /// # Errors
    /// Returns `Err` if the symbol is unknown or the device rejects the
    /// value.
    async fn write_symbol(&self, address: &str, value: &RawWrite) -> Result<(), TransportError>;

    /// Hard reset of the underlying socket, used as a circuit breaker
    /// when the transport stops signalling disconnects. Must not block.
    fn force_close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_transport_round_trips_a_write() {
        let mut mock = MockAdsTransport::new();
        mock.expect_write_symbol()
            .withf(|address, value| address == "MAIN.x" && *value == RawWrite::Integer(1))
            .times(1)
            .returning(|_, _| Ok(()));

        mock.write_symbol("MAIN.x", &RawWrite::Integer(1))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn mock_transport_reports_connect_errors() {
        let mut mock = MockAdsTransport::new();
        mock.expect_connect()
            .returning(|_, _| Err(TransportError::Connect("no route".into())));

        let (tx, _rx) = mpsc::unbounded_channel();
        let options = ConnectOptions {
            target: AmsAddress {
                net_id: "1.2.3.4.1.1".into(),
                port: 851,
            },
            local: None,
            router: None,
        };
        let err = mock.connect(&options, tx).await.unwrap_err();
        assert!(matches!(err, TransportError::Connect(_)));
    }
}
