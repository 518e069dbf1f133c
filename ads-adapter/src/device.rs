//! Device adapter core: connection lifecycle, subscription handling,
//! polling and status/value emission.
//!
//! One [`AdsDevice`] instance owns one device. Mutable state lives behind
//! a single mutex shared with the event pump task; notifications arriving
//! between polling ticks are visible to the next tick through that shared
//! table. Connect, disconnect and polling are serialized by the
//! [`OverloadGuard`], which detects overlap instead of blocking.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::address::ConnectOptions;
use crate::config::{DeviceConfig, TagType};
use crate::error::{DeviceError, DeviceResult};
use crate::events::{
    ConnectionState, DaqSample, DaqSink, DeviceEvent, TagSnapshot, STATUS_CONNECT_BUSY,
    STATUS_CONNECT_ERROR, STATUS_CONNECT_FAILED, STATUS_CONNECT_OFF, STATUS_CONNECT_OK,
};
use crate::guard::{GuardDecision, OverloadGuard};
use crate::tags::{self, SubscriptionMap, TagTable};
use crate::transport::{AdsTransport, TransportEvent};
use crate::values;

/// Notification cycle hint passed with every subscription.
const NOTIFICATION_INTERVAL: Duration = Duration::from_millis(1000);

/// Point-query result: current value plus the last polling timestamp.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagValue {
    pub id: String,
    pub value: Value,
    pub ts: Option<i64>,
}

/// Tag properties exposed for display purposes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagMeta {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub tag_type: TagType,
    pub format: Option<u8>,
}

struct DeviceState {
    config: DeviceConfig,
    tags: TagTable,
    map: SubscriptionMap,
    snapshot: BTreeMap<String, TagSnapshot>,
    connection: ConnectionState,
    last_status: String,
    connected: bool,
    last_read_ts: Option<i64>,
}

/// Adapter bridging one remote ADS device into the runtime's tag model.
pub struct AdsDevice<T: AdsTransport> {
    name: String,
    transport: T,
    state: Arc<Mutex<DeviceState>>,
    guard: Mutex<OverloadGuard>,
    events: mpsc::UnboundedSender<DeviceEvent>,
    daq: Mutex<Option<Box<dyn DaqSink>>>,
    /// Whether a transport connection was opened (and not torn down).
    opened: AtomicBool,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl<T: AdsTransport> AdsDevice<T> {
    /// Create the adapter for one device. `events` receives the status
    /// and value batches this device produces.
    pub fn new(
        config: DeviceConfig,
        transport: T,
        events: mpsc::UnboundedSender<DeviceEvent>,
    ) -> Self {
        let name = config.name.clone();
        let table = tags::build_table(config.tags.values().cloned());
        let map = SubscriptionMap::rebuild(&table);
        Self {
            name,
            transport,
            state: Arc::new(Mutex::new(DeviceState {
                config,
                tags: table,
                map,
                snapshot: BTreeMap::new(),
                connection: ConnectionState::Disconnected,
                last_status: String::new(),
                connected: false,
                last_read_ts: None,
            })),
            guard: Mutex::new(OverloadGuard::new()),
            events,
            daq: Mutex::new(None),
            opened: AtomicBool::new(false),
            pump: Mutex::new(None),
        }
    }

    /// Connect to the device and establish all tag subscriptions.
    ///
    /// Status events are emitted on every outcome; asynchronous transport
    /// events keep updating the connection state after this call returns.
    ///
    /// # Errors
    /// [`DeviceError::MissingConfig`] without an address or target port,
    /// [`DeviceError::Busy`] when dropped by the overload guard,
    /// [`DeviceError::Transport`] when the transport refuses the
    /// connection, [`DeviceError::SubscriptionPartial`] when the
    /// connection stands but one or more subscriptions failed.
    pub async fn connect(&self) -> DeviceResult<()> {
        let options = {
            let st = self.state.lock();
            ConnectOptions::build(&st.config.property)
        };
        let options = match options {
            Ok(options) => options,
            Err(err) => {
                tracing::error!(device = %self.name, error = %err, "missing connection data");
                self.set_status(STATUS_CONNECT_FAILED);
                self.clear_snapshot();
                return Err(err);
            }
        };

        match self.guard.lock().acquire() {
            GuardDecision::Granted => {}
            GuardDecision::Busy => {
                tracing::warn!(device = %self.name, "connect overlaps a working operation, dropped");
                self.set_status(STATUS_CONNECT_BUSY);
                return Err(DeviceError::Busy);
            }
            GuardDecision::Overloaded => {
                tracing::warn!(device = %self.name, "overload limit reached, forcing transport reset");
                self.transport.force_close();
                self.set_status(STATUS_CONNECT_BUSY);
                return Err(DeviceError::Busy);
            }
        }

        self.clear_snapshot();
        self.state.lock().connection = ConnectionState::Connecting;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        match self.transport.connect(&options, event_tx).await {
            Ok(info) => {
                tracing::info!(device = %self.name, target = %info.target, "connected");
                self.opened.store(true, Ordering::SeqCst);
                {
                    let mut st = self.state.lock();
                    st.connected = true;
                    st.connection = ConnectionState::Connected;
                }
                self.set_status(STATUS_CONNECT_OK);
                self.spawn_event_pump(event_rx);

                let (subscribed, total) = self.establish_subscriptions().await;
                self.guard.lock().release();
                if subscribed < total {
                    self.state.lock().connection = ConnectionState::Error;
                    return Err(DeviceError::SubscriptionPartial {
                        failed: total - subscribed,
                        total,
                    });
                }
                Ok(())
            }
            Err(err) => {
                tracing::error!(device = %self.name, error = %err, "connect failed");
                {
                    let mut st = self.state.lock();
                    st.connected = false;
                    st.connection = ConnectionState::Error;
                }
                self.guard.lock().release();
                self.set_status(STATUS_CONNECT_ERROR);
                Err(err.into())
            }
        }
    }

    /// Disconnect from the device.
    ///
    /// Idempotent: without an open transport this resolves with no side
    /// effects. Transport errors during teardown are logged and swallowed
    /// so the adapter always ends up in a clean `connect-off` state.
    pub async fn disconnect(&self) -> DeviceResult<()> {
        if !self.opened.load(Ordering::SeqCst) {
            return Ok(());
        }

        if let Err(err) = self.transport.unsubscribe_all().await {
            tracing::error!(device = %self.name, error = %err, "unsubscribe failed");
        }
        if let Err(err) = self.transport.disconnect().await {
            tracing::error!(device = %self.name, error = %err, "disconnect failed");
            self.state.lock().connected = false;
        }

        self.opened.store(false, Ordering::SeqCst);
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
        {
            let mut st = self.state.lock();
            st.connected = false;
            st.connection = ConnectionState::Disconnected;
        }
        tracing::info!(device = %self.name, "disconnected");
        self.guard.lock().release();
        self.set_status(STATUS_CONNECT_OFF);
        self.clear_snapshot();
        Ok(())
    }

    /// One polling tick: compose typed values from the raw table, refresh
    /// the externally visible snapshot, emit the value batch and forward
    /// the persistable subset to the DAQ hook.
    ///
    /// The polling cadence is owned by the caller; a tick that overlaps a
    /// working operation is dropped, not deferred.
    ///
    /// # Errors
    /// [`DeviceError::Busy`] when the overload guard denies the tick.
    pub async fn poll(&self) -> DeviceResult<()> {
        match self.guard.lock().acquire() {
            GuardDecision::Granted => {}
            GuardDecision::Busy => {
                tracing::warn!(device = %self.name, "polling overlaps a working operation, dropped");
                return Err(DeviceError::Busy);
            }
            GuardDecision::Overloaded => {
                tracing::warn!(device = %self.name, "overload limit reached, forcing transport reset");
                self.transport.force_close();
                return Err(DeviceError::Busy);
            }
        }

        if self.opened.load(Ordering::SeqCst) {
            let now = now_ms();
            let daq_bound = self.daq.lock().is_some();
            let (batch, samples) = {
                let mut st = self.state.lock();
                let DeviceState {
                    tags,
                    snapshot,
                    last_read_ts,
                    ..
                } = &mut *st;
                let mut samples = Vec::new();
                for (id, tag) in tags.iter_mut() {
                    if let Some(raw) = tag.raw_value.clone() {
                        tag.value = values::compose_value(&raw, &tag.config);
                        if daq_bound && values::should_persist(tag, now) {
                            tag.last_persisted = now;
                            samples.push(DaqSample {
                                id: id.clone(),
                                value: tag.value.clone(),
                                timestamp: tag.timestamp,
                            });
                        }
                    }
                    tag.changed = false;
                    snapshot.insert(
                        id.clone(),
                        TagSnapshot {
                            id: id.clone(),
                            value: tag.value.clone(),
                            changed: tag.changed,
                        },
                    );
                }
                *last_read_ts = Some(now);
                (snapshot.values().cloned().collect::<Vec<_>>(), samples)
            };
            self.emit(DeviceEvent::ValuesChanged {
                device: self.name.clone(),
                values: batch,
            });
            if daq_bound {
                if let Some(sink) = self.daq.lock().as_ref() {
                    sink.add_daq(samples, &self.name);
                }
            }
        }

        self.guard.lock().release();
        Ok(())
    }

    /// Replace the configuration snapshot and rebuild the tag table.
    pub fn load(&self, config: DeviceConfig) {
        let mut st = self.state.lock();
        let count = config.tags.len();
        st.tags = tags::build_table(config.tags.values().cloned());
        st.map = SubscriptionMap::rebuild(&st.tags);
        st.snapshot.clear();
        st.config = config;
        tracing::info!(device = %self.name, tags = count, "configuration loaded");
    }

    /// Current value of one tag, `None` before the first polling tick.
    pub fn get_value(&self, tag_id: &str) -> Option<TagValue> {
        let st = self.state.lock();
        st.snapshot.get(tag_id).map(|snap| TagValue {
            id: tag_id.to_owned(),
            value: snap.value.clone(),
            ts: st.last_read_ts,
        })
    }

    /// The full externally visible value snapshot.
    pub fn get_all_values(&self) -> Vec<TagSnapshot> {
        self.state.lock().snapshot.values().cloned().collect()
    }

    /// Last display status (`connect-off`, `connect-ok`, ...).
    pub fn get_status(&self) -> String {
        self.state.lock().last_status.clone()
    }

    /// Current lifecycle state of the connection.
    pub fn connection_state(&self) -> ConnectionState {
        self.state.lock().connection
    }

    /// Display properties of one tag.
    pub fn get_tag_meta(&self, tag_id: &str) -> Option<TagMeta> {
        self.state.lock().tags.get(tag_id).map(|tag| TagMeta {
            id: tag.config.id.clone(),
            name: tag.config.name.clone(),
            tag_type: tag.config.tag_type,
            format: tag.config.format,
        })
    }

    /// Write a value to the device, best effort.
    ///
    /// Only acts when connected and the tag exists; boolean tags are
    /// actuated as integer `1`/`0`. Write failures are logged, never
    /// returned.
    pub async fn set_value(&self, tag_id: &str, value: &str) {
        let request = {
            let st = self.state.lock();
            if st.connected {
                st.tags.get(tag_id).map(|tag| {
                    (
                        tag.config.address.clone(),
                        values::raw_from_typed(tag.config.tag_type, value),
                    )
                })
            } else {
                None
            }
        };
        let Some((address, raw)) = request else {
            return;
        };
        if let Err(err) = self.transport.write_symbol(&address, &raw).await {
            tracing::error!(device = %self.name, tag = %tag_id, error = %err, "set value failed");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    /// Timestamp of the last polling tick, ms since the unix epoch.
    pub fn last_read_timestamp(&self) -> Option<i64> {
        self.state.lock().last_read_ts
    }

    /// Bind the persistence hook fed with each tick's changed subset.
    pub fn bind_daq(&self, sink: Box<dyn DaqSink>) {
        *self.daq.lock() = Some(sink);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Subscribe every distinct address of the current tag table.
    ///
    /// Requests are independent: one address failing is logged and does
    /// not abort the others. Returns `(subscribed, total)`.
    async fn establish_subscriptions(&self) -> (usize, usize) {
        let addresses: Vec<String> = {
            let mut st = self.state.lock();
            let DeviceState { tags, map, .. } = &mut *st;
            *map = SubscriptionMap::rebuild(tags);
            map.addresses().map(str::to_owned).collect()
        };
        let total = addresses.len();
        let mut subscribed = 0usize;
        for address in &addresses {
            match self.transport.subscribe(address, NOTIFICATION_INTERVAL).await {
                Ok(()) => subscribed += 1,
                Err(err) => {
                    tracing::error!(device = %self.name, address = %address, error = %err, "subscribe failed");
                }
            }
        }
        tracing::info!(device = %self.name, subscribed, total, "subscriptions established");
        (subscribed, total)
    }

    /// Drain transport events into the shared state. Raw-value writes
    /// from notifications become visible to the next polling tick; they
    /// do not trigger emission themselves.
    fn spawn_event_pump(&self, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
        let state = Arc::clone(&self.state);
        let device = self.name.clone();
        let handle = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    TransportEvent::Connected => {
                        let mut st = state.lock();
                        st.connected = true;
                        st.connection = ConnectionState::Connected;
                        tracing::info!(device = %device, "transport connected");
                    }
                    TransportEvent::Disconnected => {
                        let mut st = state.lock();
                        st.connected = false;
                        st.connection = ConnectionState::Disconnected;
                        tracing::warn!(device = %device, "transport disconnected");
                    }
                    TransportEvent::Reconnecting => {
                        let mut st = state.lock();
                        st.connected = true;
                        st.connection = ConnectionState::Reconnecting;
                        tracing::warn!(device = %device, "transport reconnecting");
                    }
                    TransportEvent::Fault(reason) => {
                        tracing::error!(device = %device, error = %reason, "transport fault");
                    }
                    TransportEvent::Notification {
                        address,
                        payload,
                        timestamp,
                    } => {
                        let mut st = state.lock();
                        let DeviceState { tags, map, .. } = &mut *st;
                        tags::apply_notification(tags, map, &address, &payload, timestamp);
                    }
                }
            }
            tracing::debug!(device = %device, "event pump stopped");
        });
        if let Some(previous) = self.pump.lock().replace(handle) {
            previous.abort();
        }
    }

    fn set_status(&self, status: &str) {
        self.state.lock().last_status = status.to_owned();
        self.emit(DeviceEvent::StatusChanged {
            device: self.name.clone(),
            status: status.to_owned(),
        });
    }

    /// Null out every cached value and emit the cleared batch.
    fn clear_snapshot(&self) {
        let values = {
            let mut st = self.state.lock();
            for snap in st.snapshot.values_mut() {
                snap.value = Value::Null;
            }
            st.snapshot.values().cloned().collect::<Vec<_>>()
        };
        self.emit(DeviceEvent::ValuesChanged {
            device: self.name.clone(),
            values,
        });
    }

    fn emit(&self, event: DeviceEvent) {
        // Fire and forget: a closed receiver means the runtime is gone.
        let _ = self.events.send(event);
    }
}

impl<T: AdsTransport> Drop for AdsDevice<T> {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DeviceProperty, TagConfig};
    use crate::transport::{MockAdsTransport, TransportError};

    fn device_config(address: Option<&str>) -> DeviceConfig {
        DeviceConfig {
            id: "d1".into(),
            name: "plc-line-3".into(),
            enabled: true,
            property: DeviceProperty {
                address: address.map(str::to_owned),
                port: None,
                local: None,
                router: None,
            },
            tags: [(
                "T1".to_owned(),
                TagConfig {
                    id: "T1".into(),
                    name: "T1".into(),
                    address: "MAIN.x".into(),
                    mem_address: None,
                    tag_type: TagType::Number,
                    format: None,
                    daq: Default::default(),
                },
            )]
            .into(),
        }
    }

    #[tokio::test]
    async fn connect_without_address_fails_with_connect_failed_status() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let device = AdsDevice::new(device_config(None), MockAdsTransport::new(), tx);

        let err = device.connect().await.unwrap_err();
        assert!(matches!(err, DeviceError::MissingConfig(_)));
        assert_eq!(device.get_status(), STATUS_CONNECT_FAILED);

        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            DeviceEvent::StatusChanged {
                device: "plc-line-3".into(),
                status: STATUS_CONNECT_FAILED.into(),
            }
        );
    }

    #[tokio::test]
    async fn transport_refusal_surfaces_as_connect_error() {
        let mut transport = MockAdsTransport::new();
        transport
            .expect_connect()
            .returning(|_, _| Err(TransportError::Connect("no route".into())));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let device = AdsDevice::new(device_config(Some("1.2.3.4.1.1:851")), transport, tx);

        let err = device.connect().await.unwrap_err();
        assert!(matches!(err, DeviceError::Transport(_)));
        assert_eq!(device.get_status(), STATUS_CONNECT_ERROR);
        assert_eq!(device.connection_state(), ConnectionState::Error);
        assert!(!device.is_connected());

        let mut statuses = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let DeviceEvent::StatusChanged { status, .. } = event {
                statuses.push(status);
            }
        }
        assert_eq!(statuses, vec![STATUS_CONNECT_ERROR.to_owned()]);
    }

    #[tokio::test]
    async fn set_value_is_silent_when_disconnected() {
        let transport = MockAdsTransport::new();
        // No write expectation: the call must return without touching
        // the transport.
        let (tx, _rx) = mpsc::unbounded_channel();
        let device = AdsDevice::new(device_config(Some("1.2.3.4.1.1:851")), transport, tx);
        device.set_value("T1", "5").await;
    }

    #[tokio::test]
    async fn get_value_is_none_before_first_poll() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let device = AdsDevice::new(
            device_config(Some("1.2.3.4.1.1:851")),
            MockAdsTransport::new(),
            tx,
        );
        assert!(device.get_value("T1").is_none());
        assert!(device.last_read_timestamp().is_none());
    }
}
