//! Mock transport implementation for testing.
//!
//! [`MockTransport`] and [`MockLink`] implement the transport traits without
//! any radio, so discovery, streaming and whole sessions can be driven from
//! tests (usually under `tokio::time::pause`).
//!
//! # Features
//!
//! - **Adapter scripting**: set the radio state, grant permission when a probe scan runs
//! - **Advertising**: registered peripherals advertise whenever a scan starts
//! - **Notifications**: push payloads on a characteristic, as a sensor would
//! - **Failure injection**: failing reads, failing connects, simulated disconnects

use std::collections::{HashMap, HashSet};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::stream::{self, Stream};
use tokio::sync::broadcast;
use uuid::Uuid;

use setsense_types::uuid::{DEFAULT_SENSOR_NAME, REP_COUNTER, REP_SERVICE, REP_STATUS};

use crate::error::{Error, Result};
use crate::transport::{
    AdapterState, Advertisement, EventStream, Link, Notification, NotificationStream, SharedLink,
    Transport, TransportEvent,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn broadcast_stream<T: Clone + Send + 'static>(
    rx: broadcast::Receiver<T>,
) -> Pin<Box<dyn Stream<Item = T> + Send>> {
    Box::pin(stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(item) => return Some((item, rx)),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }))
}

/// A scripted adapter.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use setsense_core::mock::{MockLink, MockTransport};
/// use setsense_core::transport::{AdapterState, Transport};
///
/// #[tokio::main]
/// async fn main() {
///     let transport = MockTransport::new(AdapterState::PoweredOn);
///     transport.add_peripheral(Arc::new(MockLink::rep_sensor("RepSensor")));
///     assert_eq!(transport.adapter_state().await.unwrap(), AdapterState::PoweredOn);
/// }
/// ```
pub struct MockTransport {
    state: Mutex<AdapterState>,
    events: broadcast::Sender<TransportEvent>,
    peripherals: Mutex<Vec<Arc<MockLink>>>,
    /// State to switch to when a scan starts while indeterminate.
    grant_on_scan: Mutex<Option<AdapterState>>,
    scanning: AtomicBool,
    fail_connect: AtomicBool,
    start_scan_count: AtomicU32,
    stop_scan_count: AtomicU32,
    connect_count: AtomicU32,
    release_count: AtomicU32,
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("state", &*lock(&self.state))
            .field("scanning", &self.scanning.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl MockTransport {
    /// Create an adapter in the given state with no peripherals.
    pub fn new(state: AdapterState) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            state: Mutex::new(state),
            events,
            peripherals: Mutex::new(Vec::new()),
            grant_on_scan: Mutex::new(None),
            scanning: AtomicBool::new(false),
            fail_connect: AtomicBool::new(false),
            start_scan_count: AtomicU32::new(0),
            stop_scan_count: AtomicU32::new(0),
            connect_count: AtomicU32::new(0),
            release_count: AtomicU32::new(0),
        }
    }

    /// Register a peripheral that advertises whenever a scan starts.
    pub fn add_peripheral(&self, link: Arc<MockLink>) {
        lock(&self.peripherals).push(link);
    }

    /// Change the radio state and emit a state event.
    pub fn set_state(&self, state: AdapterState) {
        *lock(&self.state) = state;
        let _ = self.events.send(TransportEvent::StateChanged(state));
    }

    /// Emulate a permission prompt being answered during the probe scan.
    pub fn grant_on_scan(&self, state: AdapterState) {
        *lock(&self.grant_on_scan) = Some(state);
    }

    /// Emit an arbitrary advertisement.
    pub fn advertise(&self, advertisement: Advertisement) {
        let _ = self.events.send(TransportEvent::Discovered(advertisement));
    }

    /// Make every subsequent connect fail.
    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Whether a scan is currently running.
    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }

    /// Number of `start_scan` calls.
    pub fn start_scan_count(&self) -> u32 {
        self.start_scan_count.load(Ordering::SeqCst)
    }

    /// Number of `stop_scan` calls.
    pub fn stop_scan_count(&self) -> u32 {
        self.stop_scan_count.load(Ordering::SeqCst)
    }

    /// Number of `connect` calls.
    pub fn connect_count(&self) -> u32 {
        self.connect_count.load(Ordering::SeqCst)
    }

    /// Number of `release` calls.
    pub fn release_count(&self) -> u32 {
        self.release_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn adapter_state(&self) -> Result<AdapterState> {
        Ok(*lock(&self.state))
    }

    async fn events(&self) -> Result<EventStream> {
        Ok(broadcast_stream(self.events.subscribe()))
    }

    async fn start_scan(&self) -> Result<()> {
        self.start_scan_count.fetch_add(1, Ordering::SeqCst);
        self.scanning.store(true, Ordering::SeqCst);

        let current = *lock(&self.state);
        if current.is_indeterminate()
            && let Some(granted) = lock(&self.grant_on_scan).take()
        {
            self.set_state(granted);
        }

        if *lock(&self.state) == AdapterState::PoweredOn {
            let adverts: Vec<_> = lock(&self.peripherals)
                .iter()
                .filter(|p| p.advertising())
                .map(|p| p.advertisement())
                .collect();
            for advertisement in adverts {
                self.advertise(advertisement);
            }
        }
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        self.stop_scan_count.fetch_add(1, Ordering::SeqCst);
        self.scanning.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn connect(&self, advertisement: &Advertisement) -> Result<SharedLink> {
        self.connect_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(Error::timeout("connect to peripheral", std::time::Duration::from_secs(15)));
        }
        let link = lock(&self.peripherals)
            .iter()
            .find(|p| p.id() == advertisement.id)
            .cloned()
            .ok_or_else(|| Error::UnknownPeripheral(advertisement.id.clone()))?;
        link.mark_connected();
        Ok(link as SharedLink)
    }

    async fn release(&self) -> Result<()> {
        self.release_count.fetch_add(1, Ordering::SeqCst);
        self.stop_scan().await
    }
}

/// A scripted peripheral.
pub struct MockLink {
    id: String,
    name: String,
    address: Option<String>,
    /// `(service, characteristic)` pairs exposed after discovery.
    characteristics: Vec<(Uuid, Uuid)>,
    values: Mutex<HashMap<Uuid, Vec<u8>>>,
    subscriptions: Mutex<HashSet<Uuid>>,
    notifier: Mutex<Option<broadcast::Sender<Notification>>>,
    connected: AtomicBool,
    advertising: AtomicBool,
    fail_reads: AtomicBool,
    stall_reads: AtomicBool,
    read_count: AtomicU32,
    disconnect_count: AtomicU32,
}

impl std::fmt::Debug for MockLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockLink")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("connected", &self.connected.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl MockLink {
    /// Start building a peripheral.
    pub fn builder(name: &str) -> MockLinkBuilder {
        MockLinkBuilder::new(name)
    }

    /// A sensor exposing the rep service with counter and status characteristics.
    ///
    /// The counter reads `REPS:0` until changed.
    pub fn rep_sensor(name: &str) -> Self {
        Self::builder(name)
            .characteristic(REP_SERVICE, REP_COUNTER)
            .characteristic(REP_SERVICE, REP_STATUS)
            .value(REP_COUNTER, b"REPS:0")
            .value(REP_STATUS, b"OK")
            .build()
    }

    /// The advertisement this peripheral broadcasts.
    pub fn advertisement(&self) -> Advertisement {
        Advertisement {
            id: self.id.clone(),
            address: self.address.clone(),
            name: Some(self.name.clone()),
            local_name: None,
            rssi: Some(-55),
        }
    }

    /// Push a notification, as the sensor would. Dropped unless subscribed.
    pub fn notify(&self, characteristic: Uuid, payload: &[u8]) {
        if !lock(&self.subscriptions).contains(&characteristic) {
            return;
        }
        if let Some(tx) = lock(&self.notifier).as_ref() {
            let _ = tx.send(Notification {
                characteristic,
                value: payload.to_vec(),
            });
        }
    }

    /// Set the value returned by reads.
    pub fn set_value(&self, characteristic: Uuid, payload: &[u8]) {
        lock(&self.values).insert(characteristic, payload.to_vec());
    }

    /// Drop the link: notification streams end and reads fail.
    pub fn simulate_disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        lock(&self.notifier).take();
        lock(&self.subscriptions).clear();
    }

    /// Make reads fail.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make reads hang until the caller gives up, like a GATT read the
    /// peripheral never answers.
    pub fn set_stall_reads(&self, stall: bool) {
        self.stall_reads.store(stall, Ordering::SeqCst);
    }

    /// Stop or resume advertising.
    pub fn set_advertising(&self, advertising: bool) {
        self.advertising.store(advertising, Ordering::SeqCst);
    }

    /// Whether the peripheral currently advertises.
    pub fn advertising(&self) -> bool {
        self.advertising.load(Ordering::SeqCst)
    }

    /// Whether notifications are enabled on `characteristic`.
    pub fn is_subscribed(&self, characteristic: Uuid) -> bool {
        lock(&self.subscriptions).contains(&characteristic)
    }

    /// Number of reads served or failed.
    pub fn read_count(&self) -> u32 {
        self.read_count.load(Ordering::SeqCst)
    }

    /// Number of `disconnect` calls.
    pub fn disconnect_count(&self) -> u32 {
        self.disconnect_count.load(Ordering::SeqCst)
    }

    fn mark_connected(&self) {
        self.connected.store(true, Ordering::SeqCst);
        let mut notifier = lock(&self.notifier);
        if notifier.is_none() {
            let (tx, _) = broadcast::channel(64);
            *notifier = Some(tx);
        }
    }
}

#[async_trait]
impl Link for MockLink {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> Option<&str> {
        Some(&self.name)
    }

    async fn discover_services(&self) -> Result<Vec<Uuid>> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(Error::NotConnected);
        }
        let mut services: Vec<Uuid> = self.characteristics.iter().map(|(s, _)| *s).collect();
        services.dedup();
        Ok(services)
    }

    async fn has_characteristic(&self, service: Uuid, characteristic: Uuid) -> bool {
        self.characteristics.contains(&(service, characteristic))
    }

    async fn read(&self, characteristic: Uuid) -> Result<Vec<u8>> {
        self.read_count.fetch_add(1, Ordering::SeqCst);
        if !self.connected.load(Ordering::SeqCst) {
            return Err(Error::NotConnected);
        }
        if self.stall_reads.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Error::timeout("read characteristic", std::time::Duration::from_secs(10)));
        }
        lock(&self.values)
            .get(&characteristic)
            .cloned()
            .ok_or_else(|| Error::characteristic_not_found(characteristic.to_string(), 1))
    }

    async fn subscribe(&self, characteristic: Uuid) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(Error::NotConnected);
        }
        if !self.characteristics.iter().any(|(_, c)| *c == characteristic) {
            return Err(Error::characteristic_not_found(characteristic.to_string(), 1));
        }
        lock(&self.subscriptions).insert(characteristic);
        Ok(())
    }

    async fn unsubscribe(&self, characteristic: Uuid) -> Result<()> {
        lock(&self.subscriptions).remove(&characteristic);
        Ok(())
    }

    async fn notifications(&self) -> Result<NotificationStream> {
        let rx = lock(&self.notifier)
            .as_ref()
            .map(broadcast::Sender::subscribe)
            .ok_or(Error::NotConnected)?;
        Ok(broadcast_stream(rx))
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnect_count.fetch_add(1, Ordering::SeqCst);
        self.simulate_disconnect();
        Ok(())
    }
}

/// Builder for [`MockLink`].
#[derive(Debug)]
pub struct MockLinkBuilder {
    name: String,
    id: Option<String>,
    address: Option<String>,
    characteristics: Vec<(Uuid, Uuid)>,
    values: HashMap<Uuid, Vec<u8>>,
}

impl MockLinkBuilder {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            id: None,
            address: None,
            characteristics: Vec::new(),
            values: HashMap::new(),
        }
    }

    /// Set the peripheral id (random by default).
    #[must_use]
    pub fn id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    /// Set the hardware address.
    #[must_use]
    pub fn address(mut self, address: &str) -> Self {
        self.address = Some(address.to_string());
        self
    }

    /// Expose a characteristic under a service.
    #[must_use]
    pub fn characteristic(mut self, service: Uuid, characteristic: Uuid) -> Self {
        self.characteristics.push((service, characteristic));
        self
    }

    /// Set the initial read value of a characteristic.
    #[must_use]
    pub fn value(mut self, characteristic: Uuid, payload: &[u8]) -> Self {
        self.values.insert(characteristic, payload.to_vec());
        self
    }

    /// Build the peripheral.
    pub fn build(self) -> MockLink {
        MockLink {
            id: self
                .id
                .unwrap_or_else(|| format!("MOCK-{:06X}", rand::random::<u32>() % 0xFFFFFF)),
            name: self.name,
            address: self.address,
            characteristics: self.characteristics,
            values: Mutex::new(self.values),
            subscriptions: Mutex::new(HashSet::new()),
            notifier: Mutex::new(None),
            connected: AtomicBool::new(false),
            advertising: AtomicBool::new(true),
            fail_reads: AtomicBool::new(false),
            stall_reads: AtomicBool::new(false),
            read_count: AtomicU32::new(0),
            disconnect_count: AtomicU32::new(0),
        }
    }
}

impl Default for MockLink {
    fn default() -> Self {
        Self::rep_sensor(DEFAULT_SENSOR_NAME)
    }
}
