//! btleplug implementation of the transport traits.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CentralState, Characteristic, Manager as _, Peripheral as _,
    ScanFilter,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::StreamExt;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::transport::{
    AdapterState, Advertisement, EventStream, Link, Notification, NotificationStream, SharedLink,
    Transport, TransportEvent,
};
use crate::util::{format_peripheral_id, usable_address};

/// Default timeout for BLE connection operations.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default timeout for service discovery.
const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for BLE characteristic read operations.
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Get the first available Bluetooth adapter.
pub async fn get_adapter() -> Result<Adapter> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;

    adapters
        .into_iter()
        .next()
        .ok_or_else(|| Error::Bluetooth(btleplug::Error::NotSupported("no adapter".to_string())))
}

/// [`Transport`] over a btleplug adapter.
#[derive(Debug, Clone)]
pub struct BtleTransport {
    adapter: Adapter,
    peripherals: Arc<RwLock<HashMap<String, PeripheralId>>>,
}

impl BtleTransport {
    /// Open the first available adapter.
    pub async fn new() -> Result<Self> {
        Ok(Self::from_adapter(get_adapter().await?))
    }

    /// Wrap an existing adapter.
    pub fn from_adapter(adapter: Adapter) -> Self {
        Self {
            adapter,
            peripherals: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn advertisement(&self, id: &PeripheralId) -> Option<Advertisement> {
        let peripheral = self.adapter.peripheral(id).await.ok()?;
        let properties = peripheral.properties().await.ok().flatten()?;
        let key = format_peripheral_id(id);
        self.peripherals.write().await.insert(key.clone(), id.clone());
        Some(Advertisement {
            id: key,
            address: usable_address(&properties.address.to_string()),
            name: properties.local_name.clone(),
            local_name: None,
            rssi: properties.rssi,
        })
    }
}

fn map_state(state: CentralState) -> AdapterState {
    match state {
        CentralState::PoweredOn => AdapterState::PoweredOn,
        CentralState::PoweredOff => AdapterState::PoweredOff,
        _ => AdapterState::Unknown,
    }
}

#[async_trait]
impl Transport for BtleTransport {
    async fn adapter_state(&self) -> Result<AdapterState> {
        match self.adapter.adapter_state().await {
            Ok(state) => Ok(map_state(state)),
            Err(btleplug::Error::PermissionDenied) => Ok(AdapterState::Unauthorized),
            Err(btleplug::Error::NotSupported(_)) => Ok(AdapterState::Unsupported),
            Err(e) => Err(e.into()),
        }
    }

    async fn events(&self) -> Result<EventStream> {
        let events = self.adapter.events().await?;
        let this = self.clone();
        let stream = events.filter_map(move |event| {
            let this = this.clone();
            async move {
                match event {
                    CentralEvent::StateUpdate(state) => {
                        Some(TransportEvent::StateChanged(map_state(state)))
                    }
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                        this.advertisement(&id).await.map(TransportEvent::Discovered)
                    }
                    CentralEvent::DeviceDisconnected(id) => Some(TransportEvent::Disconnected {
                        id: format_peripheral_id(&id),
                    }),
                    _ => None,
                }
            }
        });
        Ok(Box::pin(stream))
    }

    async fn start_scan(&self) -> Result<()> {
        self.adapter.start_scan(ScanFilter::default()).await?;
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        if let Err(e) = self.adapter.stop_scan().await {
            debug!("stop_scan: {e}");
        }
        Ok(())
    }

    #[tracing::instrument(level = "info", skip_all, fields(id = %advertisement.id))]
    async fn connect(&self, advertisement: &Advertisement) -> Result<SharedLink> {
        let id = self
            .peripherals
            .read()
            .await
            .get(&advertisement.id)
            .cloned()
            .ok_or_else(|| Error::UnknownPeripheral(advertisement.id.clone()))?;
        let peripheral = self.adapter.peripheral(&id).await?;

        info!("Connecting to peripheral...");
        timeout(DEFAULT_CONNECT_TIMEOUT, peripheral.connect())
            .await
            .map_err(|_| Error::timeout("connect to peripheral", DEFAULT_CONNECT_TIMEOUT))??;
        info!("Connected");

        Ok(Arc::new(BtleLink::new(
            peripheral,
            advertisement.id.clone(),
            advertisement.name.clone(),
        )))
    }
}

/// [`Link`] over a connected btleplug peripheral.
pub struct BtleLink {
    peripheral: Peripheral,
    id: String,
    name: Option<String>,
    /// Characteristics keyed by UUID, filled by service discovery.
    characteristics: RwLock<HashMap<Uuid, Characteristic>>,
    disconnected: AtomicBool,
}

impl std::fmt::Debug for BtleLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BtleLink")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl BtleLink {
    fn new(peripheral: Peripheral, id: String, name: Option<String>) -> Self {
        Self {
            peripheral,
            id,
            name,
            characteristics: RwLock::new(HashMap::new()),
            disconnected: AtomicBool::new(false),
        }
    }

    async fn find_characteristic(&self, uuid: Uuid) -> Result<Characteristic> {
        let cache = self.characteristics.read().await;
        cache.get(&uuid).cloned().ok_or_else(|| {
            Error::characteristic_not_found(uuid.to_string(), self.peripheral.services().len())
        })
    }
}

#[async_trait]
impl Link for BtleLink {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    async fn discover_services(&self) -> Result<Vec<Uuid>> {
        timeout(DEFAULT_DISCOVERY_TIMEOUT, self.peripheral.discover_services())
            .await
            .map_err(|_| Error::timeout("discover services", DEFAULT_DISCOVERY_TIMEOUT))??;

        let services = self.peripheral.services();
        debug!("Found {} services", services.len());

        let mut cache = self.characteristics.write().await;
        cache.clear();
        for service in &services {
            for characteristic in &service.characteristics {
                cache.insert(characteristic.uuid, characteristic.clone());
            }
        }

        Ok(services.iter().map(|s| s.uuid).collect())
    }

    async fn has_characteristic(&self, service: Uuid, characteristic: Uuid) -> bool {
        self.characteristics
            .read()
            .await
            .get(&characteristic)
            .is_some_and(|c| c.service_uuid == service)
    }

    async fn read(&self, characteristic: Uuid) -> Result<Vec<u8>> {
        let characteristic = self.find_characteristic(characteristic).await?;
        let value = timeout(DEFAULT_READ_TIMEOUT, self.peripheral.read(&characteristic))
            .await
            .map_err(|_| Error::timeout("read characteristic", DEFAULT_READ_TIMEOUT))??;
        Ok(value)
    }

    async fn subscribe(&self, characteristic: Uuid) -> Result<()> {
        let characteristic = self.find_characteristic(characteristic).await?;
        self.peripheral.subscribe(&characteristic).await?;
        Ok(())
    }

    async fn unsubscribe(&self, characteristic: Uuid) -> Result<()> {
        let characteristic = self.find_characteristic(characteristic).await?;
        self.peripheral.unsubscribe(&characteristic).await?;
        Ok(())
    }

    async fn notifications(&self) -> Result<NotificationStream> {
        let stream = self.peripheral.notifications().await?;
        Ok(Box::pin(stream.map(|n| Notification {
            characteristic: n.uuid,
            value: n.value,
        })))
    }

    async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    async fn disconnect(&self) -> Result<()> {
        if self.disconnected.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!(id = %self.id, "Disconnecting from peripheral");
        if let Err(e) = self.peripheral.disconnect().await {
            warn!("disconnect failed: {e}");
            return Err(e.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_state() {
        assert_eq!(map_state(CentralState::PoweredOn), AdapterState::PoweredOn);
        assert_eq!(map_state(CentralState::PoweredOff), AdapterState::PoweredOff);
        assert_eq!(map_state(CentralState::Unknown), AdapterState::Unknown);
    }

    #[tokio::test]
    #[ignore = "requires BLE hardware"]
    async fn test_adapter_state_on_hardware() {
        let transport = BtleTransport::new().await.unwrap();
        let state = transport.adapter_state().await.unwrap();
        assert_ne!(state, AdapterState::Unsupported);
    }
}
