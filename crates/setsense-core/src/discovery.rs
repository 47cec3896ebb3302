//! Sensor discovery: adapter readiness, scanning, connecting.
//!
//! [`DiscoveryService::connect`] runs one attempt end to end:
//!
//! 1. Query the adapter. If its state is indeterminate, run a short probe
//!    scan so the platform can show its permission prompt, then wait briefly
//!    for the state to settle.
//! 2. Fail on `unsupported`/`unauthorized`; wait for power-on otherwise.
//! 3. Scan without a filter and take the first advertisement that matches the
//!    target (address first, then exact name).
//! 4. Connect, discover services and verify the rep service is present. A
//!    peripheral without it is disconnected and reported as
//!    [`ConnectError::UnexpectedDevice`]; scanning does not resume.
//!
//! Attempts are never retried here. Retrying is a user decision made by the
//! caller.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use setsense_types::SensorTarget;
use setsense_types::uuid::REP_SERVICE;

use crate::error::ConnectError;
use crate::handoff::HandoffRecord;
use crate::transport::{
    AdapterState, Advertisement, EventStream, Link, SharedLink, SharedTransport, Transport,
    TransportEvent,
};

/// Timing and identity knobs for discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryOptions {
    /// Service that a matching peripheral must expose.
    pub service: Uuid,
    /// How long to scan before giving up.
    pub scan_window: Duration,
    /// How long to wait for the radio to power on.
    pub power_on_wait: Duration,
    /// Length of the scan used to surface a permission prompt.
    pub permission_probe: Duration,
    /// How long to wait for an indeterminate state to settle after the probe.
    pub state_settle: Duration,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            service: REP_SERVICE,
            scan_window: Duration::from_secs(30),
            power_on_wait: Duration::from_secs(5),
            permission_probe: Duration::from_secs(2),
            state_settle: Duration::from_secs(4),
        }
    }
}

impl DiscoveryOptions {
    /// Create options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the required service.
    #[must_use]
    pub fn service(mut self, service: Uuid) -> Self {
        self.service = service;
        self
    }

    /// Set the scan window.
    #[must_use]
    pub fn scan_window(mut self, window: Duration) -> Self {
        self.scan_window = window;
        self
    }

    /// Set the power-on wait.
    #[must_use]
    pub fn power_on_wait(mut self, wait: Duration) -> Self {
        self.power_on_wait = wait;
        self
    }

    /// Set the permission probe scan length.
    #[must_use]
    pub fn permission_probe(mut self, probe: Duration) -> Self {
        self.permission_probe = probe;
        self
    }

    /// Set the state settle wait.
    #[must_use]
    pub fn state_settle(mut self, settle: Duration) -> Self {
        self.state_settle = settle;
        self
    }
}

/// Lifecycle of one connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    /// Waiting on the adapter, scanning or connecting.
    Pending,
    /// Connected and verified.
    Connected,
    /// Resolved with an error.
    Failed,
}

/// Snapshot of the latest attempt made by a [`DiscoveryService`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionAttempt {
    /// Monotonic attempt number.
    pub generation: u64,
    /// Current status.
    pub status: AttemptStatus,
    /// Id of the connected peripheral.
    pub peripheral: Option<String>,
    /// Display form of the last error.
    pub last_error: Option<String>,
}

/// A verified, connected sensor.
#[derive(Debug, Clone)]
pub struct ConnectedSensor {
    /// The peripheral.
    pub link: SharedLink,
    /// The adapter it was found on.
    pub transport: SharedTransport,
    /// The advertisement that matched.
    pub advertisement: Advertisement,
}

/// Finds and connects to one sensor at a time.
#[derive(Debug)]
pub struct DiscoveryService {
    transport: Mutex<Option<SharedTransport>>,
    options: DiscoveryOptions,
    in_flight: AtomicBool,
    generation: AtomicU64,
    cancel_token: Mutex<CancellationToken>,
    attempt: Mutex<Option<ConnectionAttempt>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Clears the in-flight flag however the attempt ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl DiscoveryService {
    /// Create a service that owns `transport`.
    pub fn new(transport: SharedTransport, options: DiscoveryOptions) -> Self {
        Self {
            transport: Mutex::new(Some(transport)),
            options,
            in_flight: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            cancel_token: Mutex::new(CancellationToken::new()),
            attempt: Mutex::new(None),
        }
    }

    /// Options in use.
    pub fn options(&self) -> &DiscoveryOptions {
        &self.options
    }

    /// The latest attempt, if any.
    pub fn last_attempt(&self) -> Option<ConnectionAttempt> {
        lock(&self.attempt).clone()
    }

    /// Whether an attempt is running.
    pub fn is_connecting(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// The owned transport, unless it was handed off or torn down.
    pub fn transport(&self) -> Option<SharedTransport> {
        lock(&self.transport).clone()
    }

    /// Find, connect and verify the sensor identified by `target`.
    ///
    /// Returns [`ConnectError::InProgress`] without side effects if another
    /// attempt is running on this instance.
    #[tracing::instrument(level = "info", skip_all, fields(target = %target))]
    pub async fn connect(&self, target: &SensorTarget) -> Result<ConnectedSensor, ConnectError> {
        let transport = self
            .transport()
            .ok_or_else(|| ConnectError::adapter_unavailable("released"))?;

        if self.in_flight.swap(true, Ordering::SeqCst) {
            debug!("connect called while an attempt is pending");
            return Err(ConnectError::InProgress);
        }
        let _in_flight = InFlight(&self.in_flight);

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let token = CancellationToken::new();
        *lock(&self.cancel_token) = token.clone();
        *lock(&self.attempt) = Some(ConnectionAttempt {
            generation,
            status: AttemptStatus::Pending,
            peripheral: None,
            last_error: None,
        });

        let result = self.run_attempt(&transport, target, &token).await;

        if token.is_cancelled() {
            // Stale: whatever happened, the caller only learns it was cancelled.
            if let Ok(sensor) = result {
                let _ = sensor.link.disconnect().await;
            }
            info!("Connection attempt {} cancelled", generation);
            return Err(ConnectError::Cancelled);
        }

        let mut attempt = lock(&self.attempt);
        if let Some(attempt) = attempt.as_mut().filter(|a| a.generation == generation) {
            match &result {
                Ok(sensor) => {
                    attempt.status = AttemptStatus::Connected;
                    attempt.peripheral = Some(sensor.link.id().to_string());
                }
                Err(e) => {
                    attempt.status = AttemptStatus::Failed;
                    attempt.last_error = Some(e.to_string());
                }
            }
        }
        result
    }

    async fn run_attempt(
        &self,
        transport: &SharedTransport,
        target: &SensorTarget,
        token: &CancellationToken,
    ) -> Result<ConnectedSensor, ConnectError> {
        let advertisement = tokio::select! {
            biased;
            _ = token.cancelled() => {
                let _ = transport.stop_scan().await;
                return Err(ConnectError::Cancelled);
            }
            found = self.find(transport, target) => found?,
        };

        self.bind(transport, advertisement).await
    }

    async fn find(
        &self,
        transport: &SharedTransport,
        target: &SensorTarget,
    ) -> Result<Advertisement, ConnectError> {
        // Subscribe before querying so no state change is missed.
        let mut events = transport.events().await?;
        self.ensure_powered(transport, &mut events).await?;

        info!("Scanning for {} ({:?} window)", target, self.options.scan_window);
        transport.start_scan().await?;
        let found = timeout(self.options.scan_window, async {
            while let Some(event) = events.next().await {
                if let TransportEvent::Discovered(advertisement) = event {
                    if advertisement.matches(target) {
                        return Some(advertisement);
                    }
                    debug!("Ignoring {}", advertisement.display_name());
                }
            }
            None
        })
        .await;
        transport.stop_scan().await?;

        match found {
            Ok(Some(advertisement)) => {
                info!(id = %advertisement.id, rssi = ?advertisement.rssi, "Found {}", target);
                Ok(advertisement)
            }
            _ => Err(ConnectError::NotFound {
                target: target.to_string(),
                window: self.options.scan_window,
            }),
        }
    }

    async fn ensure_powered(
        &self,
        transport: &SharedTransport,
        events: &mut EventStream,
    ) -> Result<(), ConnectError> {
        let mut state = transport.adapter_state().await?;
        debug!("Adapter state: {}", state);

        if state.is_indeterminate() {
            debug!("Probing adapter for {:?}", self.options.permission_probe);
            transport.start_scan().await?;
            sleep(self.options.permission_probe).await;
            transport.stop_scan().await?;

            state = transport.adapter_state().await?;
            if state.is_indeterminate() {
                state = wait_for_state(events, self.options.state_settle, |s| {
                    !s.is_indeterminate()
                })
                .await
                .unwrap_or(state);
            }
        }

        if let Some(reason) = state.unavailable_reason() {
            warn!("Adapter unavailable: {}", reason);
            return Err(ConnectError::adapter_unavailable(reason));
        }

        if state != AdapterState::PoweredOn {
            info!("Waiting up to {:?} for power-on", self.options.power_on_wait);
            let settled = wait_for_state(events, self.options.power_on_wait, |s| {
                s == AdapterState::PoweredOn || s.unavailable_reason().is_some()
            })
            .await;
            match settled {
                Some(AdapterState::PoweredOn) => {}
                Some(other) => {
                    let reason = other.unavailable_reason().unwrap_or("timeout");
                    return Err(ConnectError::adapter_unavailable(reason));
                }
                None => return Err(ConnectError::adapter_unavailable("timeout")),
            }
        }
        Ok(())
    }

    async fn bind(
        &self,
        transport: &SharedTransport,
        advertisement: Advertisement,
    ) -> Result<ConnectedSensor, ConnectError> {
        let link = transport.connect(&advertisement).await?;

        let services = match link.discover_services().await {
            Ok(services) => services,
            Err(e) => {
                let _ = link.disconnect().await;
                return Err(e.into());
            }
        };

        if !services.contains(&self.options.service) {
            warn!(
                "{} lacks service {}, disconnecting",
                advertisement.display_name(),
                self.options.service
            );
            let _ = link.disconnect().await;
            return Err(ConnectError::UnexpectedDevice {
                name: advertisement.display_name().to_string(),
                missing_service: self.options.service,
            });
        }

        Ok(ConnectedSensor {
            link,
            transport: Arc::clone(transport),
            advertisement,
        })
    }

    /// List every peripheral advertising during `window`, strongest first.
    ///
    /// Runs the same adapter readiness checks as [`connect`](Self::connect)
    /// and shares its in-flight guard. Repeated advertisements from one
    /// peripheral keep the latest values.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn survey(&self, window: Duration) -> Result<Vec<Advertisement>, ConnectError> {
        let transport = self
            .transport()
            .ok_or_else(|| ConnectError::adapter_unavailable("released"))?;
        if self.in_flight.swap(true, Ordering::SeqCst) {
            return Err(ConnectError::InProgress);
        }
        let _in_flight = InFlight(&self.in_flight);

        let mut events = transport.events().await?;
        self.ensure_powered(&transport, &mut events).await?;

        transport.start_scan().await?;
        let mut seen: Vec<Advertisement> = Vec::new();
        let _ = timeout(window, async {
            while let Some(event) = events.next().await {
                if let TransportEvent::Discovered(advertisement) = event {
                    match seen.iter_mut().find(|a| a.id == advertisement.id) {
                        Some(existing) => *existing = advertisement,
                        None => {
                            debug!("Discovered {}", advertisement.display_name());
                            seen.push(advertisement);
                        }
                    }
                }
            }
        })
        .await;
        transport.stop_scan().await?;

        seen.sort_by(|a, b| b.rssi.unwrap_or(i16::MIN).cmp(&a.rssi.unwrap_or(i16::MIN)));
        info!("Survey found {} peripherals", seen.len());
        Ok(seen)
    }

    /// Mark the running attempt stale. It resolves with [`ConnectError::Cancelled`].
    pub fn cancel(&self) {
        lock(&self.cancel_token).cancel();
    }

    /// Move a connected sensor and this service's transport into a handoff record.
    ///
    /// The service no longer owns the transport afterwards, so a later
    /// [`teardown`](Self::teardown) does not release it a second time.
    pub fn hand_off(
        &self,
        sensor: ConnectedSensor,
        machine_label: impl Into<String>,
        target: SensorTarget,
    ) -> HandoffRecord {
        let transport = lock(&self.transport).take().unwrap_or(sensor.transport);
        HandoffRecord::new(sensor.link, transport, machine_label, target)
    }

    /// Cancel any attempt and release the transport, if still owned.
    pub async fn teardown(&self) {
        self.cancel();
        let transport = lock(&self.transport).take();
        if let Some(transport) = transport
            && let Err(e) = transport.release().await
        {
            warn!("Failed to release transport: {}", e);
        }
    }
}

async fn wait_for_state(
    events: &mut EventStream,
    limit: Duration,
    accept: impl Fn(AdapterState) -> bool,
) -> Option<AdapterState> {
    timeout(limit, async {
        while let Some(event) = events.next().await {
            if let TransportEvent::StateChanged(state) = event
                && accept(state)
            {
                return Some(state);
            }
        }
        None
    })
    .await
    .ok()
    .flatten()
}
