//! Peripheral transport capability surface.
//!
//! The session pipeline only ever talks to a radio through the two traits in
//! this module. [`Transport`] covers the adapter (power state, scanning,
//! connecting) and [`Link`] covers one connected peripheral (service
//! discovery, reads, notifications).
//!
//! Two implementations ship with the crate: [`crate::ble::BtleTransport`]
//! backed by btleplug, and [`crate::mock::MockTransport`] for tests.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use setsense_types::SensorTarget;

use crate::error::Result;

/// Radio readiness as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterState {
    /// The platform has not reported a state yet.
    Unknown,
    /// The radio is restarting.
    Resetting,
    /// The host has no usable radio.
    Unsupported,
    /// The user or OS denied access to the radio.
    Unauthorized,
    /// The radio is switched off.
    PoweredOff,
    /// Ready to scan and connect.
    PoweredOn,
}

impl AdapterState {
    /// States where the platform may still be waiting on a permission prompt.
    pub fn is_indeterminate(self) -> bool {
        matches!(self, Self::Unknown | Self::Resetting)
    }

    /// Reason string for states that can never become usable without user action.
    pub fn unavailable_reason(self) -> Option<&'static str> {
        match self {
            Self::Unsupported => Some("unsupported"),
            Self::Unauthorized => Some("unauthorized"),
            _ => None,
        }
    }
}

impl fmt::Display for AdapterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::Resetting => "resetting",
            Self::Unsupported => "unsupported",
            Self::Unauthorized => "unauthorized",
            Self::PoweredOff => "powered off",
            Self::PoweredOn => "powered on",
        };
        f.write_str(s)
    }
}

/// A peripheral seen while scanning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advertisement {
    /// Transport-specific peripheral id, used to connect.
    pub id: String,
    /// Hardware address, when the platform exposes one.
    pub address: Option<String>,
    /// Primary advertised name.
    pub name: Option<String>,
    /// Alternate (local) name field.
    pub local_name: Option<String>,
    /// Signal strength in dBm.
    pub rssi: Option<i16>,
}

impl Advertisement {
    /// Whether this advertisement identifies `target`.
    ///
    /// Platforms that hide hardware addresses (macOS) expose the peripheral
    /// id instead, so an address target is also compared against the id.
    pub fn matches(&self, target: &SensorTarget) -> bool {
        let address = self.address.as_deref().or(Some(self.id.as_str()));
        target.matches(address, self.name.as_deref(), self.local_name.as_deref())
            || (target.hardware_address.is_some()
                && target.matches(Some(&self.id), None, None))
    }

    /// Best display name for listings.
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.local_name.as_deref())
            .unwrap_or("(unnamed)")
    }
}

/// Adapter-level events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The radio changed state.
    StateChanged(AdapterState),
    /// A peripheral advertised (first sighting or an update).
    Discovered(Advertisement),
    /// A connected peripheral went away.
    Disconnected {
        /// Peripheral id.
        id: String,
    },
}

/// A value pushed by a subscribed characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Characteristic that produced the value.
    pub characteristic: Uuid,
    /// Raw payload.
    pub value: Vec<u8>,
}

/// Stream of adapter events.
pub type EventStream = Pin<Box<dyn Stream<Item = TransportEvent> + Send>>;

/// Stream of characteristic notifications for one peripheral.
pub type NotificationStream = Pin<Box<dyn Stream<Item = Notification> + Send>>;

/// Shared handle to a connected peripheral.
pub type SharedLink = Arc<dyn Link>;

/// Shared handle to an adapter.
pub type SharedTransport = Arc<dyn Transport>;

/// Adapter capabilities needed for discovery.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Current radio state.
    async fn adapter_state(&self) -> Result<AdapterState>;

    /// Subscribe to adapter events. Events emitted before the call are not replayed.
    async fn events(&self) -> Result<EventStream>;

    /// Start an unfiltered active scan.
    async fn start_scan(&self) -> Result<()>;

    /// Stop scanning. Stopping an idle adapter is not an error.
    async fn stop_scan(&self) -> Result<()>;

    /// Connect to an advertised peripheral.
    async fn connect(&self, advertisement: &Advertisement) -> Result<SharedLink>;

    /// Release adapter resources held on behalf of the caller.
    async fn release(&self) -> Result<()> {
        self.stop_scan().await
    }
}

/// Capabilities of one connected peripheral.
#[async_trait]
pub trait Link: Send + Sync + fmt::Debug {
    /// Transport-specific peripheral id.
    fn id(&self) -> &str;

    /// Advertised name, if known.
    fn name(&self) -> Option<&str>;

    /// Discover services and characteristics, returning the service UUIDs.
    async fn discover_services(&self) -> Result<Vec<Uuid>>;

    /// Whether `characteristic` exists under `service` after discovery.
    async fn has_characteristic(&self, service: Uuid, characteristic: Uuid) -> bool;

    /// One-shot read.
    async fn read(&self, characteristic: Uuid) -> Result<Vec<u8>>;

    /// Enable notifications.
    async fn subscribe(&self, characteristic: Uuid) -> Result<()>;

    /// Disable notifications.
    async fn unsubscribe(&self, characteristic: Uuid) -> Result<()>;

    /// Stream of notifications from every subscribed characteristic.
    ///
    /// The stream ends when the peripheral disconnects.
    async fn notifications(&self) -> Result<NotificationStream>;

    /// Query the link state.
    async fn is_connected(&self) -> bool;

    /// Disconnect. Disconnecting twice is not an error.
    async fn disconnect(&self) -> Result<()>;
}
