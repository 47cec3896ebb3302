//! Connection handoff between the tap-to-connect flow and the session flow.
//!
//! The upstream flow connects to a sensor, then publishes the live link and
//! its transport here. The session consumes it on entry instead of scanning
//! again. The store holds at most one record; publishing replaces (and
//! releases) whatever was pending.
//!
//! A store is scoped to one workout flow: create it on entry, drop it on exit.
//! Dropping releases any record that was never consumed.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use time::OffsetDateTime;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use setsense_types::SensorTarget;

use crate::transport::{SharedLink, SharedTransport};

/// A connected sensor passed from one flow to another.
pub struct HandoffRecord {
    /// The connected peripheral.
    pub link: SharedLink,
    /// The adapter that owns the connection. Ownership moves with the record.
    pub transport: SharedTransport,
    /// Display label of the machine, as resolved from the tag.
    pub machine_label: String,
    /// Target that was matched.
    pub target: SensorTarget,
    /// When the record was created.
    pub published_at: OffsetDateTime,
    /// When the record was consumed.
    pub consumed_at: Option<OffsetDateTime>,
}

impl HandoffRecord {
    /// Create a record for a freshly connected sensor.
    pub fn new(
        link: SharedLink,
        transport: SharedTransport,
        machine_label: impl Into<String>,
        target: SensorTarget,
    ) -> Self {
        Self {
            link,
            transport,
            machine_label: machine_label.into(),
            target,
            published_at: OffsetDateTime::now_utc(),
            consumed_at: None,
        }
    }

    /// Disconnect the link and release the transport in the background.
    fn release(self) {
        let Self { link, transport, .. } = self;
        if let Ok(handle) = Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = link.disconnect().await {
                    warn!("Failed to disconnect discarded handoff: {}", e);
                }
                if let Err(e) = transport.release().await {
                    warn!("Failed to release transport of discarded handoff: {}", e);
                }
            });
        } else {
            warn!("No tokio runtime available to release discarded handoff");
        }
    }
}

impl fmt::Debug for HandoffRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandoffRecord")
            .field("link", &self.link.id())
            .field("machine_label", &self.machine_label)
            .field("target", &self.target)
            .field("published_at", &self.published_at)
            .field("consumed_at", &self.consumed_at)
            .finish_non_exhaustive()
    }
}

/// Single-slot, consume-once holder for a [`HandoffRecord`].
///
/// # Example
///
/// ```
/// use setsense_core::HandoffStore;
///
/// let store = HandoffStore::new();
/// assert!(store.consume().is_none());
/// assert!(!store.is_pending());
/// ```
#[derive(Debug, Default)]
pub struct HandoffStore {
    slot: Mutex<Option<HandoffRecord>>,
}

/// Shared handle to a store.
pub type SharedHandoffStore = Arc<HandoffStore>;

impl HandoffStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, Option<HandoffRecord>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish a record, replacing any unconsumed one.
    ///
    /// A replaced record is released unless it carries the same link.
    pub fn publish(&self, record: HandoffRecord) {
        info!(machine = %record.machine_label, target = %record.target, "Publishing sensor handoff");
        let previous = self.slot().replace(record);
        if let Some(previous) = previous {
            let same_link = self
                .slot()
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(&current.link, &previous.link));
            if same_link {
                debug!("Replaced handoff for the same link");
            } else {
                debug!("Releasing unconsumed handoff for {}", previous.target);
                previous.release();
            }
        }
    }

    /// Take the pending record, if any. A second call returns `None`.
    pub fn consume(&self) -> Option<HandoffRecord> {
        let mut record = self.slot().take()?;
        record.consumed_at = Some(OffsetDateTime::now_utc());
        info!(machine = %record.machine_label, "Consumed sensor handoff");
        Some(record)
    }

    /// Discard and release the pending record.
    pub fn clear(&self) {
        if let Some(record) = self.slot().take() {
            debug!("Clearing pending handoff for {}", record.target);
            record.release();
        }
    }

    /// Whether a record is waiting to be consumed.
    pub fn is_pending(&self) -> bool {
        self.slot().is_some()
    }
}

impl Drop for HandoffStore {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockLink, MockTransport};
    use crate::transport::{AdapterState, Transport};

    async fn connected(name: &str) -> (Arc<MockLink>, Arc<MockTransport>, HandoffRecord) {
        let transport = Arc::new(MockTransport::new(AdapterState::PoweredOn));
        let link = Arc::new(MockLink::rep_sensor(name));
        transport.add_peripheral(Arc::clone(&link));
        let shared = transport.connect(&link.advertisement()).await.unwrap();
        let record = HandoffRecord::new(
            shared,
            Arc::clone(&transport) as SharedTransport,
            "Chest Press",
            SensorTarget::new(name),
        );
        (link, transport, record)
    }

    #[tokio::test]
    async fn test_consume_once() {
        let store = HandoffStore::new();
        let (_link, _transport, record) = connected("RepSensor").await;
        store.publish(record);
        assert!(store.is_pending());

        let first = store.consume().unwrap();
        assert_eq!(first.machine_label, "Chest Press");
        assert!(first.consumed_at.is_some());
        assert!(store.consume().is_none());
        assert!(!store.is_pending());
    }

    #[tokio::test]
    async fn test_last_write_wins_and_releases_previous() {
        let store = HandoffStore::new();
        let (first_link, _t1, first) = connected("SensorA").await;
        let (_second_link, _t2, second) = connected("SensorB").await;

        store.publish(first);
        store.publish(second);

        let record = store.consume().unwrap();
        assert_eq!(record.target.name, "SensorB");

        tokio::task::yield_now().await;
        assert_eq!(first_link.disconnect_count(), 1);
    }

    #[tokio::test]
    async fn test_clear_releases() {
        let store = HandoffStore::new();
        let (link, transport, record) = connected("RepSensor").await;
        store.publish(record);
        store.clear();
        assert!(store.consume().is_none());

        tokio::task::yield_now().await;
        assert_eq!(link.disconnect_count(), 1);
        assert_eq!(transport.release_count(), 1);
    }

    #[tokio::test]
    async fn test_consumed_record_is_not_released_on_drop() {
        let (link, _transport, record) = connected("RepSensor").await;
        let consumed = {
            let store = HandoffStore::new();
            store.publish(record);
            store.consume()
        };
        tokio::task::yield_now().await;
        assert!(consumed.is_some());
        assert_eq!(link.disconnect_count(), 0);
    }
}
