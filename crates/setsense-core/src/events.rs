//! Session event system.
//!
//! A [`SessionController`](crate::SessionController) reports everything a UI
//! needs to render through these events: status changes, rep updates, rest
//! ticks, raw samples and the outcome of saving the workout.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use setsense_types::{RepStreamSample, WorkoutRecord};

use crate::session::SessionStatus;

/// Where a rep increment came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepSource {
    /// A sensor counter value.
    Sensor,
    /// A "+1 rep" tap.
    Manual,
}

/// Events emitted during a session.
///
/// All events are serializable for logging and IPC.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum SessionEvent {
    /// The session status changed.
    StatusChanged {
        from: SessionStatus,
        to: SessionStatus,
    },
    /// Reps were added to a set.
    RepsUpdated {
        set_index: u32,
        reps: u32,
        target_reps: u32,
        source: RepSource,
    },
    /// A set reached its target.
    SetCompleted { set_index: u32, reps: u32 },
    /// One second of rest went by.
    RestTick { set_index: u32, elapsed_secs: u64 },
    /// A decoded sample, for diagnostics.
    Sample { sample: RepStreamSample },
    /// Reconnecting failed.
    ConnectFailed { message: String, retryable: bool },
    /// The finished workout was stored.
    WorkoutSaved { record: WorkoutRecord },
    /// The finished workout could not be stored.
    PersistFailed { error: String },
}

/// Sender for session events.
pub type EventSender = broadcast::Sender<SessionEvent>;

/// Receiver for session events.
pub type EventReceiver = broadcast::Receiver<SessionEvent>;

/// Event dispatcher for sending events to multiple receivers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: EventSender,
}

impl EventDispatcher {
    /// Create a new event dispatcher.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Send an event.
    pub fn send(&self, event: SessionEvent) {
        // Ignore error if no receivers
        let _ = self.sender.send(event);
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(100)
    }
}
