//! Sensor connection and rep-counting sessions for setsense.
//!
//! This crate connects to a strength-training machine's rep sensor over
//! Bluetooth Low Energy, decodes its counter stream, and turns it into sets
//! and reps for one workout session.
//!
//! # Features
//!
//! - **Discovery**: adapter readiness, permission probing, name/address matching
//! - **Handoff**: pass a live connection from the connect flow to the session
//! - **Stream decoding**: notifications plus polling fallback, as a `Stream`
//! - **Reconciliation**: sensor counts and manual taps merged and clamped per set
//! - **Persistence**: each completed session written exactly once
//!
//! # Architecture
//!
//! ```text
//! DiscoveryService ──connect──▶ HandoffStore ──consume──▶ SessionController
//!                                                           │
//!                         RepStream (samples) ──────────────┤
//!                         SessionEngine (state machine) ◀───┤
//!                         SessionRecorder ──▶ WorkoutHistory┘
//! ```
//!
//! All BLE access goes through the [`Transport`] and [`Link`] traits.
//! [`BtleTransport`] implements them over btleplug; [`mock`] provides
//! scripted versions for tests.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use setsense_core::{
//!     BtleTransport, DiscoveryOptions, DiscoveryService, HandoffStore, MemoryHistory,
//!     SessionController, SharedTransport,
//! };
//! use setsense_types::{SensorTarget, SessionParams};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport: SharedTransport = Arc::new(BtleTransport::new().await?);
//!     let discovery = DiscoveryService::new(transport, DiscoveryOptions::default());
//!
//!     let target = SensorTarget::new("RepSensor");
//!     let sensor = discovery.connect(&target).await?;
//!
//!     let handoffs = HandoffStore::new();
//!     handoffs.publish(discovery.hand_off(sensor, "Chest Press", target));
//!
//!     let params = SessionParams::new(3, 10, "Chest Press");
//!     let mut session = SessionController::new(params, "user-1", Arc::new(MemoryHistory::new()));
//!     println!("Session is {}", session.enter(&handoffs).await);
//!     Ok(())
//! }
//! ```

pub mod ble;
pub mod controller;
pub mod discovery;
pub mod error;
pub mod events;
pub mod handoff;
pub mod mock;
pub mod persist;
pub mod retry;
pub mod session;
pub mod streaming;
pub mod transport;
pub mod util;

// Re-export the shared types crate
pub use setsense_types::{types, uuids};

pub use ble::{BtleLink, BtleTransport, get_adapter};
pub use controller::{SessionCommand, SessionController, SessionOutcome};
pub use discovery::{
    AttemptStatus, ConnectedSensor, ConnectionAttempt, DiscoveryOptions, DiscoveryService,
};
pub use error::{ConnectError, Error, Result, StreamError};
pub use events::{EventDispatcher, EventReceiver, EventSender, RepSource, SessionEvent};
pub use handoff::{HandoffRecord, HandoffStore, SharedHandoffStore};
pub use persist::{MemoryHistory, SessionRecorder, SharedHistory, WorkoutHistory};
pub use retry::{RetryConfig, with_retry};
pub use session::{Progress, SessionEngine, SessionState, SessionStatus};
pub use streaming::{DecoderOptions, DecoderOptionsBuilder, RepStream, SampleResult};
pub use transport::{
    AdapterState, Advertisement, Link, Notification, SharedLink, SharedTransport, Transport,
    TransportEvent,
};
