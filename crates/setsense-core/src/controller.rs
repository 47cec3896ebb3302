//! Session orchestration.
//!
//! A [`SessionController`] ties the pieces of one workout together: it
//! consumes the sensor handoff, attaches the stream decoder, feeds samples
//! and commands into the [`SessionEngine`], drives the rest timer, offers
//! reconnection after a lost link, and hands the finished workout to the
//! persistence boundary.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use setsense_core::{HandoffStore, MemoryHistory, SessionCommand, SessionController};
//! use setsense_types::SessionParams;
//! use tokio::sync::mpsc;
//!
//! # async fn example(handoffs: HandoffStore) -> Result<(), setsense_core::Error> {
//! let params = SessionParams::new(3, 10, "Chest Press");
//! let mut controller = SessionController::new(params, "user-1", Arc::new(MemoryHistory::new()));
//! let mut events = controller.subscribe();
//! controller.enter(&handoffs).await;
//!
//! let (commands, rx) = mpsc::channel(8);
//! let session = tokio::spawn(controller.run(rx));
//! commands.send(SessionCommand::ManualRep).await.ok();
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};

use setsense_types::{SensorTarget, SessionParams, WorkoutRecord};

use crate::discovery::{ConnectedSensor, DiscoveryOptions, DiscoveryService};
use crate::error::{ConnectError, Error, Result};
use crate::events::{EventDispatcher, EventReceiver, RepSource, SessionEvent};
use crate::handoff::HandoffStore;
use crate::persist::{SessionRecorder, SharedHistory};
use crate::retry::RetryConfig;
use crate::session::{Progress, SessionEngine, SessionState, SessionStatus};
use crate::streaming::{DecoderOptions, RepStream, SampleResult};
use crate::transport::SharedLink;

const REST_TICK: Duration = Duration::from_secs(1);

/// User input to a running session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionCommand {
    /// Count one rep by hand.
    ManualRep,
    /// Leave the rest period and start the next set.
    Continue,
    /// Stop without completing.
    EndEarly,
    /// Reconnect after the sensor was lost.
    Retry,
}

/// How a session ended.
#[derive(Debug, Clone)]
pub enum SessionOutcome {
    /// Every set reached its target. The record is returned even if storing
    /// it failed; a `PersistFailed` event reports that case.
    Completed(WorkoutRecord),
    /// The user ended the session. Nothing was stored.
    EndedEarly(SessionState),
}

type PendingConnect = BoxFuture<'static, std::result::Result<ConnectedSensor, ConnectError>>;

/// Runs one workout session.
pub struct SessionController {
    params: SessionParams,
    user_id: String,
    machine_name: String,
    engine: SessionEngine,
    decoder: DecoderOptions,
    discovery_options: DiscoveryOptions,
    recorder: SessionRecorder,
    events: EventDispatcher,
    last_status: SessionStatus,
    target: Option<SensorTarget>,
    discovery: Option<Arc<DiscoveryService>>,
    link: Option<SharedLink>,
    stream: Option<RepStream>,
    rest_ticker: Option<Interval>,
    pending_connect: Option<PendingConnect>,
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("params", &self.params)
            .field("user_id", &self.user_id)
            .field("status", &self.engine.status())
            .field("target", &self.target)
            .field("reconnecting", &self.pending_connect.is_some())
            .finish_non_exhaustive()
    }
}

impl SessionController {
    /// Create a controller. The session clock starts now.
    pub fn new(params: SessionParams, user_id: impl Into<String>, history: SharedHistory) -> Self {
        let engine = SessionEngine::from_params(&params);
        let last_status = engine.status();
        Self {
            machine_name: params.machine_name.clone(),
            params,
            user_id: user_id.into(),
            engine,
            decoder: DecoderOptions::default(),
            discovery_options: DiscoveryOptions::default(),
            recorder: SessionRecorder::new(history),
            events: EventDispatcher::default(),
            last_status,
            target: None,
            discovery: None,
            link: None,
            stream: None,
            rest_ticker: None,
            pending_connect: None,
        }
    }

    /// Use custom decoder options.
    #[must_use]
    pub fn decoder_options(mut self, options: DecoderOptions) -> Self {
        self.decoder = options;
        self
    }

    /// Use custom discovery options for reconnection.
    #[must_use]
    pub fn discovery_options(mut self, options: DiscoveryOptions) -> Self {
        self.discovery_options = options;
        self
    }

    /// Use a custom retry policy for saving the workout.
    #[must_use]
    pub fn persist_retry(mut self, retry: RetryConfig) -> Self {
        self.recorder = self.recorder.with_retry(retry);
        self
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    /// Current status.
    pub fn status(&self) -> SessionStatus {
        self.engine.status()
    }

    /// Current progress.
    pub fn state(&self) -> &SessionState {
        self.engine.state()
    }

    /// Take over the sensor published by the connect flow, if any.
    ///
    /// With a record the session attaches straight away and goes to
    /// `Streaming` (or `Disconnected` if attaching fails). Without one it
    /// stays in `AwaitingSensor`; manual counting still works.
    #[tracing::instrument(level = "info", skip_all, fields(machine = %self.params.machine_name))]
    pub async fn enter(&mut self, handoffs: &HandoffStore) -> SessionStatus {
        let Some(record) = handoffs.consume() else {
            info!("No sensor handed over");
            return self.status();
        };

        if self.machine_name.is_empty() {
            self.machine_name = record.machine_label.clone();
        }
        self.target = self.params.resolve_target(Some(&record.target));
        self.discovery = Some(Arc::new(DiscoveryService::new(
            record.transport,
            self.discovery_options.clone(),
        )));

        self.engine.begin_connecting();
        self.publish_status();
        self.attach(record.link).await;
        self.publish_status();
        self.status()
    }

    /// Process commands and sensor samples until the session completes or is
    /// ended. Closing the command channel ends the session early.
    pub async fn run(mut self, mut commands: mpsc::Receiver<SessionCommand>) -> Result<SessionOutcome> {
        self.publish_status();
        while !self.status().is_terminal() {
            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        debug!("Command channel closed");
                        self.handle_command(SessionCommand::EndEarly).await;
                    }
                },
                sample = next_sample(&mut self.stream) => self.handle_sample(sample).await,
                result = next_connect(&mut self.pending_connect) => self.handle_connected(result).await,
                () = next_tick(&mut self.rest_ticker) => self.rest_tick(),
            }
            self.publish_status();
        }

        self.teardown().await;
        match self.engine.status() {
            SessionStatus::Complete => self
                .recorder
                .record()
                .map(SessionOutcome::Completed)
                .ok_or(Error::SessionIncomplete),
            _ => Ok(SessionOutcome::EndedEarly(self.engine.into_state())),
        }
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        debug!(?command, "Session command");
        match command {
            SessionCommand::ManualRep => {
                let progress = self.engine.manual_increment();
                self.on_progress(progress, RepSource::Manual).await;
            }
            SessionCommand::Continue => {
                if self.engine.continue_to_next_set().is_some() {
                    self.rest_ticker = None;
                    if let Some(link) = self.link.clone() {
                        self.attach(link).await;
                    }
                }
            }
            SessionCommand::EndEarly => {
                if self.engine.end_early() {
                    self.rest_ticker = None;
                }
            }
            SessionCommand::Retry => self.retry(),
        }
    }

    fn retry(&mut self) {
        let status = self.engine.status();
        if status != SessionStatus::Disconnected || self.pending_connect.is_some() {
            debug!("Retry ignored while {}", status);
            return;
        }
        let (Some(discovery), Some(target)) = (self.discovery.clone(), self.target.clone()) else {
            warn!("No sensor to reconnect to");
            return;
        };

        info!(target = %target, "Reconnecting to sensor");
        self.engine.begin_connecting();
        self.pending_connect = Some(Box::pin(async move { discovery.connect(&target).await }));
    }

    async fn handle_connected(&mut self, result: std::result::Result<ConnectedSensor, ConnectError>) {
        match result {
            Ok(sensor) => {
                info!(peripheral = %sensor.advertisement.display_name(), "Sensor reconnected");
                self.attach(sensor.link).await;
            }
            Err(e) => {
                warn!("Reconnect failed: {}", e);
                self.events.send(SessionEvent::ConnectFailed {
                    message: e.user_message().to_string(),
                    retryable: e.is_retryable(),
                });
                self.engine.connection_lost();
            }
        }
    }

    async fn attach(&mut self, link: SharedLink) {
        self.link = Some(SharedLink::clone(&link));
        match RepStream::attach(SharedLink::clone(&link), self.decoder.clone()).await {
            Ok(stream) => {
                self.stream = Some(stream);
                self.engine.sensor_attached();
            }
            Err(e) => {
                warn!("Failed to attach to sensor: {}", e);
                if let Err(e) = link.disconnect().await {
                    debug!("Disconnect after failed attach: {}", e);
                }
                self.engine.connection_lost();
            }
        }
    }

    async fn handle_sample(&mut self, sample: Option<SampleResult>) {
        match sample {
            Some(Ok(sample)) => {
                let progress = self.engine.apply_sample(&sample);
                self.events.send(SessionEvent::Sample { sample });
                self.on_progress(progress, RepSource::Sensor).await;
            }
            Some(Err(e)) => {
                warn!("Sensor stream failed: {}", e);
                self.drop_link().await;
            }
            None => {
                warn!("Sensor stream ended");
                self.drop_link().await;
            }
        }
    }

    async fn drop_link(&mut self) {
        // Unsubscribing a dead link only produces noise; dropping cancels the pump.
        self.stream = None;
        if let Some(link) = &self.link
            && let Err(e) = link.disconnect().await
        {
            debug!("Disconnect after lost stream: {}", e);
        }
        self.engine.connection_lost();
    }

    async fn on_progress(&mut self, progress: Progress, source: RepSource) {
        let target_reps = self.engine.state().target_reps;
        match progress {
            Progress::Ignored => {}
            Progress::Counted { set_index, reps, .. } => {
                self.events.send(SessionEvent::RepsUpdated {
                    set_index,
                    reps,
                    target_reps,
                    source,
                });
            }
            Progress::RestStarted { set_index, .. } => {
                self.set_completed(set_index, source);
                self.stop_streaming().await;
                let mut ticker = interval_at(Instant::now() + REST_TICK, REST_TICK);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                self.rest_ticker = Some(ticker);
            }
            Progress::Completed { .. } => {
                let set_index = self.engine.state().target_sets - 1;
                self.set_completed(set_index, source);
                self.stop_streaming().await;
                self.finish().await;
            }
        }
    }

    fn set_completed(&self, set_index: u32, source: RepSource) {
        let reps = self.engine.state().target_reps;
        self.events.send(SessionEvent::RepsUpdated {
            set_index,
            reps,
            target_reps: reps,
            source,
        });
        self.events.send(SessionEvent::SetCompleted { set_index, reps });
    }

    async fn stop_streaming(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.detach().await;
        }
    }

    fn rest_tick(&self) {
        if let Some(elapsed) = self.engine.rest_elapsed() {
            self.events.send(SessionEvent::RestTick {
                set_index: self.engine.state().current_set_index,
                elapsed_secs: elapsed.as_secs(),
            });
        }
    }

    async fn finish(&mut self) {
        let elapsed = self.engine.elapsed();
        let result = self
            .recorder
            .finalize(self.engine.state(), elapsed, &self.machine_name, &self.user_id)
            .await;
        match result {
            Ok(Some(record)) => self.events.send(SessionEvent::WorkoutSaved { record }),
            Ok(None) => {}
            Err(e) => {
                warn!("Failed to save workout: {}", e);
                self.events.send(SessionEvent::PersistFailed {
                    error: e.to_string(),
                });
            }
        }
    }

    fn publish_status(&mut self) {
        let status = self.engine.status();
        if status != self.last_status {
            info!(from = %self.last_status, to = %status, "Session status changed");
            self.events.send(SessionEvent::StatusChanged {
                from: self.last_status,
                to: status,
            });
            self.last_status = status;
        }
    }

    async fn teardown(&mut self) {
        self.rest_ticker = None;
        self.pending_connect = None;
        self.stop_streaming().await;
        if let Some(link) = self.link.take()
            && let Err(e) = link.disconnect().await
        {
            debug!("Disconnect on teardown: {}", e);
        }
        if let Some(discovery) = self.discovery.take() {
            discovery.teardown().await;
        }
        info!(status = %self.engine.status(), "Session closed");
    }
}

async fn next_sample(stream: &mut Option<RepStream>) -> Option<SampleResult> {
    match stream {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

async fn next_connect(
    pending: &mut Option<PendingConnect>,
) -> std::result::Result<ConnectedSensor, ConnectError> {
    let Some(connect) = pending.as_mut() else {
        return std::future::pending().await;
    };
    let result = connect.await;
    *pending = None;
    result
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
