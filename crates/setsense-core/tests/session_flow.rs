//! End-to-end session tests against the mock transport.
//!
//! Every test runs with paused time, so scan windows, poll intervals and rest
//! periods elapse instantly and deterministically.

use std::sync::Arc;
use std::time::Duration;

use setsense_core::mock::{MockLink, MockTransport};
use setsense_core::{
    AdapterState, DecoderOptions, DiscoveryOptions, EventReceiver, HandoffRecord, HandoffStore,
    MemoryHistory, SessionCommand, SessionController, SessionEvent, SessionOutcome, SessionState,
    SessionStatus, SharedTransport, Transport,
};
use setsense_types::uuids::{REP_COUNTER, REP_SERVICE, REP_STATUS};
use setsense_types::{SampleSource, SensorTarget, SessionParams};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

const SENSOR: &str = "RepSensor";

/// Route core logs to the test harness. `RUST_LOG=setsense_core=debug` shows them.
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Long poll interval: most tests drive the counter through notifications.
fn notify_only() -> DecoderOptions {
    DecoderOptions::builder()
        .poll_interval(Duration::from_secs(60))
        .build()
}

struct Rig {
    link: Arc<MockLink>,
    transport: Arc<MockTransport>,
    history: Arc<MemoryHistory>,
    events: EventReceiver,
    commands: mpsc::Sender<SessionCommand>,
    entered: SessionStatus,
    session: JoinHandle<setsense_core::Result<SessionOutcome>>,
}

impl Rig {
    async fn start(params: SessionParams, handoff: bool) -> Self {
        Self::start_with(params, MockLink::rep_sensor(SENSOR), handoff).await
    }

    async fn start_with(params: SessionParams, link: MockLink, handoff: bool) -> Self {
        Self::start_decoding(params, link, handoff, notify_only()).await
    }

    async fn start_decoding(
        params: SessionParams,
        link: MockLink,
        handoff: bool,
        decoder: DecoderOptions,
    ) -> Self {
        init_logging();
        let transport = Arc::new(MockTransport::new(AdapterState::PoweredOn));
        let link = Arc::new(link);
        transport.add_peripheral(Arc::clone(&link));

        let handoffs = HandoffStore::new();
        if handoff {
            let shared = transport.connect(&link.advertisement()).await.unwrap();
            handoffs.publish(HandoffRecord::new(
                shared,
                Arc::clone(&transport) as SharedTransport,
                "Chest Press",
                SensorTarget::new(SENSOR),
            ));
        }

        let history = Arc::new(MemoryHistory::new());
        let discovery = DiscoveryOptions::new().scan_window(Duration::from_secs(5));
        let mut controller = SessionController::new(params, "user-1", history.clone())
            .decoder_options(decoder)
            .discovery_options(discovery);
        let events = controller.subscribe();
        let entered = controller.enter(&handoffs).await;
        assert!(!handoffs.is_pending());

        let (commands, rx) = mpsc::channel(16);
        let session = tokio::spawn(controller.run(rx));

        Self {
            link,
            transport,
            history,
            events,
            commands,
            entered,
            session,
        }
    }

    async fn send(&self, command: SessionCommand) {
        self.commands.send(command).await.unwrap();
    }

    fn notify(&self, value: u32) {
        self.link
            .notify(REP_COUNTER, format!("REPS:{value}").as_bytes());
    }

    async fn wait_for(&mut self, predicate: impl Fn(&SessionEvent) -> bool) -> SessionEvent {
        timeout(Duration::from_secs(120), async {
            loop {
                match self.events.recv().await {
                    Ok(event) if predicate(&event) => return event,
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => panic!("session ended before the expected event"),
                }
            }
        })
        .await
        .expect("timed out waiting for session event")
    }

    async fn wait_status(&mut self, status: SessionStatus) {
        self.wait_for(|e| matches!(e, SessionEvent::StatusChanged { to, .. } if *to == status))
            .await;
    }

    async fn outcome(&mut self) -> SessionOutcome {
        timeout(Duration::from_secs(120), &mut self.session)
            .await
            .expect("session did not finish")
            .unwrap()
            .unwrap()
    }

    async fn end_early(&mut self) -> SessionState {
        self.send(SessionCommand::EndEarly).await;
        match self.outcome().await {
            SessionOutcome::EndedEarly(state) => state,
            other => panic!("expected early end, got {other:?}"),
        }
    }

    fn drain(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        loop {
            match self.events.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Lagged(_)) => {}
                Err(_) => return events,
            }
        }
    }
}

#[tokio::test(start_paused = true)]
async fn sensor_counts_complete_single_set() {
    let mut rig = Rig::start(SessionParams::new(1, 3, "Chest Press"), true).await;
    assert_eq!(rig.entered, SessionStatus::Streaming);

    for value in 1..=3 {
        rig.notify(value);
    }

    let record = match rig.outcome().await {
        SessionOutcome::Completed(record) => record,
        other => panic!("expected completion, got {other:?}"),
    };
    assert_eq!(record.sets, 1);
    assert_eq!(record.reps, 3);
    assert_eq!(record.set_reps_completed, vec![3]);
    assert_eq!(record.set_rest_times, vec![0]);
    assert_eq!(record.machine_name, "Chest Press");
    assert_eq!(record.user_id, "user-1");

    assert_eq!(rig.history.append_calls(), 1);
    assert_eq!(rig.history.records(), vec![record.clone()]);

    let events = rig.drain();
    assert!(events.iter().any(|e| matches!(e, SessionEvent::WorkoutSaved { record: saved } if saved.id == record.id)));
    assert!(events.iter().any(|e| matches!(
        e,
        SessionEvent::StatusChanged { to: SessionStatus::Complete, .. }
    )));

    assert!(rig.link.disconnect_count() >= 1);
    assert!(!rig.link.is_subscribed(REP_COUNTER));
    assert_eq!(rig.transport.release_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn manual_reps_rest_and_continue() {
    let mut rig = Rig::start(SessionParams::new(2, 5, "Row"), false).await;
    assert_eq!(rig.entered, SessionStatus::AwaitingSensor);

    for _ in 0..5 {
        rig.send(SessionCommand::ManualRep).await;
    }
    rig.wait_status(SessionStatus::Resting).await;

    // Taps during rest are ignored.
    rig.send(SessionCommand::ManualRep).await;
    sleep(Duration::from_secs(12)).await;
    rig.send(SessionCommand::Continue).await;
    rig.wait_for(|e| {
        matches!(
            e,
            SessionEvent::StatusChanged {
                from: SessionStatus::Resting,
                to: SessionStatus::AwaitingSensor
            }
        )
    })
    .await;

    let state = rig.end_early().await;
    assert_eq!(state.reps_completed_per_set, vec![5, 0]);
    assert_eq!(state.rest_seconds_per_set, vec![12, 0]);
    assert_eq!(state.current_set_index, 1);
    assert_eq!(state.last_sensor_counter, 0);
    assert!(!state.in_rest_period);

    assert!(rig.history.records().is_empty());
    assert_eq!(rig.history.append_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn rest_ticks_are_reported() {
    let mut rig = Rig::start(SessionParams::new(2, 1, "Row"), false).await;
    rig.send(SessionCommand::ManualRep).await;

    let tick = rig
        .wait_for(|e| matches!(e, SessionEvent::RestTick { elapsed_secs, .. } if *elapsed_secs >= 3))
        .await;
    match tick {
        SessionEvent::RestTick { set_index, .. } => assert_eq!(set_index, 0),
        other => panic!("unexpected event {other:?}"),
    }
    rig.end_early().await;
}

#[tokio::test(start_paused = true)]
async fn disconnect_then_retry_resumes_progress() {
    let mut rig = Rig::start(SessionParams::new(2, 10, "Leg Press"), true).await;
    rig.notify(1);
    rig.notify(2);
    rig.wait_for(|e| matches!(e, SessionEvent::RepsUpdated { reps: 2, .. }))
        .await;

    rig.link.simulate_disconnect();
    rig.wait_status(SessionStatus::Disconnected).await;

    rig.send(SessionCommand::Retry).await;
    rig.wait_status(SessionStatus::Connecting).await;
    rig.wait_status(SessionStatus::Streaming).await;
    assert_eq!(rig.transport.connect_count(), 2);
    assert!(rig.link.is_subscribed(REP_COUNTER));

    // The baseline survived the reconnect: 2 -> 3 is one rep.
    rig.notify(3);
    rig.wait_for(|e| matches!(e, SessionEvent::RepsUpdated { reps: 3, .. }))
        .await;

    let state = rig.end_early().await;
    assert_eq!(state.reps_completed_per_set, vec![3, 0]);
    assert_eq!(state.last_sensor_counter, 3);
}

#[tokio::test(start_paused = true)]
async fn failed_retry_reports_and_stays_disconnected() {
    let mut rig = Rig::start(SessionParams::new(1, 10, "Leg Press"), true).await;
    rig.link.set_advertising(false);
    rig.link.simulate_disconnect();
    rig.wait_status(SessionStatus::Disconnected).await;

    rig.send(SessionCommand::Retry).await;
    let failure = rig
        .wait_for(|e| matches!(e, SessionEvent::ConnectFailed { .. }))
        .await;
    match failure {
        SessionEvent::ConnectFailed { message, retryable } => {
            assert!(message.contains("not found"));
            assert!(retryable);
        }
        other => panic!("unexpected event {other:?}"),
    }
    rig.wait_status(SessionStatus::Disconnected).await;

    let state = rig.end_early().await;
    assert_eq!(state.reps_completed_per_set, vec![0]);
    assert!(rig.history.records().is_empty());
}

#[tokio::test(start_paused = true)]
async fn retry_is_ignored_while_streaming() {
    let mut rig = Rig::start(SessionParams::new(1, 10, "Leg Press"), true).await;
    rig.send(SessionCommand::Retry).await;
    rig.send(SessionCommand::ManualRep).await;
    rig.wait_for(|e| matches!(e, SessionEvent::RepsUpdated { reps: 1, .. }))
        .await;
    assert_eq!(rig.transport.connect_count(), 1);
    rig.end_early().await;
}

#[tokio::test(start_paused = true)]
async fn malformed_payload_is_ignored() {
    let mut rig = Rig::start(SessionParams::new(1, 10, "Row"), true).await;
    rig.link.notify(REP_COUNTER, b"xyz");
    let sample = rig
        .wait_for(|e| matches!(e, SessionEvent::Sample { sample } if sample.raw_text == "xyz"))
        .await;
    match sample {
        SessionEvent::Sample { sample } => assert_eq!(sample.parsed_value, None),
        other => panic!("unexpected event {other:?}"),
    }

    rig.notify(4);
    rig.wait_for(|e| matches!(e, SessionEvent::RepsUpdated { reps: 1, .. }))
        .await;

    let state = rig.end_early().await;
    assert_eq!(state.reps_completed_per_set, vec![1]);
    assert_eq!(state.last_sensor_counter, 4);
}

#[tokio::test(start_paused = true)]
async fn stream_is_detached_while_resting() {
    let mut rig = Rig::start(SessionParams::new(2, 2, "Row"), true).await;
    rig.notify(1);
    rig.notify(2);
    rig.wait_status(SessionStatus::Resting).await;
    assert!(!rig.link.is_subscribed(REP_COUNTER));

    rig.send(SessionCommand::Continue).await;
    rig.wait_status(SessionStatus::Streaming).await;
    assert!(rig.link.is_subscribed(REP_COUNTER));

    rig.notify(7);
    rig.wait_for(|e| {
        matches!(e, SessionEvent::RepsUpdated { set_index: 1, reps: 1, .. })
    })
    .await;

    let state = rig.end_early().await;
    assert_eq!(state.reps_completed_per_set, vec![2, 1]);
}

#[tokio::test(start_paused = true)]
async fn handoff_without_counter_is_disconnected() {
    let link = MockLink::builder(SENSOR)
        .characteristic(REP_SERVICE, REP_STATUS)
        .value(REP_STATUS, b"OK")
        .build();
    let mut rig = Rig::start_with(SessionParams::new(1, 5, "Row"), link, true).await;
    assert_eq!(rig.entered, SessionStatus::Disconnected);
    assert_eq!(rig.link.disconnect_count(), 1);

    // Manual counting still works without a sensor.
    for _ in 0..5 {
        rig.send(SessionCommand::ManualRep).await;
    }
    match rig.outcome().await {
        SessionOutcome::Completed(record) => assert_eq!(record.set_reps_completed, vec![5]),
        other => panic!("expected completion, got {other:?}"),
    }
    assert_eq!(rig.history.records().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn closing_commands_ends_session() {
    let mut rig = Rig::start(SessionParams::new(3, 10, "Row"), true).await;
    let (closed, _) = mpsc::channel(1);
    drop(std::mem::replace(&mut rig.commands, closed));

    match rig.outcome().await {
        SessionOutcome::EndedEarly(state) => assert_eq!(state.total_reps(), 0),
        other => panic!("expected early end, got {other:?}"),
    }
    assert_eq!(rig.transport.release_count(), 1);
    assert!(rig.history.records().is_empty());
}

#[tokio::test(start_paused = true)]
async fn polls_and_notifications_count_each_increase_once() {
    let decoder = DecoderOptions::builder()
        .poll_interval(Duration::from_millis(100))
        .build();
    let mut rig = Rig::start_decoding(
        SessionParams::new(1, 10, "Row"),
        MockLink::rep_sensor(SENSOR),
        true,
        decoder,
    )
    .await;

    // Notification first, then polls repeating the same value.
    rig.link.set_value(REP_COUNTER, b"REPS:1");
    rig.notify(1);
    sleep(Duration::from_millis(350)).await;

    // Poll first, then a late notification carrying the same value.
    rig.link.set_value(REP_COUNTER, b"REPS:2");
    sleep(Duration::from_millis(150)).await;
    rig.notify(2);

    // Both channels carry 3, then a stale 2 arrives by notification.
    rig.link.set_value(REP_COUNTER, b"REPS:3");
    rig.notify(3);
    sleep(Duration::from_millis(250)).await;
    rig.notify(2);
    sleep(Duration::from_millis(250)).await;

    let polled = rig
        .drain()
        .into_iter()
        .filter(|e| {
            matches!(e, SessionEvent::Sample { sample } if sample.source == SampleSource::Poll)
        })
        .count();
    assert!(polled >= 5);

    let state = rig.end_early().await;
    assert_eq!(state.reps_completed_per_set, vec![3]);
    assert_eq!(state.last_sensor_counter, 3);
}

#[tokio::test(start_paused = true)]
async fn notification_burst_at_set_end_does_not_stall_session() {
    let decoder = DecoderOptions::builder()
        .buffer_size(1)
        .poll_interval(Duration::from_secs(60))
        .build();
    let mut rig = Rig::start_decoding(
        SessionParams::new(2, 3, "Row"),
        MockLink::rep_sensor(SENSOR),
        true,
        decoder,
    )
    .await;

    for value in 1..=60 {
        rig.notify(value);
    }
    rig.wait_status(SessionStatus::Resting).await;
    assert!(!rig.link.is_subscribed(REP_COUNTER));

    let state = rig.end_early().await;
    assert_eq!(state.reps_completed_per_set, vec![3, 0]);
}
