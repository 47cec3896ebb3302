//! Rep/set reconciliation.
//!
//! [`SessionEngine`] owns the [`SessionState`] of one workout and is the only
//! thing that mutates it. Sensor counter values and manual taps both go
//! through the same clamp, so the order in which they arrive never changes
//! the outcome beyond the per-set target.
//!
//! # Counting rule
//!
//! For a sensor value `v` and the last value seen in this set `last`:
//!
//! | Condition | Effect |
//! |-----------|--------|
//! | resting, complete, or set already at target | ignored |
//! | `last == 0` and `v > 0` | +1 rep, `last = v` |
//! | `v > last` | +`min(v - last, remaining)` reps, `last = v` |
//! | otherwise | ignored |
//!
//! The first rule covers sensors that count from an arbitrary baseline: the
//! first value seen after a baseline reset is one rep, increments are counted
//! from then on.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info};

use setsense_types::{RepStreamSample, SessionParams};

/// Progress of one workout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    /// Number of sets, fixed at start.
    pub target_sets: u32,
    /// Reps per set, fixed at start.
    pub target_reps: u32,
    /// Zero-based set in progress; equals `target_sets` once complete.
    pub current_set_index: u32,
    /// Reps done in each set, each within `[0, target_reps]`.
    pub reps_completed_per_set: Vec<u32>,
    /// Rest taken after each set, in seconds.
    pub rest_seconds_per_set: Vec<u64>,
    /// Last sensor counter value seen since the baseline was reset.
    pub last_sensor_counter: u32,
    /// Whether the session is between sets.
    pub in_rest_period: bool,
}

impl SessionState {
    /// Fresh state, with targets clamped into the allowed ranges.
    pub fn new(target_sets: u32, target_reps: u32) -> Self {
        let params = SessionParams::new(target_sets, target_reps, "");
        let sets = params.target_sets as usize;
        Self {
            target_sets: params.target_sets,
            target_reps: params.target_reps,
            current_set_index: 0,
            reps_completed_per_set: vec![0; sets],
            rest_seconds_per_set: vec![0; sets],
            last_sensor_counter: 0,
            in_rest_period: false,
        }
    }

    /// Reps done in the current set (0 once complete).
    pub fn current_reps(&self) -> u32 {
        self.reps_completed_per_set
            .get(self.current_set_index as usize)
            .copied()
            .unwrap_or(0)
    }

    /// Whether every set reached its target.
    pub fn is_complete(&self) -> bool {
        self.reps_completed_per_set
            .iter()
            .all(|&reps| reps == self.target_reps)
    }

    /// Whether an increment would be applied right now.
    pub fn accepts_reps(&self) -> bool {
        !self.in_rest_period
            && self.current_set_index < self.target_sets
            && self.current_reps() < self.target_reps
    }

    /// Total reps across all sets.
    pub fn total_reps(&self) -> u32 {
        self.reps_completed_per_set.iter().sum()
    }
}

/// Externally visible status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// No sensor was handed over; the user has to connect one first.
    AwaitingSensor,
    /// Discovering or attaching to the sensor.
    Connecting,
    /// Counting reps.
    Streaming,
    /// Between sets.
    Resting,
    /// All sets done.
    Complete,
    /// The sensor was lost; a retry is available.
    Disconnected,
    /// The user ended the session before completing it.
    EndedEarly,
}

impl SessionStatus {
    /// Whether no further transitions can happen.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::EndedEarly)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::AwaitingSensor => "awaiting sensor",
            Self::Connecting => "connecting",
            Self::Streaming => "streaming",
            Self::Resting => "resting",
            Self::Complete => "complete",
            Self::Disconnected => "disconnected",
            Self::EndedEarly => "ended early",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkPhase {
    Absent,
    Connecting,
    Attached,
    Lost,
}

/// Effect of one input on the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Nothing changed.
    Ignored,
    /// Reps were added; the set continues.
    Counted {
        /// Set that was incremented.
        set_index: u32,
        /// Reps added by this input.
        added: u32,
        /// Reps in the set afterwards.
        reps: u32,
    },
    /// The set reached its target and a rest period began.
    RestStarted {
        /// Set that was finished.
        set_index: u32,
        /// Reps added by this input.
        added: u32,
    },
    /// The final set reached its target.
    Completed {
        /// Reps added by this input.
        added: u32,
    },
}

impl Progress {
    /// Reps added by the input.
    pub fn added(self) -> u32 {
        match self {
            Self::Ignored => 0,
            Self::Counted { added, .. }
            | Self::RestStarted { added, .. }
            | Self::Completed { added } => added,
        }
    }
}

/// The session state machine.
#[derive(Debug)]
pub struct SessionEngine {
    state: SessionState,
    link: LinkPhase,
    ended_early: bool,
    started_at: Instant,
    rest_started_at: Option<Instant>,
}

impl SessionEngine {
    /// Start a session; the clock starts now.
    pub fn new(target_sets: u32, target_reps: u32) -> Self {
        Self {
            state: SessionState::new(target_sets, target_reps),
            link: LinkPhase::Absent,
            ended_early: false,
            started_at: Instant::now(),
            rest_started_at: None,
        }
    }

    /// Start a session from navigation parameters.
    pub fn from_params(params: &SessionParams) -> Self {
        Self::new(params.target_sets, params.target_reps)
    }

    /// Current progress.
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Consume the engine, keeping its progress.
    pub fn into_state(self) -> SessionState {
        self.state
    }

    /// Derived status.
    pub fn status(&self) -> SessionStatus {
        if self.ended_early {
            return SessionStatus::EndedEarly;
        }
        if self.state.is_complete() {
            return SessionStatus::Complete;
        }
        if self.state.in_rest_period {
            return SessionStatus::Resting;
        }
        match self.link {
            LinkPhase::Absent => SessionStatus::AwaitingSensor,
            LinkPhase::Connecting => SessionStatus::Connecting,
            LinkPhase::Attached => SessionStatus::Streaming,
            LinkPhase::Lost => SessionStatus::Disconnected,
        }
    }

    fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    /// Record that a connection attempt started.
    ///
    /// Only valid with no sensor or a lost one; returns whether it was applied.
    pub fn begin_connecting(&mut self) -> bool {
        if self.is_terminal() || !matches!(self.link, LinkPhase::Absent | LinkPhase::Lost) {
            return false;
        }
        self.link = LinkPhase::Connecting;
        true
    }

    /// Record that the decoder is attached. Progress and baseline are kept.
    pub fn sensor_attached(&mut self) {
        if !self.is_terminal() {
            self.link = LinkPhase::Attached;
        }
    }

    /// Record a lost or failed connection. Returns whether it was applied.
    pub fn connection_lost(&mut self) -> bool {
        if self.is_terminal() || !matches!(self.link, LinkPhase::Attached | LinkPhase::Connecting) {
            return false;
        }
        info!("Sensor connection lost");
        self.link = LinkPhase::Lost;
        true
    }

    /// Apply a sensor counter value.
    pub fn apply_sensor_value(&mut self, value: u32) -> Progress {
        if self.ended_early || !self.state.accepts_reps() {
            return Progress::Ignored;
        }

        let last = self.state.last_sensor_counter;
        let remaining = self.state.target_reps - self.state.current_reps();
        // A zero baseline means the counter's starting point is unknown, so the
        // first nonzero value is worth one rep however far it jumps. If the
        // set's first notification was lost, the reps it carried are not
        // recovered; later increases count in full.
        let added = if last == 0 {
            u32::from(value > 0)
        } else if value > last {
            (value - last).min(remaining)
        } else {
            0
        };

        if added == 0 {
            return Progress::Ignored;
        }
        debug!(value, last, added, "Sensor counter advanced");
        self.state.last_sensor_counter = value;
        self.add_reps(added)
    }

    /// Apply a decoded sample. Only primary samples with a value count.
    pub fn apply_sample(&mut self, sample: &RepStreamSample) -> Progress {
        match sample.counter_value() {
            Some(value) => self.apply_sensor_value(value),
            None => Progress::Ignored,
        }
    }

    /// A "+1 rep" tap.
    pub fn manual_increment(&mut self) -> Progress {
        if self.ended_early || !self.state.accepts_reps() {
            return Progress::Ignored;
        }
        self.add_reps(1)
    }

    fn add_reps(&mut self, added: u32) -> Progress {
        let set_index = self.state.current_set_index;
        let idx = set_index as usize;
        let target = self.state.target_reps;
        let reps = (self.state.reps_completed_per_set[idx] + added).min(target);
        self.state.reps_completed_per_set[idx] = reps;

        if reps < target {
            return Progress::Counted {
                set_index,
                added,
                reps,
            };
        }

        self.state.last_sensor_counter = 0;
        if set_index + 1 < self.state.target_sets {
            info!("Set {} complete, resting", set_index + 1);
            self.state.in_rest_period = true;
            self.rest_started_at = Some(Instant::now());
            Progress::RestStarted { set_index, added }
        } else {
            info!("Final set complete");
            self.state.current_set_index = self.state.target_sets;
            Progress::Completed { added }
        }
    }

    /// Time since the current rest period began.
    pub fn rest_elapsed(&self) -> Option<Duration> {
        self.rest_started_at.map(|started| started.elapsed())
    }

    /// Leave the rest period and start the next set.
    ///
    /// Returns the recorded rest in whole seconds, or `None` when not resting.
    pub fn continue_to_next_set(&mut self) -> Option<u64> {
        if !self.state.in_rest_period || self.ended_early {
            return None;
        }
        let rest = self.rest_elapsed().unwrap_or_default().as_secs();
        let idx = self.state.current_set_index as usize;
        self.state.rest_seconds_per_set[idx] = rest;
        self.state.in_rest_period = false;
        self.state.current_set_index += 1;
        self.state.last_sensor_counter = 0;
        self.rest_started_at = None;
        info!("Starting set {} after {}s rest", self.state.current_set_index + 1, rest);
        Some(rest)
    }

    /// End the session without completing it. Returns whether it was applied.
    pub fn end_early(&mut self) -> bool {
        if self.is_terminal() {
            return false;
        }
        info!("Session ended early");
        self.ended_early = true;
        self.rest_started_at = None;
        true
    }

    /// Wall-clock time since the session started.
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use setsense_types::{Channel, SampleSource};

    fn streaming(sets: u32, reps: u32) -> SessionEngine {
        let mut engine = SessionEngine::new(sets, reps);
        engine.begin_connecting();
        engine.sensor_attached();
        engine
    }

    #[test]
    fn test_new_state_clamps_targets() {
        let state = SessionState::new(0, 80);
        assert_eq!(state.target_sets, 1);
        assert_eq!(state.target_reps, 50);
        assert_eq!(state.reps_completed_per_set, vec![0]);
        assert_eq!(state.rest_seconds_per_set, vec![0]);
    }

    #[test]
    fn test_status_transitions() {
        let mut engine = SessionEngine::new(2, 5);
        assert_eq!(engine.status(), SessionStatus::AwaitingSensor);
        assert!(engine.begin_connecting());
        assert_eq!(engine.status(), SessionStatus::Connecting);
        engine.sensor_attached();
        assert_eq!(engine.status(), SessionStatus::Streaming);
        assert!(!engine.begin_connecting());
        assert!(engine.connection_lost());
        assert_eq!(engine.status(), SessionStatus::Disconnected);
        assert!(engine.begin_connecting());
        assert_eq!(engine.status(), SessionStatus::Connecting);
    }

    #[test]
    fn test_counter_sequence_caps_at_target() {
        let mut engine = streaming(2, 10);
        for v in 0..=12 {
            engine.apply_sensor_value(v);
        }
        assert_eq!(engine.state().reps_completed_per_set[0], 10);
        assert_eq!(engine.status(), SessionStatus::Resting);
    }

    #[test]
    fn test_first_value_after_reset_counts_one() {
        let mut engine = streaming(1, 10);
        assert_eq!(
            engine.apply_sensor_value(7),
            Progress::Counted { set_index: 0, added: 1, reps: 1 }
        );
        assert_eq!(engine.state().last_sensor_counter, 7);
        assert_eq!(engine.apply_sensor_value(9).added(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_first_notification_of_set_undercounts() {
        let mut engine = streaming(2, 5);
        for v in 1..=5 {
            engine.apply_sensor_value(v);
        }
        assert_eq!(engine.continue_to_next_set(), Some(0));

        // The sensor restarted at 1 for the new set but that notification
        // never arrived; the first value seen is 3.
        assert_eq!(engine.apply_sensor_value(3).added(), 1);
        assert_eq!(engine.apply_sensor_value(4).added(), 1);
        assert_eq!(engine.state().reps_completed_per_set, vec![5, 2]);
        assert_eq!(engine.state().last_sensor_counter, 4);
    }

    #[test]
    fn test_duplicate_and_stale_values_ignored() {
        let mut engine = streaming(1, 10);
        engine.apply_sensor_value(1);
        engine.apply_sensor_value(3);
        assert_eq!(engine.apply_sensor_value(3), Progress::Ignored);
        assert_eq!(engine.apply_sensor_value(2), Progress::Ignored);
        assert_eq!(engine.state().current_reps(), 3);
        assert_eq!(engine.state().last_sensor_counter, 3);
    }

    #[test]
    fn test_zero_value_is_ignored() {
        let mut engine = streaming(1, 10);
        assert_eq!(engine.apply_sensor_value(0), Progress::Ignored);
        assert_eq!(engine.state().current_reps(), 0);
    }

    #[test]
    fn test_bulk_delta_is_clamped() {
        let mut engine = streaming(2, 5);
        engine.apply_sensor_value(1);
        assert_eq!(
            engine.apply_sensor_value(40),
            Progress::RestStarted { set_index: 0, added: 4 }
        );
        assert_eq!(engine.state().reps_completed_per_set, vec![5, 0]);
        assert_eq!(engine.state().last_sensor_counter, 0);
    }

    #[test]
    fn test_no_counting_while_resting() {
        let mut engine = streaming(2, 2);
        engine.manual_increment();
        engine.manual_increment();
        assert!(engine.state().in_rest_period);
        assert_eq!(engine.manual_increment(), Progress::Ignored);
        assert_eq!(engine.apply_sensor_value(5), Progress::Ignored);
        assert_eq!(engine.state().reps_completed_per_set, vec![2, 0]);
    }

    #[test]
    fn test_last_set_completes_without_rest() {
        let mut engine = streaming(1, 3);
        for v in 1..=3 {
            engine.apply_sensor_value(v);
        }
        assert_eq!(engine.status(), SessionStatus::Complete);
        let state = engine.state();
        assert_eq!(state.reps_completed_per_set, vec![3]);
        assert_eq!(state.rest_seconds_per_set, vec![0]);
        assert_eq!(state.current_set_index, 1);
        assert!(!state.in_rest_period);
    }

    #[tokio::test(start_paused = true)]
    async fn test_continue_records_rest() {
        let mut engine = SessionEngine::new(2, 5);
        for _ in 0..5 {
            engine.manual_increment();
        }
        assert_eq!(engine.status(), SessionStatus::Resting);

        tokio::time::advance(Duration::from_secs(12)).await;
        assert_eq!(engine.continue_to_next_set(), Some(12));

        let state = engine.state();
        assert_eq!(state.rest_seconds_per_set[0], 12);
        assert_eq!(state.current_set_index, 1);
        assert_eq!(state.last_sensor_counter, 0);
        assert!(!state.in_rest_period);
        assert_eq!(engine.continue_to_next_set(), None);
    }

    #[test]
    fn test_reconnect_keeps_progress() {
        let mut engine = streaming(2, 10);
        engine.apply_sensor_value(1);
        engine.apply_sensor_value(4);
        engine.connection_lost();
        engine.begin_connecting();
        engine.sensor_attached();
        assert_eq!(engine.state().current_reps(), 4);
        assert_eq!(engine.state().last_sensor_counter, 4);
        assert_eq!(engine.apply_sensor_value(5).added(), 1);
    }

    #[test]
    fn test_end_early() {
        let mut engine = streaming(3, 10);
        engine.manual_increment();
        assert!(engine.end_early());
        assert_eq!(engine.status(), SessionStatus::EndedEarly);
        assert_eq!(engine.manual_increment(), Progress::Ignored);
        assert!(!engine.end_early());
        assert!(!engine.begin_connecting());
    }

    #[test]
    fn test_end_early_rejected_after_complete() {
        let mut engine = streaming(1, 1);
        engine.manual_increment();
        assert_eq!(engine.status(), SessionStatus::Complete);
        assert!(!engine.end_early());
        assert!(!engine.connection_lost());
    }

    #[test]
    fn test_malformed_and_secondary_samples_ignored() {
        let mut engine = streaming(1, 5);
        let malformed = RepStreamSample::from_text("xyz", Channel::Primary, SampleSource::Notification, 0);
        let status = RepStreamSample::from_text("REPS:4", Channel::Secondary, SampleSource::Notification, 0);
        assert_eq!(engine.apply_sample(&malformed), Progress::Ignored);
        assert_eq!(engine.apply_sample(&status), Progress::Ignored);
        assert_eq!(engine.state(), &SessionState::new(1, 5));
    }

    #[derive(Debug, Clone)]
    enum Input {
        Sensor(u32),
        Manual,
    }

    fn input() -> impl Strategy<Value = Input> {
        prop_oneof![(0u32..60).prop_map(Input::Sensor), Just(Input::Manual)]
    }

    proptest! {
        #[test]
        fn prop_non_decreasing_counter_never_exceeds_target(
            reps in 1u32..=50,
            mut values in proptest::collection::vec(0u32..200, 0..80),
        ) {
            values.sort_unstable();
            let mut engine = streaming(2, reps);
            for v in values {
                let resting_before = engine.state().in_rest_period;
                let progress = engine.apply_sensor_value(v);
                if resting_before {
                    prop_assert_eq!(progress, Progress::Ignored);
                }
                prop_assert!(engine.state().reps_completed_per_set[0] <= reps);
            }
            prop_assert_eq!(engine.state().reps_completed_per_set[1], 0);
        }

        #[test]
        fn prop_mixed_inputs_clamp_to_target(
            reps in 1u32..=20,
            inputs in proptest::collection::vec(input(), 0..100),
        ) {
            let mut engine = streaming(1, reps);
            let mut total_added = 0;
            for input in inputs {
                let progress = match input {
                    Input::Sensor(v) => engine.apply_sensor_value(v),
                    Input::Manual => engine.manual_increment(),
                };
                total_added += progress.added();
            }
            prop_assert_eq!(total_added, engine.state().reps_completed_per_set[0]);
            prop_assert!(engine.state().reps_completed_per_set[0] <= reps);
        }

        #[test]
        fn prop_enough_taps_always_complete(sets in 1u32..=5, reps in 1u32..=10) {
            let mut engine = streaming(sets, reps);
            for set in 0..sets {
                for _ in 0..reps + 2 {
                    engine.manual_increment();
                }
                if set + 1 < sets {
                    prop_assert_eq!(engine.status(), SessionStatus::Resting);
                    prop_assert!(engine.continue_to_next_set().is_some());
                }
            }
            prop_assert_eq!(engine.status(), SessionStatus::Complete);
            prop_assert!(engine.state().is_complete());
        }
    }
}
