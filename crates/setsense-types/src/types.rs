//! Core types for setsense sensors and workouts.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::parse::{decode_payload, parse_rep_count};

/// Identifies which peripheral to look for.
///
/// When a hardware address is set, only the address is matched. Otherwise
/// the advertised name must match exactly (case-sensitive).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SensorTarget {
    /// Advertised peripheral name.
    pub name: String,
    /// Hardware address (`AA:BB:CC:DD:EE:FF`) or platform peripheral id.
    pub hardware_address: Option<String>,
}

impl SensorTarget {
    /// Target a sensor by advertised name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hardware_address: None,
        }
    }

    /// Also pin the target to a hardware address.
    #[must_use]
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.hardware_address = Some(address.into());
        self
    }

    /// Check an advertisement against this target.
    ///
    /// `name` is the primary advertised name and `local_name` the alternate
    /// name field, when the platform exposes both.
    ///
    /// # Examples
    ///
    /// ```
    /// use setsense_types::SensorTarget;
    ///
    /// let target = SensorTarget::new("RepSensor");
    /// assert!(target.matches(None, Some("RepSensor"), None));
    /// assert!(!target.matches(None, Some("repsensor"), None));
    ///
    /// let pinned = SensorTarget::new("RepSensor").with_address("AA:BB:CC:DD:EE:FF");
    /// assert!(pinned.matches(Some("aa-bb-cc-dd-ee-ff"), Some("Other"), None));
    /// assert!(!pinned.matches(Some("11:22:33:44:55:66"), Some("RepSensor"), None));
    /// ```
    pub fn matches(
        &self,
        address: Option<&str>,
        name: Option<&str>,
        local_name: Option<&str>,
    ) -> bool {
        if let Some(wanted) = &self.hardware_address {
            return address.is_some_and(|a| normalize_address(a) == normalize_address(wanted));
        }

        name.is_some_and(|n| n == self.name) || local_name.is_some_and(|n| n == self.name)
    }
}

impl fmt::Display for SensorTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.hardware_address {
            Some(address) => write!(f, "{} ({})", self.name, address),
            None => write!(f, "{}", self.name),
        }
    }
}

fn normalize_address(address: &str) -> String {
    address
        .chars()
        .filter(|c| *c != ':' && *c != '-')
        .collect::<String>()
        .to_ascii_lowercase()
}

/// Workout parameters handed to a session by the navigation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SessionParams {
    /// Number of sets, within [`SessionParams::SETS_RANGE`].
    pub target_sets: u32,
    /// Reps per set, within [`SessionParams::REPS_RANGE`].
    pub target_reps: u32,
    /// Display name of the machine being used.
    pub machine_name: String,
    /// Overrides the advertised sensor name.
    pub sensor_name: Option<String>,
    /// Overrides the sensor hardware address.
    pub sensor_address: Option<String>,
}

impl SessionParams {
    /// Allowed number of sets.
    pub const SETS_RANGE: (u32, u32) = (1, 20);
    /// Allowed reps per set.
    pub const REPS_RANGE: (u32, u32) = (1, 50);
    /// Sets used when the raw value is not numeric.
    pub const DEFAULT_SETS: u32 = 3;
    /// Reps used when the raw value is not numeric.
    pub const DEFAULT_REPS: u32 = 10;

    /// Create parameters, clamping sets and reps into range.
    pub fn new(target_sets: u32, target_reps: u32, machine_name: impl Into<String>) -> Self {
        Self {
            target_sets: target_sets.clamp(Self::SETS_RANGE.0, Self::SETS_RANGE.1),
            target_reps: target_reps.clamp(Self::REPS_RANGE.0, Self::REPS_RANGE.1),
            machine_name: machine_name.into(),
            sensor_name: None,
            sensor_address: None,
        }
    }

    /// Parse raw navigation values.
    ///
    /// Non-numeric input falls back to 3 sets of 10 reps; numeric input is
    /// clamped into range (negative numbers clamp to the minimum).
    pub fn from_raw(sets: &str, reps: &str, machine_name: impl Into<String>) -> Self {
        let sets = parse_clamped(sets, Self::DEFAULT_SETS, Self::SETS_RANGE);
        let reps = parse_clamped(reps, Self::DEFAULT_REPS, Self::REPS_RANGE);
        Self::new(sets, reps, machine_name)
    }

    /// Set the sensor name override.
    #[must_use]
    pub fn sensor_name(mut self, name: impl Into<String>) -> Self {
        self.sensor_name = Some(name.into());
        self
    }

    /// Set the sensor address override.
    #[must_use]
    pub fn sensor_address(mut self, address: impl Into<String>) -> Self {
        self.sensor_address = Some(address.into());
        self
    }

    /// Build a target from the overrides, falling back to `fallback` for
    /// whatever is not overridden.
    pub fn resolve_target(&self, fallback: Option<&SensorTarget>) -> Option<SensorTarget> {
        let name = self
            .sensor_name
            .clone()
            .or_else(|| fallback.map(|t| t.name.clone()))?;
        let address = self
            .sensor_address
            .clone()
            .or_else(|| fallback.and_then(|t| t.hardware_address.clone()));
        Some(SensorTarget {
            name,
            hardware_address: address,
        })
    }
}

fn parse_clamped(raw: &str, default: u32, (min, max): (u32, u32)) -> u32 {
    match raw.trim().parse::<i64>() {
        Ok(value) => value.clamp(i64::from(min), i64::from(max)) as u32,
        Err(_) => default,
    }
}

/// Which characteristic a sample came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Channel {
    /// The rep counter characteristic; feeds rep counting.
    Primary,
    /// The status characteristic; diagnostics only.
    Secondary,
}

/// How a sample was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum SampleSource {
    /// The one-shot read performed at attach time.
    Seed,
    /// A pushed notification.
    Notification,
    /// A periodic fallback read.
    Poll,
}

/// One decoded notification or read.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RepStreamSample {
    /// Payload decoded to text.
    pub raw_text: String,
    /// Counter value, if the text contained one.
    pub parsed_value: Option<u32>,
    /// Unix time in milliseconds when the payload arrived.
    pub received_at_ms: u64,
    /// Originating characteristic.
    pub channel: Channel,
    /// Notification, poll or seed read.
    pub source: SampleSource,
}

impl RepStreamSample {
    /// Decode a raw payload into a sample.
    pub fn from_payload(
        payload: &[u8],
        channel: Channel,
        source: SampleSource,
        received_at_ms: u64,
    ) -> Self {
        Self::from_text(decode_payload(payload), channel, source, received_at_ms)
    }

    /// Build a sample from already-decoded text.
    pub fn from_text(
        raw_text: impl Into<String>,
        channel: Channel,
        source: SampleSource,
        received_at_ms: u64,
    ) -> Self {
        let raw_text = raw_text.into();
        let parsed_value = parse_rep_count(&raw_text).ok();
        Self {
            raw_text,
            parsed_value,
            received_at_ms,
            channel,
            source,
        }
    }

    /// Whether this sample can drive rep counting.
    pub fn counter_value(&self) -> Option<u32> {
        match self.channel {
            Channel::Primary => self.parsed_value,
            Channel::Secondary => None,
        }
    }
}

/// A finished workout. Created once when a session completes and never
/// modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct WorkoutRecord {
    /// Client-generated unique id.
    pub id: Uuid,
    /// Owner of the workout.
    pub user_id: String,
    /// Machine display name.
    pub machine_name: String,
    /// Target number of sets.
    pub sets: u32,
    /// Target reps per set.
    pub reps: u32,
    /// Completion time (UTC).
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub completed_at: OffsetDateTime,
    /// Reps completed in each set.
    pub set_reps_completed: Vec<u32>,
    /// Rest taken after each set, in seconds.
    pub set_rest_times: Vec<u64>,
    /// Wall-clock session length in seconds.
    pub duration_seconds: u64,
}

impl WorkoutRecord {
    /// Total reps across all sets.
    pub fn total_reps(&self) -> u32 {
        self.set_reps_completed.iter().sum()
    }

    /// Total rest across all sets, in seconds.
    pub fn total_rest_seconds(&self) -> u64 {
        self.set_rest_times.iter().sum()
    }
}

impl fmt::Display for WorkoutRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}x{} ({} reps, {}s)",
            self.machine_name,
            self.sets,
            self.reps,
            self.total_reps(),
            self.duration_seconds
        )
    }
}
