//! Data models for stored data.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Totals over every stored workout of one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStats {
    /// The user.
    pub user_id: String,
    /// Number of workouts.
    pub workouts: u64,
    /// Reps across all workouts.
    pub total_reps: u64,
    /// Session time across all workouts, in seconds.
    pub total_duration_seconds: u64,
    /// Completion time of the latest workout.
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_workout_at: Option<OffsetDateTime>,
}

impl UserStats {
    /// Average reps per workout, if any were stored.
    pub fn average_reps(&self) -> Option<f64> {
        (self.workouts > 0).then(|| self.total_reps as f64 / self.workouts as f64)
    }
}
