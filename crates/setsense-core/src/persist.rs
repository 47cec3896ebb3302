//! Persistence boundary for finished workouts.
//!
//! [`WorkoutHistory`] is the seam to whatever stores workouts; the CLI backs
//! it with SQLite, tests use [`MemoryHistory`]. [`SessionRecorder`] turns a
//! completed [`SessionState`] into a [`WorkoutRecord`] and appends it exactly
//! once per session.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use tracing::{debug, info};
use uuid::Uuid;

use setsense_types::WorkoutRecord;

use crate::error::{Error, Result};
use crate::retry::{RetryConfig, with_retry};
use crate::session::SessionState;

/// Append-only store of finished workouts.
#[async_trait]
pub trait WorkoutHistory: Send + Sync {
    /// Append a record. Appending a record whose id is already stored is a
    /// no-op, so retried appends never duplicate.
    async fn append(&self, record: &WorkoutRecord) -> Result<()>;

    /// All records of a user, newest first.
    async fn query_by_user(&self, user_id: &str) -> Result<Vec<WorkoutRecord>>;
}

/// Shared handle to a history backend.
pub type SharedHistory = Arc<dyn WorkoutHistory>;

/// In-memory history, for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryHistory {
    records: RwLock<Vec<WorkoutRecord>>,
    failures_remaining: AtomicU32,
    append_calls: AtomicU32,
}

impl MemoryHistory {
    /// Create an empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` appends fail with a storage error.
    pub fn fail_next(&self, count: u32) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Number of append calls, including failed ones.
    pub fn append_calls(&self) -> u32 {
        self.append_calls.load(Ordering::SeqCst)
    }

    /// Snapshot of every stored record, in insertion order.
    pub fn records(&self) -> Vec<WorkoutRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl WorkoutHistory for MemoryHistory {
    async fn append(&self, record: &WorkoutRecord) -> Result<()> {
        self.append_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::storage("simulated storage failure"));
        }

        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        if !records.iter().any(|r| r.id == record.id) {
            records.push(record.clone());
        }
        Ok(())
    }

    async fn query_by_user(&self, user_id: &str) -> Result<Vec<WorkoutRecord>> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        let mut matching: Vec<_> = records
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
        Ok(matching)
    }
}

/// Writes the record of one session.
pub struct SessionRecorder {
    history: SharedHistory,
    retry: RetryConfig,
    finalized: AtomicBool,
    record: Mutex<Option<WorkoutRecord>>,
}

impl std::fmt::Debug for SessionRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRecorder")
            .field("retry", &self.retry)
            .field("finalized", &self.is_finalized())
            .finish_non_exhaustive()
    }
}

impl SessionRecorder {
    /// Create a recorder that appends to `history`.
    pub fn new(history: SharedHistory) -> Self {
        Self {
            history,
            retry: RetryConfig::for_persist(),
            finalized: AtomicBool::new(false),
            record: Mutex::new(None),
        }
    }

    /// Use a custom retry policy for appends.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Whether `finalize` already ran for this session.
    pub fn is_finalized(&self) -> bool {
        self.finalized.load(Ordering::SeqCst)
    }

    /// The record built by `finalize`, whether or not it was stored.
    pub fn record(&self) -> Option<WorkoutRecord> {
        self.record
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Build the record for a completed session.
    pub fn build_record(
        state: &SessionState,
        elapsed: Duration,
        machine_name: &str,
        user_id: &str,
    ) -> Result<WorkoutRecord> {
        if !state.is_complete() {
            return Err(Error::SessionIncomplete);
        }
        Ok(WorkoutRecord {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            machine_name: machine_name.to_string(),
            sets: state.target_sets,
            reps: state.target_reps,
            completed_at: OffsetDateTime::now_utc(),
            set_reps_completed: state.reps_completed_per_set.clone(),
            set_rest_times: state.rest_seconds_per_set.clone(),
            duration_seconds: elapsed.as_secs(),
        })
    }

    /// Build and append the record of a completed session.
    ///
    /// Only the first call writes; later calls return `Ok(None)`. Fails with
    /// [`Error::SessionIncomplete`] if any set is short of its target.
    #[tracing::instrument(level = "info", skip_all, fields(machine = machine_name, user = user_id))]
    pub async fn finalize(
        &self,
        state: &SessionState,
        elapsed: Duration,
        machine_name: &str,
        user_id: &str,
    ) -> Result<Option<WorkoutRecord>> {
        let record = Self::build_record(state, elapsed, machine_name, user_id)?;
        if self.finalized.swap(true, Ordering::SeqCst) {
            debug!("Session already finalized");
            return Ok(None);
        }
        *self.record.lock().unwrap_or_else(PoisonError::into_inner) = Some(record.clone());

        with_retry(&self.retry, "append workout", || self.history.append(&record)).await?;
        info!(id = %record.id, reps = record.total_reps(), "Workout saved");
        Ok(Some(record))
    }
}
