//! Main store implementation.

use std::path::Path;

use rusqlite::{Connection, OptionalExtension, Row};
use time::OffsetDateTime;
use tracing::{debug, info};
use uuid::Uuid;

use setsense_types::WorkoutRecord;

use crate::error::{Error, Result};
use crate::models::UserStats;
use crate::queries::{WorkoutQuery, to_nanos};
use crate::schema;

const WORKOUT_COLUMNS: &str = "id, user_id, machine_name, sets, reps, completed_at, \
     set_reps_completed, set_rest_times, duration_seconds";

/// SQLite-based store for finished workouts.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        info!("Opening database at {}", path.display());
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        schema::initialize(&conn)?;

        Ok(Self { conn })
    }

    /// Open the default database location.
    pub fn open_default() -> Result<Self> {
        Self::open(crate::default_db_path())
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }
}

/// Raw column values of one `workouts` row.
struct WorkoutRow {
    id: String,
    user_id: String,
    machine_name: String,
    sets: i64,
    reps: i64,
    completed_at: i64,
    set_reps_completed: String,
    set_rest_times: String,
    duration_seconds: i64,
}

impl WorkoutRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            machine_name: row.get(2)?,
            sets: row.get(3)?,
            reps: row.get(4)?,
            completed_at: row.get(5)?,
            set_reps_completed: row.get(6)?,
            set_rest_times: row.get(7)?,
            duration_seconds: row.get(8)?,
        })
    }

    fn into_record(self) -> Result<WorkoutRecord> {
        let id = Uuid::parse_str(&self.id).map_err(|_| Error::InvalidId(self.id.clone()))?;
        let completed_at = OffsetDateTime::from_unix_timestamp_nanos(i128::from(self.completed_at))
            .map_err(|e| Error::InvalidTimestamp(e.to_string()))?;
        Ok(WorkoutRecord {
            id,
            user_id: self.user_id,
            machine_name: self.machine_name,
            sets: self.sets as u32,
            reps: self.reps as u32,
            completed_at,
            set_reps_completed: serde_json::from_str(&self.set_reps_completed)?,
            set_rest_times: serde_json::from_str(&self.set_rest_times)?,
            duration_seconds: self.duration_seconds as u64,
        })
    }
}

// Workout operations
impl Store {
    /// Append a finished workout.
    ///
    /// Returns `false` if a workout with the same id is already stored; the
    /// stored copy is left untouched.
    pub fn append_workout(&self, record: &WorkoutRecord) -> Result<bool> {
        let changed = self.conn.execute(
            "INSERT OR IGNORE INTO workouts (id, user_id, machine_name, sets, reps,
             completed_at, set_reps_completed, set_rest_times, total_reps,
             duration_seconds, stored_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            rusqlite::params![
                record.id.to_string(),
                record.user_id,
                record.machine_name,
                record.sets,
                record.reps,
                to_nanos(record.completed_at),
                serde_json::to_string(&record.set_reps_completed)?,
                serde_json::to_string(&record.set_rest_times)?,
                record.total_reps(),
                record.duration_seconds as i64,
                OffsetDateTime::now_utc().unix_timestamp(),
            ],
        )?;

        if changed == 0 {
            debug!(id = %record.id, "Workout already stored");
        } else {
            info!(id = %record.id, user = %record.user_id, "Stored workout");
        }
        Ok(changed > 0)
    }

    /// Get a workout by id.
    pub fn get_workout(&self, id: Uuid) -> Result<Option<WorkoutRecord>> {
        let sql = format!("SELECT {WORKOUT_COLUMNS} FROM workouts WHERE id = ?");
        self.conn
            .query_row(&sql, [id.to_string()], WorkoutRow::from_row)
            .optional()?
            .map(WorkoutRow::into_record)
            .transpose()
    }

    /// Query workouts with filters.
    pub fn query_workouts(&self, query: &WorkoutQuery) -> Result<Vec<WorkoutRecord>> {
        let sql = query.build_sql();
        let (_, params) = query.build_where();

        debug!("Executing query: {}", sql);

        let params_ref: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_ref.as_slice(), WorkoutRow::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter().map(WorkoutRow::into_record).collect()
    }

    /// All workouts of a user, newest first.
    pub fn query_by_user(&self, user_id: &str) -> Result<Vec<WorkoutRecord>> {
        self.query_workouts(&WorkoutQuery::new().user(user_id))
    }

    /// Count workouts, optionally for one user.
    pub fn count_workouts(&self, user_id: Option<&str>) -> Result<u64> {
        let count: i64 = match user_id {
            Some(user) => self.conn.query_row(
                "SELECT COUNT(*) FROM workouts WHERE user_id = ?",
                [user],
                |row| row.get(0),
            )?,
            None => self
                .conn
                .query_row("SELECT COUNT(*) FROM workouts", [], |row| row.get(0))?,
        };

        Ok(count as u64)
    }

    /// Totals over every workout of a user.
    pub fn user_stats(&self, user_id: &str) -> Result<UserStats> {
        let (workouts, total_reps, total_duration, last): (i64, i64, i64, Option<i64>) =
            self.conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(total_reps), 0),
                        COALESCE(SUM(duration_seconds), 0), MAX(completed_at)
                 FROM workouts WHERE user_id = ?",
                [user_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )?;

        let last_workout_at = last
            .map(|nanos| OffsetDateTime::from_unix_timestamp_nanos(i128::from(nanos)))
            .transpose()
            .map_err(|e| Error::InvalidTimestamp(e.to_string()))?;

        Ok(UserStats {
            user_id: user_id.to_string(),
            workouts: workouts as u64,
            total_reps: total_reps as u64,
            total_duration_seconds: total_duration as u64,
            last_workout_at,
        })
    }
}
