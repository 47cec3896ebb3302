//! Query builder for stored workouts.
//!
//! # Example
//!
//! ```
//! use setsense_store::{Store, WorkoutQuery};
//! use time::{OffsetDateTime, Duration};
//!
//! let store = Store::open_in_memory()?;
//! let last_week = OffsetDateTime::now_utc() - Duration::days(7);
//!
//! let query = WorkoutQuery::new()
//!     .user("user-1")
//!     .machine("Chest Press")
//!     .since(last_week)
//!     .limit(20);
//!
//! let workouts = store.query_workouts(&query)?;
//! # Ok::<(), setsense_store::Error>(())
//! ```

use time::OffsetDateTime;

/// Fluent query builder for workouts.
///
/// By default, queries return results ordered by `completed_at` descending
/// (newest first).
#[derive(Debug, Default, Clone)]
pub struct WorkoutQuery {
    /// Filter by user.
    pub user_id: Option<String>,
    /// Filter by machine name.
    pub machine_name: Option<String>,
    /// Filter workouts completed at or after this time.
    pub since: Option<OffsetDateTime>,
    /// Filter workouts completed at or before this time.
    pub until: Option<OffsetDateTime>,
    /// Maximum number of results.
    pub limit: Option<u32>,
    /// Offset for pagination.
    pub offset: Option<u32>,
    /// Order by completed_at descending (newest first).
    pub newest_first: bool,
}

impl WorkoutQuery {
    /// Create a new query: all users, all machines, newest first.
    pub fn new() -> Self {
        Self {
            newest_first: true,
            ..Default::default()
        }
    }

    /// Filter by user.
    pub fn user(mut self, user_id: &str) -> Self {
        self.user_id = Some(user_id.to_string());
        self
    }

    /// Filter by machine name.
    pub fn machine(mut self, machine_name: &str) -> Self {
        self.machine_name = Some(machine_name.to_string());
        self
    }

    /// Filter to workouts completed at or after this time.
    pub fn since(mut self, time: OffsetDateTime) -> Self {
        self.since = Some(time);
        self
    }

    /// Filter to workouts completed at or before this time.
    pub fn until(mut self, time: OffsetDateTime) -> Self {
        self.until = Some(time);
        self
    }

    /// Limit the maximum number of results returned.
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skip the first N results.
    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Order results by oldest first.
    pub fn oldest_first(mut self) -> Self {
        self.newest_first = false;
        self
    }

    /// Build the SQL WHERE clause and parameters.
    pub(crate) fn build_where(&self) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ref user_id) = self.user_id {
            conditions.push("user_id = ?");
            params.push(Box::new(user_id.clone()));
        }

        if let Some(ref machine_name) = self.machine_name {
            conditions.push("machine_name = ?");
            params.push(Box::new(machine_name.clone()));
        }

        if let Some(since) = self.since {
            conditions.push("completed_at >= ?");
            params.push(Box::new(to_nanos(since)));
        }

        if let Some(until) = self.until {
            conditions.push("completed_at <= ?");
            params.push(Box::new(to_nanos(until)));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    /// Build the full SQL query.
    pub(crate) fn build_sql(&self) -> String {
        let (where_clause, _) = self.build_where();
        let order = if self.newest_first { "DESC" } else { "ASC" };

        let mut sql = format!(
            "SELECT id, user_id, machine_name, sets, reps, completed_at, \
             set_reps_completed, set_rest_times, duration_seconds \
             FROM workouts {} ORDER BY completed_at {}",
            where_clause, order
        );

        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        } else if self.offset.is_some() {
            // SQLite requires a LIMIT before OFFSET.
            sql.push_str(" LIMIT -1");
        }

        if let Some(offset) = self.offset {
            sql.push_str(&format!(" OFFSET {}", offset));
        }

        sql
    }
}

/// Unix nanoseconds, saturating outside the `i64` range.
pub(crate) fn to_nanos(time: OffsetDateTime) -> i64 {
    let nanos = time.unix_timestamp_nanos();
    i64::try_from(nanos).unwrap_or(if nanos < 0 { i64::MIN } else { i64::MAX })
}
