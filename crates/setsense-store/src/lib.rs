//! Local workout history for setsense.
//!
//! This crate provides SQLite-based storage for finished workouts so the
//! CLI can list past sessions and summarize a user's training offline.
//!
//! # Features
//!
//! - Append finished workouts idempotently (client-generated ids)
//! - Look up a workout by id
//! - Query by user and machine, with time filters and pagination
//! - Per-user totals
//!
//! # Example
//!
//! ```no_run
//! use setsense_store::{Store, WorkoutQuery};
//!
//! let store = Store::open_default()?;
//!
//! let query = WorkoutQuery::new().user("user-1").limit(10);
//! for workout in store.query_workouts(&query)? {
//!     println!("{workout}");
//! }
//! # Ok::<(), setsense_store::Error>(())
//! ```

mod error;
mod models;
mod queries;
mod schema;
mod store;

pub use error::{Error, Result};
pub use models::UserStats;
pub use queries::WorkoutQuery;
pub use store::Store;

/// Default database path following platform conventions.
///
/// - Linux: `~/.local/share/setsense/workouts.db`
/// - macOS: `~/Library/Application Support/setsense/workouts.db`
/// - Windows: `C:\Users\<user>\AppData\Local\setsense\workouts.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("setsense")
        .join("workouts.db")
}
