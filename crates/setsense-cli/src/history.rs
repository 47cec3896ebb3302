//! SQLite-backed workout history for sessions run from the CLI.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use setsense_core::{Error, Result, WorkoutHistory};
use setsense_store::Store;
use setsense_types::WorkoutRecord;
use tracing::debug;

/// [`WorkoutHistory`] over a [`Store`]. Calls run on the blocking pool.
#[derive(Clone)]
pub struct SqliteHistory {
    store: Arc<Mutex<Store>>,
}

impl SqliteHistory {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> setsense_store::Result<Self> {
        Ok(Self::new(Store::open(path)?))
    }

    pub fn new(store: Store) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
        }
    }

    async fn with_store<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Store) -> setsense_store::Result<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || {
            let store = store.lock().unwrap_or_else(PoisonError::into_inner);
            op(&store).map_err(Error::storage)
        })
        .await
        .map_err(Error::storage)?
    }
}

#[async_trait]
impl WorkoutHistory for SqliteHistory {
    async fn append(&self, record: &WorkoutRecord) -> Result<()> {
        let record = record.clone();
        let inserted = self
            .with_store(move |store| store.append_workout(&record))
            .await?;
        if !inserted {
            debug!("Workout already stored");
        }
        Ok(())
    }

    async fn query_by_user(&self, user_id: &str) -> Result<Vec<WorkoutRecord>> {
        let user_id = user_id.to_string();
        self.with_store(move |store| store.query_by_user(&user_id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;
    use uuid::Uuid;

    fn record(user: &str) -> WorkoutRecord {
        WorkoutRecord {
            id: Uuid::new_v4(),
            user_id: user.to_string(),
            machine_name: "Leg Press".to_string(),
            sets: 2,
            reps: 5,
            completed_at: OffsetDateTime::now_utc(),
            set_reps_completed: vec![5, 5],
            set_rest_times: vec![30, 0],
            duration_seconds: 120,
        }
    }

    #[tokio::test]
    async fn test_append_and_query() {
        let history = SqliteHistory::new(Store::open_in_memory().unwrap());
        let mine = record("alex");
        history.append(&mine).await.unwrap();
        history.append(&mine).await.unwrap();
        history.append(&record("sam")).await.unwrap();

        let stored = history.query_by_user("alex").await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, mine.id);
        assert_eq!(stored[0].set_rest_times, vec![30, 0]);
    }

    #[tokio::test]
    async fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("workouts.db");
        let history = SqliteHistory::open(&path).unwrap();
        history.append(&record("alex")).await.unwrap();
        drop(history);

        let reopened = SqliteHistory::open(&path).unwrap();
        assert_eq!(reopened.query_by_user("alex").await.unwrap().len(), 1);
    }
}
