//! Pluggable checkpoint persistence.
//!
//! A checkpoint is the full [`WorkflowState`] serialized to JSON after a
//! stage boundary. Rows are append-only; the newest row per task is the
//! resume point, older rows stay behind as an audit trail. Two backends
//! ship: durable SQLite and an in-memory store for tests.

use async_trait::async_trait;
use chrono::Utc;
use rustc_hash::FxHashMap;
use sqlx::{Row, SqlitePool};
use std::sync::{Arc, Mutex};
use tracing::instrument;

use super::error::StoreError;
use super::epoch_ms;
use super::sqlite::SqliteStore;
use crate::state::WorkflowState;
use crate::types::TaskId;

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persists one checkpoint of `state` under its task id.
    async fn save(&self, state: &WorkflowState) -> Result<(), StoreError>;

    /// Loads the most recent checkpoint for `task_id`, if any exists.
    async fn load_latest(&self, task_id: &str) -> Result<Option<WorkflowState>, StoreError>;
}

// ===== SQLite backend =====

/// Durable checkpoint store on the engine database.
#[derive(Clone, Debug)]
pub struct SqliteCheckpointStore {
    pool: SqlitePool,
}

impl SqliteCheckpointStore {
    pub fn new(store: &SqliteStore) -> Self {
        Self {
            pool: store.pool().clone(),
        }
    }

    /// Number of checkpoint rows recorded for `task_id`.
    pub async fn history_len(&self, task_id: &str) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM checkpoints WHERE task_id = ?1")
            .bind(task_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    #[instrument(skip(self, state), fields(task_id = %state.task_id, step = %state.current_step), err)]
    async fn save(&self, state: &WorkflowState) -> Result<(), StoreError> {
        let state_json =
            serde_json::to_string(state).map_err(|err| StoreError::corrupt("checkpoint", err))?;
        sqlx::query(
            "INSERT INTO checkpoints (task_id, step, state_json, created_at) \
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&state.task_id)
        .bind(state.current_step.encode())
        .bind(state_json)
        .bind(epoch_ms(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn load_latest(&self, task_id: &str) -> Result<Option<WorkflowState>, StoreError> {
        let row = sqlx::query(
            "SELECT state_json FROM checkpoints WHERE task_id = ?1 ORDER BY id DESC LIMIT 1",
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => {
                let state_json: String = row.try_get("state_json")?;
                let state = serde_json::from_str(&state_json)
                    .map_err(|err| StoreError::corrupt("checkpoint", err))?;
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }
}

// ===== In-memory backend =====

/// Volatile checkpoint store for tests and examples. Cheap to clone;
/// clones share the same history.
#[derive(Clone, Debug, Default)]
pub struct MemoryCheckpointStore {
    inner: Arc<Mutex<FxHashMap<TaskId, Vec<WorkflowState>>>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of checkpoints recorded for `task_id`.
    pub fn history_len(&self, task_id: &str) -> usize {
        self.inner
            .lock()
            .expect("checkpoint store mutex poisoned")
            .get(task_id)
            .map_or(0, Vec::len)
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, state: &WorkflowState) -> Result<(), StoreError> {
        self.inner
            .lock()
            .expect("checkpoint store mutex poisoned")
            .entry(state.task_id.clone())
            .or_default()
            .push(state.clone());
        Ok(())
    }

    async fn load_latest(&self, task_id: &str) -> Result<Option<WorkflowState>, StoreError> {
        Ok(self
            .inner
            .lock()
            .expect("checkpoint store mutex poisoned")
            .get(task_id)
            .and_then(|history| history.last().cloned()))
    }
}
