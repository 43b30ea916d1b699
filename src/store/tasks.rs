//! Task record repository.
//!
//! Every function takes any `sqlx` executor, so the same helpers work
//! against the pool for standalone writes and against a live transaction
//! inside a [`crate::txn::TransactionScope`]. `updated_at` is refreshed on
//! every mutation; the recovery scanner keys off it.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite};
use std::time::Duration;

use super::error::StoreError;
use super::{epoch_ms, from_epoch_ms};
use crate::types::{ExecutionSummary, Step, TaskId, TaskStatus};

/// Longest error message persisted on a task row. Anything longer is
/// clipped with a trailing ellipsis.
const ERROR_MESSAGE_LIMIT: usize = 512;

/// One row of the `tasks` table.
#[derive(Clone, Debug, PartialEq)]
pub struct TaskRecord {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub current_step: Step,
    pub roadmap_id: Option<String>,
    pub error_message: Option<String>,
    pub summary: Option<ExecutionSummary>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    /// Fresh record for a task that has not run yet.
    pub fn new(task_id: impl Into<TaskId>) -> Self {
        let now = Utc::now();
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Pending,
            current_step: Step::Init,
            roadmap_id: None,
            error_message: None,
            summary: None,
            created_at: now,
            updated_at: now,
        }
    }
}

pub async fn create<'e, E>(exec: E, record: &TaskRecord) -> Result<(), StoreError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let summary_json = match &record.summary {
        Some(summary) => Some(
            serde_json::to_string(summary)
                .map_err(|err| StoreError::corrupt("task summary", err))?,
        ),
        None => None,
    };
    sqlx::query(
        "INSERT INTO tasks \
         (task_id, status, current_step, roadmap_id, error_message, summary_json, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )
    .bind(&record.task_id)
    .bind(record.status.encode())
    .bind(record.current_step.encode())
    .bind(&record.roadmap_id)
    .bind(&record.error_message)
    .bind(&summary_json)
    .bind(epoch_ms(record.created_at))
    .bind(epoch_ms(record.updated_at))
    .execute(exec)
    .await?;
    Ok(())
}

pub async fn get<'e, E>(exec: E, task_id: &str) -> Result<Option<TaskRecord>, StoreError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row: Option<SqliteRow> = sqlx::query("SELECT * FROM tasks WHERE task_id = ?1")
        .bind(task_id)
        .fetch_optional(exec)
        .await?;
    row.as_ref().map(record_from_row).transpose()
}

pub async fn set_status<'e, E>(exec: E, task_id: &str, status: TaskStatus) -> Result<(), StoreError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query("UPDATE tasks SET status = ?2, updated_at = ?3 WHERE task_id = ?1")
        .bind(task_id)
        .bind(status.encode())
        .bind(epoch_ms(Utc::now()))
        .execute(exec)
        .await?;
    Ok(())
}

pub async fn set_current_step<'e, E>(exec: E, task_id: &str, step: Step) -> Result<(), StoreError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query("UPDATE tasks SET current_step = ?2, updated_at = ?3 WHERE task_id = ?1")
        .bind(task_id)
        .bind(step.encode())
        .bind(epoch_ms(Utc::now()))
        .execute(exec)
        .await?;
    Ok(())
}

/// Moves status and step together; the common case while the pipeline runs.
pub async fn transition<'e, E>(
    exec: E,
    task_id: &str,
    status: TaskStatus,
    step: Step,
) -> Result<(), StoreError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "UPDATE tasks SET status = ?2, current_step = ?3, updated_at = ?4 WHERE task_id = ?1",
    )
    .bind(task_id)
    .bind(status.encode())
    .bind(step.encode())
    .bind(epoch_ms(Utc::now()))
    .execute(exec)
    .await?;
    Ok(())
}

pub async fn set_roadmap_id<'e, E>(
    exec: E,
    task_id: &str,
    roadmap_id: &str,
) -> Result<(), StoreError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query("UPDATE tasks SET roadmap_id = ?2, updated_at = ?3 WHERE task_id = ?1")
        .bind(task_id)
        .bind(roadmap_id)
        .bind(epoch_ms(Utc::now()))
        .execute(exec)
        .await?;
    Ok(())
}

/// Terminal failure: status and step both become `failed` and the message
/// (clipped to [`ERROR_MESSAGE_LIMIT`]) is stored for operators.
pub async fn mark_failed<'e, E>(exec: E, task_id: &str, message: &str) -> Result<(), StoreError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "UPDATE tasks SET status = ?2, current_step = ?3, error_message = ?4, updated_at = ?5 \
         WHERE task_id = ?1",
    )
    .bind(task_id)
    .bind(TaskStatus::Failed.encode())
    .bind(Step::Failed.encode())
    .bind(clip_message(message))
    .bind(epoch_ms(Utc::now()))
    .execute(exec)
    .await?;
    Ok(())
}

pub async fn set_summary<'e, E>(
    exec: E,
    task_id: &str,
    summary: &ExecutionSummary,
) -> Result<(), StoreError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let summary_json =
        serde_json::to_string(summary).map_err(|err| StoreError::corrupt("task summary", err))?;
    sqlx::query("UPDATE tasks SET summary_json = ?2, updated_at = ?3 WHERE task_id = ?1")
        .bind(task_id)
        .bind(summary_json)
        .bind(epoch_ms(Utc::now()))
        .execute(exec)
        .await?;
    Ok(())
}

/// Tasks stuck in `processing`, newest update first, no older than
/// `max_age`. These are the recovery scanner's candidates: a healthy run
/// always leaves `processing` before the process exits.
pub async fn find_interrupted<'e, E>(
    exec: E,
    max_age: Duration,
) -> Result<Vec<TaskRecord>, StoreError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let age_ms = i64::try_from(max_age.as_millis()).unwrap_or(i64::MAX);
    let cutoff_ms = epoch_ms(Utc::now()).saturating_sub(age_ms);
    let rows = sqlx::query(
        "SELECT * FROM tasks WHERE status = ?1 AND updated_at >= ?2 ORDER BY updated_at DESC",
    )
    .bind(TaskStatus::Processing.encode())
    .bind(cutoff_ms)
    .fetch_all(exec)
    .await?;
    rows.iter().map(record_from_row).collect()
}

fn clip_message(message: &str) -> String {
    if message.chars().count() <= ERROR_MESSAGE_LIMIT {
        message.to_string()
    } else {
        let mut clipped: String = message.chars().take(ERROR_MESSAGE_LIMIT).collect();
        clipped.push('…');
        clipped
    }
}

fn record_from_row(row: &SqliteRow) -> Result<TaskRecord, StoreError> {
    let status_raw: String = row.try_get("status")?;
    let status = TaskStatus::decode(&status_raw)
        .ok_or_else(|| StoreError::corrupt("task status", format!("unknown value {status_raw:?}")))?;

    let step_raw: String = row.try_get("current_step")?;
    let current_step = Step::decode(&step_raw).ok_or_else(|| {
        StoreError::corrupt("task step", format!("unknown value {step_raw:?}"))
    })?;

    let summary = match row.try_get::<Option<String>, _>("summary_json")? {
        Some(json) => Some(
            serde_json::from_str(&json).map_err(|err| StoreError::corrupt("task summary", err))?,
        ),
        None => None,
    };

    Ok(TaskRecord {
        task_id: row.try_get("task_id")?,
        status,
        current_step,
        roadmap_id: row.try_get("roadmap_id")?,
        error_message: row.try_get("error_message")?,
        summary,
        created_at: from_epoch_ms(row.try_get("created_at")?),
        updated_at: from_epoch_ms(row.try_get("updated_at")?),
    })
}
