//! Framework snapshot repository.
//!
//! One row per roadmap holding the latest framework revision. Replacing the
//! framework clears any attached validation report, since the report scored
//! the previous revision.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite};

use super::error::StoreError;
use super::{epoch_ms, from_epoch_ms};
use crate::roadmap::{RoadmapFramework, ValidationReport};

/// Latest framework revision for one roadmap.
#[derive(Clone, Debug)]
pub struct FrameworkSnapshot {
    pub roadmap_id: String,
    pub task_id: String,
    pub revision: i64,
    pub framework: RoadmapFramework,
    pub validation: Option<ValidationReport>,
    pub updated_at: DateTime<Utc>,
}

/// Inserts or replaces the snapshot for `roadmap_id`. The validation
/// column is reset; call [`attach_validation`] once the new revision has
/// been scored.
pub async fn upsert<'e, E>(
    exec: E,
    roadmap_id: &str,
    task_id: &str,
    revision: i64,
    framework: &RoadmapFramework,
) -> Result<(), StoreError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let framework_json = serde_json::to_string(framework)
        .map_err(|err| StoreError::corrupt("framework snapshot", err))?;
    sqlx::query(
        "INSERT INTO snapshots (roadmap_id, task_id, revision, framework_json, validation_json, updated_at) \
         VALUES (?1, ?2, ?3, ?4, NULL, ?5) \
         ON CONFLICT(roadmap_id) DO UPDATE SET \
           task_id = excluded.task_id, \
           revision = excluded.revision, \
           framework_json = excluded.framework_json, \
           validation_json = NULL, \
           updated_at = excluded.updated_at",
    )
    .bind(roadmap_id)
    .bind(task_id)
    .bind(revision)
    .bind(framework_json)
    .bind(epoch_ms(Utc::now()))
    .execute(exec)
    .await?;
    Ok(())
}

pub async fn fetch<'e, E>(exec: E, roadmap_id: &str) -> Result<Option<FrameworkSnapshot>, StoreError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row: Option<SqliteRow> = sqlx::query("SELECT * FROM snapshots WHERE roadmap_id = ?1")
        .bind(roadmap_id)
        .fetch_optional(exec)
        .await?;
    row.as_ref().map(snapshot_from_row).transpose()
}

/// Attaches the validation report scored against the current revision.
pub async fn attach_validation<'e, E>(
    exec: E,
    roadmap_id: &str,
    report: &ValidationReport,
) -> Result<(), StoreError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let validation_json = serde_json::to_string(report)
        .map_err(|err| StoreError::corrupt("validation report", err))?;
    sqlx::query(
        "UPDATE snapshots SET validation_json = ?2, updated_at = ?3 WHERE roadmap_id = ?1",
    )
    .bind(roadmap_id)
    .bind(validation_json)
    .bind(epoch_ms(Utc::now()))
    .execute(exec)
    .await?;
    Ok(())
}

/// Revision currently stored for `roadmap_id`, if any. The edit stage
/// writes `current_revision + 1`.
pub async fn current_revision<'e, E>(exec: E, roadmap_id: &str) -> Result<Option<i64>, StoreError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let revision: Option<i64> =
        sqlx::query_scalar("SELECT revision FROM snapshots WHERE roadmap_id = ?1")
            .bind(roadmap_id)
            .fetch_optional(exec)
            .await?;
    Ok(revision)
}

fn snapshot_from_row(row: &SqliteRow) -> Result<FrameworkSnapshot, StoreError> {
    let framework_json: String = row.try_get("framework_json")?;
    let framework = serde_json::from_str(&framework_json)
        .map_err(|err| StoreError::corrupt("framework snapshot", err))?;
    let validation = match row.try_get::<Option<String>, _>("validation_json")? {
        Some(json) => Some(
            serde_json::from_str(&json)
                .map_err(|err| StoreError::corrupt("validation report", err))?,
        ),
        None => None,
    };
    Ok(FrameworkSnapshot {
        roadmap_id: row.try_get("roadmap_id")?,
        task_id: row.try_get("task_id")?,
        revision: row.try_get("revision")?,
        framework,
        validation,
        updated_at: from_epoch_ms(row.try_get("updated_at")?),
    })
}
