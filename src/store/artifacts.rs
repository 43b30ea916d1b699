//! Content artifact repository.
//!
//! Artifacts are keyed by `(roadmap_id, unit_id, kind)`. Writes use
//! `INSERT OR REPLACE` so a retried unit simply overwrites whatever the
//! previous attempt left behind.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite};

use super::error::StoreError;
use super::{epoch_ms, from_epoch_ms};
use crate::types::ArtifactKind;

/// One persisted artifact row. The payload stays as raw JSON; callers
/// deserialize into the concrete document type when they need it.
#[derive(Clone, Debug)]
pub struct ArtifactRow {
    pub roadmap_id: String,
    pub unit_id: String,
    pub kind: ArtifactKind,
    pub storage_key: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

pub async fn upsert<'e, E>(
    exec: E,
    roadmap_id: &str,
    unit_id: &str,
    kind: ArtifactKind,
    storage_key: &str,
    payload: &serde_json::Value,
) -> Result<(), StoreError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let payload_json =
        serde_json::to_string(payload).map_err(|err| StoreError::corrupt("artifact payload", err))?;
    sqlx::query(
        "INSERT OR REPLACE INTO artifacts \
         (roadmap_id, unit_id, kind, storage_key, payload_json, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )
    .bind(roadmap_id)
    .bind(unit_id)
    .bind(kind.encode())
    .bind(storage_key)
    .bind(payload_json)
    .bind(epoch_ms(Utc::now()))
    .execute(exec)
    .await?;
    Ok(())
}

pub async fn list_for_roadmap<'e, E>(
    exec: E,
    roadmap_id: &str,
) -> Result<Vec<ArtifactRow>, StoreError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query(
        "SELECT * FROM artifacts WHERE roadmap_id = ?1 ORDER BY unit_id, kind",
    )
    .bind(roadmap_id)
    .fetch_all(exec)
    .await?;
    rows.iter().map(artifact_from_row).collect()
}

pub async fn list_for_unit<'e, E>(
    exec: E,
    roadmap_id: &str,
    unit_id: &str,
) -> Result<Vec<ArtifactRow>, StoreError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query(
        "SELECT * FROM artifacts WHERE roadmap_id = ?1 AND unit_id = ?2 ORDER BY kind",
    )
    .bind(roadmap_id)
    .bind(unit_id)
    .fetch_all(exec)
    .await?;
    rows.iter().map(artifact_from_row).collect()
}

fn artifact_from_row(row: &SqliteRow) -> Result<ArtifactRow, StoreError> {
    let kind_raw: String = row.try_get("kind")?;
    let kind = ArtifactKind::decode(&kind_raw).ok_or_else(|| {
        StoreError::corrupt("artifact kind", format!("unknown value {kind_raw:?}"))
    })?;
    let payload_json: String = row.try_get("payload_json")?;
    let payload = serde_json::from_str(&payload_json)
        .map_err(|err| StoreError::corrupt("artifact payload", err))?;
    Ok(ArtifactRow {
        roadmap_id: row.try_get("roadmap_id")?,
        unit_id: row.try_get("unit_id")?,
        kind,
        storage_key: row.try_get("storage_key")?,
        payload,
        created_at: from_epoch_ms(row.try_get("created_at")?),
    })
}
