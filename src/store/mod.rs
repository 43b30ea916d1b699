//! Durable state: SQLite-backed task records, framework snapshots,
//! artifacts, full-state checkpoints, and the in-process live-step cache.
//!
//! Repository functions are free functions generic over any SQLite
//! executor, so the same query runs against the pool (one-shot writes)
//! or inside a [`crate::txn::TransactionScope`] (stage writes).

pub mod artifacts;
pub mod checkpoint;
pub mod error;
pub mod live;
pub mod snapshots;
pub mod sqlite;
pub mod tasks;

pub use checkpoint::{CheckpointStore, MemoryCheckpointStore, SqliteCheckpointStore};
pub use error::StoreError;
pub use live::LiveStepCache;
pub use sqlite::SqliteStore;
pub use tasks::TaskRecord;

use chrono::{DateTime, Utc};

/// Timestamps are stored as epoch milliseconds.
pub(crate) fn epoch_ms(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

/// Inverse of [`epoch_ms`]. Out-of-range values (which the engine never
/// writes) clamp to the epoch rather than failing the whole row.
pub(crate) fn from_epoch_ms(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::UNIX_EPOCH)
}
