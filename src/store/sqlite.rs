//! SQLite pool bootstrap.
//!
//! [`SqliteStore`] owns the connection pool every repository function and
//! transaction scope borrows from. `connect` creates the database file when
//! missing, switches on WAL journaling and runs the embedded migrations, so a
//! fresh path is usable immediately.

use std::str::FromStr;
use std::time::Duration;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use tracing::{info, instrument};

use super::error::StoreError;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_CONNECTIONS: u32 = 10;

/// Shared handle to the engine database. Cheap to clone.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens (creating if necessary) the database at `url` and applies
    /// pending migrations.
    ///
    /// `url` accepts anything `sqlx` does: `sqlite://path/to.db`,
    /// `sqlite::memory:`, or a bare filesystem path.
    #[instrument(skip(url), err)]
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        info!(target: "waymark::store", "database ready");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
