//! Store-level errors and their fault classification.

use crate::fault::{Fault, FaultKind, classify_sqlx};
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("database error: {0}")]
    #[diagnostic(code(waymark::store::sqlx))]
    Sqlx(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    #[diagnostic(
        code(waymark::store::migrate),
        help("the embedded migrations in ./migrations run automatically at connect")
    )]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("stored {what} failed to decode: {detail}")]
    #[diagnostic(code(waymark::store::corrupt))]
    Corrupt { what: &'static str, detail: String },
}

impl StoreError {
    pub fn corrupt(what: &'static str, detail: impl std::fmt::Display) -> Self {
        StoreError::Corrupt {
            what,
            detail: detail.to_string(),
        }
    }

    /// Classification used by transaction scopes to pick a rollback.
    pub fn fault_kind(&self) -> FaultKind {
        match self {
            StoreError::Sqlx(err) => classify_sqlx(err),
            StoreError::Migrate(_) => FaultKind::Unclassified,
            StoreError::Corrupt { .. } => FaultKind::LocalValidation,
        }
    }
}

impl From<StoreError> for Fault {
    fn from(err: StoreError) -> Self {
        Fault::persistence(err.fault_kind(), err.to_string())
    }
}
