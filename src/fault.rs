//! Fault taxonomy and the rollback policy derived from it.
//!
//! Every failure that reaches a [`crate::txn::TransactionScope`] is first
//! classified into a [`FaultKind`]. The kind alone decides how much work is
//! rolled back (see [`rollback_scope`]), so classification is deliberately
//! a small, closed enum rather than an open-ended error chain.

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Closed classification of recoverable and fatal failure modes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// Momentary failure that a retry is likely to clear (busy database,
    /// rate-limited provider).
    Transient,
    /// The other side is unreachable or a connection broke mid-flight.
    Connectivity,
    /// An operation exceeded its deadline.
    Timeout,
    /// Input or output failed a local check: malformed agent output,
    /// constraint violation, a delta referencing an unknown unit.
    LocalValidation,
    /// A capacity limit was hit (connection pool exhausted, quota spent).
    ResourceExhaustion,
    /// Anything the classifier could not place.
    Unclassified,
}

impl FaultKind {
    /// Kinds worth an automatic retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FaultKind::Transient | FaultKind::Connectivity)
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FaultKind::Transient => "transient",
            FaultKind::Connectivity => "connectivity",
            FaultKind::Timeout => "timeout",
            FaultKind::LocalValidation => "local_validation",
            FaultKind::ResourceExhaustion => "resource_exhaustion",
            FaultKind::Unclassified => "unclassified",
        };
        f.write_str(s)
    }
}

/// How much pending work a fault tears down.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RollbackScope {
    /// Undo only the innermost open scope; outer pending writes survive.
    Innermost,
    /// Undo the entire top-level transaction.
    Full,
}

/// Policy table mapping a fault to the rollback it forces.
///
/// Contained kinds (transient, connectivity, timeout, local validation)
/// roll back only the innermost scope when nesting is in play, so sibling
/// work in the same transaction survives. Resource exhaustion and
/// unclassified faults abandon the whole transaction: the former because
/// retrying inside the same session would keep starving the limit, the
/// latter because nothing is known about what state the failure left
/// behind.
pub fn rollback_scope(kind: FaultKind) -> RollbackScope {
    match kind {
        FaultKind::Transient
        | FaultKind::Connectivity
        | FaultKind::Timeout
        | FaultKind::LocalValidation => RollbackScope::Innermost,
        FaultKind::ResourceExhaustion | FaultKind::Unclassified => RollbackScope::Full,
    }
}

/// Subsystem a fault originated in. Carried for logs and operator triage;
/// never consulted by the rollback policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultOrigin {
    Persistence,
    Agent,
    Engine,
}

impl fmt::Display for FaultOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FaultOrigin::Persistence => "persistence",
            FaultOrigin::Agent => "agent",
            FaultOrigin::Engine => "engine",
        };
        f.write_str(s)
    }
}

/// A classified failure flowing through scopes, stages, and the executor.
#[derive(Clone, Debug, Error, Diagnostic, PartialEq, Eq, Serialize, Deserialize)]
#[error("{origin} fault ({kind}): {message}")]
#[diagnostic(
    code(waymark::fault),
    help("the fault kind decides rollback scope and retry eligibility")
)]
pub struct Fault {
    pub kind: FaultKind,
    pub origin: FaultOrigin,
    pub message: String,
}

impl Fault {
    pub fn new(kind: FaultKind, origin: FaultOrigin, message: impl Into<String>) -> Self {
        Self {
            kind,
            origin,
            message: message.into(),
        }
    }

    pub fn persistence(kind: FaultKind, message: impl Into<String>) -> Self {
        Self::new(kind, FaultOrigin::Persistence, message)
    }

    pub fn agent(kind: FaultKind, message: impl Into<String>) -> Self {
        Self::new(kind, FaultOrigin::Agent, message)
    }

    pub fn engine(kind: FaultKind, message: impl Into<String>) -> Self {
        Self::new(kind, FaultOrigin::Engine, message)
    }

    /// Fault raised when a transaction scope's own deadline elapses.
    /// Always classified as a timeout attributed to the engine.
    pub fn scope_timeout(label: &str, limit: Duration) -> Self {
        Self::new(
            FaultKind::Timeout,
            FaultOrigin::Engine,
            format!("scope '{label}' exceeded its {}ms deadline", limit.as_millis()),
        )
    }
}

/// Map a sqlx error onto the fault taxonomy.
///
/// SQLITE_BUSY / SQLITE_LOCKED (primary codes 5 and 6, including their
/// extended forms) are transient: another connection holds the write lock
/// and will release it. Constraint and decode problems are local
/// validation. Pool starvation is resource exhaustion.
pub fn classify_sqlx(err: &sqlx::Error) -> FaultKind {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => FaultKind::ResourceExhaustion,
        sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::WorkerCrashed => {
            FaultKind::Connectivity
        }
        sqlx::Error::Protocol(_) => FaultKind::Connectivity,
        sqlx::Error::RowNotFound
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::TypeNotFound { .. } => FaultKind::LocalValidation,
        sqlx::Error::Database(db) => {
            use sqlx::error::ErrorKind;
            match db.kind() {
                ErrorKind::UniqueViolation
                | ErrorKind::ForeignKeyViolation
                | ErrorKind::NotNullViolation
                | ErrorKind::CheckViolation => FaultKind::LocalValidation,
                _ => match primary_sqlite_code(db.code().as_deref()) {
                    Some(5) | Some(6) => FaultKind::Transient,
                    _ => FaultKind::Unclassified,
                },
            }
        }
        _ => FaultKind::Unclassified,
    }
}

/// Extract the primary SQLite result code from the (possibly extended)
/// code string sqlx reports. Extended codes carry the primary code in
/// their low byte, e.g. 261 (BUSY_RECOVERY) → 5.
fn primary_sqlite_code(code: Option<&str>) -> Option<i64> {
    code.and_then(|c| c.parse::<i64>().ok()).map(|c| c & 0xff)
}
