use std::fmt;
use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use tracing::{debug, trace, warn};

use crate::fault::{Fault, FaultKind, RollbackScope, classify_sqlx, rollback_scope};

/// How a scope (or one of its savepoint levels) was closed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Top-level exit without a fault: the transaction committed.
    Committed,
    /// Nested exit without a fault: the savepoint was released and its
    /// writes remain pending in the enclosing level.
    Released,
    /// A contained fault undid the innermost savepoint only.
    RolledBackInner,
    /// A hard fault (or a contained fault with no savepoint open) undid
    /// the entire transaction. The scope is poisoned afterwards.
    RolledBackFull,
}

/// Parameters for [`with_scope`].
#[derive(Clone, Copy, Debug)]
pub struct ScopeOptions {
    /// Short name carried into logs and timeout faults ("intent",
    /// "unit u-3", ...).
    pub label: &'static str,
    /// Wall-clock budget for the whole scope, agent calls included.
    pub timeout: Duration,
}

impl ScopeOptions {
    pub fn new(label: &'static str, timeout: Duration) -> Self {
        Self { label, timeout }
    }
}

/// One open SQLite transaction with manual savepoint nesting.
///
/// The transaction begins deferred, so holding a scope across an agent
/// call does not pin the database write lock; SQLite takes it at the
/// first write. Savepoints are named `sp_1`, `sp_2`, ... by depth.
///
/// After a full rollback the scope is *poisoned*: every further call
/// returns an engine fault. Callers are expected to drop it.
pub struct TransactionScope {
    tx: Option<Transaction<'static, Sqlite>>,
    levels: Vec<Instant>,
    started: Instant,
    poisoned: bool,
    label: &'static str,
}

impl fmt::Debug for TransactionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionScope")
            .field("label", &self.label)
            .field("depth", &self.levels.len())
            .field("poisoned", &self.poisoned)
            .finish()
    }
}

impl TransactionScope {
    /// Opens a new top-level transaction on `pool`.
    pub async fn begin(pool: &SqlitePool, label: &'static str) -> Result<Self, Fault> {
        let tx = pool.begin().await.map_err(|err| {
            Fault::persistence(classify_sqlx(&err), format!("begin failed: {err}"))
        })?;
        trace!(target: "waymark::txn", scope = label, "transaction open");
        Ok(Self {
            tx: Some(tx),
            levels: Vec::new(),
            started: Instant::now(),
            poisoned: false,
            label,
        })
    }

    /// Current savepoint nesting depth (0 at top level).
    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Connection handle for repository calls inside the scope.
    pub fn conn(&mut self) -> Result<&mut SqliteConnection, Fault> {
        if self.poisoned {
            return Err(poisoned_fault(self.label));
        }
        let label = self.label;
        self.tx
            .as_deref_mut()
            .ok_or_else(|| completed_fault(label))
    }

    /// Opens a nested savepoint. Writes made until the matching [`exit`]
    /// can be undone without touching work pending in outer levels.
    ///
    /// [`exit`]: TransactionScope::exit
    pub async fn enter(&mut self) -> Result<(), Fault> {
        if self.poisoned {
            return Err(poisoned_fault(self.label));
        }
        let depth = self.levels.len() + 1;
        self.run(&format!("SAVEPOINT sp_{depth}")).await?;
        self.levels.push(Instant::now());
        trace!(target: "waymark::txn", scope = self.label, depth, "savepoint open");
        Ok(())
    }

    /// Closes the innermost open level, or at depth 0 the transaction
    /// itself. `fault` decides what happens to pending writes:
    ///
    /// * `None`: release the savepoint (or commit at top level).
    /// * `Some` with an innermost-scoped kind: roll back to the savepoint,
    ///   keeping outer pending writes.
    /// * `Some` with a full-scoped kind, or any fault at depth 0: roll
    ///   back the whole transaction and poison the scope.
    pub async fn exit(&mut self, fault: Option<&Fault>) -> Result<ExitOutcome, Fault> {
        if self.poisoned {
            return Err(poisoned_fault(self.label));
        }
        match fault {
            None => {
                if let Some(entered) = self.levels.pop() {
                    let depth = self.levels.len() + 1;
                    self.run(&format!("RELEASE SAVEPOINT sp_{depth}")).await?;
                    trace!(
                        target: "waymark::txn",
                        scope = self.label,
                        depth,
                        held_ms = entered.elapsed().as_millis() as u64,
                        "savepoint released",
                    );
                    Ok(ExitOutcome::Released)
                } else {
                    let label = self.label;
                    let tx = self.tx.take().ok_or_else(|| completed_fault(label))?;
                    tx.commit().await.map_err(|err| {
                        Fault::persistence(classify_sqlx(&err), format!("commit failed: {err}"))
                    })?;
                    debug!(
                        target: "waymark::txn",
                        scope = label,
                        held_ms = self.started.elapsed().as_millis() as u64,
                        "transaction committed",
                    );
                    Ok(ExitOutcome::Committed)
                }
            }
            Some(fault) => {
                let contained = rollback_scope(fault.kind) == RollbackScope::Innermost;
                if contained && !self.levels.is_empty() {
                    self.levels.pop();
                    let depth = self.levels.len() + 1;
                    self.run(&format!("ROLLBACK TO SAVEPOINT sp_{depth}")).await?;
                    self.run(&format!("RELEASE SAVEPOINT sp_{depth}")).await?;
                    warn!(
                        target: "waymark::txn",
                        scope = self.label,
                        depth,
                        kind = %fault.kind,
                        "savepoint rolled back",
                    );
                    Ok(ExitOutcome::RolledBackInner)
                } else {
                    self.poisoned = true;
                    self.levels.clear();
                    let label = self.label;
                    let tx = self.tx.take().ok_or_else(|| completed_fault(label))?;
                    tx.rollback().await.map_err(|err| {
                        Fault::persistence(classify_sqlx(&err), format!("rollback failed: {err}"))
                    })?;
                    warn!(
                        target: "waymark::txn",
                        scope = label,
                        kind = %fault.kind,
                        "transaction rolled back in full",
                    );
                    Ok(ExitOutcome::RolledBackFull)
                }
            }
        }
    }

    /// Unconditional full rollback, used when the scope's deadline
    /// elapses. Best-effort: a rollback failure is logged, not returned,
    /// because the caller is already reporting the timeout.
    pub async fn abort(&mut self) {
        self.poisoned = true;
        self.levels.clear();
        if let Some(tx) = self.tx.take()
            && let Err(err) = tx.rollback().await
        {
            warn!(
                target: "waymark::txn",
                scope = self.label,
                error = %err,
                "rollback after abort failed",
            );
        }
    }

    async fn run(&mut self, sql: &str) -> Result<(), Fault> {
        let label = self.label;
        let conn = match self.tx.as_deref_mut() {
            Some(conn) => conn,
            None => return Err(completed_fault(label)),
        };
        sqlx::query(sql).execute(conn).await.map_err(|err| {
            Fault::persistence(classify_sqlx(&err), format!("{sql} failed: {err}"))
        })?;
        Ok(())
    }
}

/// Runs `work` inside a fresh scope with the deadline from `options`.
///
/// On success the transaction commits and the closure's value is
/// returned. On a fault the transaction rolls back (any kind is a full
/// rollback at the top level) and the fault propagates unchanged. If the
/// deadline elapses, the work future is dropped where it stands, the
/// transaction is rolled back, and a [`FaultKind::Timeout`] engine fault
/// is returned.
///
/// The closure must keep `enter`/`exit` calls balanced and capture owned
/// data only:
///
/// ```ignore
/// let value = with_scope(pool, ScopeOptions::new("intent", timeout), |scope| {
///     Box::pin(async move {
///         let intent = agent.execute(request).await?;
///         tasks::set_roadmap_id(scope.conn()?, &task_id, &roadmap_id).await?;
///         Ok(intent)
///     })
/// })
/// .await?;
/// ```
pub async fn with_scope<T, F>(pool: &SqlitePool, options: ScopeOptions, work: F) -> Result<T, Fault>
where
    T: Send,
    F: for<'s> FnOnce(&'s mut TransactionScope) -> BoxFuture<'s, Result<T, Fault>>,
{
    let mut scope = TransactionScope::begin(pool, options.label).await?;
    match tokio::time::timeout(options.timeout, work(&mut scope)).await {
        Ok(Ok(value)) => {
            scope.exit(None).await?;
            Ok(value)
        }
        Ok(Err(fault)) => {
            // A poisoned scope already rolled everything back itself.
            if !scope.is_poisoned()
                && let Err(rollback_err) = scope.exit(Some(&fault)).await
            {
                warn!(
                    target: "waymark::txn",
                    scope = options.label,
                    error = %rollback_err,
                    "rollback after fault failed",
                );
            }
            Err(fault)
        }
        Err(_elapsed) => {
            scope.abort().await;
            Err(Fault::scope_timeout(options.label, options.timeout))
        }
    }
}

fn poisoned_fault(label: &str) -> Fault {
    Fault::engine(
        FaultKind::Unclassified,
        format!("scope '{label}' is poisoned after a full rollback"),
    )
}

fn completed_fault(label: &str) -> Fault {
    Fault::engine(
        FaultKind::Unclassified,
        format!("scope '{label}' already completed"),
    )
}
