//! Startup recovery: finds tasks a previous process left mid-flight and
//! resumes them from their checkpoints.
//!
//! A task counts as interrupted when its row still says `processing` but
//! nothing is driving it. The scan keeps an age cutoff (rows untouched for
//! longer than [`RecoveryConfig::max_age`] are left alone), resumes at most
//! [`RecoveryConfig::max_concurrent`] tasks at a time, and staggers the
//! launches so a restart does not fire every pending agent call at once.

use rustc_hash::FxHashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use crate::config::RecoveryConfig;
use crate::executor::{EngineError, ExecutionOutcome, Executor};
use crate::store::tasks;
use crate::types::TaskId;

/// Tally of one recovery pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Interrupted rows the scan found within the age cutoff.
    pub examined: usize,
    /// Tasks driven onward (to a terminal step or an interruption point).
    pub resumed: usize,
    /// Tasks that parked at the review gate again.
    pub suspended: usize,
    /// Tasks with a row but no checkpoint; marked failed so later scans
    /// skip them.
    pub abandoned: usize,
    /// Tasks whose resumption errored, with the error text.
    pub failures: Vec<(TaskId, String)>,
}

/// Scans for interrupted tasks and resumes them through an [`Executor`].
///
/// Safe to run repeatedly (e.g. on a timer): tasks being driven by this
/// process are recognized via the live-step cache and skipped, and a task
/// resumed by an earlier pass has left `processing` by the time the next
/// pass looks.
pub struct RecoveryScanner {
    executor: Executor,
    config: RecoveryConfig,
}

impl RecoveryScanner {
    /// Builds a scanner using the recovery settings the executor was
    /// configured with.
    pub fn new(executor: Executor) -> Self {
        let config = executor.config().recovery.clone();
        Self { executor, config }
    }

    /// Overrides the recovery settings for this scanner only.
    #[must_use]
    pub fn with_config(mut self, config: RecoveryConfig) -> Self {
        self.config = config;
        self
    }

    /// Runs one recovery pass to completion.
    #[instrument(skip(self), err)]
    pub async fn run(&self) -> Result<RecoveryReport, EngineError> {
        let candidates =
            tasks::find_interrupted(self.executor.store().pool(), self.config.max_age).await?;
        let mut report = RecoveryReport {
            examined: candidates.len(),
            ..RecoveryReport::default()
        };
        if candidates.is_empty() {
            debug!(target: "waymark::recovery", "no interrupted tasks");
            return Ok(report);
        }
        info!(
            target: "waymark::recovery",
            candidates = candidates.len(),
            "recovery pass starting",
        );

        let permits = Arc::new(Semaphore::new(self.config.max_concurrent));
        let mut join_set: JoinSet<(TaskId, Result<ExecutionOutcome, EngineError>)> =
            JoinSet::new();
        let mut pending: FxHashSet<TaskId> = FxHashSet::default();
        let mut launched = 0usize;

        for record in candidates {
            if self.executor.get_live_step(&record.task_id).is_some() {
                debug!(
                    target: "waymark::recovery",
                    task_id = %record.task_id,
                    "task is live in this process, skipping",
                );
                continue;
            }
            if launched > 0 && !self.config.stagger.is_zero() {
                sleep(self.config.stagger).await;
            }
            // The semaphore is never closed.
            let Ok(permit) = permits.clone().acquire_owned().await else {
                break;
            };

            pending.insert(record.task_id.clone());
            launched += 1;

            let executor = self.executor.clone();
            join_set.spawn(async move {
                let _permit = permit;
                let outcome = executor.resume_from_checkpoint(&record.task_id).await;
                (record.task_id, outcome)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((task_id, outcome)) => {
                    pending.remove(&task_id);
                    self.tally(&mut report, task_id, outcome).await;
                }
                Err(join_err) => {
                    warn!(target: "waymark::recovery", error = %join_err, "recovery task aborted");
                }
            }
        }
        for task_id in pending {
            report.failures.push((task_id, "recovery task aborted".into()));
        }

        info!(
            target: "waymark::recovery",
            examined = report.examined,
            resumed = report.resumed,
            suspended = report.suspended,
            abandoned = report.abandoned,
            failures = report.failures.len(),
            "recovery pass finished",
        );
        Ok(report)
    }

    async fn tally(
        &self,
        report: &mut RecoveryReport,
        task_id: TaskId,
        outcome: Result<ExecutionOutcome, EngineError>,
    ) {
        match outcome {
            Ok(ExecutionOutcome::Finished(_)) | Ok(ExecutionOutcome::Interrupted(_)) => {
                report.resumed += 1;
            }
            Ok(ExecutionOutcome::Suspended(_)) => {
                report.suspended += 1;
            }
            Err(EngineError::NoRecoverableState { .. }) => {
                // A row without any checkpoint cannot make progress; fail it
                // so later scans stop picking it up.
                warn!(
                    target: "waymark::recovery",
                    task_id = %task_id,
                    "no recoverable checkpoint, abandoning task",
                );
                if let Err(err) = tasks::mark_failed(
                    self.executor.store().pool(),
                    &task_id,
                    "interrupted with no recoverable state",
                )
                .await
                {
                    warn!(
                        target: "waymark::recovery",
                        task_id = %task_id,
                        error = %err,
                        "abandoned task not marked failed",
                    );
                }
                report.abandoned += 1;
            }
            Err(err) => {
                warn!(
                    target: "waymark::recovery",
                    task_id = %task_id,
                    error = %err,
                    "resumption failed",
                );
                report.failures.push((task_id, err.to_string()));
            }
        }
    }
}
