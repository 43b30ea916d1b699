//! The workflow executor: drives a task through the pipeline, one durable
//! stage at a time.
//!
//! The drive loop is deliberately dumb. It hands runnable steps to their
//! stage runner, merges the returned delta, checkpoints the completed
//! position, asks the router for the successor, and goes around again
//! until it hits a terminal step, the review gate, or a requested
//! interruption point. Stages get at-least-once execution: a stage is
//! checkpointed only after its transaction committed, so a crash between
//! the two replays the stage and its idempotent writes on resume.
//!
//! Checkpoint saves along the way are best-effort (a lost save costs one
//! stage replay); the saves that record a suspension or a reviewer
//! decision are not, because losing those loses an irreplaceable fact.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use miette::Diagnostic;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::agents::AgentSet;
use crate::config::EngineConfig;
use crate::progress::{ProgressEmitter, ProgressEvent};
use crate::roadmap::RoadmapRequest;
use crate::router;
use crate::stages::{
    ContentFanoutStage, EditStage, FrameworkDesignStage, IntentStage, StageContext, StageRunner,
    ValidationStage,
};
use crate::state::{HistoryEntry, HumanDecision, WorkflowState};
use crate::store::{
    CheckpointStore, LiveStepCache, SqliteStore, StoreError, TaskRecord, tasks,
};
use crate::types::{Step, TaskId, TaskStatus};
use crate::utils::ids::IdGenerator;

/// Errors of the engine surface itself (not task failures; a task that
/// fails still yields an [`ExecutionOutcome`]).
#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    #[error("task '{task_id}' not found")]
    #[diagnostic(code(waymark::engine::task_not_found))]
    TaskNotFound { task_id: TaskId },

    #[error("no recoverable checkpoint for task '{task_id}'")]
    #[diagnostic(
        code(waymark::engine::no_recoverable_state),
        help("the task row exists but no checkpoint was ever saved")
    )]
    NoRecoverableState { task_id: TaskId },

    #[error("task '{task_id}' is not awaiting review (status is {current})")]
    #[diagnostic(code(waymark::engine::not_awaiting_review))]
    NotAwaitingReview { task_id: TaskId, current: TaskStatus },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),
}

/// How a drive ended.
#[derive(Debug)]
pub enum ExecutionOutcome {
    /// The task reached a terminal step (completed, partial, or failed).
    Finished(WorkflowState),
    /// The task parked at the review gate; resume it with
    /// [`Executor::resume_after_human_review`].
    Suspended(WorkflowState),
    /// The drive stopped at the point requested by
    /// [`ExecOptions::interrupt_after`], leaving the task exactly as a
    /// crash would.
    Interrupted(WorkflowState),
}

impl ExecutionOutcome {
    pub fn state(&self) -> &WorkflowState {
        match self {
            ExecutionOutcome::Finished(state)
            | ExecutionOutcome::Suspended(state)
            | ExecutionOutcome::Interrupted(state) => state,
        }
    }

    pub fn into_state(self) -> WorkflowState {
        match self {
            ExecutionOutcome::Finished(state)
            | ExecutionOutcome::Suspended(state)
            | ExecutionOutcome::Interrupted(state) => state,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, ExecutionOutcome::Finished(_))
    }

    pub fn is_suspended(&self) -> bool {
        matches!(self, ExecutionOutcome::Suspended(_))
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, ExecutionOutcome::Interrupted(_))
    }
}

/// Per-drive options.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExecOptions {
    /// Stop the drive right after this step completes and checkpoints.
    /// The task row stays `processing`, indistinguishable from a crash,
    /// which is the point: tests and drills exercise recovery with it.
    pub interrupt_after: Option<Step>,
}

impl ExecOptions {
    pub fn interrupt_after(step: Step) -> Self {
        Self {
            interrupt_after: Some(step),
        }
    }
}

/// Drives workflow tasks. Cheap to clone; clones share the pool, the
/// checkpoint store, and the live-step cache.
#[derive(Clone)]
pub struct Executor {
    store: SqliteStore,
    checkpoints: Arc<dyn CheckpointStore>,
    runners: Arc<[Box<dyn StageRunner>]>,
    ctx: StageContext,
    live: LiveStepCache,
}

impl Executor {
    pub fn new(
        store: SqliteStore,
        checkpoints: Arc<dyn CheckpointStore>,
        agents: AgentSet,
        config: EngineConfig,
        emitter: ProgressEmitter,
    ) -> Self {
        let ctx = StageContext {
            store: store.clone(),
            agents,
            config,
            emitter,
            ids: Arc::new(IdGenerator::new()),
        };
        let runners: Vec<Box<dyn StageRunner>> = vec![
            Box::new(IntentStage),
            Box::new(FrameworkDesignStage),
            Box::new(ValidationStage),
            Box::new(EditStage),
            Box::new(ContentFanoutStage),
        ];
        Self {
            store,
            checkpoints,
            runners: Arc::from(runners),
            ctx,
            live: LiveStepCache::new(),
        }
    }

    /// Replaces the id generator. Tests seed it for reproducible ids.
    #[must_use]
    pub fn with_ids(mut self, ids: IdGenerator) -> Self {
        self.ctx.ids = Arc::new(ids);
        self
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    pub fn checkpoints(&self) -> &Arc<dyn CheckpointStore> {
        &self.checkpoints
    }

    pub fn config(&self) -> &EngineConfig {
        &self.ctx.config
    }

    /// Step a task is executing right now, if it is running in this
    /// process. Misses mean "consult the task record".
    pub fn get_live_step(&self, task_id: &str) -> Option<Step> {
        self.live.get(task_id)
    }

    pub async fn task_record(&self, task_id: &str) -> Result<Option<TaskRecord>, EngineError> {
        Ok(tasks::get(self.store.pool(), task_id).await?)
    }

    // ===== Entry points =====

    /// Creates a task for `request` and drives it as far as it goes.
    pub async fn start(&self, request: RoadmapRequest) -> Result<ExecutionOutcome, EngineError> {
        self.start_with_options(request, ExecOptions::default())
            .await
    }

    #[instrument(skip(self, request), err)]
    pub async fn start_with_options(
        &self,
        request: RoadmapRequest,
        options: ExecOptions,
    ) -> Result<ExecutionOutcome, EngineError> {
        let task_id = self.ctx.ids.task_id();
        let record = TaskRecord::new(task_id.clone());
        tasks::create(self.store.pool(), &record).await?;
        self.ctx.emitter.emit(ProgressEvent::TaskCreated {
            task_id: task_id.clone(),
        });
        info!(target: "waymark::executor", task_id = %task_id, goal = %request.goal, "task created");

        let state = WorkflowState::new(task_id, request);
        self.drive(state, options).await
    }

    /// Resumes a task from its latest checkpoint, continuing wherever the
    /// previous drive stopped.
    pub async fn resume_from_checkpoint(
        &self,
        task_id: &str,
    ) -> Result<ExecutionOutcome, EngineError> {
        self.resume_from_checkpoint_with_options(task_id, ExecOptions::default())
            .await
    }

    #[instrument(skip(self), err)]
    pub async fn resume_from_checkpoint_with_options(
        &self,
        task_id: &str,
        options: ExecOptions,
    ) -> Result<ExecutionOutcome, EngineError> {
        let record = self.require_record(task_id).await?;
        let mut state = self
            .checkpoints
            .load_latest(task_id)
            .await?
            .ok_or_else(|| EngineError::NoRecoverableState {
                task_id: task_id.to_string(),
            })?;

        if record.status.is_terminal() {
            // Nothing left to drive; hand back the final state as-is.
            return Ok(ExecutionOutcome::Finished(state));
        }

        // The checkpoint records the last completed position; the router
        // decides where the drive picks up.
        state.current_step = router::successor(&state, &self.ctx.config);
        info!(
            target: "waymark::executor",
            task_id,
            step = %state.current_step,
            "resuming from checkpoint",
        );
        self.drive(state, options).await
    }

    /// Records the reviewer's verdict on a suspended task and drives on:
    /// approval releases the content fan-out, rejection re-enters the
    /// edit loop with the feedback attached.
    pub async fn resume_after_human_review(
        &self,
        task_id: &str,
        approved: bool,
        feedback: Option<String>,
    ) -> Result<ExecutionOutcome, EngineError> {
        self.resume_after_human_review_with_options(
            task_id,
            approved,
            feedback,
            ExecOptions::default(),
        )
        .await
    }

    #[instrument(skip(self, feedback), err)]
    pub async fn resume_after_human_review_with_options(
        &self,
        task_id: &str,
        approved: bool,
        feedback: Option<String>,
        options: ExecOptions,
    ) -> Result<ExecutionOutcome, EngineError> {
        let record = self.require_record(task_id).await?;
        if record.status != TaskStatus::HumanReviewPending {
            return Err(EngineError::NotAwaitingReview {
                task_id: task_id.to_string(),
                current: record.status,
            });
        }
        let mut state = self
            .checkpoints
            .load_latest(task_id)
            .await?
            .ok_or_else(|| EngineError::NoRecoverableState {
                task_id: task_id.to_string(),
            })?;

        let detail = if approved {
            "approved".to_string()
        } else {
            match &feedback {
                Some(feedback) => format!("rejected: {feedback}"),
                None => "rejected".to_string(),
            }
        };
        state.human_approved = Some(HumanDecision {
            approved,
            feedback,
            decided_at: Utc::now(),
        });
        state
            .history
            .push(HistoryEntry::new(Step::HumanReview, true, Some(detail), Duration::ZERO));

        // The decision is irreplaceable; this save must not be lost.
        self.checkpoints.save(&state).await?;
        self.ctx.emitter.emit(ProgressEvent::HumanDecisionRecorded {
            task_id: task_id.to_string(),
            approved,
        });

        self.drive(state, options).await
    }

    // ===== Drive loop =====

    async fn drive(
        &self,
        mut state: WorkflowState,
        options: ExecOptions,
    ) -> Result<ExecutionOutcome, EngineError> {
        tasks::set_status(self.store.pool(), &state.task_id, TaskStatus::Processing).await?;

        loop {
            let step = state.current_step;
            self.live.set(&state.task_id, step);

            if step.is_terminal() {
                return self.finalize(state).await;
            }

            if step == Step::HumanReview && state.human_approved.is_none() {
                return self.suspend_for_review(state).await;
            }

            if step.is_runnable() {
                let started = Instant::now();
                let delta = match self.runner_for(step).run(&state, &self.ctx).await {
                    Ok(delta) => delta,
                    Err(err) => {
                        let fault = err.into_fault();
                        state.history.push(HistoryEntry::new(
                            step,
                            false,
                            Some(fault.to_string()),
                            started.elapsed(),
                        ));
                        return self.fail_task(state, step, fault).await;
                    }
                };
                let duration = started.elapsed();
                let detail = delta.detail.clone();
                let summary = delta.summary;

                if let Err(err) = state.apply(delta) {
                    let fault = crate::stages::StageError::from(err).into_fault();
                    state.history.push(HistoryEntry::new(
                        step,
                        false,
                        Some(fault.to_string()),
                        duration,
                    ));
                    return self.fail_task(state, step, fault).await;
                }
                state
                    .history
                    .push(HistoryEntry::new(step, true, detail, duration));

                if let Some(summary) = summary
                    && let Err(err) =
                        tasks::set_summary(self.store.pool(), &state.task_id, &summary).await
                {
                    warn!(
                        target: "waymark::executor",
                        task_id = %state.task_id,
                        error = %err,
                        "execution summary not persisted",
                    );
                }

                self.persist_position(&state).await;
                self.ctx.emitter.emit(ProgressEvent::StageCompleted {
                    task_id: state.task_id.clone(),
                    step,
                    duration_ms: duration.as_millis() as u64,
                });
                state.current_step = router::successor(&state, &self.ctx.config);

                if options.interrupt_after == Some(step) {
                    self.live.evict(&state.task_id);
                    info!(
                        target: "waymark::executor",
                        task_id = %state.task_id,
                        after = %step,
                        "drive interrupted on request",
                    );
                    return Ok(ExecutionOutcome::Interrupted(state));
                }
            } else {
                // Init, or the gate with a decision recorded: nothing ran, so
                // there is nothing new to checkpoint. Advance only.
                state.current_step = router::successor(&state, &self.ctx.config);
                if options.interrupt_after == Some(step) {
                    self.live.evict(&state.task_id);
                    return Ok(ExecutionOutcome::Interrupted(state));
                }
            }
        }
    }

    fn runner_for(&self, step: Step) -> &dyn StageRunner {
        // The runner table covers every runnable step; `is_runnable` is
        // checked before dispatch.
        self.runners
            .iter()
            .find(|runner| runner.step() == step)
            .map(|runner| &**runner)
            .unwrap_or_else(|| unreachable!("no runner registered for step {step}"))
    }

    // ===== Exits =====

    async fn suspend_for_review(
        &self,
        mut state: WorkflowState,
    ) -> Result<ExecutionOutcome, EngineError> {
        let already_pending = state
            .history
            .last()
            .is_some_and(|entry| entry.step == Step::HumanReview && !entry.completed);
        if !already_pending {
            state.history.push(HistoryEntry::new(
                Step::HumanReview,
                false,
                Some("awaiting reviewer decision".into()),
                Duration::ZERO,
            ));
        }

        // Suspension must be durable before the status says "waiting".
        self.checkpoints.save(&state).await?;
        tasks::transition(
            self.store.pool(),
            &state.task_id,
            TaskStatus::HumanReviewPending,
            Step::HumanReview,
        )
        .await?;
        self.ctx.emitter.emit(ProgressEvent::AwaitingHumanReview {
            task_id: state.task_id.clone(),
        });
        self.live.evict(&state.task_id);
        info!(target: "waymark::executor", task_id = %state.task_id, "suspended for review");
        Ok(ExecutionOutcome::Suspended(state))
    }

    async fn fail_task(
        &self,
        mut state: WorkflowState,
        step: Step,
        fault: crate::fault::Fault,
    ) -> Result<ExecutionOutcome, EngineError> {
        state.current_step = Step::Failed;
        if let Err(err) = self.checkpoints.save(&state).await {
            warn!(
                target: "waymark::executor",
                task_id = %state.task_id,
                error = %err,
                "failure checkpoint not saved",
            );
        }
        let message = fault.to_string();
        tasks::mark_failed(self.store.pool(), &state.task_id, &message).await?;
        self.ctx.emitter.emit(ProgressEvent::StageFailed {
            task_id: state.task_id.clone(),
            step,
            message: message.clone(),
        });
        self.ctx.emitter.emit(ProgressEvent::TaskFailed {
            task_id: state.task_id.clone(),
            message,
        });
        self.live.evict(&state.task_id);
        warn!(
            target: "waymark::executor",
            task_id = %state.task_id,
            step = %step,
            kind = %fault.kind,
            "task failed",
        );
        Ok(ExecutionOutcome::Finished(state))
    }

    async fn finalize(&self, state: WorkflowState) -> Result<ExecutionOutcome, EngineError> {
        if state.current_step == Step::Failed {
            // Replay of an already-failed checkpoint; the row and events
            // were settled when the failure happened.
            tasks::transition(
                self.store.pool(),
                &state.task_id,
                TaskStatus::Failed,
                Step::Failed,
            )
            .await?;
            self.live.evict(&state.task_id);
            return Ok(ExecutionOutcome::Finished(state));
        }

        let status = if state.failed_units.is_empty() {
            TaskStatus::Completed
        } else {
            TaskStatus::PartialFailure
        };
        if let Err(err) = self.checkpoints.save(&state).await {
            warn!(
                target: "waymark::executor",
                task_id = %state.task_id,
                error = %err,
                "final checkpoint not saved",
            );
        }
        tasks::transition(self.store.pool(), &state.task_id, status, state.current_step).await?;
        self.ctx.emitter.emit(ProgressEvent::TaskCompleted {
            task_id: state.task_id.clone(),
            status,
        });
        self.live.evict(&state.task_id);
        info!(
            target: "waymark::executor",
            task_id = %state.task_id,
            status = %status,
            artifacts = state.artifact_count(),
            "task finished",
        );
        Ok(ExecutionOutcome::Finished(state))
    }

    /// Best-effort persistence of the completed position. A lost save only
    /// costs a stage replay on resume.
    async fn persist_position(&self, state: &WorkflowState) {
        if let Err(err) = self.checkpoints.save(state).await {
            warn!(
                target: "waymark::executor",
                task_id = %state.task_id,
                error = %err,
                "checkpoint save failed; resume will replay the last stage",
            );
        }
        if let Err(err) =
            tasks::set_current_step(self.store.pool(), &state.task_id, state.current_step).await
        {
            warn!(
                target: "waymark::executor",
                task_id = %state.task_id,
                error = %err,
                "task step column not updated",
            );
        }
    }

    async fn require_record(&self, task_id: &str) -> Result<TaskRecord, EngineError> {
        tasks::get(self.store.pool(), task_id)
            .await?
            .ok_or_else(|| EngineError::TaskNotFound {
                task_id: task_id.to_string(),
            })
    }
}
