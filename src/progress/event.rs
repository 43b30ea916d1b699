//! The progress event vocabulary.

use crate::types::{Step, TaskId, TaskStatus, UnitId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Observable milestones of a task's execution.
///
/// Stage-level events follow a strict contract: per stage execution the
/// executor emits exactly one of `StageCompleted` / `StageFailed`. Unit
/// events come from the fan-out coordinator: one `UnitStarted` and exactly
/// one of `UnitCompleted` / `UnitFailed` per attempted unit, with
/// `UnitFullyComplete` added only when all three artifacts exist.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgressEvent {
    TaskCreated {
        task_id: TaskId,
    },
    StageCompleted {
        task_id: TaskId,
        step: Step,
        duration_ms: u64,
    },
    StageFailed {
        task_id: TaskId,
        step: Step,
        message: String,
    },
    AwaitingHumanReview {
        task_id: TaskId,
    },
    HumanDecisionRecorded {
        task_id: TaskId,
        approved: bool,
    },
    UnitStarted {
        task_id: TaskId,
        unit_id: UnitId,
        ordinal: usize,
        total: usize,
    },
    UnitCompleted {
        task_id: TaskId,
        unit_id: UnitId,
        /// Artifacts persisted by this run (pre-existing ones excluded).
        produced: usize,
    },
    UnitFullyComplete {
        task_id: TaskId,
        unit_id: UnitId,
    },
    UnitFailed {
        task_id: TaskId,
        unit_id: UnitId,
        message: String,
    },
    TaskCompleted {
        task_id: TaskId,
        status: TaskStatus,
    },
    TaskFailed {
        task_id: TaskId,
        message: String,
    },
}

impl ProgressEvent {
    pub fn task_id(&self) -> &str {
        match self {
            ProgressEvent::TaskCreated { task_id }
            | ProgressEvent::StageCompleted { task_id, .. }
            | ProgressEvent::StageFailed { task_id, .. }
            | ProgressEvent::AwaitingHumanReview { task_id }
            | ProgressEvent::HumanDecisionRecorded { task_id, .. }
            | ProgressEvent::UnitStarted { task_id, .. }
            | ProgressEvent::UnitCompleted { task_id, .. }
            | ProgressEvent::UnitFullyComplete { task_id, .. }
            | ProgressEvent::UnitFailed { task_id, .. }
            | ProgressEvent::TaskCompleted { task_id, .. }
            | ProgressEvent::TaskFailed { task_id, .. } => task_id,
        }
    }

    /// Stable name for log fields and counters.
    pub fn label(&self) -> &'static str {
        match self {
            ProgressEvent::TaskCreated { .. } => "task_created",
            ProgressEvent::StageCompleted { .. } => "stage_completed",
            ProgressEvent::StageFailed { .. } => "stage_failed",
            ProgressEvent::AwaitingHumanReview { .. } => "awaiting_human_review",
            ProgressEvent::HumanDecisionRecorded { .. } => "human_decision_recorded",
            ProgressEvent::UnitStarted { .. } => "unit_started",
            ProgressEvent::UnitCompleted { .. } => "unit_completed",
            ProgressEvent::UnitFullyComplete { .. } => "unit_fully_complete",
            ProgressEvent::UnitFailed { .. } => "unit_failed",
            ProgressEvent::TaskCompleted { .. } => "task_completed",
            ProgressEvent::TaskFailed { .. } => "task_failed",
        }
    }
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressEvent::TaskCreated { task_id } => write!(f, "[{task_id}] task created"),
            ProgressEvent::StageCompleted {
                task_id,
                step,
                duration_ms,
            } => write!(f, "[{task_id}] stage {step} completed in {duration_ms}ms"),
            ProgressEvent::StageFailed {
                task_id,
                step,
                message,
            } => write!(f, "[{task_id}] stage {step} failed: {message}"),
            ProgressEvent::AwaitingHumanReview { task_id } => {
                write!(f, "[{task_id}] awaiting human review")
            }
            ProgressEvent::HumanDecisionRecorded { task_id, approved } => {
                let verdict = if *approved { "approved" } else { "rejected" };
                write!(f, "[{task_id}] human decision recorded: {verdict}")
            }
            ProgressEvent::UnitStarted {
                task_id,
                unit_id,
                ordinal,
                total,
            } => write!(f, "[{task_id}] unit {unit_id} started ({ordinal}/{total})"),
            ProgressEvent::UnitCompleted {
                task_id,
                unit_id,
                produced,
            } => write!(
                f,
                "[{task_id}] unit {unit_id} completed ({produced} artifacts persisted)"
            ),
            ProgressEvent::UnitFullyComplete { task_id, unit_id } => {
                write!(f, "[{task_id}] unit {unit_id} fully complete")
            }
            ProgressEvent::UnitFailed {
                task_id,
                unit_id,
                message,
            } => write!(f, "[{task_id}] unit {unit_id} failed: {message}"),
            ProgressEvent::TaskCompleted { task_id, status } => {
                write!(f, "[{task_id}] task completed with status {status}")
            }
            ProgressEvent::TaskFailed { task_id, message } => {
                write!(f, "[{task_id}] task failed: {message}")
            }
        }
    }
}
