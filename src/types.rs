//! Core identifiers and wire-encoded enums shared across the engine.
//!
//! Everything here crosses a boundary: steps and statuses are stored as
//! `TEXT` columns, artifact kinds become storage-key segments, and the
//! execution summary is serialized into the task record. The string forms
//! produced by [`Step::encode`], [`TaskStatus::encode`], and
//! [`ArtifactKind::encode`] are part of the persisted format; changing
//! them invalidates existing databases.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier of a workflow task (UUID v4 in production).
pub type TaskId = String;

/// Identifier of the roadmap a task produces, derived from the goal text.
pub type RoadmapId = String;

/// Identifier of a single learning unit inside a roadmap framework.
pub type UnitId = String;

/// Pipeline position of a workflow task.
///
/// The pipeline is fixed: `Init → Intent → FrameworkDesign → Validation`,
/// a bounded `Validation ⇄ Edit` loop, a `HumanReview` gate, `ContentFanout`,
/// and the two terminals. Transitions between steps are decided by
/// [`crate::router`]; this type only names the positions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Init,
    Intent,
    FrameworkDesign,
    Validation,
    Edit,
    HumanReview,
    ContentFanout,
    Completed,
    Failed,
}

impl Step {
    /// Stable string form used in database columns and log fields.
    pub fn encode(&self) -> &'static str {
        match self {
            Step::Init => "init",
            Step::Intent => "intent",
            Step::FrameworkDesign => "framework_design",
            Step::Validation => "validation",
            Step::Edit => "edit",
            Step::HumanReview => "human_review",
            Step::ContentFanout => "content_fanout",
            Step::Completed => "completed",
            Step::Failed => "failed",
        }
    }

    /// Inverse of [`Step::encode`]. Returns `None` for unknown strings.
    pub fn decode(s: &str) -> Option<Self> {
        match s {
            "init" => Some(Step::Init),
            "intent" => Some(Step::Intent),
            "framework_design" => Some(Step::FrameworkDesign),
            "validation" => Some(Step::Validation),
            "edit" => Some(Step::Edit),
            "human_review" => Some(Step::HumanReview),
            "content_fanout" => Some(Step::ContentFanout),
            "completed" => Some(Step::Completed),
            "failed" => Some(Step::Failed),
            _ => None,
        }
    }

    /// Terminal steps admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Step::Completed | Step::Failed)
    }

    /// Steps executed by a stage runner (everything except positions the
    /// executor itself manages: init, the review gate, and terminals).
    pub fn is_runnable(&self) -> bool {
        matches!(
            self,
            Step::Intent
                | Step::FrameworkDesign
                | Step::Validation
                | Step::Edit
                | Step::ContentFanout
        )
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.encode())
    }
}

/// Queryable lifecycle status of a task record.
///
/// Distinct from [`Step`]: the step says *where* in the pipeline a task is,
/// the status says *whether* anything is currently allowed or expected to
/// move it. `PartialFailure` is a terminal success with failed content
/// units recorded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    HumanReviewPending,
    Completed,
    PartialFailure,
    Failed,
}

impl TaskStatus {
    pub fn encode(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::HumanReviewPending => "human_review_pending",
            TaskStatus::Completed => "completed",
            TaskStatus::PartialFailure => "partial_failure",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn decode(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "processing" => Some(TaskStatus::Processing),
            "human_review_pending" => Some(TaskStatus::HumanReviewPending),
            "completed" => Some(TaskStatus::Completed),
            "partial_failure" => Some(TaskStatus::PartialFailure),
            "failed" => Some(TaskStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::PartialFailure | TaskStatus::Failed
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.encode())
    }
}

/// The three content artifacts generated for every learning unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Tutorial,
    Resources,
    Quiz,
}

impl ArtifactKind {
    /// All kinds, in generation order. Later kinds may reference the
    /// output of earlier ones within a unit.
    pub const ALL: [ArtifactKind; 3] = [
        ArtifactKind::Tutorial,
        ArtifactKind::Resources,
        ArtifactKind::Quiz,
    ];

    pub fn encode(&self) -> &'static str {
        match self {
            ArtifactKind::Tutorial => "tutorial",
            ArtifactKind::Resources => "resources",
            ArtifactKind::Quiz => "quiz",
        }
    }

    pub fn decode(s: &str) -> Option<Self> {
        match s {
            "tutorial" => Some(ArtifactKind::Tutorial),
            "resources" => Some(ArtifactKind::Resources),
            "quiz" => Some(ArtifactKind::Quiz),
            _ => None,
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.encode())
    }
}

/// Outcome counters for a completed fan-out, stored on the task record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    /// Units whose artifacts (fully or partially) persisted this run.
    pub succeeded: u32,
    /// Units that ended the run with zero persisted artifacts.
    pub failed: u32,
    /// Units skipped because all three artifacts already existed.
    pub skipped: u32,
    /// Wall-clock duration of the fan-out stage.
    pub duration_ms: u64,
}
