//! Workflow state: the single evolving record of one roadmap-generation
//! task, plus the delta type stages produce.
//!
//! [`WorkflowState`] is what checkpoints serialize: resuming a task is
//! nothing more than deserializing the latest checkpoint and routing
//! onward from `current_step`. Stages never mutate state directly; they
//! return a [`StageDelta`] and the executor merges it with
//! [`WorkflowState::apply`], which enforces the merge rules (maps extend,
//! options replace, the roadmap id is assigned once, per-unit entries
//! must reference framework units).

use crate::roadmap::{
    ArtifactRef, IntentAnalysis, RoadmapFramework, RoadmapRequest, ValidationReport,
};
use crate::types::{ArtifactKind, ExecutionSummary, RoadmapId, Step, TaskId, UnitId};
use chrono::{DateTime, Utc};
use miette::Diagnostic;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors raised while merging a [`StageDelta`] or reading required state.
#[derive(Debug, Error, Diagnostic, PartialEq, Eq)]
pub enum StateError {
    #[error("missing expected state: {what}")]
    #[diagnostic(
        code(waymark::state::missing),
        help("an earlier stage should have produced this; the pipeline order is fixed")
    )]
    Missing { what: &'static str },

    #[error("delta references unknown unit '{unit_id}'")]
    #[diagnostic(
        code(waymark::state::unknown_unit),
        help("per-unit outputs must target units present in the framework")
    )]
    UnknownUnit { unit_id: UnitId },

    #[error("roadmap id already assigned ('{existing}', delta carried '{incoming}')")]
    #[diagnostic(code(waymark::state::roadmap_id_reassigned))]
    RoadmapIdReassigned {
        existing: RoadmapId,
        incoming: RoadmapId,
    },
}

/// Reviewer verdict recorded at the human-review gate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HumanDecision {
    pub approved: bool,
    /// Reviewer feedback; fed to the edit stage on rejection.
    pub feedback: Option<String>,
    pub decided_at: DateTime<Utc>,
}

/// One entry in the append-only execution history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub step: Step,
    /// False for stage failures and for the pending half of the review gate.
    pub completed: bool,
    pub detail: Option<String>,
    pub at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl HistoryEntry {
    pub fn new(step: Step, completed: bool, detail: Option<String>, duration: Duration) -> Self {
        Self {
            step,
            completed,
            detail,
            at: Utc::now(),
            duration_ms: duration.as_millis() as u64,
        }
    }
}

/// Full durable state of one workflow task.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub task_id: TaskId,
    pub request: RoadmapRequest,
    /// Assigned once by the intent stage, never reassigned.
    pub roadmap_id: Option<RoadmapId>,
    pub intent: Option<IntentAnalysis>,
    pub framework: Option<RoadmapFramework>,
    /// Report for the *current* framework revision; refreshed every
    /// validation pass, stale while an edit is in flight.
    pub validation: Option<ValidationReport>,
    pub tutorials: FxHashMap<UnitId, ArtifactRef>,
    pub resources: FxHashMap<UnitId, ArtifactRef>,
    pub quizzes: FxHashMap<UnitId, ArtifactRef>,
    /// Units that ended fan-out with zero persisted artifacts.
    pub failed_units: FxHashSet<UnitId>,
    pub current_step: Step,
    /// Monotonic count of edit-stage executions.
    pub modification_count: u32,
    /// None until a reviewer decides; cleared when an edit re-enters the loop.
    pub human_approved: Option<HumanDecision>,
    pub history: Vec<HistoryEntry>,
}

impl WorkflowState {
    pub fn new(task_id: TaskId, request: RoadmapRequest) -> Self {
        Self {
            task_id,
            request,
            roadmap_id: None,
            intent: None,
            framework: None,
            validation: None,
            tutorials: FxHashMap::default(),
            resources: FxHashMap::default(),
            quizzes: FxHashMap::default(),
            failed_units: FxHashSet::default(),
            current_step: Step::Init,
            modification_count: 0,
            human_approved: None,
            history: Vec::new(),
        }
    }

    /// Merge a stage's delta into the state.
    ///
    /// Option fields replace, map fields extend, flags mutate counters.
    /// Per-unit entries are checked against the framework *after* any
    /// framework replacement in the same delta has been applied.
    pub fn apply(&mut self, delta: StageDelta) -> Result<(), StateError> {
        if let Some(incoming) = delta.roadmap_id {
            match &self.roadmap_id {
                Some(existing) if *existing != incoming => {
                    return Err(StateError::RoadmapIdReassigned {
                        existing: existing.clone(),
                        incoming,
                    });
                }
                _ => self.roadmap_id = Some(incoming),
            }
        }
        if let Some(intent) = delta.intent {
            self.intent = Some(intent);
        }
        if let Some(framework) = delta.framework {
            self.framework = Some(framework);
        }
        if let Some(validation) = delta.validation {
            self.validation = Some(validation);
        }

        let has_unit_entries = delta.tutorials.as_ref().is_some_and(|m| !m.is_empty())
            || delta.resources.as_ref().is_some_and(|m| !m.is_empty())
            || delta.quizzes.as_ref().is_some_and(|m| !m.is_empty())
            || delta.failed_units.as_ref().is_some_and(|s| !s.is_empty());
        if has_unit_entries {
            let framework = self
                .framework
                .as_ref()
                .ok_or(StateError::Missing { what: "framework" })?;
            for map in [&delta.tutorials, &delta.resources, &delta.quizzes] {
                if let Some(map) = map {
                    for unit_id in map.keys() {
                        if !framework.contains_unit(unit_id) {
                            return Err(StateError::UnknownUnit {
                                unit_id: unit_id.clone(),
                            });
                        }
                    }
                }
            }
            if let Some(failed) = &delta.failed_units {
                for unit_id in failed {
                    if !framework.contains_unit(unit_id) {
                        return Err(StateError::UnknownUnit {
                            unit_id: unit_id.clone(),
                        });
                    }
                }
            }
        }

        if let Some(tutorials) = delta.tutorials {
            self.tutorials.extend(tutorials);
        }
        if let Some(resources) = delta.resources {
            self.resources.extend(resources);
        }
        if let Some(quizzes) = delta.quizzes {
            self.quizzes.extend(quizzes);
        }
        if let Some(failed) = delta.failed_units {
            self.failed_units.extend(failed);
        }
        if delta.bump_modification {
            self.modification_count += 1;
        }
        if delta.clear_human_decision {
            self.human_approved = None;
        }
        Ok(())
    }

    // ===== Required-input accessors =====

    pub fn require_intent(&self) -> Result<&IntentAnalysis, StateError> {
        self.intent
            .as_ref()
            .ok_or(StateError::Missing { what: "intent" })
    }

    pub fn require_framework(&self) -> Result<&RoadmapFramework, StateError> {
        self.framework
            .as_ref()
            .ok_or(StateError::Missing { what: "framework" })
    }

    pub fn require_validation(&self) -> Result<&ValidationReport, StateError> {
        self.validation
            .as_ref()
            .ok_or(StateError::Missing { what: "validation report" })
    }

    pub fn require_roadmap_id(&self) -> Result<&RoadmapId, StateError> {
        self.roadmap_id
            .as_ref()
            .ok_or(StateError::Missing { what: "roadmap id" })
    }

    // ===== Artifact bookkeeping =====

    pub fn has_artifact(&self, kind: ArtifactKind, unit_id: &str) -> bool {
        match kind {
            ArtifactKind::Tutorial => self.tutorials.contains_key(unit_id),
            ArtifactKind::Resources => self.resources.contains_key(unit_id),
            ArtifactKind::Quiz => self.quizzes.contains_key(unit_id),
        }
    }

    /// True when all three artifact kinds exist for the unit.
    pub fn unit_is_complete(&self, unit_id: &str) -> bool {
        ArtifactKind::ALL
            .iter()
            .all(|kind| self.has_artifact(*kind, unit_id))
    }

    /// Total artifact references across all kinds.
    pub fn artifact_count(&self) -> usize {
        self.tutorials.len() + self.resources.len() + self.quizzes.len()
    }
}

/// Partial update produced by one stage execution.
///
/// `None` fields leave the state untouched. Construction follows the
/// builder idiom: `StageDelta::new().with_intent(..).with_detail(..)`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StageDelta {
    pub roadmap_id: Option<RoadmapId>,
    pub intent: Option<IntentAnalysis>,
    pub framework: Option<RoadmapFramework>,
    pub validation: Option<ValidationReport>,
    pub tutorials: Option<FxHashMap<UnitId, ArtifactRef>>,
    pub resources: Option<FxHashMap<UnitId, ArtifactRef>>,
    pub quizzes: Option<FxHashMap<UnitId, ArtifactRef>>,
    pub failed_units: Option<FxHashSet<UnitId>>,
    /// Increment the modification counter (set by the edit stage).
    pub bump_modification: bool,
    /// Clear the recorded human decision (set when an edit re-enters the
    /// validation loop after a rejection).
    pub clear_human_decision: bool,
    /// Fan-out outcome counters, persisted onto the task record.
    pub summary: Option<ExecutionSummary>,
    /// Short human-readable note for the history entry.
    pub detail: Option<String>,
}

impl StageDelta {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_roadmap_id(mut self, roadmap_id: impl Into<RoadmapId>) -> Self {
        self.roadmap_id = Some(roadmap_id.into());
        self
    }

    #[must_use]
    pub fn with_intent(mut self, intent: IntentAnalysis) -> Self {
        self.intent = Some(intent);
        self
    }

    #[must_use]
    pub fn with_framework(mut self, framework: RoadmapFramework) -> Self {
        self.framework = Some(framework);
        self
    }

    #[must_use]
    pub fn with_validation(mut self, validation: ValidationReport) -> Self {
        self.validation = Some(validation);
        self
    }

    #[must_use]
    pub fn with_tutorials(mut self, tutorials: FxHashMap<UnitId, ArtifactRef>) -> Self {
        self.tutorials = Some(tutorials);
        self
    }

    #[must_use]
    pub fn with_resources(mut self, resources: FxHashMap<UnitId, ArtifactRef>) -> Self {
        self.resources = Some(resources);
        self
    }

    #[must_use]
    pub fn with_quizzes(mut self, quizzes: FxHashMap<UnitId, ArtifactRef>) -> Self {
        self.quizzes = Some(quizzes);
        self
    }

    #[must_use]
    pub fn with_failed_units(mut self, failed_units: FxHashSet<UnitId>) -> Self {
        self.failed_units = Some(failed_units);
        self
    }

    #[must_use]
    pub fn bump_modification(mut self) -> Self {
        self.bump_modification = true;
        self
    }

    #[must_use]
    pub fn clear_human_decision(mut self) -> Self {
        self.clear_human_decision = true;
        self
    }

    #[must_use]
    pub fn with_summary(mut self, summary: ExecutionSummary) -> Self {
        self.summary = Some(summary);
        self
    }

    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}
