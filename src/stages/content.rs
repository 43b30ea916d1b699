//! Content fan-out stage.
//!
//! Unlike the single-call stages, this one delegates to the
//! [`ConcurrentFanoutCoordinator`] and lives with partial results: unit
//! failures land in `failed_units` and the summary counters, not in the
//! stage result. The stage itself fails only when the run ends with no
//! content at all: every attempted unit produced nothing and no unit was
//! already complete from an earlier pass. Finishing a task that never
//! generated any content would be a lie.

use async_trait::async_trait;
use tracing::instrument;

use super::{StageContext, StageError, StageRunner};
use crate::fanout::{ConcurrentFanoutCoordinator, ExistingArtifacts, FanoutReport, UnitWork};
use crate::fault::{Fault, FaultKind};
use crate::state::{StageDelta, WorkflowState};
use crate::types::Step;

/// True when the pass left the roadmap without any content: units were
/// attempted, none succeeded, and none was skipped as already complete.
/// Skipped units hold artifacts from an earlier pass, so their presence
/// downgrades an all-fail run to a partial failure instead.
fn produced_nothing(report: &FanoutReport) -> bool {
    report.attempted > 0 && report.succeeded == 0 && report.skipped == 0
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ContentFanoutStage;

#[async_trait]
impl StageRunner for ContentFanoutStage {
    fn step(&self) -> Step {
        Step::ContentFanout
    }

    #[instrument(skip_all, fields(task_id = %state.task_id), err)]
    async fn run(
        &self,
        state: &WorkflowState,
        ctx: &StageContext,
    ) -> Result<StageDelta, StageError> {
        let framework = state.require_framework()?;
        let roadmap_id = state.require_roadmap_id()?.clone();

        let work: Vec<UnitWork> = framework
            .units()
            .map(|unit| UnitWork {
                unit: unit.clone(),
                roadmap_title: framework.title.clone(),
                existing: ExistingArtifacts::for_unit(state, &unit.id),
            })
            .collect();

        let coordinator = ConcurrentFanoutCoordinator::new(
            ctx.store.clone(),
            ctx.agents.clone(),
            ctx.config.fanout.clone(),
            ctx.config.txn.scope_timeout,
            ctx.emitter.clone(),
        );
        let report = coordinator.run(&state.task_id, &roadmap_id, work).await?;

        if produced_nothing(&report) {
            return Err(StageError::Fault(Fault::engine(
                FaultKind::Unclassified,
                format!(
                    "content fan-out produced nothing: all {} attempted units failed",
                    report.attempted
                ),
            )));
        }

        let summary = report.summary();
        let detail = format!(
            "{} succeeded, {} failed, {} skipped",
            report.succeeded, report.failed, report.skipped
        );
        Ok(StageDelta::new()
            .with_tutorials(report.tutorials)
            .with_resources(report.resources)
            .with_quizzes(report.quizzes)
            .with_failed_units(report.failed_units)
            .with_summary(summary)
            .with_detail(detail))
    }
}
