//! Validation stage: structural checks, then agent scoring.
//!
//! Structural problems (duplicate ids, prerequisite cycles, empty phases)
//! are caught locally and short-circuit the scoring call: a framework
//! that fails them gets a zero-score structural report and goes straight
//! back through the edit loop. Otherwise the scoring agent rates the four
//! quality dimensions and the weighted report decides validity against
//! the configured threshold. Either way the report is attached to the
//! snapshot inside the stage's scope.

use async_trait::async_trait;
use futures_util::FutureExt;
use tracing::instrument;

use super::{StageContext, StageError, StageRunner};
use crate::agents::ScoreRequest;
use crate::roadmap::ValidationReport;
use crate::state::{StageDelta, WorkflowState};
use crate::store::snapshots;
use crate::txn::{ScopeOptions, with_scope};
use crate::types::Step;

#[derive(Clone, Copy, Debug, Default)]
pub struct ValidationStage;

#[async_trait]
impl StageRunner for ValidationStage {
    fn step(&self) -> Step {
        Step::Validation
    }

    #[instrument(skip_all, fields(task_id = %state.task_id), err)]
    async fn run(
        &self,
        state: &WorkflowState,
        ctx: &StageContext,
    ) -> Result<StageDelta, StageError> {
        let framework = state.require_framework()?.clone();
        let roadmap_id = state.require_roadmap_id()?.clone();

        let structural = framework.structural_issues();
        let agent = ctx.agents.scorer.clone();
        let threshold = ctx.config.validation_threshold;
        let goal = state.request.goal.clone();
        let options = ScopeOptions::new("validation", ctx.config.txn.scope_timeout);
        let report = with_scope(ctx.store.pool(), options, move |scope| {
            async move {
                let report = if structural.is_empty() {
                    let scores = agent.execute(ScoreRequest { goal, framework }).await?;
                    ValidationReport::from_scores(&scores, threshold)
                } else {
                    ValidationReport::structural(structural)
                };
                snapshots::attach_validation(scope.conn()?, &roadmap_id, &report).await?;
                Ok(report)
            }
            .boxed()
        })
        .await?;

        let verdict = if report.valid {
            "valid"
        } else if report.structural_only {
            "structural issues"
        } else {
            "below bar"
        };
        let detail = format!("score {:.1} ({verdict})", report.score);
        Ok(StageDelta::new()
            .with_validation(report)
            .with_detail(detail))
    }
}
