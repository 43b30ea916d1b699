//! Framework-design stage: goal and intent in, phased roadmap out.
//!
//! Produces revision 1 of the framework snapshot. Later revisions come
//! from the edit stage; this runner always writes the first one, so a
//! resumed re-run simply overwrites its own earlier attempt.

use async_trait::async_trait;
use futures_util::FutureExt;
use tracing::instrument;

use super::{StageContext, StageError, StageRunner};
use crate::agents::FrameworkRequest;
use crate::state::{StageDelta, WorkflowState};
use crate::store::snapshots;
use crate::txn::{ScopeOptions, with_scope};
use crate::types::Step;

const FIRST_REVISION: i64 = 1;

#[derive(Clone, Copy, Debug, Default)]
pub struct FrameworkDesignStage;

#[async_trait]
impl StageRunner for FrameworkDesignStage {
    fn step(&self) -> Step {
        Step::FrameworkDesign
    }

    #[instrument(skip_all, fields(task_id = %state.task_id), err)]
    async fn run(
        &self,
        state: &WorkflowState,
        ctx: &StageContext,
    ) -> Result<StageDelta, StageError> {
        let intent = state.require_intent()?.clone();
        let roadmap_id = state.require_roadmap_id()?.clone();
        let request = FrameworkRequest {
            request: state.request.clone(),
            intent,
        };

        let agent = ctx.agents.framework.clone();
        let task_id = state.task_id.clone();
        let options = ScopeOptions::new("framework_design", ctx.config.txn.scope_timeout);
        let framework = with_scope(ctx.store.pool(), options, move |scope| {
            async move {
                let framework = agent.execute(request).await?;
                snapshots::upsert(
                    scope.conn()?,
                    &roadmap_id,
                    &task_id,
                    FIRST_REVISION,
                    &framework,
                )
                .await?;
                Ok(framework)
            }
            .boxed()
        })
        .await?;

        let detail = format!(
            "{} phases, {} units",
            framework.phases.len(),
            framework.unit_count()
        );
        Ok(StageDelta::new()
            .with_framework(framework)
            .with_detail(detail))
    }
}
