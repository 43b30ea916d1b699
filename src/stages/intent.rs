//! Intent stage: structured reading of the raw request.
//!
//! First runnable stage. Assigns the roadmap id (derived from the goal
//! text) if the state does not carry one yet, asks the intent agent for
//! its analysis, and records the id on the task row inside the same scope
//! that gates the stage's durability.

use async_trait::async_trait;
use futures_util::FutureExt;
use tracing::instrument;

use super::{StageContext, StageError, StageRunner};
use crate::state::{StageDelta, WorkflowState};
use crate::store::tasks;
use crate::txn::{ScopeOptions, with_scope};
use crate::types::Step;

#[derive(Clone, Copy, Debug, Default)]
pub struct IntentStage;

#[async_trait]
impl StageRunner for IntentStage {
    fn step(&self) -> Step {
        Step::Intent
    }

    #[instrument(skip_all, fields(task_id = %state.task_id), err)]
    async fn run(
        &self,
        state: &WorkflowState,
        ctx: &StageContext,
    ) -> Result<StageDelta, StageError> {
        let request = state.request.clone();
        // A resumed task may already carry an id from an earlier attempt;
        // re-assigning the same value is a no-op downstream.
        let roadmap_id = state
            .roadmap_id
            .clone()
            .unwrap_or_else(|| ctx.ids.roadmap_id(&request.goal));

        let agent = ctx.agents.intent.clone();
        let task_id = state.task_id.clone();
        let scoped_id = roadmap_id.clone();
        let options = ScopeOptions::new("intent", ctx.config.txn.scope_timeout);
        let intent = with_scope(ctx.store.pool(), options, move |scope| {
            async move {
                let intent = agent.execute(request).await?;
                tasks::set_roadmap_id(scope.conn()?, &task_id, &scoped_id).await?;
                Ok(intent)
            }
            .boxed()
        })
        .await?;

        let detail = intent.headline.clone();
        Ok(StageDelta::new()
            .with_roadmap_id(roadmap_id)
            .with_intent(intent)
            .with_detail(detail))
    }
}
