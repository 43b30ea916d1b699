//! Edit stage: one bounded revision of the framework.
//!
//! Entered from a failed validation or from a reviewer rejection. Hands
//! the reviser agent the current framework, the open validation issues,
//! and any reviewer feedback, then stores the result as the next snapshot
//! revision (which clears the now-stale validation report). Every pass
//! bumps the modification counter the router bounds the loop with, and
//! wipes the recorded human decision so the reworked framework faces a
//! fresh review.

use async_trait::async_trait;
use futures_util::FutureExt;
use tracing::instrument;

use super::{StageContext, StageError, StageRunner};
use crate::agents::RevisionRequest;
use crate::state::{StageDelta, WorkflowState};
use crate::store::snapshots;
use crate::txn::{ScopeOptions, with_scope};
use crate::types::Step;

#[derive(Clone, Copy, Debug, Default)]
pub struct EditStage;

#[async_trait]
impl StageRunner for EditStage {
    fn step(&self) -> Step {
        Step::Edit
    }

    #[instrument(skip_all, fields(task_id = %state.task_id), err)]
    async fn run(
        &self,
        state: &WorkflowState,
        ctx: &StageContext,
    ) -> Result<StageDelta, StageError> {
        let framework = state.require_framework()?.clone();
        let roadmap_id = state.require_roadmap_id()?.clone();
        let issues = state
            .validation
            .as_ref()
            .map(|report| report.issues.clone())
            .unwrap_or_default();
        let feedback = state
            .human_approved
            .as_ref()
            .and_then(|decision| decision.feedback.clone());

        let request = RevisionRequest {
            framework,
            issues,
            feedback,
        };
        let agent = ctx.agents.reviser.clone();
        let task_id = state.task_id.clone();
        let options = ScopeOptions::new("edit", ctx.config.txn.scope_timeout);
        let (revised, revision) = with_scope(ctx.store.pool(), options, move |scope| {
            async move {
                let revised = agent.execute(request).await?;
                let revision = snapshots::current_revision(scope.conn()?, &roadmap_id)
                    .await?
                    .unwrap_or(0)
                    + 1;
                snapshots::upsert(scope.conn()?, &roadmap_id, &task_id, revision, &revised)
                    .await?;
                Ok((revised, revision))
            }
            .boxed()
        })
        .await?;

        Ok(StageDelta::new()
            .with_framework(revised)
            .bump_modification()
            .clear_human_decision()
            .with_detail(format!("revision {revision}")))
    }
}
