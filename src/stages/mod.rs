//! Stage runners: one per runnable pipeline step.
//!
//! A stage is the unit of durable progress. Each runner makes exactly one
//! agent call and performs its writes inside one transaction scope, then
//! hands the executor a [`StageDelta`] describing how the workflow state
//! advanced. Runners never touch [`WorkflowState`] directly and never
//! decide what runs next; merging is [`WorkflowState::apply`]'s job,
//! routing is [`crate::router`]'s.

pub mod content;
pub mod edit;
pub mod framework;
pub mod intent;
pub mod validation;

pub use content::ContentFanoutStage;
pub use edit::EditStage;
pub use framework::FrameworkDesignStage;
pub use intent::IntentStage;
pub use validation::ValidationStage;

use async_trait::async_trait;
use miette::Diagnostic;
use std::sync::Arc;
use thiserror::Error;

use crate::agents::AgentSet;
use crate::config::EngineConfig;
use crate::fault::{Fault, FaultKind};
use crate::progress::ProgressEmitter;
use crate::state::{StageDelta, StateError, WorkflowState};
use crate::store::SqliteStore;
use crate::types::Step;
use crate::utils::ids::IdGenerator;

/// Everything a stage runner may depend on, assembled once by the
/// executor and shared across stages.
#[derive(Clone)]
pub struct StageContext {
    pub store: SqliteStore,
    pub agents: AgentSet,
    pub config: EngineConfig,
    pub emitter: ProgressEmitter,
    pub ids: Arc<IdGenerator>,
}

/// Why a stage execution failed.
#[derive(Debug, Error, Diagnostic)]
pub enum StageError {
    /// A required upstream output is absent from the state. Points at a
    /// pipeline-order bug or a corrupted checkpoint, not at the stage.
    #[error("missing stage input: {what}")]
    #[diagnostic(code(waymark::stages::missing_input))]
    MissingInput { what: &'static str },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Fault(#[from] Fault),
}

impl StageError {
    pub fn fault_kind(&self) -> FaultKind {
        match self {
            StageError::MissingInput { .. } => FaultKind::LocalValidation,
            StageError::Fault(fault) => fault.kind,
        }
    }

    /// Collapse into a [`Fault`] for task-failure bookkeeping.
    pub fn into_fault(self) -> Fault {
        match self {
            StageError::MissingInput { .. } => {
                Fault::engine(FaultKind::LocalValidation, self.to_string())
            }
            StageError::Fault(fault) => fault,
        }
    }
}

impl From<StateError> for StageError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::Missing { what } => StageError::MissingInput { what },
            other => StageError::Fault(Fault::engine(FaultKind::LocalValidation, other.to_string())),
        }
    }
}

/// One runnable pipeline stage.
#[async_trait]
pub trait StageRunner: Send + Sync {
    /// The step this runner implements.
    fn step(&self) -> Step;

    /// Executes the stage against a snapshot of the state.
    async fn run(&self, state: &WorkflowState, ctx: &StageContext)
    -> Result<StageDelta, StageError>;
}
