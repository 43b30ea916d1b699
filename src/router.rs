//! Pure routing: which step follows the current one.
//!
//! The pipeline shape is fixed, so routing is a total function of the
//! state and configuration: no I/O, no clocks. The executor is the only
//! caller; tests exercise the table directly.
//!
//! ```text
//! init → intent → framework_design → validation ──valid──► human_review
//!                        ▲                │
//!                        └──── edit ◄─────┘ invalid & count < max
//!                                          invalid & count ≥ max ──► human_review
//! human_review: approved ──► content_fanout → completed
//!               rejected ──► edit (loop re-entered)
//! ```

use crate::config::EngineConfig;
use crate::state::WorkflowState;
use crate::types::Step;

/// Route taken when a validation report lands.
///
/// A valid framework proceeds to review. An invalid one loops back to the
/// edit stage until the modification budget is spent, after which the
/// pipeline is forced onward; a human decides what to do with a framework
/// that never converged.
pub fn route_after_validation(valid: bool, modification_count: u32, max_modifications: u32) -> Step {
    if valid || modification_count >= max_modifications {
        Step::HumanReview
    } else {
        Step::Edit
    }
}

/// Route taken once a reviewer decides. Approval releases the fan-out;
/// rejection re-enters the edit loop carrying the reviewer's feedback.
pub fn route_after_human_review(approved: bool) -> Step {
    if approved {
        Step::ContentFanout
    } else {
        Step::Edit
    }
}

/// Successor of the state's current step.
///
/// Terminal steps map to themselves. `HumanReview` maps to itself while no
/// decision is recorded; the executor treats that as "suspend again".
pub fn successor(state: &WorkflowState, config: &EngineConfig) -> Step {
    match state.current_step {
        Step::Init => Step::Intent,
        Step::Intent => Step::FrameworkDesign,
        Step::FrameworkDesign => Step::Validation,
        Step::Validation => {
            let valid = state.validation.as_ref().is_some_and(|report| report.valid);
            route_after_validation(valid, state.modification_count, config.max_modifications)
        }
        Step::Edit => Step::Validation,
        Step::HumanReview => match &state.human_approved {
            Some(decision) => route_after_human_review(decision.approved),
            None => Step::HumanReview,
        },
        Step::ContentFanout => Step::Completed,
        Step::Completed => Step::Completed,
        Step::Failed => Step::Failed,
    }
}
