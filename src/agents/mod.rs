//! Agent seam: the trait stage runners call, the set of seven agents the
//! pipeline needs, and the error type agent implementations speak.
//!
//! The engine never talks to a model provider directly. Stages depend on
//! [`Agent`] (typed input in, typed output out) and a concrete backend
//! is plugged in per deployment: [`adapter::JsonAgent`] over any
//! [`adapter::TextCompletion`] in production, scripted closures in tests.

pub mod adapter;

pub use adapter::{JsonAgent, TextCompletion};

use crate::fault::{Fault, FaultKind};
use crate::roadmap::{
    IntentAnalysis, Quiz, QualityScores, ResourceList, RoadmapFramework, RoadmapRequest,
    TutorialDoc, Unit, ValidationIssue,
};
use async_trait::async_trait;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// One typed, side-effect-free agent call.
///
/// Implementations must be cheap to share; the engine holds each agent
/// behind an [`Arc`] and calls it from concurrent unit tasks during
/// fan-out.
#[async_trait]
pub trait Agent<I, O>: Send + Sync
where
    I: Send + 'static,
    O: Send + 'static,
{
    async fn execute(&self, input: I) -> Result<O, AgentError>;
}

pub type DynAgent<I, O> = Arc<dyn Agent<I, O>>;

/// Failure modes of an agent call.
#[derive(Debug, Error, Diagnostic)]
pub enum AgentError {
    /// The backend failed to produce a reply. The implementor classifies
    /// the failure; the kind drives retry and rollback decisions upstream.
    #[error("provider call failed ({kind}): {message}")]
    #[diagnostic(code(waymark::agents::provider))]
    Provider { kind: FaultKind, message: String },

    /// A reply arrived but no payload of the expected shape could be
    /// recovered from it.
    #[error("malformed agent output: {detail}")]
    #[diagnostic(
        code(waymark::agents::malformed_output),
        help("the engine retries transient faults, not malformed replies")
    )]
    MalformedOutput { detail: String },

    /// The call exceeded its deadline.
    #[error("agent call timed out after {elapsed_ms}ms")]
    #[diagnostic(code(waymark::agents::timeout))]
    Timeout { elapsed_ms: u64 },
}

impl AgentError {
    /// Provider failure worth retrying (rate limit, momentary overload).
    pub fn rate_limited(message: impl Into<String>) -> Self {
        AgentError::Provider {
            kind: FaultKind::Transient,
            message: message.into(),
        }
    }

    /// Provider unreachable or connection dropped.
    pub fn unreachable(message: impl Into<String>) -> Self {
        AgentError::Provider {
            kind: FaultKind::Connectivity,
            message: message.into(),
        }
    }

    /// Hard capacity limit (quota, budget); never retried.
    pub fn exhausted(message: impl Into<String>) -> Self {
        AgentError::Provider {
            kind: FaultKind::ResourceExhaustion,
            message: message.into(),
        }
    }

    pub fn fault_kind(&self) -> FaultKind {
        match self {
            AgentError::Provider { kind, .. } => *kind,
            AgentError::MalformedOutput { .. } => FaultKind::LocalValidation,
            AgentError::Timeout { .. } => FaultKind::Timeout,
        }
    }
}

impl From<AgentError> for Fault {
    fn from(err: AgentError) -> Self {
        Fault::agent(err.fault_kind(), err.to_string())
    }
}

// ===== Request payloads =====

/// Input to the framework-design agent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameworkRequest {
    pub request: RoadmapRequest,
    pub intent: IntentAnalysis,
}

/// Input to the reviser agent: the framework to rework plus everything
/// known about why it needs reworking.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RevisionRequest {
    pub framework: RoadmapFramework,
    pub issues: Vec<ValidationIssue>,
    /// Reviewer feedback when the revision follows a human rejection.
    pub feedback: Option<String>,
}

/// Input to the scoring agent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreRequest {
    pub goal: String,
    pub framework: RoadmapFramework,
}

/// Input to the tutorial agent, one unit at a time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TutorialRequest {
    pub roadmap_title: String,
    pub unit: Unit,
}

/// Input to the resource-curation agent. Carries the freshly generated
/// tutorial (when one exists) so resources can complement it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequest {
    pub unit: Unit,
    pub tutorial: Option<TutorialDoc>,
}

/// Input to the quiz agent. Sees the unit's earlier artifacts so questions
/// can target what was actually taught.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizRequest {
    pub unit: Unit,
    pub tutorial: Option<TutorialDoc>,
    pub resources: Option<ResourceList>,
}

// ===== The agent set =====

/// The seven agents the pipeline calls, grouped for injection.
#[derive(Clone)]
pub struct AgentSet {
    pub intent: DynAgent<RoadmapRequest, IntentAnalysis>,
    pub framework: DynAgent<FrameworkRequest, RoadmapFramework>,
    pub reviser: DynAgent<RevisionRequest, RoadmapFramework>,
    pub scorer: DynAgent<ScoreRequest, QualityScores>,
    pub tutorial: DynAgent<TutorialRequest, TutorialDoc>,
    pub resources: DynAgent<ResourceRequest, ResourceList>,
    pub quiz: DynAgent<QuizRequest, Quiz>,
}

impl AgentSet {
    /// Wire all seven agents to one text-completion backend via
    /// [`JsonAgent`], with the stock instruction prompts.
    pub fn from_text_backend(backend: Arc<dyn TextCompletion>) -> Self {
        Self {
            intent: Arc::new(JsonAgent::new(backend.clone(), INTENT_INSTRUCTIONS)),
            framework: Arc::new(JsonAgent::new(backend.clone(), FRAMEWORK_INSTRUCTIONS)),
            reviser: Arc::new(JsonAgent::new(backend.clone(), REVISION_INSTRUCTIONS)),
            scorer: Arc::new(JsonAgent::new(backend.clone(), SCORE_INSTRUCTIONS)),
            tutorial: Arc::new(JsonAgent::new(backend.clone(), TUTORIAL_INSTRUCTIONS)),
            resources: Arc::new(JsonAgent::new(backend.clone(), RESOURCES_INSTRUCTIONS)),
            quiz: Arc::new(JsonAgent::new(backend, QUIZ_INSTRUCTIONS)),
        }
    }
}

const INTENT_INSTRUCTIONS: &str = "Analyze the learning-roadmap request that follows. Reply with \
one JSON object: {\"headline\": string, \"summary\": string, \"audience\": string, \
\"emphasis\": [string], \"weekly_commitment\": integer}.";

const FRAMEWORK_INSTRUCTIONS: &str = "Design a learning-roadmap framework for the request and \
intent analysis that follow. Reply with one JSON object: {\"title\": string, \"summary\": string, \
\"phases\": [{\"id\": string, \"title\": string, \"objective\": string, \"units\": [{\"id\": \
string, \"title\": string, \"objectives\": [string], \"prerequisites\": [string], \
\"estimated_minutes\": integer}]}]}. Unit ids must be unique; prerequisites may only name \
earlier units and must not form cycles. Size the roadmap to the stated weekly commitment.";

const REVISION_INSTRUCTIONS: &str = "Revise the framework that follows so it addresses every \
listed issue and the reviewer feedback, changing as little as possible. Reply with the complete \
revised framework as one JSON object in the same shape as the input framework.";

const SCORE_INSTRUCTIONS: &str = "Assess the framework that follows against the stated goal. \
Reply with one JSON object: {\"goal_alignment\": number, \"progression\": number, \"coverage\": \
number, \"feasibility\": number, \"issues\": [{\"severity\": \"minor\"|\"severe\", \"message\": \
string, \"unit_id\": string|null}]}. Score each dimension 0-100.";

const TUTORIAL_INSTRUCTIONS: &str = "Write a self-contained markdown tutorial for the unit that \
follows. Reply with one JSON object: {\"unit_id\": string, \"title\": string, \"body\": string} \
where body is the full markdown text.";

const RESOURCES_INSTRUCTIONS: &str = "Curate external learning resources for the unit that \
follows (complementing the tutorial when one is provided). Reply with one JSON object: \
{\"unit_id\": string, \"entries\": [{\"title\": string, \"url\": string, \"note\": string|null}]}.";

const QUIZ_INSTRUCTIONS: &str = "Write a self-check quiz for the unit that follows, grounded in \
its tutorial and resources when provided. Reply with one JSON object: {\"unit_id\": string, \
\"questions\": [{\"prompt\": string, \"choices\": [string], \"answer_index\": integer, \
\"explanation\": string|null}]}.";

#[cfg(test)]
mod tests {
    use super::*;

    struct CannedBackend {
        reply: String,
    }

    #[async_trait]
    impl TextCompletion for CannedBackend {
        async fn complete(&self, _prompt: &str) -> Result<String, AgentError> {
            Ok(self.reply.clone())
        }
    }

    struct FailingBackend;

    #[async_trait]
    impl TextCompletion for FailingBackend {
        async fn complete(&self, _prompt: &str) -> Result<String, AgentError> {
            Err(AgentError::rate_limited("429 from provider"))
        }
    }

    #[tokio::test]
    async fn json_agent_parses_fenced_reply() {
        let backend = Arc::new(CannedBackend {
            reply: "Here you go:\n```json\n{\"headline\": \"h\", \"summary\": \"s\", \
                    \"audience\": \"a\", \"emphasis\": [\"x\"], \"weekly_commitment\": 4}\n```"
                .to_string(),
        });
        let agent: JsonAgent<RoadmapRequest, IntentAnalysis> =
            JsonAgent::new(backend, INTENT_INSTRUCTIONS);
        let intent = agent
            .execute(RoadmapRequest {
                goal: "learn rust".into(),
                hours_per_week: 4,
                background: None,
            })
            .await
            .unwrap();
        assert_eq!(intent.headline, "h");
        assert_eq!(intent.weekly_commitment, 4);
    }

    #[tokio::test]
    async fn json_agent_reports_shape_mismatch() {
        let backend = Arc::new(CannedBackend {
            reply: "```json\n{\"totally\": \"unrelated\"}\n```".to_string(),
        });
        let agent: JsonAgent<RoadmapRequest, IntentAnalysis> =
            JsonAgent::new(backend, INTENT_INSTRUCTIONS);
        let err = agent
            .execute(RoadmapRequest {
                goal: "g".into(),
                hours_per_week: 1,
                background: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::MalformedOutput { .. }));
        assert_eq!(err.fault_kind(), FaultKind::LocalValidation);
    }

    #[tokio::test]
    async fn provider_errors_pass_through_with_their_kind() {
        let agent: JsonAgent<RoadmapRequest, IntentAnalysis> =
            JsonAgent::new(Arc::new(FailingBackend), INTENT_INSTRUCTIONS);
        let err = agent
            .execute(RoadmapRequest {
                goal: "g".into(),
                hours_per_week: 1,
                background: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.fault_kind(), FaultKind::Transient);
    }

    #[test]
    fn error_kinds_map_to_fault_taxonomy() {
        assert_eq!(
            AgentError::unreachable("dns").fault_kind(),
            FaultKind::Connectivity
        );
        assert_eq!(
            AgentError::exhausted("quota").fault_kind(),
            FaultKind::ResourceExhaustion
        );
        assert_eq!(
            AgentError::Timeout { elapsed_ms: 100 }.fault_kind(),
            FaultKind::Timeout
        );
        let fault: Fault = AgentError::rate_limited("slow down").into();
        assert_eq!(fault.kind, FaultKind::Transient);
        assert_eq!(fault.origin, crate::fault::FaultOrigin::Agent);
    }
}
