//! Scripted agent doubles: closures behind the [`Agent`] trait, plus
//! wrappers for counting calls and injecting failures.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use waymark::agents::{
    Agent, AgentError, AgentSet, DynAgent, FrameworkRequest, QuizRequest, ResourceRequest,
    RevisionRequest, ScoreRequest, TutorialRequest,
};
use waymark::roadmap::{
    IntentAnalysis, Phase, QualityScores, Quiz, QuizQuestion, ResourceEntry, ResourceList,
    RoadmapFramework, RoadmapRequest, TutorialDoc, Unit,
};

/// Agent double driven by a closure.
pub struct FnAgent<I, O> {
    func: Box<dyn Fn(I) -> Result<O, AgentError> + Send + Sync>,
}

#[async_trait]
impl<I, O> Agent<I, O> for FnAgent<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    async fn execute(&self, input: I) -> Result<O, AgentError> {
        (self.func)(input)
    }
}

/// Shorthand: closure in, shareable agent out.
pub fn agent<I, O>(
    func: impl Fn(I) -> Result<O, AgentError> + Send + Sync + 'static,
) -> DynAgent<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    Arc::new(FnAgent {
        func: Box::new(func),
    })
}

/// Wrapper that counts calls before delegating.
pub struct CountingAgent<I, O> {
    inner: DynAgent<I, O>,
    calls: Arc<AtomicUsize>,
}

impl<I, O> CountingAgent<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    pub fn wrap(inner: DynAgent<I, O>) -> (DynAgent<I, O>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let wrapped: DynAgent<I, O> = Arc::new(Self {
            inner,
            calls: Arc::clone(&calls),
        });
        (wrapped, calls)
    }
}

#[async_trait]
impl<I, O> Agent<I, O> for CountingAgent<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    async fn execute(&self, input: I) -> Result<O, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.execute(input).await
    }
}

/// Wrapper that fails the first `failures` calls, then delegates.
pub struct FlakyAgent<I, O> {
    inner: DynAgent<I, O>,
    remaining: AtomicUsize,
    error: Box<dyn Fn() -> AgentError + Send + Sync>,
}

impl<I, O> FlakyAgent<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    pub fn wrap(
        inner: DynAgent<I, O>,
        failures: usize,
        error: impl Fn() -> AgentError + Send + Sync + 'static,
    ) -> DynAgent<I, O> {
        Arc::new(Self {
            inner,
            remaining: AtomicUsize::new(failures),
            error: Box::new(error),
        })
    }
}

#[async_trait]
impl<I, O> Agent<I, O> for FlakyAgent<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    async fn execute(&self, input: I) -> Result<O, AgentError> {
        let should_fail = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            Err((self.error)())
        } else {
            self.inner.execute(input).await
        }
    }
}

// ===== Canned outputs =====

pub fn intent_for(req: &RoadmapRequest) -> IntentAnalysis {
    IntentAnalysis {
        headline: format!("Roadmap: {}", req.goal),
        summary: format!("A structured path toward '{}'", req.goal),
        audience: "self-guided learner".into(),
        emphasis: vec!["fundamentals".into(), "practice".into()],
        weekly_commitment: req.hours_per_week,
    }
}

pub fn test_unit(id: &str, prereqs: &[&str]) -> Unit {
    Unit {
        id: id.to_string(),
        title: format!("Unit {id}"),
        objectives: vec![format!("master {id}")],
        prerequisites: prereqs.iter().map(|p| p.to_string()).collect(),
        estimated_minutes: 90,
    }
}

/// Framework sized by the weekly commitment: up to 2 hours gets two units
/// in one phase, anything more gets three units across two phases.
pub fn framework_sized(hours_per_week: u32) -> RoadmapFramework {
    if hours_per_week <= 2 {
        RoadmapFramework {
            title: "Starter Roadmap".into(),
            summary: "two units, one phase".into(),
            phases: vec![Phase {
                id: "p1".into(),
                title: "Foundations".into(),
                objective: "cover the basics".into(),
                units: vec![test_unit("u-1", &[]), test_unit("u-2", &["u-1"])],
            }],
        }
    } else {
        RoadmapFramework {
            title: "Full Roadmap".into(),
            summary: "three units, two phases".into(),
            phases: vec![
                Phase {
                    id: "p1".into(),
                    title: "Foundations".into(),
                    objective: "cover the basics".into(),
                    units: vec![test_unit("u-1", &[]), test_unit("u-2", &["u-1"])],
                },
                Phase {
                    id: "p2".into(),
                    title: "Applications".into(),
                    objective: "build something real".into(),
                    units: vec![test_unit("u-3", &["u-2"])],
                },
            ],
        }
    }
}

pub fn tutorial_for(unit: &Unit) -> TutorialDoc {
    TutorialDoc {
        unit_id: unit.id.clone(),
        title: format!("Tutorial: {}", unit.title),
        body: format!("# {}\n\nEverything about {}.", unit.title, unit.id),
    }
}

pub fn resources_for(unit: &Unit) -> ResourceList {
    ResourceList {
        unit_id: unit.id.clone(),
        entries: vec![ResourceEntry {
            title: format!("Reference for {}", unit.id),
            url: format!("https://example.com/{}", unit.id),
            note: None,
        }],
    }
}

pub fn quiz_for(unit: &Unit) -> Quiz {
    Quiz {
        unit_id: unit.id.clone(),
        questions: vec![QuizQuestion {
            prompt: format!("What does {} cover?", unit.id),
            choices: vec!["this".into(), "that".into()],
            answer_index: 0,
            explanation: None,
        }],
    }
}

pub fn flat_scores(score: f64) -> QualityScores {
    QualityScores {
        goal_alignment: score,
        progression: score,
        coverage: score,
        feasibility: score,
        issues: vec![],
    }
}

// ===== Ready-made agent sets =====

/// Agents that succeed on everything, scoring every framework 90.
pub fn happy_agents() -> AgentSet {
    AgentSet {
        intent: agent(|req: RoadmapRequest| Ok(intent_for(&req))),
        framework: agent(|req: FrameworkRequest| Ok(framework_sized(req.request.hours_per_week))),
        reviser: agent(|req: RevisionRequest| {
            let mut framework = req.framework;
            framework.summary = format!("{} (revised)", framework.summary);
            Ok(framework)
        }),
        scorer: agent(|_req: ScoreRequest| Ok(flat_scores(90.0))),
        tutorial: agent(|req: TutorialRequest| Ok(tutorial_for(&req.unit))),
        resources: agent(|req: ResourceRequest| Ok(resources_for(&req.unit))),
        quiz: agent(|req: QuizRequest| Ok(quiz_for(&req.unit))),
    }
}

/// Scorer that replays `script` one call at a time, repeating the last
/// entry once exhausted.
pub fn scripted_scorer(script: Vec<f64>) -> DynAgent<ScoreRequest, QualityScores> {
    assert!(!script.is_empty(), "score script must not be empty");
    let calls = AtomicUsize::new(0);
    agent(move |_req: ScoreRequest| {
        let idx = calls.fetch_add(1, Ordering::SeqCst).min(script.len() - 1);
        Ok(flat_scores(script[idx]))
    })
}

/// Happy set whose three content agents all fail for `victim` with a
/// non-retryable error, so that unit ends fan-out with zero artifacts.
pub fn agents_with_failing_unit(victim: &'static str) -> AgentSet {
    let mut agents = happy_agents();
    agents.tutorial = agent(move |req: TutorialRequest| {
        if req.unit.id == victim {
            Err(AgentError::exhausted("tutorial budget gone"))
        } else {
            Ok(tutorial_for(&req.unit))
        }
    });
    agents.resources = agent(move |req: ResourceRequest| {
        if req.unit.id == victim {
            Err(AgentError::exhausted("resource budget gone"))
        } else {
            Ok(resources_for(&req.unit))
        }
    });
    agents.quiz = agent(move |req: QuizRequest| {
        if req.unit.id == victim {
            Err(AgentError::exhausted("quiz budget gone"))
        } else {
            Ok(quiz_for(&req.unit))
        }
    });
    agents
}

/// Happy set whose content agents fail for every unit.
pub fn agents_with_dead_content() -> AgentSet {
    let mut agents = happy_agents();
    agents.tutorial = agent(|_req: TutorialRequest| Err(AgentError::exhausted("no tutorials")));
    agents.resources = agent(|_req: ResourceRequest| Err(AgentError::exhausted("no resources")));
    agents.quiz = agent(|_req: QuizRequest| Err(AgentError::exhausted("no quizzes")));
    agents
}
