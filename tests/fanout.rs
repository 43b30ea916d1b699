//! Fan-out coordinator behavior: isolation between units, the retry
//! budget, and skipping work that already exists.

mod common;

use std::sync::atomic::Ordering;

use common::*;
use waymark::agents::{AgentError, AgentSet, TutorialRequest};
use waymark::fanout::{ConcurrentFanoutCoordinator, ExistingArtifacts, UnitWork};
use waymark::progress::ProgressEvent;
use waymark::roadmap::RoadmapFramework;
use waymark::store::artifacts;
use waymark::types::ArtifactKind;

const TASK: &str = "task-fanout";
const ROADMAP: &str = "roadmap-fanout";

fn coordinator(engine: &TestEngine, agents: AgentSet) -> ConcurrentFanoutCoordinator {
    let config = test_config();
    ConcurrentFanoutCoordinator::new(
        engine.store.clone(),
        agents,
        config.fanout.clone(),
        config.txn.scope_timeout,
        engine.bus.emitter(),
    )
}

fn work_for(framework: &RoadmapFramework) -> Vec<UnitWork> {
    framework
        .units()
        .map(|unit| UnitWork {
            unit: unit.clone(),
            roadmap_title: framework.title.clone(),
            existing: ExistingArtifacts::default(),
        })
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn every_unit_lands_three_artifacts() {
    let engine = TestEngine::new(happy_agents()).await;
    let coordinator = coordinator(&engine, happy_agents());
    let work = work_for(&framework_sized(2));

    let report = coordinator
        .run(TASK, ROADMAP, work)
        .await
        .expect("fan-out pass");
    assert_eq!(report.attempted, 2);
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 0);
    assert_eq!(report.skipped, 0);
    assert!(report.failed_units.is_empty());
    assert_eq!(report.tutorials.len(), 2);
    assert_eq!(report.resources.len(), 2);
    assert_eq!(report.quizzes.len(), 2);

    let tutorial = report.tutorials.get("u-1").expect("tutorial ref");
    assert_eq!(tutorial.storage_key, format!("{ROADMAP}/u-1/tutorial"));

    let rows = artifacts::list_for_roadmap(engine.store.pool(), ROADMAP)
        .await
        .expect("list artifacts");
    assert_eq!(rows.len(), 6);
    assert!(rows.iter().all(|row| row.payload.is_object()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn one_dead_unit_does_not_drag_down_the_rest() {
    let engine = TestEngine::new(happy_agents()).await;
    let coordinator = coordinator(&engine, agents_with_failing_unit("u-2"));
    let work = work_for(&framework_sized(2));

    let report = coordinator
        .run(TASK, ROADMAP, work)
        .await
        .expect("fan-out pass");
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 1);
    assert!(report.failed_units.contains("u-2"));
    assert!(report.tutorials.contains_key("u-1"));
    assert!(!report.tutorials.contains_key("u-2"));

    let rows = artifacts::list_for_roadmap(engine.store.pool(), ROADMAP)
        .await
        .expect("list artifacts");
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|row| row.unit_id == "u-1"));

    // The dead unit announced its failure with the per-kind faults.
    let events = engine.events();
    let failure = events
        .iter()
        .find_map(|event| match event {
            ProgressEvent::UnitFailed {
                unit_id, message, ..
            } if unit_id == "u-2" => Some(message.clone()),
            _ => None,
        })
        .expect("unit failure event");
    assert!(failure.contains("tutorial:"));
    assert!(failure.contains("quiz:"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn transient_failures_are_retried_within_the_budget() {
    // Default budget is two attempts; one transient failure fits.
    let (tutorial, calls) = CountingAgent::wrap(FlakyAgent::wrap(
        agent(|req: TutorialRequest| Ok(tutorial_for(&req.unit))),
        1,
        || AgentError::rate_limited("provider returned 429"),
    ));
    let mut agents = happy_agents();
    agents.tutorial = tutorial;

    let engine = TestEngine::new(happy_agents()).await;
    let coordinator = coordinator(&engine, agents);
    let report = coordinator
        .run(TASK, ROADMAP, work_for(&framework_sized(2)))
        .await
        .expect("fan-out pass");

    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 0);
    assert_eq!(report.tutorials.len(), 2);
    // Two units, one extra attempt for the flaky call.
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn non_retryable_failures_spend_a_single_attempt() {
    let (tutorial, calls) = CountingAgent::wrap(FlakyAgent::wrap(
        agent(|req: TutorialRequest| Ok(tutorial_for(&req.unit))),
        1,
        || AgentError::exhausted("tutorial quota spent"),
    ));
    let mut agents = happy_agents();
    agents.tutorial = tutorial;

    let engine = TestEngine::new(happy_agents()).await;
    let coordinator = coordinator(&engine, agents);
    let work = vec![UnitWork {
        unit: test_unit("u-1", &[]),
        roadmap_title: "Solo".into(),
        existing: ExistingArtifacts::default(),
    }];

    let report = coordinator
        .run(TASK, ROADMAP, work)
        .await
        .expect("fan-out pass");

    // The unit still counts as a success: resources and quiz landed.
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 0);
    assert!(report.tutorials.is_empty());
    assert_eq!(report.resources.len(), 1);
    assert_eq!(report.quizzes.len(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let events = engine.events();
    assert!(events.iter().any(|event| matches!(
        event,
        ProgressEvent::UnitCompleted { produced: 2, .. }
    )));
    assert!(
        !events
            .iter()
            .any(|event| matches!(event, ProgressEvent::UnitFullyComplete { .. })),
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn a_budget_of_one_attempt_never_retries() {
    let (tutorial, calls) = CountingAgent::wrap(FlakyAgent::wrap(
        agent(|req: TutorialRequest| Ok(tutorial_for(&req.unit))),
        1,
        || AgentError::rate_limited("provider returned 429"),
    ));
    let mut agents = happy_agents();
    agents.tutorial = tutorial;

    let mut config = test_config();
    config.fanout.retry_attempts = 1;
    let engine = TestEngine::with_config(happy_agents(), config.clone()).await;
    let coordinator = ConcurrentFanoutCoordinator::new(
        engine.store.clone(),
        agents,
        config.fanout.clone(),
        config.txn.scope_timeout,
        engine.bus.emitter(),
    );

    let work = vec![UnitWork {
        unit: test_unit("u-1", &[]),
        roadmap_title: "Solo".into(),
        existing: ExistingArtifacts::default(),
    }];
    let report = coordinator
        .run(TASK, ROADMAP, work)
        .await
        .expect("fan-out pass");

    // Retryable fault, but the budget was one total attempt.
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(report.tutorials.is_empty());
    assert_eq!(report.succeeded, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fully_complete_units_are_skipped_without_agent_calls() {
    let (tutorial, calls) =
        CountingAgent::wrap(agent(|req: TutorialRequest| Ok(tutorial_for(&req.unit))));
    let mut agents = happy_agents();
    agents.tutorial = tutorial;

    let engine = TestEngine::new(happy_agents()).await;
    let coordinator = coordinator(&engine, agents);
    let work: Vec<UnitWork> = framework_sized(2)
        .units()
        .map(|unit| UnitWork {
            unit: unit.clone(),
            roadmap_title: "Done".into(),
            existing: ExistingArtifacts {
                tutorial: true,
                resources: true,
                quiz: true,
            },
        })
        .collect();

    let report = coordinator
        .run(TASK, ROADMAP, work)
        .await
        .expect("fan-out pass");
    assert_eq!(report.skipped, 2);
    assert_eq!(report.attempted, 0);
    assert_eq!(report.succeeded, 0);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(engine.events().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn existing_artifacts_are_not_regenerated() {
    let (tutorial, calls) =
        CountingAgent::wrap(agent(|req: TutorialRequest| Ok(tutorial_for(&req.unit))));
    let mut agents = happy_agents();
    agents.tutorial = tutorial;

    let engine = TestEngine::new(happy_agents()).await;
    let coordinator = coordinator(&engine, agents);
    let work = vec![UnitWork {
        unit: test_unit("u-1", &[]),
        roadmap_title: "Partial".into(),
        existing: ExistingArtifacts {
            tutorial: true,
            resources: false,
            quiz: false,
        },
    }];

    let report = coordinator
        .run(TASK, ROADMAP, work)
        .await
        .expect("fan-out pass");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(report.tutorials.is_empty());
    assert_eq!(report.resources.len(), 1);
    assert_eq!(report.quizzes.len(), 1);
    assert_eq!(report.succeeded, 1);

    // One pre-existing plus two fresh artifacts: the unit is whole again.
    let events = engine.events();
    assert!(events.iter().any(|event| matches!(
        event,
        ProgressEvent::UnitFullyComplete { unit_id, .. } if unit_id == "u-1"
    )));

    let rows = artifacts::list_for_unit(engine.store.pool(), ROADMAP, "u-1")
        .await
        .expect("list artifacts");
    let kinds: Vec<ArtifactKind> = rows.iter().map(|row| row.kind).collect();
    assert_eq!(kinds, [ArtifactKind::Quiz, ArtifactKind::Resources]);
}
