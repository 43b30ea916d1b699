//! Repository round trips against a real database file: task rows,
//! framework snapshots, artifacts, and the checkpoint trail.

mod common;

use std::time::Duration;

use common::*;
use serde_json::json;
use waymark::roadmap::{ArtifactRef, ValidationReport};
use waymark::state::{HumanDecision, StageDelta, WorkflowState};
use waymark::store::tasks::TaskRecord;
use waymark::store::{CheckpointStore, SqliteCheckpointStore, artifacts, snapshots, tasks};
use waymark::types::{ArtifactKind, ExecutionSummary, Step, TaskStatus};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn task_rows_round_trip_through_every_mutation() {
    let (store, _dir) = test_store().await;
    let pool = store.pool();

    let record = TaskRecord::new("task-1");
    tasks::create(pool, &record).await.expect("create row");

    let fetched = tasks::get(pool, "task-1")
        .await
        .expect("query row")
        .expect("row exists");
    assert_eq!(fetched.status, TaskStatus::Pending);
    assert_eq!(fetched.current_step, Step::Init);
    assert!(fetched.roadmap_id.is_none());
    assert!(fetched.summary.is_none());

    tasks::transition(pool, "task-1", TaskStatus::Processing, Step::Intent)
        .await
        .expect("transition");
    tasks::set_roadmap_id(pool, "task-1", "learn-rust-abc123")
        .await
        .expect("set roadmap id");
    let summary = ExecutionSummary {
        succeeded: 2,
        failed: 1,
        skipped: 0,
        duration_ms: 1500,
    };
    tasks::set_summary(pool, "task-1", &summary)
        .await
        .expect("set summary");
    tasks::set_current_step(pool, "task-1", Step::Validation)
        .await
        .expect("set step");

    let fetched = tasks::get(pool, "task-1")
        .await
        .expect("query row")
        .expect("row exists");
    assert_eq!(fetched.status, TaskStatus::Processing);
    assert_eq!(fetched.current_step, Step::Validation);
    assert_eq!(fetched.roadmap_id.as_deref(), Some("learn-rust-abc123"));
    assert_eq!(fetched.summary, Some(summary));
    assert!(fetched.updated_at >= fetched.created_at);

    assert!(tasks::get(pool, "task-unknown").await.expect("query").is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn mark_failed_clips_long_messages() {
    let (store, _dir) = test_store().await;
    let pool = store.pool();
    tasks::create(pool, &TaskRecord::new("task-1"))
        .await
        .expect("create row");

    let long_message = "x".repeat(700);
    tasks::mark_failed(pool, "task-1", &long_message)
        .await
        .expect("mark failed");

    let fetched = tasks::get(pool, "task-1")
        .await
        .expect("query row")
        .expect("row exists");
    assert_eq!(fetched.status, TaskStatus::Failed);
    assert_eq!(fetched.current_step, Step::Failed);
    let stored = fetched.error_message.expect("message stored");
    assert_eq!(stored.chars().count(), 513);
    assert!(stored.ends_with('…'));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn find_interrupted_filters_by_status_and_age() {
    let (store, _dir) = test_store().await;
    let pool = store.pool();

    for (task_id, status) in [
        ("task-processing", TaskStatus::Processing),
        ("task-done", TaskStatus::Completed),
        ("task-waiting", TaskStatus::HumanReviewPending),
    ] {
        tasks::create(pool, &TaskRecord::new(task_id))
            .await
            .expect("create row");
        tasks::transition(pool, task_id, status, Step::Intent)
            .await
            .expect("transition");
    }

    let hits = tasks::find_interrupted(pool, Duration::from_secs(60))
        .await
        .expect("scan");
    let ids: Vec<&str> = hits.iter().map(|record| record.task_id.as_str()).collect();
    assert_eq!(ids, ["task-processing"]);

    // An aged-out row disappears from the scan.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let hits = tasks::find_interrupted(pool, Duration::from_millis(100))
        .await
        .expect("scan");
    assert!(hits.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn snapshot_upsert_replaces_and_clears_validation() {
    let (store, _dir) = test_store().await;
    let pool = store.pool();
    let framework = framework_sized(2);

    assert_eq!(
        snapshots::current_revision(pool, "rm-1").await.expect("revision"),
        None,
    );
    snapshots::upsert(pool, "rm-1", "task-1", 1, &framework)
        .await
        .expect("insert snapshot");

    let report = ValidationReport::from_scores(&flat_scores(88.0), 70.0);
    snapshots::attach_validation(pool, "rm-1", &report)
        .await
        .expect("attach validation");

    let snapshot = snapshots::fetch(pool, "rm-1")
        .await
        .expect("fetch snapshot")
        .expect("snapshot exists");
    assert_eq!(snapshot.revision, 1);
    assert_eq!(snapshot.framework, framework);
    assert!(snapshot.validation.as_ref().is_some_and(|r| r.valid));

    // A new revision supersedes the framework and drops the stale report.
    let revised = framework_sized(6);
    snapshots::upsert(pool, "rm-1", "task-1", 2, &revised)
        .await
        .expect("replace snapshot");
    let snapshot = snapshots::fetch(pool, "rm-1")
        .await
        .expect("fetch snapshot")
        .expect("snapshot exists");
    assert_eq!(snapshot.revision, 2);
    assert_eq!(snapshot.framework, revised);
    assert!(snapshot.validation.is_none());
    assert_eq!(
        snapshots::current_revision(pool, "rm-1").await.expect("revision"),
        Some(2),
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn artifact_upserts_replace_in_place() {
    let (store, _dir) = test_store().await;
    let pool = store.pool();

    artifacts::upsert(
        pool,
        "rm-1",
        "u-1",
        ArtifactKind::Tutorial,
        "rm-1/u-1/tutorial",
        &json!({ "body": "first draft" }),
    )
    .await
    .expect("insert artifact");
    artifacts::upsert(
        pool,
        "rm-1",
        "u-1",
        ArtifactKind::Tutorial,
        "rm-1/u-1/tutorial",
        &json!({ "body": "second draft" }),
    )
    .await
    .expect("replace artifact");
    artifacts::upsert(
        pool,
        "rm-1",
        "u-2",
        ArtifactKind::Quiz,
        "rm-1/u-2/quiz",
        &json!({ "questions": [] }),
    )
    .await
    .expect("insert second artifact");

    let rows = artifacts::list_for_roadmap(pool, "rm-1")
        .await
        .expect("list roadmap");
    assert_eq!(rows.len(), 2);

    let unit_rows = artifacts::list_for_unit(pool, "rm-1", "u-1")
        .await
        .expect("list unit");
    assert_eq!(unit_rows.len(), 1);
    assert_eq!(unit_rows[0].payload, json!({ "body": "second draft" }));
    assert_eq!(unit_rows[0].storage_key, "rm-1/u-1/tutorial");

    assert!(
        artifacts::list_for_unit(pool, "rm-other", "u-1")
            .await
            .expect("list unit")
            .is_empty(),
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn checkpoint_trail_is_append_only_and_newest_wins() {
    let (store, _dir) = test_store().await;
    let checkpoints = SqliteCheckpointStore::new(&store);

    let mut state = WorkflowState::new("task-1".into(), basic_request());
    state.current_step = Step::Intent;
    checkpoints.save(&state).await.expect("first save");
    state.current_step = Step::FrameworkDesign;
    checkpoints.save(&state).await.expect("second save");

    let latest = checkpoints
        .load_latest("task-1")
        .await
        .expect("load")
        .expect("checkpoint exists");
    assert_eq!(latest.current_step, Step::FrameworkDesign);
    assert_eq!(checkpoints.history_len("task-1").await.expect("count"), 2);

    assert!(
        checkpoints
            .load_latest("task-unknown")
            .await
            .expect("load")
            .is_none(),
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn a_fully_loaded_state_survives_the_checkpoint_round_trip() {
    let (store, _dir) = test_store().await;
    let checkpoints = SqliteCheckpointStore::new(&store);

    let mut state = WorkflowState::new("task-1".into(), wide_request());
    let framework = framework_sized(6);
    let mut tutorials = rustc_hash::FxHashMap::default();
    tutorials.insert(
        "u-1".to_string(),
        ArtifactRef::new(ArtifactKind::Tutorial, "rm-1", "u-1"),
    );
    let mut failed = rustc_hash::FxHashSet::default();
    failed.insert("u-3".to_string());
    state
        .apply(
            StageDelta::new()
                .with_roadmap_id("rm-1".to_string())
                .with_intent(intent_for(&wide_request()))
                .with_framework(framework)
                .with_validation(ValidationReport::from_scores(&flat_scores(75.0), 70.0))
                .with_tutorials(tutorials)
                .with_failed_units(failed)
                .bump_modification(),
        )
        .expect("apply delta");
    state.human_approved = Some(HumanDecision {
        approved: false,
        feedback: Some("needs more depth".into()),
        decided_at: chrono::Utc::now(),
    });
    state.current_step = Step::Edit;

    checkpoints.save(&state).await.expect("save");
    let loaded = checkpoints
        .load_latest("task-1")
        .await
        .expect("load")
        .expect("checkpoint exists");
    assert_eq!(loaded, state);
}
