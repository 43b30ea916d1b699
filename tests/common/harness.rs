//! Engine harness over a throwaway on-disk SQLite database.

use std::sync::Arc;
use std::time::Duration;

use chrono::DateTime;
use tempfile::TempDir;
use waymark::agents::AgentSet;
use waymark::config::EngineConfig;
use waymark::executor::Executor;
use waymark::progress::{MemorySink, ProgressBus, ProgressEvent};
use waymark::roadmap::RoadmapRequest;
use waymark::state::WorkflowState;
use waymark::store::{SqliteCheckpointStore, SqliteStore};
use waymark::utils::ids::IdGenerator;

pub const TEST_SEED: u64 = 42;

/// Two-unit request (see `framework_sized`).
pub fn basic_request() -> RoadmapRequest {
    RoadmapRequest {
        goal: "learn rust web backends".into(),
        hours_per_week: 2,
        background: None,
    }
}

/// Three-unit request.
pub fn wide_request() -> RoadmapRequest {
    RoadmapRequest {
        goal: "distributed systems from scratch".into(),
        hours_per_week: 6,
        background: Some("knows one language".into()),
    }
}

/// Deterministic config for tests: flat 90-score agents pass the default
/// threshold, retries pause barely, recovery launches without stagger.
pub fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.fanout.retry_backoff = Duration::from_millis(1);
    config.recovery.stagger = Duration::ZERO;
    config
}

/// Migrated store over a fresh temp-dir database. Keep the directory
/// alive for as long as the store is in use.
pub async fn test_store() -> (SqliteStore, TempDir) {
    let dir = TempDir::new().expect("create temp dir");
    let url = format!("sqlite://{}", dir.path().join("engine.db").display());
    let store = SqliteStore::connect(&url).await.expect("connect store");
    (store, dir)
}

/// Fully wired engine: executor, store, checkpoint store, and a drainable
/// event bus, all over one temp-dir database.
pub struct TestEngine {
    pub executor: Executor,
    pub store: SqliteStore,
    pub checkpoints: SqliteCheckpointStore,
    pub bus: ProgressBus,
    pub sink: MemorySink,
    _dir: TempDir,
}

impl TestEngine {
    pub async fn new(agents: AgentSet) -> Self {
        Self::with_config(agents, test_config()).await
    }

    pub async fn with_config(agents: AgentSet, config: EngineConfig) -> Self {
        Self::with_seed(agents, config, TEST_SEED).await
    }

    pub async fn with_seed(agents: AgentSet, config: EngineConfig, seed: u64) -> Self {
        let (store, dir) = test_store().await;
        let checkpoints = SqliteCheckpointStore::new(&store);
        let sink = MemorySink::new();
        let bus = ProgressBus::with_sink(sink.clone());
        let executor = Executor::new(
            store.clone(),
            Arc::new(checkpoints.clone()),
            agents,
            config,
            bus.emitter(),
        )
        .with_ids(IdGenerator::seeded(seed));
        Self {
            executor,
            store,
            checkpoints,
            bus,
            sink,
            _dir: dir,
        }
    }

    /// Every event emitted so far, in order.
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.bus.drain();
        self.sink.snapshot()
    }

    pub fn event_labels(&self) -> Vec<&'static str> {
        self.events().iter().map(|event| event.label()).collect()
    }
}

/// Strip wall-clock noise (timestamps, durations) so states from separate
/// runs compare equal field-for-field.
pub fn normalize(mut state: WorkflowState) -> WorkflowState {
    let epoch = DateTime::UNIX_EPOCH;
    for entry in &mut state.history {
        entry.at = epoch;
        entry.duration_ms = 0;
    }
    for artifact in state
        .tutorials
        .values_mut()
        .chain(state.resources.values_mut())
        .chain(state.quizzes.values_mut())
    {
        artifact.created_at = epoch;
    }
    if let Some(decision) = &mut state.human_approved {
        decision.decided_at = epoch;
    }
    state
}
