//! # Waymark: Durable Roadmap-Generation Workflow Engine
//!
//! Waymark drives a multi-stage agent pipeline that turns a learning goal
//! into a reviewed roadmap with per-unit content, checkpointing every stage
//! so a crash, restart, or human pause never loses work.
//!
//! ## Core Concepts
//!
//! - **Tasks**: One workflow run per roadmap request, tracked in SQLite
//! - **Stages**: Fixed pipeline positions (intent, framework design, a
//!   bounded validate/edit loop, a human-review gate, and content fan-out)
//! - **Checkpoints**: Append-only state snapshots; the latest one is always
//!   enough to resume
//! - **Scopes**: Savepoint-nested transactions that pair each agent call
//!   with its durable writes
//! - **Faults**: A classified taxonomy deciding retries and rollback depth
//! - **Progress**: A bus of typed events for UIs, logs, and tests
//!
//! ## Quick Start
//!
//! Plug a text-completion backend into the stock agent set, open a store,
//! and start a task:
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use waymark::agents::{AgentError, AgentSet, TextCompletion};
//! use waymark::config::EngineConfig;
//! use waymark::executor::{ExecutionOutcome, Executor};
//! use waymark::progress::{ProgressBus, TracingSink};
//! use waymark::roadmap::RoadmapRequest;
//! use waymark::store::{SqliteCheckpointStore, SqliteStore};
//!
//! struct MyProvider;
//!
//! #[async_trait::async_trait]
//! impl TextCompletion for MyProvider {
//!     async fn complete(&self, _prompt: &str) -> Result<String, AgentError> {
//!         // Call your model provider here.
//!         Err(AgentError::unreachable("wire a real backend"))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> miette::Result<()> {
//!     waymark::telemetry::init();
//!
//!     let store = SqliteStore::connect("sqlite://waymark.db").await?;
//!     let checkpoints = Arc::new(SqliteCheckpointStore::new(&store));
//!     let agents = AgentSet::from_text_backend(Arc::new(MyProvider));
//!
//!     let bus = ProgressBus::with_sink(TracingSink);
//!     bus.listen();
//!
//!     let executor = Executor::new(
//!         store,
//!         checkpoints,
//!         agents,
//!         EngineConfig::from_env(),
//!         bus.emitter(),
//!     );
//!
//!     let outcome = executor
//!         .start(RoadmapRequest {
//!             goal: "learn async Rust".into(),
//!             hours_per_week: 5,
//!             background: None,
//!         })
//!         .await?;
//!
//!     match outcome {
//!         ExecutionOutcome::Suspended(state) => {
//!             // Framework is ready; a reviewer decides before content
//!             // generation starts.
//!             println!("awaiting review: {}", state.task_id);
//!         }
//!         ExecutionOutcome::Finished(state) => {
//!             println!("done at {} with {} artifacts", state.current_step, state.artifact_count());
//!         }
//!         ExecutionOutcome::Interrupted(_) => unreachable!("no interrupt requested"),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ### Resuming
//!
//! The review gate and crash recovery both resolve the same way: load the
//! latest checkpoint and drive on.
//!
//! ```no_run
//! # async fn example(executor: waymark::executor::Executor) -> miette::Result<()> {
//! // Approve a suspended task (rejection feeds the edit loop instead):
//! executor
//!     .resume_after_human_review("task-1234", true, None)
//!     .await?;
//!
//! // After a restart, sweep up everything a dead process left mid-flight:
//! let report = waymark::recovery::RecoveryScanner::new(executor).run().await?;
//! println!("resumed {} of {}", report.resumed, report.examined);
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Guide
//!
//! - [`executor`] - Task lifecycle: start, drive, suspend, resume
//! - [`stages`] - The five stage runners and their shared contract
//! - [`router`] - Pure step-transition rules
//! - [`state`] - Workflow state, stage deltas, and the merge rules
//! - [`store`] - SQLite persistence: tasks, checkpoints, snapshots, artifacts
//! - [`txn`] - Savepoint-nested transaction scopes with deadlines
//! - [`fanout`] - Concurrent per-unit content generation
//! - [`fault`] - Fault taxonomy, retry and rollback classification
//! - [`agents`] - The typed agent seam and the JSON adapter
//! - [`progress`] - Event bus, emitters, and sinks
//! - [`recovery`] - Startup scan for interrupted tasks
//! - [`config`] - Engine knobs with environment overrides

pub mod agents;
pub mod config;
pub mod executor;
pub mod fanout;
pub mod fault;
pub mod progress;
pub mod recovery;
pub mod roadmap;
pub mod router;
pub mod stages;
pub mod state;
pub mod store;
pub mod telemetry;
pub mod txn;
pub mod types;
pub mod utils;
