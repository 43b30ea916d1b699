//! Concurrent content fan-out across framework units.
//!
//! Every incomplete unit becomes one task generating up to three artifacts
//! (tutorial, then resources, then quiz; later kinds see earlier outputs).
//! Two independent semaphores throttle the run: one bounds units generating
//! concurrently, the other bounds open database transactions. Each unit
//! persists its artifacts in a single scope with one savepoint per
//! artifact, so a bad payload costs only itself while a hard fault drops
//! the unit's whole batch. A unit counts as failed only when it ends the
//! run with zero persisted artifacts.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use rustc_hash::{FxHashMap, FxHashSet};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, instrument, warn};

use crate::agents::{AgentError, AgentSet, QuizRequest, ResourceRequest, TutorialRequest};
use crate::config::FanoutConfig;
use crate::fault::{Fault, FaultKind};
use crate::progress::{ProgressEmitter, ProgressEvent};
use crate::roadmap::{ArtifactRef, ResourceList, TutorialDoc, Unit};
use crate::state::WorkflowState;
use crate::store::{SqliteStore, artifacts};
use crate::txn::{ExitOutcome, ScopeOptions, with_scope};
use crate::types::{ArtifactKind, ExecutionSummary, UnitId};

/// Which artifacts a unit already holds from an earlier run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExistingArtifacts {
    pub tutorial: bool,
    pub resources: bool,
    pub quiz: bool,
}

impl ExistingArtifacts {
    pub fn for_unit(state: &WorkflowState, unit_id: &str) -> Self {
        Self {
            tutorial: state.has_artifact(ArtifactKind::Tutorial, unit_id),
            resources: state.has_artifact(ArtifactKind::Resources, unit_id),
            quiz: state.has_artifact(ArtifactKind::Quiz, unit_id),
        }
    }

    pub fn has(&self, kind: ArtifactKind) -> bool {
        match kind {
            ArtifactKind::Tutorial => self.tutorial,
            ArtifactKind::Resources => self.resources,
            ArtifactKind::Quiz => self.quiz,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.tutorial && self.resources && self.quiz
    }

    pub fn count(&self) -> usize {
        [self.tutorial, self.resources, self.quiz]
            .into_iter()
            .filter(|present| *present)
            .count()
    }
}

/// One unit's worth of fan-out work.
#[derive(Clone, Debug)]
pub struct UnitWork {
    pub unit: Unit,
    pub roadmap_title: String,
    pub existing: ExistingArtifacts,
}

/// What one unit task reported back.
#[derive(Debug)]
pub struct UnitOutcome {
    pub unit_id: UnitId,
    /// References persisted by this run, in generation order.
    pub produced: Vec<ArtifactRef>,
    /// Kinds that failed, with the fault that ended their attempts.
    pub failures: Vec<(ArtifactKind, Fault)>,
    /// Artifacts the unit holds after the run, pre-existing included.
    pub total_artifacts: usize,
}

/// Aggregate result of one fan-out pass.
#[derive(Debug, Default)]
pub struct FanoutReport {
    pub tutorials: FxHashMap<UnitId, ArtifactRef>,
    pub resources: FxHashMap<UnitId, ArtifactRef>,
    pub quizzes: FxHashMap<UnitId, ArtifactRef>,
    /// Units that ended the run with zero persisted artifacts.
    pub failed_units: FxHashSet<UnitId>,
    /// Units that actually ran (skipped ones excluded).
    pub attempted: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub skipped: u32,
    pub duration: Duration,
}

impl FanoutReport {
    pub fn summary(&self) -> ExecutionSummary {
        ExecutionSummary {
            succeeded: self.succeeded,
            failed: self.failed,
            skipped: self.skipped,
            duration_ms: self.duration.as_millis() as u64,
        }
    }
}

/// Drives the per-unit tasks and owns the throttles.
#[derive(Clone)]
pub struct ConcurrentFanoutCoordinator {
    store: SqliteStore,
    agents: AgentSet,
    config: FanoutConfig,
    scope_timeout: Duration,
    emitter: ProgressEmitter,
}

impl ConcurrentFanoutCoordinator {
    pub fn new(
        store: SqliteStore,
        agents: AgentSet,
        config: FanoutConfig,
        scope_timeout: Duration,
        emitter: ProgressEmitter,
    ) -> Self {
        Self {
            store,
            agents,
            config,
            scope_timeout,
            emitter,
        }
    }

    /// Runs the fan-out over `work` and folds every unit outcome into one
    /// report. Unit failures never fail the pass; the caller decides what
    /// the aggregate means.
    #[instrument(skip_all, fields(task_id = %task_id, units = work.len()))]
    pub async fn run(
        &self,
        task_id: &str,
        roadmap_id: &str,
        work: Vec<UnitWork>,
    ) -> Result<FanoutReport, Fault> {
        let started = Instant::now();
        let total = work.len();
        let unit_permits = Arc::new(Semaphore::new(self.config.max_concurrent_units));
        let db_permits = Arc::new(Semaphore::new(self.config.max_db_sessions));

        let mut report = FanoutReport::default();
        let mut join_set: JoinSet<UnitOutcome> = JoinSet::new();
        let mut pending: FxHashSet<UnitId> = FxHashSet::default();

        for (index, item) in work.into_iter().enumerate() {
            if item.existing.is_complete() {
                debug!(
                    target: "waymark::fanout",
                    unit_id = %item.unit.id,
                    "unit already complete, skipping",
                );
                report.skipped += 1;
                continue;
            }
            let permit = unit_permits.clone().acquire_owned().await.map_err(|_| {
                Fault::engine(FaultKind::Unclassified, "unit semaphore closed")
            })?;

            pending.insert(item.unit.id.clone());
            report.attempted += 1;

            let coordinator = self.clone();
            let db_permits = db_permits.clone();
            let task_id = task_id.to_string();
            let roadmap_id = roadmap_id.to_string();
            let ordinal = index + 1;
            join_set.spawn(async move {
                let _permit = permit;
                coordinator
                    .run_unit(&task_id, &roadmap_id, item, ordinal, total, db_permits)
                    .await
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(outcome) => {
                    pending.remove(&outcome.unit_id);
                    self.fold(task_id, &mut report, outcome);
                }
                Err(join_err) => {
                    warn!(target: "waymark::fanout", error = %join_err, "unit task aborted");
                }
            }
        }

        // Units whose task aborted never reported an outcome.
        for unit_id in pending {
            self.emitter.emit(ProgressEvent::UnitFailed {
                task_id: task_id.to_string(),
                unit_id: unit_id.clone(),
                message: "unit task aborted".into(),
            });
            report.failed_units.insert(unit_id);
            report.failed += 1;
        }

        report.duration = started.elapsed();
        Ok(report)
    }

    fn fold(&self, task_id: &str, report: &mut FanoutReport, outcome: UnitOutcome) {
        let unit_id = outcome.unit_id;
        let produced = outcome.produced.len();
        for artifact in outcome.produced {
            let slot = match artifact.kind {
                ArtifactKind::Tutorial => &mut report.tutorials,
                ArtifactKind::Resources => &mut report.resources,
                ArtifactKind::Quiz => &mut report.quizzes,
            };
            slot.insert(unit_id.clone(), artifact);
        }
        for (kind, fault) in &outcome.failures {
            warn!(
                target: "waymark::fanout",
                unit_id = %unit_id,
                kind = %kind,
                error = %fault,
                "artifact not persisted",
            );
        }

        if outcome.total_artifacts == 0 {
            let message = outcome
                .failures
                .iter()
                .map(|(kind, fault)| format!("{kind}: {fault}"))
                .collect::<Vec<_>>()
                .join("; ");
            self.emitter.emit(ProgressEvent::UnitFailed {
                task_id: task_id.to_string(),
                unit_id: unit_id.clone(),
                message,
            });
            report.failed_units.insert(unit_id);
            report.failed += 1;
        } else {
            self.emitter.emit(ProgressEvent::UnitCompleted {
                task_id: task_id.to_string(),
                unit_id: unit_id.clone(),
                produced,
            });
            if outcome.total_artifacts == ArtifactKind::ALL.len() {
                self.emitter.emit(ProgressEvent::UnitFullyComplete {
                    task_id: task_id.to_string(),
                    unit_id,
                });
            }
            report.succeeded += 1;
        }
    }

    /// Generates the unit's missing artifacts, then persists whatever was
    /// generated. Generation is serial inside the unit and each kind fails
    /// independently: a dead tutorial still lets resources and quiz run,
    /// they just work without it.
    #[instrument(skip_all, fields(unit_id = %work.unit.id))]
    async fn run_unit(
        &self,
        task_id: &str,
        roadmap_id: &str,
        work: UnitWork,
        ordinal: usize,
        total: usize,
        db_permits: Arc<Semaphore>,
    ) -> UnitOutcome {
        let unit_id = work.unit.id.clone();
        self.emitter.emit(ProgressEvent::UnitStarted {
            task_id: task_id.to_string(),
            unit_id: unit_id.clone(),
            ordinal,
            total,
        });

        let mut generated: Vec<(ArtifactKind, serde_json::Value)> = Vec::new();
        let mut failures: Vec<(ArtifactKind, Fault)> = Vec::new();

        let mut tutorial: Option<TutorialDoc> = None;
        if !work.existing.tutorial {
            let result = self
                .call_with_retry(&unit_id, ArtifactKind::Tutorial, || {
                    self.agents.tutorial.execute(TutorialRequest {
                        roadmap_title: work.roadmap_title.clone(),
                        unit: work.unit.clone(),
                    })
                })
                .await
                .and_then(|doc| {
                    encode_payload(ArtifactKind::Tutorial, &doc).map(|payload| (doc, payload))
                });
            match result {
                Ok((doc, payload)) => {
                    generated.push((ArtifactKind::Tutorial, payload));
                    tutorial = Some(doc);
                }
                Err(fault) => failures.push((ArtifactKind::Tutorial, fault)),
            }
        }

        let mut resources: Option<ResourceList> = None;
        if !work.existing.resources {
            let result = self
                .call_with_retry(&unit_id, ArtifactKind::Resources, || {
                    self.agents.resources.execute(ResourceRequest {
                        unit: work.unit.clone(),
                        tutorial: tutorial.clone(),
                    })
                })
                .await
                .and_then(|list| {
                    encode_payload(ArtifactKind::Resources, &list).map(|payload| (list, payload))
                });
            match result {
                Ok((list, payload)) => {
                    generated.push((ArtifactKind::Resources, payload));
                    resources = Some(list);
                }
                Err(fault) => failures.push((ArtifactKind::Resources, fault)),
            }
        }

        if !work.existing.quiz {
            let result = self
                .call_with_retry(&unit_id, ArtifactKind::Quiz, || {
                    self.agents.quiz.execute(QuizRequest {
                        unit: work.unit.clone(),
                        tutorial: tutorial.clone(),
                        resources: resources.clone(),
                    })
                })
                .await
                .and_then(|quiz| encode_payload(ArtifactKind::Quiz, &quiz));
            match result {
                Ok(payload) => generated.push((ArtifactKind::Quiz, payload)),
                Err(fault) => failures.push((ArtifactKind::Quiz, fault)),
            }
        }

        let (persisted, persist_failures) = if generated.is_empty() {
            (Vec::new(), Vec::new())
        } else {
            self.persist_unit(roadmap_id, &unit_id, generated, db_permits)
                .await
        };
        failures.extend(persist_failures);

        UnitOutcome {
            total_artifacts: work.existing.count() + persisted.len(),
            unit_id,
            produced: persisted,
            failures,
        }
    }

    /// Writes the unit's generated artifacts inside one scope, one
    /// savepoint per artifact: a contained fault costs one artifact, a
    /// hard fault (or a failed commit) costs the whole batch.
    #[instrument(skip_all, fields(unit_id = %unit_id, staged = generated.len()))]
    async fn persist_unit(
        &self,
        roadmap_id: &str,
        unit_id: &str,
        generated: Vec<(ArtifactKind, serde_json::Value)>,
        db_permits: Arc<Semaphore>,
    ) -> (Vec<ArtifactRef>, Vec<(ArtifactKind, Fault)>) {
        let kinds: Vec<ArtifactKind> = generated.iter().map(|(kind, _)| *kind).collect();
        let _permit = match db_permits.acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                let fault =
                    Fault::engine(FaultKind::ResourceExhaustion, "db session semaphore closed");
                return (
                    Vec::new(),
                    kinds.into_iter().map(|kind| (kind, fault.clone())).collect(),
                );
            }
        };

        let scoped_roadmap = roadmap_id.to_string();
        let scoped_unit = unit_id.to_string();
        let options = ScopeOptions::new("fanout_unit", self.scope_timeout);
        let result = with_scope(self.store.pool(), options, move |scope| {
            async move {
                let mut persisted: Vec<ArtifactRef> = Vec::new();
                let mut failures: Vec<(ArtifactKind, Fault)> = Vec::new();
                for (kind, payload) in generated {
                    scope.enter().await?;
                    let artifact = ArtifactRef::new(kind, &scoped_roadmap, &scoped_unit);
                    match artifacts::upsert(
                        scope.conn()?,
                        &scoped_roadmap,
                        &scoped_unit,
                        kind,
                        &artifact.storage_key,
                        &payload,
                    )
                    .await
                    {
                        Ok(()) => {
                            scope.exit(None).await?;
                            persisted.push(artifact);
                        }
                        Err(err) => {
                            let fault = Fault::from(err);
                            let outcome = scope.exit(Some(&fault)).await?;
                            failures.push((kind, fault.clone()));
                            if outcome == ExitOutcome::RolledBackFull {
                                // Siblings already staged went down with it.
                                return Err(fault);
                            }
                        }
                    }
                }
                Ok((persisted, failures))
            }
            .boxed()
        })
        .await;

        match result {
            Ok((persisted, failures)) => (persisted, failures),
            Err(fault) => {
                warn!(
                    target: "waymark::fanout",
                    unit_id,
                    error = %fault,
                    "unit persistence rolled back in full",
                );
                (
                    Vec::new(),
                    kinds.into_iter().map(|kind| (kind, fault.clone())).collect(),
                )
            }
        }
    }

    async fn call_with_retry<T, F, Fut>(
        &self,
        unit_id: &str,
        kind: ArtifactKind,
        call: F,
    ) -> Result<T, Fault>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, AgentError>>,
    {
        let mut attempt: u32 = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let fault = Fault::from(err);
                    if fault.kind.is_retryable() && attempt < self.config.retry_attempts {
                        warn!(
                            target: "waymark::fanout",
                            unit_id,
                            kind = %kind,
                            attempt,
                            error = %fault,
                            "agent call failed, retrying",
                        );
                        attempt += 1;
                        tokio::time::sleep(self.config.retry_backoff).await;
                    } else {
                        return Err(fault);
                    }
                }
            }
        }
    }
}

fn encode_payload<T: serde::Serialize>(
    kind: ArtifactKind,
    value: &T,
) -> Result<serde_json::Value, Fault> {
    serde_json::to_value(value).map_err(|err| {
        Fault::engine(
            FaultKind::LocalValidation,
            format!("{kind} payload failed to encode: {err}"),
        )
    })
}
