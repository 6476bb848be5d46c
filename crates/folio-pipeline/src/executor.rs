use crate::gate::{self, GateOutcome};
use crate::limiter::ConcurrencyLimiter;
use crate::monitor::PipelineMonitor;
use crate::registry::{TaskDefinition, TaskRegistry};
use crate::resolver;
use folio_agent::{Generator, PromptContext, RepairRequest};
use folio_core::{FolioError, FolioResult, Project, TaskId, TaskRun, TaskStatus};
use folio_store::{CasOutcome, ExpectedRun, ProjectStore};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Reason recorded for tasks found RUNNING when a job is resumed.
pub const INTERRUPTED_REASON: &str = "execution interrupted";

/// Rejected outputs larger than this (serialized bytes) are not sent back for repair.
pub const MAX_REPAIR_OUTPUT_BYTES: usize = 50_000;

/// Generator lookup: explicit per-task overrides plus a default, fixed at startup.
#[derive(Clone)]
pub struct GeneratorTable {
    default: Arc<dyn Generator>,
    overrides: HashMap<TaskId, Arc<dyn Generator>>,
}

impl GeneratorTable {
    pub fn new(default: Arc<dyn Generator>) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
        }
    }

    pub fn with_override(mut self, task_id: impl Into<TaskId>, generator: Arc<dyn Generator>) -> Self {
        self.overrides.insert(task_id.into(), generator);
        self
    }

    pub fn resolve(&self, task_id: &TaskId) -> &Arc<dyn Generator> {
        self.overrides.get(task_id).unwrap_or(&self.default)
    }
}

/// Why an execution did not pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    /// The collaborator produced no usable payload; retryable.
    TransientGeneration,
    /// A payload was produced but the gate rejected it; retryable.
    GateFailed,
    /// The failure reached the retry cap; the task is FAILED until reset.
    RetryExhausted,
}

impl FailureKind {
    pub fn code(&self) -> &'static str {
        match self {
            FailureKind::TransientGeneration => "TRANSIENT_GENERATION_ERROR",
            FailureKind::GateFailed => "GATE_FAILED",
            FailureKind::RetryExhausted => "RETRY_EXHAUSTED",
        }
    }
}

/// Result of one completed execution (the transition has been persisted).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub project_id: Uuid,
    pub task_id: TaskId,
    /// Status after the execution: PASSED, PENDING (retry left) or FAILED.
    pub status: TaskStatus,
    pub attempts: u32,
    pub failure: Option<FailureKind>,
    pub reason: Option<String>,
    /// Repair rounds spent within this attempt.
    #[serde(default)]
    pub repairs: u32,
    pub duration_ms: u64,
}

impl ExecutionOutcome {
    pub fn is_pass(&self) -> bool {
        self.status == TaskStatus::Passed
    }

    /// Short label for job cursors and events.
    pub fn label(&self) -> &'static str {
        match self.failure {
            None => "passed",
            Some(FailureKind::TransientGeneration) => "transient_failure",
            Some(FailureKind::GateFailed) => "gate_failed",
            Some(FailureKind::RetryExhausted) => "retries_exhausted",
        }
    }
}

/// Verdict of one attempt before it is persisted.
type Verdict = Result<Value, (FailureKind, String)>;

/// Marks a claim as executing in this process; released on drop.
struct InFlight {
    claim_id: Uuid,
    claims: Arc<Mutex<HashSet<Uuid>>>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.claims.lock().remove(&self.claim_id);
    }
}

/// Runs a single task end to end: claim, generate, gate, persist.
pub struct Executor {
    registry: Arc<TaskRegistry>,
    store: Arc<dyn ProjectStore>,
    generators: GeneratorTable,
    limiter: Arc<ConcurrencyLimiter>,
    monitor: Arc<PipelineMonitor>,
    in_flight: Arc<Mutex<HashSet<Uuid>>>,
}

impl Executor {
    pub fn new(
        registry: Arc<TaskRegistry>,
        store: Arc<dyn ProjectStore>,
        generators: GeneratorTable,
        limiter: Arc<ConcurrencyLimiter>,
        monitor: Arc<PipelineMonitor>,
    ) -> Self {
        Self {
            registry,
            store,
            generators,
            limiter,
            monitor,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// Execute `task_id` for `project_id`.
    ///
    /// Fails with [`FolioError::NotAvailable`] and changes nothing unless the
    /// task is currently available and this caller wins the claim.
    pub async fn execute(&self, project_id: Uuid, task_id: &str) -> FolioResult<ExecutionOutcome> {
        self.execute_as(project_id, task_id, Uuid::new_v4()).await
    }

    /// [`Executor::execute`] under a caller-chosen claim token, so a job can
    /// record which claim it started before the task is claimed.
    pub async fn execute_as(
        &self,
        project_id: Uuid,
        task_id: &str,
        claim_id: Uuid,
    ) -> FolioResult<ExecutionOutcome> {
        let def = self.registry.require(task_id)?;
        self.load_available(project_id, def).await?;

        let _permit = self.limiter.acquire(project_id).await?;

        // The task may have been claimed and settled while this caller waited.
        let project = self.load_available(project_id, def).await?;
        let current = project
            .task(task_id)
            .cloned()
            .unwrap_or_else(|| TaskRun::new(def.id.clone()));
        let claimed = current.claimed_by(claim_id);
        let _in_flight = self.mark_in_flight(claim_id);
        let project = match self
            .store
            .compare_and_set(project_id, ExpectedRun::of(&current), claimed.clone())
            .await?
        {
            CasOutcome::Applied(project) => project,
            CasOutcome::Conflict { actual } => {
                return Err(FolioError::NotAvailable {
                    task_id: def.id.clone(),
                    reason: format!("claimed concurrently; status is {actual}"),
                });
            }
        };

        info!(%project_id, task_id = %def.id, attempt = claimed.attempts, "Executing task");

        let ctx = self.build_context(def, &project, &claimed);
        let generator = self.generators.resolve(&def.id);
        let start = Instant::now();
        let (verdict, repairs) = self.generate_gated(project_id, def, generator, ctx).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let (next, cause) = match verdict {
            Ok(output) => (claimed.passed(output), None),
            Err((kind, reason)) => (claimed.failed_attempt(reason, def.max_retries), Some(kind)),
        };
        let terminal = next.status == TaskStatus::Failed;
        let failure = if terminal {
            Some(FailureKind::RetryExhausted)
        } else {
            cause
        };

        match self
            .store
            .compare_and_set(project_id, ExpectedRun::of(&claimed), next.clone())
            .await?
        {
            CasOutcome::Applied(_) => {}
            CasOutcome::Conflict { actual } => {
                return Err(FolioError::InvalidState {
                    task_id: def.id.clone(),
                    reason: format!("task left RUNNING during execution; status is {actual}"),
                });
            }
        }

        let reason = next.failure_reason.as_deref().unwrap_or_default();
        self.monitor
            .record_repairs(&def.id, repairs, cause.is_none())
            .await;
        match cause {
            None => {
                self.monitor.record_pass(&def.id, duration_ms).await;
                info!(%project_id, task_id = %def.id, attempt = next.attempts, repairs, duration_ms, "Task passed");
            }
            Some(FailureKind::TransientGeneration) => {
                self.monitor
                    .record_transient_failure(&def.id, duration_ms, terminal)
                    .await;
            }
            Some(_) => {
                self.monitor
                    .record_gate_failure(&def.id, duration_ms, terminal)
                    .await;
            }
        }
        if terminal {
            error!(%project_id, task_id = %def.id, attempt = next.attempts, reason, "Task failed terminally");
        } else if let Some(kind) = cause {
            warn!(%project_id, task_id = %def.id, attempt = next.attempts, kind = kind.code(), reason, "Task attempt failed");
        }

        Ok(ExecutionOutcome {
            project_id,
            task_id: def.id.clone(),
            status: next.status,
            attempts: next.attempts,
            failure,
            reason: next.failure_reason,
            repairs,
            duration_ms,
        })
    }

    /// FAILED → PENDING with attempts and failure reason cleared.
    pub async fn reset(&self, project_id: Uuid, task_id: &str) -> FolioResult<TaskRun> {
        let def = self.registry.require(task_id)?;
        let project = self.store.get_project(project_id).await?;
        let run = project
            .task(task_id)
            .cloned()
            .unwrap_or_else(|| TaskRun::new(def.id.clone()));
        if run.status != TaskStatus::Failed {
            return Err(FolioError::InvalidState {
                task_id: def.id.clone(),
                reason: format!("reset requires status failed, found {}", run.status),
            });
        }

        let fresh = run.reset();
        match self
            .store
            .compare_and_set(project_id, ExpectedRun::of(&run), fresh.clone())
            .await?
        {
            CasOutcome::Applied(_) => {
                info!(%project_id, task_id = %def.id, "Task reset");
                Ok(fresh)
            }
            CasOutcome::Conflict { actual } => Err(FolioError::InvalidState {
                task_id: def.id.clone(),
                reason: format!("reset requires status failed, found {actual}"),
            }),
        }
    }

    /// Settle a task left RUNNING under `claim_id` by an execution that died,
    /// as a failed attempt. A task held by another claim, or a claim still
    /// executing in this process, is left alone.
    ///
    /// Returns whether the task was settled.
    pub async fn recover_interrupted(
        &self,
        project_id: Uuid,
        task_id: &str,
        claim_id: Uuid,
    ) -> FolioResult<bool> {
        if self.is_in_flight(claim_id) {
            return Ok(false);
        }
        let project = self.store.get_project(project_id).await?;
        let Some(run) = project.task(task_id) else {
            return Ok(false);
        };
        if run.status != TaskStatus::Running || run.claim_id != Some(claim_id) {
            return Ok(false);
        }

        let cap = self
            .registry
            .get(task_id)
            .map_or(run.attempts, |d| d.max_retries);
        let next = run.failed_attempt(INTERRUPTED_REASON, cap);
        match self
            .store
            .compare_and_set(project_id, ExpectedRun::of(run), next.clone())
            .await?
        {
            CasOutcome::Applied(_) => {
                warn!(%project_id, %task_id, status = %next.status, "Recovered interrupted task");
                Ok(true)
            }
            CasOutcome::Conflict { .. } => Ok(false),
        }
    }

    /// Whether an execution holding `claim_id` is running in this process.
    pub fn is_in_flight(&self, claim_id: Uuid) -> bool {
        self.in_flight.lock().contains(&claim_id)
    }

    fn mark_in_flight(&self, claim_id: Uuid) -> InFlight {
        self.in_flight.lock().insert(claim_id);
        InFlight {
            claim_id,
            claims: Arc::clone(&self.in_flight),
        }
    }

    async fn load_available(&self, project_id: Uuid, def: &TaskDefinition) -> FolioResult<Project> {
        let project = self.store.get_project(project_id).await?;
        if let Some(reason) = resolver::why_unavailable(&self.registry, &project, def.id.as_str()) {
            return Err(FolioError::NotAvailable {
                task_id: def.id.clone(),
                reason,
            });
        }
        Ok(project)
    }

    /// Generate and gate one attempt. A rejected object output is handed back
    /// for repair up to `max_repairs` times within the same attempt; returns
    /// the verdict and the repair rounds spent.
    async fn generate_gated(
        &self,
        project_id: Uuid,
        def: &TaskDefinition,
        generator: &Arc<dyn Generator>,
        mut ctx: PromptContext,
    ) -> (Verdict, u32) {
        let mut output = match generator.generate(&ctx).await {
            Ok(output) => output,
            Err(e) => return (Err((FailureKind::TransientGeneration, e.to_string())), 0),
        };

        let mut rounds = 0;
        loop {
            let reason = match gate::evaluate(def, &output) {
                GateOutcome::Pass => return (Ok(output), rounds),
                GateOutcome::Fail(reason) => reason,
            };
            if rounds >= def.max_repairs || !repairable(&output) {
                return (Err((FailureKind::GateFailed, reason)), rounds);
            }

            rounds += 1;
            info!(%project_id, task_id = %def.id, round = rounds, reason = %reason, "Repairing rejected output");
            ctx.repair = Some(RepairRequest {
                round: rounds,
                reason: reason.clone(),
                output,
            });
            match generator.generate(&ctx).await {
                Ok(repaired) => output = repaired,
                Err(e) => {
                    warn!(%project_id, task_id = %def.id, round = rounds, error = %e, "Repair round failed");
                    return (Err((FailureKind::GateFailed, reason)), rounds);
                }
            }
        }
    }

    fn build_context(&self, def: &TaskDefinition, project: &Project, claimed: &TaskRun) -> PromptContext {
        let dependency_outputs: BTreeMap<TaskId, Value> = def
            .dependencies
            .iter()
            .filter_map(|dep| {
                project
                    .output_of(dep.as_str())
                    .map(|out| (dep.clone(), out.clone()))
            })
            .collect();

        PromptContext {
            project_id: project.id,
            task_id: def.id.clone(),
            task_name: def.name.clone(),
            purpose: def.purpose.clone(),
            layer: def.layer,
            attempt: claimed.attempts,
            max_attempts: def.max_retries,
            constraints: project.constraints.clone(),
            dependency_outputs,
            inputs: self.resolve_inputs(def, project),
            expected_outputs: def.outputs.clone(),
            previous_failure: claimed.failure_reason.clone(),
            repair: None,
        }
    }

    /// Resolve named inputs: constraints, then a task's whole output, then the
    /// title, then top-level output fields in catalog order (first writer wins).
    fn resolve_inputs(&self, def: &TaskDefinition, project: &Project) -> BTreeMap<String, Value> {
        let mut inputs = BTreeMap::new();
        for name in &def.inputs {
            let value = project
                .constraints
                .get(name)
                .cloned()
                .or_else(|| project.output_of(name).cloned())
                .or_else(|| (name == "title").then(|| Value::String(project.title.clone())))
                .or_else(|| {
                    self.registry.all_ordered().iter().find_map(|upstream| {
                        project
                            .output_of(upstream.id.as_str())
                            .and_then(|out| out.get(name))
                            .cloned()
                    })
                });
            if let Some(value) = value {
                inputs.insert(name.clone(), value);
            }
        }
        inputs
    }
}

/// Only objects small enough to quote back are worth repairing.
fn repairable(output: &Value) -> bool {
    output.is_object()
        && serde_json::to_string(output).map_or(false, |s| s.len() <= MAX_REPAIR_OUTPUT_BYTES)
}
