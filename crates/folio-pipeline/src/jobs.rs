use crate::diagnostics::diagnose;
use crate::executor::Executor;
use crate::registry::TaskRegistry;
use crate::resolver;
use folio_core::{
    FolioError, FolioResult, InFlightTask, Job, JobEventKind, JobPlan, JobStatus, TaskId,
};
use folio_store::{JobStore, ProjectStore};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Default bound on executions per `start`/`resume` call.
pub const DEFAULT_MAX_ITERATIONS: u32 = 200;

/// Marks a job as driven by this process; released on drop.
pub struct ActiveJob {
    id: Uuid,
    active: Arc<Mutex<HashSet<Uuid>>>,
}

impl Drop for ActiveJob {
    fn drop(&mut self) {
        self.active.lock().remove(&self.id);
    }
}

/// Drives jobs: bounded, checkpointed sequences of task executions.
///
/// The unit of resumable work is one execution. Every change to a job record
/// goes through [`JobStore::update_job`], so a cancel request landing while a
/// step runs is never overwritten.
pub struct JobRunner {
    registry: Arc<TaskRegistry>,
    projects: Arc<dyn ProjectStore>,
    jobs: Arc<dyn JobStore>,
    executor: Arc<Executor>,
    active: Arc<Mutex<HashSet<Uuid>>>,
    /// Serializes "no RUNNING job" checks with the write that follows them.
    project_locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl JobRunner {
    pub fn new(
        registry: Arc<TaskRegistry>,
        projects: Arc<dyn ProjectStore>,
        jobs: Arc<dyn JobStore>,
        executor: Arc<Executor>,
    ) -> Self {
        Self {
            registry,
            projects,
            jobs,
            executor,
            active: Arc::new(Mutex::new(HashSet::new())),
            project_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Persist a new RUNNING job for `project_id`.
    ///
    /// Rejected with [`FolioError::JobConflict`] while the project already has
    /// a RUNNING job.
    pub async fn create(&self, project_id: Uuid, plan: JobPlan) -> FolioResult<Job> {
        self.projects.get_project(project_id).await?;

        let lock = self.project_lock(project_id);
        let _held = lock.lock().await;
        self.ensure_no_running_job(project_id, None).await?;

        let mut job = Job::new(project_id, plan);
        job.push_event(JobEventKind::Start, "job started", None);
        self.jobs.save_job(&job).await?;
        info!(job_id = %job.id, %project_id, "Job created");
        Ok(job)
    }

    /// Create a job and drive it in the caller's task.
    pub async fn start(&self, project_id: Uuid, plan: JobPlan, max_iterations: u32) -> FolioResult<Job> {
        let job = self.create(project_id, plan).await?;
        let guard = self.claim(job.id)?;
        self.drive(job, max_iterations, guard).await
    }

    /// Drive an existing RUNNING job on a background tokio task.
    pub fn spawn(
        self: &Arc<Self>,
        job: Job,
        max_iterations: u32,
    ) -> FolioResult<JoinHandle<FolioResult<Job>>> {
        let guard = self.claim(job.id)?;
        let runner = Arc::clone(self);
        Ok(tokio::spawn(async move {
            runner.drive(job, max_iterations, guard).await
        }))
    }

    /// Continue a RUNNING (suspended or interrupted), BLOCKED or CANCELLED job.
    pub async fn resume(&self, job_id: Uuid, max_iterations: u32) -> FolioResult<Job> {
        let guard = self.claim(job_id)?;
        let job = self.prepare_resume(job_id).await?;
        self.drive(job, max_iterations, guard).await
    }

    /// Like [`JobRunner::resume`], on a background tokio task.
    pub async fn spawn_resume(
        self: &Arc<Self>,
        job_id: Uuid,
        max_iterations: u32,
    ) -> FolioResult<JoinHandle<FolioResult<Job>>> {
        let guard = self.claim(job_id)?;
        let job = self.prepare_resume(job_id).await?;
        let runner = Arc::clone(self);
        Ok(tokio::spawn(async move {
            runner.drive(job, max_iterations, guard).await
        }))
    }

    /// Request cancellation.
    ///
    /// A RUNNING job ends CANCELLED at its next task boundary; a BLOCKED job,
    /// which nothing is driving, is cancelled immediately.
    pub async fn cancel(&self, job_id: Uuid) -> FolioResult<Job> {
        let job = self
            .jobs
            .update_job(
                job_id,
                Box::new(move |job: &mut Job| {
                    match job.status {
                        JobStatus::Running => {
                            job.cancel_requested = true;
                            job.push_event(JobEventKind::Cancel, "cancellation requested", None);
                        }
                        JobStatus::Blocked => {
                            job.cancel_requested = true;
                            job.push_event(JobEventKind::Cancel, "cancelled while blocked", None);
                            job.finish(JobStatus::Cancelled, Some("cancelled by request".into()));
                        }
                        status => {
                            return Err(FolioError::JobConflict(format!(
                                "job {job_id} is {status} and cannot be cancelled"
                            )));
                        }
                    }
                    Ok(())
                }),
            )
            .await?;
        info!(%job_id, status = %job.status, "Job cancellation recorded");
        Ok(job)
    }

    pub async fn get(&self, job_id: Uuid) -> FolioResult<Job> {
        self.jobs.get_job(job_id).await
    }

    /// Jobs, oldest first, optionally restricted to one project.
    pub async fn list(&self, project_id: Option<Uuid>) -> FolioResult<Vec<Job>> {
        let mut jobs = Vec::new();
        for id in self.jobs.list_jobs().await? {
            if let Some(job) = self.jobs.load_job(id).await? {
                if project_id.map_or(true, |p| p == job.project_id) {
                    jobs.push(job);
                }
            }
        }
        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs)
    }

    /// Whether this process is currently driving `job_id`.
    pub fn is_active(&self, job_id: Uuid) -> bool {
        self.active.lock().contains(&job_id)
    }

    fn claim(&self, job_id: Uuid) -> FolioResult<ActiveJob> {
        if !self.active.lock().insert(job_id) {
            return Err(FolioError::JobConflict(format!(
                "job {job_id} is already being driven"
            )));
        }
        Ok(ActiveJob {
            id: job_id,
            active: Arc::clone(&self.active),
        })
    }

    fn project_lock(&self, project_id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(self.project_locks.lock().entry(project_id).or_default())
    }

    async fn ensure_no_running_job(&self, project_id: Uuid, except: Option<Uuid>) -> FolioResult<()> {
        for other in self.list(Some(project_id)).await? {
            if other.status == JobStatus::Running && Some(other.id) != except {
                return Err(FolioError::JobConflict(format!(
                    "project {project_id} already has running job {}",
                    other.id
                )));
            }
        }
        Ok(())
    }

    async fn prepare_resume(&self, job_id: Uuid) -> FolioResult<Job> {
        let job = self.jobs.get_job(job_id).await?;
        if !job.status.is_resumable() {
            return Err(FolioError::JobConflict(format!(
                "job {job_id} is {} and cannot be resumed",
                job.status
            )));
        }

        let lock = self.project_lock(job.project_id);
        let _held = lock.lock().await;

        // Only the execution this job itself started can have been interrupted.
        let mut recovered = None;
        if job.status == JobStatus::Running {
            if let Some(InFlightTask { task_id, claim_id }) = &job.cursor.in_flight {
                if self
                    .executor
                    .recover_interrupted(job.project_id, task_id.as_str(), *claim_id)
                    .await?
                {
                    recovered = Some(task_id.clone());
                }
            }
        } else {
            self.ensure_no_running_job(job.project_id, Some(job.id)).await?;
        }

        let expected = job.status;
        let job = self
            .jobs
            .update_job(
                job_id,
                Box::new(move |job: &mut Job| {
                    if job.status != expected {
                        return Err(FolioError::JobConflict(format!(
                            "job {} became {} while resuming",
                            job.id, job.status
                        )));
                    }
                    if job.status == JobStatus::Running {
                        job.cursor.in_flight = None;
                        job.cursor.resumes += 1;
                    } else {
                        job.reopen();
                    }
                    if let Some(task_id) = recovered {
                        job.push_event(
                            JobEventKind::Resume,
                            "recovered interrupted execution",
                            Some(task_id),
                        );
                    }
                    job.push_event(JobEventKind::Resume, "job resumed", None);
                    Ok(())
                }),
            )
            .await?;
        info!(%job_id, project_id = %job.project_id, resumes = job.cursor.resumes, "Job resumed");
        Ok(job)
    }

    /// Apply `apply` to the persisted record of a job this runner drives.
    async fn commit(
        &self,
        job_id: Uuid,
        apply: impl FnOnce(&mut Job) + Send + 'static,
    ) -> FolioResult<Job> {
        self.jobs
            .update_job(
                job_id,
                Box::new(move |job: &mut Job| {
                    if job.status != JobStatus::Running {
                        return Err(FolioError::JobConflict(format!(
                            "job {} is {} and no longer driven",
                            job.id, job.status
                        )));
                    }
                    apply(job);
                    Ok(())
                }),
            )
            .await
    }

    fn check_structure(&self, plan: &JobPlan) -> FolioResult<()> {
        self.registry.validate()?;
        if let JobPlan::Tasks { ids } = plan {
            if let Some(unknown) = ids.iter().find(|id| !self.registry.contains(id.as_str())) {
                return Err(FolioError::UnknownTask(unknown.to_string()));
            }
        }
        Ok(())
    }

    async fn fail(&self, job_id: Uuid, err: &FolioError) -> FolioResult<Job> {
        error!(%job_id, error = %err, "Job failed");
        let reason = err.to_string();
        self.commit(job_id, move |job| {
            job.push_event(JobEventKind::Error, reason.clone(), None);
            job.finish(JobStatus::Failed, Some(reason));
        })
        .await
    }

    async fn drive(&self, job: Job, max_iterations: u32, _guard: ActiveJob) -> FolioResult<Job> {
        let job_id = job.id;
        let project_id = job.project_id;
        if let Err(e) = self.check_structure(&job.plan) {
            return self.fail(job_id, &e).await;
        }

        let mut iterations = 0_u32;
        loop {
            let job = self.jobs.get_job(job_id).await?;
            if job.cancel_requested {
                let job = self
                    .commit(job_id, |job| {
                        job.push_event(JobEventKind::Cancel, "cancelled at task boundary", None);
                        job.finish(JobStatus::Cancelled, Some("cancelled by request".into()));
                    })
                    .await?;
                info!(%job_id, executions = job.cursor.executions, "Job cancelled");
                return Ok(job);
            }

            let project = self.projects.get_project(project_id).await?;

            if resolver::is_complete_in(&self.registry, &project, &job.plan) {
                let job = self
                    .commit(job_id, |job| {
                        job.push_event(JobEventKind::Complete, "all tasks in scope passed", None);
                        job.finish(JobStatus::Completed, None);
                    })
                    .await?;
                info!(%job_id, executions = job.cursor.executions, "Job completed");
                return Ok(job);
            }

            let available = resolver::available_in(&self.registry, &project, &job.plan);
            let Some(task_id) = available.first().cloned() else {
                let snapshot = diagnose(&self.registry, &project);
                let reason = blocked_reason(&job, snapshot.blocked_candidates.len());
                warn!(%job_id, %project_id, reason = %reason, "Job blocked");
                return self
                    .commit(job_id, move |job| {
                        job.push_event(JobEventKind::Blocked, reason.clone(), None);
                        job.diagnostics = Some(snapshot);
                        job.finish(JobStatus::Blocked, Some(reason));
                    })
                    .await;
            };

            if iterations >= max_iterations {
                let job = self
                    .commit(job_id, move |job| {
                        job.push_event(
                            JobEventKind::Suspend,
                            format!("iteration budget of {max_iterations} exhausted"),
                            None,
                        );
                    })
                    .await?;
                info!(%job_id, executions = job.cursor.executions, "Job suspended");
                return Ok(job);
            }
            iterations += 1;

            let claim_id = Uuid::new_v4();
            let in_flight = InFlightTask {
                task_id: task_id.clone(),
                claim_id,
            };
            self.commit(job_id, move |job| job.cursor.in_flight = Some(in_flight))
                .await?;

            match self
                .executor
                .execute_as(project_id, task_id.as_str(), claim_id)
                .await
            {
                Ok(outcome) => {
                    let message = match &outcome.reason {
                        Some(reason) => format!("attempt {}: {} ({reason})", outcome.attempts, outcome.label()),
                        None => format!("attempt {}: {}", outcome.attempts, outcome.label()),
                    };
                    self.commit(job_id, move |job| {
                        job.cursor.in_flight = None;
                        job.cursor.executions += 1;
                        job.cursor.last_task = Some(outcome.task_id.clone());
                        job.cursor.last_outcome = Some(outcome.label().to_string());
                        job.push_event(JobEventKind::Step, message, Some(outcome.task_id));
                    })
                    .await?;
                }
                Err(FolioError::NotAvailable { task_id, reason }) => {
                    // Lost a race with another caller; re-evaluate.
                    self.commit(job_id, move |job| {
                        job.cursor.in_flight = None;
                        job.push_event(
                            JobEventKind::Step,
                            format!("skipped: {reason}"),
                            Some(task_id),
                        );
                    })
                    .await?;
                }
                Err(e) if e.is_structural() => return self.fail(job_id, &e).await,
                Err(e) => {
                    // Job stays RUNNING with the claim recorded; resume settles it.
                    error!(%job_id, task_id = %task_id, error = %e, "Job interrupted");
                    let message = e.to_string();
                    if let Err(save_err) = self
                        .commit(job_id, move |job| {
                            job.push_event(JobEventKind::Error, message, Some(task_id));
                        })
                        .await
                    {
                        warn!(%job_id, error = %save_err, "Failed to record job error");
                    }
                    return Err(e);
                }
            }
        }
    }
}

fn blocked_reason(job: &Job, blocked: usize) -> String {
    let last = job
        .cursor
        .last_task
        .as_ref()
        .map(TaskId::to_string)
        .unwrap_or_else(|| "none".into());
    format!("no runnable task in scope ({blocked} blocked candidates; last task {last})")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::executor::GeneratorTable;
    use crate::limiter::{ConcurrencyLimiter, LimitsConfig};
    use crate::monitor::PipelineMonitor;
    use crate::registry::TaskDefinition;
    use async_trait::async_trait;
    use folio_agent::{Generator, PromptContext};
    use folio_core::{Project, TaskRun, TaskStatus};
    use folio_store::{ExpectedRun, JobUpdate, MemoryStore};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    /// Passes every task except the ids in `reject`, which get an off-schema payload.
    struct Fixed {
        reject: Vec<&'static str>,
    }

    #[async_trait]
    impl Generator for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn generate(&self, ctx: &PromptContext) -> FolioResult<Value> {
            if self.reject.contains(&ctx.task_id.as_str()) {
                Ok(json!({"unexpected": true}))
            } else {
                Ok(json!({"text": format!("{} output", ctx.task_id)}))
            }
        }
    }

    fn definitions() -> Vec<TaskDefinition> {
        vec![
            TaskDefinition::new("a", 1).with_outputs(["text"]),
            TaskDefinition::new("b", 2).with_dependencies(["a"]).with_outputs(["text"]),
            TaskDefinition::new("c", 2).with_dependencies(["a"]).with_outputs(["text"]),
        ]
    }

    /// Blocks every call until released, then passes.
    #[derive(Default)]
    struct Held {
        entered: Notify,
        release: Notify,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Generator for Held {
        fn name(&self) -> &str {
            "held"
        }

        async fn generate(&self, ctx: &PromptContext) -> FolioResult<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.entered.notify_one();
            self.release.notified().await;
            Ok(json!({"text": format!("{} output", ctx.task_id)}))
        }
    }

    /// Yields to the scheduler before every job store call.
    struct Yielding(Arc<MemoryStore>);

    #[async_trait]
    impl JobStore for Yielding {
        async fn load_job(&self, id: Uuid) -> FolioResult<Option<Job>> {
            tokio::task::yield_now().await;
            self.0.load_job(id).await
        }

        async fn save_job(&self, job: &Job) -> FolioResult<()> {
            tokio::task::yield_now().await;
            self.0.save_job(job).await
        }

        async fn update_job(&self, id: Uuid, apply: JobUpdate) -> FolioResult<Job> {
            tokio::task::yield_now().await;
            self.0.update_job(id, apply).await
        }

        async fn list_jobs(&self) -> FolioResult<Vec<Uuid>> {
            tokio::task::yield_now().await;
            self.0.list_jobs().await
        }
    }

    async fn setup(defs: Vec<TaskDefinition>, reject: Vec<&'static str>) -> (Arc<JobRunner>, Arc<MemoryStore>, Uuid) {
        setup_with(defs, GeneratorTable::new(Arc::new(Fixed { reject }))).await
    }

    async fn setup_with(
        defs: Vec<TaskDefinition>,
        generators: GeneratorTable,
    ) -> (Arc<JobRunner>, Arc<MemoryStore>, Uuid) {
        let registry = Arc::new(TaskRegistry::new(defs).unwrap());
        let store = Arc::new(MemoryStore::new());
        let project = Project::new("T", json!({}), registry.task_ids().cloned());
        store.save_project(&project).await.unwrap();
        let executor = Arc::new(Executor::new(
            Arc::clone(&registry),
            store.clone(),
            generators,
            Arc::new(ConcurrencyLimiter::new(&LimitsConfig::default())),
            Arc::new(PipelineMonitor::new()),
        ));
        let runner = Arc::new(JobRunner::new(registry, store.clone(), store.clone(), executor));
        (runner, store, project.id)
    }

    #[tokio::test]
    async fn test_job_completes() {
        let (runner, store, pid) = setup(definitions(), vec![]).await;
        let job = runner.start(pid, JobPlan::Full, DEFAULT_MAX_ITERATIONS).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.cursor.executions, 3);
        assert_eq!(job.cursor.last_task.as_ref().map(TaskId::as_str), Some("c"));
        assert!(job.finished_at.is_some());

        let persisted = store.get_job(job.id).await.unwrap();
        assert_eq!(persisted, job);
        assert!(!runner.is_active(job.id));
    }

    #[tokio::test]
    async fn test_job_blocked_with_diagnostics() {
        let (runner, store, pid) = setup(definitions(), vec!["b"]).await;
        let job = runner.start(pid, JobPlan::Full, DEFAULT_MAX_ITERATIONS).await.unwrap();
        assert_eq!(job.status, JobStatus::Blocked);
        // a once, b three times (exhausted), c once.
        assert_eq!(job.cursor.executions, 5);

        let project = store.get_project(pid).await.unwrap();
        assert_eq!(project.status_of("b"), Some(TaskStatus::Failed));
        let snapshot = job.diagnostics.unwrap();
        assert_eq!(snapshot, diagnose(&TaskRegistry::new(definitions()).unwrap(), &project));
        assert_eq!(snapshot.task_count("failed"), 1);
        assert!(job.reason.unwrap().contains("no runnable task"));
    }

    #[tokio::test]
    async fn test_iteration_budget_suspends() {
        let (runner, _store, pid) = setup(definitions(), vec![]).await;
        let job = runner.start(pid, JobPlan::Full, 1).await.unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.cursor.executions, 1);
        assert_eq!(job.events.last().unwrap().kind, JobEventKind::Suspend);

        let resumed = runner.resume(job.id, 10).await.unwrap();
        assert_eq!(resumed.status, JobStatus::Completed);
        assert_eq!(resumed.cursor.executions, 3);
        assert_eq!(resumed.cursor.resumes, 1);
    }

    #[tokio::test]
    async fn test_one_running_job_per_project() {
        let (runner, _store, pid) = setup(definitions(), vec![]).await;
        let suspended = runner.start(pid, JobPlan::Full, 0).await.unwrap();
        assert_eq!(suspended.status, JobStatus::Running);

        let err = runner.start(pid, JobPlan::Full, 10).await.unwrap_err();
        assert_eq!(err.code(), "JOB_CONFLICT");
    }

    #[tokio::test]
    async fn test_structural_defect_fails_job() {
        let defs = vec![TaskDefinition::new("a", 1).with_dependencies(["ghost"])];
        let (runner, _store, pid) = setup(defs, vec![]).await;
        let job = runner.start(pid, JobPlan::Full, 10).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.reason.unwrap().contains("unknown task 'ghost'"));
        assert_eq!(job.cursor.executions, 0);

        let err = runner.resume(job.id, 10).await.unwrap_err();
        assert_eq!(err.code(), "JOB_CONFLICT");
    }

    #[tokio::test]
    async fn test_unknown_task_in_plan_fails_job() {
        let (runner, _store, pid) = setup(definitions(), vec![]).await;
        let plan = JobPlan::Tasks {
            ids: vec![TaskId::from("a"), TaskId::from("zz")],
        };
        let job = runner.start(pid, plan, 10).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_scoped_plan() {
        let (runner, store, pid) = setup(definitions(), vec![]).await;
        let job = runner
            .start(pid, JobPlan::ThroughLayer { layer: 1 }, 10)
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.cursor.executions, 1);
        let project = store.get_project(pid).await.unwrap();
        assert_eq!(project.status_of("b"), Some(TaskStatus::Pending));
    }

    #[tokio::test]
    async fn test_cancel_running_job_at_boundary() {
        let (runner, _store, pid) = setup(definitions(), vec![]).await;
        let job = runner.start(pid, JobPlan::Full, 1).await.unwrap();
        let cancelled = runner.cancel(job.id).await.unwrap();
        assert!(cancelled.cancel_requested);
        assert_eq!(cancelled.status, JobStatus::Running);

        // The next boundary honours the flag before executing anything.
        let after = runner.resume(job.id, 10).await.unwrap();
        assert_eq!(after.status, JobStatus::Cancelled);
        assert_eq!(after.cursor.executions, 1);

        // Cancelled jobs may be resumed afresh.
        let resumed = runner.resume(job.id, 10).await.unwrap();
        assert_eq!(resumed.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_cancel_blocked_and_finished_jobs() {
        let (runner, _store, pid) = setup(definitions(), vec!["a"]).await;
        let blocked = runner.start(pid, JobPlan::Full, 10).await.unwrap();
        assert_eq!(blocked.status, JobStatus::Blocked);
        let cancelled = runner.cancel(blocked.id).await.unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);

        let err = runner.cancel(blocked.id).await.unwrap_err();
        assert_eq!(err.code(), "JOB_CONFLICT");
    }

    #[tokio::test]
    async fn test_resume_recovers_interrupted_task() {
        let (runner, store, pid) = setup(definitions(), vec![]).await;
        let job = runner.start(pid, JobPlan::Full, 0).await.unwrap();

        // Simulate a process that died mid-execution of `a`.
        let claim_id = Uuid::new_v4();
        let pending = TaskRun::new(TaskId::from("a"));
        store
            .compare_and_set(pid, ExpectedRun::of(&pending), pending.claimed_by(claim_id))
            .await
            .unwrap();
        store
            .update_job(
                job.id,
                Box::new(move |job: &mut Job| {
                    job.cursor.in_flight = Some(InFlightTask {
                        task_id: TaskId::from("a"),
                        claim_id,
                    });
                    Ok(())
                }),
            )
            .await
            .unwrap();

        let resumed = runner.resume(job.id, 10).await.unwrap();
        assert_eq!(resumed.status, JobStatus::Completed);
        assert!(resumed.cursor.in_flight.is_none());
        let project = store.get_project(pid).await.unwrap();
        assert_eq!(project.task("a").unwrap().attempts, 2);
        assert!(resumed
            .events
            .iter()
            .any(|e| e.message == "recovered interrupted execution"));
    }

    #[tokio::test]
    async fn test_resume_leaves_live_execution_alone() {
        let held = Arc::new(Held::default());
        let generators =
            GeneratorTable::new(Arc::new(Fixed { reject: vec![] })).with_override("b", held.clone());
        let (runner, store, pid) = setup_with(definitions(), generators).await;
        let job = runner.start(pid, JobPlan::Full, 1).await.unwrap();
        assert_eq!(job.cursor.executions, 1);

        // A manual execution of `b`, outside the job, still in progress.
        let manual = {
            let executor = Arc::clone(&runner.executor);
            tokio::spawn(async move { executor.execute(pid, "b").await })
        };
        held.entered.notified().await;

        let resumed = runner.resume(job.id, 10).await.unwrap();
        assert_eq!(resumed.status, JobStatus::Blocked);
        assert_eq!(resumed.cursor.executions, 2);
        assert!(!resumed
            .events
            .iter()
            .any(|e| e.message == "recovered interrupted execution"));
        let project = store.get_project(pid).await.unwrap();
        assert_eq!(project.status_of("b"), Some(TaskStatus::Running));
        assert_eq!(project.task("b").unwrap().attempts, 1);
        assert_eq!(held.calls.load(Ordering::SeqCst), 1);

        held.release.notify_one();
        assert!(manual.await.unwrap().unwrap().is_pass());
        let done = runner.resume(job.id, 10).await.unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(held.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_during_step_is_kept() {
        let held = Arc::new(Held::default());
        let generators =
            GeneratorTable::new(Arc::new(Fixed { reject: vec![] })).with_override("a", held.clone());
        let (runner, store, pid) = setup_with(definitions(), generators).await;
        let job = runner.create(pid, JobPlan::Full).await.unwrap();
        let handle = runner.spawn(job.clone(), 10).unwrap();
        held.entered.notified().await;

        let persisted = store.get_job(job.id).await.unwrap();
        let in_flight = persisted.cursor.in_flight.unwrap();
        assert_eq!(in_flight.task_id.as_str(), "a");
        let run = store.get_project(pid).await.unwrap().task("a").cloned().unwrap();
        assert_eq!(run.claim_id, Some(in_flight.claim_id));

        let requested = runner.cancel(job.id).await.unwrap();
        assert!(requested.cancel_requested);

        held.release.notify_one();
        let done = handle.await.unwrap().unwrap();
        assert_eq!(done.status, JobStatus::Cancelled);
        assert_eq!(done.cursor.executions, 1);
        assert!(done.cursor.in_flight.is_none());
        assert_eq!(store.get_job(job.id).await.unwrap(), done);
    }

    #[tokio::test]
    async fn test_concurrent_creates_admit_one_job() {
        let registry = Arc::new(TaskRegistry::new(definitions()).unwrap());
        let store = Arc::new(MemoryStore::new());
        let project = Project::new("T", json!({}), registry.task_ids().cloned());
        store.save_project(&project).await.unwrap();
        let executor = Arc::new(Executor::new(
            Arc::clone(&registry),
            store.clone(),
            GeneratorTable::new(Arc::new(Fixed { reject: vec![] })),
            Arc::new(ConcurrencyLimiter::new(&LimitsConfig::default())),
            Arc::new(PipelineMonitor::new()),
        ));
        let runner = Arc::new(JobRunner::new(
            registry,
            store.clone(),
            Arc::new(Yielding(store.clone())),
            executor,
        ));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let runner = Arc::clone(&runner);
                let pid = project.id;
                tokio::spawn(async move { runner.create(pid, JobPlan::Full).await })
            })
            .collect();
        let mut created = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => created += 1,
                Err(e) => assert_eq!(e.code(), "JOB_CONFLICT"),
            }
        }
        assert_eq!(created, 1);
        assert_eq!(store.list_jobs().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_spawned_job_is_exclusive() {
        let (runner, _store, pid) = setup(definitions(), vec![]).await;
        let job = runner.create(pid, JobPlan::Full).await.unwrap();
        let handle = runner.spawn(job.clone(), 10).unwrap();
        // Claimed before the task starts, so a concurrent resume is refused.
        if runner.is_active(job.id) {
            let err = runner.resume(job.id, 10).await.unwrap_err();
            assert_eq!(err.code(), "JOB_CONFLICT");
        }
        let done = handle.await.unwrap().unwrap();
        assert_eq!(done.status, JobStatus::Completed);

        let listed = runner.list(Some(pid)).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(runner.list(Some(Uuid::new_v4())).await.unwrap().is_empty());
    }
}
