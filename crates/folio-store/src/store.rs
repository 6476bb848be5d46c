use async_trait::async_trait;
use folio_core::{FolioError, FolioResult, Job, Project, TaskRun, TaskStatus};
use uuid::Uuid;

/// What a compare-and-set expects to find in a task's run state.
///
/// Status alone is not enough: a task can leave PENDING and come back to it
/// between a caller's read and its write, with a higher attempt count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpectedRun {
    pub status: TaskStatus,
    pub attempts: u32,
    pub claim_id: Option<Uuid>,
}

impl ExpectedRun {
    /// Expect `run` exactly as it was read.
    pub fn of(run: &TaskRun) -> Self {
        Self {
            status: run.status,
            attempts: run.attempts,
            claim_id: run.claim_id,
        }
    }

    fn matches(&self, run: &TaskRun) -> bool {
        self.status == run.status && self.attempts == run.attempts && self.claim_id == run.claim_id
    }
}

/// Mutation applied to a job record under the store's per-job lock.
pub type JobUpdate = Box<dyn FnOnce(&mut Job) -> FolioResult<()> + Send>;

/// Result of a per-task compare-and-set.
#[derive(Debug, Clone)]
pub enum CasOutcome {
    /// The swap happened; carries the project as persisted.
    Applied(Project),
    /// The task's run state no longer matched what the caller read.
    Conflict { actual: TaskStatus },
}

impl CasOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, CasOutcome::Applied(_))
    }
}

/// Storage for per-project run state.
///
/// Implementations must serialize all task transitions of one project:
/// `compare_and_set` is the only way the orchestration core mutates a task.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn load_project(&self, id: Uuid) -> FolioResult<Option<Project>>;

    /// Insert or overwrite a whole project. Used at creation time.
    async fn save_project(&self, project: &Project) -> FolioResult<()>;

    /// Atomically replace the run state of `next.task_id` if, and only if, its
    /// current status, attempt count and claim token equal `expected`. The
    /// write is durable when this returns.
    async fn compare_and_set(
        &self,
        project_id: Uuid,
        expected: ExpectedRun,
        next: TaskRun,
    ) -> FolioResult<CasOutcome>;

    async fn list_projects(&self) -> FolioResult<Vec<Uuid>>;

    /// Load a project, failing with [`FolioError::UnknownProject`] if absent.
    async fn get_project(&self, id: Uuid) -> FolioResult<Project> {
        self.load_project(id)
            .await?
            .ok_or(FolioError::UnknownProject(id))
    }
}

/// Storage for job records.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn load_job(&self, id: Uuid) -> FolioResult<Option<Job>>;

    /// Insert or overwrite a whole job. Used at creation time.
    async fn save_job(&self, job: &Job) -> FolioResult<()>;

    /// Load, mutate and write back one job while holding its lock, so
    /// concurrent updates (a cancel request and a runner step) both land.
    /// Nothing is written when `apply` fails. Returns the job as persisted.
    async fn update_job(&self, id: Uuid, apply: JobUpdate) -> FolioResult<Job>;

    async fn list_jobs(&self) -> FolioResult<Vec<Uuid>>;

    /// Load a job, failing with [`FolioError::UnknownJob`] if absent.
    async fn get_job(&self, id: Uuid) -> FolioResult<Job> {
        self.load_job(id).await?.ok_or(FolioError::UnknownJob(id))
    }
}

/// Shared CAS step for the back-ends: check and apply on an in-hand copy.
pub(crate) fn apply_cas(
    project: &mut Project,
    expected: ExpectedRun,
    next: TaskRun,
) -> FolioResult<Option<TaskStatus>> {
    let current = project
        .task(next.task_id.as_str())
        .ok_or_else(|| FolioError::UnknownTask(next.task_id.to_string()))?;
    if !expected.matches(current) {
        return Ok(Some(current.status));
    }
    project.put(next);
    Ok(None)
}
