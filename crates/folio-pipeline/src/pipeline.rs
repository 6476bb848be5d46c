use crate::diagnostics;
use crate::executor::{ExecutionOutcome, Executor, GeneratorTable, INTERRUPTED_REASON};
use crate::jobs::JobRunner;
use crate::layers::layer_statuses;
use crate::limiter::{ConcurrencyLimiter, LimitsConfig};
use crate::monitor::PipelineMonitor;
use crate::registry::TaskRegistry;
use crate::resolver;
use chrono::{DateTime, Utc};
use folio_core::{
    DiagnosticsSnapshot, FolioError, FolioResult, Job, JobPlan, LayerStatus, Project, TaskId,
    TaskRun, TaskStatus,
};
use folio_store::{JobStore, ProjectStore};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

/// Project state plus everything derived from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectStatus {
    pub project: Project,
    pub layers: BTreeMap<u32, LayerStatus>,
    pub available: Vec<TaskId>,
    pub complete: bool,
}

/// Layout version written by [`Pipeline::export_project`].
pub const EXPORT_FORMAT: u32 = 1;

/// Portable snapshot of one project's run state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectExport {
    pub format: u32,
    pub exported_at: DateTime<Utc>,
    pub project: Project,
}

/// Entry point for the boundary operations: projects, tasks and jobs.
pub struct Pipeline {
    registry: Arc<TaskRegistry>,
    projects: Arc<dyn ProjectStore>,
    executor: Arc<Executor>,
    runner: Arc<JobRunner>,
    monitor: Arc<PipelineMonitor>,
}

impl Pipeline {
    /// Wire a pipeline over one store that holds both projects and jobs.
    pub fn new<S>(
        registry: TaskRegistry,
        store: Arc<S>,
        generators: GeneratorTable,
        limits: &LimitsConfig,
    ) -> Self
    where
        S: ProjectStore + JobStore + 'static,
    {
        let registry = Arc::new(registry);
        let projects: Arc<dyn ProjectStore> = store.clone();
        let jobs: Arc<dyn JobStore> = store;
        let monitor = Arc::new(PipelineMonitor::new());
        let executor = Arc::new(Executor::new(
            Arc::clone(&registry),
            Arc::clone(&projects),
            generators,
            Arc::new(ConcurrencyLimiter::new(limits)),
            Arc::clone(&monitor),
        ));
        let runner = Arc::new(JobRunner::new(
            Arc::clone(&registry),
            Arc::clone(&projects),
            jobs,
            Arc::clone(&executor),
        ));
        Self {
            registry,
            projects,
            executor,
            runner,
            monitor,
        }
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn monitor(&self) -> &PipelineMonitor {
        &self.monitor
    }

    /// Create a project with every catalog task PENDING.
    ///
    /// `constraints` must be a JSON object (use `Value::Null` for none).
    pub async fn create_project(&self, title: &str, constraints: Value) -> FolioResult<Project> {
        let constraints = match constraints {
            Value::Null => Value::Object(Default::default()),
            obj @ Value::Object(_) => obj,
            other => {
                return Err(FolioError::Config(format!(
                    "constraints must be a JSON object, got {other}"
                )));
            }
        };
        let project = Project::new(title, constraints, self.registry.task_ids().cloned());
        self.projects.save_project(&project).await?;
        info!(project_id = %project.id, title, tasks = project.tasks.len(), "Project created");
        Ok(project)
    }

    pub async fn project(&self, project_id: Uuid) -> FolioResult<Project> {
        self.projects.get_project(project_id).await
    }

    pub async fn list_projects(&self) -> FolioResult<Vec<Uuid>> {
        self.projects.list_projects().await
    }

    pub async fn export_project(&self, project_id: Uuid) -> FolioResult<ProjectExport> {
        let project = self.project(project_id).await?;
        info!(%project_id, tasks = project.tasks.len(), "Project exported");
        Ok(ProjectExport {
            format: EXPORT_FORMAT,
            exported_at: Utc::now(),
            project,
        })
    }

    /// Store a project from an export under its original id.
    ///
    /// Every exported task must be in the catalog. Catalog tasks missing from
    /// the export start PENDING, and runs exported while RUNNING are settled
    /// as interrupted attempts.
    pub async fn import_project(&self, export: ProjectExport) -> FolioResult<Project> {
        if export.format != EXPORT_FORMAT {
            return Err(FolioError::Config(format!(
                "unsupported export format {} (expected {EXPORT_FORMAT})",
                export.format
            )));
        }
        let mut project = export.project;
        if !project.constraints.is_object() {
            return Err(FolioError::Config(
                "exported constraints must be a JSON object".into(),
            ));
        }
        if let Some(unknown) = project
            .tasks
            .keys()
            .find(|id| !self.registry.contains(id.as_str()))
        {
            return Err(FolioError::UnknownTask(unknown.to_string()));
        }
        if self.projects.load_project(project.id).await?.is_some() {
            return Err(FolioError::Config(format!(
                "project {} already exists",
                project.id
            )));
        }

        for id in self.registry.task_ids() {
            project
                .tasks
                .entry(id.clone())
                .or_insert_with(|| TaskRun::new(id.clone()));
        }
        for (id, run) in project.tasks.iter_mut() {
            if run.status == TaskStatus::Running {
                let cap = self
                    .registry
                    .get(id.as_str())
                    .map_or(run.attempts, |d| d.max_retries);
                *run = run.failed_attempt(INTERRUPTED_REASON, cap);
                warn!(project_id = %project.id, task_id = %id, status = %run.status, "Settled task exported while running");
            }
        }
        project.updated_at = Utc::now();

        self.projects.save_project(&project).await?;
        info!(project_id = %project.id, title = %project.title, "Project imported");
        Ok(project)
    }

    pub async fn available(&self, project_id: Uuid) -> FolioResult<Vec<TaskId>> {
        let project = self.project(project_id).await?;
        Ok(resolver::available(&self.registry, &project))
    }

    pub async fn execute(&self, project_id: Uuid, task_id: &str) -> FolioResult<ExecutionOutcome> {
        self.executor.execute(project_id, task_id).await
    }

    pub async fn reset(&self, project_id: Uuid, task_id: &str) -> FolioResult<TaskRun> {
        self.executor.reset(project_id, task_id).await
    }

    pub async fn diagnose(&self, project_id: Uuid) -> FolioResult<DiagnosticsSnapshot> {
        let project = self.project(project_id).await?;
        Ok(diagnostics::diagnose(&self.registry, &project))
    }

    pub async fn status(&self, project_id: Uuid) -> FolioResult<ProjectStatus> {
        let project = self.project(project_id).await?;
        Ok(ProjectStatus {
            layers: layer_statuses(&self.registry, &project),
            available: resolver::available(&self.registry, &project),
            complete: resolver::is_complete(&self.registry, &project),
            project,
        })
    }

    /// Create a job and drive it to a stop in the caller's task.
    pub async fn start_job(&self, project_id: Uuid, plan: JobPlan, max_iterations: u32) -> FolioResult<Job> {
        self.runner.start(project_id, plan, max_iterations).await
    }

    /// Create a job and drive it on a background tokio task.
    ///
    /// Returns the persisted job record immediately; poll with [`Pipeline::get_job`].
    pub async fn spawn_job(
        &self,
        project_id: Uuid,
        plan: JobPlan,
        max_iterations: u32,
    ) -> FolioResult<(Job, JoinHandle<FolioResult<Job>>)> {
        let job = self.runner.create(project_id, plan).await?;
        let handle = self.runner.spawn(job.clone(), max_iterations)?;
        Ok((job, handle))
    }

    pub async fn resume_job(&self, job_id: Uuid, max_iterations: u32) -> FolioResult<Job> {
        self.runner.resume(job_id, max_iterations).await
    }

    pub async fn spawn_resume_job(
        &self,
        job_id: Uuid,
        max_iterations: u32,
    ) -> FolioResult<JoinHandle<FolioResult<Job>>> {
        self.runner.spawn_resume(job_id, max_iterations).await
    }

    pub async fn get_job(&self, job_id: Uuid) -> FolioResult<Job> {
        self.runner.get(job_id).await
    }

    pub async fn cancel_job(&self, job_id: Uuid) -> FolioResult<Job> {
        self.runner.cancel(job_id).await
    }

    pub async fn list_jobs(&self, project_id: Option<Uuid>) -> FolioResult<Vec<Job>> {
        self.runner.list(project_id).await
    }
}
