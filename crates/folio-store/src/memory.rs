use crate::store::{apply_cas, CasOutcome, ExpectedRun, JobStore, JobUpdate, ProjectStore};
use async_trait::async_trait;
use folio_core::{FolioError, FolioResult, Job, Project, TaskRun};
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

/// In-memory store for tests and short-lived runs.
pub struct MemoryStore {
    projects: RwLock<HashMap<Uuid, Project>>,
    jobs: RwLock<HashMap<Uuid, Job>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            projects: RwLock::new(HashMap::new()),
            jobs: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProjectStore for MemoryStore {
    async fn load_project(&self, id: Uuid) -> FolioResult<Option<Project>> {
        Ok(self.projects.read().get(&id).cloned())
    }

    async fn save_project(&self, project: &Project) -> FolioResult<()> {
        self.projects.write().insert(project.id, project.clone());
        Ok(())
    }

    async fn compare_and_set(
        &self,
        project_id: Uuid,
        expected: ExpectedRun,
        next: TaskRun,
    ) -> FolioResult<CasOutcome> {
        let mut projects = self.projects.write();
        let project = projects
            .get_mut(&project_id)
            .ok_or(FolioError::UnknownProject(project_id))?;
        match apply_cas(project, expected, next)? {
            Some(actual) => Ok(CasOutcome::Conflict { actual }),
            None => Ok(CasOutcome::Applied(project.clone())),
        }
    }

    async fn list_projects(&self) -> FolioResult<Vec<Uuid>> {
        let mut ids: Vec<Uuid> = self.projects.read().keys().copied().collect();
        ids.sort();
        Ok(ids)
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn load_job(&self, id: Uuid) -> FolioResult<Option<Job>> {
        Ok(self.jobs.read().get(&id).cloned())
    }

    async fn save_job(&self, job: &Job) -> FolioResult<()> {
        self.jobs.write().insert(job.id, job.clone());
        Ok(())
    }

    async fn update_job(&self, id: Uuid, apply: JobUpdate) -> FolioResult<Job> {
        let mut jobs = self.jobs.write();
        let stored = jobs.get_mut(&id).ok_or(FolioError::UnknownJob(id))?;
        let mut next = stored.clone();
        apply(&mut next)?;
        *stored = next.clone();
        Ok(next)
    }

    async fn list_jobs(&self) -> FolioResult<Vec<Uuid>> {
        let mut ids: Vec<Uuid> = self.jobs.read().keys().copied().collect();
        ids.sort();
        Ok(ids)
    }
}
