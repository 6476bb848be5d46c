use crate::store::{apply_cas, CasOutcome, ExpectedRun, JobStore, JobUpdate, ProjectStore};
use async_trait::async_trait;
use folio_core::{FolioError, FolioResult, Job, Project, TaskRun};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// File-based store: one pretty-printed JSON document per project and per job.
///
/// Layout:
/// ```text
/// <dir>/projects/<uuid>.json
/// <dir>/jobs/<uuid>.json
/// ```
/// Writes go to a sibling temp file and are renamed into place, so a crash
/// never leaves a half-written record. Every write to one record (project or
/// job) is serialized through a per-record async lock.
pub struct FileStore {
    dir: PathBuf,
    locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl FileStore {
    pub async fn new(dir: impl Into<PathBuf>) -> FolioResult<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(dir.join("projects")).await?;
        tokio::fs::create_dir_all(dir.join("jobs")).await?;
        Ok(Self {
            dir,
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn project_path(&self, id: Uuid) -> PathBuf {
        self.dir.join("projects").join(format!("{id}.json"))
    }

    fn job_path(&self, id: Uuid) -> PathBuf {
        self.dir.join("jobs").join(format!("{id}.json"))
    }

    fn lock_for(&self, id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        self.locks.lock().entry(id).or_default().clone()
    }
}

async fn read_record<T: DeserializeOwned>(path: &Path, what: &str) -> FolioResult<Option<T>> {
    let data = match tokio::fs::read_to_string(path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let record = serde_json::from_str(&data)
        .map_err(|e| FolioError::Store(format!("Failed to parse {what} {}: {e}", path.display())))?;
    Ok(Some(record))
}

async fn write_atomic<T: Serialize>(path: &Path, record: &T) -> FolioResult<()> {
    let json = serde_json::to_string_pretty(record)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

async fn list_ids(dir: &Path) -> FolioResult<Vec<Uuid>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut ids = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if let Some(name) = entry.file_name().to_str() {
            if let Some(stem) = name.strip_suffix(".json") {
                if let Ok(id) = Uuid::parse_str(stem) {
                    ids.push(id);
                }
            }
        }
    }
    ids.sort();
    Ok(ids)
}

#[async_trait]
impl ProjectStore for FileStore {
    async fn load_project(&self, id: Uuid) -> FolioResult<Option<Project>> {
        read_record(&self.project_path(id), "project").await
    }

    async fn save_project(&self, project: &Project) -> FolioResult<()> {
        let lock = self.lock_for(project.id);
        let _guard = lock.lock().await;
        write_atomic(&self.project_path(project.id), project).await
    }

    async fn compare_and_set(
        &self,
        project_id: Uuid,
        expected: ExpectedRun,
        next: TaskRun,
    ) -> FolioResult<CasOutcome> {
        let lock = self.lock_for(project_id);
        let _guard = lock.lock().await;

        let path = self.project_path(project_id);
        let mut project: Project = read_record(&path, "project")
            .await?
            .ok_or(FolioError::UnknownProject(project_id))?;
        let task_id = next.task_id.clone();
        let next_status = next.status;
        if let Some(actual) = apply_cas(&mut project, expected, next)? {
            debug!(%project_id, task = %task_id, expected = %expected.status, %actual, "CAS rejected");
            return Ok(CasOutcome::Conflict { actual });
        }
        write_atomic(&path, &project).await?;
        debug!(%project_id, task = %task_id, from = %expected.status, to = %next_status, "Task transition persisted");
        Ok(CasOutcome::Applied(project))
    }

    async fn list_projects(&self) -> FolioResult<Vec<Uuid>> {
        list_ids(&self.dir.join("projects")).await
    }
}

#[async_trait]
impl JobStore for FileStore {
    async fn load_job(&self, id: Uuid) -> FolioResult<Option<Job>> {
        read_record(&self.job_path(id), "job").await
    }

    async fn save_job(&self, job: &Job) -> FolioResult<()> {
        let lock = self.lock_for(job.id);
        let _guard = lock.lock().await;
        write_atomic(&self.job_path(job.id), job).await
    }

    async fn update_job(&self, id: Uuid, apply: JobUpdate) -> FolioResult<Job> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let path = self.job_path(id);
        let mut job: Job = read_record(&path, "job")
            .await?
            .ok_or(FolioError::UnknownJob(id))?;
        apply(&mut job)?;
        write_atomic(&path, &job).await?;
        Ok(job)
    }

    async fn list_jobs(&self) -> FolioResult<Vec<Uuid>> {
        list_ids(&self.dir.join("jobs")).await
    }
}
