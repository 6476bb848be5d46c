use folio_core::{FolioError, FolioResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use uuid::Uuid;

fn default_per_project() -> usize {
    2
}

/// Bounds on simultaneous generation calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_per_project")]
    pub per_project: usize,
    /// Process-wide bound across all projects.
    #[serde(default)]
    pub global: Option<usize>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            per_project: default_per_project(),
            global: None,
        }
    }
}

/// Permits held for the duration of one generation call.
pub struct LimiterPermit {
    _project: OwnedSemaphorePermit,
    _global: Option<OwnedSemaphorePermit>,
}

/// Per-project (and optional process-wide) semaphore gate.
///
/// Callers beyond the bound wait for a permit.
pub struct ConcurrencyLimiter {
    per_project: usize,
    global: Option<Arc<Semaphore>>,
    projects: Mutex<HashMap<Uuid, Arc<Semaphore>>>,
}

impl ConcurrencyLimiter {
    pub fn new(config: &LimitsConfig) -> Self {
        Self {
            per_project: config.per_project.max(1),
            global: config.global.map(|n| Arc::new(Semaphore::new(n.max(1)))),
            projects: Mutex::new(HashMap::new()),
        }
    }

    fn project_semaphore(&self, project_id: Uuid) -> Arc<Semaphore> {
        self.projects
            .lock()
            .entry(project_id)
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_project)))
            .clone()
    }

    /// Wait for a slot for `project_id`. The project permit is taken first so a
    /// waiting caller never sits on a global slot.
    pub async fn acquire(&self, project_id: Uuid) -> FolioResult<LimiterPermit> {
        let project = self
            .project_semaphore(project_id)
            .acquire_owned()
            .await
            .map_err(|e| FolioError::Config(format!("concurrency limiter closed: {e}")))?;
        let global = match &self.global {
            Some(sem) => Some(
                sem.clone()
                    .acquire_owned()
                    .await
                    .map_err(|e| FolioError::Config(format!("concurrency limiter closed: {e}")))?,
            ),
            None => None,
        };
        Ok(LimiterPermit {
            _project: project,
            _global: global,
        })
    }

    /// Free project slots right now.
    pub fn available_permits(&self, project_id: Uuid) -> usize {
        self.project_semaphore(project_id).available_permits()
    }
}
