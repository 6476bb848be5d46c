use crate::diagnostics::DiagnosticsSnapshot;
use crate::project::TaskId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Number of events retained on a persisted job.
pub const MAX_JOB_EVENTS: usize = 200;

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Being driven, suspended after its iteration budget, or interrupted.
    Running,
    /// Every task in scope has PASSED.
    Completed,
    /// Stopped on a non-retryable structural error.
    Failed,
    /// Nothing in scope is runnable although work remains.
    Blocked,
    /// A cancellation request was honoured at a task boundary.
    Cancelled,
}

impl JobStatus {
    /// Whether `resume` may pick this job up again.
    pub fn is_resumable(&self) -> bool {
        matches!(
            self,
            JobStatus::Running | JobStatus::Blocked | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Blocked => write!(f, "blocked"),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// The set of tasks a job is responsible for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "scope")]
pub enum JobPlan {
    /// Every task in the catalog.
    #[default]
    Full,
    /// Tasks whose layer is at most `layer`.
    ThroughLayer { layer: u32 },
    /// An explicit set of tasks.
    Tasks { ids: Vec<TaskId> },
}

impl JobPlan {
    pub fn includes(&self, task_id: &TaskId, layer: u32) -> bool {
        match self {
            JobPlan::Full => true,
            JobPlan::ThroughLayer { layer: max } => layer <= *max,
            JobPlan::Tasks { ids } => ids.contains(task_id),
        }
    }
}

/// An execution the job has started but not yet recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InFlightTask {
    pub task_id: TaskId,
    /// Claim token the executor stamps on the task while it is RUNNING.
    pub claim_id: Uuid,
}

/// Resumption cursor, persisted after every task execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCursor {
    /// Executions performed by this job across all of its runs.
    pub executions: u64,
    /// Last task executed.
    #[serde(default)]
    pub last_task: Option<TaskId>,
    /// Short outcome label of the last execution (`passed`, `gate_failed`, ...).
    #[serde(default)]
    pub last_outcome: Option<String>,
    /// How many times the job has been resumed.
    #[serde(default)]
    pub resumes: u32,
    /// Set just before an execution starts and cleared once it is recorded.
    /// A job found RUNNING with this set was interrupted mid-execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_flight: Option<InFlightTask>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobEventKind {
    Start,
    Resume,
    Step,
    Suspend,
    Complete,
    Blocked,
    Cancel,
    Error,
}

/// One entry in a job's progress log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    pub at: DateTime<Utc>,
    pub kind: JobEventKind,
    pub message: String,
    #[serde(default)]
    pub task_id: Option<TaskId>,
}

/// A bounded, resumable run over a project's pending tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub project_id: Uuid,
    #[serde(default)]
    pub plan: JobPlan,
    pub status: JobStatus,
    #[serde(default)]
    pub cursor: JobCursor,
    /// Human-readable reason when FAILED, BLOCKED or CANCELLED.
    #[serde(default)]
    pub reason: Option<String>,
    /// Diagnostics captured at the moment the job became BLOCKED.
    #[serde(default)]
    pub diagnostics: Option<DiagnosticsSnapshot>,
    #[serde(default)]
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub events: Vec<JobEvent>,
}

impl Job {
    pub fn new(project_id: Uuid, plan: JobPlan) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            project_id,
            plan,
            status: JobStatus::Running,
            cursor: JobCursor::default(),
            reason: None,
            diagnostics: None,
            cancel_requested: false,
            created_at: now,
            updated_at: now,
            finished_at: None,
            events: Vec::new(),
        }
    }

    /// Append an event, dropping the oldest beyond [`MAX_JOB_EVENTS`].
    pub fn push_event(
        &mut self,
        kind: JobEventKind,
        message: impl Into<String>,
        task_id: Option<TaskId>,
    ) {
        let now = Utc::now();
        self.events.push(JobEvent {
            at: now,
            kind,
            message: message.into(),
            task_id,
        });
        if self.events.len() > MAX_JOB_EVENTS {
            let excess = self.events.len() - MAX_JOB_EVENTS;
            self.events.drain(..excess);
        }
        self.updated_at = now;
    }

    /// Move to a final (or blocked) status.
    pub fn finish(&mut self, status: JobStatus, reason: Option<String>) {
        let now = Utc::now();
        self.status = status;
        self.reason = reason;
        self.finished_at = Some(now);
        self.updated_at = now;
    }

    /// Bring a resumable job back to RUNNING.
    pub fn reopen(&mut self) {
        self.status = JobStatus::Running;
        self.reason = None;
        self.diagnostics = None;
        self.cancel_requested = false;
        self.finished_at = None;
        self.cursor.resumes += 1;
        self.updated_at = Utc::now();
    }
}
