use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Identifier of a task in the catalog (e.g. `"market_intelligence"`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Borrow<str> for TaskId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Status of a task's run state within a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Passed,
    Failed,
}

impl TaskStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [TaskStatus; 4] = [
        TaskStatus::Pending,
        TaskStatus::Running,
        TaskStatus::Passed,
        TaskStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Passed => "passed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derived status of a layer. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerStatus {
    Locked,
    Available,
    InProgress,
    Completed,
}

impl LayerStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [LayerStatus; 4] = [
        LayerStatus::Locked,
        LayerStatus::Available,
        LayerStatus::InProgress,
        LayerStatus::Completed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LayerStatus::Locked => "locked",
            LayerStatus::Available => "available",
            LayerStatus::InProgress => "in_progress",
            LayerStatus::Completed => "completed",
        }
    }

    /// Whether tasks of a layer in this status may be started.
    pub fn is_open(&self) -> bool {
        matches!(self, LayerStatus::Available | LayerStatus::InProgress)
    }
}

impl std::fmt::Display for LayerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run state of one task within one project.
///
/// `attempts` is incremented when the task is claimed (PENDING → RUNNING), so a
/// task that passes on its third try ends with `attempts == 3`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRun {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub attempts: u32,
    /// Present only once PASSED; immutable afterwards.
    #[serde(default)]
    pub output: Option<serde_json::Value>,
    /// Set when FAILED or between failed attempts.
    #[serde(default)]
    pub failure_reason: Option<String>,
    /// Token of the execution holding the task while RUNNING.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_id: Option<Uuid>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRun {
    pub fn new(task_id: TaskId) -> Self {
        Self {
            task_id,
            status: TaskStatus::Pending,
            attempts: 0,
            output: None,
            failure_reason: None,
            claim_id: None,
            updated_at: Utc::now(),
        }
    }

    /// PENDING → RUNNING under a fresh claim token, counting the attempt.
    pub fn claimed(&self) -> Self {
        self.claimed_by(Uuid::new_v4())
    }

    /// PENDING → RUNNING held by `claim_id`, counting the attempt.
    pub fn claimed_by(&self, claim_id: Uuid) -> Self {
        Self {
            status: TaskStatus::Running,
            attempts: self.attempts + 1,
            claim_id: Some(claim_id),
            updated_at: Utc::now(),
            ..self.clone()
        }
    }

    /// RUNNING → PASSED with the accepted output.
    pub fn passed(&self, output: serde_json::Value) -> Self {
        Self {
            status: TaskStatus::Passed,
            output: Some(output),
            failure_reason: None,
            claim_id: None,
            updated_at: Utc::now(),
            ..self.clone()
        }
    }

    /// RUNNING → PENDING while attempts remain, otherwise RUNNING → FAILED.
    pub fn failed_attempt(&self, reason: impl Into<String>, max_attempts: u32) -> Self {
        let reason = reason.into();
        let (status, failure_reason) = if self.attempts < max_attempts {
            (TaskStatus::Pending, reason)
        } else {
            (TaskStatus::Failed, format!("retries exhausted: {reason}"))
        };
        Self {
            status,
            output: None,
            failure_reason: Some(failure_reason),
            claim_id: None,
            updated_at: Utc::now(),
            ..self.clone()
        }
    }

    /// FAILED → PENDING with a fresh attempt budget.
    pub fn reset(&self) -> Self {
        Self {
            status: TaskStatus::Pending,
            attempts: 0,
            output: None,
            failure_reason: None,
            claim_id: None,
            updated_at: Utc::now(),
            ..self.clone()
        }
    }

    pub fn is_passed(&self) -> bool {
        self.status == TaskStatus::Passed
    }
}

/// Complete run state of a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub title: String,
    /// Initial input handed to every task (a JSON object).
    #[serde(default)]
    pub constraints: serde_json::Value,
    pub tasks: BTreeMap<TaskId, TaskRun>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    /// Create a project with one PENDING run state per task id.
    pub fn new(
        title: impl Into<String>,
        constraints: serde_json::Value,
        task_ids: impl IntoIterator<Item = TaskId>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            constraints,
            tasks: task_ids
                .into_iter()
                .map(|id| (id.clone(), TaskRun::new(id)))
                .collect(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn task(&self, id: &str) -> Option<&TaskRun> {
        self.tasks.get(id)
    }

    pub fn status_of(&self, id: &str) -> Option<TaskStatus> {
        self.tasks.get(id).map(|run| run.status)
    }

    pub fn is_passed(&self, id: &str) -> bool {
        self.status_of(id) == Some(TaskStatus::Passed)
    }

    /// Replace one task's run state and bump `updated_at`.
    pub fn put(&mut self, run: TaskRun) {
        self.updated_at = Utc::now();
        self.tasks.insert(run.task_id.clone(), run);
    }

    /// The accepted output of a PASSED task.
    pub fn output_of(&self, id: &str) -> Option<&serde_json::Value> {
        self.tasks
            .get(id)
            .filter(|run| run.is_passed())
            .and_then(|run| run.output.as_ref())
    }
}
