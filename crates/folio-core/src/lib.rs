//! Core types and error definitions for the Folio pipeline orchestrator.
//!
//! This crate provides the foundational types shared across all Folio crates:
//! the error taxonomy, the per-project run state, jobs, and the diagnostics
//! payload handed to operators.
//!
//! # Main types
//!
//! - [`FolioError`]: Unified error enum for all Folio subsystems.
//! - [`FolioResult`]: Convenience alias for `Result<T, FolioError>`.
//! - [`TaskId`]: Identifier of a task definition in the catalog.
//! - [`Project`]: Per-project run state, one [`TaskRun`] per task.
//! - [`Job`]: A bounded, resumable run over a project's pending tasks.
//! - [`DiagnosticsSnapshot`]: Why a project is (not) progressing.

/// Diagnostics payload types.
pub mod diagnostics;
/// Job records, plans and cursors.
pub mod job;
/// Project and task run state.
pub mod project;

pub use diagnostics::{
    BlockedCandidate, DiagnosticsSnapshot, LockedLayerReason, TaskStatusEntry, UnmetDependency,
    MISSING_DEPENDENCY,
};
pub use job::{
    InFlightTask, Job, JobCursor, JobEvent, JobEventKind, JobPlan, JobStatus, MAX_JOB_EVENTS,
};
pub use project::{LayerStatus, Project, TaskId, TaskRun, TaskStatus};

use uuid::Uuid;

// --- Error types ---

/// Top-level error type for Folio.
///
/// Variants map onto the operator-facing codes returned by [`FolioError::code`].
#[derive(Debug, thiserror::Error)]
pub enum FolioError {
    /// The task is not currently runnable (not PENDING, unmet dependency,
    /// locked layer, or another caller claimed it first).
    #[error("Task not available: {task_id} ({reason})")]
    NotAvailable {
        /// The task that was requested.
        task_id: TaskId,
        /// Why it is not runnable right now.
        reason: String,
    },

    /// The requested transition is not valid from the task's current status.
    #[error("Invalid state for task {task_id}: {reason}")]
    InvalidState {
        /// The task that was requested.
        task_id: TaskId,
        /// Description of the rejected transition.
        reason: String,
    },

    /// The task id is not part of the catalog.
    #[error("Unknown task: {0}")]
    UnknownTask(String),

    /// No project with this id exists in the store.
    #[error("Unknown project: {0}")]
    UnknownProject(Uuid),

    /// No job with this id exists in the store.
    #[error("Unknown job: {0}")]
    UnknownJob(Uuid),

    /// A job for the same project is already running, or the job cannot be
    /// driven from its current status.
    #[error("Job conflict: {0}")]
    JobConflict(String),

    /// The catalog or a project's shape is inconsistent (unknown dependency,
    /// cycle, ...). Non-retryable.
    #[error("Structural error: {0}")]
    Structural(String),

    /// The generation collaborator was unreachable or returned a malformed or
    /// truncated response. Retryable against the task's cap.
    #[error("Transient generation error: {0}")]
    TransientGeneration(String),

    /// An error related to project or job persistence.
    #[error("Store error: {0}")]
    Store(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FolioError {
    /// Stable upper-snake code for operators and tools.
    pub fn code(&self) -> &'static str {
        match self {
            FolioError::NotAvailable { .. } => "NOT_AVAILABLE",
            FolioError::InvalidState { .. } => "INVALID_STATE",
            FolioError::UnknownTask(_) => "UNKNOWN_TASK",
            FolioError::UnknownProject(_) => "UNKNOWN_PROJECT",
            FolioError::UnknownJob(_) => "UNKNOWN_JOB",
            FolioError::JobConflict(_) => "JOB_CONFLICT",
            FolioError::Structural(_) => "STRUCTURAL_ERROR",
            FolioError::TransientGeneration(_) => "TRANSIENT_GENERATION_ERROR",
            FolioError::Store(_) => "STORE_ERROR",
            FolioError::Config(_) => "CONFIG_ERROR",
            FolioError::Json(_) => "JSON_ERROR",
            FolioError::Io(_) => "IO_ERROR",
        }
    }

    /// Whether the error is a structural defect that retrying cannot fix.
    pub fn is_structural(&self) -> bool {
        matches!(self, FolioError::Structural(_) | FolioError::UnknownTask(_))
    }
}

/// A convenience `Result` alias using [`FolioError`].
pub type FolioResult<T> = Result<T, FolioError>;
