use crate::project::TaskId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Dependency status label used when the dependency is not part of the project.
pub const MISSING_DEPENDENCY: &str = "missing";

/// A dependency that is not yet PASSED.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnmetDependency {
    pub dependency: TaskId,
    /// Current status of the dependency, or `missing`.
    pub status: String,
}

/// A PENDING task held back by at least one unmet dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedCandidate {
    pub task_id: TaskId,
    pub layer: u32,
    pub unmet_dependencies: Vec<UnmetDependency>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatusEntry {
    pub task_id: TaskId,
    pub status: String,
}

/// Why a layer is still LOCKED: the tasks of its unlocking layer that have not passed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedLayerReason {
    pub layer: u32,
    pub unlocking_layer: u32,
    pub tasks_not_passed: Vec<TaskStatusEntry>,
}

/// Operator-facing explanation of a project's progress.
///
/// Ordered maps keep the serialized form byte-stable across calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticsSnapshot {
    pub project_id: Uuid,
    /// Every task in the project has PASSED.
    pub complete: bool,
    pub available: Vec<TaskId>,
    pub blocked_candidates: Vec<BlockedCandidate>,
    pub locked_layer_reasons: Vec<LockedLayerReason>,
    pub task_status_counts: BTreeMap<String, usize>,
    pub layer_status_counts: BTreeMap<String, usize>,
}

impl DiagnosticsSnapshot {
    /// No task is runnable although the project is incomplete.
    pub fn is_stuck(&self) -> bool {
        !self.complete && self.available.is_empty()
    }

    pub fn task_count(&self, status: &str) -> usize {
        self.task_status_counts.get(status).copied().unwrap_or(0)
    }

    pub fn layer_count(&self, status: &str) -> usize {
        self.layer_status_counts.get(status).copied().unwrap_or(0)
    }
}
