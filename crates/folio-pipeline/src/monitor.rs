use folio_core::TaskId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Counters for one task across all projects served by this process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMetrics {
    pub executions: u64,
    pub passes: u64,
    pub gate_failures: u64,
    pub transient_failures: u64,
    /// Executions that left the task terminally FAILED.
    pub exhausted: u64,
    /// Repair rounds requested after gate rejections.
    #[serde(default)]
    pub repair_rounds: u64,
    /// Passes reached only through at least one repair round.
    #[serde(default)]
    pub repaired_passes: u64,
    pub duration_ms: u64,
}

/// Tracks execution metrics per task.
pub struct PipelineMonitor {
    metrics: Arc<RwLock<BTreeMap<TaskId, TaskMetrics>>>,
}

impl PipelineMonitor {
    pub fn new() -> Self {
        Self {
            metrics: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    async fn update(&self, task_id: &TaskId, duration_ms: u64, f: impl FnOnce(&mut TaskMetrics)) {
        let mut metrics = self.metrics.write().await;
        let entry = metrics.entry(task_id.clone()).or_default();
        entry.executions += 1;
        entry.duration_ms += duration_ms;
        f(entry);
    }

    pub async fn record_pass(&self, task_id: &TaskId, duration_ms: u64) {
        self.update(task_id, duration_ms, |m| m.passes += 1).await;
    }

    /// Record a gate rejection; `terminal` when it exhausted the retry cap.
    pub async fn record_gate_failure(&self, task_id: &TaskId, duration_ms: u64, terminal: bool) {
        self.update(task_id, duration_ms, |m| {
            m.gate_failures += 1;
            if terminal {
                m.exhausted += 1;
            }
        })
        .await;
    }

    /// Record a transient generation failure; `terminal` when it exhausted the retry cap.
    pub async fn record_transient_failure(
        &self,
        task_id: &TaskId,
        duration_ms: u64,
        terminal: bool,
    ) {
        self.update(task_id, duration_ms, |m| {
            m.transient_failures += 1;
            if terminal {
                m.exhausted += 1;
            }
        })
        .await;
    }

    /// Record the repair rounds of one execution; not an execution of its own.
    pub async fn record_repairs(&self, task_id: &TaskId, rounds: u32, passed: bool) {
        if rounds == 0 {
            return;
        }
        let mut metrics = self.metrics.write().await;
        let entry = metrics.entry(task_id.clone()).or_default();
        entry.repair_rounds += u64::from(rounds);
        if passed {
            entry.repaired_passes += 1;
        }
    }

    pub async fn get(&self, task_id: &TaskId) -> Option<TaskMetrics> {
        self.metrics.read().await.get(task_id).cloned()
    }

    pub async fn snapshot(&self) -> BTreeMap<TaskId, TaskMetrics> {
        self.metrics.read().await.clone()
    }

    /// Sum over all tasks.
    pub async fn aggregate(&self) -> TaskMetrics {
        let metrics = self.metrics.read().await;
        let mut total = TaskMetrics::default();
        for m in metrics.values() {
            total.executions += m.executions;
            total.passes += m.passes;
            total.gate_failures += m.gate_failures;
            total.transient_failures += m.transient_failures;
            total.exhausted += m.exhausted;
            total.repair_rounds += m.repair_rounds;
            total.repaired_passes += m.repaired_passes;
            total.duration_ms += m.duration_ms;
        }
        total
    }

    pub async fn to_json(&self) -> serde_json::Value {
        let tasks = self.snapshot().await;
        let aggregate = self.aggregate().await;
        serde_json::json!({
            "tasks": tasks,
            "aggregate": aggregate,
        })
    }
}

impl Default for PipelineMonitor {
    fn default() -> Self {
        Self::new()
    }
}
