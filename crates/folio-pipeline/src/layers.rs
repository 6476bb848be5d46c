use crate::registry::TaskRegistry;
use folio_core::{LayerStatus, Project, TaskStatus};
use std::collections::BTreeMap;

/// Status of a task in `project`; tasks the project does not track count as PENDING.
pub(crate) fn task_status(project: &Project, id: &str) -> TaskStatus {
    project.status_of(id).unwrap_or(TaskStatus::Pending)
}

fn all_passed(registry: &TaskRegistry, project: &Project, layer: u32) -> bool {
    registry
        .tasks_in_layer(layer)
        .all(|t| project.is_passed(t.id.as_str()))
}

/// Derive the status of one layer from its tasks and its preceding layer.
pub fn layer_status(registry: &TaskRegistry, project: &Project, layer: u32) -> LayerStatus {
    if let Some(prev) = registry.preceding_layer(layer) {
        if !all_passed(registry, project, prev) {
            return LayerStatus::Locked;
        }
    }
    if all_passed(registry, project, layer) {
        return LayerStatus::Completed;
    }
    let started = registry.tasks_in_layer(layer).any(|t| {
        project
            .task(t.id.as_str())
            .is_some_and(|run| run.attempts > 0 || run.status != TaskStatus::Pending)
    });
    if started {
        LayerStatus::InProgress
    } else {
        LayerStatus::Available
    }
}

/// Status of every layer in the catalog, keyed by layer index.
pub fn layer_statuses(registry: &TaskRegistry, project: &Project) -> BTreeMap<u32, LayerStatus> {
    registry
        .layers()
        .iter()
        .map(|&layer| (layer, layer_status(registry, project, layer)))
        .collect()
}
