use crate::layers::{layer_statuses, task_status};
use crate::registry::TaskRegistry;
use crate::resolver;
use folio_core::{
    BlockedCandidate, DiagnosticsSnapshot, LayerStatus, LockedLayerReason, Project,
    TaskStatus, TaskStatusEntry, UnmetDependency, MISSING_DEPENDENCY,
};
use std::collections::BTreeMap;

/// Explain why `project` is or is not progressing.
///
/// Pure: reads nothing but its arguments, so repeated calls on unchanged
/// state yield equal snapshots.
pub fn diagnose(registry: &TaskRegistry, project: &Project) -> DiagnosticsSnapshot {
    let layers = layer_statuses(registry, project);

    let blocked_candidates = registry
        .all_ordered()
        .iter()
        .filter(|def| task_status(project, def.id.as_str()) == TaskStatus::Pending)
        .filter_map(|def| {
            let unmet: Vec<UnmetDependency> = def
                .dependencies
                .iter()
                .filter_map(|dep| match project.status_of(dep.as_str()) {
                    Some(TaskStatus::Passed) => None,
                    Some(s) => Some(UnmetDependency {
                        dependency: dep.clone(),
                        status: s.as_str().to_string(),
                    }),
                    None => Some(UnmetDependency {
                        dependency: dep.clone(),
                        status: MISSING_DEPENDENCY.to_string(),
                    }),
                })
                .collect();
            (!unmet.is_empty()).then(|| BlockedCandidate {
                task_id: def.id.clone(),
                layer: def.layer,
                unmet_dependencies: unmet,
            })
        })
        .collect();

    let locked_layer_reasons = layers
        .iter()
        .filter(|(_, status)| **status == LayerStatus::Locked)
        .filter_map(|(&layer, _)| {
            let unlocking = registry.preceding_layer(layer)?;
            let tasks_not_passed = registry
                .tasks_in_layer(unlocking)
                .filter(|t| !project.is_passed(t.id.as_str()))
                .map(|t| TaskStatusEntry {
                    task_id: t.id.clone(),
                    status: task_status(project, t.id.as_str()).as_str().to_string(),
                })
                .collect();
            Some(LockedLayerReason {
                layer,
                unlocking_layer: unlocking,
                tasks_not_passed,
            })
        })
        .collect();

    let mut task_status_counts: BTreeMap<String, usize> = TaskStatus::ALL
        .iter()
        .map(|s| (s.as_str().to_string(), 0))
        .collect();
    for id in registry.task_ids() {
        let status = task_status(project, id.as_str());
        *task_status_counts
            .entry(status.as_str().to_string())
            .or_default() += 1;
    }

    let mut layer_status_counts: BTreeMap<String, usize> = LayerStatus::ALL
        .iter()
        .map(|s| (s.as_str().to_string(), 0))
        .collect();
    for status in layers.values() {
        *layer_status_counts
            .entry(status.as_str().to_string())
            .or_default() += 1;
    }

    DiagnosticsSnapshot {
        project_id: project.id,
        complete: resolver::is_complete(registry, project),
        available: resolver::available(registry, project),
        blocked_candidates,
        locked_layer_reasons,
        task_status_counts,
        layer_status_counts,
    }
}
