use crate::layers::{layer_statuses, task_status};
use crate::registry::{TaskDefinition, TaskRegistry};
use folio_core::{JobPlan, LayerStatus, Project, TaskId, TaskStatus};
use std::collections::BTreeMap;

/// Why `def` cannot run right now, or `None` if it is available.
fn blocker(
    def: &TaskDefinition,
    project: &Project,
    layers: &BTreeMap<u32, LayerStatus>,
) -> Option<String> {
    let status = task_status(project, def.id.as_str());
    if status != TaskStatus::Pending {
        return Some(format!("status is {status}"));
    }
    for dep in &def.dependencies {
        match project.status_of(dep.as_str()) {
            Some(TaskStatus::Passed) => {}
            Some(s) => return Some(format!("dependency '{dep}' is {s}")),
            None => return Some(format!("dependency '{dep}' is missing")),
        }
    }
    match layers.get(&def.layer) {
        Some(s) if s.is_open() => None,
        Some(s) => Some(format!("layer {} is {s}", def.layer)),
        None => Some(format!("layer {} is unknown", def.layer)),
    }
}

/// Tasks that may run now: PENDING, every dependency PASSED, layer open.
///
/// Ordered by layer, then declaration order.
pub fn available(registry: &TaskRegistry, project: &Project) -> Vec<TaskId> {
    let layers = layer_statuses(registry, project);
    registry
        .all_ordered()
        .iter()
        .filter(|def| blocker(def, project, &layers).is_none())
        .map(|def| def.id.clone())
        .collect()
}

/// [`available`] restricted to the tasks a job plan covers.
pub fn available_in(registry: &TaskRegistry, project: &Project, plan: &JobPlan) -> Vec<TaskId> {
    available(registry, project)
        .into_iter()
        .filter(|id| {
            registry
                .get(id.as_str())
                .is_some_and(|def| plan.includes(id, def.layer))
        })
        .collect()
}

/// `None` when the task is available, otherwise the reason it is not.
pub fn why_unavailable(registry: &TaskRegistry, project: &Project, task_id: &str) -> Option<String> {
    let Some(def) = registry.get(task_id) else {
        return Some(format!("unknown task '{task_id}'"));
    };
    blocker(def, project, &layer_statuses(registry, project))
}

/// Every task in the catalog has PASSED.
pub fn is_complete(registry: &TaskRegistry, project: &Project) -> bool {
    registry
        .task_ids()
        .all(|id| project.is_passed(id.as_str()))
}

/// Every task the plan covers has PASSED.
pub fn is_complete_in(registry: &TaskRegistry, project: &Project, plan: &JobPlan) -> bool {
    registry
        .all_ordered()
        .iter()
        .filter(|def| plan.includes(&def.id, def.layer))
        .all(|def| project.is_passed(def.id.as_str()))
}
