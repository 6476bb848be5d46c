use crate::gate::GateSpec;
use folio_core::{FolioError, FolioResult, TaskId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

fn default_max_retries() -> u32 {
    3
}

/// Immutable definition of one pipeline task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub id: TaskId,
    #[serde(default)]
    pub name: String,
    pub layer: u32,
    #[serde(default)]
    pub purpose: String,
    /// Named inputs, resolved from constraints and upstream outputs.
    #[serde(default)]
    pub inputs: Vec<String>,
    /// Keys the produced output must carry.
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub gate: GateSpec,
    #[serde(default)]
    pub fail_condition: String,
    #[serde(default)]
    pub dependencies: Vec<TaskId>,
    /// Attempt cap; reaching it on a failure makes the task terminal.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Repair rounds allowed within one attempt after a gate rejection.
    #[serde(default)]
    pub max_repairs: u32,
}

impl TaskDefinition {
    pub fn new(id: impl Into<TaskId>, layer: u32) -> Self {
        let id = id.into();
        Self {
            name: id.to_string(),
            id,
            layer,
            purpose: String::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            gate: GateSpec::default(),
            fail_condition: String::new(),
            dependencies: Vec::new(),
            max_retries: default_max_retries(),
            max_repairs: 0,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_purpose(mut self, purpose: impl Into<String>) -> Self {
        self.purpose = purpose.into();
        self
    }

    pub fn with_dependencies<I, T>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<TaskId>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_inputs<I, T>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.inputs = inputs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_outputs<I, T>(mut self, outputs: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.outputs = outputs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_gate(mut self, gate: GateSpec) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_fail_condition(mut self, condition: impl Into<String>) -> Self {
        self.fail_condition = condition.into();
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_max_repairs(mut self, max_repairs: u32) -> Self {
        self.max_repairs = max_repairs;
        self
    }
}

#[derive(Deserialize)]
struct CatalogFile {
    tasks: Vec<TaskDefinition>,
}

/// Process-wide catalog of task definitions, fixed at startup.
///
/// Tasks are kept ordered by layer, then by declaration order.
#[derive(Debug, Clone)]
pub struct TaskRegistry {
    tasks: Vec<TaskDefinition>,
    index: HashMap<TaskId, usize>,
    layers: Vec<u32>,
}

impl TaskRegistry {
    /// Build a registry. Duplicate ids are rejected; other structural
    /// defects are reported by [`TaskRegistry::validate`].
    pub fn new(definitions: Vec<TaskDefinition>) -> FolioResult<Self> {
        let mut tasks = definitions;
        // Stable: keeps declaration order within a layer.
        tasks.sort_by_key(|t| t.layer);

        let mut index = HashMap::with_capacity(tasks.len());
        for (i, task) in tasks.iter().enumerate() {
            if index.insert(task.id.clone(), i).is_some() {
                return Err(FolioError::Config(format!(
                    "duplicate task id '{}' in catalog",
                    task.id
                )));
            }
        }

        let mut layers: Vec<u32> = tasks.iter().map(|t| t.layer).collect();
        layers.dedup();

        Ok(Self {
            tasks,
            index,
            layers,
        })
    }

    /// Load a catalog from TOML (`[[tasks]]` tables).
    pub fn from_toml_str(source: &str) -> FolioResult<Self> {
        let file: CatalogFile = toml::from_str(source)
            .map_err(|e| FolioError::Config(format!("invalid catalog: {e}")))?;
        Self::new(file.tasks)
    }

    pub fn get(&self, id: &str) -> Option<&TaskDefinition> {
        self.index.get(id).map(|&i| &self.tasks[i])
    }

    /// Like [`TaskRegistry::get`], failing with [`FolioError::UnknownTask`].
    pub fn require(&self, id: &str) -> FolioResult<&TaskDefinition> {
        self.get(id)
            .ok_or_else(|| FolioError::UnknownTask(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn tasks_in_layer(&self, layer: u32) -> impl Iterator<Item = &TaskDefinition> {
        self.tasks.iter().filter(move |t| t.layer == layer)
    }

    /// All tasks, layer ascending, then declaration order.
    pub fn all_ordered(&self) -> &[TaskDefinition] {
        &self.tasks
    }

    pub fn task_ids(&self) -> impl Iterator<Item = &TaskId> {
        self.tasks.iter().map(|t| &t.id)
    }

    /// Distinct layer indices, ascending.
    pub fn layers(&self) -> &[u32] {
        &self.layers
    }

    /// The next-lower layer index present in the catalog.
    pub fn preceding_layer(&self, layer: u32) -> Option<u32> {
        self.layers.iter().copied().take_while(|&l| l < layer).last()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Every structural defect of the catalog, in a stable order.
    pub fn structural_issues(&self) -> Vec<String> {
        let mut issues = Vec::new();
        for task in &self.tasks {
            for dep in &task.dependencies {
                match self.get(dep.as_str()) {
                    None => issues.push(format!(
                        "task '{}' depends on unknown task '{dep}'",
                        task.id
                    )),
                    Some(d) if d.layer > task.layer => issues.push(format!(
                        "task '{}' (layer {}) depends on '{dep}' in later layer {}",
                        task.id, task.layer, d.layer
                    )),
                    Some(_) => {}
                }
            }
            if task.max_retries == 0 {
                issues.push(format!("task '{}' has a retry cap of 0", task.id));
            }
            for issue in task.gate.issues() {
                issues.push(format!("task '{}': {issue}", task.id));
            }
        }
        if let Some(id) = self.find_cycle() {
            issues.push(format!("dependency cycle through task '{id}'"));
        }
        issues
    }

    /// Fail with [`FolioError::Structural`] if the catalog has any defect.
    pub fn validate(&self) -> FolioResult<()> {
        let issues = self.structural_issues();
        if issues.is_empty() {
            Ok(())
        } else {
            Err(FolioError::Structural(issues.join("; ")))
        }
    }

    fn find_cycle(&self) -> Option<&TaskId> {
        let mut visited = vec![0_u8; self.tasks.len()];
        (0..self.tasks.len())
            .find(|&i| self.dfs_cycle(i, &mut visited))
            .map(|i| &self.tasks[i].id)
    }

    fn dfs_cycle(&self, i: usize, visited: &mut [u8]) -> bool {
        match visited[i] {
            1 => return true,  // back edge
            2 => return false, // done
            _ => {}
        }
        visited[i] = 1;
        for dep in &self.tasks[i].dependencies {
            if let Some(&j) = self.index.get(dep) {
                if self.dfs_cycle(j, visited) {
                    return true;
                }
            }
        }
        visited[i] = 2;
        false
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn abc() -> TaskRegistry {
        TaskRegistry::new(vec![
            TaskDefinition::new("b", 2).with_dependencies(["a"]),
            TaskDefinition::new("a", 1),
            TaskDefinition::new("c", 2).with_dependencies(["a"]),
        ])
        .unwrap()
    }

    #[test]
    fn test_ordering_layer_then_declaration() {
        let reg = abc();
        let ids: Vec<&str> = reg.task_ids().map(TaskId::as_str).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(reg.layers(), &[1, 2]);
        let layer2: Vec<&str> = reg.tasks_in_layer(2).map(|t| t.id.as_str()).collect();
        assert_eq!(layer2, vec!["b", "c"]);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let err = TaskRegistry::new(vec![TaskDefinition::new("a", 0), TaskDefinition::new("a", 1)])
            .unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }

    #[test]
    fn test_preceding_layer_skips_gaps() {
        let reg = TaskRegistry::new(vec![TaskDefinition::new("a", 0), TaskDefinition::new("b", 5)])
            .unwrap();
        assert_eq!(reg.preceding_layer(5), Some(0));
        assert_eq!(reg.preceding_layer(0), None);
    }

    #[test]
    fn test_require_unknown() {
        let err = abc().require("zzz").unwrap_err();
        assert!(matches!(err, FolioError::UnknownTask(_)));
    }

    #[test]
    fn test_valid_catalog() {
        assert!(abc().validate().is_ok());
    }

    #[test]
    fn test_unknown_dependency_is_structural() {
        let reg = TaskRegistry::new(vec![
            TaskDefinition::new("a", 1).with_dependencies(["ghost"]),
        ])
        .unwrap();
        let err = reg.validate().unwrap_err();
        assert!(err.is_structural());
        assert!(err.to_string().contains("unknown task 'ghost'"));
    }

    #[test]
    fn test_later_layer_and_zero_cap() {
        let reg = TaskRegistry::new(vec![
            TaskDefinition::new("a", 1).with_dependencies(["b"]),
            TaskDefinition::new("b", 2).with_max_retries(0),
        ])
        .unwrap();
        let issues = reg.structural_issues();
        assert_eq!(issues.len(), 2);
        assert!(issues[0].contains("later layer 2"));
        assert!(issues[1].contains("retry cap of 0"));
    }

    #[test]
    fn test_cycle_detected() {
        let reg = TaskRegistry::new(vec![
            TaskDefinition::new("a", 1).with_dependencies(["b"]),
            TaskDefinition::new("b", 1).with_dependencies(["a"]),
        ])
        .unwrap();
        let issues = reg.structural_issues();
        assert!(issues.iter().any(|i| i.contains("dependency cycle")));
    }

    #[test]
    fn test_from_toml() {
        let reg = TaskRegistry::from_toml_str(
            r#"
            [[tasks]]
            id = "concept"
            layer = 1
            outputs = ["hook"]

            [[tasks.gate.predicates]]
            check = "non_empty"
            field = "hook"

            [[tasks]]
            id = "outline"
            layer = 2
            dependencies = ["concept"]
            max_retries = 5
            "#,
        )
        .unwrap();
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.get("concept").unwrap().max_retries, 3);
        assert_eq!(reg.get("concept").unwrap().gate.predicates.len(), 1);
        assert_eq!(reg.get("outline").unwrap().max_retries, 5);
        assert!(reg.validate().is_ok());
    }

    #[test]
    fn test_from_toml_rejects_garbage() {
        let err = TaskRegistry::from_toml_str("tasks = 3").unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }
}
