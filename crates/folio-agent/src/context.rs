use folio_core::TaskId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// A gate-rejected output handed back to the generator for correction within
/// the same attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairRequest {
    /// 1-based repair round within the attempt.
    pub round: u32,
    /// The gate's FAIL explanation.
    pub reason: String,
    /// The rejected output.
    pub output: Value,
}

/// Everything a generator is told about one task execution.
///
/// Built by the executor from the task definition, the project's constraints
/// and the PASSED outputs of the task's dependencies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptContext {
    pub project_id: Uuid,
    pub task_id: TaskId,
    pub task_name: String,
    pub purpose: String,
    pub layer: u32,
    /// 1-based attempt number of this execution.
    pub attempt: u32,
    pub max_attempts: u32,
    pub constraints: Value,
    /// PASSED output of every declared dependency, keyed by dependency id.
    pub dependency_outputs: BTreeMap<TaskId, Value>,
    /// Named inputs resolved from constraints and upstream outputs.
    pub inputs: BTreeMap<String, Value>,
    /// Keys the produced JSON object must carry.
    pub expected_outputs: Vec<String>,
    /// Why the previous attempt was rejected, if it was.
    pub previous_failure: Option<String>,
    /// Set when this call repairs a rejected output instead of generating anew.
    #[serde(default)]
    pub repair: Option<RepairRequest>,
}

impl PromptContext {
    pub fn system_prompt(&self) -> String {
        "You are an expert book development assistant. \
         Respond ONLY with a single valid JSON object. \
         No markdown, no explanation, no text outside the JSON."
            .to_string()
    }

    /// Render the user message sent to a text-based back-end.
    pub fn render_prompt(&self) -> String {
        if let Some(repair) = &self.repair {
            return self.render_repair_prompt(repair);
        }

        let mut prompt = format!(
            "# Task: {} ({})\nLayer {} | attempt {} of {}\n\n## Purpose\n{}\n",
            self.task_name, self.task_id, self.layer, self.attempt, self.max_attempts, self.purpose
        );

        prompt.push_str("\n## Constraints\n");
        prompt.push_str(&pretty(&self.constraints));
        prompt.push('\n');

        if !self.inputs.is_empty() {
            prompt.push_str("\n## Inputs\n");
            for (name, value) in &self.inputs {
                prompt.push_str(&format!("### {name}\n{}\n", pretty(value)));
            }
        }

        if !self.dependency_outputs.is_empty() {
            prompt.push_str("\n## Upstream outputs\n");
            for (dep, value) in &self.dependency_outputs {
                prompt.push_str(&format!("### {dep}\n{}\n", pretty(value)));
            }
        }

        if let Some(reason) = &self.previous_failure {
            prompt.push_str(&format!(
                "\n## Previous attempt rejected\n{reason}\nFix this in your response.\n"
            ));
        }

        prompt.push_str(&format!(
            "\n## Required output\nA JSON object with the keys: {}\n",
            self.expected_outputs.join(", ")
        ));
        prompt
    }

    /// Kept small: input names only, never their (possibly large) values.
    fn render_repair_prompt(&self, repair: &RepairRequest) -> String {
        let input_keys: Vec<&str> = self.inputs.keys().map(String::as_str).collect();
        format!(
            "# Repair: {} ({})\nRepair round {} of attempt {}\n\n\
             ## Validation failure\n{}\n\n\
             ## Required output keys\n{}\n\n\
             ## Available input keys\n{}\n\n\
             ## Constraints\n{}\n\n\
             ## Output to repair\n{}\n\n\
             Return the corrected JSON object. Change only what the failure requires.\n",
            self.task_name,
            self.task_id,
            repair.round,
            self.attempt,
            repair.reason,
            self.expected_outputs.join(", "),
            input_keys.join(", "),
            pretty(&self.constraints),
            pretty(&repair.output),
        )
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
