use super::Generator;
use crate::context::PromptContext;
use async_trait::async_trait;
use folio_core::FolioResult;
use serde_json::{Map, Value};

/// Emits `"[Generated <output>]"` for every expected output key.
///
/// Only useful with gates that check presence; richer gates will reject it.
#[derive(Debug, Default)]
pub struct PlaceholderBackend;

impl PlaceholderBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Generator for PlaceholderBackend {
    fn name(&self) -> &str {
        "placeholder"
    }

    async fn generate(&self, ctx: &PromptContext) -> FolioResult<Value> {
        let output: Map<String, Value> = ctx
            .expected_outputs
            .iter()
            .map(|key| (key.clone(), Value::String(format!("[Generated {key}]"))))
            .collect();
        Ok(Value::Object(output))
    }
}
