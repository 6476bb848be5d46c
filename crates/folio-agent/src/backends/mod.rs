pub mod messages;
pub mod placeholder;

use crate::config::{GeneratorConfig, GeneratorKind};
use crate::context::PromptContext;
use async_trait::async_trait;
use folio_core::FolioResult;
use std::sync::Arc;

/// The external generation collaborator.
///
/// Implementations return whatever structured output they produced. A
/// well-formed payload that does not meet a task's gate is still `Ok`; the
/// pipeline's gate evaluator rejects it. `Err` means the collaborator could not
/// produce a usable payload at all (unreachable, timed out, malformed or
/// truncated response) and is counted as a transient failure.
///
/// To add a back-end:
/// 1. Create a module in `backends/`
/// 2. Implement `Generator` for your struct
/// 3. Add a variant to `GeneratorKind` in `config.rs`
/// 4. Wire it up in [`build_generator`]
#[async_trait]
pub trait Generator: Send + Sync {
    /// Short name used in logs and metrics.
    fn name(&self) -> &str;

    async fn generate(&self, ctx: &PromptContext) -> FolioResult<serde_json::Value>;
}

/// Build the default generator described by `config`.
pub fn build_generator(config: &GeneratorConfig) -> FolioResult<Arc<dyn Generator>> {
    match config.kind {
        GeneratorKind::Messages => Ok(Arc::new(messages::MessagesBackend::new(config.clone())?)),
        GeneratorKind::Placeholder => Ok(Arc::new(placeholder::PlaceholderBackend::new())),
    }
}
