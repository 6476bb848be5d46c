//! Generation collaborator for the Folio pipeline.
//!
//! A [`Generator`] turns a [`PromptContext`] into a structured JSON output.
//! Whether that output is acceptable is decided by the pipeline's gate
//! evaluator, never here; a generator only distinguishes "produced something"
//! from a transient failure ([`folio_core::FolioError::TransientGeneration`]).

pub mod backends;
pub mod config;
pub mod context;

pub use backends::messages::{extract_json, MessagesBackend};
pub use backends::placeholder::PlaceholderBackend;
pub use backends::{build_generator, Generator};
pub use config::{GeneratorConfig, GeneratorKind};
pub use context::{PromptContext, RepairRequest};
