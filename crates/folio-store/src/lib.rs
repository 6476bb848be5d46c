//! Persistence for project run state and jobs.
//!
//! The orchestration core only talks to the [`ProjectStore`] and [`JobStore`]
//! traits. Two back-ends ship here: [`MemoryStore`] for tests and embedding,
//! and [`FileStore`] which keeps one JSON file per project and per job.

pub mod file;
pub mod memory;
pub mod store;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use store::{CasOutcome, ExpectedRun, JobStore, JobUpdate, ProjectStore};
