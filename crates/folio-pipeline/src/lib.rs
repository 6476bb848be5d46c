//! Orchestration core of the Folio content pipeline.
//!
//! Tasks are grouped into ordered layers and wired by dependencies. The
//! resolver decides what may run, the executor runs one task end to end
//! against a [`folio_agent::Generator`], the gate evaluator accepts or rejects
//! its output, and the job runner drives bounded, resumable sequences of
//! executions.
//!
//! # Main types
//!
//! - [`Pipeline`]: Entry point for every boundary operation.
//! - [`TaskRegistry`]: Immutable catalog of [`TaskDefinition`]s.
//! - [`Executor`]: Claims, generates, gates and persists one task execution.
//! - [`JobRunner`]: Resumable, checkpointed job loop.
//! - [`PipelineMonitor`]: Per-task execution metrics.

/// Built-in book-development catalog.
pub mod catalog;
/// Diagnostics engine.
pub mod diagnostics;
/// Single-task executor and generator table.
pub mod executor;
/// Structured gate predicates.
pub mod gate;
/// Job runner.
pub mod jobs;
/// Derived layer status.
pub mod layers;
/// Concurrency limits around the generation collaborator.
pub mod limiter;
/// Execution metrics.
pub mod monitor;
/// Facade over the boundary operations.
pub mod pipeline;
/// Task catalog.
pub mod registry;
/// Dependency resolver.
pub mod resolver;

pub use catalog::{default_catalog, DEFAULT_MAX_REPAIRS};
pub use diagnostics::diagnose;
pub use executor::{
    ExecutionOutcome, Executor, FailureKind, GeneratorTable, INTERRUPTED_REASON,
    MAX_REPAIR_OUTPUT_BYTES,
};
pub use gate::{GateOutcome, GateSpec, Predicate};
pub use jobs::{JobRunner, DEFAULT_MAX_ITERATIONS};
pub use limiter::{ConcurrencyLimiter, LimitsConfig};
pub use monitor::{PipelineMonitor, TaskMetrics};
pub use pipeline::{Pipeline, ProjectExport, ProjectStatus, EXPORT_FORMAT};
pub use registry::{TaskDefinition, TaskRegistry};
