//! Plan execution for UBOS: batch scheduling, resource gating, result
//! aggregation, monitoring and run history.
//!
//! The [`ExecutionCoordinator`] runs an [`ubos_core::OrchestrationPlan`]
//! batch by batch under a concurrency cap, passing intermediate outputs to
//! later agents through a shared context. The [`Orchestrator`] wraps it with
//! aggregation and persistence.
//!
//! # Main types
//!
//! - [`Orchestrator`] — Execute, aggregate and save a run.
//! - [`ExecutionCoordinator`] — Bounded batch execution, local or over the bus.
//! - [`ResourceManager`] — Global and per-project slots plus daily spend.
//! - [`ResultAggregator`] — Success predicate and text summary.
//! - [`ExecutionMonitor`] — Per-agent-type state and metrics.
//! - [`RunStore`] — `run_{taskId}.json` persistence.
//! - [`UbosConfig`] — TOML configuration with environment overrides.

/// Result collection and summaries.
pub mod aggregator;
/// TOML configuration.
#[allow(missing_docs)]
pub mod config;
/// Batch execution of plans.
#[allow(missing_docs)]
pub mod coordinator;
/// The orchestrator facade.
#[allow(missing_docs)]
pub mod engine;
/// Persisted runs.
#[allow(missing_docs)]
pub mod history;
/// Agent state and metrics.
#[allow(missing_docs)]
pub mod monitor;
/// Concurrency slots and budget.
#[allow(missing_docs)]
pub mod resources;

pub use aggregator::{ResultAggregator, SUMMARY_TEXT_CHARS};
pub use config::{ExecutionConfig, ResourceConfig, UbosConfig};
pub use coordinator::{
    ExecutionCoordinator, ExecutionOptions, DEFAULT_PROJECT, MAX_DEFAULT_CONCURRENCY,
};
pub use engine::Orchestrator;
pub use history::{RunHistory, RunStore};
pub use monitor::{AgentMetrics, AgentState, ExecutionMonitor, WorkerStatus};
pub use resources::{
    JsonSnapshotStore, ProjectSlots, ResourceManager, ResourceSnapshot, SnapshotStore,
};
