//! Core types and error definitions for the UBOS orchestration crates.
//!
//! This crate holds the data model every other crate speaks: analyzed tasks
//! and their requirements, agent specs, orchestration plans, and the results
//! agents and plans produce.
//!
//! # Main types
//!
//! - [`UbosError`] — Unified error enum for all orchestration subsystems.
//! - [`UbosResult`] — Convenience alias for `Result<T, UbosError>`.
//! - [`AnalyzedTask`] / [`TaskRequirement`] — The decomposed task.
//! - [`AgentSpec`] / [`AgentType`] — Which agent handles which requirement.
//! - [`OrchestrationPlan`] — Specs plus the ordered batch schedule.
//! - [`AgentResult`] / [`OrchestrationResult`] — What execution produced.

/// Error enum and result alias.
pub mod error;
/// Orchestration plan and batch layering.
pub mod plan;
/// Agent and orchestration results.
pub mod result;
/// Task, requirement and agent spec types.
#[allow(missing_docs)]
pub mod types;

pub use error::{UbosError, UbosResult};
pub use plan::{batches_from_dependencies, OrchestrationPlan};
pub use result::{AgentResult, OrchestrationResult};
pub use types::{
    AgentSpec, AgentType, AnalyzedTask, Capability, Complexity, EstimatedResources, RiskLevel,
    TaskRequirement,
};
