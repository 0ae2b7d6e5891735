//! Agent contract, built-in agent variants and the completion provider seam.
//!
//! Every agent implements [`Agent`]: callers invoke [`Agent::run`], which
//! never fails and always returns an [`ubos_core::AgentResult`]. Agents are
//! built from plan specs by an [`AgentFactory`]; [`DefaultAgentFactory`]
//! knows every [`ubos_core::AgentType`].
//!
//! # Main types
//!
//! - [`Agent`] — The run contract with dry-run and panic handling built in.
//! - [`RunOptions`] / [`AgentContext`] — Per-run input and shared context.
//! - [`AgentFactory`] / [`DefaultAgentFactory`] — Spec to agent mapping.
//! - [`CompletionProvider`] — Text generation used by LLM-backed agents.
//! - [`OpenAiCompatibleProvider`] — Chat completions over HTTP.

/// The agent trait and run options.
pub mod agent;
/// Built-in agent variants.
#[allow(missing_docs)]
pub mod agents;
/// Spec to agent construction.
pub mod factory;
/// Completion providers.
#[allow(missing_docs)]
pub mod provider;

pub use agent::{
    dry_run_output, output_key, Agent, AgentContext, AgentOutput, RunOptions, OUTPUT_KEY_PREFIX,
};
pub use factory::{AgentFactory, DefaultAgentFactory};
pub use provider::{
    ChatMessage, ChatRole, CompletionProvider, CompletionRequest, CompletionResponse,
    OpenAiCompatibleProvider, ProviderConfig, UnconfiguredProvider, Usage,
};
