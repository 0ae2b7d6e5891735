//! Concrete agent variants built by [`crate::DefaultAgentFactory`].

pub mod browser;
pub mod code_planning;
pub mod code_review;
pub mod coordination;
pub mod knowledge;
pub mod research;

pub use browser::BrowserAutomationAgent;
pub use code_planning::CodePlanningAgent;
pub use code_review::CodeReviewAgent;
pub use coordination::PipelineCoordinationAgent;
pub use knowledge::KnowledgeRetrievalAgent;
pub use research::ResearchAgent;
pub use smoke_test::SmokeTestAgent;

use crate::agent::{AgentContext, AgentOutput, RunOptions};
use crate::provider::{CompletionProvider, CompletionResponse};
use ubos_core::{UbosError, UbosResult};

/// Spec id and requirement id every agent carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentIdentity {
    pub id: String,
    pub requirement_id: String,
}

impl AgentIdentity {
    pub fn new(id: impl Into<String>, requirement_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            requirement_id: requirement_id.into(),
        }
    }
}

/// Maximum characters of an upstream output quoted into a prompt.
const UPSTREAM_PREVIEW_CHARS: usize = 2000;

/// The first `max` characters of `text`, with a trailing `...` when cut.
pub(crate) fn preview(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// Reject blank input for agents that cannot do anything without it.
pub(crate) fn require_input(options: &RunOptions) -> UbosResult<&str> {
    let input = options.input.trim();
    if input.is_empty() {
        return Err(UbosError::InvalidInput("input must not be empty".to_string()));
    }
    Ok(input)
}

/// Render earlier agents' outputs as a prompt section, or `None` when there are none.
pub(crate) fn upstream_section(context: &AgentContext) -> Option<String> {
    let outputs = context.prior_outputs();
    if outputs.is_empty() {
        return None;
    }
    let mut section = String::from("Results from earlier steps:\n");
    for (key, value) in outputs {
        section.push_str(&format!(
            "\n[{key}]\n{}\n",
            preview(value, UPSTREAM_PREVIEW_CHARS)
        ));
    }
    Some(section)
}

/// Attach provider name, model and cost to an agent output.
pub(crate) fn with_completion_metadata(
    output: AgentOutput,
    provider: &dyn CompletionProvider,
    response: &CompletionResponse,
) -> AgentOutput {
    let mut output = output
        .with_cost(response.cost_usd())
        .with_metadata("provider", provider.name().into());
    if let Some(model) = &response.model {
        output = output.with_metadata("model", model.clone().into());
    }
    if let Some(total) = response.usage.as_ref().and_then(|u| u.total_tokens) {
        output = output.with_metadata("totalTokens", total.into());
    }
    output
}
