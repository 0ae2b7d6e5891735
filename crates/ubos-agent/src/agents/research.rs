use super::{require_input, upstream_section, with_completion_metadata, AgentIdentity};
use crate::agent::{Agent, AgentContext, AgentOutput, RunOptions};
use crate::provider::{ChatMessage, CompletionProvider, CompletionRequest};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;
use ubos_core::{AgentType, UbosResult};

const SYSTEM_PROMPT: &str = "You are a research analyst. Produce a concise, well-structured \
research brief: key findings, open questions, and recommended next steps. \
Cite sources by name when you rely on them.";

/// Produces a research brief through the completion provider.
pub struct ResearchAgent {
    identity: AgentIdentity,
    provider: Arc<dyn CompletionProvider>,
}

impl ResearchAgent {
    pub fn new(identity: AgentIdentity, provider: Arc<dyn CompletionProvider>) -> Self {
        Self { identity, provider }
    }
}

#[async_trait]
impl Agent for ResearchAgent {
    fn id(&self) -> &str {
        &self.identity.id
    }

    fn requirement_id(&self) -> &str {
        &self.identity.requirement_id
    }

    fn agent_type(&self) -> AgentType {
        AgentType::Research
    }

    async fn execute(
        &self,
        options: &RunOptions,
        context: &AgentContext,
    ) -> UbosResult<AgentOutput> {
        let topic = require_input(options)?;

        let mut prompt = format!("Research topic:\n{topic}\n");
        if let Some(focus) = context.get_str("focus") {
            prompt.push_str(&format!("\nFocus on: {focus}\n"));
        }
        if let Some(upstream) = upstream_section(context) {
            prompt.push('\n');
            prompt.push_str(&upstream);
        }

        let request = CompletionRequest::messages(vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(prompt),
        ])
        .with_model(context.get_str("model").map(String::from));

        let response = self.provider.complete(request).await?;
        info!(agent = %self.identity.id, chars = response.text.len(), "Research brief ready");

        Ok(with_completion_metadata(
            AgentOutput::text(response.text.clone()),
            self.provider.as_ref(),
            &response,
        ))
    }
}
