use super::{require_input, upstream_section, with_completion_metadata, AgentIdentity};
use crate::agent::{Agent, AgentContext, AgentOutput, RunOptions};
use crate::provider::{ChatMessage, CompletionProvider, CompletionRequest};
use async_trait::async_trait;
use std::sync::Arc;
use ubos_core::{AgentType, UbosResult};

const SYSTEM_PROMPT: &str = "You are a meticulous code reviewer. Point out correctness bugs, \
security issues and missing tests first, then style. Be specific and actionable.";

/// Reviews code or earlier plan output through the completion provider.
pub struct CodeReviewAgent {
    identity: AgentIdentity,
    provider: Arc<dyn CompletionProvider>,
}

impl CodeReviewAgent {
    pub fn new(identity: AgentIdentity, provider: Arc<dyn CompletionProvider>) -> Self {
        Self { identity, provider }
    }
}

#[async_trait]
impl Agent for CodeReviewAgent {
    fn id(&self) -> &str {
        &self.identity.id
    }

    fn requirement_id(&self) -> &str {
        &self.identity.requirement_id
    }

    fn agent_type(&self) -> AgentType {
        AgentType::CodeReview
    }

    async fn execute(
        &self,
        options: &RunOptions,
        context: &AgentContext,
    ) -> UbosResult<AgentOutput> {
        let subject = require_input(options)?;

        let mut prompt = format!("Review request:\n{subject}\n");
        match upstream_section(context) {
            Some(upstream) => {
                prompt.push('\n');
                prompt.push_str(&upstream);
            }
            None => prompt.push_str("\nNo earlier output is available; review the request itself.\n"),
        }

        let request = CompletionRequest::messages(vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(prompt),
        ])
        .with_model(context.get_str("model").map(String::from))
        .with_temperature(0.1);

        let response = self.provider.complete(request).await?;
        let reviewed: Vec<serde_json::Value> = context
            .prior_outputs()
            .into_iter()
            .map(|(key, _)| key.into())
            .collect();

        Ok(with_completion_metadata(
            AgentOutput::text(response.text.clone())
                .with_artifacts(serde_json::json!({ "reviewed": reviewed })),
            self.provider.as_ref(),
            &response,
        ))
    }
}
