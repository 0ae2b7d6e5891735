use super::{require_input, upstream_section, with_completion_metadata, AgentIdentity};
use crate::agent::{Agent, AgentContext, AgentOutput, RunOptions};
use crate::provider::{ChatMessage, CompletionProvider, CompletionRequest};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};
use ubos_core::{AgentType, UbosResult};

const SYSTEM_PROMPT: &str = "You are a senior software engineer planning a code change. \
Respond with a JSON object {\"plan\": string, \"diffs\": [{\"path\": string, \"diff\": string}]}. \
Keep the plan short and the diffs in unified format.";

/// Model preference read from the `modelPreference` context key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModelPreference {
    #[default]
    Balanced,
    Cost,
    Quality,
}

impl ModelPreference {
    /// Unknown values fall back to `Balanced`.
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(str::to_ascii_lowercase).as_deref() {
            Some("cost") => ModelPreference::Cost,
            Some("quality") => ModelPreference::Quality,
            _ => ModelPreference::Balanced,
        }
    }

    /// Model to request; `None` keeps the provider's default.
    pub fn model(&self) -> Option<&'static str> {
        match self {
            ModelPreference::Balanced => None,
            ModelPreference::Cost => Some("gpt-4o-mini"),
            ModelPreference::Quality => Some("gpt-4o"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PlannedChange {
    #[serde(default)]
    plan: String,
    #[serde(default)]
    diffs: Vec<serde_json::Value>,
}

/// Plans a code change and proposes diffs through the completion provider.
pub struct CodePlanningAgent {
    identity: AgentIdentity,
    provider: Arc<dyn CompletionProvider>,
}

impl CodePlanningAgent {
    pub fn new(identity: AgentIdentity, provider: Arc<dyn CompletionProvider>) -> Self {
        Self { identity, provider }
    }

    fn pick_model(context: &AgentContext) -> Option<String> {
        if let Some(model) = context.get_str("model") {
            return Some(model.to_string());
        }
        ModelPreference::parse(context.get_str("modelPreference"))
            .model()
            .map(String::from)
    }
}

#[async_trait]
impl Agent for CodePlanningAgent {
    fn id(&self) -> &str {
        &self.identity.id
    }

    fn requirement_id(&self) -> &str {
        &self.identity.requirement_id
    }

    fn agent_type(&self) -> AgentType {
        AgentType::CodePlanning
    }

    async fn execute(
        &self,
        options: &RunOptions,
        context: &AgentContext,
    ) -> UbosResult<AgentOutput> {
        let goal = require_input(options)?;

        let mut prompt = format!("Change request:\n{goal}\n");
        if let Some(dir) = &context.working_dir {
            prompt.push_str(&format!("\nRepository root: {}\n", dir.display()));
        }
        if let Some(upstream) = upstream_section(context) {
            prompt.push('\n');
            prompt.push_str(&upstream);
        }

        let mut request = CompletionRequest::messages(vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(prompt),
        ])
        .with_model(Self::pick_model(context))
        .with_temperature(0.2);
        request.json = true;

        let response = self.provider.complete(request).await?;

        let output = match serde_json::from_str::<PlannedChange>(&response.text) {
            Ok(change) if !change.plan.is_empty() => {
                info!(agent = %self.identity.id, diffs = change.diffs.len(), "Code plan ready");
                AgentOutput::text(change.plan)
                    .with_artifacts(serde_json::json!({ "diffs": change.diffs }))
            }
            _ => {
                debug!(agent = %self.identity.id, "Provider reply was not a structured plan");
                AgentOutput::text(response.text.clone())
            }
        };

        Ok(with_completion_metadata(
            output,
            self.provider.as_ref(),
            &response,
        ))
    }
}
