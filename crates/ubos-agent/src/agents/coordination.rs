use super::{preview, AgentIdentity};
use crate::agent::{Agent, AgentContext, AgentOutput, RunOptions};
use async_trait::async_trait;
use ubos_core::{AgentType, UbosResult};

const STAGE_PREVIEW_CHARS: usize = 200;

/// Merges the outputs of earlier pipeline stages into a stage report.
///
/// Reads the stage name from the `stage` context key (usually set through
/// spec params) and every `out_*` entry in the shared map.
pub struct PipelineCoordinationAgent {
    identity: AgentIdentity,
}

impl PipelineCoordinationAgent {
    pub fn new(identity: AgentIdentity) -> Self {
        Self { identity }
    }
}

#[async_trait]
impl Agent for PipelineCoordinationAgent {
    fn id(&self) -> &str {
        &self.identity.id
    }

    fn requirement_id(&self) -> &str {
        &self.identity.requirement_id
    }

    fn agent_type(&self) -> AgentType {
        AgentType::PipelineCoordination
    }

    async fn execute(
        &self,
        options: &RunOptions,
        context: &AgentContext,
    ) -> UbosResult<AgentOutput> {
        let stage = context.get_str("stage").unwrap_or("coordination");
        let upstream = context.prior_outputs();

        let mut report = format!("Pipeline stage '{stage}': {}\n", options.input.trim());
        if upstream.is_empty() {
            report.push_str("\nNo upstream outputs available.");
        } else {
            report.push_str(&format!("\nCollected {} upstream output(s):", upstream.len()));
            for (key, value) in &upstream {
                report.push_str(&format!("\n- {key}: {}", preview(value, STAGE_PREVIEW_CHARS)));
            }
        }

        let sources: Vec<&str> = upstream.iter().map(|(key, _)| *key).collect();
        Ok(AgentOutput::text(report)
            .with_artifacts(serde_json::json!({ "stage": stage, "sources": sources })))
    }
}
