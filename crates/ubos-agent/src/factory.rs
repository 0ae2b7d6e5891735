use crate::agent::Agent;
use crate::agents::{
    AgentIdentity, BrowserAutomationAgent, CodePlanningAgent, CodeReviewAgent,
    KnowledgeRetrievalAgent, PipelineCoordinationAgent, ResearchAgent, SmokeTestAgent,
};
use crate::provider::{CompletionProvider, UnconfiguredProvider};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;
use ubos_core::{AgentSpec, AgentType, UbosResult};

/// Builds agent instances from plan specs.
pub trait AgentFactory: Send + Sync {
    /// Construct the agent described by `spec`. No I/O happens here.
    fn create(&self, spec: &AgentSpec) -> UbosResult<Arc<dyn Agent>>;
}

/// Maps every [`AgentType`] to its built-in implementation.
#[derive(Clone, Default)]
pub struct DefaultAgentFactory {
    provider: Option<Arc<dyn CompletionProvider>>,
    knowledge_dir: Option<PathBuf>,
    http: reqwest::Client,
}

impl DefaultAgentFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider(mut self, provider: Arc<dyn CompletionProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_knowledge_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.knowledge_dir = Some(dir.into());
        self
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// Build from a raw type tag; unknown tags fail with `Configuration`.
    pub fn create_by_name(
        &self,
        agent_type: &str,
        id: &str,
        requirement_id: &str,
    ) -> UbosResult<Arc<dyn Agent>> {
        let agent_type: AgentType = agent_type.parse()?;
        self.create(&AgentSpec::new(id, agent_type, requirement_id))
    }

    /// The configured provider, or one that fails every call.
    fn provider_for(&self, spec: &AgentSpec) -> Arc<dyn CompletionProvider> {
        match &self.provider {
            Some(provider) => Arc::clone(provider),
            None => {
                debug!(
                    agent = %spec.id,
                    agent_type = %spec.agent_type,
                    "No completion provider configured; agent will fail unless dry run"
                );
                Arc::new(UnconfiguredProvider)
            }
        }
    }
}

impl AgentFactory for DefaultAgentFactory {
    fn create(&self, spec: &AgentSpec) -> UbosResult<Arc<dyn Agent>> {
        let identity = AgentIdentity::new(&spec.id, &spec.requirement_id);
        let agent: Arc<dyn Agent> = match spec.agent_type {
            AgentType::Research => Arc::new(ResearchAgent::new(
                identity,
                self.provider_for(spec),
            )),
            AgentType::CodePlanning => Arc::new(CodePlanningAgent::new(
                identity,
                self.provider_for(spec),
            )),
            AgentType::CodeReview => Arc::new(CodeReviewAgent::new(
                identity,
                self.provider_for(spec),
            )),
            AgentType::BrowserAutomation => {
                Arc::new(BrowserAutomationAgent::new(identity, self.http.clone()))
            }
            AgentType::KnowledgeRetrieval => Arc::new(KnowledgeRetrievalAgent::new(
                identity,
                self.knowledge_dir.clone(),
            )),
            AgentType::PipelineCoordination => Arc::new(PipelineCoordinationAgent::new(identity)),
            AgentType::SmokeTest => Arc::new(SmokeTestAgent::new(identity)),
        };
        Ok(agent)
    }
}
