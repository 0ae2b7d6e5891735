use crate::error::UbosError;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Skill tag attached to requirements and agent specs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Coding,
    Research,
    Data,
    WebAutomation,
    Memory,
    FileOperations,
    SystemAccess,
    AgentDiscovery,
    MetaAnalysis,
}

/// Coarse effort estimate for a requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    #[default]
    Medium,
    High,
}

/// Overall risk classification of an analyzed task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
}

/// Resource estimate attached to a requirement by the planner.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EstimatedResources {
    pub time_minutes: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<u32>,
}

pub const MIN_PRIORITY: u8 = 1;
pub const MAX_PRIORITY: u8 = 10;

fn default_priority() -> u8 {
    5
}

fn clamp_priority<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = i64::deserialize(deserializer)?;
    Ok(raw.clamp(i64::from(MIN_PRIORITY), i64::from(MAX_PRIORITY)) as u8)
}

/// One decomposed unit of work within a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRequirement {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
    /// Informational only: the coordinator follows batch order, not this list.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    #[serde(default = "default_priority", deserialize_with = "clamp_priority")]
    pub priority: u8,
    #[serde(default)]
    pub estimated_complexity: Complexity,
    #[serde(default)]
    pub estimated_resources: EstimatedResources,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub optimizations: Vec<String>,
}

impl TaskRequirement {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            capabilities: Vec::new(),
            dependencies: Vec::new(),
            priority: default_priority(),
            estimated_complexity: Complexity::default(),
            estimated_resources: EstimatedResources::default(),
            optimizations: Vec::new(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: Vec<Capability>) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_dependencies(mut self, deps: Vec<String>) -> Self {
        self.dependencies = deps;
        self
    }

    /// Set the priority, clamped into `1..=10`.
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.clamp(MIN_PRIORITY, MAX_PRIORITY);
        self
    }
}

/// The output of task analysis: an ordered list of requirements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzedTask {
    pub task_id: String,
    pub title: String,
    /// The original input text the task was analyzed from.
    pub original: String,
    pub requirements: Vec<TaskRequirement>,
    #[serde(default)]
    pub risk_level: RiskLevel,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

impl AnalyzedTask {
    pub fn new(
        task_id: impl Into<String>,
        title: impl Into<String>,
        original: impl Into<String>,
        requirements: Vec<TaskRequirement>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            title: title.into(),
            original: original.into(),
            requirements,
            risk_level: RiskLevel::default(),
            notes: Vec::new(),
        }
    }

    pub fn requirement(&self, id: &str) -> Option<&TaskRequirement> {
        self.requirements.iter().find(|r| r.id == id)
    }
}

/// Closed set of agent variants the default factory knows how to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AgentType {
    /// Research brief through the completion provider.
    Research,
    /// Code change planning through the completion provider.
    CodePlanning,
    /// Review guidance through the completion provider.
    CodeReview,
    /// Web navigation planning and page probing.
    BrowserAutomation,
    /// Search over a local notes directory.
    KnowledgeRetrieval,
    /// Merges earlier stage outputs into a report.
    PipelineCoordination,
    /// Echo agent used to verify the pipeline end to end.
    SmokeTest,
}

impl AgentType {
    pub const ALL: [AgentType; 7] = [
        AgentType::Research,
        AgentType::CodePlanning,
        AgentType::CodeReview,
        AgentType::BrowserAutomation,
        AgentType::KnowledgeRetrieval,
        AgentType::PipelineCoordination,
        AgentType::SmokeTest,
    ];

    /// Canonical wire tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::Research => "research",
            AgentType::CodePlanning => "code-planning",
            AgentType::CodeReview => "code-review",
            AgentType::BrowserAutomation => "browser-automation",
            AgentType::KnowledgeRetrieval => "knowledge-retrieval",
            AgentType::PipelineCoordination => "pipeline-coordination",
            AgentType::SmokeTest => "smoke-test",
        }
    }

    /// Whether the variant needs a completion provider to run for real.
    pub fn needs_provider(&self) -> bool {
        matches!(
            self,
            AgentType::Research | AgentType::CodePlanning | AgentType::CodeReview
        )
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentType {
    type Err = UbosError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s {
            "research" | "ResearchAgent" => AgentType::Research,
            "code-planning" | "CodexAgent" => AgentType::CodePlanning,
            "code-review" | "CodeReviewAgent" => AgentType::CodeReview,
            "browser-automation" | "BrowserAgent" => AgentType::BrowserAutomation,
            "knowledge-retrieval" | "MemoryAgent" => AgentType::KnowledgeRetrieval,
            "pipeline-coordination" | "CoordinationAgent" => AgentType::PipelineCoordination,
            "smoke-test" | "SmokeTestAgent" => AgentType::SmokeTest,
            other => {
                return Err(UbosError::Configuration(format!(
                    "Unknown agent spec type: {other}"
                )))
            }
        };
        Ok(kind)
    }
}

impl TryFrom<String> for AgentType {
    type Error = UbosError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AgentType> for String {
    fn from(value: AgentType) -> Self {
        value.as_str().to_string()
    }
}

/// Declarative description of one agent assigned to a requirement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSpec {
    pub id: String,
    #[serde(rename = "type")]
    pub agent_type: AgentType,
    pub requirement_id: String,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
    /// Free-form configuration overlaid onto the agent's shared context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Map<String, serde_json::Value>>,
}

impl AgentSpec {
    pub fn new(
        id: impl Into<String>,
        agent_type: AgentType,
        requirement_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            agent_type,
            requirement_id: requirement_id.into(),
            capabilities: Vec::new(),
            params: None,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.params
            .get_or_insert_with(serde_json::Map::new)
            .insert(key.into(), value);
        self
    }
}
