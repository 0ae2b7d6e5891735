use crate::plan::OrchestrationPlan;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of exactly one agent invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResult {
    pub agent_id: String,
    pub requirement_id: String,
    pub success: bool,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<serde_json::Value>,
    #[serde(rename = "costUSD", default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

impl AgentResult {
    /// A successful result finished now.
    pub fn success(
        agent_id: impl Into<String>,
        requirement_id: impl Into<String>,
        output: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            requirement_id: requirement_id.into(),
            success: true,
            output: output.into(),
            artifacts: None,
            cost_usd: None,
            started_at,
            finished_at: Utc::now(),
            retries: None,
            error: None,
            metadata: None,
        }
    }

    /// A failed result with empty output, finished now.
    pub fn failure(
        agent_id: impl Into<String>,
        requirement_id: impl Into<String>,
        error: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            requirement_id: requirement_id.into(),
            success: false,
            output: String::new(),
            artifacts: None,
            cost_usd: None,
            started_at,
            finished_at: Utc::now(),
            retries: None,
            error: Some(error.into()),
            metadata: None,
        }
    }

    pub fn duration(&self) -> Duration {
        self.finished_at - self.started_at
    }

    /// Output text, falling back to the error message when output is empty.
    pub fn display_text(&self) -> &str {
        if self.output.is_empty() {
            self.error.as_deref().unwrap_or_default()
        } else {
            &self.output
        }
    }
}

/// Final record of one plan execution. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationResult {
    pub task_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub plan: OrchestrationPlan,
    pub results: Vec<AgentResult>,
    pub success: bool,
    pub summary: String,
}

impl OrchestrationResult {
    pub fn failed(&self) -> impl Iterator<Item = &AgentResult> {
        self.results.iter().filter(|r| !r.success)
    }
}
