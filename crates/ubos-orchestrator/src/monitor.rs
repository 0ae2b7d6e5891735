use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use ubos_core::{AgentResult, AgentType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Idle,
    Working,
    Error,
}

/// Counters accumulated per agent type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMetrics {
    pub runs: u32,
    pub failures: u32,
    pub duration_ms: u64,
    #[serde(rename = "costUSD")]
    pub cost_usd: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentState {
    pub agent_type: AgentType,
    /// Invocations of this type currently running.
    pub active: u32,
    pub status: WorkerStatus,
    pub metrics: AgentMetrics,
}

/// Tracks state and metrics for every agent type during execution.
pub struct ExecutionMonitor {
    states: Arc<RwLock<HashMap<AgentType, AgentState>>>,
}

impl ExecutionMonitor {
    pub fn new() -> Self {
        let states = AgentType::ALL
            .iter()
            .map(|kind| {
                (
                    *kind,
                    AgentState {
                        agent_type: *kind,
                        active: 0,
                        status: WorkerStatus::Idle,
                        metrics: AgentMetrics::default(),
                    },
                )
            })
            .collect();
        Self {
            states: Arc::new(RwLock::new(states)),
        }
    }

    /// Mark one more invocation of `agent_type` as running.
    pub async fn start_run(&self, agent_type: AgentType) {
        let mut states = self.states.write().await;
        if let Some(state) = states.get_mut(&agent_type) {
            state.active += 1;
            state.status = WorkerStatus::Working;
        }
    }

    /// Record a finished invocation and its outcome.
    pub async fn finish_run(&self, agent_type: AgentType, result: &AgentResult) {
        let mut states = self.states.write().await;
        if let Some(state) = states.get_mut(&agent_type) {
            state.active = state.active.saturating_sub(1);
            state.metrics.runs += 1;
            state.metrics.duration_ms += result.duration().num_milliseconds().max(0) as u64;
            state.metrics.cost_usd += result.cost_usd.unwrap_or(0.0);
            if result.success {
                if state.active == 0 {
                    state.status = WorkerStatus::Idle;
                }
            } else {
                state.metrics.failures += 1;
                state.status = WorkerStatus::Error;
            }
        }
    }

    /// Get a snapshot of all agent states.
    pub async fn snapshot(&self) -> Vec<AgentState> {
        let states = self.states.read().await;
        let mut all: Vec<AgentState> = states.values().cloned().collect();
        all.sort_by_key(|s| s.agent_type.as_str());
        all
    }

    pub async fn get_state(&self, agent_type: AgentType) -> Option<AgentState> {
        let states = self.states.read().await;
        states.get(&agent_type).cloned()
    }

    /// Get aggregate metrics across all agent types.
    pub async fn aggregate_metrics(&self) -> AgentMetrics {
        let states = self.states.read().await;
        let mut total = AgentMetrics::default();
        for state in states.values() {
            total.runs += state.metrics.runs;
            total.failures += state.metrics.failures;
            total.duration_ms += state.metrics.duration_ms;
            total.cost_usd += state.metrics.cost_usd;
        }
        total
    }

    pub async fn to_json(&self) -> serde_json::Value {
        let states = self.snapshot().await;
        let aggregate = self.aggregate_metrics().await;
        serde_json::json!({
            "agents": states,
            "aggregate": aggregate,
        })
    }
}

impl Default for ExecutionMonitor {
    fn default() -> Self {
        Self::new()
    }
}
