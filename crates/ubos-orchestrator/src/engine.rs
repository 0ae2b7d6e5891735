use crate::aggregator::ResultAggregator;
use crate::coordinator::{ExecutionCoordinator, ExecutionOptions};
use crate::history::{RunHistory, RunStore};
use crate::monitor::ExecutionMonitor;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use ubos_core::{OrchestrationPlan, OrchestrationResult, UbosResult};

/// Runs a plan end to end: execute, aggregate, persist.
pub struct Orchestrator {
    coordinator: ExecutionCoordinator,
    runs: Option<RunStore>,
}

impl Orchestrator {
    pub fn new(coordinator: ExecutionCoordinator) -> Self {
        Self {
            coordinator,
            runs: None,
        }
    }

    /// Save every finished run to `runs`.
    pub fn with_run_store(mut self, runs: RunStore) -> Self {
        self.runs = Some(runs);
        self
    }

    pub fn coordinator(&self) -> &ExecutionCoordinator {
        &self.coordinator
    }

    pub fn monitor(&self) -> &Arc<ExecutionMonitor> {
        self.coordinator.monitor()
    }

    /// Execute `plan` and build its [`OrchestrationResult`].
    ///
    /// Requirements without an entry in `inputs` use their description as
    /// input. Structural errors propagate; agent failures only make the
    /// result unsuccessful. A failed save is logged and the result still
    /// returned.
    pub async fn execute(
        &self,
        plan: &OrchestrationPlan,
        inputs: &HashMap<String, String>,
        options: &ExecutionOptions,
    ) -> UbosResult<OrchestrationResult> {
        let started_at = Utc::now();
        info!(task = %plan.task.task_id, title = %plan.task.title, "Orchestrator: starting run");

        let mut effective: HashMap<String, String> = plan
            .task
            .requirements
            .iter()
            .map(|r| (r.id.clone(), r.description.clone()))
            .collect();
        effective.extend(inputs.iter().map(|(k, v)| (k.clone(), v.clone())));

        let results = self.coordinator.execute(plan, &effective, options).await?;

        let mut aggregator = ResultAggregator::new();
        aggregator.extend(results);

        let outcome = OrchestrationResult {
            task_id: plan.task.task_id.clone(),
            started_at,
            finished_at: Utc::now(),
            plan: plan.clone(),
            results: aggregator.results(),
            success: aggregator.success(),
            summary: aggregator.summary(),
        };

        info!(
            task = %outcome.task_id,
            success = outcome.success,
            results = outcome.results.len(),
            cost_usd = aggregator.total_cost_usd(),
            "Orchestrator: run complete"
        );

        if let Some(runs) = &self.runs {
            match runs.save(&outcome).await {
                Ok(path) => info!(path = %path.display(), "Run saved"),
                Err(e) => warn!(task = %outcome.task_id, error = %e, "Failed to save run"),
            }
        }

        Ok(outcome)
    }

    /// Saved runs, or an empty history when no store is attached.
    pub async fn history(&self) -> UbosResult<RunHistory> {
        match &self.runs {
            Some(runs) => runs.history().await,
            None => Ok(RunHistory {
                files: Vec::new(),
                latest: None,
            }),
        }
    }
}
