use crate::monitor::ExecutionMonitor;
use crate::resources::ResourceManager;
use chrono::Utc;
use futures_util::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use ubos_agent::{output_key, Agent, AgentContext, AgentFactory, RunOptions};
use ubos_bus::{topics, AgentAdapter, Envelope, MessageBus, ResultBody, TaskAssignment};
use ubos_core::{AgentResult, AgentSpec, OrchestrationPlan, UbosError, UbosResult};

/// Project used for resource accounting when none is given.
pub const DEFAULT_PROJECT: &str = "default";
/// Ceiling for the derived default concurrency.
pub const MAX_DEFAULT_CONCURRENCY: usize = 4;

type SharedMap = serde_json::Map<String, serde_json::Value>;

/// Knobs for a single plan execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOptions {
    #[serde(default)]
    pub dry_run: bool,
    /// Upper bound per agent invocation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Requirements in flight at once; defaults to min(4, scheduled count).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,
    /// Project charged in the resource manager.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
}

impl ExecutionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    /// Concurrency actually used for `plan`, never below 1.
    pub fn effective_concurrency(&self, plan: &OrchestrationPlan) -> usize {
        self.concurrency
            .unwrap_or_else(|| plan.scheduled_count().min(MAX_DEFAULT_CONCURRENCY))
            .max(1)
    }

    pub fn project(&self) -> &str {
        self.project.as_deref().unwrap_or(DEFAULT_PROJECT)
    }
}

/// Everything one execution shares between its requirement chains.
struct RunState<'a> {
    plan: &'a OrchestrationPlan,
    inputs: &'a HashMap<String, String>,
    options: &'a ExecutionOptions,
    agents: HashMap<String, Arc<dyn Agent>>,
    shared: Mutex<SharedMap>,
    results: Mutex<Vec<AgentResult>>,
}

/// Runs an orchestration plan batch by batch.
///
/// Requirements of a batch run through a bounded pool on the caller's task:
/// at most `concurrency` chains are in flight and each completion frees a
/// slot at once. The specs of one requirement run in order, each one's output
/// is published to the shared context under `out_{requirementId}_{type}`,
/// and a failure ends that requirement's chain only. Agent failures never
/// abort the plan; only structural errors (invalid plan, factory errors) do.
pub struct ExecutionCoordinator {
    factory: Arc<dyn AgentFactory>,
    resources: Option<Arc<ResourceManager>>,
    bus: Option<MessageBus>,
    monitor: Arc<ExecutionMonitor>,
    working_dir: Option<PathBuf>,
}

impl ExecutionCoordinator {
    pub fn new(factory: Arc<dyn AgentFactory>) -> Self {
        Self {
            factory,
            resources: None,
            bus: None,
            monitor: Arc::new(ExecutionMonitor::new()),
            working_dir: None,
        }
    }

    /// Acquire a project slot per requirement and record agent spend.
    pub fn with_resources(mut self, resources: Arc<ResourceManager>) -> Self {
        self.resources = Some(resources);
        self
    }

    /// Dispatch every agent invocation through `bus` as a correlated request.
    ///
    /// The plan's agents are registered on the bus for the duration of the run.
    pub fn with_bus(mut self, bus: MessageBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn with_monitor(mut self, monitor: Arc<ExecutionMonitor>) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn monitor(&self) -> &Arc<ExecutionMonitor> {
        &self.monitor
    }

    /// Execute `plan` with the input text of each requirement.
    ///
    /// Returns every agent result in completion order.
    pub async fn execute(
        &self,
        plan: &OrchestrationPlan,
        inputs: &HashMap<String, String>,
        options: &ExecutionOptions,
    ) -> UbosResult<Vec<AgentResult>> {
        plan.validate()?;

        let mut agents = HashMap::with_capacity(plan.agent_specs.len());
        for spec in &plan.agent_specs {
            agents.insert(spec.id.clone(), self.factory.create(spec)?);
        }

        let mut adapter = self.bus.as_ref().map(|bus| {
            let mut adapter = AgentAdapter::new(bus.clone());
            for spec in &plan.agent_specs {
                if let Some(agent) = agents.get(&spec.id) {
                    adapter.register(Arc::clone(agent), spec);
                }
            }
            adapter
        });

        let concurrency = options.effective_concurrency(plan);
        info!(
            task = %plan.task.task_id,
            batches = plan.parallel_batches.len(),
            concurrency,
            dry_run = options.dry_run,
            distributed = self.bus.is_some(),
            "Executing plan"
        );

        let run = RunState {
            plan,
            inputs,
            options,
            agents,
            shared: Mutex::new(SharedMap::new()),
            results: Mutex::new(Vec::new()),
        };

        for (index, batch) in plan.parallel_batches.iter().enumerate() {
            let mut pending: VecDeque<&str> = batch.iter().map(String::as_str).collect();
            let mut in_flight = FuturesUnordered::new();

            while !pending.is_empty() || !in_flight.is_empty() {
                while in_flight.len() < concurrency {
                    let Some(requirement_id) = pending.pop_front() else {
                        break;
                    };
                    in_flight.push(self.run_requirement(&run, requirement_id));
                }
                in_flight.next().await;
            }

            info!(task = %plan.task.task_id, batch = index, size = batch.len(), "Batch finished");
            self.emit(
                topics::BATCH_FINISHED,
                serde_json::json!({
                    "taskId": plan.task.task_id,
                    "batch": index,
                    "requirementIds": batch,
                }),
            )
            .await;
        }

        if let Some(adapter) = adapter.as_mut() {
            adapter.dispose();
        }

        let results = run.results.into_inner();
        info!(
            task = %plan.task.task_id,
            results = results.len(),
            failures = results.iter().filter(|r| !r.success).count(),
            "Plan execution finished"
        );
        Ok(results)
    }

    async fn run_requirement(&self, run: &RunState<'_>, requirement_id: &str) {
        let project = run.options.project();
        if let Some(resources) = &self.resources {
            resources.acquire(project).await;
        }
        self.emit(
            topics::REQUIREMENT_STARTED,
            serde_json::json!({ "taskId": run.plan.task.task_id, "requirementId": requirement_id }),
        )
        .await;

        let specs: Vec<&AgentSpec> = run.plan.specs_for(requirement_id).collect();
        let mut succeeded = true;

        match run.inputs.get(requirement_id) {
            None => {
                if let Some(spec) = specs.first() {
                    let error = UbosError::InvalidInput(format!(
                        "no input provided for requirement '{requirement_id}'"
                    ));
                    warn!(requirement = %requirement_id, "Missing requirement input");
                    run.results.lock().push(AgentResult::failure(
                        &spec.id,
                        requirement_id,
                        error.to_string(),
                        Utc::now(),
                    ));
                    succeeded = false;
                }
            }
            Some(input) => {
                for spec in specs {
                    let Some(agent) = run.agents.get(&spec.id) else {
                        continue;
                    };
                    let mut shared = run.shared.lock().clone();
                    if let Some(params) = &spec.params {
                        shared.extend(params.iter().map(|(k, v)| (k.clone(), v.clone())));
                    }

                    self.monitor.start_run(spec.agent_type).await;
                    let result = self.invoke(run, spec, agent, input, shared).await;
                    self.monitor.finish_run(spec.agent_type, &result).await;

                    run.shared.lock().insert(
                        output_key(requirement_id, spec.agent_type),
                        result.output.clone().into(),
                    );
                    if let (Some(resources), Some(cost)) = (&self.resources, result.cost_usd) {
                        resources.record_spend(cost);
                    }

                    let failed = !result.success;
                    debug!(
                        agent = %spec.id,
                        requirement = %requirement_id,
                        success = result.success,
                        "Agent finished"
                    );
                    run.results.lock().push(result);
                    if failed {
                        succeeded = false;
                        break;
                    }
                }
            }
        }

        if let Some(resources) = &self.resources {
            resources.release(project).await;
        }
        self.emit(
            topics::REQUIREMENT_FINISHED,
            serde_json::json!({
                "taskId": run.plan.task.task_id,
                "requirementId": requirement_id,
                "success": succeeded,
            }),
        )
        .await;
    }

    async fn invoke(
        &self,
        run: &RunState<'_>,
        spec: &AgentSpec,
        agent: &Arc<dyn Agent>,
        input: &str,
        shared: SharedMap,
    ) -> AgentResult {
        let started_at = Utc::now();
        let timeout_ms = run.options.timeout_ms;

        if let Some(bus) = &self.bus {
            let assignment = TaskAssignment {
                task_id: run.plan.task.task_id.clone(),
                requirement_id: spec.requirement_id.clone(),
                input: input.to_string(),
                params: Some(shared),
                timeout_ms,
                dry_run: Some(run.options.dry_run),
            };
            return match dispatch(bus, spec, &assignment, timeout_ms).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(agent = %spec.id, error = %e, "Bus dispatch failed");
                    AgentResult::failure(&spec.id, &spec.requirement_id, e.to_string(), started_at)
                }
            };
        }

        let options = RunOptions::new(input)
            .with_timeout_ms(timeout_ms)
            .with_dry_run(run.options.dry_run);
        let mut context = AgentContext::with_shared(shared);
        context.working_dir = self.working_dir.clone();

        match timeout_ms {
            Some(ms) => {
                match tokio::time::timeout(Duration::from_millis(ms), agent.run(&options, &context))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(agent = %spec.id, timeout_ms = ms, "Agent timed out");
                        AgentResult::failure(
                            &spec.id,
                            &spec.requirement_id,
                            format!("agent timed out after {ms}ms"),
                            started_at,
                        )
                    }
                }
            }
            None => agent.run(&options, &context).await,
        }
    }

    async fn emit(&self, event: &str, body: serde_json::Value) {
        if let Some(bus) = &self.bus {
            bus.publish(event, &Envelope::event(event, body)).await;
        }
    }
}

async fn dispatch(
    bus: &MessageBus,
    spec: &AgentSpec,
    assignment: &TaskAssignment,
    timeout_ms: Option<u64>,
) -> UbosResult<AgentResult> {
    let request = Envelope::task("coordinator", assignment)?;
    let reply = bus
        .request(
            &topics::assign_agent(&spec.id),
            request,
            timeout_ms.map(Duration::from_millis),
        )
        .await?;
    Ok(ResultBody::from_body(&reply.body)?.result)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use ubos_agent::DefaultAgentFactory;
    use ubos_core::{AgentType, AnalyzedTask, TaskRequirement};

    fn plan(requirements: &[&str], batches: Vec<Vec<&str>>) -> OrchestrationPlan {
        let task = AnalyzedTask::new(
            "t1",
            "Test",
            "Test task",
            requirements
                .iter()
                .map(|id| TaskRequirement::new(*id, format!("do {id}")))
                .collect(),
        );
        let specs = requirements
            .iter()
            .map(|id| AgentSpec::new(format!("s-{id}"), AgentType::SmokeTest, *id))
            .collect();
        let mut plan = OrchestrationPlan::new(task, specs);
        plan.parallel_batches = batches
            .into_iter()
            .map(|b| b.into_iter().map(String::from).collect())
            .collect();
        plan
    }

    fn inputs(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_effective_concurrency() {
        let p = plan(&["a", "b", "c", "d", "e"], vec![vec!["a", "b", "c", "d", "e"]]);
        assert_eq!(ExecutionOptions::new().effective_concurrency(&p), 4);
        assert_eq!(ExecutionOptions::new().with_concurrency(0).effective_concurrency(&p), 1);

        let small = plan(&["a", "b"], vec![vec!["a", "b"]]);
        assert_eq!(ExecutionOptions::new().effective_concurrency(&small), 2);
        let empty = plan(&[], vec![]);
        assert_eq!(ExecutionOptions::new().effective_concurrency(&empty), 1);
    }

    #[tokio::test]
    async fn test_missing_input_yields_failed_result() {
        let coordinator = ExecutionCoordinator::new(Arc::new(DefaultAgentFactory::new()));
        let p = plan(&["r1", "r2"], vec![vec!["r1", "r2"]]);
        let results = coordinator
            .execute(&p, &inputs(&[("r1", "hello")]), &ExecutionOptions::new())
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        let missing = results.iter().find(|r| r.requirement_id == "r2").unwrap();
        assert!(!missing.success);
        assert!(missing.error.as_deref().unwrap().starts_with("Invalid input"));
    }

    #[tokio::test]
    async fn test_invalid_plan_is_rejected() {
        let coordinator = ExecutionCoordinator::new(Arc::new(DefaultAgentFactory::new()));
        let mut p = plan(&["r1"], vec![vec!["r1"]]);
        p.parallel_batches.push(vec!["r1".into()]);
        let err = coordinator
            .execute(&p, &inputs(&[("r1", "x")]), &ExecutionOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, UbosError::Configuration(_)));
    }

    struct RejectingFactory;

    impl AgentFactory for RejectingFactory {
        fn create(&self, spec: &AgentSpec) -> UbosResult<Arc<dyn Agent>> {
            Err(UbosError::Configuration(format!("cannot build {}", spec.id)))
        }
    }

    #[tokio::test]
    async fn test_factory_error_aborts_before_running() {
        let coordinator = ExecutionCoordinator::new(Arc::new(RejectingFactory));
        let p = plan(&["r1"], vec![vec!["r1"]]);
        let err = coordinator
            .execute(&p, &inputs(&[("r1", "x")]), &ExecutionOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, UbosError::Configuration(_)));
        let state = coordinator.monitor().get_state(AgentType::SmokeTest).await.unwrap();
        assert_eq!(state.metrics.runs, 0);
    }

    #[tokio::test]
    async fn test_research_without_provider_dry_runs() {
        let coordinator = ExecutionCoordinator::new(Arc::new(DefaultAgentFactory::new()));
        let mut p = plan(&["r1"], vec![vec!["r1"]]);
        p.agent_specs[0] = AgentSpec::new("res", AgentType::Research, "r1");

        let results = coordinator
            .execute(
                &p,
                &inputs(&[("r1", "caching")]),
                &ExecutionOptions::new().with_dry_run(true),
            )
            .await
            .unwrap();
        assert!(results[0].success);
        assert_eq!(
            results[0].output,
            "[dry run] research agent res would handle: caching"
        );

        let results = coordinator
            .execute(&p, &inputs(&[("r1", "caching")]), &ExecutionOptions::new())
            .await
            .unwrap();
        assert!(!results[0].success);
        assert!(results[0]
            .error
            .as_deref()
            .unwrap()
            .contains("no completion provider configured"));
    }

    #[tokio::test]
    async fn test_params_overlay_reaches_agent() {
        let coordinator = ExecutionCoordinator::new(Arc::new(DefaultAgentFactory::new()));
        let mut p = plan(&["r1"], vec![vec!["r1"]]);
        p.agent_specs[0] = AgentSpec::new("coord", AgentType::PipelineCoordination, "r1")
            .with_param("stage", "assemble".into());
        let results = coordinator
            .execute(&p, &inputs(&[("r1", "wrap up")]), &ExecutionOptions::new())
            .await
            .unwrap();
        assert!(results[0].output.starts_with("Pipeline stage 'assemble'"));
    }
}
