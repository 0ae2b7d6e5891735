#![allow(clippy::unwrap_used, clippy::expect_used)]
//! End-to-end plan execution tests.
//!
//! Every agent is an instrumented stand-in that records when it starts and
//! finishes, what it saw in the shared context and how many ran at once.
//! Checks: concurrency ceiling, batch ordering, output hand-off between
//! agents, fail-fast per requirement, resource gating, dry runs, timeouts,
//! the distributed bus path and run persistence.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use ubos_agent::{Agent, AgentContext, AgentFactory, AgentOutput, RunOptions};
use ubos_bus::{handler_fn, topics, MessageBus};
use ubos_core::{
    AgentSpec, AgentType, AnalyzedTask, OrchestrationPlan, TaskRequirement, UbosError, UbosResult,
};
use ubos_orchestrator::*;

// ---------------------------------------------------------------------------
// Instrumented agents
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Recorder {
    active: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
    /// `start:{id}` / `end:{id}` in the order they happened.
    events: Mutex<Vec<String>>,
    /// Shared-context keys each agent saw when it started.
    seen: Mutex<HashMap<String, Vec<String>>>,
}

impl Recorder {
    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    fn seen_by(&self, agent_id: &str) -> Vec<String> {
        self.seen.lock().get(agent_id).cloned().unwrap_or_default()
    }
}

struct InstrumentedAgent {
    id: String,
    requirement_id: String,
    agent_type: AgentType,
    delay: Duration,
    fail: bool,
    cost_usd: Option<f64>,
    recorder: Arc<Recorder>,
}

#[async_trait]
impl Agent for InstrumentedAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn requirement_id(&self) -> &str {
        &self.requirement_id
    }

    fn agent_type(&self) -> AgentType {
        self.agent_type
    }

    async fn execute(
        &self,
        options: &RunOptions,
        context: &AgentContext,
    ) -> UbosResult<AgentOutput> {
        self.recorder.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.recorder.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.recorder.peak.fetch_max(now, Ordering::SeqCst);
        self.recorder.events.lock().push(format!("start:{}", self.id));
        self.recorder
            .seen
            .lock()
            .insert(self.id.clone(), context.shared.keys().cloned().collect());

        tokio::time::sleep(self.delay).await;

        self.recorder.active.fetch_sub(1, Ordering::SeqCst);
        self.recorder.events.lock().push(format!("end:{}", self.id));

        if self.fail {
            return Err(UbosError::Provider(format!("{} scripted failure", self.id)));
        }
        Ok(AgentOutput::text(format!("{} handled {}", self.id, options.input))
            .with_cost(self.cost_usd))
    }
}

struct RecordingFactory {
    recorder: Arc<Recorder>,
    delay: Duration,
    delays: HashMap<String, Duration>,
    failing: HashSet<String>,
    cost_usd: Option<f64>,
}

impl RecordingFactory {
    fn new(recorder: Arc<Recorder>) -> Self {
        Self {
            recorder,
            delay: Duration::from_millis(10),
            delays: HashMap::new(),
            failing: HashSet::new(),
            cost_usd: None,
        }
    }

    fn with_delay(mut self, ms: u64) -> Self {
        self.delay = Duration::from_millis(ms);
        self
    }

    fn with_delay_for(mut self, agent_id: &str, ms: u64) -> Self {
        self.delays
            .insert(agent_id.to_string(), Duration::from_millis(ms));
        self
    }

    fn failing(mut self, agent_id: &str) -> Self {
        self.failing.insert(agent_id.to_string());
        self
    }

    fn with_cost(mut self, usd: f64) -> Self {
        self.cost_usd = Some(usd);
        self
    }
}

impl AgentFactory for RecordingFactory {
    fn create(&self, spec: &AgentSpec) -> UbosResult<Arc<dyn Agent>> {
        Ok(Arc::new(InstrumentedAgent {
            id: spec.id.clone(),
            requirement_id: spec.requirement_id.clone(),
            agent_type: spec.agent_type,
            delay: self.delays.get(&spec.id).copied().unwrap_or(self.delay),
            fail: self.failing.contains(&spec.id),
            cost_usd: self.cost_usd,
            recorder: Arc::clone(&self.recorder),
        }))
    }
}

// ---------------------------------------------------------------------------
// Plan helpers
// ---------------------------------------------------------------------------

/// `specs` is `(spec id, type, requirement id)` in execution order.
fn plan(specs: &[(&str, AgentType, &str)], batches: &[&[&str]]) -> OrchestrationPlan {
    let mut requirement_ids: Vec<&str> = Vec::new();
    for (_, _, req) in specs {
        if !requirement_ids.contains(req) {
            requirement_ids.push(*req);
        }
    }
    let task = AnalyzedTask::new(
        "e2e",
        "End to end",
        "exercise the coordinator",
        requirement_ids
            .iter()
            .map(|id| TaskRequirement::new(*id, format!("work on {id}")))
            .collect(),
    );
    let agent_specs = specs
        .iter()
        .map(|(id, kind, req)| AgentSpec::new(*id, *kind, *req))
        .collect();
    let mut plan = OrchestrationPlan::new(task, agent_specs);
    plan.parallel_batches = batches
        .iter()
        .map(|b| b.iter().map(|id| (*id).to_string()).collect())
        .collect();
    plan
}

fn inputs_for(plan: &OrchestrationPlan) -> HashMap<String, String> {
    plan.task
        .requirements
        .iter()
        .map(|r| (r.id.clone(), format!("input for {}", r.id)))
        .collect()
}

fn coordinator(factory: RecordingFactory) -> ExecutionCoordinator {
    ExecutionCoordinator::new(Arc::new(factory))
}

// ---------------------------------------------------------------------------
// Scheduling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_concurrency_ceiling_is_never_exceeded() {
    let recorder = Arc::new(Recorder::default());
    let ids = ["r1", "r2", "r3", "r4", "r5", "r6"];
    let specs: Vec<(String, &str)> = ids.iter().map(|r| (format!("a-{r}"), *r)).collect();
    let spec_refs: Vec<(&str, AgentType, &str)> = specs
        .iter()
        .map(|(id, r)| (id.as_str(), AgentType::SmokeTest, *r))
        .collect();
    let p = plan(&spec_refs, &[&ids[..]]);

    let results = coordinator(RecordingFactory::new(Arc::clone(&recorder)).with_delay(25))
        .execute(&p, &inputs_for(&p), &ExecutionOptions::new().with_concurrency(2))
        .await
        .unwrap();

    assert_eq!(results.len(), 6);
    assert!(results.iter().all(|r| r.success));
    assert_eq!(recorder.peak(), 2);
}

#[tokio::test]
async fn test_default_concurrency_caps_at_four() {
    let recorder = Arc::new(Recorder::default());
    let ids = ["r1", "r2", "r3", "r4", "r5", "r6", "r7"];
    let specs: Vec<(String, &str)> = ids.iter().map(|r| (format!("a-{r}"), *r)).collect();
    let spec_refs: Vec<(&str, AgentType, &str)> = specs
        .iter()
        .map(|(id, r)| (id.as_str(), AgentType::SmokeTest, *r))
        .collect();
    let p = plan(&spec_refs, &[&ids[..]]);

    coordinator(RecordingFactory::new(Arc::clone(&recorder)).with_delay(25))
        .execute(&p, &inputs_for(&p), &ExecutionOptions::new())
        .await
        .unwrap();

    assert_eq!(recorder.peak(), MAX_DEFAULT_CONCURRENCY);
    assert_eq!(recorder.calls(), 7);
}

#[tokio::test]
async fn test_single_batch_with_concurrency_one_runs_in_order() {
    let recorder = Arc::new(Recorder::default());
    let p = plan(
        &[
            ("a1", AgentType::SmokeTest, "r1"),
            ("a2", AgentType::SmokeTest, "r2"),
        ],
        &[&["r1", "r2"]],
    );

    let results = coordinator(RecordingFactory::new(Arc::clone(&recorder)))
        .execute(&p, &inputs_for(&p), &ExecutionOptions::new().with_concurrency(1))
        .await
        .unwrap();

    assert_eq!(recorder.events(), vec!["start:a1", "end:a1", "start:a2", "end:a2"]);
    let order: Vec<&str> = results.iter().map(|r| r.agent_id.as_str()).collect();
    assert_eq!(order, vec!["a1", "a2"]);
    assert_eq!(recorder.peak(), 1);
}

#[tokio::test]
async fn test_batches_run_strictly_in_order() {
    let recorder = Arc::new(Recorder::default());
    let p = plan(
        &[
            ("a1", AgentType::SmokeTest, "r1"),
            ("a2", AgentType::SmokeTest, "r2"),
            ("a3", AgentType::SmokeTest, "r3"),
        ],
        &[&["r1", "r2"], &["r3"]],
    );

    coordinator(RecordingFactory::new(Arc::clone(&recorder)).with_delay(15))
        .execute(&p, &inputs_for(&p), &ExecutionOptions::new())
        .await
        .unwrap();

    let events = recorder.events();
    let start_a3 = events.iter().position(|e| e == "start:a3").unwrap();
    let end_a1 = events.iter().position(|e| e == "end:a1").unwrap();
    let end_a2 = events.iter().position(|e| e == "end:a2").unwrap();
    assert!(start_a3 > end_a1 && start_a3 > end_a2);
}

#[tokio::test]
async fn test_freed_slot_starts_next_requirement_with_sibling_output() {
    let recorder = Arc::new(Recorder::default());
    let p = plan(
        &[
            ("a1", AgentType::SmokeTest, "r1"),
            ("a2", AgentType::SmokeTest, "r2"),
            ("a3", AgentType::SmokeTest, "r3"),
        ],
        &[&["r1", "r2", "r3"]],
    );
    let factory = RecordingFactory::new(Arc::clone(&recorder))
        .with_delay_for("a1", 150)
        .with_delay_for("a2", 10)
        .with_delay_for("a3", 10);

    let results = coordinator(factory)
        .execute(&p, &inputs_for(&p), &ExecutionOptions::new().with_concurrency(2))
        .await
        .unwrap();

    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r.success));
    assert_eq!(recorder.peak(), 2);

    // r3 takes r2's slot while r1 is still running.
    let events = recorder.events();
    let start_a3 = events.iter().position(|e| e == "start:a3").unwrap();
    let end_a1 = events.iter().position(|e| e == "end:a1").unwrap();
    let end_a2 = events.iter().position(|e| e == "end:a2").unwrap();
    assert!(end_a2 < start_a3 && start_a3 < end_a1);

    assert!(recorder.seen_by("a1").is_empty());
    assert_eq!(recorder.seen_by("a3"), vec!["out_r2_smoke-test"]);
}

// ---------------------------------------------------------------------------
// Shared context
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_outputs_are_visible_to_later_agents() {
    let recorder = Arc::new(Recorder::default());
    let p = plan(
        &[
            ("research", AgentType::Research, "r1"),
            ("planning", AgentType::CodePlanning, "r1"),
            ("review", AgentType::CodeReview, "r2"),
        ],
        &[&["r1"], &["r2"]],
    );

    coordinator(RecordingFactory::new(Arc::clone(&recorder)))
        .execute(&p, &inputs_for(&p), &ExecutionOptions::new())
        .await
        .unwrap();

    assert!(recorder.seen_by("research").is_empty());
    assert_eq!(recorder.seen_by("planning"), vec!["out_r1_research"]);

    let mut review_saw = recorder.seen_by("review");
    review_saw.sort();
    assert_eq!(review_saw, vec!["out_r1_code-planning", "out_r1_research"]);
}

#[tokio::test]
async fn test_spec_params_overlay_shared_context() {
    let recorder = Arc::new(Recorder::default());
    let mut p = plan(&[("a1", AgentType::SmokeTest, "r1")], &[&["r1"]]);
    p.agent_specs[0] = AgentSpec::new("a1", AgentType::SmokeTest, "r1")
        .with_param("stage", "assemble".into());

    coordinator(RecordingFactory::new(Arc::clone(&recorder)))
        .execute(&p, &inputs_for(&p), &ExecutionOptions::new())
        .await
        .unwrap();

    assert_eq!(recorder.seen_by("a1"), vec!["stage"]);
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_failure_stops_only_its_requirement() {
    let recorder = Arc::new(Recorder::default());
    let p = plan(
        &[
            ("a1", AgentType::Research, "r1"),
            ("a2", AgentType::CodeReview, "r1"),
            ("b1", AgentType::Research, "r2"),
        ],
        &[&["r1", "r2"]],
    );

    let results = coordinator(RecordingFactory::new(Arc::clone(&recorder)).failing("a1"))
        .execute(&p, &inputs_for(&p), &ExecutionOptions::new())
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(recorder.calls(), 2);
    let a1 = results.iter().find(|r| r.agent_id == "a1").unwrap();
    assert!(!a1.success);
    assert!(a1.error.as_deref().unwrap().contains("a1 scripted failure"));
    assert!(results.iter().any(|r| r.agent_id == "b1" && r.success));
    assert!(results.iter().all(|r| r.agent_id != "a2"));
}

#[tokio::test]
async fn test_failure_in_first_batch_does_not_stop_second() {
    let recorder = Arc::new(Recorder::default());
    let p = plan(
        &[
            ("a1", AgentType::Research, "r1"),
            ("a2", AgentType::CodeReview, "r2"),
        ],
        &[&["r1"], &["r2"]],
    );

    let results = coordinator(RecordingFactory::new(Arc::clone(&recorder)).failing("a1"))
        .execute(&p, &inputs_for(&p), &ExecutionOptions::new())
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert!(!results[0].success);
    assert!(results[1].success);
    // A failed agent still publishes its (empty) output.
    assert_eq!(recorder.seen_by("a2"), vec!["out_r1_research"]);

    let mut aggregator = ResultAggregator::new();
    aggregator.extend(results);
    assert!(!aggregator.success());
    assert!(aggregator.summary().starts_with("Results: 1 success, 1 failure(s)."));
}

#[tokio::test]
async fn test_timeout_becomes_failed_result() {
    let recorder = Arc::new(Recorder::default());
    let p = plan(&[("slow", AgentType::Research, "r1")], &[&["r1"]]);

    let results = coordinator(RecordingFactory::new(Arc::clone(&recorder)).with_delay(500))
        .execute(&p, &inputs_for(&p), &ExecutionOptions::new().with_timeout_ms(20))
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    assert!(!results[0].success);
    assert_eq!(results[0].error.as_deref(), Some("agent timed out after 20ms"));
}

// ---------------------------------------------------------------------------
// Dry run
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_dry_run_never_invokes_agents() {
    let recorder = Arc::new(Recorder::default());
    let p = plan(
        &[
            ("a1", AgentType::Research, "r1"),
            ("a2", AgentType::BrowserAutomation, "r2"),
        ],
        &[&["r1", "r2"]],
    );

    let results = coordinator(RecordingFactory::new(Arc::clone(&recorder)).failing("a1"))
        .execute(&p, &inputs_for(&p), &ExecutionOptions::new().with_dry_run(true))
        .await
        .unwrap();

    assert_eq!(recorder.calls(), 0);
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.success && r.output.starts_with("[dry run]")));
}

// ---------------------------------------------------------------------------
// Resources
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_allocate_respects_global_and_project_limits() {
    let resources = ResourceManager::new(2);
    assert!(resources.allocate("p").await);
    assert!(!resources.allocate("p").await, "default project limit is 1");

    resources.configure_project("p", 5);
    assert!(resources.allocate("p").await);
    assert!(!resources.allocate("p").await, "global limit is 2");
    assert!(!resources.allocate("other").await);

    resources.release("p").await;
    assert!(resources.allocate("other").await);
    assert_eq!(resources.used_concurrency(), 2);
}

#[tokio::test]
async fn test_resource_manager_gates_requirements() {
    let recorder = Arc::new(Recorder::default());
    let p = plan(
        &[
            ("a1", AgentType::SmokeTest, "r1"),
            ("a2", AgentType::SmokeTest, "r2"),
            ("a3", AgentType::SmokeTest, "r3"),
        ],
        &[&["r1", "r2", "r3"]],
    );
    let resources = Arc::new(ResourceManager::new(4));

    let results = coordinator(RecordingFactory::new(Arc::clone(&recorder)).with_delay(15))
        .with_resources(Arc::clone(&resources))
        .execute(&p, &inputs_for(&p), &ExecutionOptions::new().with_concurrency(3))
        .await
        .unwrap();

    assert_eq!(results.len(), 3);
    assert_eq!(recorder.peak(), 1, "unconfigured project allows one slot");
    assert_eq!(resources.used_concurrency(), 0);
    assert_eq!(resources.project(DEFAULT_PROJECT).active, 0);
}

#[tokio::test]
async fn test_configured_project_and_spend_recording() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = Arc::new(Recorder::default());
    let p = plan(
        &[
            ("a1", AgentType::Research, "r1"),
            ("a2", AgentType::Research, "r2"),
            ("a3", AgentType::Research, "r3"),
        ],
        &[&["r1", "r2", "r3"]],
    );
    let resources = Arc::new(
        ResourceManager::new(2)
            .with_daily_budget(1.0)
            .with_store(Arc::new(JsonSnapshotStore::in_dir(dir.path()))),
    );
    resources.configure_project("alpha", 4);

    coordinator(RecordingFactory::new(Arc::clone(&recorder)).with_delay(15).with_cost(0.25))
        .with_resources(Arc::clone(&resources))
        .execute(
            &p,
            &inputs_for(&p),
            &ExecutionOptions::new().with_concurrency(3).with_project("alpha"),
        )
        .await
        .unwrap();

    assert_eq!(recorder.peak(), 2, "global limit wins over project limit");
    assert!((resources.today_cost_usd() - 0.75).abs() < 1e-9);
    assert!(!resources.over_budget());

    let stored = resources.load_previous().await.unwrap().unwrap();
    assert_eq!(stored.used_concurrency, 0);
    assert_eq!(stored.per_project["alpha"].max, 4);
}

// ---------------------------------------------------------------------------
// Distributed mode
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_bus_mode_dispatches_and_emits_events() {
    let recorder = Arc::new(Recorder::default());
    let p = plan(
        &[
            ("a1", AgentType::Research, "r1"),
            ("a2", AgentType::CodeReview, "r2"),
        ],
        &[&["r1"], &["r2"]],
    );
    let bus = MessageBus::new();

    let started = Arc::new(AtomicUsize::new(0));
    let batches = Arc::new(AtomicUsize::new(0));
    let results_seen = Arc::new(AtomicUsize::new(0));
    let counter = |count: &Arc<AtomicUsize>| {
        let count = Arc::clone(count);
        handler_fn(move |_envelope| {
            let count = Arc::clone(&count);
            async move {
                count.fetch_add(1, Ordering::SeqCst);
            }
        })
    };
    let _s1 = bus.subscribe(topics::REQUIREMENT_STARTED, counter(&started));
    let _s2 = bus.subscribe(topics::BATCH_FINISHED, counter(&batches));
    let _s3 = bus.subscribe(&topics::result("r1"), counter(&results_seen));

    let results = coordinator(RecordingFactory::new(Arc::clone(&recorder)))
        .with_bus(bus.clone())
        .execute(&p, &inputs_for(&p), &ExecutionOptions::new())
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.success));
    assert_eq!(results[1].output, "a2 handled input for r2");
    assert_eq!(recorder.seen_by("a2"), vec!["out_r1_research"]);

    assert_eq!(started.load(Ordering::SeqCst), 2);
    assert_eq!(batches.load(Ordering::SeqCst), 2);
    assert_eq!(results_seen.load(Ordering::SeqCst), 1);
    assert_eq!(bus.subscriber_count(&topics::assign_agent("a1")), 0);
}

#[tokio::test]
async fn test_bus_mode_timeout_is_failed_result() {
    let recorder = Arc::new(Recorder::default());
    let p = plan(&[("slow", AgentType::Research, "r1")], &[&["r1"]]);

    let results = coordinator(RecordingFactory::new(Arc::clone(&recorder)).with_delay(500))
        .with_bus(MessageBus::new())
        .execute(&p, &inputs_for(&p), &ExecutionOptions::new().with_timeout_ms(20))
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    assert!(!results[0].success);
    assert!(results[0].error.as_deref().unwrap().contains("timed out after 20ms"));
}

// ---------------------------------------------------------------------------
// Orchestrator facade
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_orchestrator_run_is_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = Arc::new(Recorder::default());
    let p = plan(
        &[
            ("a1", AgentType::Research, "r1"),
            ("a2", AgentType::CodeReview, "r2"),
        ],
        &[&["r1"], &["r2"]],
    );

    let orchestrator = Orchestrator::new(coordinator(RecordingFactory::new(Arc::clone(&recorder))))
        .with_run_store(RunStore::new(dir.path()));
    let outcome = orchestrator
        .execute(&p, &HashMap::new(), &ExecutionOptions::new())
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.results[0].output, "a1 handled work on r1");
    assert!(outcome.finished_at >= outcome.started_at);

    let metrics = orchestrator.monitor().aggregate_metrics().await;
    assert_eq!(metrics.runs, 2);
    assert_eq!(metrics.failures, 0);

    let history = orchestrator.history().await.unwrap();
    assert_eq!(history.files.len(), 1);
    let latest = history.latest.unwrap();
    assert_eq!(latest.task_id, "e2e");
    assert_eq!(latest.summary, outcome.summary);
}
