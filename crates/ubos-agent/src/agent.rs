use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use tracing::{debug, warn};
use ubos_core::{AgentResult, AgentType, UbosError, UbosResult};

/// Prefix of shared-context keys that hold earlier agent outputs.
pub const OUTPUT_KEY_PREFIX: &str = "out_";

/// Shared-context key under which an agent's output is published.
pub fn output_key(requirement_id: &str, agent_type: AgentType) -> String {
    format!("{OUTPUT_KEY_PREFIX}{requirement_id}_{agent_type}")
}

/// Options for a single `run` invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOptions {
    pub input: String,
    /// Advisory upper bound; the agent itself does not enforce it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub dry_run: bool,
}

impl RunOptions {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            timeout_ms: None,
            dry_run: false,
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: Option<u64>) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Parse options from untyped JSON, rejecting a missing or non-string `input`.
    pub fn from_value(value: &serde_json::Value) -> UbosResult<Self> {
        let input = match value.get("input") {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => {
                return Err(UbosError::InvalidInput(format!(
                    "input must be a string, got {other}"
                )))
            }
            None => return Err(UbosError::InvalidInput("input is required".to_string())),
        };
        Ok(Self {
            input,
            timeout_ms: value.get("timeoutMs").and_then(serde_json::Value::as_u64),
            dry_run: value
                .get("dryRun")
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(false),
        })
    }
}

/// Environment an agent runs in: working directory plus the shared map
/// carrying earlier agents' outputs.
#[derive(Debug, Clone, Default)]
pub struct AgentContext {
    pub working_dir: Option<PathBuf>,
    pub shared: serde_json::Map<String, serde_json::Value>,
}

impl AgentContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shared(shared: serde_json::Map<String, serde_json::Value>) -> Self {
        Self {
            working_dir: None,
            shared,
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// A string value from the shared map.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.shared.get(key).and_then(serde_json::Value::as_str)
    }

    /// Outputs published by earlier agents, sorted by key.
    pub fn prior_outputs(&self) -> Vec<(&str, &str)> {
        let mut outputs: Vec<(&str, &str)> = self
            .shared
            .iter()
            .filter(|(k, _)| k.starts_with(OUTPUT_KEY_PREFIX))
            .filter_map(|(k, v)| v.as_str().map(|s| (k.as_str(), s)))
            .collect();
        outputs.sort_by_key(|(k, _)| *k);
        outputs
    }
}

/// What an agent produced, before it is stamped into an [`AgentResult`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentOutput {
    pub output: String,
    pub artifacts: Option<serde_json::Value>,
    pub cost_usd: Option<f64>,
    pub retries: Option<u32>,
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

impl AgentOutput {
    pub fn text(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            ..Self::default()
        }
    }

    pub fn with_artifacts(mut self, artifacts: serde_json::Value) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    pub fn with_cost(mut self, cost_usd: Option<f64>) -> Self {
        self.cost_usd = cost_usd;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata
            .get_or_insert_with(serde_json::Map::new)
            .insert(key.into(), value);
        self
    }

    fn into_result(
        self,
        agent_id: &str,
        requirement_id: &str,
        started_at: DateTime<Utc>,
    ) -> AgentResult {
        let mut result = AgentResult::success(agent_id, requirement_id, self.output, started_at);
        result.artifacts = self.artifacts;
        result.cost_usd = self.cost_usd;
        result.retries = self.retries;
        result.metadata = self.metadata;
        result
    }
}

/// Deterministic placeholder produced for dry runs.
pub fn dry_run_output(agent_type: AgentType, agent_id: &str, input: &str) -> String {
    format!("[dry run] {agent_type} agent {agent_id} would handle: {input}")
}

/// The unit of work every agent variant implements.
///
/// Implementors provide [`Agent::execute`] and return errors with `?`; the
/// provided [`Agent::run`] is the boundary callers use. It never fails:
/// errors and panics come back as a failed [`AgentResult`].
#[async_trait]
pub trait Agent: Send + Sync {
    /// Identifier of the spec this agent was built from.
    fn id(&self) -> &str;

    /// Requirement this agent works on.
    fn requirement_id(&self) -> &str;

    /// Variant tag.
    fn agent_type(&self) -> AgentType;

    /// Do the actual work. Only called when `options.dry_run` is false.
    async fn execute(&self, options: &RunOptions, context: &AgentContext)
        -> UbosResult<AgentOutput>;

    /// Run the agent, converting every failure into a failed result.
    async fn run(&self, options: &RunOptions, context: &AgentContext) -> AgentResult {
        let started_at = Utc::now();

        if options.dry_run {
            debug!(agent = %self.id(), "dry run, skipping execution");
            let output = dry_run_output(self.agent_type(), self.id(), &options.input);
            return AgentResult::success(self.id(), self.requirement_id(), output, started_at);
        }

        let outcome = AssertUnwindSafe(self.execute(options, context))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(output)) => output.into_result(self.id(), self.requirement_id(), started_at),
            Ok(Err(e)) => {
                warn!(agent = %self.id(), agent_type = %self.agent_type(), error = %e, "Agent failed");
                AgentResult::failure(self.id(), self.requirement_id(), e.to_string(), started_at)
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                warn!(agent = %self.id(), panic = %message, "Agent panicked");
                AgentResult::failure(
                    self.id(),
                    self.requirement_id(),
                    format!("agent panicked: {message}"),
                    started_at,
                )
            }
        }
    }
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
