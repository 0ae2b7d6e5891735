use crate::coordinator::ExecutionOptions;
use crate::resources::{JsonSnapshotStore, ResourceManager};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use ubos_agent::{DefaultAgentFactory, OpenAiCompatibleProvider, ProviderConfig};
use ubos_core::{UbosError, UbosResult};

/// Environment variable overriding `resources.max_concurrency`.
pub const ENV_MAX_CONCURRENCY: &str = "UBOS_MAX_CONCURRENCY";
/// Environment variable overriding `resources.daily_budget_usd`.
pub const ENV_DAILY_BUDGET_USD: &str = "UBOS_DAILY_BUDGET_USD";
/// Environment variable overriding `provider.api_key`.
pub const ENV_API_KEY: &str = "UBOS_API_KEY";

/// Top-level configuration, usually read from `ubos.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UbosConfig {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub resources: ResourceConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// Where run files are written.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Notes directory for the knowledge-retrieval agent.
    #[serde(default)]
    pub knowledge_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceConfig {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: u32,
    /// 0 disables the budget.
    #[serde(default)]
    pub daily_budget_usd: f64,
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// Per-project concurrency limits, clamped to 1..=8.
    #[serde(default)]
    pub projects: BTreeMap<String, u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub project: Option<String>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("logs/orchestrator")
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("logs/mcc")
}

fn default_max_concurrency() -> u32 {
    4
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            daily_budget_usd: 0.0,
            state_dir: default_state_dir(),
            projects: BTreeMap::new(),
        }
    }
}

impl Default for UbosConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            resources: ResourceConfig::default(),
            execution: ExecutionConfig::default(),
            data_dir: default_data_dir(),
            knowledge_dir: None,
        }
    }
}

impl UbosConfig {
    /// Parse a TOML document.
    pub fn from_toml(source: &str) -> UbosResult<Self> {
        toml::from_str(source)
            .map_err(|e| UbosError::Configuration(format!("invalid config: {e}")))
    }

    /// Read a TOML file. A missing file yields the defaults.
    pub async fn load(path: impl AsRef<Path>) -> UbosResult<Self> {
        let path = path.as_ref();
        if !tokio::fs::try_exists(path).await? {
            info!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        let source = tokio::fs::read_to_string(path).await.map_err(|e| {
            UbosError::Configuration(format!(
                "failed to read config file '{}': {e}",
                path.display()
            ))
        })?;
        Self::from_toml(&source)
    }

    /// Apply `UBOS_*` overrides from the process environment.
    pub fn with_env_overrides(self) -> UbosResult<Self> {
        self.apply_env(|key| std::env::var(key).ok())
    }

    /// Apply `UBOS_*` overrides read through `lookup`.
    pub fn apply_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> UbosResult<Self> {
        if let Some(raw) = lookup(ENV_MAX_CONCURRENCY) {
            self.resources.max_concurrency = raw.trim().parse().map_err(|_| {
                UbosError::Configuration(format!("{ENV_MAX_CONCURRENCY} must be an integer, got '{raw}'"))
            })?;
        }
        if let Some(raw) = lookup(ENV_DAILY_BUDGET_USD) {
            self.resources.daily_budget_usd = raw.trim().parse().map_err(|_| {
                UbosError::Configuration(format!("{ENV_DAILY_BUDGET_USD} must be a number, got '{raw}'"))
            })?;
        }
        if let Some(key) = lookup(ENV_API_KEY).filter(|k| !k.trim().is_empty()) {
            self.provider.api_key = Some(key);
        }
        Ok(self)
    }

    /// Execution options from `[execution]`.
    pub fn execution_options(&self) -> ExecutionOptions {
        ExecutionOptions {
            dry_run: self.execution.dry_run,
            timeout_ms: self.execution.timeout_ms,
            concurrency: self.execution.concurrency,
            project: self.execution.project.clone(),
        }
    }

    /// Resource manager persisting to `resources.state_dir`, with project
    /// limits from the previous snapshot and then from `[resources.projects]`.
    pub async fn build_resources(&self) -> Arc<ResourceManager> {
        let store = Arc::new(JsonSnapshotStore::in_dir(&self.resources.state_dir));
        let resources = ResourceManager::new(self.resources.max_concurrency)
            .with_daily_budget(self.resources.daily_budget_usd)
            .with_store(store);

        match resources.load_previous().await {
            Ok(Some(previous)) => resources.restore_limits(&previous),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Ignoring unreadable resource snapshot"),
        }
        for (project, max) in &self.resources.projects {
            resources.configure_project(project, *max);
        }
        Arc::new(resources)
    }

    /// Agent factory backed by the configured provider.
    ///
    /// The provider is always attached; a missing API key surfaces as a
    /// failed result when an LLM-backed agent actually calls it.
    pub fn build_factory(&self) -> UbosResult<DefaultAgentFactory> {
        let provider = OpenAiCompatibleProvider::new(self.provider.clone())?;
        let mut factory = DefaultAgentFactory::new().with_provider(Arc::new(provider));
        if let Some(dir) = &self.knowledge_dir {
            factory = factory.with_knowledge_dir(dir.clone());
        }
        Ok(factory)
    }
}
