use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use ubos_core::UbosResult;

/// Bounds applied to a project's concurrency limit.
pub const MIN_PROJECT_CONCURRENCY: u32 = 1;
/// Upper bound for [`ResourceManager::configure_project`].
pub const MAX_PROJECT_CONCURRENCY: u32 = 8;
/// File name used by [`JsonSnapshotStore::in_dir`].
pub const SNAPSHOT_FILE: &str = "resources.json";

/// Concurrency counters for one project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSlots {
    pub active: u32,
    pub max: u32,
}

impl Default for ProjectSlots {
    fn default() -> Self {
        Self {
            active: 0,
            max: MIN_PROJECT_CONCURRENCY,
        }
    }
}

/// Point-in-time view of the manager, written after every allocate/release.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSnapshot {
    pub timestamp: DateTime<Utc>,
    pub total_concurrency: u32,
    pub used_concurrency: u32,
    pub per_project: BTreeMap<String, ProjectSlots>,
    #[serde(rename = "todayCostUSD")]
    pub today_cost_usd: f64,
    #[serde(rename = "dailyBudgetUSD")]
    pub daily_budget_usd: f64,
}

/// Where resource snapshots are persisted.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Overwrite the stored snapshot.
    async fn save(&self, snapshot: &ResourceSnapshot) -> UbosResult<()>;

    /// The last stored snapshot, if any.
    async fn load(&self) -> UbosResult<Option<ResourceSnapshot>>;
}

/// Pretty-printed JSON file, replaced atomically via a temp file and rename.
pub struct JsonSnapshotStore {
    path: PathBuf,
}

impl JsonSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at `{dir}/resources.json`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(SNAPSHOT_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SnapshotStore for JsonSnapshotStore {
    async fn save(&self, snapshot: &ResourceSnapshot) -> UbosResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(snapshot)?;
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    async fn load(&self) -> UbosResult<Option<ResourceSnapshot>> {
        if !tokio::fs::try_exists(&self.path).await? {
            return Ok(None);
        }
        let content = tokio::fs::read_to_string(&self.path).await?;
        Ok(Some(serde_json::from_str(&content)?))
    }
}

struct State {
    used: u32,
    per_project: HashMap<String, ProjectSlots>,
    today_cost_usd: f64,
    cost_day: NaiveDate,
}

impl State {
    fn can_run(&self, total: u32, project: &str) -> bool {
        if self.used >= total {
            return false;
        }
        let slots = self.per_project.get(project).copied().unwrap_or_default();
        slots.active < slots.max
    }

    fn roll_over(&mut self, today: NaiveDate) {
        if today != self.cost_day {
            self.cost_day = today;
            self.today_cost_usd = 0.0;
        }
    }
}

/// Global and per-project concurrency accounting plus a soft daily budget.
///
/// Counters live behind one mutex that is never held across an await.
/// Snapshot writes go through a separate async lock and always capture the
/// state as of the write, so the stored file reflects the latest mutation.
/// A failed write is logged and does not roll back the counters.
pub struct ResourceManager {
    total_concurrency: u32,
    daily_budget_usd: f64,
    state: Mutex<State>,
    persist_lock: tokio::sync::Mutex<()>,
    released: Notify,
    store: Option<Arc<dyn SnapshotStore>>,
}

impl ResourceManager {
    /// `total_concurrency` is raised to at least 1.
    pub fn new(total_concurrency: u32) -> Self {
        Self {
            total_concurrency: total_concurrency.max(1),
            daily_budget_usd: 0.0,
            state: Mutex::new(State {
                used: 0,
                per_project: HashMap::new(),
                today_cost_usd: 0.0,
                cost_day: Utc::now().date_naive(),
            }),
            persist_lock: tokio::sync::Mutex::new(()),
            released: Notify::new(),
            store: None,
        }
    }

    /// Daily budget in USD; 0 means unlimited. Negative values become 0.
    pub fn with_daily_budget(mut self, usd: f64) -> Self {
        self.daily_budget_usd = if usd.is_finite() { usd.max(0.0) } else { 0.0 };
        self
    }

    pub fn with_store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn total_concurrency(&self) -> u32 {
        self.total_concurrency
    }

    pub fn used_concurrency(&self) -> u32 {
        self.state.lock().used
    }

    /// Counters for `project`; unknown projects report the default `{0, 1}`.
    pub fn project(&self, project: &str) -> ProjectSlots {
        self.state
            .lock()
            .per_project
            .get(project)
            .copied()
            .unwrap_or_default()
    }

    /// Set the project's limit, clamped to 1..=8. Active count is kept.
    pub fn configure_project(&self, project: &str, max_concurrency: u32) {
        let max = max_concurrency.clamp(MIN_PROJECT_CONCURRENCY, MAX_PROJECT_CONCURRENCY);
        self.state
            .lock()
            .per_project
            .entry(project.to_string())
            .or_default()
            .max = max;
        debug!(project = %project, max, "Project concurrency configured");
        self.released.notify_waiters();
    }

    /// Whether `project` could take a slot right now.
    pub fn can_run(&self, project: &str) -> bool {
        self.state.lock().can_run(self.total_concurrency, project)
    }

    /// Take a slot if one is free. Check and increment happen under one lock.
    pub async fn allocate(&self, project: &str) -> bool {
        {
            let mut state = self.state.lock();
            if !state.can_run(self.total_concurrency, project) {
                return false;
            }
            state.used += 1;
            state.per_project.entry(project.to_string()).or_default().active += 1;
        }
        self.persist().await;
        true
    }

    /// Wait until a slot for `project` is free and take it.
    pub async fn acquire(&self, project: &str) {
        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            if self.allocate(project).await {
                return;
            }
            debug!(project = %project, "Waiting for a free slot");
            released.await;
        }
    }

    /// Give a slot back. Counters never go below zero.
    pub async fn release(&self, project: &str) {
        {
            let mut state = self.state.lock();
            state.used = state.used.saturating_sub(1);
            let slots = state.per_project.entry(project.to_string()).or_default();
            slots.active = slots.active.saturating_sub(1);
        }
        self.released.notify_waiters();
        self.persist().await;
    }

    /// Add to today's spend, resetting it first when the UTC date changed.
    pub fn record_spend(&self, usd: f64) {
        self.record_spend_on(usd, Utc::now().date_naive());
    }

    fn record_spend_on(&self, usd: f64, today: NaiveDate) {
        if !usd.is_finite() || usd <= 0.0 {
            return;
        }
        let mut state = self.state.lock();
        state.roll_over(today);
        state.today_cost_usd += usd;
    }

    pub fn today_cost_usd(&self) -> f64 {
        let mut state = self.state.lock();
        state.roll_over(Utc::now().date_naive());
        state.today_cost_usd
    }

    pub fn daily_budget_usd(&self) -> f64 {
        self.daily_budget_usd
    }

    /// Budget left today, or `None` when the budget is unlimited.
    pub fn budget_remaining(&self) -> Option<f64> {
        if self.daily_budget_usd <= 0.0 {
            return None;
        }
        Some((self.daily_budget_usd - self.today_cost_usd()).max(0.0))
    }

    /// True once today's spend reached a non-zero budget. Not enforced here.
    pub fn over_budget(&self) -> bool {
        self.budget_remaining().is_some_and(|left| left <= 0.0)
    }

    pub fn snapshot(&self) -> ResourceSnapshot {
        let state = self.state.lock();
        ResourceSnapshot {
            timestamp: Utc::now(),
            total_concurrency: self.total_concurrency,
            used_concurrency: state.used,
            per_project: state
                .per_project
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
            today_cost_usd: state.today_cost_usd,
            daily_budget_usd: self.daily_budget_usd,
        }
    }

    /// Re-apply per-project limits from an earlier snapshot.
    ///
    /// Active counts are never restored: slots held by a crashed process are gone.
    pub fn restore_limits(&self, previous: &ResourceSnapshot) {
        for (project, slots) in &previous.per_project {
            self.configure_project(project, slots.max);
        }
        info!(projects = previous.per_project.len(), "Restored project limits");
    }

    /// Load the stored snapshot, if a store is attached and holds one.
    pub async fn load_previous(&self) -> UbosResult<Option<ResourceSnapshot>> {
        match &self.store {
            Some(store) => store.load().await,
            None => Ok(None),
        }
    }

    async fn persist(&self) {
        let Some(store) = &self.store else {
            return;
        };
        let _guard = self.persist_lock.lock().await;
        let snapshot = self.snapshot();
        if let Err(e) = store.save(&snapshot).await {
            warn!(error = %e, "Failed to persist resource snapshot");
        }
    }
}
