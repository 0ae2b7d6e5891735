use std::path::PathBuf;
use ubos_core::{OrchestrationResult, UbosResult};

const RUN_PREFIX: &str = "run_";

/// Run files found on disk plus the last one loaded.
#[derive(Debug, Clone)]
pub struct RunHistory {
    pub files: Vec<PathBuf>,
    pub latest: Option<OrchestrationResult>,
}

/// JSON-based persistence for orchestration runs, one `run_{taskId}.json`
/// per task. Saving a task id again overwrites its file.
pub struct RunStore {
    base_dir: PathBuf,
}

impl RunStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &std::path::Path {
        &self.base_dir
    }

    /// Save a run. Returns the path it was written to.
    pub async fn save(&self, run: &OrchestrationResult) -> UbosResult<PathBuf> {
        tokio::fs::create_dir_all(&self.base_dir).await?;

        let path = self
            .base_dir
            .join(format!("{RUN_PREFIX}{}.json", file_slug(&run.task_id)));
        let json = serde_json::to_string_pretty(run)?;
        tokio::fs::write(&path, json).await?;

        Ok(path)
    }

    /// List run files, sorted by name.
    pub async fn list_runs(&self) -> UbosResult<Vec<PathBuf>> {
        if !tokio::fs::try_exists(&self.base_dir).await? {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.base_dir).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                if name.starts_with(RUN_PREFIX) && name.ends_with(".json") {
                    entries.push(path);
                }
            }
        }

        entries.sort();
        Ok(entries)
    }

    /// Load a run by task id.
    pub async fn load(&self, task_id: &str) -> UbosResult<Option<OrchestrationResult>> {
        let path = self
            .base_dir
            .join(format!("{RUN_PREFIX}{}.json", file_slug(task_id)));
        if !tokio::fs::try_exists(&path).await? {
            return Ok(None);
        }
        let content = tokio::fs::read_to_string(&path).await?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// All run files and the last one (by name) loaded.
    pub async fn history(&self) -> UbosResult<RunHistory> {
        let files = self.list_runs().await?;
        let latest = match files.last() {
            Some(path) => {
                let content = tokio::fs::read_to_string(path).await?;
                Some(serde_json::from_str(&content)?)
            }
            None => None,
        };
        Ok(RunHistory { files, latest })
    }
}

/// Keep task ids from escaping the run directory.
fn file_slug(task_id: &str) -> String {
    task_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect::<String>()
        .trim_start_matches('.')
        .to_string()
}
