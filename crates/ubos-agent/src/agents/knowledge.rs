use super::AgentIdentity;
use crate::agent::{Agent, AgentContext, AgentOutput, RunOptions};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use ubos_core::{AgentType, UbosResult};

/// Upper bound on the context preview returned to callers.
pub const MAX_CONTEXT_BYTES: usize = 8000;
const MAX_MATCHES: usize = 5;
const MIN_TERM_LEN: usize = 3;
const IGNORED_DIRS: [&str; 5] = [".git", "node_modules", ".obsidian", "dist", "logs"];

/// A note loaded from the knowledge directory.
#[derive(Debug, Clone, PartialEq)]
pub struct Note {
    pub path: PathBuf,
    pub title: String,
    pub content: String,
}

/// Searches `.md` and `.txt` notes under a knowledge directory.
///
/// The directory comes from the factory; when unset the agent falls back to
/// the context's working directory. A missing directory yields no matches
/// rather than an error.
pub struct KnowledgeRetrievalAgent {
    identity: AgentIdentity,
    knowledge_dir: Option<PathBuf>,
}

impl KnowledgeRetrievalAgent {
    pub fn new(identity: AgentIdentity, knowledge_dir: Option<PathBuf>) -> Self {
        Self {
            identity,
            knowledge_dir,
        }
    }
}

/// Load every note under `root`, sorted by title.
pub async fn load_notes(root: &Path) -> UbosResult<Vec<Note>> {
    let mut notes = Vec::new();
    if !tokio::fs::try_exists(root).await.unwrap_or(false) {
        return Ok(notes);
    }

    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                let skip = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| IGNORED_DIRS.contains(&n));
                if !skip {
                    stack.push(path);
                }
            } else if file_type.is_file() && is_note(&path) {
                let raw = match tokio::fs::read_to_string(&path).await {
                    Ok(raw) => raw,
                    Err(e) => {
                        debug!(path = %path.display(), error = %e, "Skipping unreadable note");
                        continue;
                    }
                };
                let content = strip_frontmatter(&raw).trim().to_string();
                let title = extract_title(&path, &content);
                notes.push(Note {
                    path,
                    title,
                    content,
                });
            }
        }
    }

    notes.sort_by(|a, b| a.title.cmp(&b.title));
    Ok(notes)
}

fn is_note(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("md") || e.eq_ignore_ascii_case("txt"))
}

fn strip_frontmatter(text: &str) -> &str {
    if let Some(rest) = text.strip_prefix("---") {
        if let Some(end) = rest.find("\n---") {
            let after = &rest[end + 4..];
            return after.split_once('\n').map_or("", |(_, body)| body);
        }
    }
    text
}

fn extract_title(path: &Path, content: &str) -> String {
    content
        .lines()
        .find_map(|l| l.trim_start().strip_prefix("# "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| {
            path.file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default()
        })
}

/// Rank notes against `query`; a full-phrase hit outranks single term hits.
pub fn search<'a>(notes: &'a [Note], query: &str) -> Vec<(&'a Note, usize)> {
    let phrase = query.trim().to_lowercase();
    let terms: Vec<String> = phrase
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= MIN_TERM_LEN)
        .map(String::from)
        .collect();
    if phrase.is_empty() {
        return Vec::new();
    }

    let mut scored: Vec<(&Note, usize)> = notes
        .iter()
        .filter_map(|note| {
            let title = note.title.to_lowercase();
            let content = note.content.to_lowercase();
            let mut score = 0;
            if title.contains(&phrase) || content.contains(&phrase) {
                score += 10;
            }
            for term in &terms {
                if title.contains(term.as_str()) {
                    score += 3;
                }
                score += content.matches(term.as_str()).count().min(5);
            }
            (score > 0).then_some((note, score))
        })
        .collect();

    scored.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.title.cmp(&b.0.title)));
    scored.truncate(MAX_MATCHES);
    scored
}

/// Render notes as a preview of at most `max_bytes` bytes.
pub fn to_context(notes: &[&Note], max_bytes: usize) -> String {
    let mut out = String::new();
    for note in notes {
        let header = format!("# {}\n({})\n\n", note.title, note.path.display());
        let remaining = max_bytes.saturating_sub(out.len() + header.len() + 2);
        if remaining == 0 {
            break;
        }
        out.push_str(&header);
        out.push_str(truncate_bytes(&note.content, remaining));
        out.push_str("\n\n");
    }
    out
}

fn truncate_bytes(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[async_trait]
impl Agent for KnowledgeRetrievalAgent {
    fn id(&self) -> &str {
        &self.identity.id
    }

    fn requirement_id(&self) -> &str {
        &self.identity.requirement_id
    }

    fn agent_type(&self) -> AgentType {
        AgentType::KnowledgeRetrieval
    }

    async fn execute(
        &self,
        options: &RunOptions,
        context: &AgentContext,
    ) -> UbosResult<AgentOutput> {
        let root = self
            .knowledge_dir
            .clone()
            .or_else(|| context.working_dir.clone());
        let notes = match &root {
            Some(root) => load_notes(root).await?,
            None => Vec::new(),
        };

        let matches = search(&notes, &options.input);
        info!(
            agent = %self.identity.id,
            notes = notes.len(),
            matched = matches.len(),
            "Knowledge search complete"
        );

        let matched: Vec<serde_json::Value> = matches
            .iter()
            .map(|(note, score)| {
                serde_json::json!({
                    "path": note.path.display().to_string(),
                    "title": note.title,
                    "score": score,
                })
            })
            .collect();

        let output = if matches.is_empty() {
            "No direct matches in knowledge base.".to_string()
        } else {
            let found: Vec<&Note> = matches.iter().map(|(note, _)| *note).collect();
            format!(
                "Found {} related notes. Context preview:\n\n{}",
                found.len(),
                to_context(&found, MAX_CONTEXT_BYTES)
            )
        };

        Ok(AgentOutput::text(output).with_artifacts(serde_json::json!({ "matched": matched })))
    }
}
