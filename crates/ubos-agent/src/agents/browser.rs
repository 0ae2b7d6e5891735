use super::{require_input, AgentIdentity};
use crate::agent::{Agent, AgentContext, AgentOutput, RunOptions};
use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;
use tracing::info;
use ubos_core::{AgentType, UbosError, UbosResult};

#[allow(clippy::expect_used)]
static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://[^\s)>\]]+").expect("Invalid URL regex"));

#[allow(clippy::expect_used)]
static TITLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("Invalid title regex")
});

/// Plans browser navigation and fetches the first URL found in the input.
///
/// Without a URL the agent only returns the navigation plan. With one it
/// fetches the page and reports its status and `<title>`.
pub struct BrowserAutomationAgent {
    identity: AgentIdentity,
    http: reqwest::Client,
}

impl BrowserAutomationAgent {
    pub fn new(identity: AgentIdentity, http: reqwest::Client) -> Self {
        Self { identity, http }
    }

    fn plan_steps(goal: &str, url: Option<&str>) -> Vec<String> {
        let mut steps = Vec::new();
        match url {
            Some(url) => steps.push(format!("Open {url}")),
            None => {
                steps.push("Open a browser session on a search engine".to_string());
                steps.push(format!("Search for: {goal}"));
                steps.push("Open the most relevant result".to_string());
            }
        }
        steps.push("Extract the information relevant to the goal".to_string());
        steps.push("Record findings and source URLs".to_string());
        steps
    }
}

/// First http(s) URL in `text`, with trailing punctuation removed.
pub fn extract_url(text: &str) -> Option<&str> {
    URL_RE
        .find(text)
        .map(|m| m.as_str().trim_end_matches(['.', ',', ';', ':', '!', '?', '"', '\'']))
}

fn extract_title(html: &str) -> Option<String> {
    TITLE_RE
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|t| !t.is_empty())
}

#[async_trait]
impl Agent for BrowserAutomationAgent {
    fn id(&self) -> &str {
        &self.identity.id
    }

    fn requirement_id(&self) -> &str {
        &self.identity.requirement_id
    }

    fn agent_type(&self) -> AgentType {
        AgentType::BrowserAutomation
    }

    async fn execute(
        &self,
        options: &RunOptions,
        _context: &AgentContext,
    ) -> UbosResult<AgentOutput> {
        let goal = require_input(options)?;
        let url = extract_url(goal);
        let steps = Self::plan_steps(goal, url);

        let mut report = String::from("Navigation plan:");
        for (i, step) in steps.iter().enumerate() {
            report.push_str(&format!("\n{}. {step}", i + 1));
        }

        let Some(url) = url else {
            return Ok(AgentOutput::text(report)
                .with_artifacts(serde_json::json!({ "steps": steps })));
        };

        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| UbosError::Provider(format!("GET {url} failed: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(UbosError::Provider(format!("GET {url} returned {status}")));
        }
        let body = resp
            .text()
            .await
            .map_err(|e| UbosError::Provider(format!("reading {url}: {e}")))?;
        let title = extract_title(&body);

        info!(agent = %self.identity.id, url = %url, status = status.as_u16(), "Page fetched");
        report.push_str(&format!(
            "\n\nVisited {url} (status {}): {}",
            status.as_u16(),
            title.as_deref().unwrap_or("untitled page")
        ));

        Ok(AgentOutput::text(report).with_artifacts(serde_json::json!({
            "steps": steps,
            "url": url,
            "status": status.as_u16(),
            "title": title,
        })))
    }
}
