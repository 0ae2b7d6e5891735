use ubos_core::AgentResult;

/// Characters kept per result line in [`ResultAggregator::summary`].
pub const SUMMARY_TEXT_CHARS: usize = 140;

/// Collects agent results and renders a text summary.
#[derive(Debug, Clone, Default)]
pub struct ResultAggregator {
    results: Vec<AgentResult>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, result: AgentResult) {
        self.results.push(result);
    }

    pub fn extend(&mut self, results: impl IntoIterator<Item = AgentResult>) {
        self.results.extend(results);
    }

    /// A copy of every result added so far.
    pub fn results(&self) -> Vec<AgentResult> {
        self.results.clone()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// True iff at least one result was added and all of them succeeded.
    pub fn success(&self) -> bool {
        !self.results.is_empty() && self.results.iter().all(|r| r.success)
    }

    /// Sum of reported costs; results without a cost count as zero.
    pub fn total_cost_usd(&self) -> f64 {
        self.results.iter().filter_map(|r| r.cost_usd).sum()
    }

    pub fn summary(&self) -> String {
        if self.results.is_empty() {
            return "No results.".to_string();
        }
        let ok = self.results.iter().filter(|r| r.success).count();
        let fail = self.results.len() - ok;

        let mut lines = vec![format!("Results: {ok} success, {fail} failure(s).")];
        for r in &self.results {
            let tag = if r.success { "OK" } else { "ERR" };
            lines.push(format!(
                "- [{tag}] {}/{}: {}",
                r.agent_id,
                r.requirement_id,
                truncate(r.display_text(), SUMMARY_TEXT_CHARS)
            ));
        }
        lines.join("\n")
    }
}

/// At most `max` characters; when cut, the last kept character becomes `…`.
fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn ok(agent: &str, req: &str, output: &str) -> AgentResult {
        AgentResult::success(agent, req, output, Utc::now())
    }

    fn err(agent: &str, req: &str, error: &str) -> AgentResult {
        AgentResult::failure(agent, req, error, Utc::now())
    }

    #[test]
    fn test_empty_aggregator() {
        let agg = ResultAggregator::new();
        assert!(!agg.success());
        assert_eq!(agg.summary(), "No results.");
    }

    #[test]
    fn test_success_requires_all_ok() {
        let mut agg = ResultAggregator::new();
        agg.add(ok("a1", "r1", "fine"));
        assert!(agg.success());
        agg.add(err("a2", "r2", "boom"));
        assert!(!agg.success());
    }

    #[test]
    fn test_summary_format() {
        let mut agg = ResultAggregator::new();
        agg.add(ok("a1", "r1", "brief ready"));
        agg.add(err("a2", "r2", "Provider error: 503"));
        assert_eq!(
            agg.summary(),
            "Results: 1 success, 1 failure(s).\n\
             - [OK] a1/r1: brief ready\n\
             - [ERR] a2/r2: Provider error: 503"
        );
    }

    #[test]
    fn test_summary_truncates_long_text() {
        let mut agg = ResultAggregator::new();
        agg.add(ok("a1", "r1", &"x".repeat(200)));
        let line = agg.summary().lines().nth(1).unwrap().to_string();
        let text = line.strip_prefix("- [OK] a1/r1: ").unwrap();
        assert_eq!(text.chars().count(), SUMMARY_TEXT_CHARS);
        assert!(text.ends_with('…'));

        assert_eq!(truncate(&"y".repeat(140), 140), "y".repeat(140));
    }

    #[test]
    fn test_results_copy_and_cost() {
        let mut agg = ResultAggregator::new();
        let mut costly = ok("a1", "r1", "x");
        costly.cost_usd = Some(0.25);
        agg.add(costly);
        agg.add(ok("a2", "r1", "y"));

        let mut copy = agg.results();
        copy.clear();
        assert_eq!(agg.len(), 2);
        assert!((agg.total_cost_usd() - 0.25).abs() < 1e-9);
    }
}
