use crate::error::{UbosError, UbosResult};
use crate::types::{AgentSpec, AnalyzedTask, TaskRequirement};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// An analyzed task plus the agents and batch order that will execute it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationPlan {
    pub task: AnalyzedTask,
    pub agent_specs: Vec<AgentSpec>,
    /// Batches run in order; ids inside one batch may run concurrently.
    pub parallel_batches: Vec<Vec<String>>,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

impl OrchestrationPlan {
    /// Build a plan whose batches are layered from requirement dependencies.
    pub fn new(task: AnalyzedTask, agent_specs: Vec<AgentSpec>) -> Self {
        let parallel_batches = batches_from_dependencies(&task.requirements);
        let suggestions = task.notes.clone();
        Self {
            task,
            agent_specs,
            parallel_batches,
            suggestions,
        }
    }

    /// Specs for one requirement, in declaration order.
    pub fn specs_for<'a>(&'a self, requirement_id: &'a str) -> impl Iterator<Item = &'a AgentSpec> {
        self.agent_specs
            .iter()
            .filter(move |s| s.requirement_id == requirement_id)
    }

    /// Number of requirement ids scheduled across all batches.
    pub fn scheduled_count(&self) -> usize {
        self.parallel_batches.iter().map(Vec::len).sum()
    }

    /// Check the structural invariants the coordinator relies on.
    pub fn validate(&self) -> UbosResult<()> {
        let mut spec_ids = HashSet::new();
        for spec in &self.agent_specs {
            if !spec_ids.insert(spec.id.as_str()) {
                return Err(UbosError::Configuration(format!(
                    "duplicate agent spec id '{}'",
                    spec.id
                )));
            }
            if self.task.requirement(&spec.requirement_id).is_none() {
                return Err(UbosError::Configuration(format!(
                    "agent spec '{}' references unknown requirement '{}'",
                    spec.id, spec.requirement_id
                )));
            }
        }

        let mut scheduled = HashSet::new();
        for (index, batch) in self.parallel_batches.iter().enumerate() {
            for req_id in batch {
                if !scheduled.insert(req_id.as_str()) {
                    return Err(UbosError::Configuration(format!(
                        "requirement '{req_id}' is scheduled more than once (batch {index})"
                    )));
                }
                if self.specs_for(req_id).next().is_none() {
                    return Err(UbosError::Configuration(format!(
                        "requirement '{req_id}' in batch {index} has no agent spec"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Layer requirements into batches so each one comes after its dependencies.
///
/// Dependencies on ids outside the list are ignored. When no remaining
/// requirement is ready (a cycle), everything left is flushed as one batch.
pub fn batches_from_dependencies(requirements: &[TaskRequirement]) -> Vec<Vec<String>> {
    let known: HashSet<&str> = requirements.iter().map(|r| r.id.as_str()).collect();
    let mut remaining: Vec<&TaskRequirement> = requirements.iter().collect();
    let mut done: HashSet<&str> = HashSet::new();
    let mut batches = Vec::new();

    while !remaining.is_empty() {
        let (ready, blocked): (Vec<&TaskRequirement>, Vec<&TaskRequirement>) =
            remaining.into_iter().partition(|r| {
                r.dependencies
                    .iter()
                    .all(|d| done.contains(d.as_str()) || !known.contains(d.as_str()))
            });

        if ready.is_empty() {
            tracing::warn!(
                count = blocked.len(),
                "dependency cycle among requirements, scheduling remainder together"
            );
            batches.push(blocked.iter().map(|r| r.id.clone()).collect());
            break;
        }

        for r in &ready {
            done.insert(r.id.as_str());
        }
        batches.push(ready.iter().map(|r| r.id.clone()).collect());
        remaining = blocked;
    }

    batches
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::types::AgentType;

    fn req(id: &str, deps: &[&str]) -> TaskRequirement {
        TaskRequirement::new(id, format!("do {id}"))
            .with_dependencies(deps.iter().map(|d| (*d).to_string()).collect())
    }

    fn plan(batches: Vec<Vec<&str>>, specs: Vec<AgentSpec>) -> OrchestrationPlan {
        let task = AnalyzedTask::new(
            "t1",
            "Test",
            "test task",
            vec![req("r1", &[]), req("r2", &[]), req("r3", &[])],
        );
        OrchestrationPlan {
            task,
            agent_specs: specs,
            parallel_batches: batches
                .into_iter()
                .map(|b| b.into_iter().map(String::from).collect())
                .collect(),
            suggestions: vec![],
        }
    }

    #[test]
    fn test_batches_follow_dependencies() {
        let reqs = vec![req("spec", &[]), req("code", &["spec"]), req("test", &["code"]), req("docs", &["spec"])];
        let batches = batches_from_dependencies(&reqs);
        assert_eq!(
            batches,
            vec![
                vec!["spec".to_string()],
                vec!["code".to_string(), "docs".to_string()],
                vec!["test".to_string()],
            ]
        );
    }

    #[test]
    fn test_batches_flush_cycle() {
        let reqs = vec![req("a", &[]), req("b", &["c"]), req("c", &["b"])];
        let batches = batches_from_dependencies(&reqs);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1], vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_batches_ignore_unknown_dependency() {
        let batches = batches_from_dependencies(&[req("a", &["elsewhere"])]);
        assert_eq!(batches, vec![vec!["a".to_string()]]);
    }

    #[test]
    fn test_validate_accepts_well_formed_plan() {
        let p = plan(
            vec![vec!["r1", "r2"], vec!["r3"]],
            vec![
                AgentSpec::new("a1", AgentType::SmokeTest, "r1"),
                AgentSpec::new("a2", AgentType::SmokeTest, "r2"),
                AgentSpec::new("a3", AgentType::SmokeTest, "r3"),
            ],
        );
        p.validate().unwrap();
        assert_eq!(p.scheduled_count(), 3);
    }

    #[test]
    fn test_validate_rejects_missing_spec() {
        let p = plan(vec![vec!["r1", "r2"]], vec![AgentSpec::new("a1", AgentType::SmokeTest, "r1")]);
        let err = p.validate().unwrap_err();
        assert!(err.to_string().contains("'r2'"), "{err}");
    }

    #[test]
    fn test_validate_rejects_duplicate_scheduling() {
        let p = plan(
            vec![vec!["r1"], vec!["r1"]],
            vec![AgentSpec::new("a1", AgentType::SmokeTest, "r1")],
        );
        let err = p.validate().unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_validate_rejects_dangling_spec() {
        let p = plan(vec![], vec![AgentSpec::new("a1", AgentType::SmokeTest, "r9")]);
        assert!(matches!(p.validate(), Err(UbosError::Configuration(_))));
    }

    #[test]
    fn test_specs_for_preserves_order() {
        let p = plan(
            vec![vec!["r1"]],
            vec![
                AgentSpec::new("first", AgentType::Research, "r1"),
                AgentSpec::new("other", AgentType::SmokeTest, "r2"),
                AgentSpec::new("second", AgentType::CodeReview, "r1"),
            ],
        );
        let ids: Vec<&str> = p.specs_for("r1").map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second"]);
    }
}
