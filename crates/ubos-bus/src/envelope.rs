use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ubos_core::{AgentResult, UbosError, UbosResult};

/// Topic names used by the coordinator and the agent adapter.
pub mod topics {
    /// Lifecycle event: a requirement chain started.
    pub const REQUIREMENT_STARTED: &str = "events/requirement.started";
    /// Lifecycle event: a requirement chain finished.
    pub const REQUIREMENT_FINISHED: &str = "events/requirement.finished";
    /// Lifecycle event: every requirement of a batch finished.
    pub const BATCH_FINISHED: &str = "events/batch.finished";

    /// Assignment topic shared by all agents of a requirement.
    pub fn assign_requirement(requirement_id: &str) -> String {
        format!("task.assign/{requirement_id}")
    }

    /// Assignment topic of a single agent.
    pub fn assign_agent(agent_id: &str) -> String {
        format!("task.assign/agent/{agent_id}")
    }

    /// Topic results for a requirement are published on.
    pub fn result(requirement_id: &str) -> String {
        format!("task.result/{requirement_id}")
    }
}

fn new_message_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Metadata carried by every bus message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageHeader {
    #[serde(default = "new_message_id")]
    pub id: String,
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Links a reply to the request awaiting it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl MessageHeader {
    pub fn new(message_type: impl Into<String>) -> Self {
        Self {
            id: new_message_id(),
            message_type: message_type.into(),
            source: None,
            timestamp: Some(Utc::now()),
            correlation_id: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: Option<String>) -> Self {
        self.correlation_id = correlation_id;
        self
    }
}

/// A message on the bus: header plus free-form body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub header: MessageHeader,
    #[serde(default)]
    pub body: serde_json::Value,
}

impl Envelope {
    pub fn new(header: MessageHeader, body: serde_json::Value) -> Self {
        Self { header, body }
    }

    /// A `task.assign` message carrying `assignment`.
    pub fn task(source: &str, assignment: &TaskAssignment) -> UbosResult<Self> {
        Ok(Self::new(
            MessageHeader::new("task.assign").with_source(source),
            serde_json::to_value(assignment)?,
        ))
    }

    /// A `task.result` message carrying `body`.
    pub fn result(
        source: &str,
        body: &ResultBody,
        correlation_id: Option<String>,
    ) -> UbosResult<Self> {
        Ok(Self::new(
            MessageHeader::new("task.result")
                .with_source(source)
                .with_correlation_id(correlation_id),
            serde_json::to_value(body)?,
        ))
    }

    /// A lifecycle event with an arbitrary body.
    pub fn event(name: &str, body: serde_json::Value) -> Self {
        Self::new(MessageHeader::new(name).with_source("coordinator"), body)
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.header.correlation_id.as_deref()
    }
}

/// Body of a `task.assign` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskAssignment {
    pub task_id: String,
    pub requirement_id: String,
    pub input: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<bool>,
}

impl TaskAssignment {
    pub fn new(
        task_id: impl Into<String>,
        requirement_id: impl Into<String>,
        input: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            requirement_id: requirement_id.into(),
            input: input.into(),
            params: None,
            timeout_ms: None,
            dry_run: None,
        }
    }

    /// Parse and check a message body; ids must be non-empty and `input` a string.
    pub fn from_body(body: &serde_json::Value) -> UbosResult<Self> {
        let assignment: Self = serde_json::from_value(body.clone())
            .map_err(|e| UbosError::InvalidInput(format!("malformed task message: {e}")))?;
        if assignment.task_id.is_empty() || assignment.requirement_id.is_empty() {
            return Err(UbosError::InvalidInput(
                "task message needs taskId and requirementId".to_string(),
            ));
        }
        Ok(assignment)
    }
}

/// Body of a `task.result` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultBody {
    pub task_id: String,
    pub requirement_id: String,
    pub result: AgentResult,
}

impl ResultBody {
    /// Parse and check a message body.
    pub fn from_body(body: &serde_json::Value) -> UbosResult<Self> {
        let parsed: Self = serde_json::from_value(body.clone())
            .map_err(|e| UbosError::InvalidInput(format!("malformed result message: {e}")))?;
        if parsed.task_id.is_empty() || parsed.requirement_id.is_empty() {
            return Err(UbosError::InvalidInput(
                "result message needs taskId and requirementId".to_string(),
            ));
        }
        Ok(parsed)
    }
}
