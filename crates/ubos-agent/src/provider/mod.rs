pub mod openai;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use ubos_core::{UbosError, UbosResult};

pub use openai::{OpenAiCompatibleProvider, ProviderConfig};

/// Role of a message in a chat-style completion request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A role-tagged message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// Normalized completion request: a bare prompt or a message sequence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Model identifier; `None` uses the provider's default model.
    pub model: Option<String>,
    pub prompt: Option<String>,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f32>,
    /// Ask the provider for a JSON object response.
    #[serde(default)]
    pub json: bool,
}

impl CompletionRequest {
    pub fn prompt(prompt: impl Into<String>) -> Self {
        Self {
            prompt: Some(prompt.into()),
            ..Self::default()
        }
    }

    pub fn messages(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// Token usage reported by the provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
    pub cost_usd: Option<f64>,
}

/// Generated text plus usage metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub text: String,
    pub model: Option<String>,
    pub usage: Option<Usage>,
}

impl CompletionResponse {
    pub fn cost_usd(&self) -> Option<f64> {
        self.usage.as_ref().and_then(|u| u.cost_usd)
    }
}

/// External text-generation capability used by the LLM-backed agents.
///
/// Implementations fail with `UbosError::Provider` on non-success status,
/// network failure, timeout, or missing credentials.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Short provider name used in logs and result metadata.
    fn name(&self) -> &str;

    /// Run one completion.
    async fn complete(&self, request: CompletionRequest) -> UbosResult<CompletionResponse>;
}

/// Placeholder used when no provider is configured. Every completion fails
/// with `Provider`, so the calling agent reports a failed result.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredProvider;

#[async_trait]
impl CompletionProvider for UnconfiguredProvider {
    fn name(&self) -> &str {
        "unconfigured"
    }

    async fn complete(&self, _request: CompletionRequest) -> UbosResult<CompletionResponse> {
        Err(UbosError::Provider(
            "no completion provider configured".to_string(),
        ))
    }
}
