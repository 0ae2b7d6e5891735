use super::{ChatMessage, ChatRole, CompletionProvider, CompletionRequest, CompletionResponse, Usage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use ubos_core::{UbosError, UbosResult};

/// Connection settings for an OpenAI-compatible chat completions endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// USD per 1k prompt tokens, used when the provider reports no cost.
    #[serde(default)]
    pub input_cost_per_1k: Option<f64>,
    /// USD per 1k completion tokens.
    #[serde(default)]
    pub output_cost_per_1k: Option<f64>,
}

fn default_name() -> String {
    "openai".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com".to_string()
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_timeout_secs() -> u64 {
    60
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            base_url: default_base_url(),
            api_key: None,
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
            input_cost_per_1k: None,
            output_cost_per_1k: None,
        }
    }
}

/// Completion provider for OpenAI, OpenRouter, Groq, Ollama and any other
/// service speaking the chat completions API.
pub struct OpenAiCompatibleProvider {
    config: ProviderConfig,
    http: reqwest::Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(config: ProviderConfig) -> UbosResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| UbosError::Configuration(format!("HTTP client: {e}")))?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn build_messages(&self, request: &CompletionRequest) -> Vec<serde_json::Value> {
        let mut messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .map(|m| serde_json::json!({"role": role_name(m), "content": m.content}))
            .collect();

        if let Some(prompt) = &request.prompt {
            messages.push(serde_json::json!({"role": "user", "content": prompt}));
        }
        messages
    }

    fn estimate_cost(&self, usage: &Usage) -> Option<f64> {
        let input = self.config.input_cost_per_1k?;
        let output = self.config.output_cost_per_1k.unwrap_or(input);
        let prompt_tokens = usage.input_tokens.unwrap_or(0) as f64;
        let completion_tokens = usage.output_tokens.unwrap_or(0) as f64;
        Some(prompt_tokens / 1000.0 * input + completion_tokens / 1000.0 * output)
    }
}

fn role_name(message: &ChatMessage) -> &'static str {
    match message.role {
        ChatRole::System => "system",
        ChatRole::User | ChatRole::Tool => "user",
        ChatRole::Assistant => "assistant",
    }
}

#[async_trait]
impl CompletionProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn complete(&self, request: CompletionRequest) -> UbosResult<CompletionResponse> {
        let api_key = match self.config.api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => key,
            _ => {
                return Err(UbosError::Provider(format!(
                    "missing API key for provider '{}'",
                    self.config.name
                )))
            }
        };

        let messages = self.build_messages(&request);
        if messages.is_empty() {
            return Err(UbosError::InvalidInput(
                "completion request has neither prompt nor messages".to_string(),
            ));
        }

        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.config.model.clone());
        let mut body = serde_json::json!({
            "model": model,
            "messages": messages,
            "max_tokens": self.config.max_tokens,
            "temperature": request.temperature.unwrap_or(self.config.temperature),
        });
        if request.json {
            body["response_format"] = serde_json::json!({"type": "json_object"});
        }

        let url = format!(
            "{}/v1/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        debug!(provider = %self.config.name, model = %model, "Sending completion request");

        let resp = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {api_key}"))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    UbosError::Provider(format!("{} request timed out", self.config.name))
                } else {
                    UbosError::Provider(e.to_string())
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let error_body = resp
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(UbosError::Provider(format!(
                "{} API error {}: {}",
                self.config.name, status, error_body
            )));
        }

        let resp_body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| UbosError::Provider(e.to_string()))?;

        parse_completion(&resp_body, |usage| self.estimate_cost(usage))
    }
}

fn parse_completion(
    body: &serde_json::Value,
    estimate_cost: impl Fn(&Usage) -> Option<f64>,
) -> UbosResult<CompletionResponse> {
    let text = body["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| {
            UbosError::Provider("response missing choices[0].message.content".to_string())
        })?
        .to_string();

    let usage = body.get("usage").filter(|u| u.is_object()).map(|u| {
        let mut usage = Usage {
            input_tokens: u["prompt_tokens"].as_u64(),
            output_tokens: u["completion_tokens"].as_u64(),
            total_tokens: u["total_tokens"].as_u64(),
            cost_usd: u["cost"].as_f64(),
        };
        if usage.cost_usd.is_none() {
            usage.cost_usd = estimate_cost(&usage);
        }
        usage
    });

    Ok(CompletionResponse {
        text,
        model: body["model"].as_str().map(String::from),
        usage,
    })
}
