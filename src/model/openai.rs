//! OpenAI chat completion provider

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;

use super::{ChatMessage, Completion, CompletionRequest, Provider};
use crate::errors::{AppError, Result};

/// Per-model generation defaults
#[derive(Debug, Clone, Copy)]
struct ModelDefaults {
    max_tokens: u32,
    top_p: f64,
    frequency_penalty: f64,
    presence_penalty: f64,
}

fn model_defaults(model: &str) -> Result<ModelDefaults> {
    match model {
        "gpt-4" => Ok(ModelDefaults {
            max_tokens: 8192,
            top_p: 1.0,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
        }),
        "gpt-4-turbo-preview" | "gpt-3.5-turbo" => Ok(ModelDefaults {
            max_tokens: 4096,
            top_p: 1.0,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
        }),
        _ => Err(AppError::config(format!("Unsupported OpenAI model: {}", model))),
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f64,
    max_tokens: u32,
    top_p: f64,
    frequency_penalty: f64,
    presence_penalty: f64,
}

#[derive(Deserialize)]
struct ChatResponse {
    id: String,
    created: i64,
    choices: Vec<Choice>,
    usage: Usage,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

/// OpenAI provider over the chat completions endpoint
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    defaults: ModelDefaults,
    base_url: String,
}

impl OpenAiProvider {
    /// Create a provider for a supported model
    pub fn new(model: impl Into<String>, api_key: String, base_url: Option<String>) -> Result<Self> {
        let model = model.into();
        let defaults = model_defaults(&model)?;
        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            defaults,
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
        })
    }

    /// Create with the key from `OPENAI_API_KEY`
    pub fn from_env(model: impl Into<String>) -> Result<Self> {
        dotenvy::dotenv().ok();
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| AppError::config("No API key provided and none found in environment"))?;
        Self::new(model, api_key, None)
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatRequest {
            model: &self.model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens.unwrap_or(self.defaults.max_tokens),
            top_p: self.defaults.top_p,
            frequency_penalty: self.defaults.frequency_penalty,
            presence_penalty: self.defaults.presence_penalty,
        };

        let response = self
            .client
            .post(&url)
            .timeout(request.timeout)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::ProviderTimeout {
                        timeout_ms: request.timeout.as_millis() as u64,
                    }
                } else {
                    AppError::provider(format!("Request failed: {}", e))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::provider(format!("API error {}: {}", status, body)));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| AppError::provider(format!("Failed to parse response: {}", e)))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AppError::provider("Response contained no choices"))?;

        let mut metadata = HashMap::new();
        metadata.insert("response_id".to_string(), json!(parsed.id));
        metadata.insert("created".to_string(), json!(parsed.created));

        Ok(Completion {
            content: choice.message.content.unwrap_or_default(),
            prompt_tokens: parsed.usage.prompt_tokens,
            completion_tokens: parsed.usage.completion_tokens,
            finish_reason: choice.finish_reason,
            metadata,
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
