//! Google Gemini completion provider

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{Completion, CompletionRequest, Provider};
use crate::errors::{AppError, Result};

/// Per-model generation defaults
#[derive(Debug, Clone, Copy)]
struct ModelDefaults {
    max_output_tokens: u32,
    top_k: u32,
    top_p: f64,
}

fn model_defaults(model: &str) -> Result<ModelDefaults> {
    match model {
        "gemini-1.5-pro" | "gemini-2.0-flash" => Ok(ModelDefaults {
            max_output_tokens: 2048,
            top_k: 1,
            top_p: 1.0,
        }),
        _ => Err(AppError::config(format!("Unsupported Gemini model: {}", model))),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    generation_config: GenerationSettings,
}

#[derive(Serialize, Deserialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationSettings {
    temperature: f64,
    max_output_tokens: u32,
    top_k: u32,
    top_p: f64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Content,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    prompt_token_count: u64,
    candidates_token_count: u64,
}

/// Gemini provider over the generateContent endpoint
pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    defaults: ModelDefaults,
    base_url: String,
}

impl GeminiProvider {
    /// Create a provider for a supported model
    pub fn new(model: impl Into<String>, api_key: String, base_url: Option<String>) -> Result<Self> {
        let model = model.into();
        let defaults = model_defaults(&model)?;
        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            defaults,
            base_url: base_url
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".to_string()),
        })
    }

    /// Create with the key from `GOOGLE_API_KEY`
    pub fn from_env(model: impl Into<String>) -> Result<Self> {
        dotenvy::dotenv().ok();
        let api_key = std::env::var("GOOGLE_API_KEY")
            .map_err(|_| AppError::config("No API key provided and none found in environment"))?;
        Self::new(model, api_key, None)
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );

        // Gemini takes a flat text prompt; chat messages are concatenated
        let prompt = request
            .messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let body = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part { text: prompt }],
            }],
            generation_config: GenerationSettings {
                temperature: request.temperature,
                max_output_tokens: request
                    .max_tokens
                    .unwrap_or(self.defaults.max_output_tokens),
                top_k: self.defaults.top_k,
                top_p: self.defaults.top_p,
            },
        };

        let response = self
            .client
            .post(&url)
            .timeout(request.timeout)
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

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| AppError::provider(format!("Failed to parse response: {}", e)))?;

        let candidate = parsed
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| AppError::provider("Response contained no candidates"))?;

        let content = candidate
            .content
            .parts
            .into_iter()
            .map(|p| p.text)
            .collect::<Vec<_>>()
            .join("");

        let (prompt_tokens, completion_tokens) = match parsed.usage_metadata {
            Some(usage) => (usage.prompt_token_count, usage.candidates_token_count),
            // Partial success: a missing usage block degrades to zero
            // counts, it does not fail the call
            None => (0, 0),
        };

        Ok(Completion {
            content,
            prompt_tokens,
            completion_tokens,
            finish_reason: candidate.finish_reason,
            metadata: HashMap::new(),
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
