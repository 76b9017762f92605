//! Model invocation layer
//!
//! Issues LLM completion requests through a provider-agnostic capability
//! trait, with per-client rate limiting, bounded retry with exponential
//! backoff, and exactly-once reporting into the metrics and cost trackers.
//!
//! Provider failures never escape [`ModelClient::generate_response`]; every
//! logical call resolves to a well-formed [`ModelResponse`].

pub mod gemini;
pub mod openai;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{GenerationConfig, RetryConfig};
use crate::errors::Result;
use crate::telemetry::{CostTracker, MetricDraft, MetricsTracker, UsageDraft};

pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;

/// Token counts for one completion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    /// Construct with the derived total, keeping
    /// `total = prompt + completion` by construction.
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    pub fn zero() -> Self {
        Self::default()
    }
}

/// Standardized response format for all models.
///
/// Immutable once constructed: a terminal response carries either non-empty
/// content or an error description, never content without a usage map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResponse {
    pub content: String,
    pub usage: TokenUsage,
    /// Wall-clock seconds from first attempt start to final resolution,
    /// including backoff waits
    pub latency: f64,
    pub timestamp: DateTime<Utc>,
    pub model_name: String,
    pub interface_type: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunks_used: Option<usize>,
}

impl ModelResponse {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// One message in a chat-shaped prompt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Parameters for one provider completion attempt
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub max_tokens: Option<u32>,
    pub timeout: Duration,
}

/// Raw provider completion, before standardization
#[derive(Debug, Clone)]
pub struct Completion {
    pub content: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub finish_reason: Option<String>,
    /// Provider-specific extras (response id, creation time, ...)
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Capability consumed by the client: one completion attempt
#[async_trait]
pub trait Provider: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion>;

    /// Model identifier, e.g. "gpt-4"
    fn model_name(&self) -> &str;

    /// Invocation channel label for telemetry grouping
    fn interface_type(&self) -> &str {
        "api"
    }
}

/// Per-call options beyond the configured defaults
#[derive(Debug, Clone)]
pub struct CallOptions {
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    /// Workflow label for metrics grouping
    pub analysis_type: String,
    /// Assembled context token count, recorded on the response and metric
    pub context_length: Option<usize>,
    /// Retrieved chunk count, recorded on the response and metric
    pub chunks_used: Option<usize>,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            temperature: None,
            max_tokens: None,
            analysis_type: "general".to_string(),
            context_length: None,
            chunks_used: None,
        }
    }
}

/// Retry state machine for one logical call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallState {
    Attempting { attempt: u32 },
    Retrying { attempt: u32 },
    Succeeded,
    Failed,
}

/// Per-client-instance minimum-interval gate.
///
/// Suspends the caller until the configured interval since the previous
/// request has elapsed. Built on `tokio::time::Instant` so paused-clock
/// tests observe exact spacing.
pub struct RequestPacer {
    min_interval: Duration,
    last_request: Mutex<Option<tokio::time::Instant>>,
}

impl RequestPacer {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_request: Mutex::new(None),
        }
    }

    /// Wait out the remaining interval, then mark this request's slot
    pub async fn pace(&self) {
        let wait = {
            let last = self.last_request.lock().unwrap();
            last.map(|t| {
                self.min_interval
                    .saturating_sub(tokio::time::Instant::now() - t)
            })
        };

        if let Some(wait) = wait {
            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }
        }

        *self.last_request.lock().unwrap() = Some(tokio::time::Instant::now());
    }
}

/// Rolling per-client counters, mirroring what the trackers aggregate
/// but cheap enough to read inline
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClientCounters {
    pub total_requests: u64,
    pub total_tokens: u64,
    pub total_errors: u64,
    pub average_latency: f64,
}

impl ClientCounters {
    fn update(&mut self, response: &ModelResponse) {
        self.total_requests += 1;
        self.total_tokens += response.usage.total_tokens;
        if response.error.is_some() {
            self.total_errors += 1;
        }
        let n = self.total_requests as f64;
        self.average_latency = (self.average_latency * (n - 1.0) + response.latency) / n;
    }
}

/// Issues logical completion requests against one provider.
///
/// Owns the pacer and retry policy; optionally shares metrics and cost
/// trackers with other clients in the process. Each logical call is
/// reported to the trackers exactly once, regardless of retries.
pub struct ModelClient {
    provider: Arc<dyn Provider>,
    generation: GenerationConfig,
    retry: RetryConfig,
    pacer: RequestPacer,
    metrics: Option<Arc<Mutex<MetricsTracker>>>,
    costs: Option<Arc<Mutex<CostTracker>>>,
    counters: Mutex<ClientCounters>,
}

impl ModelClient {
    pub fn new(provider: Arc<dyn Provider>, generation: GenerationConfig, retry: RetryConfig) -> Self {
        let pacer = RequestPacer::new(Duration::from_millis(retry.min_request_interval_ms));
        Self {
            provider,
            generation,
            retry,
            pacer,
            metrics: None,
            costs: None,
            counters: Mutex::new(ClientCounters::default()),
        }
    }

    /// Attach a shared metrics tracker
    pub fn with_metrics(mut self, metrics: Arc<Mutex<MetricsTracker>>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Attach a shared cost tracker
    pub fn with_costs(mut self, costs: Arc<Mutex<CostTracker>>) -> Self {
        self.costs = Some(costs);
        self
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    /// Current rolling counters
    pub fn counters(&self) -> ClientCounters {
        self.counters.lock().unwrap().clone()
    }

    /// Reset rolling counters to their initial state
    pub fn reset_counters(&self) {
        *self.counters.lock().unwrap() = ClientCounters::default();
    }

    /// Issue one logical completion request.
    ///
    /// Always returns a `ModelResponse`: provider errors are retried with
    /// exponential backoff (`base_delay * 2^(attempt-1)`) up to the
    /// configured attempt count and then surfaced in `response.error`.
    pub async fn generate_response(&self, prompt: &str, options: CallOptions) -> ModelResponse {
        let request = CompletionRequest {
            messages: vec![ChatMessage::user(prompt)],
            temperature: options.temperature.unwrap_or(self.generation.temperature),
            max_tokens: options.max_tokens.or(self.generation.max_tokens),
            timeout: Duration::from_secs(self.retry.request_timeout_secs),
        };

        let start = tokio::time::Instant::now();
        let max_attempts = self.retry.max_retries.max(1);
        let mut state = CallState::Attempting { attempt: 1 };

        let response = loop {
            let attempt = match state {
                CallState::Attempting { attempt } => attempt,
                CallState::Retrying { attempt } => {
                    let delay = Duration::from_millis(
                        self.retry.base_delay_ms * 2_u64.pow(attempt - 1),
                    );
                    debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Backing off before retry"
                    );
                    tokio::time::sleep(delay).await;
                    state = CallState::Attempting {
                        attempt: attempt + 1,
                    };
                    continue;
                }
                // Terminal states exit the loop below
                CallState::Succeeded | CallState::Failed => unreachable!(),
            };

            self.pacer.pace().await;

            match self.provider.complete(&request).await {
                Ok(completion) => {
                    state = CallState::Succeeded;
                    debug!(?state, attempt, "Completion resolved");
                    break self.success_response(completion, start, &options);
                }
                Err(e) if attempt < max_attempts && e.is_transient() => {
                    warn!(
                        attempt,
                        max_attempts,
                        error = %e,
                        "Provider attempt failed, retrying"
                    );
                    state = CallState::Retrying { attempt };
                }
                Err(e) => {
                    state = CallState::Failed;
                    warn!(?state, attempt, error = %e, "Completion failed terminally");
                    break self.failure_response(
                        format!("Final error after {} attempts: {}", attempt, e),
                        start,
                        &options,
                    );
                }
            }
        };

        self.report(&response, &options.analysis_type);
        self.counters.lock().unwrap().update(&response);
        response
    }

    /// Generate responses for each prompt sequentially.
    ///
    /// Fan-out is deliberately not concurrent: downstream consumers key
    /// results by position, and one shared pacer governs all attempts.
    pub async fn batch_generate(
        &self,
        prompts: &[String],
        options: CallOptions,
    ) -> Vec<ModelResponse> {
        let mut responses = Vec::with_capacity(prompts.len());
        for prompt in prompts {
            responses.push(self.generate_response(prompt, options.clone()).await);
        }
        responses
    }

    fn success_response(
        &self,
        completion: Completion,
        start: tokio::time::Instant,
        options: &CallOptions,
    ) -> ModelResponse {
        let mut metadata = completion.metadata;
        if let Some(reason) = completion.finish_reason {
            metadata.insert("finish_reason".to_string(), serde_json::Value::String(reason));
        }

        ModelResponse {
            content: completion.content,
            usage: TokenUsage::new(completion.prompt_tokens, completion.completion_tokens),
            latency: start.elapsed().as_secs_f64(),
            timestamp: Utc::now(),
            model_name: self.provider.model_name().to_string(),
            interface_type: self.provider.interface_type().to_string(),
            metadata,
            error: None,
            context_length: options.context_length,
            chunks_used: options.chunks_used,
        }
    }

    fn failure_response(
        &self,
        error: String,
        start: tokio::time::Instant,
        options: &CallOptions,
    ) -> ModelResponse {
        ModelResponse {
            content: String::new(),
            usage: TokenUsage::zero(),
            latency: start.elapsed().as_secs_f64(),
            timestamp: Utc::now(),
            model_name: self.provider.model_name().to_string(),
            interface_type: self.provider.interface_type().to_string(),
            metadata: HashMap::new(),
            error: Some(error),
            context_length: options.context_length,
            chunks_used: options.chunks_used,
        }
    }

    /// Report the resolved call to both trackers, exactly once
    fn report(&self, response: &ModelResponse, analysis_type: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.lock().unwrap().add_metric(MetricDraft {
                model: response.model_name.clone(),
                interface_type: response.interface_type.clone(),
                analysis_type: analysis_type.to_string(),
                response_time: response.latency,
                token_count: response.usage.total_tokens,
                success: response.is_success(),
                error: response.error.clone(),
                context_length: response.context_length,
                chunks_used: response.chunks_used,
                response_length: Some(response.content.len()),
            });
        }

        if let Some(costs) = &self.costs {
            costs.lock().unwrap().add_usage(UsageDraft {
                model: response.model_name.clone(),
                interface_type: response.interface_type.clone(),
                prompt_tokens: response.usage.prompt_tokens,
                completion_tokens: response.usage.completion_tokens,
                analysis_type: analysis_type.to_string(),
                duration: response.latency,
                error: response.error.clone(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AppError;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Provider stub failing a fixed number of times before succeeding
    struct FlakyProvider {
        failures: u32,
        calls: AtomicU32,
    }

    impl FlakyProvider {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl Provider for FlakyProvider {
        async fn complete(&self, _request: &CompletionRequest) -> Result<Completion> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                Err(AppError::provider(format!("simulated failure {}", call)))
            } else {
                Ok(Completion {
                    content: format!("answer from attempt {}", call),
                    prompt_tokens: 10,
                    completion_tokens: 5,
                    finish_reason: Some("stop".to_string()),
                    metadata: HashMap::new(),
                })
            }
        }

        fn model_name(&self) -> &str {
            "stub-model"
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            base_delay_ms: 100,
            min_request_interval_ms: 0,
            request_timeout_secs: 5,
        }
    }

    fn shared_trackers() -> (Arc<Mutex<MetricsTracker>>, Arc<Mutex<CostTracker>>) {
        (
            Arc::new(Mutex::new(MetricsTracker::new())),
            Arc::new(Mutex::new(CostTracker::default())),
        )
    }

    #[test]
    fn test_token_usage_arithmetic() {
        let usage = TokenUsage::new(120, 30);
        assert_eq!(usage.total_tokens, 150);
        assert_eq!(usage.total_tokens, usage.prompt_tokens + usage.completion_tokens);
        assert_eq!(TokenUsage::zero().total_tokens, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_twice_then_succeed_reports_once() {
        let (metrics, costs) = shared_trackers();
        let client = ModelClient::new(
            Arc::new(FlakyProvider::new(2)),
            GenerationConfig::default(),
            fast_retry(),
        )
        .with_metrics(Arc::clone(&metrics))
        .with_costs(Arc::clone(&costs));

        let response = client.generate_response("question", CallOptions::default()).await;

        assert!(response.is_success());
        assert_eq!(response.content, "answer from attempt 3");
        assert_eq!(response.usage.total_tokens, 15);

        // Exactly one record per logical call despite two retries
        assert_eq!(metrics.lock().unwrap().len(), 1);
        assert_eq!(costs.lock().unwrap().len(), 1);
        assert!(metrics.lock().unwrap().metrics()[0].success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_yield_failure_response() {
        let (metrics, costs) = shared_trackers();
        let client = ModelClient::new(
            Arc::new(FlakyProvider::new(10)),
            GenerationConfig::default(),
            fast_retry(),
        )
        .with_metrics(Arc::clone(&metrics))
        .with_costs(Arc::clone(&costs));

        let response = client.generate_response("question", CallOptions::default()).await;

        assert!(!response.is_success());
        assert!(response.content.is_empty());
        assert_eq!(response.usage, TokenUsage::zero());
        let error = response.error.as_deref().unwrap();
        assert!(error.contains("after 3 attempts"), "error was: {}", error);
        assert!(error.contains("simulated failure 3"));

        assert_eq!(metrics.lock().unwrap().len(), 1);
        assert!(!metrics.lock().unwrap().metrics()[0].success);
        assert_eq!(costs.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_schedule_is_exponential() {
        let client = ModelClient::new(
            Arc::new(FlakyProvider::new(2)),
            GenerationConfig::default(),
            RetryConfig {
                max_retries: 3,
                base_delay_ms: 1000,
                min_request_interval_ms: 0,
                request_timeout_secs: 5,
            },
        );

        let start = tokio::time::Instant::now();
        let response = client.generate_response("question", CallOptions::default()).await;

        // Waits 1s after attempt 1 and 2s after attempt 2
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(3), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(4), "elapsed {:?}", elapsed);

        // Latency covers backoff waits, not just the last attempt
        assert!(response.latency >= 3.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_spacing() {
        let client = ModelClient::new(
            Arc::new(FlakyProvider::new(0)),
            GenerationConfig::default(),
            RetryConfig {
                max_retries: 1,
                base_delay_ms: 100,
                min_request_interval_ms: 500,
                request_timeout_secs: 5,
            },
        );

        let start = tokio::time::Instant::now();
        client.generate_response("first", CallOptions::default()).await;
        let first_done = start.elapsed();
        client.generate_response("second", CallOptions::default()).await;
        let second_done = start.elapsed();

        assert!(
            second_done - first_done >= Duration::from_millis(500),
            "calls separated by {:?}",
            second_done - first_done
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_preserves_order() {
        let client = ModelClient::new(
            Arc::new(FlakyProvider::new(0)),
            GenerationConfig::default(),
            fast_retry(),
        );

        let prompts: Vec<String> = (0..3).map(|i| format!("prompt {}", i)).collect();
        let responses = client.batch_generate(&prompts, CallOptions::default()).await;

        assert_eq!(responses.len(), 3);
        // Sequential execution: attempt numbers ascend with position
        assert_eq!(responses[0].content, "answer from attempt 1");
        assert_eq!(responses[1].content, "answer from attempt 2");
        assert_eq!(responses[2].content, "answer from attempt 3");
    }

    #[tokio::test(start_paused = true)]
    async fn test_counters_roll_forward_and_reset() {
        let client = ModelClient::new(
            Arc::new(FlakyProvider::new(0)),
            GenerationConfig::default(),
            fast_retry(),
        );

        client.generate_response("a", CallOptions::default()).await;
        client.generate_response("b", CallOptions::default()).await;

        let counters = client.counters();
        assert_eq!(counters.total_requests, 2);
        assert_eq!(counters.total_tokens, 30);
        assert_eq!(counters.total_errors, 0);

        client.reset_counters();
        assert_eq!(client.counters().total_requests, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_options_flow_to_metric() {
        let (metrics, _) = shared_trackers();
        let client = ModelClient::new(
            Arc::new(FlakyProvider::new(0)),
            GenerationConfig::default(),
            fast_retry(),
        )
        .with_metrics(Arc::clone(&metrics));

        let options = CallOptions {
            analysis_type: "vector_context_qa".to_string(),
            context_length: Some(1234),
            chunks_used: Some(5),
            ..CallOptions::default()
        };
        let response = client.generate_response("q", options).await;

        assert_eq!(response.context_length, Some(1234));
        assert_eq!(response.chunks_used, Some(5));

        let guard = metrics.lock().unwrap();
        let metric = &guard.metrics()[0];
        assert_eq!(metric.analysis_type, "vector_context_qa");
        assert_eq!(metric.context_length, Some(1234));
        assert_eq!(metric.chunks_used, Some(5));
        assert_eq!(metric.response_length, Some(response.content.len()));
    }
}
