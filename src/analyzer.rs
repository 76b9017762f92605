//! Question-driven paper analysis sessions
//!
//! Runs a set of analysis questions over one or more papers. Each question
//! retrieves its context through the session's assembler and the prompt goes
//! through the model client. Every question yields a result row, failures
//! included, so a batch is always positionally complete.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::Path;
use tracing::{info, warn};
use uuid::Uuid;

use crate::context::{ContextAssembler, ContextOutcome, Document};
use crate::errors::{AppError, Result};
use crate::model::{CallOptions, ModelClient};

/// One analysis question
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub text: String,
}

impl Question {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

/// A named group of questions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionSet {
    pub name: String,
    pub questions: Vec<Question>,
}

impl QuestionSet {
    pub fn new(name: impl Into<String>, questions: Vec<Question>) -> Self {
        Self {
            name: name.into(),
            questions,
        }
    }

    /// Default cross-paper question sets
    pub fn cross_paper_defaults() -> Vec<QuestionSet> {
        vec![
            QuestionSet::new(
                "comparative",
                vec![
                    Question::new(
                        "comparative_1",
                        "What are the main methodological differences between these papers?",
                    ),
                    Question::new(
                        "comparative_2",
                        "How do the papers complement or contradict each other?",
                    ),
                ],
            ),
            QuestionSet::new(
                "thematic",
                vec![
                    Question::new(
                        "thematic_1",
                        "What common themes or patterns emerge across all papers?",
                    ),
                    Question::new(
                        "thematic_2",
                        "How do these papers collectively advance the field?",
                    ),
                ],
            ),
            QuestionSet::new(
                "synthesis",
                vec![
                    Question::new(
                        "synthesis_1",
                        "What are the shared limitations across these papers?",
                    ),
                    Question::new(
                        "synthesis_2",
                        "What future research directions are suggested by considering all papers together?",
                    ),
                ],
            ),
        ]
    }

    /// Default single-paper question set
    pub fn single_paper_defaults() -> QuestionSet {
        QuestionSet::new(
            "vector_qa",
            vec![
                Question::new(
                    "core_concepts",
                    "What are the core concepts and ideas presented in this paper?",
                ),
                Question::new(
                    "technical_approach",
                    "Explain the technical approach and implementation details.",
                ),
                Question::new(
                    "evaluation",
                    "How does the paper evaluate its proposed solution?",
                ),
                Question::new(
                    "innovation",
                    "What are the novel or innovative aspects of this work?",
                ),
            ],
        )
    }
}

/// Result of one analyzed question
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub category: String,
    pub question_id: String,
    pub question: String,
    pub response: String,
    pub model_name: String,
    pub interface_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunks_used: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_length: Option<usize>,
    pub documents_referenced: Vec<String>,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One analysis session over a fixed document set.
///
/// The session exclusively owns its assembler (and through it the context
/// store); `reset()` is required before reusing it for unrelated papers.
pub struct VectorQaSession {
    assembler: ContextAssembler,
    analysis_type: String,
    token_budget: usize,
    session_id: Uuid,
}

impl VectorQaSession {
    pub fn new(assembler: ContextAssembler, analysis_type: impl Into<String>, token_budget: usize) -> Self {
        Self {
            assembler,
            analysis_type: analysis_type.into(),
            token_budget,
            session_id: Uuid::new_v4(),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Clear session state so the next document set starts fresh
    pub async fn reset(&mut self) -> Result<()> {
        self.assembler.reset().await?;
        self.session_id = Uuid::new_v4();
        Ok(())
    }

    /// Run every question over the documents.
    ///
    /// Every question produces a row: provider and context-assembly
    /// failures land in the row's `error`, and an empty retrieval produces
    /// a row with the explicit no-context error rather than an empty
    /// prompt sent downstream. Rows already collected are never lost.
    pub async fn run(
        &self,
        documents: &[Document],
        client: &ModelClient,
        question_sets: &[QuestionSet],
    ) -> Result<Vec<AnalysisResult>> {
        let mut results = Vec::new();

        info!(
            session = %self.session_id,
            documents = documents.len(),
            "Starting analysis session"
        );

        for set in question_sets {
            for question in &set.questions {
                // Assembly failures become error rows like any other step
                // failure, so rows already collected are never discarded
                let outcome = match self
                    .assembler
                    .assemble(&question.text, documents, self.token_budget)
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        warn!(
                            session = %self.session_id,
                            question = %question.id,
                            error = %e,
                            "Context assembly failed"
                        );
                        results.push(self.error_row(
                            set,
                            question,
                            client,
                            format!("context assembly failed: {}", e),
                        ));
                        continue;
                    }
                };

                let result = match outcome {
                    ContextOutcome::NoRelevantContext => {
                        warn!(
                            session = %self.session_id,
                            question = %question.id,
                            "No relevant context, skipping model call"
                        );
                        self.error_row(
                            set,
                            question,
                            client,
                            "no relevant context retrieved".to_string(),
                        )
                    }
                    ContextOutcome::Assembled(ctx) => {
                        let prompt = format!(
                            "Based on these sections from multiple papers, please answer:\n\
                             {}\n\n\
                             Please provide a comprehensive analysis that draws from all \
                             relevant papers.\n\n\
                             Relevant sections:\n{}",
                            question.text, ctx.text
                        );

                        let options = CallOptions {
                            analysis_type: self.analysis_type.clone(),
                            context_length: Some(ctx.token_count),
                            chunks_used: Some(ctx.chunks_used),
                            ..CallOptions::default()
                        };
                        let response = client.generate_response(&prompt, options).await;

                        AnalysisResult {
                            category: set.name.clone(),
                            question_id: question.id.clone(),
                            question: question.text.clone(),
                            response: response.content.clone(),
                            model_name: response.model_name.clone(),
                            interface_type: response.interface_type.clone(),
                            chunks_used: Some(ctx.chunks_used),
                            context_length: Some(ctx.token_count),
                            documents_referenced: ctx.documents.clone(),
                            timestamp: response.timestamp.to_rfc3339(),
                            error: response.error,
                        }
                    }
                };

                results.push(result);
            }
        }

        info!(
            session = %self.session_id,
            results = results.len(),
            errors = results.iter().filter(|r| r.error.is_some()).count(),
            "Analysis session complete"
        );

        Ok(results)
    }

    fn error_row(
        &self,
        set: &QuestionSet,
        question: &Question,
        client: &ModelClient,
        error: String,
    ) -> AnalysisResult {
        AnalysisResult {
            category: set.name.clone(),
            question_id: question.id.clone(),
            question: question.text.clone(),
            response: String::new(),
            model_name: client.model_name().to_string(),
            interface_type: "api".to_string(),
            chunks_used: None,
            context_length: None,
            documents_referenced: Vec::new(),
            timestamp: Utc::now().to_rfc3339(),
            error: Some(error),
        }
    }

    /// Save results to a JSON file
    pub fn save_results(&self, results: &[AnalysisResult], path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let payload = json!({
            "timestamp": Utc::now().to_rfc3339(),
            "session_id": self.session_id,
            "results": results,
        });

        let data = serde_json::to_string_pretty(&payload)?;
        std::fs::write(path, data).map_err(|e| AppError::Persistence {
            message: format!("writing {}: {}", path.display(), e),
        })?;

        info!(count = results.len(), path = %path.display(), "Results saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::ChunkingConfig;
    use crate::config::{GenerationConfig, RetryConfig};
    use crate::embeddings::HashEmbedder;
    use crate::errors::Result;
    use crate::model::{Completion, CompletionRequest, Provider};
    use crate::store::{ContextStore, ScoredMatch, VectorStore};
    use crate::telemetry::MetricsTracker;
    use crate::tokens::WhitespaceTokenCounter;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    struct CannedProvider {
        fail: bool,
    }

    #[async_trait]
    impl Provider for CannedProvider {
        async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
            if self.fail {
                return Err(crate::errors::AppError::provider("canned failure"));
            }
            Ok(Completion {
                content: format!("analysis of {} chars", request.messages[0].content.len()),
                prompt_tokens: 50,
                completion_tokens: 20,
                finish_reason: Some("stop".to_string()),
                metadata: HashMap::new(),
            })
        }

        fn model_name(&self) -> &str {
            "canned-model"
        }
    }

    fn session() -> VectorQaSession {
        let store = Arc::new(VectorStore::new(Arc::new(HashEmbedder::new(256))));
        let assembler = ContextAssembler::new(
            store,
            Some(ChunkingConfig {
                chunk_size: 20,
                overlap: 5,
            }),
            Arc::new(WhitespaceTokenCounter),
            5,
            10,
        );
        VectorQaSession::new(assembler, "vector_context_qa", 500)
    }

    fn client(fail: bool) -> ModelClient {
        ModelClient::new(
            Arc::new(CannedProvider { fail }),
            GenerationConfig::default(),
            RetryConfig {
                max_retries: 1,
                base_delay_ms: 10,
                min_request_interval_ms: 0,
                request_timeout_secs: 5,
            },
        )
    }

    fn papers() -> Vec<Document> {
        vec![
            Document::new(
                "paper_1",
                "This paper studies attention mechanisms in transformers. The method \
                 is evaluated on translation benchmarks. Results show strong gains.",
            ),
            Document::new(
                "paper_2",
                "This paper proposes a convolutional architecture. Evaluation covers \
                 image classification. The approach is simple and fast.",
            ),
        ]
    }

    #[tokio::test]
    async fn test_every_question_yields_a_row() {
        let session = session();
        let client = client(false);
        let sets = QuestionSet::cross_paper_defaults();
        let expected: usize = sets.iter().map(|s| s.questions.len()).sum();

        let results = session.run(&papers(), &client, &sets).await.unwrap();

        assert_eq!(results.len(), expected);
        for result in &results {
            assert!(result.error.is_none(), "unexpected error: {:?}", result.error);
            assert!(result.chunks_used.unwrap() > 0);
            assert!(!result.documents_referenced.is_empty());
            assert!(!result.response.is_empty());
        }
    }

    #[tokio::test]
    async fn test_failed_calls_still_produce_rows() {
        let session = session();
        let client = client(true);
        let sets = vec![QuestionSet::single_paper_defaults()];

        let results = session.run(&papers(), &client, &sets).await.unwrap();

        assert_eq!(results.len(), 4);
        for result in &results {
            assert!(result.error.is_some());
            assert!(result.response.is_empty());
            // Context was still assembled and recorded
            assert!(result.chunks_used.is_some());
        }
    }

    struct FailingAfterFirstQueryStore {
        inner: VectorStore,
        queries: AtomicU32,
    }

    #[async_trait]
    impl ContextStore for FailingAfterFirstQueryStore {
        async fn add(
            &self,
            id: String,
            text: String,
            metadata: HashMap<String, String>,
        ) -> Result<()> {
            self.inner.add(id, text, metadata).await
        }

        async fn query(&self, text: &str, k: usize) -> Result<Vec<ScoredMatch>> {
            if self.queries.fetch_add(1, Ordering::SeqCst) == 0 {
                self.inner.query(text, k).await
            } else {
                Err(crate::errors::AppError::Embedding {
                    message: "embedding service down".to_string(),
                })
            }
        }

        async fn reset(&self) -> Result<()> {
            self.inner.reset().await
        }

        async fn len(&self) -> usize {
            self.inner.len().await
        }
    }

    #[tokio::test]
    async fn test_assembly_failure_keeps_batch_complete() {
        let store = Arc::new(FailingAfterFirstQueryStore {
            inner: VectorStore::new(Arc::new(HashEmbedder::new(256))),
            queries: AtomicU32::new(0),
        });
        let assembler = ContextAssembler::new(
            store,
            Some(ChunkingConfig {
                chunk_size: 20,
                overlap: 5,
            }),
            Arc::new(WhitespaceTokenCounter),
            5,
            10,
        );
        let session = VectorQaSession::new(assembler, "vector_context_qa", 500);
        let client = client(false);
        let sets = vec![QuestionSet::new(
            "three",
            vec![
                Question::new("q1", "What method is proposed?"),
                Question::new("q2", "How is it evaluated?"),
                Question::new("q3", "What are the limitations?"),
            ],
        )];

        let results = session.run(&papers(), &client, &sets).await.unwrap();

        // The first row survives and the failed questions still get rows
        assert_eq!(results.len(), 3);
        assert!(results[0].error.is_none());
        assert!(!results[0].response.is_empty());
        for result in &results[1..] {
            let error = result.error.as_deref().unwrap();
            assert!(error.contains("context assembly failed"), "error: {}", error);
            assert!(error.contains("embedding service down"));
        }
        // Ordering follows question order
        let ids: Vec<&str> = results.iter().map(|r| r.question_id.as_str()).collect();
        assert_eq!(ids, vec!["q1", "q2", "q3"]);
    }

    #[tokio::test]
    async fn test_no_documents_is_explicit() {
        let session = session();
        let client = client(false);
        let sets = vec![QuestionSet::new(
            "solo",
            vec![Question::new("q1", "What does the paper claim?")],
        )];

        let results = session.run(&[], &client, &sets).await.unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(
            results[0].error.as_deref(),
            Some("no relevant context retrieved")
        );
    }

    #[tokio::test]
    async fn test_session_reports_metrics_per_question() {
        let metrics = Arc::new(Mutex::new(MetricsTracker::new()));
        let session = session();
        let client = client(false).with_metrics(Arc::clone(&metrics));
        let sets = vec![QuestionSet::single_paper_defaults()];

        session.run(&papers(), &client, &sets).await.unwrap();

        let guard = metrics.lock().unwrap();
        assert_eq!(guard.len(), 4);
        for metric in guard.metrics() {
            assert_eq!(metric.analysis_type, "vector_context_qa");
            assert!(metric.chunks_used.is_some());
        }
    }

    #[tokio::test]
    async fn test_reset_between_sessions() {
        let mut session = session();
        let client = client(false);
        let sets = vec![QuestionSet::new(
            "one",
            vec![Question::new("q", "What is studied?")],
        )];

        session.run(&papers(), &client, &sets).await.unwrap();
        let first_id = session.session_id();

        session.reset().await.unwrap();
        assert_ne!(session.session_id(), first_id);

        // Same documents are ingestible again after the reset
        let results = session.run(&papers(), &client, &sets).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].error.is_none());
    }

    #[tokio::test]
    async fn test_save_results() {
        let session = session();
        let client = client(false);
        let sets = vec![QuestionSet::new(
            "one",
            vec![Question::new("q", "What is studied?")],
        )];

        let results = session.run(&papers(), &client, &sets).await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vector_context_qa_results.json");
        session.save_results(&results, &path).unwrap();

        let data = std::fs::read_to_string(&path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&data).unwrap();
        assert_eq!(parsed["results"].as_array().unwrap().len(), 1);
        assert!(parsed["session_id"].is_string());
    }
}
