//! Context assembly
//!
//! Builds a bounded-length prompt context for a question from one or more
//! documents: chunks are kept in the session's context store, the question
//! retrieves the top-k matches, matches are grouped per originating document
//! under an identifying header, and the result is trimmed to a token budget.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::chunker::{chunk_text, ChunkingConfig};
use crate::errors::Result;
use crate::store::ContextStore;
use crate::tokens::TokenCounter;

/// Metadata key carrying the originating document id
const DOCUMENT_ID_KEY: &str = "document_id";

/// A source document to draw context from
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub text: String,
}

impl Document {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

/// A successfully assembled prompt context
#[derive(Debug, Clone)]
pub struct AssembledContext {
    /// The context text, within the token budget
    pub text: String,
    /// Token count of `text` per the injected counter
    pub token_count: usize,
    /// Number of retrieved chunks that contributed
    pub chunks_used: usize,
    /// Originating document ids, in first-seen order
    pub documents: Vec<String>,
}

/// Outcome of context assembly.
///
/// Zero store matches surface as [`ContextOutcome::NoRelevantContext`]
/// rather than an empty string, so callers must branch explicitly.
#[derive(Debug, Clone)]
pub enum ContextOutcome {
    Assembled(AssembledContext),
    NoRelevantContext,
}

/// Assembles bounded prompt contexts from a session's context store
pub struct ContextAssembler {
    store: Arc<dyn ContextStore>,
    /// Chunking parameters; `None` adds documents whole
    chunking: Option<ChunkingConfig>,
    counter: Arc<dyn TokenCounter>,
    top_k: usize,
    trim_step_words: usize,
    ingested: Mutex<Vec<String>>,
}

impl ContextAssembler {
    pub fn new(
        store: Arc<dyn ContextStore>,
        chunking: Option<ChunkingConfig>,
        counter: Arc<dyn TokenCounter>,
        top_k: usize,
        trim_step_words: usize,
    ) -> Self {
        Self {
            store,
            chunking,
            counter,
            top_k,
            trim_step_words: trim_step_words.max(1),
            ingested: Mutex::new(Vec::new()),
        }
    }

    /// Shared handle to the session's store
    pub fn store(&self) -> Arc<dyn ContextStore> {
        Arc::clone(&self.store)
    }

    /// Clear the store and the ingestion ledger before a new session
    pub async fn reset(&self) -> Result<()> {
        self.store.reset().await?;
        self.ingested.lock().await.clear();
        Ok(())
    }

    /// Ensure each document's chunks are present in the store
    pub async fn ingest(&self, documents: &[Document]) -> Result<()> {
        let mut ingested = self.ingested.lock().await;

        for doc in documents {
            if ingested.iter().any(|id| id == &doc.id) {
                continue;
            }

            match &self.chunking {
                Some(config) => {
                    let chunks = chunk_text(&doc.text, config)?;
                    let count = chunks.len();
                    for chunk in chunks {
                        let mut metadata = HashMap::new();
                        metadata.insert(DOCUMENT_ID_KEY.to_string(), doc.id.clone());
                        metadata.insert("chunk_index".to_string(), chunk.index.to_string());
                        self.store
                            .add(
                                format!("{}_chunk_{}", doc.id, chunk.index),
                                chunk.text,
                                metadata,
                            )
                            .await?;
                    }
                    debug!(document = %doc.id, chunks = count, "Document chunked into store");
                }
                None => {
                    let mut metadata = HashMap::new();
                    metadata.insert(DOCUMENT_ID_KEY.to_string(), doc.id.clone());
                    self.store
                        .add(doc.id.clone(), doc.text.clone(), metadata)
                        .await?;
                    debug!(document = %doc.id, "Document added whole");
                }
            }

            ingested.push(doc.id.clone());
        }

        Ok(())
    }

    /// Assemble a prompt context for `question` within `token_budget` tokens
    pub async fn assemble(
        &self,
        question: &str,
        documents: &[Document],
        token_budget: usize,
    ) -> Result<ContextOutcome> {
        self.ingest(documents).await?;

        let matches = self.store.query(question, self.top_k).await?;
        if matches.is_empty() {
            info!(question_len = question.len(), "No relevant context found");
            return Ok(ContextOutcome::NoRelevantContext);
        }

        // Group matches by originating document, preserving result order
        // within each group; documents appear in first-seen order.
        let mut doc_order: Vec<String> = Vec::new();
        let mut grouped: HashMap<String, Vec<&str>> = HashMap::new();

        for m in &matches {
            let doc_id = m
                .metadata
                .get(DOCUMENT_ID_KEY)
                .cloned()
                .unwrap_or_else(|| m.id.clone());
            if !doc_order.contains(&doc_id) {
                doc_order.push(doc_id.clone());
            }
            grouped.entry(doc_id).or_default().push(&m.text);
        }

        let sections: Vec<String> = doc_order
            .iter()
            .map(|doc_id| {
                format!(
                    "=== From {} ===\n{}",
                    doc_id,
                    grouped[doc_id].join("\n")
                )
            })
            .collect();

        let combined = sections.join("\n\n");
        let trimmed = self.trim_to_budget(combined, token_budget);
        let token_count = self.counter.count(&trimmed);

        debug!(
            documents = doc_order.len(),
            chunks_used = matches.len(),
            token_count,
            token_budget,
            "Context assembled"
        );

        Ok(ContextOutcome::Assembled(AssembledContext {
            text: trimmed,
            token_count,
            chunks_used: matches.len(),
            documents: doc_order,
        }))
    }

    /// Trim from the end in fixed word decrements until within budget,
    /// then prefer the last sentence boundary if cutting there discards
    /// no more than 20% of the budget.
    fn trim_to_budget(&self, text: String, token_budget: usize) -> String {
        if self.counter.count(&text) <= token_budget {
            return text;
        }

        let mut words: Vec<&str> = text.split_whitespace().collect();
        loop {
            let len = words.len().saturating_sub(self.trim_step_words);
            words.truncate(len);
            let candidate = words.join(" ");
            if self.counter.count(&candidate) <= token_budget || words.is_empty() {
                return self.prefer_sentence_boundary(candidate, token_budget);
            }
        }
    }

    fn prefer_sentence_boundary(&self, text: String, token_budget: usize) -> String {
        // Trimming rejoins words with single spaces, so sentence endings
        // always appear space-separated here
        let endings = [". ", "! ", "? "];

        let cut = endings
            .iter()
            .filter_map(|e| text.rfind(e).map(|pos| pos + 1))
            .max();

        if let Some(cut) = cut {
            let candidate = &text[..cut];
            let discarded = self
                .counter
                .count(&text)
                .saturating_sub(self.counter.count(candidate));
            if discarded <= token_budget / 5 {
                return candidate.trim_end().to_string();
            }
        }

        text
    }
}
