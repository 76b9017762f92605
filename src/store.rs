//! Context store abstraction
//!
//! A nearest-neighbor text index scoped to one analysis session. The
//! in-memory implementation embeds entries through an injected [`Embedder`]
//! and ranks by cosine similarity; ties are broken by insertion order so
//! query results are stable across runs.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::embeddings::Embedder;
use crate::errors::{AppError, Result};

/// One ranked query result
#[derive(Debug, Clone)]
pub struct ScoredMatch {
    /// Identifier the entry was added under
    pub id: String,
    /// Entry text
    pub text: String,
    /// Metadata supplied at add time
    pub metadata: HashMap<String, String>,
    /// Similarity score, higher is better
    pub score: f32,
}

/// Nearest-neighbor text index for one analysis session
#[async_trait]
pub trait ContextStore: Send + Sync {
    /// Add an entry under a unique id
    async fn add(&self, id: String, text: String, metadata: HashMap<String, String>) -> Result<()>;

    /// Query for the `k` best matches, best first
    async fn query(&self, text: &str, k: usize) -> Result<Vec<ScoredMatch>>;

    /// Fully clear all entries. Required between independent sessions.
    async fn reset(&self) -> Result<()>;

    /// Number of stored entries
    async fn len(&self) -> usize;

    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

struct StoredEntry {
    id: String,
    text: String,
    metadata: HashMap<String, String>,
    embedding: Vec<f32>,
    /// Insertion sequence number, used for stable tie-breaks
    seq: u64,
}

/// In-memory vector store backed by an embedder
pub struct VectorStore {
    embedder: Arc<dyn Embedder>,
    inner: RwLock<VectorStoreInner>,
}

#[derive(Default)]
struct VectorStoreInner {
    entries: Vec<StoredEntry>,
    next_seq: u64,
}

impl VectorStore {
    /// Create a new store over the given embedder
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            inner: RwLock::new(VectorStoreInner::default()),
        }
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[async_trait]
impl ContextStore for VectorStore {
    async fn add(&self, id: String, text: String, metadata: HashMap<String, String>) -> Result<()> {
        let embedding = self.embedder.embed(&text).await?;

        let mut inner = self.inner.write().await;
        if inner.entries.iter().any(|e| e.id == id) {
            return Err(AppError::Store {
                message: format!("Duplicate entry id: {}", id),
            });
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.push(StoredEntry {
            id,
            text,
            metadata,
            embedding,
            seq,
        });
        Ok(())
    }

    async fn query(&self, text: &str, k: usize) -> Result<Vec<ScoredMatch>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let query_embedding = self.embedder.embed(text).await?;

        let inner = self.inner.read().await;
        let mut scored: Vec<(&StoredEntry, f32)> = inner
            .entries
            .iter()
            .map(|e| (e, cosine_similarity(&query_embedding, &e.embedding)))
            .collect();

        // Best match first; equal scores keep insertion order
        scored.sort_by(|(ea, sa), (eb, sb)| {
            sb.partial_cmp(sa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(ea.seq.cmp(&eb.seq))
        });

        let matches: Vec<ScoredMatch> = scored
            .into_iter()
            .take(k)
            .map(|(e, score)| ScoredMatch {
                id: e.id.clone(),
                text: e.text.clone(),
                metadata: e.metadata.clone(),
                score,
            })
            .collect();

        debug!(
            query_len = text.len(),
            requested = k,
            returned = matches.len(),
            "Store queried"
        );

        Ok(matches)
    }

    async fn reset(&self) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.entries.clear();
        inner.next_seq = 0;
        debug!("Context store reset");
        Ok(())
    }

    async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashEmbedder;

    fn store() -> VectorStore {
        VectorStore::new(Arc::new(HashEmbedder::new(256)))
    }

    #[tokio::test]
    async fn test_query_ranks_by_similarity() {
        let store = store();
        store
            .add("a".into(), "transformer attention mechanism".into(), HashMap::new())
            .await
            .unwrap();
        store
            .add("b".into(), "gradient descent optimizer schedule".into(), HashMap::new())
            .await
            .unwrap();

        let results = store.query("attention mechanism", 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "a");
        assert!(results[0].score >= results[1].score);
    }

    #[tokio::test]
    async fn test_ties_keep_insertion_order() {
        let store = store();
        // Identical texts embed identically, so scores tie exactly
        for id in ["first", "second", "third"] {
            store
                .add(id.into(), "identical chunk text".into(), HashMap::new())
                .await
                .unwrap();
        }

        let results = store.query("identical chunk text", 3).await.unwrap();
        let ids: Vec<&str> = results.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_reset_clears_everything() {
        let store = store();
        store
            .add("x".into(), "some text".into(), HashMap::new())
            .await
            .unwrap();
        assert_eq!(store.len().await, 1);

        store.reset().await.unwrap();
        assert!(store.is_empty().await);
        let results = store.query("some text", 5).await.unwrap();
        assert!(results.is_empty());

        // Ids are reusable after a reset
        store
            .add("x".into(), "new text".into(), HashMap::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let store = store();
        store
            .add("dup".into(), "text".into(), HashMap::new())
            .await
            .unwrap();
        assert!(store
            .add("dup".into(), "other".into(), HashMap::new())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_k_bounds() {
        let store = store();
        store
            .add("only".into(), "text".into(), HashMap::new())
            .await
            .unwrap();

        assert!(store.query("text", 0).await.unwrap().is_empty());
        assert_eq!(store.query("text", 10).await.unwrap().len(), 1);
    }
}
