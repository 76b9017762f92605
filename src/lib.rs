//! PaperScope Core Library
//!
//! Model invocation and telemetry layer for LLM-based paper analysis:
//! - Document chunking and in-memory vector retrieval
//! - Token-budgeted context assembly
//! - Provider-agnostic model client with pacing and retry
//! - Performance metrics, cost tracking, and cross-model comparison
//! - Error types and configuration management

pub mod analyzer;
pub mod chunker;
pub mod config;
pub mod context;
pub mod embeddings;
pub mod errors;
pub mod model;
pub mod observability;
pub mod store;
pub mod telemetry;
pub mod tokens;

// Re-export commonly used types
pub use config::AppConfig;
pub use context::{AssembledContext, ContextAssembler, ContextOutcome, Document};
pub use errors::{AppError, Result};
pub use model::{CallOptions, ModelClient, ModelResponse, Provider};
pub use store::{ContextStore, VectorStore};
pub use telemetry::{CostTracker, GroupBy, MetricsTracker, PerformanceAnalyzer};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default embedding model
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-ada-002";
