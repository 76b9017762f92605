//! Token counting capability
//!
//! The context assembler takes its tokenizer injected so budget decisions
//! stay testable without a provider round-trip.

/// Counts tokens in a piece of text
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

/// Rough approximation: ~4 characters per token
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicTokenCounter;

impl TokenCounter for HeuristicTokenCounter {
    fn count(&self, text: &str) -> usize {
        text.len() / 4
    }
}

/// One token per whitespace-delimited word
#[derive(Debug, Default, Clone, Copy)]
pub struct WhitespaceTokenCounter;

impl TokenCounter for WhitespaceTokenCounter {
    fn count(&self, text: &str) -> usize {
        text.split_whitespace().count()
    }
}
