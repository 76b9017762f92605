//! Text chunking module
//!
//! Splits text into bounded-size, overlapping word windows for embedding.
//! Chunking is deterministic: identical input and parameters always yield
//! the identical chunk sequence, which reproducible analysis depends on.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{AppError, Result};

/// Configuration for text chunking
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChunkingConfig {
    /// Chunk size in words
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Words shared between consecutive chunks
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

fn default_chunk_size() -> usize {
    1000
}

fn default_overlap() -> usize {
    100
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
        }
    }
}

impl ChunkingConfig {
    /// Validate that the window advances on every step.
    ///
    /// Requires `0 <= overlap < chunk_size`; anything else would stall the
    /// sliding window, so it is rejected up front instead of looping.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(AppError::config("chunk_size must be greater than zero"));
        }
        if self.overlap >= self.chunk_size {
            return Err(AppError::config(format!(
                "overlap ({}) must be smaller than chunk_size ({})",
                self.overlap, self.chunk_size
            )));
        }
        Ok(())
    }

    /// Word stride between consecutive chunk starts
    pub fn stride(&self) -> usize {
        self.chunk_size - self.overlap
    }
}

/// A contiguous word-range extracted from a document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Index of this chunk within the document
    pub index: usize,
    /// First word index covered (inclusive)
    pub start_word: usize,
    /// One past the last word index covered
    pub end_word: usize,
    /// The chunk content
    pub text: String,
}

/// Split text into overlapping word-window chunks.
///
/// The chunk starting at word `i` spans `[i, i + chunk_size)`; the next
/// chunk starts at `i + chunk_size - overlap`. Whitespace-only chunks are
/// dropped.
pub fn chunk_text(text: &str, config: &ChunkingConfig) -> Result<Vec<Chunk>> {
    config.validate()?;

    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return Ok(Vec::new());
    }

    let mut chunks = Vec::new();
    let mut start = 0;
    let mut index = 0;

    while start < words.len() {
        let end = (start + config.chunk_size).min(words.len());
        let content = words[start..end].join(" ");

        if !content.trim().is_empty() {
            chunks.push(Chunk {
                index,
                start_word: start,
                end_word: end,
                text: content,
            });
            index += 1;
        }

        start += config.stride();
    }

    debug!(
        word_count = words.len(),
        chunk_count = chunks.len(),
        chunk_size = config.chunk_size,
        overlap = config.overlap,
        "Text chunked"
    );

    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered_words(n: usize) -> String {
        (0..n).map(|i| format!("w{}", i)).collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn test_stride_and_coverage() {
        let text = numbered_words(25);
        let config = ChunkingConfig {
            chunk_size: 10,
            overlap: 3,
        };

        let chunks = chunk_text(&text, &config).unwrap();

        // Start indices increase by exactly chunk_size - overlap
        for pair in chunks.windows(2) {
            assert_eq!(pair[1].start_word - pair[0].start_word, 7);
        }
        // Every word is covered
        assert_eq!(chunks.last().unwrap().end_word, 25);
        assert!(chunks[0].text.starts_with("w0"));
    }

    #[test]
    fn test_overlap_shares_words() {
        let text = numbered_words(20);
        let config = ChunkingConfig {
            chunk_size: 8,
            overlap: 4,
        };

        let chunks = chunk_text(&text, &config).unwrap();
        assert!(chunks.len() >= 2);

        // The last 4 words of chunk 0 are the first 4 of chunk 1
        let tail: Vec<&str> = chunks[0].text.split_whitespace().skip(4).collect();
        let head: Vec<&str> = chunks[1].text.split_whitespace().take(4).collect();
        assert_eq!(tail, head);
    }

    #[test]
    fn test_rechunking_is_idempotent() {
        let text = numbered_words(137);
        let config = ChunkingConfig {
            chunk_size: 30,
            overlap: 10,
        };

        let first = chunk_text(&text, &config).unwrap();
        let second = chunk_text(&text, &config).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_invalid_overlap_rejected() {
        let config = ChunkingConfig {
            chunk_size: 10,
            overlap: 10,
        };
        assert!(chunk_text("some text", &config).is_err());

        let config = ChunkingConfig {
            chunk_size: 0,
            overlap: 0,
        };
        assert!(chunk_text("some text", &config).is_err());
    }

    #[test]
    fn test_empty_text() {
        let chunks = chunk_text("   \n\t ", &ChunkingConfig::default()).unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunks = chunk_text("just a few words", &ChunkingConfig::default()).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "just a few words");
        assert_eq!(chunks[0].start_word, 0);
        assert_eq!(chunks[0].end_word, 4);
    }
}
