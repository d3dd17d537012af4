
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{RagError, Result};

pub const DEFAULT_CHUNK_SIZE: usize = 500;
pub const DEFAULT_OVERLAP: usize = 50;
pub const MAX_CHUNK_SIZE: usize = 8192;

/// Configuration for word-window chunking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Number of words per chunk
    pub chunk_size: usize,
    /// Number of words shared by adjacent chunks
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_OVERLAP,
        }
    }
}

impl ChunkingConfig {
    #[inline]
    pub const fn new(chunk_size: usize, overlap: usize) -> Self {
        Self {
            chunk_size,
            overlap,
        }
    }

    /// Words the window start advances by between chunks
    ///
    /// # Errors
    /// Returns [`RagError::InvalidConfiguration`] unless `chunk_size > overlap`.
    #[inline]
    pub fn step(&self) -> Result<usize> {
        if self.chunk_size == 0 {
            return Err(RagError::InvalidConfiguration(
                "chunk_size must be greater than 0".to_string(),
            ));
        }
        if self.overlap >= self.chunk_size {
            return Err(RagError::InvalidConfiguration(format!(
                "overlap ({}) must be smaller than chunk_size ({})",
                self.overlap, self.chunk_size
            )));
        }
        Ok(self.chunk_size - self.overlap)
    }

    #[inline]
    pub fn validate(&self) -> Result<()> {
        self.step()?;
        if self.chunk_size > MAX_CHUNK_SIZE {
            return Err(RagError::InvalidConfiguration(format!(
                "chunk_size ({}) must not exceed {}",
                self.chunk_size, MAX_CHUNK_SIZE
            )));
        }
        Ok(())
    }
}

/// Split `text` into overlapping windows of whitespace-separated words
///
/// Windows hold `chunk_size` words and start `chunk_size - overlap` words
/// apart. Generation stops at the first window that reaches the final word,
/// so no chunk is fully contained in its predecessor.
///
/// # Errors
/// Returns [`RagError::InvalidConfiguration`] when `overlap >= chunk_size`.
#[inline]
pub fn chunk_text(text: &str, config: &ChunkingConfig) -> Result<Vec<String>> {
    let step = config.step()?;
    let words: Vec<&str> = text.split_whitespace().collect();

    let mut chunks = Vec::with_capacity(expected_chunk_count(words.len(), config));
    let mut start = 0;
    while start < words.len() {
        let end = (start + config.chunk_size).min(words.len());
        chunks.push(words[start..end].join(" "));
        if end == words.len() {
            break;
        }
        start += step;
    }

    debug!(
        "Chunked {} words into {} chunks (size {}, overlap {})",
        words.len(),
        chunks.len(),
        config.chunk_size,
        config.overlap
    );

    Ok(chunks)
}

/// Number of chunks [`chunk_text`] yields for `word_count` words
///
/// Returns 0 for an invalid configuration.
#[inline]
pub fn expected_chunk_count(word_count: usize, config: &ChunkingConfig) -> usize {
    let Ok(step) = config.step() else {
        return 0;
    };
    if word_count == 0 {
        return 0;
    }
    word_count.saturating_sub(config.overlap).max(1).div_ceil(step)
}
