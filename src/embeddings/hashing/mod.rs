
use std::collections::HashMap;

use super::Embedder;
use crate::{RagError, Result};

pub const DEFAULT_HASHING_DIMENSION: usize = 384;

/// Deterministic bag-of-words embedder that needs no model server
///
/// Each lowercase alphanumeric token is hashed (FNV-1a) into three
/// positions weighted by its term frequency. Useful offline and as a
/// reproducible stand-in for a real model in tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    /// # Errors
    /// Returns [`RagError::InvalidConfiguration`] for a zero dimension.
    #[inline]
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(RagError::InvalidConfiguration(
                "embedding dimension must be greater than 0".to_string(),
            ));
        }
        Ok(Self { dimension })
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];

        let lowered = text.to_lowercase();
        let tokens: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();

        if tokens.is_empty() {
            // Token-free text still needs a unit vector
            vector[0] = 1.0;
            return vector;
        }

        let mut frequencies: HashMap<&str, f32> = HashMap::new();
        for token in &tokens {
            *frequencies.entry(token).or_insert(0.0) += 1.0;
        }

        let total = tokens.len() as f32;
        for (token, count) in frequencies {
            let tf = count / total;
            let bytes = token.as_bytes();
            vector[fnv1a(bytes, 0) as usize % self.dimension] += tf;
            vector[fnv1a(bytes, 1) as usize % self.dimension] += tf * 0.7;
            vector[fnv1a(bytes, 2) as usize % self.dimension] += tf * 0.5;
        }

        vector
    }
}

impl Default for HashingEmbedder {
    #[inline]
    fn default() -> Self {
        Self {
            dimension: DEFAULT_HASHING_DIMENSION,
        }
    }
}

impl Embedder for HashingEmbedder {
    #[inline]
    fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    fn embed_raw(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.embed_one(text)).collect())
    }
}

/// FNV-1a over `data` followed by a one-byte salt
fn fnv1a(data: &[u8], salt: u8) -> u32 {
    let mut hash: u32 = 2_166_136_261;
    for &byte in data.iter().chain(std::iter::once(&salt)) {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(16_777_619);
    }
    hash
}
