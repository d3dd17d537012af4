// Embeddings module
// Chunking of extracted text and the embedding backends that turn chunks into vectors


pub mod chunking;
pub mod hashing;
pub mod ollama;

use crate::{RagError, Result};

pub use chunking::{ChunkingConfig, chunk_text};
pub use hashing::HashingEmbedder;
pub use ollama::OllamaClient;

/// Maps text to fixed-dimension vectors
///
/// Implementors only provide [`Embedder::embed_raw`]; callers use
/// [`Embedder::embed`], which enforces ordering and unit norm.
pub trait Embedder: Send + Sync {
    /// Dimension of every vector produced by this embedder
    fn dimension(&self) -> usize;

    /// Backend output for `texts`, one vector per input, in input order
    fn embed_raw(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed `texts` and L2-normalize every resulting vector
    ///
    /// # Errors
    /// Returns [`RagError::Embedding`] if the backend fails, returns the wrong
    /// number of vectors, or yields a vector that cannot be normalized.
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut vectors = self.embed_raw(texts)?;
        if vectors.len() != texts.len() {
            return Err(RagError::Embedding(format!(
                "Backend returned {} vectors for {} inputs",
                vectors.len(),
                texts.len()
            )));
        }

        for vector in &mut vectors {
            normalize_in_place(vector)?;
        }

        Ok(vectors)
    }

    /// Embed a single query string
    fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        self.embed(&[query.to_string()])?
            .pop()
            .ok_or_else(|| RagError::Embedding("Backend returned no vector for query".to_string()))
    }
}

impl<E: Embedder + ?Sized> Embedder for std::sync::Arc<E> {
    #[inline]
    fn dimension(&self) -> usize {
        (**self).dimension()
    }

    #[inline]
    fn embed_raw(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        (**self).embed_raw(texts)
    }
}

impl<E: Embedder + ?Sized> Embedder for Box<E> {
    #[inline]
    fn dimension(&self) -> usize {
        (**self).dimension()
    }

    #[inline]
    fn embed_raw(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        (**self).embed_raw(texts)
    }
}

/// Euclidean norm, accumulated in f64
#[inline]
pub fn l2_norm(vector: &[f32]) -> f32 {
    vector
        .iter()
        .map(|&x| f64::from(x) * f64::from(x))
        .sum::<f64>()
        .sqrt() as f32
}

/// Scale `vector` to unit L2 norm
///
/// # Errors
/// Returns [`RagError::Embedding`] for empty, zero or non-finite vectors.
#[inline]
pub fn normalize_in_place(vector: &mut [f32]) -> Result<()> {
    if vector.is_empty() {
        return Err(RagError::Embedding("Cannot normalize an empty vector".to_string()));
    }

    let norm = vector
        .iter()
        .map(|&x| f64::from(x) * f64::from(x))
        .sum::<f64>()
        .sqrt();

    if !norm.is_finite() || norm == 0.0 {
        return Err(RagError::Embedding(format!(
            "Cannot normalize vector with norm {}",
            norm
        )));
    }

    for value in vector.iter_mut() {
        *value = (f64::from(*value) / norm) as f32;
    }
    Ok(())
}

/// Inner product of two equal-length vectors
#[inline]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
