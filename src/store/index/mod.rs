
use std::cmp::Ordering;

use crate::{RagError, Result};

const INDEX_MAGIC: &[u8; 4] = b"PRIX";
const INDEX_FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 4 + 8;

/// A search result: the position of a stored vector and its inner product
/// with the query
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub position: usize,
    pub score: f32,
}

/// Exact inner-product index addressed by insertion order
pub trait VectorIndex: Sized {
    fn dimension(&self) -> usize;

    fn count(&self) -> usize;

    #[inline]
    fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Append `vectors` in order
    ///
    /// # Errors
    /// Returns [`RagError::DimensionMismatch`] without modifying the index if
    /// any vector has the wrong length.
    fn add(&mut self, vectors: &[Vec<f32>]) -> Result<()>;

    /// The `k` highest-scoring positions, best first
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>>;

    /// Copy of the vector stored at `position`
    fn reconstruct(&self, position: usize) -> Result<Vec<f32>>;

    /// A fresh empty index with the same dimension
    fn empty_like(&self) -> Self;
}

/// Brute-force index over a contiguous row-major buffer
#[derive(Debug, Clone, PartialEq)]
pub struct FlatIndex {
    dimension: usize,
    data: Vec<f32>,
}

impl FlatIndex {
    /// # Errors
    /// Returns [`RagError::InvalidConfiguration`] for a zero dimension or one
    /// that does not fit the artifact header.
    #[inline]
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(RagError::InvalidConfiguration(
                "index dimension must be greater than 0".to_string(),
            ));
        }
        if u32::try_from(dimension).is_err() {
            return Err(RagError::InvalidConfiguration(format!(
                "index dimension {} exceeds {}",
                dimension,
                u32::MAX
            )));
        }
        Ok(Self {
            dimension,
            data: Vec::new(),
        })
    }

    /// Stored vectors as slices, in position order
    #[inline]
    pub fn vectors(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.dimension)
    }

    /// Serialize into the binary index artifact
    ///
    /// # Errors
    /// Returns [`RagError::InvalidConfiguration`] if the dimension or count
    /// does not fit the header fields.
    #[inline]
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let dimension = u32::try_from(self.dimension).map_err(|_| {
            RagError::InvalidConfiguration(format!(
                "index dimension {} exceeds {}",
                self.dimension,
                u32::MAX
            ))
        })?;
        let count = u64::try_from(self.count()).map_err(|_| {
            RagError::InvalidConfiguration(format!("index count {} exceeds {}", self.count(), u64::MAX))
        })?;

        let mut out = Vec::with_capacity(HEADER_LEN + self.data.len() * 4);
        out.extend_from_slice(INDEX_MAGIC);
        out.extend_from_slice(&INDEX_FORMAT_VERSION.to_le_bytes());
        out.extend_from_slice(&dimension.to_le_bytes());
        out.extend_from_slice(&count.to_le_bytes());
        for value in &self.data {
            out.extend_from_slice(&value.to_le_bytes());
        }
        Ok(out)
    }

    /// Parse a binary index artifact
    ///
    /// # Errors
    /// Returns [`RagError::Integrity`] on a bad magic, an unknown version, a
    /// zero dimension or a length that disagrees with the header.
    #[inline]
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(RagError::Integrity(format!(
                "index artifact truncated: {} bytes",
                bytes.len()
            )));
        }
        if &bytes[0..4] != INDEX_MAGIC {
            return Err(RagError::Integrity(
                "index artifact has an unknown magic header".to_string(),
            ));
        }

        let version = read_u32(&bytes[4..8]);
        if version != INDEX_FORMAT_VERSION {
            return Err(RagError::Integrity(format!(
                "unsupported index format version {}",
                version
            )));
        }

        let dimension = read_u32(&bytes[8..12]) as usize;
        let count = read_u64(&bytes[12..20]);
        if dimension == 0 {
            return Err(RagError::Integrity(
                "index artifact declares dimension 0".to_string(),
            ));
        }

        let expected_len = usize::try_from(count)
            .ok()
            .and_then(|count| count.checked_mul(dimension))
            .and_then(|values| values.checked_mul(4))
            .and_then(|payload| payload.checked_add(HEADER_LEN));
        if expected_len != Some(bytes.len()) {
            return Err(RagError::Integrity(format!(
                "index artifact length {} does not match {} vectors of dimension {}",
                bytes.len(),
                count,
                dimension
            )));
        }

        let data = bytes[HEADER_LEN..]
            .chunks_exact(4)
            .map(|raw| f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
            .collect();

        Ok(Self { dimension, data })
    }

    fn check_dimension(&self, len: usize) -> Result<()> {
        if len != self.dimension {
            return Err(RagError::DimensionMismatch {
                expected: self.dimension,
                actual: len,
            });
        }
        Ok(())
    }
}

impl VectorIndex for FlatIndex {
    #[inline]
    fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    fn count(&self) -> usize {
        self.data.len() / self.dimension
    }

    #[inline]
    fn add(&mut self, vectors: &[Vec<f32>]) -> Result<()> {
        for vector in vectors {
            self.check_dimension(vector.len())?;
        }

        self.data.reserve(vectors.len() * self.dimension);
        for vector in vectors {
            self.data.extend_from_slice(vector);
        }
        Ok(())
    }

    #[inline]
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }
        self.check_dimension(query.len())?;

        let mut neighbors: Vec<Neighbor> = self
            .vectors()
            .enumerate()
            .map(|(position, stored)| Neighbor {
                position,
                score: crate::embeddings::dot(stored, query),
            })
            .collect();

        let by_rank = |a: &Neighbor, b: &Neighbor| -> Ordering {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.position.cmp(&b.position))
        };

        if k < neighbors.len() {
            neighbors.select_nth_unstable_by(k - 1, by_rank);
            neighbors.truncate(k);
        }
        neighbors.sort_unstable_by(by_rank);

        Ok(neighbors)
    }

    #[inline]
    fn reconstruct(&self, position: usize) -> Result<Vec<f32>> {
        let count = self.count();
        if position >= count {
            return Err(RagError::OutOfRange { position, count });
        }
        let start = position * self.dimension;
        Ok(self.data[start..start + self.dimension].to_vec())
    }

    #[inline]
    fn empty_like(&self) -> Self {
        Self {
            dimension: self.dimension,
            data: Vec::new(),
        }
    }
}

fn read_u32(raw: &[u8]) -> u32 {
    u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]])
}

fn read_u64(raw: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&raw[..8]);
    u64::from_le_bytes(buf)
}
