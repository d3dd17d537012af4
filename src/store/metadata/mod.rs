
use serde::{Deserialize, Serialize};

use crate::{RagError, Result};

pub const METADATA_SCHEMA_VERSION: u32 = 1;

/// Describes the vector at the same position in the index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Id of the document the chunk came from
    pub filename: String,
    pub text: String,
}

impl ChunkRecord {
    #[inline]
    pub fn new(filename: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            text: text.into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct MetadataFile {
    schema_version: u32,
    dimension: usize,
    count: usize,
    records: Vec<ChunkRecord>,
}

/// Ordered chunk records parallel to the vector index
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataStore {
    records: Vec<ChunkRecord>,
}

impl MetadataStore {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn from_records(records: Vec<ChunkRecord>) -> Self {
        Self { records }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[inline]
    pub fn records(&self) -> &[ChunkRecord] {
        &self.records
    }

    #[inline]
    pub fn get(&self, position: usize) -> Result<&ChunkRecord> {
        self.records.get(position).ok_or(RagError::OutOfRange {
            position,
            count: self.records.len(),
        })
    }

    #[inline]
    pub fn append(&mut self, records: impl IntoIterator<Item = ChunkRecord>) {
        self.records.extend(records);
    }

    /// Records matching `keep` together with their positions
    #[inline]
    pub fn filter_by<F>(&self, mut keep: F) -> (Vec<ChunkRecord>, Vec<usize>)
    where
        F: FnMut(&ChunkRecord) -> bool,
    {
        let mut kept_records = Vec::new();
        let mut kept_positions = Vec::new();
        for (position, record) in self.records.iter().enumerate() {
            if keep(record) {
                kept_records.push(record.clone());
                kept_positions.push(position);
            }
        }
        (kept_records, kept_positions)
    }

    #[inline]
    pub fn replace_all(&mut self, records: Vec<ChunkRecord>) {
        self.records = records;
    }

    #[inline]
    pub fn contains_document(&self, document_id: &str) -> bool {
        self.records.iter().any(|r| r.filename == document_id)
    }

    /// Chunk count per document, in order of first appearance
    #[inline]
    pub fn document_chunk_counts(&self) -> Vec<(String, usize)> {
        let mut counts: Vec<(String, usize)> = Vec::new();
        for record in &self.records {
            match counts.iter_mut().find(|(name, _)| *name == record.filename) {
                Some((_, count)) => *count += 1,
                None => counts.push((record.filename.clone(), 1)),
            }
        }
        counts
    }

    /// Serialize into the JSON metadata artifact
    #[inline]
    pub fn to_json(&self, dimension: usize) -> Result<Vec<u8>> {
        let file = MetadataFile {
            schema_version: METADATA_SCHEMA_VERSION,
            dimension,
            count: self.records.len(),
            records: self.records.clone(),
        };
        serde_json::to_vec_pretty(&file)
            .map_err(|e| RagError::Persist(format!("failed to serialize metadata: {}", e)))
    }

    /// Parse a JSON metadata artifact, returning the declared dimension
    ///
    /// # Errors
    /// Returns [`RagError::Integrity`] for malformed JSON, an unknown schema
    /// version or a `count` that disagrees with the records.
    #[inline]
    pub fn from_json(bytes: &[u8]) -> Result<(usize, Self)> {
        let file: MetadataFile = serde_json::from_slice(bytes)
            .map_err(|e| RagError::Integrity(format!("metadata artifact is malformed: {}", e)))?;

        if file.schema_version != METADATA_SCHEMA_VERSION {
            return Err(RagError::Integrity(format!(
                "unsupported metadata schema version {}",
                file.schema_version
            )));
        }
        if file.count != file.records.len() {
            return Err(RagError::Integrity(format!(
                "metadata declares {} records but holds {}",
                file.count,
                file.records.len()
            )));
        }

        Ok((file.dimension, Self::from_records(file.records)))
    }
}
