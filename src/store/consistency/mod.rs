// Consistency validation between the index, its metadata and the document artifacts


use std::collections::HashSet;

use tracing::{info, warn};

use super::index::VectorIndex;
use super::snapshot::Snapshot;
use crate::embeddings::l2_norm;

const NORM_TOLERANCE: f32 = 1e-3;

/// Consistency check results for one snapshot
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ConsistencyReport {
    /// Number of vectors in the index
    pub index_count: usize,
    /// Number of metadata records
    pub metadata_count: usize,
    pub dimension: usize,
    /// Positions of stored vectors whose norm is not 1
    pub non_unit_vectors: Vec<usize>,
    /// Documents with chunks in the index but no stored artifact
    pub documents_without_artifact: Vec<String>,
    /// Stored artifacts that contributed no chunks
    pub artifacts_without_chunks: Vec<String>,
    /// Overall consistency status of the index and metadata pair
    pub is_consistent: bool,
}

impl ConsistencyReport {
    #[inline]
    pub fn summary(&self) -> String {
        if self.is_consistent {
            format!(
                "Vector store is consistent: {} vectors, {} records, dimension {}",
                self.index_count, self.metadata_count, self.dimension
            )
        } else {
            format!(
                "Vector store inconsistencies found: {} vectors vs {} records, {} non-unit vectors, {} documents without artifact",
                self.index_count,
                self.metadata_count,
                self.non_unit_vectors.len(),
                self.documents_without_artifact.len()
            )
        }
    }

    /// Get the total number of consistency issues
    #[inline]
    pub fn total_issues(&self) -> usize {
        usize::from(self.index_count != self.metadata_count)
            + self.non_unit_vectors.len()
            + self.documents_without_artifact.len()
            + self.artifacts_without_chunks.len()
    }
}

/// Validate `snapshot` against the ids of the stored document artifacts
#[inline]
pub fn validate_consistency(snapshot: &Snapshot, artifact_ids: &[String]) -> ConsistencyReport {
    let non_unit_vectors: Vec<usize> = snapshot
        .index
        .vectors()
        .enumerate()
        .filter(|(_, vector)| (l2_norm(vector) - 1.0).abs() > NORM_TOLERANCE)
        .map(|(position, _)| position)
        .collect();

    let indexed: Vec<String> = snapshot
        .metadata
        .document_chunk_counts()
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    let indexed_set: HashSet<&str> = indexed.iter().map(String::as_str).collect();
    let artifact_set: HashSet<&str> = artifact_ids.iter().map(String::as_str).collect();

    let documents_without_artifact: Vec<String> = indexed
        .iter()
        .filter(|name| !artifact_set.contains(name.as_str()))
        .cloned()
        .collect();

    let artifacts_without_chunks: Vec<String> = artifact_ids
        .iter()
        .filter(|name| !indexed_set.contains(name.as_str()))
        .cloned()
        .collect();

    let index_count = snapshot.index.count();
    let metadata_count = snapshot.metadata.len();
    let is_consistent = index_count == metadata_count
        && non_unit_vectors.is_empty()
        && documents_without_artifact.is_empty();

    let report = ConsistencyReport {
        index_count,
        metadata_count,
        dimension: snapshot.index.dimension(),
        non_unit_vectors,
        documents_without_artifact,
        artifacts_without_chunks,
        is_consistent,
    };

    if report.is_consistent {
        info!("{}", report.summary());
    } else {
        warn!("{}", report.summary());
    }
    if !report.artifacts_without_chunks.is_empty() {
        warn!(
            "Documents stored but not indexed: {:?}",
            report.artifacts_without_chunks
        );
    }

    report
}
