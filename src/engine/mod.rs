// Vector store engine
// Ingest, search and rebuild-on-delete over a persisted index and metadata pair

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::documents::{DocumentStore, extract_text, validate_id};
use crate::embeddings::{ChunkingConfig, Embedder, chunk_text};
use crate::store::{
    ChunkRecord, ConsistencyReport, LockOptions, MetadataStore, Snapshot, SnapshotStorage,
    VectorIndex, WriterLock, validate_consistency,
};
use crate::{RagError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub document_id: String,
    pub chunks_indexed: usize,
    pub dimension: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    /// Id of the document the chunk came from
    pub filename: String,
    pub text: String,
    /// Cosine similarity with the query
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteReport {
    pub document_id: String,
    pub removed_chunks: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplaceReport {
    pub document_id: String,
    pub removed_chunks: usize,
    pub chunks_indexed: usize,
}

/// Chunks and vectors ready to be committed
struct PreparedChunks {
    records: Vec<ChunkRecord>,
    vectors: Vec<Vec<f32>>,
}

/// One row of [`VectorStoreEngine::list_documents`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentSummary {
    pub id: String,
    pub chunks: usize,
    /// Size of the stored artifact, `None` if it is missing
    pub size: Option<u64>,
    pub modified: Option<DateTime<Utc>>,
}

/// Persistent exact-search vector store over ingested documents
///
/// Readers work on an immutable [`Snapshot`] behind an `Arc`; writers build
/// a new snapshot, persist it as a new generation and only then publish it,
/// so a search sees either the state before or after a mutation.
pub struct VectorStoreEngine<E> {
    embedder: E,
    chunking: ChunkingConfig,
    storage: SnapshotStorage,
    documents: DocumentStore,
    lock_options: LockOptions,
    writer: Mutex<()>,
    current: RwLock<Arc<Snapshot>>,
}

impl<E: Embedder> VectorStoreEngine<E> {
    /// Open (or create) the store under `base_dir`
    ///
    /// Vectors live in `base_dir/vector_store`, raw documents in
    /// `base_dir/documents`.
    ///
    /// # Errors
    /// Returns [`RagError::InvalidConfiguration`] for bad chunking settings,
    /// [`RagError::Integrity`] for a corrupt store and
    /// [`RagError::DimensionMismatch`] if the store was built with an
    /// embedder of another dimension.
    #[inline]
    pub fn open(embedder: E, chunking: ChunkingConfig, base_dir: &Path) -> Result<Self> {
        chunking.validate()?;

        let storage = SnapshotStorage::open(base_dir.join("vector_store"))?;
        let documents = DocumentStore::open(base_dir.join("documents"))?;
        let snapshot = storage.load(embedder.dimension())?;

        if snapshot.dimension() != embedder.dimension() {
            return Err(RagError::DimensionMismatch {
                expected: snapshot.dimension(),
                actual: embedder.dimension(),
            });
        }

        info!(
            "Opened vector store at {} (generation {}, {} vectors, dimension {})",
            base_dir.display(),
            snapshot.generation,
            snapshot.count(),
            snapshot.dimension()
        );

        Ok(Self {
            embedder,
            chunking,
            storage,
            documents,
            lock_options: LockOptions::default(),
            writer: Mutex::new(()),
            current: RwLock::new(Arc::new(snapshot)),
        })
    }

    #[inline]
    pub fn with_lock_options(mut self, options: LockOptions) -> Self {
        self.lock_options = options;
        self
    }

    #[inline]
    pub fn embedder(&self) -> &E {
        &self.embedder
    }

    #[inline]
    pub fn chunking(&self) -> ChunkingConfig {
        self.chunking
    }

    #[inline]
    pub fn documents(&self) -> &DocumentStore {
        &self.documents
    }

    /// The last published snapshot
    #[inline]
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.current.read())
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.snapshot().count()
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.snapshot().dimension()
    }

    #[inline]
    pub fn generation(&self) -> u64 {
        self.snapshot().generation
    }

    /// Pick up a generation published by another process, if any
    #[inline]
    pub fn refresh(&self) -> Result<Arc<Snapshot>> {
        let snapshot = self.snapshot();
        let on_disk = self.storage.current_generation()?.unwrap_or(0);
        if on_disk == snapshot.generation {
            return Ok(snapshot);
        }

        debug!(
            "Store moved from generation {} to {}, reloading",
            snapshot.generation, on_disk
        );
        let loaded = self.storage.load(snapshot.dimension())?;
        if loaded.dimension() != snapshot.dimension() {
            return Err(RagError::DimensionMismatch {
                expected: snapshot.dimension(),
                actual: loaded.dimension(),
            });
        }
        Ok(self.publish(Arc::new(loaded)))
    }

    /// Chunk, embed and index `text` under `document_id`
    ///
    /// # Errors
    /// [`RagError::EmptyDocument`] if there is nothing to chunk,
    /// [`RagError::Embedding`] or [`RagError::DimensionMismatch`] from the
    /// embedder, [`RagError::Persist`] if the new generation cannot be written.
    /// Nothing is written unless every step succeeds.
    #[inline]
    pub fn ingest(&self, document_id: &str, text: &str) -> Result<IngestReport> {
        let prepared = self.prepare(document_id, text)?;

        let _guard = self.writer.lock();
        let _file_lock = WriterLock::acquire(&self.storage.lock_path(), self.lock_options)?;
        self.append_locked(document_id, prepared)
    }

    /// Top-`k` chunks most similar to `query`, best first
    ///
    /// An empty store yields no hits without calling the embedder.
    #[inline]
    pub fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        let snapshot = self.refresh()?;
        if snapshot.index.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let query_vector = self.embedder.embed_query(query)?;
        if query_vector.len() != snapshot.dimension() {
            return Err(RagError::DimensionMismatch {
                expected: snapshot.dimension(),
                actual: query_vector.len(),
            });
        }

        let neighbors = snapshot.index.search(&query_vector, k)?;
        let hits = neighbors
            .into_iter()
            .map(|neighbor| {
                let record = snapshot.metadata.get(neighbor.position)?;
                Ok(SearchHit {
                    filename: record.filename.clone(),
                    text: record.text.clone(),
                    score: neighbor.score,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        debug!("Search returned {} hits", hits.len());
        Ok(hits)
    }

    /// Remove every chunk of `document_id` by rebuilding the index from the
    /// surviving vectors, then remove the stored document
    ///
    /// # Errors
    /// [`RagError::NotFound`] if no document artifact exists for the id,
    /// [`RagError::Persist`] if the rebuilt pair cannot be written. On error
    /// the previous pair stays live.
    #[inline]
    pub fn delete(&self, document_id: &str) -> Result<DeleteReport> {
        let _guard = self.writer.lock();
        let _file_lock = WriterLock::acquire(&self.storage.lock_path(), self.lock_options)?;

        if validate_id(document_id).is_err() || !self.documents.exists(document_id)? {
            return Err(RagError::NotFound(document_id.to_string()));
        }

        let base = self.refresh()?;
        let (kept_records, kept_positions) =
            base.metadata.filter_by(|record| record.filename != document_id);
        let removed_chunks = base.count() - kept_positions.len();

        let index = rebuild_index(&base.index, &kept_positions)?;
        let metadata = MetadataStore::from_records(kept_records);

        let generation = self.storage.persist(&index, &metadata)?;
        self.publish(Arc::new(Snapshot {
            generation,
            index,
            metadata,
        }));

        self.documents.remove(document_id).map_err(|e| {
            RagError::Persist(format!(
                "index updated but document {} could not be removed: {}",
                document_id, e
            ))
        })?;

        info!(
            "Deleted {} ({} chunks removed, generation {})",
            document_id, removed_chunks, generation
        );

        Ok(DeleteReport {
            document_id: document_id.to_string(),
            removed_chunks,
        })
    }

    /// Extract a text file, store it as `name` (or its file name) and index it
    ///
    /// The duplicate check, the artifact write and the index update happen
    /// under the writer lock.
    ///
    /// # Errors
    /// [`RagError::DuplicateDocument`] if the id is already stored, plus
    /// anything [`extract_text`] or [`Self::ingest`] returns. A failed ingest
    /// removes the stored artifact again.
    #[inline]
    pub fn ingest_file(&self, path: &Path, name: Option<&str>) -> Result<IngestReport> {
        let document_id = match name {
            Some(name) => name.to_string(),
            None => path
                .file_name()
                .and_then(|n| n.to_str())
                .map(str::to_string)
                .ok_or_else(|| {
                    RagError::InvalidConfiguration(format!(
                        "cannot derive a document id from {}",
                        path.display()
                    ))
                })?,
        };
        validate_id(&document_id)?;

        let text = extract_text(path)?;
        if self.documents.exists(&document_id)? {
            return Err(RagError::DuplicateDocument(document_id));
        }
        let bytes = std::fs::read(path)?;
        let prepared = self.prepare(&document_id, &text)?;

        let _guard = self.writer.lock();
        let _file_lock = WriterLock::acquire(&self.storage.lock_path(), self.lock_options)?;

        if self.documents.exists(&document_id)? {
            return Err(RagError::DuplicateDocument(document_id));
        }
        self.documents.save(&document_id, &bytes)?;

        self.append_locked(&document_id, prepared).inspect_err(|e| {
            warn!("Ingest of {} failed, removing artifact: {}", document_id, e);
            if let Err(remove_error) = self.documents.remove(&document_id) {
                warn!(
                    "Failed to remove artifact {}: {}",
                    document_id, remove_error
                );
            }
        })
    }

    /// Replace a stored document with the contents of `path`
    ///
    /// The new file is extracted and embedded before anything is touched, and
    /// the old chunks are swapped for the new ones in a single generation.
    ///
    /// # Errors
    /// [`RagError::NotFound`] if no artifact exists for `document_id`, plus
    /// anything [`extract_text`] or [`Self::ingest`] returns. On error the
    /// previous document and its chunks stay live.
    #[inline]
    pub fn replace_file(&self, document_id: &str, path: &Path) -> Result<ReplaceReport> {
        if validate_id(document_id).is_err() || !self.documents.exists(document_id)? {
            return Err(RagError::NotFound(document_id.to_string()));
        }

        let text = extract_text(path)?;
        let bytes = std::fs::read(path)?;
        let prepared = self.prepare(document_id, &text)?;

        let _guard = self.writer.lock();
        let _file_lock = WriterLock::acquire(&self.storage.lock_path(), self.lock_options)?;

        if !self.documents.exists(document_id)? {
            return Err(RagError::NotFound(document_id.to_string()));
        }

        let base = self.refresh()?;
        let (mut records, kept_positions) =
            base.metadata.filter_by(|record| record.filename != document_id);
        let removed_chunks = base.count() - kept_positions.len();

        let mut index = rebuild_index(&base.index, &kept_positions)?;
        index.add(&prepared.vectors)?;
        let chunks_indexed = prepared.records.len();
        records.extend(prepared.records);
        let metadata = MetadataStore::from_records(records);

        let generation = self.storage.persist(&index, &metadata)?;
        self.publish(Arc::new(Snapshot {
            generation,
            index,
            metadata,
        }));

        self.documents.save(document_id, &bytes).map_err(|e| {
            RagError::Persist(format!(
                "index updated but document {} could not be rewritten: {}",
                document_id, e
            ))
        })?;

        info!(
            "Replaced {} ({} chunks removed, {} indexed, generation {})",
            document_id, removed_chunks, chunks_indexed, generation
        );

        Ok(ReplaceReport {
            document_id: document_id.to_string(),
            removed_chunks,
            chunks_indexed,
        })
    }

    /// Stored documents joined with their chunk counts
    ///
    /// Documents that have chunks but no artifact are listed last.
    #[inline]
    pub fn list_documents(&self) -> Result<Vec<DocumentSummary>> {
        let snapshot = self.refresh()?;
        let counts = snapshot.metadata.document_chunk_counts();
        let by_id: HashMap<&str, usize> = counts
            .iter()
            .map(|(id, count)| (id.as_str(), *count))
            .collect();

        let artifacts = self.documents.list()?;
        let mut summaries: Vec<DocumentSummary> = artifacts
            .iter()
            .map(|doc| DocumentSummary {
                id: doc.id.clone(),
                chunks: by_id.get(doc.id.as_str()).copied().unwrap_or(0),
                size: Some(doc.size),
                modified: doc.modified,
            })
            .collect();

        for (id, chunks) in counts {
            if !artifacts.iter().any(|doc| doc.id == id) {
                summaries.push(DocumentSummary {
                    id,
                    chunks,
                    size: None,
                    modified: None,
                });
            }
        }

        Ok(summaries)
    }

    #[inline]
    pub fn consistency_report(&self) -> Result<ConsistencyReport> {
        let snapshot = self.refresh()?;
        let artifact_ids = self.documents.ids()?;
        Ok(validate_consistency(&snapshot, &artifact_ids))
    }

    /// Chunk and embed `text`, checking every vector against the store dimension
    fn prepare(&self, document_id: &str, text: &str) -> Result<PreparedChunks> {
        let chunks = chunk_text(text, &self.chunking)?;
        if chunks.is_empty() {
            return Err(RagError::EmptyDocument(document_id.to_string()));
        }

        debug!("Embedding {} chunks for {}", chunks.len(), document_id);
        let vectors = self.embedder.embed(&chunks)?;

        let dimension = self.dimension();
        if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
            return Err(RagError::DimensionMismatch {
                expected: dimension,
                actual: bad.len(),
            });
        }

        let records = chunks
            .into_iter()
            .map(|text| ChunkRecord::new(document_id, text))
            .collect();

        Ok(PreparedChunks { records, vectors })
    }

    /// Append prepared chunks to the latest generation; the caller holds both
    /// writer locks
    fn append_locked(&self, document_id: &str, prepared: PreparedChunks) -> Result<IngestReport> {
        let base = self.refresh()?;

        if base.metadata.contains_document(document_id) {
            warn!(
                "Document {} already has chunks in the index; appending more",
                document_id
            );
        }

        let chunks_indexed = prepared.vectors.len();
        let mut index = base.index.clone();
        let mut metadata = base.metadata.clone();
        index.add(&prepared.vectors)?;
        metadata.append(prepared.records);

        let generation = self.storage.persist(&index, &metadata)?;
        let dimension = index.dimension();
        self.publish(Arc::new(Snapshot {
            generation,
            index,
            metadata,
        }));

        info!(
            "Indexed {} chunks for {} (generation {})",
            chunks_indexed, document_id, generation
        );

        Ok(IngestReport {
            document_id: document_id.to_string(),
            chunks_indexed,
            dimension,
        })
    }

    /// Replace the published snapshot unless a newer one is already live
    fn publish(&self, snapshot: Arc<Snapshot>) -> Arc<Snapshot> {
        let mut current = self.current.write();
        if snapshot.generation >= current.generation {
            *current = snapshot;
        }
        Arc::clone(&current)
    }
}

/// Build a fresh index holding only the vectors at `kept_positions`, in order
///
/// # Errors
/// Returns [`RagError::OutOfRange`] if a position does not exist.
#[inline]
pub fn rebuild_index<I: VectorIndex>(index: &I, kept_positions: &[usize]) -> Result<I> {
    let survivors = kept_positions
        .iter()
        .map(|&position| index.reconstruct(position))
        .collect::<Result<Vec<_>>>()?;

    let mut rebuilt = index.empty_like();
    rebuilt.add(&survivors)?;
    Ok(rebuilt)
}
