
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::index::{FlatIndex, VectorIndex};
use super::lock::LOCK_FILE_NAME;
use super::metadata::MetadataStore;
use crate::embeddings::l2_norm;
use crate::{RagError, Result};

pub const CURRENT_FILE: &str = "CURRENT";
pub const INDEX_FILE: &str = "index.bin";
pub const METADATA_FILE: &str = "metadata.json";

const GENERATION_PREFIX: &str = "gen-";
const TEMP_PREFIX: &str = ".tmp-";
const NORM_TOLERANCE: f32 = 1e-3;
const LOAD_ATTEMPTS: usize = 3;

/// An index and its metadata as one consistent unit
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Generation this pair was loaded from or persisted as; 0 if never persisted
    pub generation: u64,
    pub index: FlatIndex,
    pub metadata: MetadataStore,
}

impl Snapshot {
    #[inline]
    pub fn empty(dimension: usize) -> Result<Self> {
        Ok(Self {
            generation: 0,
            index: FlatIndex::new(dimension)?,
            metadata: MetadataStore::new(),
        })
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.index.count()
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.index.dimension()
    }

    /// # Errors
    /// Returns [`RagError::Integrity`] if the index and metadata lengths differ.
    #[inline]
    pub fn check_aligned(&self) -> Result<()> {
        if self.index.count() != self.metadata.len() {
            return Err(RagError::Integrity(format!(
                "index holds {} vectors but metadata holds {} records",
                self.index.count(),
                self.metadata.len()
            )));
        }
        Ok(())
    }
}

/// Generation-based storage of [`Snapshot`]s under one directory
///
/// Each persist writes a fresh `gen-N` directory and then atomically
/// replaces the `CURRENT` pointer, so a reader sees the old pair or the new
/// pair and never a mix. The previous generation is kept for processes that
/// read `CURRENT` just before the swap.
#[derive(Debug, Clone)]
pub struct SnapshotStorage {
    root: PathBuf,
}

impl SnapshotStorage {
    #[inline]
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| {
            RagError::Persist(format!(
                "failed to create store directory {}: {}",
                root.display(),
                e
            ))
        })?;
        Ok(Self { root })
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn lock_path(&self) -> PathBuf {
        self.root.join(LOCK_FILE_NAME)
    }

    #[inline]
    pub fn generation_dir(&self, generation: u64) -> PathBuf {
        self.root.join(generation_name(generation))
    }

    /// Generation named by `CURRENT`, or `None` if nothing was ever persisted
    #[inline]
    pub fn current_generation(&self) -> Result<Option<u64>> {
        let pointer = self.root.join(CURRENT_FILE);
        let contents = match fs::read_to_string(&pointer) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        parse_generation(contents.trim()).map(Some).ok_or_else(|| {
            RagError::Integrity(format!(
                "{} does not name a generation: {:?}",
                pointer.display(),
                contents.trim()
            ))
        })
    }

    /// Load the live snapshot, or an empty one of `dimension` if none exists
    ///
    /// # Errors
    /// Returns [`RagError::Integrity`] if either artifact is missing, corrupt,
    /// disagrees with the other, or holds a vector that is not unit length.
    #[inline]
    pub fn load(&self, dimension: usize) -> Result<Snapshot> {
        let mut last_error = None;

        for _ in 0..LOAD_ATTEMPTS {
            let Some(generation) = self.current_generation()? else {
                if self.root.join(INDEX_FILE).exists() || self.root.join(METADATA_FILE).exists() {
                    return Err(RagError::Integrity(format!(
                        "found loose artifacts in {} without a {} pointer",
                        self.root.display(),
                        CURRENT_FILE
                    )));
                }
                debug!("No persisted generation in {}", self.root.display());
                return Snapshot::empty(dimension);
            };

            match self.load_generation(generation) {
                Ok(snapshot) => return Ok(snapshot),
                Err(e) => {
                    // A writer may have swapped and pruned between our read of
                    // CURRENT and the artifacts; only retry if it moved.
                    if self.current_generation()? == Some(generation) {
                        return Err(e);
                    }
                    debug!("Generation {} replaced during load, retrying", generation);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            RagError::Integrity("store kept changing during load".to_string())
        }))
    }

    fn load_generation(&self, generation: u64) -> Result<Snapshot> {
        let dir = self.generation_dir(generation);
        let index_bytes = read_artifact(&dir.join(INDEX_FILE))?;
        let metadata_bytes = read_artifact(&dir.join(METADATA_FILE))?;

        let index = FlatIndex::from_bytes(&index_bytes)?;
        let (declared_dimension, metadata) = MetadataStore::from_json(&metadata_bytes)?;

        if declared_dimension != index.dimension() {
            return Err(RagError::Integrity(format!(
                "metadata dimension {} does not match index dimension {}",
                declared_dimension,
                index.dimension()
            )));
        }

        for (position, vector) in index.vectors().enumerate() {
            let norm = l2_norm(vector);
            if (norm - 1.0).abs() > NORM_TOLERANCE {
                return Err(RagError::Integrity(format!(
                    "stored vector {} has norm {} instead of 1",
                    position, norm
                )));
            }
        }

        let snapshot = Snapshot {
            generation,
            index,
            metadata,
        };
        snapshot.check_aligned()?;

        debug!(
            "Loaded generation {} with {} vectors",
            generation,
            snapshot.count()
        );
        Ok(snapshot)
    }

    /// Write `index` and `metadata` as a new generation and make it live
    ///
    /// Callers must hold the writer lock. Returns the new generation number.
    ///
    /// # Errors
    /// Returns [`RagError::Persist`] on any write failure; the previously live
    /// generation stays in place.
    #[inline]
    pub fn persist(&self, index: &FlatIndex, metadata: &MetadataStore) -> Result<u64> {
        if index.count() != metadata.len() {
            return Err(RagError::Integrity(format!(
                "refusing to persist {} vectors with {} records",
                index.count(),
                metadata.len()
            )));
        }

        let previous = self.current_generation()?;
        let generation = self.next_generation(previous)?;
        let target = self.generation_dir(generation);
        let staging = self
            .root
            .join(format!("{}{}", TEMP_PREFIX, uuid::Uuid::new_v4()));

        let written = self
            .write_generation(&staging, index, metadata)
            .and_then(|()| fs::rename(&staging, &target));
        if let Err(e) = written {
            let _ = fs::remove_dir_all(&staging);
            return Err(RagError::Persist(format!(
                "failed to write generation {}: {}",
                generation, e
            )));
        }

        if let Err(e) = self.swap_pointer(generation) {
            let _ = fs::remove_dir_all(&target);
            return Err(RagError::Persist(format!(
                "failed to publish generation {}: {}",
                generation, e
            )));
        }

        info!(
            "Persisted generation {} ({} vectors)",
            generation,
            index.count()
        );

        self.prune(generation, previous);
        Ok(generation)
    }

    fn next_generation(&self, current: Option<u64>) -> Result<u64> {
        let newest_on_disk = self
            .generation_dirs()?
            .into_iter()
            .map(|(generation, _)| generation)
            .max();
        Ok(current.max(newest_on_disk).unwrap_or(0) + 1)
    }

    fn write_generation(
        &self,
        dir: &Path,
        index: &FlatIndex,
        metadata: &MetadataStore,
    ) -> std::io::Result<()> {
        fs::create_dir(dir)?;

        let metadata_bytes = metadata
            .to_json(index.dimension())
            .map_err(std::io::Error::other)?;

        let index_bytes = index.to_bytes().map_err(std::io::Error::other)?;

        write_synced(&dir.join(INDEX_FILE), &index_bytes)?;
        write_synced(&dir.join(METADATA_FILE), &metadata_bytes)?;
        Ok(())
    }

    fn swap_pointer(&self, generation: u64) -> std::io::Result<()> {
        let tmp = self
            .root
            .join(format!("{}{}", TEMP_PREFIX, uuid::Uuid::new_v4()));
        write_synced(&tmp, generation_name(generation).as_bytes())?;
        fs::rename(&tmp, self.root.join(CURRENT_FILE)).inspect_err(|_| {
            let _ = fs::remove_file(&tmp);
        })
    }

    /// Remove every generation other than `live` and `previous`
    fn prune(&self, live: u64, previous: Option<u64>) {
        let dirs = match self.generation_dirs() {
            Ok(dirs) => dirs,
            Err(e) => {
                warn!("Skipping prune of {}: {}", self.root.display(), e);
                return;
            }
        };

        for (generation, path) in dirs {
            if generation == live || Some(generation) == previous {
                continue;
            }
            match fs::remove_dir_all(&path) {
                Ok(()) => debug!("Pruned generation {}", generation),
                Err(e) => warn!("Failed to prune {}: {}", path.display(), e),
            }
        }
    }

    /// Every `gen-N` directory under the root
    #[inline]
    pub fn generation_dirs(&self) -> Result<Vec<(u64, PathBuf)>> {
        let mut dirs = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(generation) = entry.file_name().to_str().and_then(parse_generation) {
                dirs.push((generation, entry.path()));
            }
        }
        dirs.sort_unstable_by_key(|(generation, _)| *generation);
        Ok(dirs)
    }
}

fn generation_name(generation: u64) -> String {
    format!("{}{:020}", GENERATION_PREFIX, generation)
}

fn parse_generation(name: &str) -> Option<u64> {
    name.strip_prefix(GENERATION_PREFIX)?.parse().ok()
}

fn read_artifact(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            RagError::Integrity(format!("missing artifact {}", path.display()))
        } else {
            RagError::Io(e)
        }
    })
}

fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}
