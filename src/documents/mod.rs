// Document artifact storage and plain-text extraction


use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::{RagError, Result};

const TEXT_EXTENSIONS: &[&str] = &["txt", "text", "md", "markdown"];
const TEMP_PREFIX: &str = ".tmp-";

/// A raw document kept on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredDocument {
    pub id: String,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

/// Raw uploaded documents, one file per document id
#[derive(Debug, Clone)]
pub struct DocumentStore {
    root: PathBuf,
}

impl DocumentStore {
    #[inline]
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// # Errors
    /// Returns [`RagError::InvalidConfiguration`] unless `id` is a plain file name.
    #[inline]
    pub fn path_for(&self, id: &str) -> Result<PathBuf> {
        validate_id(id)?;
        Ok(self.root.join(id))
    }

    #[inline]
    pub fn exists(&self, id: &str) -> Result<bool> {
        Ok(self.path_for(id)?.is_file())
    }

    /// Write `bytes` as the artifact for `id`, replacing any previous one
    #[inline]
    pub fn save(&self, id: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.path_for(id)?;
        let tmp = self
            .root
            .join(format!("{}{}", TEMP_PREFIX, uuid::Uuid::new_v4()));

        fs::write(&tmp, bytes)?;
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }

        debug!("Stored document {} ({} bytes)", id, bytes.len());
        Ok(path)
    }

    /// Remove the artifact for `id`; returns whether one existed
    #[inline]
    pub fn remove(&self, id: &str) -> Result<bool> {
        match fs::remove_file(self.path_for(id)?) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// All stored documents, sorted by id
    #[inline]
    pub fn list(&self) -> Result<Vec<StoredDocument>> {
        let mut documents = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let Some(id) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if id.starts_with('.') {
                continue;
            }

            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }

            documents.push(StoredDocument {
                id,
                size: metadata.len(),
                modified: metadata.modified().ok().map(DateTime::<Utc>::from),
            });
        }
        documents.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(documents)
    }

    #[inline]
    pub fn ids(&self) -> Result<Vec<String>> {
        Ok(self.list()?.into_iter().map(|d| d.id).collect())
    }
}

/// Reject ids that are not a single plain path component
#[inline]
pub fn validate_id(id: &str) -> Result<()> {
    let valid = !id.trim().is_empty()
        && id != "."
        && id != ".."
        && !id.starts_with(TEMP_PREFIX)
        && !id.contains(['/', '\\', '\0']);

    if valid {
        Ok(())
    } else {
        Err(RagError::InvalidConfiguration(format!(
            "document id must be a plain file name: {:?}",
            id
        )))
    }
}

/// Read a UTF-8 text document
///
/// # Errors
/// Returns [`RagError::UnsupportedFormat`] for extensions other than
/// `.txt`, `.text`, `.md` and `.markdown`, or for content that is not UTF-8.
#[inline]
pub fn extract_text(path: &Path) -> Result<String> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    if !TEXT_EXTENSIONS.contains(&extension.as_str()) {
        return Err(RagError::UnsupportedFormat(format!(
            "{} (supported: {})",
            path.display(),
            TEXT_EXTENSIONS.join(", ")
        )));
    }

    let bytes = fs::read(path)?;
    let text = String::from_utf8(bytes).map_err(|_| {
        RagError::UnsupportedFormat(format!("{} is not valid UTF-8", path.display()))
    })?;

    Ok(text.trim().to_string())
}
