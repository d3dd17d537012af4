
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind as IoErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use tracing::{debug, warn};

use crate::{RagError, Result};

pub const LOCK_FILE_NAME: &str = ".writer.lock";

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(300);
const POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    /// How long to wait for another writer before giving up
    pub timeout: Duration,
    /// Age after which an existing lock file is assumed abandoned
    pub stale_after: Duration,
}

impl Default for LockOptions {
    #[inline]
    fn default() -> Self {
        Self {
            timeout: DEFAULT_LOCK_TIMEOUT,
            stale_after: DEFAULT_STALE_AFTER,
        }
    }
}

/// Cross-process writer lock backed by an exclusively created file
///
/// The file is removed when the guard is dropped.
#[derive(Debug)]
pub struct WriterLock {
    path: PathBuf,
}

impl WriterLock {
    /// # Errors
    /// Returns [`RagError::Persist`] if the lock cannot be taken within
    /// `options.timeout`.
    #[inline]
    pub fn acquire(path: &Path, options: LockOptions) -> Result<Self> {
        let deadline = Instant::now() + options.timeout;

        loop {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    let stamp = format!(
                        "pid={} acquired={}\n",
                        std::process::id(),
                        chrono::Utc::now().to_rfc3339()
                    );
                    if let Err(e) = file.write_all(stamp.as_bytes()) {
                        let _ = fs::remove_file(path);
                        return Err(RagError::Persist(format!(
                            "failed to write lock file {}: {}",
                            path.display(),
                            e
                        )));
                    }
                    debug!("Acquired writer lock {}", path.display());
                    return Ok(Self {
                        path: path.to_path_buf(),
                    });
                }
                Err(e) if e.kind() == IoErrorKind::AlreadyExists => {
                    if Self::is_stale(path, options.stale_after) {
                        warn!("Reclaiming stale writer lock {}", path.display());
                        let _ = fs::remove_file(path);
                        continue;
                    }
                }
                Err(e) => {
                    return Err(RagError::Persist(format!(
                        "failed to create lock file {}: {}",
                        path.display(),
                        e
                    )));
                }
            }

            if Instant::now() >= deadline {
                return Err(RagError::Persist(format!(
                    "timed out after {:?} waiting for writer lock {}",
                    options.timeout,
                    path.display()
                )));
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn is_stale(path: &Path, stale_after: Duration) -> bool {
        fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .is_some_and(|age| age > stale_after)
    }
}

impl Drop for WriterLock {
    #[inline]
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Failed to remove writer lock {}: {}", self.path.display(), e);
        } else {
            debug!("Released writer lock {}", self.path.display());
        }
    }
}
