//! Storage/session layer for uploaded documents.
//!
//! Each accepted upload gets a random identifier and is persisted as
//! `<id>-original.pdf`; the compressed artifact lives next to it as
//! `<id>-compressed.pdf`. Artifacts are throwaway: a periodic sweep removes
//! anything older than the retention window (one hour by default).

use rand::RngCore;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::error::StoreError;

/// Maximum accepted upload size.
pub const MAX_UPLOAD_BYTES: u64 = 100 * 1024 * 1024;

/// Default retention for stored artifacts.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(60 * 60);

const ORIGINAL_SUFFIX: &str = "-original.pdf";
const COMPRESSED_SUFFIX: &str = "-compressed.pdf";

/// A stored upload.
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub id: String,
    /// Filename the client uploaded under
    pub original_name: String,
    pub size_bytes: u64,
}

pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(FileStore { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persist an uploaded document and hand back its identifier.
    ///
    /// Rejects non-PDF filenames and payloads over [`MAX_UPLOAD_BYTES`];
    /// nothing is written in either case.
    pub fn save_original(&self, name: &str, bytes: &[u8]) -> Result<StoredFile, StoreError> {
        if name.is_empty() || !name.to_ascii_lowercase().ends_with(".pdf") {
            return Err(StoreError::InvalidUpload);
        }
        if bytes.len() as u64 > MAX_UPLOAD_BYTES {
            return Err(StoreError::TooLarge {
                size_mb: bytes.len() as f64 / (1024.0 * 1024.0),
                limit_mb: MAX_UPLOAD_BYTES / (1024 * 1024),
            });
        }

        let id = new_id();
        fs::write(self.original_path_unchecked(&id), bytes)?;
        log::debug!("stored {} as id {} ({} bytes)", name, id, bytes.len());

        Ok(StoredFile {
            id,
            original_name: name.to_string(),
            size_bytes: bytes.len() as u64,
        })
    }

    /// Path of the stored original for `id`; `NotFound` if it was never
    /// stored or has been swept.
    pub fn original_path(&self, id: &str) -> Result<PathBuf, StoreError> {
        let path = self.original_path_unchecked(id);
        if path.is_file() {
            Ok(path)
        } else {
            Err(StoreError::NotFound(id.to_string()))
        }
    }

    /// Path of the compressed artifact for `id`; `NotFound` until a
    /// compression pass has produced it.
    pub fn compressed_path(&self, id: &str) -> Result<PathBuf, StoreError> {
        let path = self.compressed_path_unchecked(id);
        if path.is_file() {
            Ok(path)
        } else {
            Err(StoreError::NotFound(id.to_string()))
        }
    }

    /// Where a compression pass should write the artifact for `id`.
    pub fn compressed_path_unchecked(&self, id: &str) -> PathBuf {
        self.root.join(format!("{}{}", id, COMPRESSED_SUFFIX))
    }

    fn original_path_unchecked(&self, id: &str) -> PathBuf {
        self.root.join(format!("{}{}", id, ORIGINAL_SUFFIX))
    }

    /// Attachment name for the compressed artifact, derived from a stored
    /// name by substituting the `-original` suffix.
    pub fn download_name(stored_name: &str) -> String {
        stored_name.replace(ORIGINAL_SUFFIX, COMPRESSED_SUFFIX)
    }

    /// Remove artifacts older than `max_age`. Returns how many were
    /// removed; unreadable entries are logged and left alone.
    pub fn sweep(&self, max_age: Duration) -> Result<usize, StoreError> {
        let cutoff = SystemTime::now() - max_age;
        let mut removed = 0;

        for entry in fs::read_dir(&self.root)? {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    log::warn!("sweep: unreadable directory entry: {}", e);
                    continue;
                }
            };
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let modified = match entry.metadata().and_then(|m| m.modified()) {
                Ok(t) => t,
                Err(e) => {
                    log::warn!("sweep: no mtime for {}: {}", path.display(), e);
                    continue;
                }
            };
            if modified <= cutoff {
                match fs::remove_file(&path) {
                    Ok(()) => {
                        log::debug!("sweep: removed stale artifact {}", path.display());
                        removed += 1;
                    }
                    Err(e) => log::warn!("sweep: failed to remove {}: {}", path.display(), e),
                }
            }
        }

        Ok(removed)
    }
}

fn new_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
