//! Content-addressed blob store: `<root>/<sha[0..2]>/<sha>`.

use std::path::{Path, PathBuf};

use tracing::{debug, instrument};

use super::StorageError;

/// Write-once store keyed by SHA-256 hex digest.
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// Opens the store, creating `root` if needed.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if `root` cannot be created.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| StorageError::io(&root, e))?;
        Ok(Self { root })
    }

    /// Store root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path a digest is stored at.
    #[must_use]
    pub fn path_for(&self, sha256: &str) -> PathBuf {
        let prefix = sha256.get(..2).unwrap_or(sha256);
        self.root.join(prefix).join(sha256)
    }

    /// Stores `content` under `sha256` unless already present; returns its path.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] on filesystem failure.
    #[instrument(skip(self, content), fields(sha256 = %sha256, bytes = content.len()))]
    pub async fn put(&self, sha256: &str, content: &[u8]) -> Result<PathBuf, StorageError> {
        let target = self.path_for(sha256);
        if tokio::fs::try_exists(&target)
            .await
            .map_err(|e| StorageError::io(&target, e))?
        {
            debug!(path = %target.display(), "blob already stored");
            return Ok(target);
        }
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::io(parent, e))?;
        }
        tokio::fs::write(&target, content)
            .await
            .map_err(|e| StorageError::io(&target, e))?;
        debug!(path = %target.display(), "blob stored");
        Ok(target)
    }
}
