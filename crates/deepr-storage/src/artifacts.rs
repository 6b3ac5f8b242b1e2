// Content-addressed artifact store
//
// Research results are written once to `<root>/<hash prefix>/<hash>.md`
// and referenced from the database by SHA-256 hash only. Writes are
// idempotent: the same bytes always land at the same path.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::fs;

/// Blob store rooted at a directory
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Hash for a byte string, as stored in `artifacts.hash`
    pub fn content_hash(bytes: &[u8]) -> String {
        hex::encode(Sha256::digest(bytes))
    }

    fn blob_path(&self, hash: &str) -> PathBuf {
        // Two-character fan-out keeps directories small
        let prefix = &hash[..2.min(hash.len())];
        self.root.join(prefix).join(format!("{}.md", hash))
    }

    /// Store bytes, returning their content hash
    ///
    /// Re-storing identical bytes is a no-op.
    pub async fn store(&self, bytes: &[u8]) -> Result<String> {
        let hash = Self::content_hash(bytes);
        let path = self.blob_path(&hash);

        if fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(hash);
        }

        let parent = path.parent().expect("blob path has a parent");
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create {}", parent.display()))?;

        // Write-then-rename so a crash never leaves a partial blob at the
        // addressed path
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, bytes)
            .await
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("failed to move blob into {}", path.display()))?;

        Ok(hash)
    }

    /// Load bytes by content hash
    pub async fn load(&self, hash: &str) -> Result<Vec<u8>> {
        let path = self.blob_path(hash);
        fs::read(&path)
            .await
            .with_context(|| format!("artifact {} missing from blob store", hash))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());

        let bytes = b"# Research findings\n\nTLS 1.3 handshake notes.\n";
        let hash = store.store(bytes).await.unwrap();
        assert_eq!(hash.len(), 64);

        let loaded = store.load(&hash).await.unwrap();
        assert_eq!(loaded, bytes);
    }

    #[tokio::test]
    async fn identical_bytes_share_one_blob() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());

        let first = store.store(b"same content").await.unwrap();
        let second = store.store(b"same content").await.unwrap();
        assert_eq!(first, second);

        let different = store.store(b"other content").await.unwrap();
        assert_ne!(first, different);
    }

    #[tokio::test]
    async fn missing_hash_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let missing = "0".repeat(64);
        assert!(store.load(&missing).await.is_err());
    }
}
