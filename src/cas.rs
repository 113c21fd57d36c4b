//! Content-addressed storage for markdown bodies.
//!
//! Blobs are keyed by the lowercase hex SHA-256 of their content and stored
//! zstd-compressed under `<root>/<hash[0:2]>/<hash[2:]>.md.zst`. Writes are
//! idempotent: identical content maps to an identical path, so concurrent
//! writers of the same blob are safe.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::Result;

pub struct Cas {
    root: PathBuf,
}

impl Cas {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Sharded file path for a hash.
    fn blob_path(&self, hash: &str) -> PathBuf {
        self.root.join(&hash[..2]).join(format!("{}.md.zst", &hash[2..]))
    }

    /// Stores content, returning its SHA-256 hash. If the blob already
    /// exists the file is left untouched.
    pub fn write(&self, content: &str) -> Result<String> {
        let hash = content_hash(content);

        let path = self.blob_path(&hash);
        if path.exists() {
            return Ok(hash);
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let compressed = zstd::encode_all(content.as_bytes(), 0)?;
        std::fs::write(&path, compressed)?;

        Ok(hash)
    }

    /// Retrieves content by hash.
    pub fn read(&self, hash: &str) -> Result<String> {
        let compressed = std::fs::read(self.blob_path(hash))?;
        let bytes = zstd::decode_all(compressed.as_slice())?;
        String::from_utf8(bytes)
            .map_err(|e| crate::error::Error::DataCorruption(format!("CAS blob {hash}: {e}")))
    }

    pub fn exists(&self, hash: &str) -> bool {
        self.blob_path(hash).exists()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Lowercase hex SHA-256 of the content.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
