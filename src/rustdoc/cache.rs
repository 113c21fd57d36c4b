//! On-disk cache of fetched rustdoc JSON, used for on-the-fly fragment
//! generation without re-downloading.
//!
//! Files live at `<dir>/<name>_<version>.json.zst`. Content is hash-free:
//! the same `(name, version)` always maps to the same payload, so concurrent
//! writers of the same key are safe.

use std::path::{Path, PathBuf};

use crate::error::Result;

use super::CrateDoc;

fn cache_path(dir: &Path, name: &str, version: &str) -> PathBuf {
    dir.join(format!("{name}_{version}.json.zst"))
}

/// Compresses and saves raw rustdoc JSON bytes.
pub fn save(dir: &Path, data: &[u8], name: &str, version: &str) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    let compressed = zstd::encode_all(data, 0)?;
    std::fs::write(cache_path(dir, name, version), compressed)?;
    Ok(())
}

/// Loads and decodes a cached rustdoc payload.
pub fn load(dir: &Path, name: &str, version: &str) -> Result<CrateDoc> {
    let compressed = std::fs::read(cache_path(dir, name, version))?;
    let data = zstd::decode_all(compressed.as_slice())?;
    Ok(serde_json::from_slice(&data)?)
}

pub fn exists(dir: &Path, name: &str, version: &str) -> bool {
    cache_path(dir, name, version).exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let data = serde_json::json!({
            "root": 0,
            "crate_version": "2.0.0",
            "index": {},
            "paths": {},
            "external_crates": {},
            "format_version": 37
        });
        let bytes = serde_json::to_vec(&data).unwrap();

        save(dir.path(), &bytes, "serde", "2.0.0").unwrap();
        assert!(exists(dir.path(), "serde", "2.0.0"));
        assert!(!exists(dir.path(), "serde", "1.0.0"));

        let doc = load(dir.path(), "serde", "2.0.0").unwrap();
        assert_eq!(doc.crate_version.as_deref(), Some("2.0.0"));
    }

    #[test]
    fn load_missing_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(dir.path(), "nope", "1.0.0").is_err());
    }
}
