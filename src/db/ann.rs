//! On-disk approximate nearest neighbor index.
//!
//! A cosine HNSW graph (dim 1024, M=16, ef=100) over embedding row ids.
//! Embedding rows in SQLite are the source of truth; the graph is a derived,
//! rebuildable structure. Persistence is a single snapshot file of
//! `(id, vector)` records — loading re-inserts every record, so a partially
//! corrupt snapshot degrades to a partial index instead of a failed start.
//!
//! `add`/`search`/`save` are mutually exclusive behind one lock.

use std::collections::HashMap;
use std::path::Path;

use hnsw_rs::prelude::*;
use parking_lot::Mutex;

use crate::error::{Error, Result};

pub const EMBEDDING_DIM: usize = 1024;

const HNSW_M: usize = 16;
const HNSW_EF: usize = 100;
const HNSW_MAX_LAYER: usize = 16;
const HNSW_CAPACITY: usize = 1_000_000;

const SNAPSHOT_MAGIC: &[u8; 4] = b"DXAN";
const SNAPSHOT_VERSION: u32 = 1;

pub struct AnnIndex {
    inner: Mutex<AnnInner>,
}

struct AnnInner {
    hnsw: Hnsw<'static, f32, DistCosine>,
    /// Inserted vectors by id, kept for snapshotting and duplicate checks.
    vectors: HashMap<u64, Vec<f32>>,
}

fn new_hnsw() -> Hnsw<'static, f32, DistCosine> {
    Hnsw::new(HNSW_M, HNSW_CAPACITY, HNSW_MAX_LAYER, HNSW_EF, DistCosine {})
}

fn validate_vector(id: u64, vector: &[f32]) -> Result<()> {
    if vector.len() != EMBEDDING_DIM {
        return Err(Error::DataCorruption(format!(
            "embedding {id}: dimension {} != {EMBEDDING_DIM}",
            vector.len()
        )));
    }
    if let Some(pos) = vector.iter().position(|v| !v.is_finite()) {
        return Err(Error::DataCorruption(format!(
            "embedding {id}: non-finite value at index {pos}"
        )));
    }
    Ok(())
}

impl Default for AnnIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl AnnIndex {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(AnnInner { hnsw: new_hnsw(), vectors: HashMap::new() }),
        }
    }

    /// Inserts a vector under the given id. The vector is copied at the
    /// boundary; rejected if the dimension is wrong, a value is non-finite,
    /// or the id already exists.
    pub fn add(&self, id: u64, vector: &[f32]) -> Result<()> {
        validate_vector(id, vector)?;
        let mut inner = self.inner.lock();
        if inner.vectors.contains_key(&id) {
            return Err(Error::DataCorruption(format!("embedding {id}: duplicate id")));
        }
        let copy = vector.to_vec();
        inner.hnsw.insert((&copy, id as usize));
        inner.vectors.insert(id, copy);
        Ok(())
    }

    /// K nearest neighbors as `(id, cosine distance)` pairs, closest first.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(u64, f32)>> {
        if query.len() != EMBEDDING_DIM {
            return Err(Error::InvalidInput(format!(
                "query dimension {} != {EMBEDDING_DIM}",
                query.len()
            )));
        }
        let inner = self.inner.lock();
        let k = k.min(inner.vectors.len());
        if k == 0 {
            return Ok(Vec::new());
        }
        let neighbours = inner.hnsw.search(query, k, HNSW_EF);
        Ok(neighbours
            .into_iter()
            .map(|n| (n.d_id as u64, n.distance))
            .collect())
    }

    pub fn count(&self) -> usize {
        self.inner.lock().vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Writes a snapshot: zstd-compressed magic + version + dim + count
    /// followed by `(u64 id, dim × f32 LE)` records.
    pub fn save(&self, path: &Path) -> Result<()> {
        let inner = self.inner.lock();

        let mut ids: Vec<u64> = inner.vectors.keys().copied().collect();
        ids.sort_unstable();

        let mut buf = Vec::with_capacity(16 + ids.len() * (8 + EMBEDDING_DIM * 4));
        buf.extend_from_slice(SNAPSHOT_MAGIC);
        buf.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
        buf.extend_from_slice(&(EMBEDDING_DIM as u32).to_le_bytes());
        buf.extend_from_slice(&(ids.len() as u64).to_le_bytes());
        for id in ids {
            buf.extend_from_slice(&id.to_le_bytes());
            buf.extend_from_slice(bytemuck::cast_slice(&inner.vectors[&id]));
        }

        let compressed = zstd::encode_all(buf.as_slice(), 0)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("hnsw.tmp");
        std::fs::write(&tmp, compressed)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Loads a snapshot, skipping malformed records with a log entry.
    /// A wrong magic or truncated header is refused outright; the caller
    /// falls back to a catalog rebuild.
    pub fn load(path: &Path) -> Result<Self> {
        let compressed = std::fs::read(path)?;
        let buf = zstd::decode_all(compressed.as_slice())?;

        if buf.len() < 20 || &buf[..4] != SNAPSHOT_MAGIC {
            return Err(Error::DataCorruption(format!(
                "{}: not an ANN snapshot",
                path.display()
            )));
        }
        let version = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        if version != SNAPSHOT_VERSION {
            return Err(Error::DataCorruption(format!(
                "{}: unsupported snapshot version {version}",
                path.display()
            )));
        }
        let dim = u32::from_le_bytes(buf[8..12].try_into().unwrap()) as usize;
        let count = u64::from_le_bytes(buf[12..20].try_into().unwrap()) as usize;

        let index = Self::new();
        let record_len = 8 + dim * 4;
        let mut offset = 20;
        for _ in 0..count {
            if offset + record_len > buf.len() {
                tracing::warn!("ANN snapshot truncated at offset {offset}, keeping partial index");
                break;
            }
            let id = u64::from_le_bytes(buf[offset..offset + 8].try_into().unwrap());
            let vector: Vec<f32> = buf[offset + 8..offset + record_len]
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes(b.try_into().unwrap()))
                .collect();
            offset += record_len;

            if let Err(e) = index.add(id, &vector) {
                tracing::warn!("skipping ANN snapshot record {id}: {e}");
            }
        }

        Ok(index)
    }
}
