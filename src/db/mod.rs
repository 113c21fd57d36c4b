//! SQLite catalog paired with the HNSW vector index.
//!
//! Tables: crates, items, embeddings, semantic_backlinks, reexports. The
//! connection runs in WAL mode behind a single mutex; readers and the write
//! path share it, which keeps every multi-statement operation serial. The
//! ANN index is derived state: embedding rows are the source of truth, and
//! a missing or stale `db.hnsw` sibling file is rebuilt from them on open.

pub mod ann;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{Error, Result};
use crate::rustdoc::reexports::Reexport;
use ann::{AnnIndex, EMBEDDING_DIM};

pub struct Database {
    conn: Mutex<Connection>,
    ann: AnnIndex,
    ann_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct CrateRow {
    pub id: i64,
    pub name: String,
    pub version: String,
    pub fetched_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct ItemRow {
    pub id: i64,
    pub crate_id: i64,
    pub source_id: u32,
    pub name: String,
    pub path: String,
    pub kind: String,
    pub content_hash: Option<String>,
    pub signature: String,
    /// JSON-encoded map: raw link target → doc:// URI.
    pub doc_links: String,
    /// JSON-encoded list of fragment names.
    pub fragment_names: String,
}

/// Insert payload for one catalog item.
#[derive(Debug, Clone)]
pub struct ItemRecord {
    pub source_id: u32,
    pub name: String,
    pub path: String,
    pub kind: String,
    pub content_hash: Option<String>,
    pub signature: String,
    pub doc_links: String,
    pub fragment_names: String,
}

/// One chunk ready for embedding storage.
#[derive(Debug, Clone)]
pub struct EmbeddingRecord {
    pub content_hash: String,
    pub chunk_text: String,
    pub chunk_index: i64,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct HashHit {
    pub content_hash: String,
    pub similarity: f32,
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS crates (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        version TEXT NOT NULL,
        fetched_at TIMESTAMP,
        processed_at TIMESTAMP,
        last_used_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        UNIQUE(name, version)
    )",
    "CREATE INDEX IF NOT EXISTS idx_crates_name ON crates (name)",
    "CREATE TABLE IF NOT EXISTS items (
        id INTEGER PRIMARY KEY,
        crate_id INTEGER REFERENCES crates(id),
        source_id INTEGER NOT NULL,
        name TEXT NOT NULL,
        path TEXT NOT NULL,
        kind TEXT NOT NULL,
        content_hash TEXT,
        signature TEXT,
        doc_links TEXT,
        fragment_names TEXT,
        UNIQUE(crate_id, source_id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_items_crate ON items (crate_id)",
    "CREATE INDEX IF NOT EXISTS idx_items_path ON items (path)",
    "CREATE INDEX IF NOT EXISTS idx_items_hash ON items (content_hash)",
    "CREATE TABLE IF NOT EXISTS embeddings (
        id INTEGER PRIMARY KEY,
        content_hash TEXT NOT NULL,
        chunk_text TEXT NOT NULL,
        chunk_index INTEGER NOT NULL,
        embedding BLOB NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_embeddings_hash ON embeddings (content_hash)",
    "CREATE TABLE IF NOT EXISTS semantic_backlinks (
        id INTEGER PRIMARY KEY,
        hash_a TEXT NOT NULL,
        hash_b TEXT NOT NULL,
        similarity_score REAL NOT NULL,
        UNIQUE(hash_a, hash_b)
    )",
    "CREATE INDEX IF NOT EXISTS idx_backlinks_a ON semantic_backlinks (hash_a)",
    "CREATE INDEX IF NOT EXISTS idx_backlinks_b ON semantic_backlinks (hash_b)",
    "CREATE TABLE IF NOT EXISTS reexports (
        id INTEGER PRIMARY KEY,
        crate_id INTEGER NOT NULL REFERENCES crates(id),
        local_prefix TEXT NOT NULL,
        source_crate TEXT NOT NULL,
        source_prefix TEXT NOT NULL,
        UNIQUE(crate_id, local_prefix)
    )",
    "CREATE INDEX IF NOT EXISTS idx_reexports_crate ON reexports (crate_id)",
];

impl Database {
    /// Opens (or creates) the catalog at `db_path` and loads the sibling
    /// ANN snapshot, rebuilding it from the embeddings table if missing.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        remove_stale_non_sqlite(db_path);

        let conn = Connection::open(db_path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA busy_timeout=5000;",
        )?;
        for stmt in SCHEMA {
            conn.execute(stmt, [])?;
        }

        let ann_path = db_path.with_extension("hnsw");
        let ann = if ann_path.exists() {
            match AnnIndex::load(&ann_path) {
                Ok(loaded) => loaded,
                Err(e) => {
                    tracing::warn!("failed to load ANN snapshot, rebuilding: {e}");
                    AnnIndex::new()
                }
            }
        } else {
            AnnIndex::new()
        };

        let db = Self { conn: Mutex::new(conn), ann, ann_path };
        if db.ann.is_empty() {
            db.rebuild_ann_from_embeddings()?;
        }
        Ok(db)
    }

    /// Scans the embeddings table into the in-memory graph. Malformed rows
    /// are skipped with a log entry; they never abort recovery.
    fn rebuild_ann_from_embeddings(&self) -> Result<()> {
        {
            let conn = self.conn.lock();
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM embeddings", [], |r| r.get(0))?;
            if count == 0 {
                return Ok(());
            }

            tracing::info!("rebuilding ANN index from {count} embeddings");
            let mut stmt = conn.prepare("SELECT id, embedding FROM embeddings")?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let id: i64 = row.get(0)?;
                let blob: Vec<u8> = row.get(1)?;
                let vector = deserialize_vector(&blob);
                if let Err(e) = self.ann.add(id as u64, &vector) {
                    tracing::warn!("skipping embedding id={id}: {e}");
                }
            }
        }

        self.save_ann();
        Ok(())
    }

    /// Persists the ANN snapshot next to the database.
    pub fn save_ann(&self) {
        if let Err(e) = self.ann.save(&self.ann_path) {
            tracing::warn!("failed to save ANN snapshot: {e}");
        }
    }

    pub fn ann_count(&self) -> usize {
        self.ann.count()
    }

    // --- Crate operations ---

    pub fn upsert_crate(&self, name: &str, version: &str) -> Result<CrateRow> {
        let conn = self.conn.lock();
        if let Some(existing) = query_crate(&conn, name, version)? {
            return Ok(existing);
        }
        conn.execute("INSERT INTO crates (name, version) VALUES (?1, ?2)", params![name, version])?;
        let id = conn.last_insert_rowid();
        Ok(CrateRow {
            id,
            name: name.to_string(),
            version: version.to_string(),
            fetched_at: None,
            processed_at: None,
            last_used_at: Some(Utc::now()),
        })
    }

    pub fn mark_crate_fetched(&self, crate_id: i64) -> Result<()> {
        self.conn.lock().execute(
            "UPDATE crates SET fetched_at = CURRENT_TIMESTAMP WHERE id = ?1",
            params![crate_id],
        )?;
        Ok(())
    }

    pub fn mark_crate_processed(&self, crate_id: i64) -> Result<()> {
        self.conn.lock().execute(
            "UPDATE crates SET processed_at = CURRENT_TIMESTAMP WHERE id = ?1",
            params![crate_id],
        )?;
        Ok(())
    }

    pub fn touch_crate(&self, crate_id: i64) -> Result<()> {
        self.conn.lock().execute(
            "UPDATE crates SET last_used_at = CURRENT_TIMESTAMP WHERE id = ?1",
            params![crate_id],
        )?;
        Ok(())
    }

    pub fn get_crate(&self, name: &str, version: &str) -> Result<Option<CrateRow>> {
        query_crate(&self.conn.lock(), name, version)
    }

    /// Most recently processed crate row with the given name.
    pub fn get_latest_crate(&self, name: &str) -> Result<Option<CrateRow>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT id, name, version, fetched_at, processed_at, last_used_at
                 FROM crates WHERE name = ?1 AND processed_at IS NOT NULL
                 ORDER BY processed_at DESC LIMIT 1",
                params![name],
                crate_from_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn list_crates(&self) -> Result<Vec<CrateRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, name, version, fetched_at, processed_at, last_used_at
             FROM crates ORDER BY name",
        )?;
        let rows = stmt
            .query_map([], crate_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn count_items(&self, crate_id: i64) -> Result<i64> {
        let count = self.conn.lock().query_row(
            "SELECT COUNT(*) FROM items WHERE crate_id = ?1",
            params![crate_id],
            |r| r.get(0),
        )?;
        Ok(count)
    }

    // --- Item & reexport rewrite ---

    /// Atomically replaces a crate's items and re-exports: delete both, bulk
    /// insert, all in one write transaction. The crate stays invisible to
    /// queries until `mark_crate_processed`.
    pub fn replace_crate_index(
        &self,
        crate_id: i64,
        items: &[ItemRecord],
        reexports: &[Reexport],
    ) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM items WHERE crate_id = ?1", params![crate_id])?;
        tx.execute("DELETE FROM reexports WHERE crate_id = ?1", params![crate_id])?;

        {
            let mut insert_item = tx.prepare(
                "INSERT OR IGNORE INTO items
                 (crate_id, source_id, name, path, kind, content_hash, signature, doc_links, fragment_names)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for item in items {
                insert_item.execute(params![
                    crate_id,
                    item.source_id,
                    item.name,
                    item.path,
                    item.kind,
                    item.content_hash,
                    item.signature,
                    item.doc_links,
                    item.fragment_names,
                ])?;
            }

            let mut insert_reexport = tx.prepare(
                "INSERT INTO reexports (crate_id, local_prefix, source_crate, source_prefix)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (crate_id, local_prefix) DO UPDATE SET
                     source_crate = excluded.source_crate,
                     source_prefix = excluded.source_prefix",
            )?;
            for re in reexports {
                insert_reexport.execute(params![
                    crate_id,
                    re.local_prefix,
                    re.source_crate,
                    re.source_prefix,
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    pub fn get_item_by_path(&self, crate_id: i64, path: &str) -> Result<Option<ItemRow>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                &format!("SELECT {ITEM_COLUMNS} FROM items WHERE crate_id = ?1 AND path = ?2"),
                params![crate_id, path],
                item_from_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Representative item for a content hash. Prefers an item from the
    /// given crates so shared hashes attribute to the crate the caller
    /// scoped to; falls back to any item with the hash.
    pub fn get_item_for_hash(
        &self,
        content_hash: &str,
        preferred_crate_ids: &[i64],
    ) -> Result<Option<ItemRow>> {
        let conn = self.conn.lock();

        if !preferred_crate_ids.is_empty() {
            let placeholders = placeholders(preferred_crate_ids.len());
            let sql = format!(
                "SELECT {ITEM_COLUMNS} FROM items
                 WHERE content_hash = ?1 AND crate_id IN ({placeholders}) LIMIT 1"
            );
            let mut values: Vec<rusqlite::types::Value> =
                vec![content_hash.to_string().into()];
            values.extend(preferred_crate_ids.iter().map(|id| (*id).into()));
            let row = conn
                .query_row(&sql, rusqlite::params_from_iter(values), item_from_row)
                .optional()?;
            if row.is_some() {
                return Ok(row);
            }
        }

        let row = conn
            .query_row(
                &format!("SELECT {ITEM_COLUMNS} FROM items WHERE content_hash = ?1 LIMIT 1"),
                params![content_hash],
                item_from_row,
            )
            .optional()?;
        Ok(row)
    }

    // --- Embedding operations ---

    /// Inserts one embedding row and its ANN node. The vector is validated
    /// before anything is written.
    pub fn insert_embedding(
        &self,
        content_hash: &str,
        chunk_text: &str,
        chunk_index: i64,
        vector: &[f32],
    ) -> Result<i64> {
        validate_embedding(vector)?;

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO embeddings (content_hash, chunk_text, chunk_index, embedding)
             VALUES (?1, ?2, ?3, ?4)",
            params![content_hash, chunk_text, chunk_index, serialize_vector(vector)],
        )?;
        let id = conn.last_insert_rowid();
        drop(conn);

        self.ann.add(id as u64, vector)?;
        Ok(id)
    }

    /// Inserts a batch of embeddings under a single write transaction, then
    /// mirrors them into the ANN. Records with a malformed vector are
    /// skipped with a log entry rather than aborting the batch.
    pub fn insert_embeddings(&self, records: &[EmbeddingRecord]) -> Result<()> {
        let mut inserted: Vec<(i64, &EmbeddingRecord)> = Vec::with_capacity(records.len());
        {
            let mut conn = self.conn.lock();
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO embeddings (content_hash, chunk_text, chunk_index, embedding)
                     VALUES (?1, ?2, ?3, ?4)",
                )?;
                for record in records {
                    if let Err(e) = validate_embedding(&record.vector) {
                        tracing::warn!(
                            "skipping embedding for hash {} chunk {}: {e}",
                            record.content_hash,
                            record.chunk_index
                        );
                        continue;
                    }
                    stmt.execute(params![
                        record.content_hash,
                        record.chunk_text,
                        record.chunk_index,
                        serialize_vector(&record.vector),
                    ])?;
                    inserted.push((tx.last_insert_rowid(), record));
                }
            }
            tx.commit()?;
        }

        for (id, record) in inserted {
            if let Err(e) = self.ann.add(id as u64, &record.vector) {
                tracing::warn!("failed to add embedding {id} to ANN: {e}");
            }
        }
        Ok(())
    }

    pub fn has_embeddings(&self, content_hash: &str) -> bool {
        self.conn
            .lock()
            .query_row(
                "SELECT COUNT(*) FROM embeddings WHERE content_hash = ?1",
                params![content_hash],
                |r| r.get::<_, i64>(0),
            )
            .map(|c| c > 0)
            .unwrap_or(false)
    }

    // --- Vector search ---

    /// KNN over the ANN, grouped by content hash with the best similarity
    /// per hash. Distances convert to similarities as `1 - distance`.
    fn knn_search(
        &self,
        vector: &[f32],
        fetch_limit: usize,
        threshold: f32,
        allowed_hashes: Option<&HashSet<String>>,
    ) -> Result<HashMap<String, f32>> {
        let hits = self.ann.search(vector, fetch_limit)?;
        if hits.is_empty() {
            return Ok(HashMap::new());
        }

        let ids: Vec<i64> = hits.iter().map(|(id, _)| *id as i64).collect();
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT id, content_hash FROM embeddings WHERE id IN ({})",
            placeholders(ids.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let id_to_hash: HashMap<i64, String> = stmt
            .query_map(rusqlite::params_from_iter(ids.iter()), |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<_>>()?;

        let mut best: HashMap<String, f32> = HashMap::new();
        for (id, distance) in hits {
            let Some(hash) = id_to_hash.get(&(id as i64)) else {
                continue;
            };
            let similarity = 1.0 - distance;
            if similarity <= threshold {
                continue;
            }
            if let Some(allowed) = allowed_hashes {
                if !allowed.contains(hash) {
                    continue;
                }
            }
            let entry = best.entry(hash.clone()).or_insert(f32::MIN);
            if similarity > *entry {
                *entry = similarity;
            }
        }
        Ok(best)
    }

    /// Vector search returning per-hash best similarities, sorted
    /// descending and truncated to `limit`. When `crate_ids` is non-empty,
    /// hits outside those crates' content hashes are rejected.
    pub fn vector_search(
        &self,
        vector: &[f32],
        threshold: f32,
        limit: usize,
        crate_ids: &[i64],
    ) -> Result<Vec<HashHit>> {
        let allowed = if crate_ids.is_empty() {
            None
        } else {
            let hashes = self.content_hashes_for_crates(crate_ids)?;
            if hashes.is_empty() {
                return Ok(Vec::new());
            }
            Some(hashes)
        };

        let fetch_limit = (limit * 10).min(5000);
        let best = self.knn_search(vector, fetch_limit, threshold, allowed.as_ref())?;

        let mut results: Vec<HashHit> = best
            .into_iter()
            .map(|(content_hash, similarity)| HashHit { content_hash, similarity })
            .collect();
        results.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(limit);
        Ok(results)
    }

    /// Nearest content hashes for backlink generation, excluding the hash
    /// itself.
    pub fn find_similar_content(
        &self,
        vector: &[f32],
        min_similarity: f32,
        limit: usize,
        exclude_hash: &str,
    ) -> Result<Vec<HashHit>> {
        // Over-fetch: neighbors collapse when chunks share a hash. The
        // threshold applies here as an inclusive bound, unlike the strict
        // one in vector_search.
        let fetch_limit = (limit * 10).min(5000);
        let mut best = self.knn_search(vector, fetch_limit, -2.0, None)?;
        best.remove(exclude_hash);

        let mut results: Vec<HashHit> = best
            .into_iter()
            .filter(|(_, sim)| *sim >= min_similarity)
            .map(|(content_hash, similarity)| HashHit { content_hash, similarity })
            .collect();
        results.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(limit);
        Ok(results)
    }

    /// Content hashes belonging to the given crates.
    pub fn content_hashes_for_crates(&self, crate_ids: &[i64]) -> Result<HashSet<String>> {
        if crate_ids.is_empty() {
            return Ok(HashSet::new());
        }
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT DISTINCT content_hash FROM items
             WHERE crate_id IN ({}) AND content_hash IS NOT NULL",
            placeholders(crate_ids.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let hashes = stmt
            .query_map(rusqlite::params_from_iter(crate_ids.iter()), |row| {
                row.get::<_, String>(0)
            })?
            .collect::<rusqlite::Result<HashSet<_>>>()?;
        Ok(hashes)
    }

    /// Batch item-id → crate resolution in a single query.
    pub fn crates_for_items(&self, item_ids: &[i64]) -> Result<HashMap<i64, CrateRow>> {
        if item_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT i.id, c.id, c.name, c.version, c.fetched_at, c.processed_at, c.last_used_at
             FROM items i JOIN crates c ON c.id = i.crate_id
             WHERE i.id IN ({})",
            placeholders(item_ids.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(item_ids.iter()), |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    CrateRow {
                        id: row.get(1)?,
                        name: row.get(2)?,
                        version: row.get(3)?,
                        fetched_at: row.get(4)?,
                        processed_at: row.get(5)?,
                        last_used_at: row.get(6)?,
                    },
                ))
            })?
            .collect::<rusqlite::Result<HashMap<_, _>>>()?;
        Ok(rows)
    }

    pub fn crate_ids_by_name(&self, names: &[String]) -> Result<Vec<i64>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT id FROM crates WHERE name IN ({})",
            placeholders(names.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let ids = stmt
            .query_map(rusqlite::params_from_iter(names.iter()), |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(ids)
    }

    /// Per name, the processed version with the greatest `processed_at`.
    pub fn indexed_versions(&self, names: &[String]) -> Result<HashMap<String, String>> {
        if names.is_empty() {
            return Ok(HashMap::new());
        }
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT name, version FROM (
                 SELECT name, version,
                        ROW_NUMBER() OVER (PARTITION BY name ORDER BY processed_at DESC) AS rn
                 FROM crates
                 WHERE name IN ({}) AND processed_at IS NOT NULL
             ) WHERE rn = 1",
            placeholders(names.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(names.iter()), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<HashMap<_, _>>>()?;
        Ok(rows)
    }

    // --- Backlink operations ---

    /// Stores a semantic similarity edge with ordered keys.
    pub fn upsert_backlink(&self, hash_a: &str, hash_b: &str, similarity: f32) -> Result<()> {
        let (a, b) = if hash_a <= hash_b { (hash_a, hash_b) } else { (hash_b, hash_a) };
        self.conn.lock().execute(
            "INSERT INTO semantic_backlinks (hash_a, hash_b, similarity_score)
             VALUES (?1, ?2, ?3)
             ON CONFLICT (hash_a, hash_b) DO UPDATE SET
                 similarity_score = excluded.similarity_score",
            params![a, b, similarity],
        )?;
        Ok(())
    }

    /// Neighbors of a hash with similarity at or above the threshold,
    /// best first.
    pub fn get_backlinks(&self, content_hash: &str, min_similarity: f32) -> Result<Vec<HashHit>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT CASE WHEN hash_a = ?1 THEN hash_b ELSE hash_a END AS other_hash,
                    similarity_score
             FROM semantic_backlinks
             WHERE (hash_a = ?1 OR hash_b = ?1) AND similarity_score >= ?2
             ORDER BY similarity_score DESC",
        )?;
        let rows = stmt
            .query_map(params![content_hash, min_similarity], |row| {
                Ok(HashHit { content_hash: row.get(0)?, similarity: row.get(1)? })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // --- Reexport operations ---

    /// Checks whether the path matches a re-export in this crate: exact
    /// match first, then longest prefix (glob re-exports). Returns the
    /// source crate name and resolved source path.
    pub fn resolve_reexport(&self, crate_id: i64, path: &str) -> Result<Option<(String, String)>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT local_prefix, source_crate, source_prefix FROM reexports
                 WHERE crate_id = ?1 AND (local_prefix = ?2 OR ?2 LIKE local_prefix || '::%')
                 ORDER BY length(local_prefix) DESC LIMIT 1",
                params![crate_id, path],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        Ok(row.map(|(local_prefix, source_crate, source_prefix)| {
            if local_prefix == path {
                (source_crate, source_prefix)
            } else {
                let suffix = &path[local_prefix.len()..];
                (source_crate, format!("{source_prefix}{suffix}"))
            }
        }))
    }
}

const ITEM_COLUMNS: &str =
    "id, crate_id, source_id, name, path, kind, content_hash, signature, doc_links, fragment_names";

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<ItemRow> {
    Ok(ItemRow {
        id: row.get(0)?,
        crate_id: row.get(1)?,
        source_id: row.get(2)?,
        name: row.get(3)?,
        path: row.get(4)?,
        kind: row.get(5)?,
        content_hash: row.get(6)?,
        signature: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
        doc_links: row.get::<_, Option<String>>(8)?.unwrap_or_default(),
        fragment_names: row.get::<_, Option<String>>(9)?.unwrap_or_default(),
    })
}

fn crate_from_row(row: &Row<'_>) -> rusqlite::Result<CrateRow> {
    Ok(CrateRow {
        id: row.get(0)?,
        name: row.get(1)?,
        version: row.get(2)?,
        fetched_at: row.get(3)?,
        processed_at: row.get(4)?,
        last_used_at: row.get(5)?,
    })
}

fn query_crate(conn: &Connection, name: &str, version: &str) -> Result<Option<CrateRow>> {
    let row = conn
        .query_row(
            "SELECT id, name, version, fetched_at, processed_at, last_used_at
             FROM crates WHERE name = ?1 AND version = ?2",
            params![name, version],
            crate_from_row,
        )
        .optional()?;
    Ok(row)
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(",")
}

fn validate_embedding(vector: &[f32]) -> Result<()> {
    if vector.len() != EMBEDDING_DIM {
        return Err(Error::DataCorruption(format!(
            "expected embedding dimension {EMBEDDING_DIM}, got {}",
            vector.len()
        )));
    }
    if let Some(pos) = vector.iter().position(|v| !v.is_finite()) {
        return Err(Error::DataCorruption(format!(
            "embedding contains NaN or Inf at index {pos}"
        )));
    }
    Ok(())
}

fn serialize_vector(vector: &[f32]) -> Vec<u8> {
    bytemuck::cast_slice(vector).to_vec()
}

fn deserialize_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes(b.try_into().unwrap()))
        .collect()
}

/// A `db.db` left behind by another storage engine would fail to open;
/// detect and remove it by checking the SQLite magic.
fn remove_stale_non_sqlite(db_path: &Path) {
    use std::io::Read;

    let Ok(meta) = std::fs::metadata(db_path) else {
        return;
    };
    if meta.len() < 4 {
        return;
    }
    let mut header = [0u8; 4];
    let Ok(mut file) = std::fs::File::open(db_path) else {
        return;
    };
    if file.read_exact(&mut header).is_err() {
        return;
    }
    if &header != b"SQLi" {
        tracing::warn!("removing non-SQLite database file at {}", db_path.display());
        let _ = std::fs::remove_file(db_path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("test.db")).unwrap();
        (dir, db)
    }

    fn vec_with(value: f32) -> Vec<f32> {
        vec![value; EMBEDDING_DIM]
    }

    fn item_record(source_id: u32, name: &str, path: &str, hash: Option<&str>) -> ItemRecord {
        ItemRecord {
            source_id,
            name: name.to_string(),
            path: path.to_string(),
            kind: "struct".to_string(),
            content_hash: hash.map(String::from),
            signature: String::new(),
            doc_links: String::new(),
            fragment_names: String::new(),
        }
    }

    #[test]
    fn validate_embedding_rejects_bad_input() {
        assert!(validate_embedding(&vec_with(0.5)).is_ok());
        assert!(validate_embedding(&[1.0, 2.0, 3.0]).is_err());

        let mut nan = vec_with(0.5);
        nan[10] = f32::NAN;
        assert!(validate_embedding(&nan).is_err());

        let mut inf = vec_with(0.5);
        inf[0] = f32::NEG_INFINITY;
        assert!(validate_embedding(&inf).is_err());
    }

    #[test]
    fn upsert_crate_is_idempotent() {
        let (_dir, db) = test_db();
        let a = db.upsert_crate("serde", "1.0.0").unwrap();
        let b = db.upsert_crate("serde", "1.0.0").unwrap();
        assert_eq!(a.id, b.id);
        assert!(b.processed_at.is_none());

        db.mark_crate_processed(a.id).unwrap();
        let c = db.get_crate("serde", "1.0.0").unwrap().unwrap();
        assert!(c.processed_at.is_some());
    }

    #[test]
    fn latest_crate_prefers_most_recently_processed() {
        let (_dir, db) = test_db();
        let old = db.upsert_crate("serde", "1.0.0").unwrap();
        let new = db.upsert_crate("serde", "1.1.0").unwrap();
        db.mark_crate_processed(old.id).unwrap();
        // Unprocessed rows are invisible to "latest".
        assert_eq!(db.get_latest_crate("serde").unwrap().unwrap().version, "1.0.0");

        db.mark_crate_processed(new.id).unwrap();
        // Same-second timestamps tie; ordering by processed_at keeps either
        // processed row acceptable, so just confirm one is returned.
        assert!(db.get_latest_crate("serde").unwrap().is_some());
    }

    #[test]
    fn insert_embedding_and_search() {
        let (_dir, db) = test_db();
        db.insert_embedding("hash_a", "text a", 0, &vec_with(1.0)).unwrap();
        db.insert_embedding("hash_b", "text b", 0, &vec_with(-1.0)).unwrap();
        assert!(db.has_embeddings("hash_a"));
        assert!(!db.has_embeddings("hash_c"));

        let results = db.vector_search(&vec_with(1.0), 0.0, 10, &[]).unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].content_hash, "hash_a");

        // High threshold filters the dissimilar hash.
        let results = db.vector_search(&vec_with(1.0), 0.99, 10, &[]).unwrap();
        assert!(results.iter().all(|r| r.content_hash != "hash_b"));

        // Limit.
        let results = db.vector_search(&vec_with(1.0), 0.0, 1, &[]).unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn insert_embedding_rejects_invalid() {
        let (_dir, db) = test_db();
        assert!(db.insert_embedding("h", "text", 0, &[1.0, 2.0]).is_err());
        let mut nan = vec_with(0.5);
        nan[0] = f32::NAN;
        assert!(db.insert_embedding("h", "text", 0, &nan).is_err());
        assert!(!db.has_embeddings("h"));
    }

    #[test]
    fn crate_scoped_search_rejects_foreign_hashes() {
        let (_dir, db) = test_db();
        db.insert_embedding("hash_a", "text a", 0, &vec_with(1.0)).unwrap();
        db.insert_embedding("hash_b", "text b", 0, &vec_with(-1.0)).unwrap();

        let krate = db.upsert_crate("testcrate", "1.0.0").unwrap();
        db.replace_crate_index(
            krate.id,
            &[item_record(1, "A", "testcrate::A", Some("hash_a"))],
            &[],
        )
        .unwrap();

        let results = db.vector_search(&vec_with(1.0), 0.0, 10, &[krate.id]).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].content_hash, "hash_a");

        // Unknown crate scope: no allowed hashes at all.
        let results = db.vector_search(&vec_with(1.0), 0.0, 10, &[9999]).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn replace_crate_index_rewrites_atomically() {
        let (_dir, db) = test_db();
        let krate = db.upsert_crate("mycrate", "1.0.0").unwrap();

        db.replace_crate_index(
            krate.id,
            &[
                item_record(1, "Old", "mycrate::Old", None),
                item_record(2, "Kept", "mycrate::Kept", None),
            ],
            &[Reexport {
                local_prefix: "mycrate::old".into(),
                source_crate: "dep".into(),
                source_prefix: "dep::old".into(),
            }],
        )
        .unwrap();
        assert_eq!(db.count_items(krate.id).unwrap(), 2);

        db.replace_crate_index(
            krate.id,
            &[item_record(3, "New", "mycrate::New", None)],
            &[],
        )
        .unwrap();
        assert_eq!(db.count_items(krate.id).unwrap(), 1);
        assert!(db.get_item_by_path(krate.id, "mycrate::Old").unwrap().is_none());
        assert!(db.get_item_by_path(krate.id, "mycrate::New").unwrap().is_some());
        assert!(db.resolve_reexport(krate.id, "mycrate::old").unwrap().is_none());
    }

    #[test]
    fn item_for_hash_prefers_scoped_crate() {
        let (_dir, db) = test_db();
        let a = db.upsert_crate("crate-a", "1.0.0").unwrap();
        let b = db.upsert_crate("crate-b", "1.0.0").unwrap();
        db.replace_crate_index(a.id, &[item_record(1, "X", "crate_a::X", Some("shared"))], &[])
            .unwrap();
        db.replace_crate_index(b.id, &[item_record(1, "X", "crate_b::X", Some("shared"))], &[])
            .unwrap();

        let item = db.get_item_for_hash("shared", &[b.id]).unwrap().unwrap();
        assert_eq!(item.crate_id, b.id);

        // Falls back to any item when no preferred crate has the hash.
        let item = db.get_item_for_hash("shared", &[9999]).unwrap().unwrap();
        assert_eq!(item.content_hash.as_deref(), Some("shared"));

        assert!(db.get_item_for_hash("missing", &[]).unwrap().is_none());
    }

    #[test]
    fn resolve_reexport_exact_and_prefix() {
        let (_dir, db) = test_db();
        let krate = db.upsert_crate("mylib", "1.0.0").unwrap();
        db.replace_crate_index(
            krate.id,
            &[],
            &[
                Reexport {
                    local_prefix: "mylib::re::Thing".into(),
                    source_crate: "dep".into(),
                    source_prefix: "dep::original::Thing".into(),
                },
                Reexport {
                    local_prefix: "mylib::prelude".into(),
                    source_crate: "dep".into(),
                    source_prefix: "dep::types".into(),
                },
            ],
        )
        .unwrap();

        let (src, path) = db.resolve_reexport(krate.id, "mylib::re::Thing").unwrap().unwrap();
        assert_eq!((src.as_str(), path.as_str()), ("dep", "dep::original::Thing"));

        let (src, path) = db
            .resolve_reexport(krate.id, "mylib::prelude::Widget")
            .unwrap()
            .unwrap();
        assert_eq!((src.as_str(), path.as_str()), ("dep", "dep::types::Widget"));

        assert!(db.resolve_reexport(krate.id, "mylib::unrelated::Stuff").unwrap().is_none());
    }

    #[test]
    fn resolve_reexport_longest_prefix_wins() {
        let (_dir, db) = test_db();
        let krate = db.upsert_crate("mylib", "1.0.0").unwrap();
        db.replace_crate_index(
            krate.id,
            &[],
            &[
                Reexport {
                    local_prefix: "mylib::a".into(),
                    source_crate: "short".into(),
                    source_prefix: "short::a".into(),
                },
                Reexport {
                    local_prefix: "mylib::a::b".into(),
                    source_crate: "long".into(),
                    source_prefix: "long::b".into(),
                },
            ],
        )
        .unwrap();

        let (src, path) = db.resolve_reexport(krate.id, "mylib::a::b::C").unwrap().unwrap();
        assert_eq!((src.as_str(), path.as_str()), ("long", "long::b::C"));

        // Exact match beats the shorter prefix interpretation.
        let (src, _) = db.resolve_reexport(krate.id, "mylib::a::b").unwrap().unwrap();
        assert_eq!(src, "long");
    }

    #[test]
    fn backlinks_store_ordered_pairs() {
        let (_dir, db) = test_db();
        db.upsert_backlink("zzz", "aaa", 0.8).unwrap();
        // Same edge from the other direction updates in place.
        db.upsert_backlink("aaa", "zzz", 0.9).unwrap();

        let links = db.get_backlinks("aaa", 0.5).unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].content_hash, "zzz");
        assert!((links[0].similarity - 0.9).abs() < 1e-6);

        let links = db.get_backlinks("zzz", 0.95).unwrap();
        assert!(links.is_empty());
    }

    #[test]
    fn crates_for_items_batch_lookup() {
        let (_dir, db) = test_db();
        assert!(db.crates_for_items(&[]).unwrap().is_empty());

        let krate = db.upsert_crate("mycrate", "0.1.0").unwrap();
        db.replace_crate_index(
            krate.id,
            &[
                item_record(100, "Foo", "mycrate::Foo", None),
                item_record(101, "Bar", "mycrate::Bar", None),
            ],
            &[],
        )
        .unwrap();

        let foo = db.get_item_by_path(krate.id, "mycrate::Foo").unwrap().unwrap();
        let bar = db.get_item_by_path(krate.id, "mycrate::Bar").unwrap().unwrap();
        let map = db.crates_for_items(&[foo.id, bar.id]).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map[&foo.id].name, "mycrate");
    }

    #[test]
    fn indexed_versions_skips_unprocessed() {
        let (_dir, db) = test_db();
        let processed = db.upsert_crate("serde", "1.0.0").unwrap();
        db.upsert_crate("tokio", "1.0.0").unwrap();
        db.mark_crate_processed(processed.id).unwrap();

        let names = vec!["serde".to_string(), "tokio".to_string()];
        let versions = db.indexed_versions(&names).unwrap();
        assert_eq!(versions.get("serde").map(String::as_str), Some("1.0.0"));
        assert!(!versions.contains_key("tokio"));
    }

    #[test]
    fn ann_rebuilds_from_catalog_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");

        {
            let db = Database::open(&db_path).unwrap();
            db.insert_embedding("hash_a", "text", 0, &vec_with(1.0)).unwrap();
            db.insert_embedding("hash_b", "text", 0, &vec_with(-1.0)).unwrap();
        }
        // Remove the snapshot so the next open must rebuild from SQLite.
        let snapshot = db_path.with_extension("hnsw");
        if snapshot.exists() {
            std::fs::remove_file(&snapshot).unwrap();
        }

        let db = Database::open(&db_path).unwrap();
        assert_eq!(db.ann_count(), 2);
        let results = db.vector_search(&vec_with(1.0), 0.0, 10, &[]).unwrap();
        assert_eq!(results[0].content_hash, "hash_a");
        // The rebuild also re-persists the snapshot.
        assert!(snapshot.exists());
    }

    #[test]
    fn find_similar_content_excludes_self() {
        let (_dir, db) = test_db();
        db.insert_embedding("hash_a", "text", 0, &vec_with(1.0)).unwrap();
        let mut near = vec_with(1.0);
        near[0] = 0.9;
        db.insert_embedding("hash_b", "text", 0, &near).unwrap();

        let similar = db.find_similar_content(&vec_with(1.0), 0.5, 20, "hash_a").unwrap();
        assert!(similar.iter().all(|h| h.content_hash != "hash_a"));
        assert!(similar.iter().any(|h| h.content_hash == "hash_b"));
    }

    #[test]
    fn stale_non_sqlite_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("db.db");
        std::fs::write(&db_path, b"DUCKDB-ish leftovers").unwrap();

        let db = Database::open(&db_path).unwrap();
        assert!(db.list_crates().unwrap().is_empty());
    }
}
