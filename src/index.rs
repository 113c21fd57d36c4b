//! The crate-ingestion pipeline: fetch → parse → CAS write → chunk →
//! embed → store → backlink.
//!
//! Entry point is [`add_crate`]; concurrent calls for the same
//! `name@version` are coalesced through the daemon's singleflight group,
//! and already-processed crates short-circuit before any network I/O.

use std::collections::HashMap;
use std::sync::Arc;

use crate::chunker;
use crate::db::{CrateRow, EmbeddingRecord, ItemRecord};
use crate::error::Result;
use crate::markdown;
use crate::rpc::CrateResult;
use crate::rustdoc::{self, reexports, CrateDoc, ParsedItem};
use crate::state::DaemonState;

/// Progress sink for streamed ingestion messages.
pub type Progress<'a> = &'a (dyn Fn(String) + Send + Sync);

fn err_result(name: &str, version: &str, error: String) -> CrateResult {
    CrateResult { name: name.to_string(), version: version.to_string(), items: 0, error: Some(error) }
}

fn ok_result(name: &str, version: &str, items: usize) -> CrateResult {
    CrateResult { name: name.to_string(), version: version.to_string(), items, error: None }
}

/// Indexes one crate, short-circuiting on cache hits and coalescing
/// concurrent requests.
pub async fn add_crate(
    state: &DaemonState,
    name: &str,
    requested_version: Option<&str>,
    progress: Progress<'_>,
) -> CrateResult {
    let version = match requested_version {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => "latest".to_string(),
    };

    // Version cache for "latest" requests.
    if version == "latest" {
        if let Some(entry) = state.cached_version(name) {
            if entry.not_found {
                return err_result(
                    name,
                    &version,
                    format!("crate {name} not found on the docs registry (cached)"),
                );
            }
            match state.db.get_crate(name, &entry.version) {
                Ok(Some(existing)) if existing.processed_at.is_some() => {
                    let items = state.db.count_items(existing.id).unwrap_or(0) as usize;
                    return ok_result(name, &existing.version, items);
                }
                Ok(_) => {}
                Err(e) => return err_result(name, &version, e.to_string()),
            }
        }
    }

    // Catalog short-circuit: any processed version for "latest", the exact
    // processed row otherwise.
    if version == "latest" {
        match state.db.get_latest_crate(name) {
            Ok(Some(existing)) => {
                let items = state.db.count_items(existing.id).unwrap_or(0) as usize;
                return ok_result(name, &existing.version, items);
            }
            Ok(None) => {}
            Err(e) => return err_result(name, &version, e.to_string()),
        }
    } else {
        match state.db.get_crate(name, &version) {
            Ok(Some(existing)) if existing.processed_at.is_some() => {
                let items = state.db.count_items(existing.id).unwrap_or(0) as usize;
                return ok_result(name, &version, items);
            }
            Ok(_) => {}
            Err(e) => return err_result(name, &version, e.to_string()),
        }
    }

    let key = format!("{name}@{version}");
    state
        .ingest_group
        .run(&key, || add_crate_work(state, name.to_string(), version.clone(), progress))
        .await
}

async fn add_crate_work(
    state: &DaemonState,
    name: String,
    version: String,
    progress: Progress<'_>,
) -> CrateResult {
    let (real_version, doc, items) =
        match resolve_version(state, &name, &version, progress).await {
            Ok(resolved) => resolved,
            Err(e) => return err_result(&name, &version, e.to_string()),
        };

    // The resolved version may already be indexed (e.g. a "latest" tag that
    // points at a processed release).
    if real_version != version {
        match state.db.get_crate(&name, &real_version) {
            Ok(Some(existing)) if existing.processed_at.is_some() => {
                state.set_cached_version(&name, &real_version, false);
                let items = state.db.count_items(existing.id).unwrap_or(0) as usize;
                return ok_result(&name, &real_version, items);
            }
            Ok(_) => {}
            Err(e) => return err_result(&name, &version, e.to_string()),
        }
    }
    state.set_cached_version(&name, &real_version, false);

    let krate = match state.db.upsert_crate(&name, &real_version) {
        Ok(krate) => krate,
        Err(e) => return err_result(&name, &real_version, format!("upserting crate: {e}")),
    };
    if let Err(e) = state.db.mark_crate_fetched(krate.id) {
        tracing::warn!("marking {name}@{real_version} fetched: {e}");
    }

    let to_embed = match index_items(state, &krate, &doc, &items, &name, progress) {
        Ok(to_embed) => to_embed,
        Err(e) => return err_result(&name, &real_version, e.to_string()),
    };

    if let Err(e) = embed_and_backlink(state, &to_embed, &name, &real_version, progress).await {
        return err_result(&name, &real_version, e.to_string());
    }

    if let Err(e) = state.db.mark_crate_processed(krate.id) {
        return err_result(&name, &real_version, e.to_string());
    }
    state.db.save_ann();

    progress(format!(
        "finished indexing {name}@{real_version} ({} items)",
        items.len()
    ));
    ok_result(&name, &real_version, items.len())
}

/// Fetches and parses rustdoc JSON, resolving "latest" to the real version
/// the payload reports. A differing version triggers one re-parse so that
/// generated URIs embed it.
async fn resolve_version(
    state: &DaemonState,
    name: &str,
    version: &str,
    progress: Progress<'_>,
) -> Result<(String, Arc<CrateDoc>, Vec<ParsedItem>)> {
    progress(format!("fetching rustdoc for {name}@{version}"));
    let data = match state.registry.fetch_rustdoc(name, version).await {
        Ok(data) => data,
        Err(e) => {
            if version == "latest" {
                state.set_cached_version(name, "", true);
            }
            return Err(e);
        }
    };

    progress(format!("parsing rustdoc for {name}@{version}"));
    let docs_host = state.config.docs_host();
    let (doc, mut items) = rustdoc::parse(&data, name, version, &docs_host)?;

    let real_version = match &doc.crate_version {
        Some(v) if !v.is_empty() => v.clone(),
        _ => version.to_string(),
    };

    if real_version != version {
        (_, items) = rustdoc::parse(&data, name, &real_version, &docs_host)?;
    }

    // Cache the payload for on-the-fly fragment generation.
    if let Err(e) = rustdoc::cache::save(&state.config.json_cache_dir(), &data, name, &real_version)
    {
        tracing::warn!("failed to cache rustdoc JSON for {name}@{real_version}: {e}");
    }
    let doc = Arc::new(doc);
    state.insert_cached_crate(name, &real_version, doc.clone());

    Ok((real_version, doc, items))
}

/// One CAS blob queued for the embedding phase.
struct Embeddable {
    content_hash: String,
    preamble: String,
    /// Only set for main item docs; fragments carry their links inline.
    doc_links: HashMap<String, String>,
}

/// Writes docs and fragments to the CAS and rewrites the crate's catalog
/// rows in one transaction. Returns the blobs to embed.
fn index_items(
    state: &DaemonState,
    krate: &CrateRow,
    doc: &CrateDoc,
    items: &[ParsedItem],
    crate_name: &str,
    progress: Progress<'_>,
) -> Result<Vec<Embeddable>> {
    progress(format!(
        "parsed {} items from {crate_name}@{}",
        items.len(),
        krate.version
    ));

    let collected = reexports::collect_reexports(doc, crate_name);

    let mut records = Vec::with_capacity(items.len());
    let mut to_embed = Vec::new();

    for item in items {
        let mut content_hash = None;
        if !item.docs.is_empty() {
            match state.cas.write(&item.docs) {
                Ok(hash) => content_hash = Some(hash),
                Err(e) => {
                    tracing::warn!("failed to write CAS for {}: {e}", item.path);
                    continue;
                }
            }
        }

        let doc_links = if item.doc_links.is_empty() {
            String::new()
        } else {
            serde_json::to_string(&item.doc_links)?
        };
        let fragment_names = if item.fragments.is_empty() {
            String::new()
        } else {
            let names: Vec<&str> = item.fragments.iter().map(|f| f.name.as_str()).collect();
            serde_json::to_string(&names)?
        };

        records.push(ItemRecord {
            source_id: item.source_id,
            name: item.name.clone(),
            path: item.path.clone(),
            kind: item.kind.clone(),
            content_hash: content_hash.clone(),
            signature: item.signature.clone(),
            doc_links,
            fragment_names,
        });

        if let Some(hash) = content_hash {
            let mut preamble = item.path.clone();
            if !item.signature.is_empty() {
                preamble.push('\n');
                preamble.push_str(&item.signature);
            }
            to_embed.push(Embeddable {
                content_hash: hash,
                preamble,
                doc_links: item.doc_links.clone(),
            });
        }

        for fragment in &item.fragments {
            if fragment.content.is_empty() {
                continue;
            }
            match state.cas.write(&fragment.content) {
                Ok(hash) => to_embed.push(Embeddable {
                    content_hash: hash,
                    preamble: format!("{}#{}", item.path, fragment.name),
                    doc_links: HashMap::new(),
                }),
                Err(e) => {
                    tracing::warn!("failed to write CAS for {}#{}: {e}", item.path, fragment.name);
                }
            }
        }
    }

    state.db.replace_crate_index(krate.id, &records, &collected)?;
    Ok(to_embed)
}

struct ChunkMeta {
    content_hash: String,
    chunk_index: i64,
    chunk_text: String,
}

/// Chunks and embeds blobs that have no embeddings yet, then generates
/// semantic backlinks from each blob's summary chunk.
async fn embed_and_backlink(
    state: &DaemonState,
    to_embed: &[Embeddable],
    name: &str,
    version: &str,
    progress: Progress<'_>,
) -> Result<()> {
    // Deduplicate: a hash shared across items (or crate versions) embeds
    // once, ever.
    let mut needs: HashMap<&str, bool> = HashMap::new();
    for embeddable in to_embed {
        needs
            .entry(&embeddable.content_hash)
            .or_insert_with(|| !state.db.has_embeddings(&embeddable.content_hash));
    }
    let skipped = needs.values().filter(|needed| !**needed).count();
    if skipped > 0 {
        progress(format!("{skipped} content hashes already embedded, skipping"));
    }

    let mut texts: Vec<String> = Vec::new();
    let mut metas: Vec<ChunkMeta> = Vec::new();
    for embeddable in to_embed {
        let Some(needed) = needs.get_mut(embeddable.content_hash.as_str()) else {
            continue;
        };
        if !*needed {
            continue;
        }
        *needed = false;

        let docs = match state.cas.read(&embeddable.content_hash) {
            Ok(docs) => docs,
            Err(e) => {
                tracing::warn!("failed to read CAS {}: {e}", embeddable.content_hash);
                continue;
            }
        };
        let docs = markdown::rewrite_links(&docs, &embeddable.doc_links);

        for chunk in chunker::chunk_sections(&embeddable.preamble, &docs) {
            metas.push(ChunkMeta {
                content_hash: embeddable.content_hash.clone(),
                chunk_index: chunk.index as i64,
                chunk_text: chunk.text.clone(),
            });
            texts.push(chunk.text);
        }
    }

    if texts.is_empty() {
        return Ok(());
    }

    progress(format!("embedding {} chunks for {name}@{version}", texts.len()));
    let model = state.provider.model().to_string();
    let embeddings = state
        .provider
        .embed_all(&texts, &model, |done, total| {
            progress(format!("embedded {done}/{total} chunks"));
        })
        .await?;

    let records: Vec<EmbeddingRecord> = metas
        .iter()
        .zip(&embeddings)
        .map(|(meta, vector)| EmbeddingRecord {
            content_hash: meta.content_hash.clone(),
            chunk_text: meta.chunk_text.clone(),
            chunk_index: meta.chunk_index,
            vector: vector.clone(),
        })
        .collect();
    state.db.insert_embeddings(&records)?;

    progress(format!("generating backlinks for {name}@{version}"));
    let mut seen: std::collections::HashSet<&str> = std::collections::HashSet::new();
    for (meta, vector) in metas.iter().zip(&embeddings) {
        // Only the summary chunk feeds backlinks; it is the most
        // representative of the item's overall semantics.
        if meta.chunk_index != 0 || !seen.insert(meta.content_hash.as_str()) {
            continue;
        }

        let similar = match state.db.find_similar_content(vector, 0.5, 20, &meta.content_hash) {
            Ok(similar) => similar,
            Err(e) => {
                tracing::warn!("backlink search failed for hash {}: {e}", meta.content_hash);
                continue;
            }
        };
        for hit in similar {
            if let Err(e) =
                state
                    .db
                    .upsert_backlink(&meta.content_hash, &hit.content_hash, hit.similarity)
            {
                tracing::warn!("failed to store backlink: {e}");
            }
        }
    }

    Ok(())
}
