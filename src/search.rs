//! The query engine: embed the query, fan out through the ANN, enrich via
//! the backlink graph, rerank the survivors, attribute crates.
//!
//! Candidates are tracked by content hash so identical docs across crate
//! versions deduplicate; a representative item is picked per hash at
//! resolution time, preferring crates the caller scoped to.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::db::{HashHit, ItemRow};
use crate::error::Result;
use crate::markdown;
use crate::rpc::DocResult;
use crate::state::DaemonState;

pub const DEFAULT_THRESHOLD: f32 = 0.3;
pub const DEFAULT_LIMIT: usize = 20;

const DECAY: f32 = 0.3;
const BACKLINK_MIN_SIMILARITY: f32 = 0.3;
const BFS_MAX_DEPTH: usize = 3;
const BFS_MAX_QUEUE: usize = 500;

/// Semantic search over the indexed corpus.
pub async fn search(
    state: &DaemonState,
    query: &str,
    crate_names: &[String],
    threshold: f32,
    limit: usize,
    rerank_instruction: Option<&str>,
) -> Result<Vec<DocResult>> {
    tracing::info!(
        "search: query={query:?} threshold={threshold:.2} limit={limit} crates={crate_names:?}"
    );

    let query_embedding = state
        .provider
        .embed_single(query, state.provider.model())
        .await?;

    let crate_ids = state.db.crate_ids_by_name(crate_names)?;
    // A non-empty filter that matches nothing scopes the search to nothing.
    if !crate_names.is_empty() && crate_ids.is_empty() {
        return Ok(Vec::new());
    }

    let direct = state
        .db
        .vector_search(&query_embedding, threshold, limit * 3, &crate_ids)?;
    tracing::debug!("search: vector search returned {} direct results", direct.len());

    let candidates = expand_backlinks(&direct, threshold, |hash| {
        state.db.get_backlinks(hash, BACKLINK_MIN_SIMILARITY)
    });

    let mut sorted: Vec<(String, f32)> = candidates.into_iter().collect();
    sorted.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    sorted.truncate(limit * 3);
    if sorted.is_empty() {
        return Ok(Vec::new());
    }

    // Resolve a representative item per hash and build rerank documents.
    let mut resolved: Vec<(ItemRow, f32)> = Vec::new();
    let mut documents: Vec<String> = Vec::new();
    for (hash, score) in &sorted {
        let Some(item) = state.db.get_item_for_hash(hash, &crate_ids)? else {
            continue;
        };
        let mut document = item.path.clone();
        if !item.signature.is_empty() {
            document.push('\n');
            document.push_str(&item.signature);
        }
        if let Ok(body) = state.cas.read(hash) {
            document.push('\n');
            document.push_str(truncate_chars(&body, 500));
        }
        resolved.push((item, *score));
        documents.push(document);
    }
    if resolved.is_empty() {
        return Ok(Vec::new());
    }

    let item_ids: Vec<i64> = resolved.iter().map(|(item, _)| item.id).collect();
    let crate_map = state.db.crates_for_items(&item_ids).unwrap_or_default();

    let build = |item: &ItemRow, score: f32| -> DocResult {
        let (crate_name, crate_version) = crate_map
            .get(&item.id)
            .map(|c| (c.name.clone(), c.version.clone()))
            .unwrap_or_default();
        DocResult {
            uri: format!("doc://{crate_name}/{crate_version}/{}", item.path),
            crate_name,
            crate_version,
            path: item.path.clone(),
            kind: item.kind.clone(),
            score,
            snippet: snippet_for_item(state, item),
        }
    };

    // Rerank; provider failure degrades to the vector-ranked order.
    match state
        .provider
        .rerank(
            query,
            &documents,
            state.provider.rerank_model(),
            limit,
            rerank_instruction,
        )
        .await
    {
        Ok(reranked) if !reranked.is_empty() => {
            let mut results = Vec::new();
            for entry in reranked {
                let Some((item, _)) = resolved.get(entry.original_index) else {
                    continue;
                };
                results.push(build(item, entry.relevance_score));
            }
            Ok(results)
        }
        Ok(_) => Ok(resolved
            .iter()
            .take(limit)
            .map(|(item, score)| build(item, *score))
            .collect()),
        Err(e) => {
            tracing::warn!("search: reranking failed (falling back to vector scores): {e}");
            Ok(resolved
                .iter()
                .take(limit)
                .map(|(item, score)| build(item, *score))
                .collect())
        }
    }
}

/// BFS through the backlink graph with dampened score propagation.
///
/// Each neighbor's score is `parent × (DECAY + (1 - DECAY) × similarity)`;
/// propagation stops below the search threshold, beyond depth 3, or when
/// the queue hits its cap. The result is always a superset of `direct`.
fn expand_backlinks(
    direct: &[HashHit],
    threshold: f32,
    backlinks: impl Fn(&str) -> Result<Vec<HashHit>>,
) -> HashMap<String, f32> {
    let mut candidates: HashMap<String, f32> = HashMap::new();
    let mut visited: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<(String, f32, usize)> = VecDeque::new();

    for hit in direct {
        candidates.insert(hit.content_hash.clone(), hit.similarity);
        visited.insert(hit.content_hash.clone());
        queue.push_back((hit.content_hash.clone(), hit.similarity, 0));
    }

    while let Some((hash, score, depth)) = queue.pop_front() {
        if depth >= BFS_MAX_DEPTH {
            continue;
        }

        let neighbors = match backlinks(&hash) {
            Ok(neighbors) => neighbors,
            Err(e) => {
                tracing::warn!("search: backlink lookup failed for {hash}: {e}");
                continue;
            }
        };

        for neighbor in neighbors {
            let propagated = score * (DECAY + (1.0 - DECAY) * neighbor.similarity);
            if propagated <= threshold {
                continue;
            }

            let current = candidates.get(&neighbor.content_hash).copied();
            if current.is_none() || propagated > current.unwrap() {
                candidates.insert(neighbor.content_hash.clone(), propagated);
            }

            if !visited.contains(&neighbor.content_hash) && queue.len() < BFS_MAX_QUEUE {
                visited.insert(neighbor.content_hash.clone());
                queue.push_back((neighbor.content_hash, propagated, depth + 1));
            }
        }
    }

    candidates
}

fn snippet_for_item(state: &DaemonState, item: &ItemRow) -> String {
    let Some(hash) = &item.content_hash else {
        return String::new();
    };
    let Ok(body) = state.cas.read(hash) else {
        return String::new();
    };
    let link_map: HashMap<String, String> = if item.doc_links.is_empty() {
        HashMap::new()
    } else {
        serde_json::from_str(&item.doc_links).unwrap_or_default()
    };
    let rewritten = markdown::rewrite_links(&body, &link_map);
    let snippet = truncate_chars(&rewritten, 200);
    if snippet.len() < rewritten.len() {
        format!("{snippet}...")
    } else {
        snippet.to_string()
    }
}

/// Truncates to at most `max_bytes`, backing off to a UTF-8 boundary.
fn truncate_chars(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
