//! The daemon: an axum router served over a local Unix socket.
//!
//! Every request re-arms an idle timer; when it fires the daemon performs
//! the same orderly shutdown as POST /shutdown (ANN snapshot saved, socket
//! unlinked). `/add-crates` streams NDJSON progress lines and abandons the
//! remainder of the batch if the client disconnects.

pub mod singleflight;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::net::UnixListener;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;

use crate::db::CrateRow;
use crate::error::{Error, Result};
use crate::index;
use crate::markdown;
use crate::rpc::*;
use crate::rustdoc::{self, fragments};
use crate::search;
use crate::state::DaemonState;

/// Error wrapper converting the core taxonomy into HTTP responses.
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.0.status();
        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, Json(body)).into_response()
    }
}

pub fn router(state: DaemonState) -> Router {
    Router::new()
        .route("/add-crates", post(handle_add_crates))
        .route("/search", post(handle_search))
        .route("/get-doc", post(handle_get_doc))
        .route("/status", get(handle_status))
        .route("/search-crates", post(handle_search_crates))
        .route("/clear-cache", post(handle_clear_cache))
        .route("/shutdown", post(handle_shutdown))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            touch_activity,
        ))
        .with_state(state)
}

/// Binds the socket and serves until shutdown is requested or the idle
/// timer fires.
pub async fn run(state: DaemonState) -> anyhow::Result<()> {
    let socket_path = state.config.socket_path.clone();
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    // A stale socket from a crashed daemon would block the bind.
    let _ = std::fs::remove_file(&socket_path);

    let listener = UnixListener::bind(&socket_path)?;
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&socket_path, std::fs::Permissions::from_mode(0o600))?;
    }

    let expiration = Duration::from_secs(state.config.expiration_secs.max(1));
    tracing::info!(
        "daemon: listening on {} (expires after {:?} of inactivity)",
        socket_path.display(),
        expiration
    );

    tokio::spawn(idle_watchdog(state.clone(), expiration));

    let shutdown = state.shutdown.clone();
    let app = router(state.clone());
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.notified().await })
        .await?;

    state.db.save_ann();
    let _ = std::fs::remove_file(&socket_path);
    tracing::info!("daemon: stopped");
    Ok(())
}

async fn idle_watchdog(state: DaemonState, expiration: Duration) {
    loop {
        let deadline = *state.last_activity.lock() + expiration;
        let now = Instant::now();
        if now >= deadline {
            tracing::info!("daemon: expiring due to inactivity");
            state.shutdown.notify_one();
            return;
        }
        tokio::time::sleep(deadline - now).await;
    }
}

async fn touch_activity(
    State(state): State<DaemonState>,
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    state.touch();
    let response = next.run(request).await;
    state.touch();
    response
}

// --- Handlers ---

async fn handle_add_crates(
    State(state): State<DaemonState>,
    Json(req): Json<AddCratesRequest>,
) -> Response {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<Bytes>();

    tokio::spawn(async move {
        for spec in req.crates {
            let progress_tx = tx.clone();
            let progress = move |message: String| {
                tracing::info!("daemon: {message}");
                let _ = progress_tx.send(encode_line(&ProgressLine::progress(message)));
            };

            let result =
                index::add_crate(&state, &spec.name, spec.version.as_deref(), &progress).await;

            if tx.send(encode_line(&ProgressLine::result(result))).is_err() {
                tracing::info!("daemon: client disconnected, abandoning batch");
                return;
            }
        }
    });

    let stream = UnboundedReceiverStream::new(rx).map(Ok::<_, std::convert::Infallible>);
    (
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(stream),
    )
        .into_response()
}

fn encode_line(line: &ProgressLine) -> Bytes {
    let mut bytes = serde_json::to_vec(line).unwrap_or_default();
    bytes.push(b'\n');
    Bytes::from(bytes)
}

async fn handle_search(
    State(state): State<DaemonState>,
    Json(req): Json<SearchRequest>,
) -> std::result::Result<Json<SearchResponse>, ApiError> {
    let threshold = match req.threshold {
        Some(t) if t > 0.0 => t,
        _ => search::DEFAULT_THRESHOLD,
    };
    let limit = match req.limit {
        Some(l) if l > 0 => l,
        _ => search::DEFAULT_LIMIT,
    };

    let results = search::search(
        &state,
        &req.query,
        &req.crates,
        threshold,
        limit,
        req.rerank_instruction.as_deref(),
    )
    .await?;

    Ok(Json(SearchResponse { results }))
}

/// Looks up a crate, resolving "latest" and auto-indexing on a miss.
async fn resolve_or_fetch_crate(state: &DaemonState, name: &str, version: &str) -> Result<CrateRow> {
    if version == "latest" || version.is_empty() {
        if let Some(existing) = state.db.get_latest_crate(name)? {
            let _ = state.db.touch_crate(existing.id);
            return Ok(existing);
        }
    } else if let Some(existing) = state.db.get_crate(name, version)? {
        if existing.processed_at.is_some() {
            let _ = state.db.touch_crate(existing.id);
            return Ok(existing);
        }
    }

    // Not indexed yet: run the pipeline, logging progress instead of
    // streaming it.
    let progress = |message: String| tracing::info!("auto-index: {message}");
    let result = index::add_crate(state, name, Some(version), &progress).await;
    if let Some(error) = result.error {
        return Err(Error::Provider(error));
    }

    state
        .db
        .get_crate(name, &result.version)?
        .ok_or_else(|| Error::NotFound(format!("{name}@{}", result.version)))
}

async fn handle_get_doc(
    State(state): State<DaemonState>,
    Json(req): Json<GetDocRequest>,
) -> std::result::Result<Json<GetDocResponse>, ApiError> {
    if req.path.is_empty() {
        return Err(Error::InvalidInput("missing item path".to_string()).into());
    }

    let mut krate = resolve_or_fetch_crate(&state, &req.crate_name, &req.version).await?;
    let mut crate_name = req.crate_name.clone();
    let mut path = req.path.clone();

    let mut item = state.db.get_item_by_path(krate.id, &path)?;

    // Unknown path: it may be a re-export into another crate.
    if item.is_none() {
        if let Some((source_crate, source_path)) = state.db.resolve_reexport(krate.id, &path)? {
            match resolve_or_fetch_crate(&state, &source_crate, "latest").await {
                Ok(source) => {
                    if let Some(found) = state.db.get_item_by_path(source.id, &source_path)? {
                        krate = source;
                        crate_name = source_crate;
                        path = source_path;
                        item = Some(found);
                    }
                }
                Err(e) => {
                    tracing::warn!("re-export fetch for {source_crate} failed: {e}");
                }
            }
        }
    }

    let Some(item) = item else {
        return Err(Error::NotFound(format!(
            "item {path} in {crate_name}@{}",
            krate.version
        ))
        .into());
    };

    if let Some(fragment) = req.fragment.as_deref().filter(|f| !f.is_empty()) {
        let markdown = render_fragment(&state, &crate_name, &krate, &item, fragment).await?;
        return Ok(Json(GetDocResponse { markdown }));
    }

    // Full item: rendered markdown with optional fragment front matter.
    let mut content = format!("# {path}\n\n**Kind:** {}\n\n", item.kind);
    if !item.signature.is_empty() {
        content.push_str(&format!("```rust\n{}\n```\n\n", item.signature));
    }
    if let Some(hash) = &item.content_hash {
        if let Ok(body) = state.cas.read(hash) {
            let link_map: HashMap<String, String> = if item.doc_links.is_empty() {
                HashMap::new()
            } else {
                serde_json::from_str(&item.doc_links).unwrap_or_default()
            };
            content.push_str(&markdown::rewrite_links(&body, &link_map));
            content.push('\n');
        }
    }

    if !item.fragment_names.is_empty() {
        if let Ok(names) = serde_json::from_str::<Vec<String>>(&item.fragment_names) {
            if !names.is_empty() {
                let uris: HashMap<String, String> = names
                    .into_iter()
                    .map(|name| {
                        let uri = format!(
                            "doc://{crate_name}/{}/{path}#{name}",
                            krate.version
                        );
                        (name, uri)
                    })
                    .collect();
                content = markdown::add_front_matter(&content, &uris);
            }
        }
    }

    Ok(Json(GetDocResponse { markdown: content }))
}

/// Regenerates fragments from the cached parse, re-fetching the payload
/// from the registry when the cache is gone.
async fn render_fragment(
    state: &DaemonState,
    crate_name: &str,
    krate: &CrateRow,
    item: &crate::db::ItemRow,
    fragment: &str,
) -> Result<String> {
    let doc = match state.cached_crate(crate_name, &krate.version) {
        Some(doc) => doc,
        None => {
            let data = state
                .registry
                .fetch_rustdoc(crate_name, &krate.version)
                .await?;
            if let Err(e) = rustdoc::cache::save(
                &state.config.json_cache_dir(),
                &data,
                crate_name,
                &krate.version,
            ) {
                tracing::warn!("failed to re-cache rustdoc for {crate_name}: {e}");
            }
            let (doc, _) =
                rustdoc::parse(&data, crate_name, &krate.version, &state.config.docs_host())?;
            let doc = Arc::new(doc);
            state.insert_cached_crate(crate_name, &krate.version, doc.clone());
            doc
        }
    };

    let Some(rustdoc_item) = doc.index.get(&item.source_id) else {
        return Err(Error::NotFound(format!(
            "item {} in the rustdoc cache for {crate_name}@{}",
            item.path, krate.version
        )));
    };

    let generated =
        fragments::generate_fragments(rustdoc_item, &doc, crate_name, &krate.version);
    generated
        .into_iter()
        .find(|f| f.name == fragment)
        .map(|f| f.content)
        .ok_or_else(|| Error::NotFound(format!("fragment #{fragment} for {}", item.path)))
}

async fn handle_status(
    State(state): State<DaemonState>,
) -> std::result::Result<Json<StatusResponse>, ApiError> {
    let crates = state
        .db
        .list_crates()?
        .into_iter()
        .map(|c| CrateStatus {
            name: c.name,
            version: c.version,
            processed: c.processed_at.is_some(),
        })
        .collect();
    Ok(Json(StatusResponse { crates }))
}

async fn handle_search_crates(
    State(state): State<DaemonState>,
    Json(req): Json<SearchCratesRequest>,
) -> std::result::Result<Json<SearchCratesResponse>, ApiError> {
    if req.query.is_empty() {
        return Err(Error::InvalidInput("missing query".to_string()).into());
    }
    let limit = req.limit.filter(|l| *l > 0).unwrap_or(20);

    let found = state.registry.search_crates(&req.query, limit).await?;
    let names: Vec<String> = found.iter().map(|c| c.name.clone()).collect();
    let indexed = state.db.indexed_versions(&names)?;

    let results = found
        .into_iter()
        .map(|c| {
            let indexed_version = indexed.get(&c.name).cloned();
            CrateSearchResult {
                semantic: indexed_version.is_some(),
                indexed_version,
                name: c.name,
                description: c.description.unwrap_or_default(),
                max_version: c.max_version,
                downloads: c.downloads,
            }
        })
        .collect();

    Ok(Json(SearchCratesResponse { results }))
}

async fn handle_clear_cache(State(state): State<DaemonState>) -> Json<serde_json::Value> {
    state.clear_version_cache();
    tracing::info!("daemon: version cache cleared");
    Json(serde_json::json!({ "status": "ok" }))
}

async fn handle_shutdown(State(state): State<DaemonState>) -> Json<serde_json::Value> {
    tokio::spawn(async move {
        // Give the response a moment to flush before tearing down.
        tokio::time::sleep(Duration::from_millis(100)).await;
        state.shutdown.notify_one();
    });
    Json(serde_json::json!({ "status": "shutting down" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn api_error_shapes_response() {
        let response = ApiError(Error::NotFound("serde@9.9.9".into())).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = ApiError(Error::InvalidInput("bad".into())).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn ndjson_lines_end_with_newline() {
        let bytes = encode_line(&ProgressLine::progress("hello"));
        assert!(bytes.ends_with(b"\n"));
        let parsed: ProgressLine =
            serde_json::from_slice(&bytes[..bytes.len() - 1]).unwrap();
        assert_eq!(parsed.kind, "progress");
    }
}
