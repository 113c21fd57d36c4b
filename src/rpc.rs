//! Request/response types for the daemon's socket API.

use serde::{Deserialize, Serialize};

/// Request body for POST /add-crates.
#[derive(Debug, Clone, Deserialize)]
pub struct AddCratesRequest {
    pub crates: Vec<CrateSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CrateSpec {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// Per-crate outcome of an indexing run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrateResult {
    pub name: String,
    pub version: String,
    pub items: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One NDJSON line streamed from /add-crates: either a progress message or
/// a final per-crate result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressLine {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<CrateResult>,
}

impl ProgressLine {
    pub fn progress(message: impl Into<String>) -> Self {
        Self { kind: "progress".to_string(), message: Some(message.into()), result: None }
    }

    pub fn result(result: CrateResult) -> Self {
        Self { kind: "result".to_string(), message: None, result: Some(result) }
    }
}

/// Request body for POST /search.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub crates: Vec<String>,
    #[serde(default)]
    pub threshold: Option<f32>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub rerank_instruction: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<DocResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocResult {
    pub uri: String,
    pub crate_name: String,
    pub crate_version: String,
    pub path: String,
    pub kind: String,
    pub score: f32,
    pub snippet: String,
}

/// Request body for POST /get-doc.
#[derive(Debug, Clone, Deserialize)]
pub struct GetDocRequest {
    #[serde(rename = "crate")]
    pub crate_name: String,
    #[serde(default)]
    pub version: String,
    pub path: String,
    #[serde(default)]
    pub fragment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetDocResponse {
    pub markdown: String,
}

/// Request body for POST /search-crates.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchCratesRequest {
    pub query: String,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchCratesResponse {
    pub results: Vec<CrateSearchResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrateSearchResult {
    pub name: String,
    pub description: String,
    pub max_version: String,
    pub downloads: u64,
    pub semantic: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indexed_version: Option<String>,
}

/// Response body for GET /status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub crates: Vec<CrateStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrateStatus {
    pub name: String,
    pub version: String,
    pub processed: bool,
}
