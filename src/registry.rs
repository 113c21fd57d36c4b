//! Upstream registry access: rustdoc JSON downloads and crate name search.

use serde::Deserialize;

use crate::error::{Error, Result};

const USER_AGENT: &str = concat!("docdex/", env!("CARGO_PKG_VERSION"));

pub struct RegistryClient {
    http: reqwest::Client,
    docs_base_url: String,
    registry_base_url: String,
}

/// One crate from a registry name search.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryCrate {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub max_version: String,
    #[serde(default)]
    pub downloads: u64,
}

#[derive(Deserialize)]
struct RegistrySearchResponse {
    crates: Vec<RegistryCrate>,
}

impl RegistryClient {
    pub fn new(docs_base_url: &str, registry_base_url: &str) -> Self {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(std::time::Duration::from_secs(10))
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .expect("building registry HTTP client");
        Self {
            http,
            docs_base_url: docs_base_url.trim_end_matches('/').to_string(),
            registry_base_url: registry_base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Downloads and decompresses rustdoc JSON. The registry resolves the
    /// "latest" version tag via redirect; the payload itself reports the
    /// real version.
    pub async fn fetch_rustdoc(&self, name: &str, version: &str) -> Result<Vec<u8>> {
        let version = if version.is_empty() { "latest" } else { version };
        let url = format!("{}/crate/{name}/{version}/json", self.docs_base_url);

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Provider(format!("fetching {url}: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::NotFound(format!("{name}@{version} on the docs registry")));
        }
        if !status.is_success() {
            return Err(Error::Provider(format!(
                "docs registry returned {status} for {name}/{version}"
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Provider(format!("reading rustdoc payload: {e}")))?;

        // Payloads arrive zstd-compressed.
        zstd::decode_all(body.as_ref())
            .map_err(|e| Error::DataCorruption(format!("decompressing rustdoc JSON: {e}")))
    }

    /// Searches the crate registry by name/keyword.
    pub async fn search_crates(&self, query: &str, limit: usize) -> Result<Vec<RegistryCrate>> {
        let limit = if limit == 0 { 20 } else { limit };
        let url = format!("{}/api/v1/crates", self.registry_base_url);

        let response = self
            .http
            .get(&url)
            .query(&[("q", query), ("per_page", &limit.to_string())])
            .send()
            .await
            .map_err(|e| Error::Provider(format!("searching crate registry: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Provider(format!("crate registry returned {status}")));
        }

        let parsed: RegistrySearchResponse = response
            .json()
            .await
            .map_err(|e| Error::Provider(format!("decoding registry response: {e}")))?;
        Ok(parsed.crates)
    }
}
