use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Cache root: database, ANN snapshot, CAS blobs, parsed-crate cache, log.
    pub cache_dir: PathBuf,
    /// Unix socket the daemon listens on.
    pub socket_path: PathBuf,
    /// Embedding/reranking provider configuration.
    pub provider: ProviderConfig,
    /// Base URL of the documentation registry (rustdoc JSON source).
    pub docs_base_url: String,
    /// Base URL of the crate registry API (crate name search).
    pub registry_base_url: String,
    /// Seconds of inactivity before the daemon shuts itself down.
    pub expiration_secs: u64,
}

/// Configuration for the remote embedding/rerank API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Base URL for the provider API.
    pub base_url: String,
    /// API key sent as a bearer token.
    pub api_key: Option<String>,
    /// Embedding model name.
    pub model: String,
    /// Rerank model name.
    pub rerank_model: String,
    /// Texts per embedding request.
    pub batch_size: usize,
    /// Delay between embedding batches in milliseconds.
    pub batch_delay_ms: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.voyageai.com/v1".to_string(),
            api_key: None,
            model: "voyage-3.5".to_string(),
            rerank_model: "rerank-lite-1".to_string(),
            batch_size: 50,
            batch_delay_ms: 200,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            socket_path: default_socket_path(),
            provider: ProviderConfig::default(),
            docs_base_url: "https://docs.rs".to_string(),
            registry_base_url: "https://crates.io".to_string(),
            expiration_secs: 600,
        }
    }
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("docdex")
}

fn default_socket_path() -> PathBuf {
    dirs::runtime_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("docdex")
        .join("daemon.sock")
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("DOCDEX_CACHE_DIR") {
            config.cache_dir = PathBuf::from(dir);
        }
        if let Ok(path) = std::env::var("DOCDEX_SOCKET") {
            config.socket_path = PathBuf::from(path);
        }
        if let Ok(url) = std::env::var("DOCDEX_PROVIDER_URL") {
            config.provider.base_url = url;
        }
        if let Ok(key) = std::env::var("DOCDEX_API_KEY") {
            config.provider.api_key = Some(key);
        }
        if let Ok(model) = std::env::var("DOCDEX_EMBED_MODEL") {
            config.provider.model = model;
        }
        if let Ok(model) = std::env::var("DOCDEX_RERANK_MODEL") {
            config.provider.rerank_model = model;
        }
        if let Ok(val) = std::env::var("DOCDEX_EMBED_BATCH_SIZE") {
            if let Ok(v) = val.parse() {
                config.provider.batch_size = v;
            }
        }
        if let Ok(url) = std::env::var("DOCDEX_DOCS_URL") {
            config.docs_base_url = url;
        }
        if let Ok(url) = std::env::var("DOCDEX_REGISTRY_URL") {
            config.registry_base_url = url;
        }
        if let Ok(val) = std::env::var("DOCDEX_EXPIRATION_SECS") {
            if let Ok(v) = val.parse() {
                config.expiration_secs = v;
            }
        }

        config
    }

    pub fn db_path(&self) -> PathBuf {
        self.cache_dir.join("db.db")
    }

    pub fn cas_dir(&self) -> PathBuf {
        self.cache_dir.join("cas")
    }

    pub fn json_cache_dir(&self) -> PathBuf {
        self.cache_dir.join("json")
    }

    pub fn log_path(&self) -> PathBuf {
        self.cache_dir.join("daemon.log")
    }

    /// Host part of the docs registry URL, used to recognize doc-site links
    /// inside markdown.
    pub fn docs_host(&self) -> String {
        self.docs_base_url
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_end_matches('/')
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_derive_from_cache_dir() {
        let mut config = Config::default();
        config.cache_dir = PathBuf::from("/tmp/docdex-test");
        assert_eq!(config.db_path(), PathBuf::from("/tmp/docdex-test/db.db"));
        assert_eq!(config.cas_dir(), PathBuf::from("/tmp/docdex-test/cas"));
        assert_eq!(config.json_cache_dir(), PathBuf::from("/tmp/docdex-test/json"));
    }

    #[test]
    fn docs_host_strips_scheme() {
        let config = Config::default();
        assert_eq!(config.docs_host(), "docs.rs");
    }
}
