use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;

use crate::cas::Cas;
use crate::config::Config;
use crate::daemon::singleflight::Singleflight;
use crate::db::Database;
use crate::provider::ProviderClient;
use crate::registry::RegistryClient;
use crate::rpc::CrateResult;
use crate::rustdoc::{self, CrateDoc};

const VERSION_CACHE_TTL: Duration = Duration::from_secs(600);

/// One resolved (or failed) "latest" lookup.
#[derive(Debug, Clone)]
pub struct VersionCacheEntry {
    pub version: String,
    pub not_found: bool,
    expiry: Instant,
}

/// Shared daemon state. The daemon exclusively owns the catalog, the CAS
/// directory, and the ANN file; handlers reach all of them through this
/// object, which keeps tests hermetic.
#[derive(Clone)]
pub struct DaemonState {
    pub config: Config,
    pub db: Arc<Database>,
    pub cas: Arc<Cas>,
    pub provider: Arc<ProviderClient>,
    pub registry: Arc<RegistryClient>,
    /// crate name → resolved "latest" version (or a cached 404).
    version_cache: Arc<RwLock<HashMap<String, VersionCacheEntry>>>,
    /// `name@version` → parsed rustdoc, backed by the on-disk json cache.
    crate_cache: Arc<RwLock<HashMap<String, Arc<CrateDoc>>>>,
    /// At-most-one ingestion per `name@version`.
    pub ingest_group: Arc<Singleflight<CrateResult>>,
    /// Refreshed by every request; the idle watchdog reads it.
    pub last_activity: Arc<Mutex<Instant>>,
    pub shutdown: Arc<Notify>,
}

impl DaemonState {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.cache_dir)?;
        std::fs::create_dir_all(config.cas_dir())?;
        std::fs::create_dir_all(config.json_cache_dir())?;

        let db = Database::open(&config.db_path())?;
        let cas = Cas::new(config.cas_dir());
        let provider = ProviderClient::new(config.provider.clone());
        let registry = RegistryClient::new(&config.docs_base_url, &config.registry_base_url);

        Ok(Self {
            config,
            db: Arc::new(db),
            cas: Arc::new(cas),
            provider: Arc::new(provider),
            registry: Arc::new(registry),
            version_cache: Arc::new(RwLock::new(HashMap::new())),
            crate_cache: Arc::new(RwLock::new(HashMap::new())),
            ingest_group: Arc::new(Singleflight::new()),
            last_activity: Arc::new(Mutex::new(Instant::now())),
            shutdown: Arc::new(Notify::new()),
        })
    }

    /// Marks request activity, re-arming the idle timer.
    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    // --- Version cache ---

    pub fn cached_version(&self, name: &str) -> Option<VersionCacheEntry> {
        let cache = self.version_cache.read();
        let entry = cache.get(name)?;
        if Instant::now() >= entry.expiry {
            return None;
        }
        Some(entry.clone())
    }

    pub fn set_cached_version(&self, name: &str, version: &str, not_found: bool) {
        self.version_cache.write().insert(
            name.to_string(),
            VersionCacheEntry {
                version: version.to_string(),
                not_found,
                expiry: Instant::now() + VERSION_CACHE_TTL,
            },
        );
    }

    pub fn clear_version_cache(&self) {
        self.version_cache.write().clear();
    }

    // --- Parsed-crate cache ---

    /// Cached parse of a crate's rustdoc payload: in-memory first, then the
    /// on-disk json cache.
    pub fn cached_crate(&self, name: &str, version: &str) -> Option<Arc<CrateDoc>> {
        let key = format!("{name}@{version}");
        if let Some(doc) = self.crate_cache.read().get(&key) {
            return Some(doc.clone());
        }

        let doc = rustdoc::cache::load(&self.config.json_cache_dir(), name, version).ok()?;
        let doc = Arc::new(doc);
        self.crate_cache.write().insert(key, doc.clone());
        Some(doc)
    }

    pub fn insert_cached_crate(&self, name: &str, version: &str, doc: Arc<CrateDoc>) {
        self.crate_cache
            .write()
            .insert(format!("{name}@{version}"), doc);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_state() -> (tempfile::TempDir, DaemonState) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.cache_dir = dir.path().to_path_buf();
        config.socket_path = dir.path().join("daemon.sock");
        let state = DaemonState::new(config).unwrap();
        (dir, state)
    }

    #[test]
    fn version_cache_round_trip() {
        let (_dir, state) = test_state();
        assert!(state.cached_version("serde").is_none());

        state.set_cached_version("serde", "1.0.210", false);
        let entry = state.cached_version("serde").unwrap();
        assert_eq!(entry.version, "1.0.210");
        assert!(!entry.not_found);

        state.set_cached_version("ghost", "", true);
        assert!(state.cached_version("ghost").unwrap().not_found);

        state.clear_version_cache();
        assert!(state.cached_version("serde").is_none());
    }

    #[test]
    fn crate_cache_falls_back_to_disk() {
        let (_dir, state) = test_state();
        assert!(state.cached_crate("serde", "1.0.0").is_none());

        let payload = serde_json::json!({
            "root": 0, "crate_version": "1.0.0", "index": {}, "paths": {},
            "external_crates": {}, "format_version": 37
        });
        rustdoc::cache::save(
            &state.config.json_cache_dir(),
            &serde_json::to_vec(&payload).unwrap(),
            "serde",
            "1.0.0",
        )
        .unwrap();

        let doc = state.cached_crate("serde", "1.0.0").unwrap();
        assert_eq!(doc.crate_version.as_deref(), Some("1.0.0"));
        // Second hit comes from memory.
        assert!(state.cached_crate("serde", "1.0.0").is_some());
    }
}
