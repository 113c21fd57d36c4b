//! Keyed coalescing of concurrent work.
//!
//! All callers that arrive with the same key while a call is in flight
//! share the first caller's result; the entry is dropped once the work
//! completes so a later call runs fresh.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell};

pub struct Singleflight<T> {
    inflight: Mutex<HashMap<String, Arc<OnceCell<T>>>>,
}

impl<T: Clone> Default for Singleflight<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Singleflight<T> {
    pub fn new() -> Self {
        Self { inflight: Mutex::new(HashMap::new()) }
    }

    /// Runs `work` for the key, or waits for the in-flight call and shares
    /// its result.
    pub async fn run<F, Fut>(&self, key: &str, work: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let cell = {
            let mut map = self.inflight.lock().await;
            map.entry(key.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let value = cell.get_or_init(work).await.clone();

        // Only the cell that actually ran removes the entry; a racing
        // newer entry under the same key stays put.
        let mut map = self.inflight.lock().await;
        if let Some(existing) = map.get(key) {
            if Arc::ptr_eq(existing, &cell) {
                map.remove(key);
            }
        }

        value
    }
}
