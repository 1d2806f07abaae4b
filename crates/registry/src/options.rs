use std::sync::Arc;

use kstor_core::{config, CacheSizes};
use kstor_store::Storage;

/// Everything a kind registration needs from the server it is mounted into.
#[derive(Clone)]
pub struct RestOptions {
    pub storage: Arc<dyn Storage>,
    /// Key prefix for kinds whose prefix is configurable (no leading slash needed).
    pub resource_prefix: String,
    pub delete_collection_workers: usize,
    pub cache_sizes: CacheSizes,
    pub watch_queue_cap: usize,
}

impl RestOptions {
    pub fn new(storage: Arc<dyn Storage>, resource_prefix: &str) -> Self {
        Self {
            storage,
            resource_prefix: resource_prefix.to_string(),
            delete_collection_workers: 1,
            cache_sizes: CacheSizes::default(),
            watch_queue_cap: config::watch_queue_cap(),
        }
    }

    /// Workers, queue capacity and cache sizes from the `KSTOR_*` environment.
    pub fn from_env(storage: Arc<dyn Storage>, resource_prefix: &str) -> Self {
        Self {
            delete_collection_workers: config::delete_collection_workers(),
            cache_sizes: CacheSizes::from_env(),
            ..Self::new(storage, resource_prefix)
        }
    }

    pub fn with_cache_sizes(mut self, sizes: CacheSizes) -> Self {
        self.cache_sizes = sizes;
        self
    }

    pub fn with_delete_collection_workers(mut self, workers: usize) -> Self {
        self.delete_collection_workers = workers;
        self
    }

    pub fn with_watch_queue_cap(mut self, cap: usize) -> Self {
        self.watch_queue_cap = cap.max(1);
        self
    }
}
