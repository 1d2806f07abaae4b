//! Watch cache sizing per resource.
//!
//! Entries use the `resource#size` form, e.g. `clusterrolebindings#200`. A size of zero
//! or below disables the watch cache for that resource.

use std::collections::HashMap;

use tracing::warn;

use crate::{StoreError, StoreResult};

pub const DEFAULT_WATCH_CACHE_SIZE: i64 = 100;

pub const CLUSTER_ROLE_BINDINGS: &str = "clusterrolebindings";
pub const STORAGE_CLASSES: &str = "storageclasses";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSizes {
    default_size: i64,
    sizes: HashMap<String, i64>,
}

impl Default for CacheSizes {
    fn default() -> Self { Self::new(DEFAULT_WATCH_CACHE_SIZE) }
}

impl CacheSizes {
    pub fn new(default_size: i64) -> Self {
        Self { default_size, sizes: HashMap::new() }
    }

    pub fn with_size(mut self, resource: &str, size: i64) -> Self {
        self.sizes.insert(resource.to_string(), size);
        self
    }

    /// Apply `resource#size` entries on top of the current values.
    pub fn apply_entries<'a, I>(mut self, entries: I) -> StoreResult<Self>
    where
        I: IntoIterator<Item = &'a str>,
    {
        for entry in entries {
            let entry = entry.trim();
            if entry.is_empty() { continue; }
            let (resource, size) = entry
                .split_once('#')
                .ok_or_else(|| StoreError::InvalidKey(format!("invalid watch cache size entry {:?} (expect resource#size)", entry)))?;
            let size: i64 = size
                .trim()
                .parse()
                .map_err(|_| StoreError::InvalidKey(format!("invalid watch cache size {:?} for {}", size, resource)))?;
            self.sizes.insert(resource.trim().to_ascii_lowercase(), size);
        }
        Ok(self)
    }

    /// Build from `KSTOR_DEFAULT_WATCH_CACHE_SIZE` and `KSTOR_WATCH_CACHE_SIZES`.
    /// Malformed entries are logged and skipped.
    pub fn from_env() -> Self {
        let default_size = crate::config::env_parse("KSTOR_DEFAULT_WATCH_CACHE_SIZE", DEFAULT_WATCH_CACHE_SIZE);
        let base = Self::new(default_size);
        let Ok(raw) = std::env::var("KSTOR_WATCH_CACHE_SIZES") else { return base };
        let mut out = base;
        for entry in raw.split(',') {
            match out.clone().apply_entries([entry]) {
                Ok(next) => out = next,
                Err(e) => warn!(entry = %entry, error = %e, "ignoring watch cache size entry"),
            }
        }
        out
    }

    pub fn size_for(&self, resource: &str) -> i64 {
        self.sizes.get(resource).copied().unwrap_or(self.default_size)
    }

    /// Explicit per-resource size, ignoring the default.
    pub fn override_for(&self, resource: &str) -> Option<i64> { self.sizes.get(resource).copied() }

    pub fn is_enabled(&self, resource: &str) -> bool { self.size_for(resource) > 0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_unknown_resources() {
        let c = CacheSizes::default();
        assert_eq!(c.size_for(CLUSTER_ROLE_BINDINGS), 100);
        assert!(c.is_enabled("anything"));
    }

    #[test]
    fn entries_override_and_disable() {
        let c = CacheSizes::default().apply_entries(["clusterrolebindings#200", " StorageClasses#0 ", "nodes#-1"]).unwrap();
        assert_eq!(c.size_for(CLUSTER_ROLE_BINDINGS), 200);
        assert_eq!(c.size_for(STORAGE_CLASSES), 0);
        assert!(!c.is_enabled(STORAGE_CLASSES));
        assert!(!c.is_enabled("nodes"));
        assert_eq!(c.override_for(CLUSTER_ROLE_BINDINGS), Some(200));
        assert_eq!(c.override_for("pods"), None);
    }

    #[test]
    fn malformed_entries_fail() {
        assert!(CacheSizes::default().apply_entries(["pods"]).is_err());
        assert!(CacheSizes::default().apply_entries(["pods#many"]).is_err());
    }
}
