//! Environment-driven defaults. Values are read once at construction and folded into
//! explicit config structs.

use std::str::FromStr;

pub fn env_parse<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name).ok().and_then(|s| s.trim().parse::<T>().ok()).unwrap_or(default)
}

pub fn delete_collection_workers() -> usize { env_parse("KSTOR_DELETE_COLLECTION_WORKERS", 1) }

pub fn watch_queue_cap() -> usize { env_parse("KSTOR_WATCH_QUEUE_CAP", 1024).max(1) }

pub fn memory_history_cap() -> usize { env_parse("KSTOR_MEMORY_HISTORY_CAP", 1000).max(1) }
