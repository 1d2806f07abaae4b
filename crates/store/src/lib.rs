//! kstor store: the storage engine contract, an in-memory engine, per-kind watch caches
//! and the generic typed store that every resource registration builds on.

#![forbid(unsafe_code)]

pub mod cacher;
pub mod memory;
mod predicate;
pub mod storage;
mod store;
mod strategy;
mod watch;

pub use cacher::{storage_with_cacher, Cacher};
pub use memory::MemoryStorage;
pub use predicate::SelectionPredicate;
pub use storage::{EventType, Filter, ListPage, ListResult, RawEvent, Storage, Versioned};
pub use store::{DeleteCollectionOutcome, Deleted, Store, StoreOptions};
pub use strategy::{labels_of, Strategy};
pub use watch::{WatchEvent, WatchHandle};
