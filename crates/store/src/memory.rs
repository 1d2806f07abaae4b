//! In-memory storage engine.
//!
//! One keyspace shared by every resource kind, ordered keys, a single revision counter,
//! and a bounded history of committed events for watch replay. Live events fan out
//! through a broadcast channel; subscription and replay happen under the same read lock
//! so a watcher never sees a gap or a duplicate between the two.

use std::collections::{BTreeMap, VecDeque};
use std::ops::Bound;
use std::sync::Arc;

use futures::StreamExt;
use kstor_core::{config, StoreError, StoreResult};
use serde_json::Value;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, warn};

use crate::storage::{
    decode_continue, encode_continue, EventStream, EventType, Filter, ListPage, ListResult, RawEvent, Storage, Versioned,
};

#[derive(Default)]
struct MemoryState {
    revision: u64,
    items: BTreeMap<String, Versioned>,
    history: VecDeque<RawEvent>,
    /// Version of the newest event evicted from `history`.
    compacted: u64,
}

pub struct MemoryStorage {
    state: RwLock<MemoryState>,
    events: broadcast::Sender<RawEvent>,
    history_cap: usize,
}

impl Default for MemoryStorage {
    fn default() -> Self { Self::new() }
}

impl MemoryStorage {
    /// Capacities from `KSTOR_MEMORY_HISTORY_CAP` and `KSTOR_WATCH_QUEUE_CAP`.
    pub fn new() -> Self { Self::with_capacity(config::memory_history_cap(), config::watch_queue_cap()) }

    pub fn with_capacity(history_cap: usize, watch_cap: usize) -> Self {
        let (events, _) = broadcast::channel(watch_cap.max(1));
        Self { state: RwLock::new(MemoryState::default()), events, history_cap: history_cap.max(1) }
    }

    pub fn new_shared() -> Arc<Self> { Arc::new(Self::new()) }

    pub async fn len(&self) -> usize { self.state.read().await.items.len() }

    fn commit(&self, state: &mut MemoryState, ev: RawEvent) {
        if state.history.len() >= self.history_cap {
            if let Some(old) = state.history.pop_front() {
                state.compacted = old.version;
            }
        }
        state.history.push_back(ev.clone());
        metrics::gauge!("memory_store_revision", ev.version as f64);
        // No receivers is fine: nobody is watching.
        let _ = self.events.send(ev);
    }
}

#[async_trait::async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, key: &str) -> StoreResult<Versioned> {
        let state = self.state.read().await;
        state.items.get(key).cloned().ok_or_else(|| StoreError::not_found(key))
    }

    async fn list(&self, prefix: &str, page: &ListPage, filter: Filter) -> StoreResult<ListResult> {
        let dir = format!("{}/", prefix.trim_end_matches('/'));
        let resume = match &page.continue_token {
            Some(token) => Some(decode_continue(token, prefix)?),
            None => None,
        };
        let limit = page.limit.filter(|l| *l > 0);

        let state = self.state.read().await;
        let lower = match resume.as_deref() {
            Some(last) => Bound::Excluded(last),
            None => Bound::Included(dir.as_str()),
        };
        let mut items: Vec<(String, Versioned)> = Vec::new();
        let mut more = false;
        for (k, v) in state.items.range::<str, _>((lower, Bound::Unbounded)) {
            if !k.starts_with(&dir) { break; }
            if !filter(&v.value) { continue; }
            if limit.map(|l| items.len() >= l).unwrap_or(false) {
                more = true;
                break;
            }
            items.push((k.clone(), v.clone()));
        }
        let continue_token = if more { items.last().map(|(k, _)| encode_continue(state.revision, k)) } else { None };
        debug!(prefix = %prefix, count = items.len(), more, "memory: list");
        Ok(ListResult { items, version: state.revision, continue_token })
    }

    async fn put(&self, key: &str, value: Value, expected: Option<u64>) -> StoreResult<u64> {
        let mut state = self.state.write().await;
        let prev = state.items.get(key).cloned();
        match (expected, &prev) {
            (Some(0), Some(_)) => return Err(StoreError::already_exists(key)),
            (Some(v), None) if v > 0 => return Err(StoreError::not_found(key)),
            (Some(v), Some(p)) if v > 0 && p.version != v => {
                return Err(StoreError::conflict(
                    key,
                    format!("the object has been modified; expected version {} but found {}", v, p.version),
                ));
            }
            _ => {}
        }
        state.revision += 1;
        let version = state.revision;
        state.items.insert(key.to_string(), Versioned { value: value.clone(), version });
        let ev = RawEvent { kind: EventType::Put, key: key.to_string(), value: Some(value), prev: prev.map(|p| p.value), version };
        self.commit(&mut state, ev);
        Ok(version)
    }

    async fn delete(&self, key: &str, expected: Option<u64>) -> StoreResult<Versioned> {
        let mut state = self.state.write().await;
        let existing = state.items.get(key).cloned().ok_or_else(|| StoreError::not_found(key))?;
        if let Some(v) = expected.filter(|v| *v > 0) {
            if v != existing.version {
                return Err(StoreError::conflict(
                    key,
                    format!("the object has been modified; expected version {} but found {}", v, existing.version),
                ));
            }
        }
        state.items.remove(key);
        state.revision += 1;
        let version = state.revision;
        let ev = RawEvent { kind: EventType::Delete, key: key.to_string(), value: None, prev: Some(existing.value.clone()), version };
        self.commit(&mut state, ev);
        Ok(existing)
    }

    async fn watch(&self, prefix: &str, from: Option<u64>, filter: Filter) -> StoreResult<EventStream> {
        let state = self.state.read().await;
        let start = from.unwrap_or(state.revision);
        if start < state.compacted {
            return Err(StoreError::Expired(format!(
                "too old resource version: {} (oldest retained: {})",
                start, state.compacted
            )));
        }
        let replay: Vec<RawEvent> = state
            .history
            .iter()
            .filter(|e| e.version > start && e.under(prefix) && e.touches(&filter))
            .cloned()
            .collect();
        let rx = self.events.subscribe();
        drop(state);
        debug!(prefix = %prefix, start, replay = replay.len(), "memory: watch");

        let live_prefix = prefix.to_string();
        let live = futures::stream::unfold(Some(rx), |rx| async move {
            let mut rx = rx?;
            match rx.recv().await {
                Ok(ev) => Some((Ok(ev), Some(rx))),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(missed = n, "memory: watcher lagged; closing");
                    Some((Err(StoreError::Expired(format!("watcher fell behind by {} events", n))), None))
                }
                Err(broadcast::error::RecvError::Closed) => None,
            }
        })
        .filter(move |res| {
            let keep = match res {
                Ok(ev) => ev.version > start && ev.under(&live_prefix) && ev.touches(&filter),
                Err(_) => true,
            };
            futures::future::ready(keep)
        });

        Ok(futures::stream::iter(replay.into_iter().map(Ok)).chain(live).boxed())
    }

    async fn current_version(&self) -> StoreResult<u64> { Ok(self.state.read().await.revision) }
}
