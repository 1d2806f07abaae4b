//! Per-kind watch cache.
//!
//! A [`Cacher`] sits in front of an engine for one key prefix. Reads and writes pass
//! straight through; a background task follows the engine watch for the prefix and keeps
//! the most recent events in a ring buffer so new watchers whose start version is still
//! covered are served without touching the engine.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::StreamExt;
use kstor_core::{config, StoreError, StoreResult};
use metrics::counter;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::storage::{everything, key_under, EventStream, Filter, ListPage, ListResult, RawEvent, Storage, Versioned};

const RESTART_BACKOFF: Duration = Duration::from_millis(200);

#[derive(Debug, Clone)]
enum Signal {
    Event(RawEvent),
    /// Upstream watch ended; cached watchers must re-list.
    Reset,
}

#[derive(Default)]
struct Window {
    buf: VecDeque<RawEvent>,
    /// Every event with a version greater than this is in `buf` (or still in flight).
    /// `None` until the upstream watch is established.
    start: Option<u64>,
}

struct Shared {
    cap: usize,
    window: Mutex<Window>,
    signals: broadcast::Sender<Signal>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Window> { self.window.lock().unwrap_or_else(|e| e.into_inner()) }

    fn reset(&self, start: Option<u64>) {
        let mut w = self.lock();
        w.buf.clear();
        w.start = start;
        let _ = self.signals.send(Signal::Reset);
    }

    fn push(&self, ev: RawEvent) {
        let mut w = self.lock();
        if w.buf.len() >= self.cap {
            if let Some(old) = w.buf.pop_front() {
                w.start = Some(old.version);
            }
        }
        w.buf.push_back(ev.clone());
        let _ = self.signals.send(Signal::Event(ev));
    }
}

pub struct Cacher {
    inner: Arc<dyn Storage>,
    prefix: String,
    kind: String,
    shared: Arc<Shared>,
    cancel: CancellationToken,
}

impl Cacher {
    /// Start caching `prefix`, with live watcher buffering from `KSTOR_WATCH_QUEUE_CAP`.
    /// Must be called inside a tokio runtime.
    pub fn new(inner: Arc<dyn Storage>, cache_size: usize, prefix: &str, kind: &str) -> Self {
        Self::with_capacity(inner, cache_size, config::watch_queue_cap(), prefix, kind)
    }

    /// `cache_size` bounds the replay window; `watch_cap` bounds how far a live watcher
    /// may fall behind before it is expired.
    pub fn with_capacity(inner: Arc<dyn Storage>, cache_size: usize, watch_cap: usize, prefix: &str, kind: &str) -> Self {
        let cap = cache_size.max(1);
        let (signals, _) = broadcast::channel(watch_cap.max(1));
        let shared = Arc::new(Shared { cap, window: Mutex::new(Window::default()), signals });
        let cancel = CancellationToken::new();
        let prefix = prefix.trim_end_matches('/').to_string();
        tokio::spawn(follow(inner.clone(), prefix.clone(), kind.to_string(), shared.clone(), cancel.clone()));
        info!(kind = %kind, prefix = %prefix, cap, "cacher: started");
        Self { inner, prefix, kind: kind.to_string(), shared, cancel }
    }

    /// Oldest covered version and number of buffered events, once the cache is live.
    pub fn window(&self) -> Option<(u64, usize)> {
        let w = self.shared.lock();
        let len = w.buf.len();
        w.start.map(|s| (s, len))
    }

    fn covers(&self, prefix: &str) -> bool {
        let prefix = prefix.trim_end_matches('/');
        prefix == self.prefix || key_under(prefix, &self.prefix)
    }
}

impl Drop for Cacher {
    fn drop(&mut self) { self.cancel.cancel(); }
}

/// Wrap `storage` in a watch cache for `prefix` when `cache_size` is positive. Outside a
/// tokio runtime there is nothing to run the follower on, so `storage` is returned as is.
pub fn storage_with_cacher(storage: Arc<dyn Storage>, cache_size: i64, prefix: &str, kind: &str) -> Arc<dyn Storage> {
    if cache_size <= 0 {
        debug!(kind = %kind, "cacher: disabled");
        return storage;
    }
    if Handle::try_current().is_err() {
        warn!(kind = %kind, "cacher: no tokio runtime; serving watches from the engine");
        return storage;
    }
    Arc::new(Cacher::new(storage, cache_size as usize, prefix, kind))
}

async fn follow(inner: Arc<dyn Storage>, prefix: String, kind: String, shared: Arc<Shared>, cancel: CancellationToken) {
    loop {
        match open(&inner, &prefix).await {
            Ok((rev, mut stream)) => {
                shared.reset(Some(rev));
                debug!(kind = %kind, rev, "cacher: following");
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        next = stream.next() => match next {
                            Some(Ok(ev)) => {
                                counter!("cacher_events_total", 1u64, "resource" => kind.clone());
                                shared.push(ev);
                            }
                            Some(Err(e)) => {
                                warn!(kind = %kind, error = %e, "cacher: upstream watch failed; restarting");
                                break;
                            }
                            None => {
                                warn!(kind = %kind, "cacher: upstream watch closed; restarting");
                                break;
                            }
                        }
                    }
                }
            }
            Err(e) => warn!(kind = %kind, error = %e, "cacher: cannot open upstream watch"),
        }
        shared.reset(None);
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(RESTART_BACKOFF) => {}
        }
    }
}

async fn open(inner: &Arc<dyn Storage>, prefix: &str) -> StoreResult<(u64, EventStream)> {
    let rev = inner.current_version().await?;
    let stream = inner.watch(prefix, Some(rev), everything()).await?;
    Ok((rev, stream))
}

#[async_trait::async_trait]
impl Storage for Cacher {
    async fn get(&self, key: &str) -> StoreResult<Versioned> { self.inner.get(key).await }

    async fn list(&self, prefix: &str, page: &ListPage, filter: Filter) -> StoreResult<ListResult> {
        self.inner.list(prefix, page, filter).await
    }

    async fn put(&self, key: &str, value: Value, expected: Option<u64>) -> StoreResult<u64> {
        self.inner.put(key, value, expected).await
    }

    async fn delete(&self, key: &str, expected: Option<u64>) -> StoreResult<Versioned> {
        self.inner.delete(key, expected).await
    }

    async fn watch(&self, prefix: &str, from: Option<u64>, filter: Filter) -> StoreResult<EventStream> {
        let from = match from {
            Some(v) => v,
            None => self.inner.current_version().await?,
        };
        if !self.covers(prefix) {
            return self.inner.watch(prefix, Some(from), filter).await;
        }
        let served = {
            let w = self.shared.lock();
            let start = w.start;
            match start {
                Some(start) if from >= start => {
                    let replay: Vec<RawEvent> = w
                        .buf
                        .iter()
                        .filter(|e| e.version > from && e.under(prefix) && e.touches(&filter))
                        .cloned()
                        .collect();
                    Some((replay, self.shared.signals.subscribe()))
                }
                start => {
                    debug!(kind = %self.kind, from, ?start, "cacher: window miss; falling back");
                    None
                }
            }
        };
        let Some((replay, rx)) = served else {
            return self.inner.watch(prefix, Some(from), filter).await;
        };
        debug!(kind = %self.kind, from, replay = replay.len(), "cacher: serving watch");

        let live_prefix = prefix.to_string();
        let live = futures::stream::unfold(Some(rx), |rx| async move {
            let mut rx = rx?;
            match rx.recv().await {
                Ok(Signal::Event(ev)) => Some((Ok(ev), Some(rx))),
                Ok(Signal::Reset) => Some((Err(StoreError::Expired("watch cache restarted".into())), None)),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    Some((Err(StoreError::Expired(format!("watcher fell behind by {} events", n))), None))
                }
                Err(broadcast::error::RecvError::Closed) => None,
            }
        })
        .filter(move |res| {
            let keep = match res {
                Ok(ev) => ev.version > from && ev.under(&live_prefix) && ev.touches(&filter),
                Err(_) => true,
            };
            futures::future::ready(keep)
        });

        Ok(futures::stream::iter(replay.into_iter().map(Ok)).chain(live).boxed())
    }

    async fn current_version(&self) -> StoreResult<u64> { self.inner.current_version().await }
}
