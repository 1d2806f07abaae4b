//! Storage engine contract.
//!
//! Engines store opaque JSON payloads under path-like keys and stamp every mutation with a
//! strictly increasing revision. The generic store never talks to a backend except
//! through [`Storage`].

use std::sync::Arc;

use futures::stream::BoxStream;
use kstor_core::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Payload plus the revision at which it was last written.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned {
    pub value: Value,
    pub version: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    Put,
    Delete,
}

/// A committed change as observed by engine watchers.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    pub kind: EventType,
    pub key: String,
    /// New payload; `None` for deletes.
    pub value: Option<Value>,
    /// Payload before the change; `None` when the key was created.
    pub prev: Option<Value>,
    pub version: u64,
}

impl RawEvent {
    /// True when either side of the change satisfies `filter`.
    pub fn touches(&self, filter: &Filter) -> bool {
        self.value.as_ref().map(|v| filter(v)).unwrap_or(false) || self.prev.as_ref().map(|v| filter(v)).unwrap_or(false)
    }

    pub fn under(&self, prefix: &str) -> bool { key_under(&self.key, prefix) }
}

/// Engine-side object filter. Built by the store from a selection predicate.
pub type Filter = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

pub fn everything() -> Filter { Arc::new(|_| true) }

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub limit: Option<usize>,
    pub continue_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListResult {
    pub items: Vec<(String, Versioned)>,
    /// Engine revision the listing reflects.
    pub version: u64,
    pub continue_token: Option<String>,
}

pub type EventStream = BoxStream<'static, StoreResult<RawEvent>>;

/// Versioned, watchable key-value engine.
#[async_trait::async_trait]
pub trait Storage: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Versioned>;

    /// List keys under `prefix` passing `filter`, in key order.
    async fn list(&self, prefix: &str, page: &ListPage, filter: Filter) -> StoreResult<ListResult>;

    /// Write `value`. `expected`: `None` writes unconditionally, `Some(0)` requires the key
    /// to be absent, `Some(v)` requires the stored version to equal `v`.
    async fn put(&self, key: &str, value: Value, expected: Option<u64>) -> StoreResult<u64>;

    /// Remove `key`, returning the payload that was stored.
    async fn delete(&self, key: &str, expected: Option<u64>) -> StoreResult<Versioned>;

    /// Changes under `prefix` strictly after `from` (or from now when `None`) whose new or
    /// previous payload passes `filter`.
    async fn watch(&self, prefix: &str, from: Option<u64>, filter: Filter) -> StoreResult<EventStream>;

    async fn current_version(&self) -> StoreResult<u64>;
}

/// `key` lies below the collection `prefix` (`/a` covers `/a/x` but not `/ab/x`).
pub fn key_under(key: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    key.strip_prefix(prefix).map(|rest| rest.starts_with('/')).unwrap_or(false)
}

#[derive(Debug, Serialize, Deserialize)]
struct ContinueToken {
    rv: u64,
    start: String,
}

pub fn encode_continue(version: u64, last_key: &str) -> String {
    let token = ContinueToken { rv: version, start: last_key.to_string() };
    serde_json::to_string(&token).unwrap_or_default()
}

/// Decode a continue token issued for `prefix`, returning the last key already served.
pub fn decode_continue(token: &str, prefix: &str) -> StoreResult<String> {
    let parsed: ContinueToken =
        serde_json::from_str(token).map_err(|e| StoreError::InvalidKey(format!("invalid continue token: {}", e)))?;
    if !key_under(&parsed.start, prefix) {
        return Err(StoreError::InvalidKey(format!("continue token key {:?} is outside {:?}", parsed.start, prefix)));
    }
    Ok(parsed.start)
}
