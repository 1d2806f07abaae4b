//! Typed watch events and the cancellable handle that delivers them.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use kstor_core::{StoreError, StoreResult};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::storage::RawEvent;

#[derive(Debug)]
pub enum WatchEvent<T> {
    Added(T),
    Modified(T),
    /// Carries the last state that matched the watch.
    Deleted(T),
    Error(StoreError),
}

impl<T> WatchEvent<T> {
    pub fn object(&self) -> Option<&T> {
        match self {
            Self::Added(o) | Self::Modified(o) | Self::Deleted(o) => Some(o),
            Self::Error(_) => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Added(_) => "added",
            Self::Modified(_) => "modified",
            Self::Deleted(_) => "deleted",
            Self::Error(_) => "error",
        }
    }
}

/// Map an engine change onto the watcher's view. `decode` returns the object stamped
/// with `version` and whether it satisfies the predicate.
///
/// | current | previous | event |
/// |---------|----------|-------|
/// | match   | none/miss| Added |
/// | match   | match    | Modified |
/// | miss/none | match  | Deleted(previous) |
/// | otherwise |        | nothing |
pub(crate) fn translate<T>(ev: &RawEvent, decode: impl Fn(&Value, u64) -> StoreResult<(T, bool)>) -> Option<WatchEvent<T>> {
    let cur = match ev.value.as_ref().map(|v| decode(v, ev.version)).transpose() {
        Ok(c) => c,
        Err(e) => return Some(WatchEvent::Error(e)),
    };
    let prev = match ev.prev.as_ref().map(|v| decode(v, ev.version)).transpose() {
        Ok(p) => p,
        Err(e) => return Some(WatchEvent::Error(e)),
    };
    let prev_matched = prev.as_ref().map(|(_, m)| *m).unwrap_or(false);
    match (cur, prev) {
        (Some((obj, true)), _) if prev_matched => Some(WatchEvent::Modified(obj)),
        (Some((obj, true)), _) => Some(WatchEvent::Added(obj)),
        (_, Some((old, true))) => Some(WatchEvent::Deleted(old)),
        _ => None,
    }
}

/// Receiving end of a watch. Yields `None` once cancelled; dropping it cancels the producer.
pub struct WatchHandle<T> {
    rx: mpsc::Receiver<WatchEvent<T>>,
    cancel: CancellationToken,
}

impl<T> WatchHandle<T> {
    pub(crate) fn new(rx: mpsc::Receiver<WatchEvent<T>>, cancel: CancellationToken) -> Self { Self { rx, cancel } }

    pub fn cancel(&self) { self.cancel.cancel(); }

    pub fn is_cancelled(&self) -> bool { self.cancel.is_cancelled() }

    pub async fn next_event(&mut self) -> Option<WatchEvent<T>> {
        if self.cancel.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            ev = self.rx.recv() => ev,
        }
    }
}

impl<T> Stream for WatchHandle<T> {
    type Item = WatchEvent<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.cancel.is_cancelled() {
            return Poll::Ready(None);
        }
        this.rx.poll_recv(cx)
    }
}

impl<T> Drop for WatchHandle<T> {
    fn drop(&mut self) { self.cancel.cancel(); }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::EventType;
    use serde_json::json;

    fn decode(v: &Value, version: u64) -> StoreResult<((String, u64), bool)> {
        let team = v.get("team").and_then(|t| t.as_str()).unwrap_or_default().to_string();
        let matched = team == "x";
        Ok(((team, version), matched))
    }

    fn event(value: Option<Value>, prev: Option<Value>) -> RawEvent {
        let kind = if value.is_some() { EventType::Put } else { EventType::Delete };
        RawEvent { kind, key: "/widgets/a".into(), value, prev, version: 9 }
    }

    #[test]
    fn transitions_into_and_out_of_the_match_set() {
        let x = json!({"team": "x"});
        let y = json!({"team": "y"});
        let ev = translate(&event(Some(x.clone()), None), decode);
        assert!(matches!(ev, Some(WatchEvent::Added((ref t, 9))) if t == "x"));
        let ev = translate(&event(Some(x.clone()), Some(y.clone())), decode);
        assert!(matches!(ev, Some(WatchEvent::Added(_))));
        let ev = translate(&event(Some(x.clone()), Some(x.clone())), decode);
        assert!(matches!(ev, Some(WatchEvent::Modified(_))));
        let ev = translate(&event(Some(y.clone()), Some(x.clone())), decode);
        assert!(matches!(ev, Some(WatchEvent::Deleted((ref t, _))) if t == "x"));
        let ev = translate(&event(None, Some(x)), decode);
        assert!(matches!(ev, Some(WatchEvent::Deleted(_))));
        assert!(translate(&event(Some(y.clone()), Some(y.clone())), decode).is_none());
        assert!(translate(&event(None, Some(y)), decode).is_none());
    }

    #[test]
    fn decode_failures_surface_as_errors() {
        let ev = translate(&event(Some(json!({})), None), |_: &Value, _| -> StoreResult<((), bool)> {
            Err(StoreError::UnexpectedType { expected: "Widget".into(), reason: "missing kind".into() })
        });
        assert!(matches!(ev, Some(WatchEvent::Error(StoreError::UnexpectedType { .. }))));
    }

    #[tokio::test]
    async fn cancelled_handle_yields_none() {
        let (tx, rx) = mpsc::channel(4);
        let mut handle: WatchHandle<u32> = WatchHandle::new(rx, CancellationToken::new());
        tx.send(WatchEvent::Added(1)).await.unwrap();
        assert!(matches!(handle.next_event().await, Some(WatchEvent::Added(1))));
        tx.send(WatchEvent::Added(2)).await.unwrap();
        handle.cancel();
        assert!(handle.next_event().await.is_none());
        assert!(handle.is_cancelled());
    }
}
