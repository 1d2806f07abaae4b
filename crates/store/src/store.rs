//! Generic store: typed CRUD, list and watch for one kind on top of a [`Storage`] engine.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::{SubsecRound, Utc};
use futures::StreamExt;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use k8s_openapi::Metadata as _;
use kstor_core::{
    config, get_field_value, DeleteOptions, FieldError, KeyScheme, ListOptions, Object, ObjectList, QualifiedResource, RequestScope,
    StoreError, StoreResult,
};
use metrics::{counter, histogram};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::predicate::SelectionPredicate;
use crate::storage::{everything, Filter, ListPage, Storage, Versioned};
use crate::strategy::{labels_of, Strategy};
use crate::watch::{translate, WatchEvent, WatchHandle};

/// Registration-time settings for a [`Store`].
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub qualified_resource: QualifiedResource,
    pub key_prefix: String,
    /// Concurrent deletes in `delete_collection`; `0` runs them one at a time.
    pub delete_collection_workers: usize,
    /// Return the removed object from `delete` instead of a status.
    pub return_deleted_object: bool,
    pub watch_queue_cap: usize,
}

impl StoreOptions {
    /// Worker count and watch queue from `KSTOR_DELETE_COLLECTION_WORKERS` / `KSTOR_WATCH_QUEUE_CAP`.
    pub fn new(qualified_resource: QualifiedResource, key_prefix: &str) -> Self {
        Self {
            qualified_resource,
            key_prefix: key_prefix.to_string(),
            delete_collection_workers: config::delete_collection_workers(),
            return_deleted_object: false,
            watch_queue_cap: config::watch_queue_cap(),
        }
    }

    pub fn delete_collection_workers(mut self, workers: usize) -> Self {
        self.delete_collection_workers = workers;
        self
    }

    pub fn return_deleted_object(mut self, yes: bool) -> Self {
        self.return_deleted_object = yes;
        self
    }

    pub fn watch_queue_cap(mut self, cap: usize) -> Self {
        self.watch_queue_cap = cap.max(1);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Deleted<T> {
    Object(T),
    Status { name: String },
}

/// Per-object results of a bulk delete, keyed by `name` (or `namespace/name` for namespaced kinds).
#[derive(Debug)]
pub struct DeleteCollectionOutcome<T> {
    pub outcomes: BTreeMap<String, StoreResult<T>>,
}

impl<T> DeleteCollectionOutcome<T> {
    pub fn len(&self) -> usize { self.outcomes.len() }

    pub fn is_empty(&self) -> bool { self.outcomes.is_empty() }

    pub fn succeeded(&self) -> impl Iterator<Item = (&str, &T)> {
        self.outcomes.iter().filter_map(|(k, r)| r.as_ref().ok().map(|o| (k.as_str(), o)))
    }

    pub fn failed(&self) -> impl Iterator<Item = (&str, &StoreError)> {
        self.outcomes.iter().filter_map(|(k, r)| r.as_ref().err().map(|e| (k.as_str(), e)))
    }
}

pub struct Store<S: Strategy> {
    resource: QualifiedResource,
    keys: KeyScheme,
    strategy: Arc<S>,
    storage: Arc<dyn Storage>,
    delete_collection_workers: usize,
    return_deleted_object: bool,
    watch_queue_cap: usize,
}

/// Decode a stored payload into `T`, stamping `resourceVersion`.
fn narrow<T: Object>(raw: &Value, version: u64) -> StoreResult<T> {
    let mut obj: T = serde_json::from_value(raw.clone())
        .map_err(|e| StoreError::UnexpectedType { expected: T::KIND.to_string(), reason: e.to_string() })?;
    obj.metadata_mut().resource_version = Some(version.to_string());
    Ok(obj)
}

fn selected<S: Strategy>(strategy: &S, pred: &SelectionPredicate, obj: &S::Object) -> bool {
    pred.is_everything() || pred.matches(labels_of(obj), &strategy.selectable_fields(obj))
}

impl<S: Strategy> Store<S> {
    pub fn new(strategy: S, storage: Arc<dyn Storage>, opts: StoreOptions) -> Self {
        let keys = KeyScheme::new(&opts.key_prefix, strategy.namespace_scoped());
        info!(resource = %opts.qualified_resource, prefix = %keys.prefix(), "store: registered");
        Self {
            resource: opts.qualified_resource,
            keys,
            strategy: Arc::new(strategy),
            storage,
            delete_collection_workers: opts.delete_collection_workers,
            return_deleted_object: opts.return_deleted_object,
            watch_queue_cap: opts.watch_queue_cap.max(1),
        }
    }

    pub fn resource(&self) -> &QualifiedResource { &self.resource }
    pub fn keys(&self) -> &KeyScheme { &self.keys }
    pub fn strategy(&self) -> &S { &self.strategy }
    pub fn storage(&self) -> &Arc<dyn Storage> { &self.storage }
    pub fn returns_deleted_object(&self) -> bool { self.return_deleted_object }

    pub async fn get(&self, scope: &RequestScope, name: &str) -> StoreResult<S::Object> {
        self.instrument("get", self.get_inner(scope, name)).await
    }

    pub async fn list(&self, scope: &RequestScope, opts: &ListOptions) -> StoreResult<ObjectList<S::Object>> {
        self.instrument("list", self.list_inner(scope, opts)).await
    }

    pub async fn create(&self, scope: &RequestScope, obj: S::Object) -> StoreResult<S::Object> {
        self.instrument("create", self.create_inner(scope, obj)).await
    }

    pub async fn update(&self, scope: &RequestScope, name: &str, obj: S::Object) -> StoreResult<S::Object> {
        self.instrument("update", self.update_inner(scope, name, obj)).await
    }

    pub async fn delete(&self, scope: &RequestScope, name: &str, opts: &DeleteOptions) -> StoreResult<Deleted<S::Object>> {
        self.instrument("delete", self.delete_inner(scope, name, opts)).await
    }

    /// List, then delete every match through a bounded worker pool. Not atomic: each
    /// object gets its own outcome and a failure does not stop the others.
    pub async fn delete_collection(
        &self,
        scope: &RequestScope,
        opts: &ListOptions,
    ) -> StoreResult<DeleteCollectionOutcome<S::Object>> {
        self.instrument("deletecollection", self.delete_collection_inner(scope, opts)).await
    }

    /// Field lookup on a raw stored payload. Payloads of another kind yield `None`.
    pub fn fv_get(&self, field: &str, raw: &Value) -> Option<String> {
        match narrow::<S::Object>(raw, 0) {
            Ok(obj) => get_field_value(field, labels_of(&obj), &self.strategy.kind_fields(&obj)),
            Err(e) => {
                warn!(resource = %self.resource, field = %field, error = %e, "store: field lookup on unexpected type");
                None
            }
        }
    }

    /// Stream changes matching `opts` selectors, strictly after `opts.resource_version`
    /// (or from now). Cancelling `cancel` or dropping the handle stops the producer.
    pub async fn watch(
        &self,
        scope: &RequestScope,
        opts: &ListOptions,
        cancel: CancellationToken,
    ) -> StoreResult<WatchHandle<S::Object>> {
        let prefix = self.keys.root_key(scope);
        let (pred, mut stream) = self
            .instrument("watch", async {
                let pred = SelectionPredicate::from_options(opts)?;
                let stream = self.storage.watch(&prefix, opts.resource_version, self.filter(&pred)).await?;
                Ok((pred, stream))
            })
            .await?;

        let (tx, rx) = mpsc::channel(self.watch_queue_cap);
        let token = cancel.child_token();
        let producer = token.clone();
        let strategy = self.strategy.clone();
        let resource = self.resource.to_string();
        debug!(resource = %resource, prefix = %prefix, from = ?opts.resource_version, "store: watch started");

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = producer.cancelled() => break,
                    next = stream.next() => {
                        let (ev, terminal) = match next {
                            Some(Ok(raw)) => {
                                let decoded = translate(&raw, |v, ver| {
                                    let obj = narrow::<S::Object>(v, ver)?;
                                    let hit = selected(&*strategy, &pred, &obj);
                                    Ok((obj, hit))
                                });
                                match decoded {
                                    Some(ev) => (ev, false),
                                    None => continue,
                                }
                            }
                            Some(Err(e)) => {
                                warn!(resource = %resource, error = %e, "store: watch stream failed");
                                (WatchEvent::Error(e), true)
                            }
                            None => break,
                        };
                        counter!("watch_events_total", 1u64, "resource" => resource.clone(), "type" => ev.label());
                        tokio::select! {
                            _ = producer.cancelled() => break,
                            sent = tx.send(ev) => if sent.is_err() { break },
                        }
                        if terminal { break; }
                    }
                }
            }
            debug!(resource = %resource, "store: watch stopped");
        });
        Ok(WatchHandle::new(rx, token))
    }

    async fn instrument<R>(&self, verb: &'static str, fut: impl Future<Output = StoreResult<R>>) -> StoreResult<R> {
        let started = Instant::now();
        let res = fut.await;
        histogram!("store_request_latency_ms", started.elapsed().as_secs_f64() * 1000.0, "verb" => verb);
        counter!("store_requests_total", 1u64, "resource" => self.resource.to_string(), "verb" => verb);
        if let Err(e) = &res {
            counter!(
                "store_request_errors_total",
                1u64,
                "resource" => self.resource.to_string(),
                "verb" => verb,
                "reason" => e.reason()
            );
            debug!(resource = %self.resource, verb, error = %e, "store: request failed");
        }
        res
    }

    fn qualify(&self, e: StoreError, name: &str) -> StoreError { e.qualify(&self.resource.to_string(), name) }

    fn invalid(&self, name: &str, errors: Vec<FieldError>) -> StoreError {
        StoreError::ValidationFailed { resource: self.resource.to_string(), name: name.to_string(), errors }
    }

    fn decode(&self, v: &Versioned) -> StoreResult<S::Object> { narrow(&v.value, v.version) }

    fn encode(&self, obj: &S::Object) -> StoreResult<Value> {
        let mut obj = obj.clone();
        obj.metadata_mut().resource_version = None;
        serde_json::to_value(&obj).map_err(|e| StoreError::UnexpectedType {
            expected: <S::Object as k8s_openapi::Resource>::KIND.to_string(),
            reason: e.to_string(),
        })
    }

    fn filter(&self, pred: &SelectionPredicate) -> Filter {
        if pred.is_everything() {
            return everything();
        }
        let pred = pred.clone();
        let strategy = self.strategy.clone();
        let resource = self.resource.to_string();
        Arc::new(move |raw: &Value| match narrow::<S::Object>(raw, 0) {
            Ok(obj) => selected(&*strategy, &pred, &obj),
            Err(e) => {
                warn!(resource = %resource, error = %e, "store: skipping payload of unexpected type");
                false
            }
        })
    }

    /// Scope an object actually lives in: its own namespace for namespaced kinds.
    fn object_scope(&self, scope: &RequestScope, obj: &S::Object) -> RequestScope {
        if !self.keys.is_namespaced() {
            return RequestScope::cluster();
        }
        match obj.metadata().namespace.as_deref().filter(|ns| !ns.is_empty()) {
            Some(ns) => RequestScope::namespaced(ns),
            None => scope.clone(),
        }
    }

    fn reconcile_namespace(&self, scope: &RequestScope, obj: &mut S::Object, name: &str) -> StoreResult<()> {
        let namespaced = self.keys.is_namespaced();
        let meta = obj.metadata_mut();
        if !namespaced {
            meta.namespace = None;
            return Ok(());
        }
        let have = meta.namespace.clone().filter(|ns| !ns.is_empty());
        match (have, scope.namespace()) {
            (None, Some(want)) => meta.namespace = Some(want.to_string()),
            (Some(have), Some(want)) if have != want => {
                return Err(self.invalid(
                    name,
                    vec![FieldError::invalid("metadata.namespace", &have, "does not match the namespace of the request")],
                ));
            }
            _ => {}
        }
        Ok(())
    }

    async fn get_inner(&self, scope: &RequestScope, name: &str) -> StoreResult<S::Object> {
        let key = self.keys.instance_key(scope, name)?;
        let v = self.storage.get(&key).await.map_err(|e| self.qualify(e, name))?;
        debug!(resource = %self.resource, key = %key, version = v.version, "store: get");
        self.decode(&v)
    }

    async fn list_inner(&self, scope: &RequestScope, opts: &ListOptions) -> StoreResult<ObjectList<S::Object>> {
        let pred = SelectionPredicate::from_options(opts)?;
        let single = pred.matches_single_name().filter(|_| !self.keys.is_namespaced() || scope.namespace().is_some());
        if let Some(name) = single {
            let resource_version = self.storage.current_version().await?;
            let key = match self.keys.instance_key(scope, name) {
                Ok(k) => k,
                Err(StoreError::InvalidKey(_)) => return Ok(ObjectList { items: Vec::new(), resource_version, continue_token: None }),
                Err(e) => return Err(e),
            };
            let items = match self.storage.get(&key).await {
                Ok(v) => {
                    let obj = self.decode(&v)?;
                    if selected(&*self.strategy, &pred, &obj) { vec![obj] } else { Vec::new() }
                }
                Err(e) if e.is_not_found() => Vec::new(),
                Err(e) => return Err(e),
            };
            debug!(resource = %self.resource, key = %key, count = items.len(), "store: list single");
            return Ok(ObjectList { items, resource_version, continue_token: None });
        }

        let prefix = self.keys.root_key(scope);
        let page = ListPage { limit: opts.limit, continue_token: opts.continue_token.clone() };
        let res = self.storage.list(&prefix, &page, self.filter(&pred)).await?;
        let items = res.items.iter().map(|(_, v)| self.decode(v)).collect::<StoreResult<Vec<_>>>()?;
        debug!(resource = %self.resource, prefix = %prefix, count = items.len(), version = res.version, "store: list");
        Ok(ObjectList { items, resource_version: res.version, continue_token: res.continue_token })
    }

    async fn create_inner(&self, scope: &RequestScope, mut obj: S::Object) -> StoreResult<S::Object> {
        self.strategy.prepare_for_create(&mut obj);
        let name = self.strategy.object_name(&obj)?;
        self.reconcile_namespace(scope, &mut obj, &name)?;
        let key = self.keys.instance_key(&self.object_scope(scope, &obj), &name)?;
        {
            let meta = obj.metadata_mut();
            meta.uid = Some(Uuid::new_v4().to_string());
            meta.creation_timestamp = Some(Time(Utc::now().trunc_subsecs(0)));
            meta.resource_version = None;
        }
        let errors = self.strategy.validate_create(&obj);
        if !errors.is_empty() {
            return Err(self.invalid(&name, errors));
        }
        let value = self.encode(&obj)?;
        let version = self.storage.put(&key, value, Some(0)).await.map_err(|e| self.qualify(e, &name))?;
        obj.metadata_mut().resource_version = Some(version.to_string());
        info!(resource = %self.resource, key = %key, version, "store: create ok");
        Ok(obj)
    }

    async fn update_inner(&self, scope: &RequestScope, name: &str, mut obj: S::Object) -> StoreResult<S::Object> {
        if obj.metadata().name.as_deref().map(str::is_empty).unwrap_or(true) {
            obj.metadata_mut().name = Some(name.to_string());
        }
        let obj_name = self.strategy.object_name(&obj)?;
        if obj_name != name {
            return Err(self.invalid(
                name,
                vec![FieldError::invalid("metadata.name", &obj_name, "does not match the name in the request")],
            ));
        }
        self.reconcile_namespace(scope, &mut obj, name)?;
        let scope = self.object_scope(scope, &obj);
        let key = self.keys.instance_key(&scope, name)?;

        let current = match self.storage.get(&key).await {
            Ok(v) => v,
            Err(e) if e.is_not_found() && self.strategy.allow_create_on_update() => {
                debug!(resource = %self.resource, key = %key, "store: update creates missing object");
                return self.create_inner(&scope, obj).await;
            }
            Err(e) => return Err(self.qualify(e, name)),
        };
        let old = self.decode(&current)?;

        let expected = match obj.metadata().resource_version.as_deref().filter(|rv| !rv.is_empty()) {
            Some(rv) => match rv.parse::<u64>().ok().filter(|v| *v > 0) {
                Some(v) => v,
                None => {
                    return Err(self.invalid(name, vec![FieldError::invalid("metadata.resourceVersion", rv, "must be a positive integer")]));
                }
            },
            None if self.strategy.allow_unconditional_update() => current.version,
            None => {
                return Err(self.invalid(
                    name,
                    vec![FieldError::invalid("metadata.resourceVersion", "", "must be specified for an update")],
                ));
            }
        };

        {
            let meta = obj.metadata_mut();
            meta.uid = old.metadata().uid.clone();
            meta.creation_timestamp = old.metadata().creation_timestamp.clone();
        }
        self.strategy.prepare_for_update(&mut obj, &old);
        let errors = self.strategy.validate_update(&obj, &old);
        if !errors.is_empty() {
            return Err(self.invalid(name, errors));
        }
        let value = self.encode(&obj)?;
        let version = self.storage.put(&key, value, Some(expected)).await.map_err(|e| self.qualify(e, name))?;
        obj.metadata_mut().resource_version = Some(version.to_string());
        info!(resource = %self.resource, key = %key, from = expected, version, "store: update ok");
        Ok(obj)
    }

    async fn delete_inner(&self, scope: &RequestScope, name: &str, opts: &DeleteOptions) -> StoreResult<Deleted<S::Object>> {
        let key = self.keys.instance_key(scope, name)?;
        let current = self.storage.get(&key).await.map_err(|e| self.qualify(e, name))?;
        let obj = self.decode(&current)?;

        if let Some(pre) = &opts.preconditions {
            if let Some(uid) = &pre.uid {
                let have = obj.metadata().uid.as_deref().unwrap_or_default();
                if have != uid {
                    return Err(self.qualify(
                        StoreError::conflict(
                            &key,
                            format!("Precondition failed: UID in precondition: {}, UID in object meta: {}", uid, have),
                        ),
                        name,
                    ));
                }
            }
            if let Some(rv) = &pre.resource_version {
                if *rv != current.version.to_string() {
                    return Err(self.qualify(
                        StoreError::conflict(
                            &key,
                            format!(
                                "Precondition failed: ResourceVersion in precondition: {}, ResourceVersion in object meta: {}",
                                rv, current.version
                            ),
                        ),
                        name,
                    ));
                }
            }
        }

        let errors = self.strategy.validate_delete(&obj);
        if !errors.is_empty() {
            return Err(self.invalid(name, errors));
        }
        let removed = self.storage.delete(&key, Some(current.version)).await.map_err(|e| self.qualify(e, name))?;
        info!(resource = %self.resource, key = %key, version = removed.version, "store: delete ok");
        if self.return_deleted_object {
            Ok(Deleted::Object(self.decode(&removed)?))
        } else {
            Ok(Deleted::Status { name: name.to_string() })
        }
    }

    async fn delete_collection_inner(
        &self,
        scope: &RequestScope,
        opts: &ListOptions,
    ) -> StoreResult<DeleteCollectionOutcome<S::Object>> {
        let listed = self.list_inner(scope, opts).await?;
        let workers = self.delete_collection_workers.max(1);
        let total = listed.items.len();
        let namespaced = self.keys.is_namespaced();

        let outcomes: BTreeMap<String, StoreResult<S::Object>> = futures::stream::iter(listed.items)
            .map(move |obj| async move {
                let name = obj.metadata().name.clone().unwrap_or_default();
                let obj_scope = self.object_scope(scope, &obj);
                let label = match obj_scope.namespace() {
                    Some(ns) if namespaced => format!("{}/{}", ns, name),
                    _ => name.clone(),
                };
                let res = match self.delete_inner(&obj_scope, &name, &DeleteOptions::default()).await {
                    Ok(Deleted::Object(gone)) => Ok(gone),
                    Ok(Deleted::Status { .. }) => Ok(obj),
                    // Already gone counts as deleted.
                    Err(e) if e.is_not_found() => Ok(obj),
                    Err(e) => {
                        warn!(resource = %self.resource, name = %label, error = %e, "store: bulk delete item failed");
                        Err(e)
                    }
                };
                (label, res)
            })
            .buffer_unordered(workers)
            .collect()
            .await;

        let failed = outcomes.values().filter(|r| r.is_err()).count();
        info!(resource = %self.resource, total, failed, workers, "store: delete collection done");
        Ok(DeleteCollectionOutcome { outcomes })
    }
}
