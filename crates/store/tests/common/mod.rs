#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kstor_core::{FieldError, Fields, QualifiedResource};
use kstor_store::{MemoryStorage, Storage, Store, StoreOptions, Strategy, WatchEvent, WatchHandle};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WidgetSpec {
    #[serde(default)]
    pub color: String,
}

/// Cluster-scoped test kind.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Widget {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: WidgetSpec,
}

impl k8s_openapi::Resource for Widget {
    const API_VERSION: &'static str = "example.io/v1";
    const GROUP: &'static str = "example.io";
    const KIND: &'static str = "Widget";
    const VERSION: &'static str = "v1";
    const URL_PATH_SEGMENT: &'static str = "widgets";
    type Scope = k8s_openapi::ClusterResourceScope;
}

impl k8s_openapi::Metadata for Widget {
    type Ty = ObjectMeta;
    fn metadata(&self) -> &ObjectMeta { &self.metadata }
    fn metadata_mut(&mut self) -> &mut ObjectMeta { &mut self.metadata }
}

/// Namespaced test kind.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Gadget {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub size: u32,
}

impl k8s_openapi::Resource for Gadget {
    const API_VERSION: &'static str = "example.io/v1";
    const GROUP: &'static str = "example.io";
    const KIND: &'static str = "Gadget";
    const VERSION: &'static str = "v1";
    const URL_PATH_SEGMENT: &'static str = "gadgets";
    type Scope = k8s_openapi::NamespaceResourceScope;
}

impl k8s_openapi::Metadata for Gadget {
    type Ty = ObjectMeta;
    fn metadata(&self) -> &ObjectMeta { &self.metadata }
    fn metadata_mut(&mut self) -> &mut ObjectMeta { &mut self.metadata }
}

#[derive(Default)]
pub struct WidgetStrategy {
    pub create_on_update: bool,
    pub unconditional_update: bool,
}

impl Strategy for WidgetStrategy {
    type Object = Widget;

    fn namespace_scoped(&self) -> bool { false }

    fn kind_fields(&self, obj: &Widget) -> Fields {
        let mut f = kstor_core::object_meta_fields(&obj.metadata, false);
        f.insert("spec.color".into(), obj.spec.color.clone());
        f
    }

    fn prepare_for_create(&self, obj: &mut Widget) {
        if obj.spec.color.is_empty() {
            obj.spec.color = "grey".into();
        }
    }

    fn validate_create(&self, obj: &Widget) -> Vec<FieldError> {
        if obj.spec.color == "invisible" {
            return vec![FieldError::not_supported("spec.color", &obj.spec.color, &["grey", "red", "blue"])];
        }
        Vec::new()
    }

    fn validate_delete(&self, obj: &Widget) -> Vec<FieldError> {
        if obj.metadata.labels.as_ref().and_then(|l| l.get("protected")).is_some() {
            return vec![FieldError::forbidden("metadata.labels.protected", "protected widgets cannot be deleted")];
        }
        Vec::new()
    }

    fn allow_create_on_update(&self) -> bool { self.create_on_update }

    fn allow_unconditional_update(&self) -> bool { self.unconditional_update }
}

pub struct GadgetStrategy;

impl Strategy for GadgetStrategy {
    type Object = Gadget;

    fn namespace_scoped(&self) -> bool { true }
}

pub fn labels(pairs: &[(&str, &str)]) -> Option<BTreeMap<String, String>> {
    if pairs.is_empty() {
        return None;
    }
    Some(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
}

pub fn widget(name: &str, pairs: &[(&str, &str)]) -> Widget {
    Widget {
        metadata: ObjectMeta { name: Some(name.to_string()), labels: labels(pairs), ..Default::default() },
        spec: WidgetSpec::default(),
    }
}

pub fn gadget(ns: Option<&str>, name: &str, pairs: &[(&str, &str)]) -> Gadget {
    Gadget {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: ns.map(str::to_string),
            labels: labels(pairs),
            ..Default::default()
        },
        size: 1,
    }
}

pub fn memory() -> Arc<dyn Storage> { Arc::new(MemoryStorage::with_capacity(1000, 1024)) }

pub fn widget_options() -> StoreOptions {
    StoreOptions::new(QualifiedResource::of::<Widget>(), "widgets").delete_collection_workers(3).watch_queue_cap(64)
}

pub fn widget_store(storage: Arc<dyn Storage>) -> Store<WidgetStrategy> {
    Store::new(WidgetStrategy { unconditional_update: true, ..Default::default() }, storage, widget_options())
}

pub fn gadget_store(storage: Arc<dyn Storage>) -> Store<GadgetStrategy> {
    let opts = StoreOptions::new(QualifiedResource::of::<Gadget>(), "/gadgets/").watch_queue_cap(64);
    Store::new(GadgetStrategy, storage, opts)
}

pub fn names<T: k8s_openapi::Metadata<Ty = ObjectMeta>>(items: &[T]) -> Vec<String> {
    items.iter().map(|o| o.metadata().name.clone().unwrap_or_default()).collect()
}

/// Next event, or `None` if nothing arrives within `ms`.
pub async fn next_within<T>(handle: &mut WatchHandle<T>, ms: u64) -> Option<WatchEvent<T>> {
    tokio::time::timeout(Duration::from_millis(ms), handle.next_event()).await.ok().flatten()
}
