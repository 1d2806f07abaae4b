//! Per-kind behavior plugged into the generic store.

use std::collections::BTreeMap;

use k8s_openapi::Metadata as _;
use kstor_core::{merge_labels, object_meta_fields, FieldError, Fields, Object, StoreError, StoreResult};

static NO_LABELS: BTreeMap<String, String> = BTreeMap::new();

/// Labels of `obj`, empty when unset.
pub fn labels_of<T: Object>(obj: &T) -> &BTreeMap<String, String> { obj.metadata().labels.as_ref().unwrap_or(&NO_LABELS) }

/// Kind-specific hooks. One implementation per kind, chosen when the store is built.
pub trait Strategy: Send + Sync + 'static {
    type Object: Object;

    fn namespace_scoped(&self) -> bool;

    fn object_name(&self, obj: &Self::Object) -> StoreResult<String> {
        match obj.metadata().name.as_deref() {
            Some(n) if !n.is_empty() => Ok(n.to_string()),
            _ => Err(StoreError::InvalidKey("name parameter required".into())),
        }
    }

    /// Kind-specific selectable fields. Must not panic on a default object.
    fn kind_fields(&self, obj: &Self::Object) -> Fields { object_meta_fields(obj.metadata(), self.namespace_scoped()) }

    /// Kind fields plus every label under `metadata.labels.<key>`.
    fn selectable_fields(&self, obj: &Self::Object) -> Fields { merge_labels(self.kind_fields(obj), labels_of(obj)) }

    fn prepare_for_create(&self, _obj: &mut Self::Object) {}

    fn prepare_for_update(&self, _obj: &mut Self::Object, _old: &Self::Object) {}

    fn validate_create(&self, _obj: &Self::Object) -> Vec<FieldError> { Vec::new() }

    fn validate_update(&self, _obj: &Self::Object, _old: &Self::Object) -> Vec<FieldError> { Vec::new() }

    fn validate_delete(&self, _obj: &Self::Object) -> Vec<FieldError> { Vec::new() }

    fn allow_create_on_update(&self) -> bool { false }

    fn allow_unconditional_update(&self) -> bool { true }
}
