//! Selectable field sets.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Field name to string value, as seen by field selectors.
pub type Fields = BTreeMap<String, String>;

/// Prefix under which labels are exposed as selectable fields.
pub const LABEL_FIELD_PREFIX: &str = "metadata.labels.";

/// Standard identity fields every kind exposes.
pub fn object_meta_fields(meta: &ObjectMeta, namespaced: bool) -> Fields {
    let mut fields = Fields::new();
    fields.insert("metadata.name".to_string(), meta.name.clone().unwrap_or_default());
    if namespaced {
        fields.insert("metadata.namespace".to_string(), meta.namespace.clone().unwrap_or_default());
    }
    fields
}

/// Merge labels into a field set. Kind fields win on collision.
pub fn merge_labels(mut fields: Fields, labels: &BTreeMap<String, String>) -> Fields {
    for (k, v) in labels {
        fields.entry(format!("{}{}", LABEL_FIELD_PREFIX, k)).or_insert_with(|| v.clone());
    }
    fields
}

/// Value of `field`, looking in labels for `metadata.labels.*` names and in the
/// kind fields otherwise.
pub fn get_field_value(field: &str, labels: &BTreeMap<String, String>, fields: &Fields) -> Option<String> {
    if let Some(label) = field.strip_prefix(LABEL_FIELD_PREFIX) {
        if let Some(v) = labels.get(label) {
            return Some(v.clone());
        }
    }
    fields.get(field).cloned()
}
